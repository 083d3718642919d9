//! Gasless Depositor - cross-chain deposit orchestration client
//!
//! Drives one deposit run from the command line: resolve the target module,
//! create the orchestration, deposit and follow it until it settles.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use gasless_depositor::chain::{fetch_balances, ChainClients, ChainRegistry};
use gasless_depositor::config::{LogFormat, LoggingConfig, Settings};
use gasless_depositor::coordinator::{HttpCoordinator, OrchestrationStatus};
use gasless_depositor::deposit::{DepositOutcome, LocalWalletSigner};
use gasless_depositor::module::{ModuleKind, ModuleRegistry};
use gasless_depositor::poller::{PollConfig, PollOutcome, StatusObserver, StatusPoller};
use gasless_depositor::workflow::{
    CancelHandle, RunRequest, RunSummary, WorkflowController, WorkflowDeps, WorkflowEvent,
    WorkflowState,
};
use gasless_depositor::WorkflowError;

const DEFAULT_LOG_FILTER: &str = "info,gasless_depositor=debug,hyper=warn,reqwest=warn";

/// Notification retries before giving up and leaving the run ambiguous
const NOTIFY_RETRIES: u32 = 3;

#[derive(Parser)]
#[command(name = "gasless-depositor", version, about)]
struct Cli {
    /// Configuration file (defaults to $DEPOSITOR_CONFIG, then config/default.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deposit into a strategy module, end to end
    Run {
        /// AUTOEARN, AUTOSWAP, VERIFIABLE_AGENT or BOND
        #[arg(long)]
        module: Option<ModuleKind>,
        #[arg(long)]
        source_chain: Option<u64>,
        #[arg(long)]
        destination_chain: Option<u64>,
        /// Token amount, e.g. 5.00
        #[arg(long)]
        amount: Option<String>,
        #[arg(long)]
        skip_balance_check: bool,
    },
    /// Follow an existing orchestration until it settles
    Resume {
        #[arg(long)]
        request_id: String,
    },
    /// Token balance on every configured chain
    Balances {
        /// Owner address (defaults to the configured wallet)
        #[arg(long)]
        owner: Option<String>,
    },
    /// Supported modules and how they deposit
    Modules,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    init_logging(&settings.logging);

    info!("Starting gasless-depositor v{}", env!("CARGO_PKG_VERSION"));

    let chains = Arc::new(ChainRegistry::from_settings(&settings)?);
    info!("Loaded configuration for {} chains", chains.len());

    match cli.command {
        Command::Run {
            module,
            source_chain,
            destination_chain,
            amount,
            skip_balance_check,
        } => {
            let mut request = run_request(&settings, module, source_chain, destination_chain, amount)?;
            request.check_balance = !skip_balance_check;
            run(&settings, chains, request).await
        }
        Command::Resume { request_id } => resume(&settings, &request_id).await,
        Command::Balances { owner } => balances(&settings, chains, owner).await,
        Command::Modules => {
            list_modules(&chains);
            Ok(())
        }
    }
}

/// Command line values win over the `[run]` section
fn run_request(
    settings: &Settings,
    module: Option<ModuleKind>,
    source_chain: Option<u64>,
    destination_chain: Option<u64>,
    amount: Option<String>,
) -> Result<RunRequest> {
    let defaults = settings.run.as_ref().map(RunRequest::from);

    let module_kind = module
        .or_else(|| defaults.as_ref().map(|d| d.module_kind))
        .ok_or_else(|| anyhow!("--module is required (or set run.module)"))?;
    let source_chain_id = source_chain
        .or_else(|| defaults.as_ref().map(|d| d.source_chain_id))
        .ok_or_else(|| anyhow!("--source-chain is required (or set run.source_chain_id)"))?;
    let destination_chain_id = destination_chain
        .or_else(|| defaults.as_ref().map(|d| d.destination_chain_id))
        .ok_or_else(|| {
            anyhow!("--destination-chain is required (or set run.destination_chain_id)")
        })?;
    let amount = amount
        .or_else(|| defaults.as_ref().map(|d| d.amount.clone()))
        .ok_or_else(|| anyhow!("--amount is required (or set run.amount)"))?;

    Ok(RunRequest {
        module_kind,
        source_chain_id,
        destination_chain_id,
        amount,
        check_balance: true,
    })
}

async fn run(settings: &Settings, chains: Arc<ChainRegistry>, request: RunRequest) -> Result<()> {
    let clients = Arc::new(ChainClients::connect(&chains)?);
    let signer = Arc::new(LocalWalletSigner::from_env(
        &settings.wallet.private_key_env,
        clients.clone(),
    )?);
    let coordinator = Arc::new(HttpCoordinator::new(&settings.coordinator)?);

    let mut controller = WorkflowController::new(WorkflowDeps {
        chains: chains.clone(),
        modules: Arc::new(ModuleRegistry::new()),
        coordinator,
        signer,
        rpc: clients,
        api_key: settings.coordinator.api_key.clone(),
        poll: PollConfig::from(&settings.polling),
        deposit: settings.deposit.clone(),
    });

    let mut events = controller.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} workflow events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
    let signal_handle = cancel_on_signal(controller.cancel_handle());

    let observer = ConsoleObserver::default();
    let mut result = controller.run(&request, &observer).await;

    let mut attempt = 0;
    while matches!(&result, Err(e) if e.is_ambiguous()) && attempt < NOTIFY_RETRIES {
        attempt += 1;
        let delay = Duration::from_secs(2 * u64::from(attempt));
        warn!(
            "Retrying deposit notification in {:?} ({}/{})",
            delay, attempt, NOTIFY_RETRIES
        );
        tokio::time::sleep(delay).await;

        result = match controller.retry_notify().await {
            Ok(()) => match controller.poll_status(&observer).await {
                Ok(_) => controller
                    .summary()
                    .ok_or_else(|| WorkflowError::Internal("run finished without a deposit".into())),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
    }

    signal_handle.abort();
    // Only a run with a deposit can be resumed by polling
    let resumable = controller
        .deposit_outcome()
        .and(controller.orchestration())
        .map(|built| built.record.request_id.clone());
    drop(controller);
    let _ = event_handle.await;

    match result {
        Ok(summary) => {
            report(&chains, &summary);
            if summary.state == WorkflowState::TimedOut {
                let pending = WorkflowError::PollingTimedOut {
                    request_id: summary.request_id.clone(),
                };
                println!("{}", pending.user_message());
                print_resume_hint(&summary.request_id);
            }
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {}", e);
            if e.is_ambiguous() {
                error!("The deposit was made; do not deposit again. Check the orchestration status before retrying.");
            }
            match resumable {
                Some(request_id) => {
                    print_resume_hint(&request_id);
                    Err(anyhow!("{} (request {})", e.user_message(), request_id))
                }
                None => Err(anyhow!(e.user_message())),
            }
        }
    }
}

fn print_resume_hint(request_id: &str) {
    println!(
        "Resume with: gasless-depositor resume --request-id {}",
        request_id
    );
}

async fn resume(settings: &Settings, request_id: &str) -> Result<()> {
    let coordinator = Arc::new(HttpCoordinator::new(&settings.coordinator)?);
    let poller = StatusPoller::new(coordinator);

    let handle = CancelHandle::new();
    let signal_handle = cancel_on_signal(handle.clone());

    let observer = ConsoleObserver::default();
    let outcome = poller
        .poll(
            request_id,
            &PollConfig::from(&settings.polling),
            &observer,
            &handle.token(),
        )
        .await;
    signal_handle.abort();

    match outcome {
        PollOutcome::Completed(status) => {
            println!("Orchestration {} completed", status.request_id);
            Ok(())
        }
        PollOutcome::Failed(status) => {
            let err = WorkflowError::RemoteFailure {
                message: status
                    .error_message
                    .unwrap_or_else(|| "Orchestration failed".to_string()),
            };
            Err(anyhow!(err.user_message()))
        }
        PollOutcome::TimedOut { .. } => {
            let err = WorkflowError::PollingTimedOut {
                request_id: request_id.to_string(),
            };
            println!("{}", err.user_message());
            print_resume_hint(request_id);
            Ok(())
        }
        PollOutcome::Cancelled => {
            print_resume_hint(request_id);
            bail!(
                "{} (request {})",
                WorkflowError::Cancelled.user_message(),
                request_id
            )
        }
    }
}

async fn balances(settings: &Settings, chains: Arc<ChainRegistry>, owner: Option<String>) -> Result<()> {
    let owner: Address = match owner {
        Some(text) => text
            .parse()
            .map_err(|e| anyhow!("Invalid owner address {}: {:?}", text, e))?,
        None => wallet_address(&settings.wallet.private_key_env)?,
    };

    let clients = ChainClients::connect(&chains)?;
    for (chain_id, healthy) in clients.health_check().await {
        if !healthy {
            warn!("Chain {} RPC is not answering, its balance may be unavailable", chain_id);
        }
    }
    let balances = fetch_balances(&clients, &chains, owner).await;

    for balance in balances {
        let amount = balance
            .amount
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unavailable".to_string());
        let link = chains
            .explorer_address_url(balance.chain_id, owner)
            .unwrap_or_default();
        println!(
            "{:<20} {:>8}  {:>18} USDC  {}",
            balance.display_name, balance.chain_id, amount, link
        );
    }
    Ok(())
}

fn list_modules(chains: &ChainRegistry) {
    let modules = ModuleRegistry::new();

    for kind in ModuleKind::ALL {
        let Ok(spec) = modules.get(kind) else {
            continue;
        };
        let fields = spec
            .field_schema()
            .map(|fields| {
                fields
                    .iter()
                    .map(|f| format!("{} {}", f.field_type, f.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_else(|| "from coordinator".to_string());
        println!(
            "{:<18} deposit: {:<8} config: {}",
            kind.as_str(),
            format!("{:?}", spec.deposit_strategy()),
            fields
        );
    }
    println!("Chains: {:?}", chains.chain_ids());
}

fn wallet_address(private_key_env: &str) -> Result<Address> {
    let key = std::env::var(private_key_env)
        .with_context(|| format!("No owner given and {} is not set", private_key_env))?;
    let wallet: LocalWallet = key.trim().parse().context("Invalid private key")?;
    Ok(wallet.address())
}

fn report(chains: &ChainRegistry, summary: &RunSummary) {
    println!("Request:  {}", summary.request_id);
    println!("Flow:     {}", summary.flow);
    println!("State:    {}", summary.state);

    match &summary.deposit {
        DepositOutcome::Gasless {
            signed_authorization,
        } => {
            println!(
                "Deposit:  gasless authorization for {} units to {:?}",
                signed_authorization.value, signed_authorization.to
            );
        }
        DepositOutcome::OnChain {
            tx_hash,
            block_number,
        } => {
            println!("Deposit:  transfer {:?} in block {}", tx_hash, block_number);
        }
    }

    if let Some(status) = &summary.last_status {
        debug!("Last status: {:?}", status);
    }
    debug!("Supported chains: {:?}", chains.chain_ids());
}

fn log_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::StateChanged { from, to } => debug!("State {} -> {}", from, to),
        WorkflowEvent::RequiredStateResolved {
            module_kind,
            chain_id,
        } => info!("Resolved {} on chain {}", module_kind, chain_id),
        WorkflowEvent::OrchestrationCreated { request_id, flow } => {
            info!("Orchestration {} created ({})", request_id, flow)
        }
        WorkflowEvent::DepositSubmitted {
            request_id,
            transfer_type,
        } => info!("Deposit for {} submitted as {:?}", request_id, transfer_type),
        WorkflowEvent::StatusUpdated(status) => {
            debug!("Status {} {:?}", status.request_id, status.status)
        }
        WorkflowEvent::StepFailed {
            state,
            message,
            ambiguous,
        } => {
            if *ambiguous {
                error!("{} ({})", message, state);
            } else {
                warn!("{} ({})", message, state);
            }
        }
    }
}

/// Prints a line whenever the coordinator reports a new state
#[derive(Default)]
struct ConsoleObserver {
    last: Mutex<Option<OrchestrationStatus>>,
}

impl StatusObserver for ConsoleObserver {
    fn on_update(&self, status: &OrchestrationStatus) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if last.as_ref().map_or(true, |prev| !prev.same_state_as(status)) {
            println!("Status:   {:?}", status.status);
            *last = Some(status.clone());
        }
    }

    fn on_complete(&self, status: &OrchestrationStatus) {
        info!("Orchestration {} completed", status.request_id);
    }

    fn on_error(&self, message: &str) {
        error!("Orchestration failed: {}", message);
    }
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = config
        .filter
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

/// Cancel `handle` on Ctrl+C or SIGTERM
fn cancel_on_signal(handle: CancelHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, cancelling");
        handle.cancel();
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
