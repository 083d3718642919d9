//! Workflow controller
//!
//! Owns the data of the current run and moves it through the states in
//! [`WorkflowState`]. Every step checks that it is legal from the current
//! state, and a failed step leaves the state where it was so the step can
//! be re-invoked. The only exception is a failed deposit notification,
//! which parks the run in `NotifyFailed` until `retry_notify` succeeds.

use super::{CancelHandle, WorkflowEvent, WorkflowState};
use crate::chain::{ChainRegistry, ChainRpc};
use crate::config::{DepositConfig, RunConfig};
use crate::coordinator::{Coordinator, OrchestrationStatus};
use crate::deposit::{executor_for, notify_deposit, DepositContext, DepositOutcome, WalletSigner};
use crate::error::{WorkflowError, WorkflowResult};
use crate::intent::{Intent, IntentBuilder, TokenAmount};
use crate::module::{
    EncodeContext, ModuleKind, ModuleRegistry, ModuleResolver, ModuleSelection, RequiredState,
};
use crate::orchestration::{BuiltOrchestration, FlowKind, OrchestrationRequestBuilder};
use crate::poller::{PollConfig, PollOutcome, StatusObserver, StatusPoller};

use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Collaborators and settings a controller is built from
pub struct WorkflowDeps {
    pub chains: Arc<ChainRegistry>,
    pub modules: Arc<ModuleRegistry>,
    pub coordinator: Arc<dyn Coordinator>,
    pub signer: Arc<dyn WalletSigner>,
    pub rpc: Arc<dyn ChainRpc>,
    pub api_key: String,
    pub poll: PollConfig,
    pub deposit: DepositConfig,
}

/// Parameters for driving a whole run in one call
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub module_kind: ModuleKind,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub amount: String,
    /// Read the source balance first and refuse amounts above it
    pub check_balance: bool,
}

impl From<&RunConfig> for RunRequest {
    fn from(config: &RunConfig) -> Self {
        Self {
            module_kind: config.module,
            source_chain_id: config.source_chain_id,
            destination_chain_id: config.destination_chain_id,
            amount: config.amount.clone(),
            check_balance: true,
        }
    }
}

/// What a finished `run` produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub request_id: String,
    pub flow: FlowKind,
    pub deposit: DepositOutcome,
    pub state: WorkflowState,
    pub last_status: Option<OrchestrationStatus>,
}

#[derive(Debug, Default)]
struct RunData {
    selection: Option<ModuleSelection>,
    required_state: Option<RequiredState>,
    intent: Option<Intent>,
    orchestration: Option<BuiltOrchestration>,
    deposit: Option<DepositOutcome>,
    last_status: Option<OrchestrationStatus>,
}

/// Publishes every snapshot before handing it to the caller's observer
struct EventForwarder<'a> {
    inner: &'a dyn StatusObserver,
    events: &'a broadcast::Sender<WorkflowEvent>,
}

impl StatusObserver for EventForwarder<'_> {
    fn on_update(&self, status: &OrchestrationStatus) {
        let _ = self.events.send(WorkflowEvent::StatusUpdated(status.clone()));
        self.inner.on_update(status);
    }

    fn on_complete(&self, status: &OrchestrationStatus) {
        self.inner.on_complete(status);
    }

    fn on_error(&self, message: &str) {
        self.inner.on_error(message);
    }
}

pub struct WorkflowController {
    chains: Arc<ChainRegistry>,
    modules: Arc<ModuleRegistry>,
    coordinator: Arc<dyn Coordinator>,
    signer: Arc<dyn WalletSigner>,
    rpc: Arc<dyn ChainRpc>,
    api_key: String,
    poll_config: PollConfig,
    deposit_config: DepositConfig,

    resolver: ModuleResolver,
    intents: IntentBuilder,
    requests: OrchestrationRequestBuilder,
    poller: StatusPoller,

    state: WorkflowState,
    run: RunData,
    cancel: CancelHandle,
    events: broadcast::Sender<WorkflowEvent>,
}

impl WorkflowController {
    pub fn new(deps: WorkflowDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            resolver: ModuleResolver::new(
                deps.chains.clone(),
                deps.modules.clone(),
                deps.coordinator.clone(),
            ),
            intents: IntentBuilder::new(deps.chains.clone()),
            requests: OrchestrationRequestBuilder::new(
                deps.coordinator.clone(),
                deps.signer.clone(),
            ),
            poller: StatusPoller::new(deps.coordinator.clone()),
            chains: deps.chains,
            modules: deps.modules,
            coordinator: deps.coordinator,
            signer: deps.signer,
            rpc: deps.rpc,
            api_key: deps.api_key,
            poll_config: deps.poll,
            deposit_config: deps.deposit,
            state: WorkflowState::Idle,
            run: RunData::default(),
            cancel: CancelHandle::new(),
            events,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn selection(&self) -> Option<ModuleSelection> {
        self.run.selection
    }

    pub fn required_state(&self) -> Option<&RequiredState> {
        self.run.required_state.as_ref()
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.run.intent.as_ref()
    }

    pub fn orchestration(&self) -> Option<&BuiltOrchestration> {
        self.run.orchestration.as_ref()
    }

    pub fn deposit_outcome(&self) -> Option<&DepositOutcome> {
        self.run.deposit.as_ref()
    }

    pub fn last_status(&self) -> Option<&OrchestrationStatus> {
        self.run.last_status.as_ref()
    }

    /// Handle that cancels the step currently suspended on the signer or the
    /// poller. A handle is spent once it fires; fetch a fresh one afterwards.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Pick a module and destination. Starts a new run from `Idle` or a
    /// finished run, or replaces the pick while the run is still editable.
    pub fn select_module(
        &mut self,
        module_kind: ModuleKind,
        destination_chain_id: u64,
    ) -> WorkflowResult<()> {
        if self.state.run_in_flight() {
            return self.fail(WorkflowError::RunInProgress);
        }
        if let Err(e) = self.chains.get(destination_chain_id) {
            return self.fail(e);
        }
        if self.state.is_terminal() {
            self.run = RunData::default();
        }

        let selection = ModuleSelection {
            module_kind,
            destination_chain_id,
        };
        if self.run.selection != Some(selection) {
            // Anything derived from the previous pick is stale now
            self.run.required_state = None;
            self.run.intent = None;
        }
        self.run.selection = Some(selection);

        info!(
            "Selected module {} on destination chain {}",
            module_kind, destination_chain_id
        );
        self.transition(WorkflowState::ModuleSelected)
    }

    /// Point the current module at another destination chain
    pub fn change_destination(&mut self, destination_chain_id: u64) -> WorkflowResult<()> {
        if self.state.run_in_flight() {
            return self.fail(WorkflowError::RunInProgress);
        }
        let selection = match (self.state.is_editable(), self.run.selection) {
            (true, Some(selection)) => selection,
            _ => return self.invalid(WorkflowState::ModuleSelected),
        };
        self.select_module(selection.module_kind, destination_chain_id)
    }

    /// Fetch what the selected module needs on its destination chain. A state
    /// already resolved for the same pick is reused without a network call.
    pub async fn resolve_required_state(&mut self) -> WorkflowResult<RequiredState> {
        if !matches!(
            self.state,
            WorkflowState::ModuleSelected | WorkflowState::RequiredStateReady
        ) {
            return self.invalid(WorkflowState::RequiredStateReady);
        }
        let selection = self.current_selection()?;

        if let Some(state) = self.run.required_state.clone() {
            if state.chain_id == selection.destination_chain_id
                && state.module_kind == selection.module_kind
            {
                debug!(
                    "Reusing required state of {} on chain {}",
                    state.module_kind, state.chain_id
                );
                if self.state != WorkflowState::RequiredStateReady {
                    self.transition(WorkflowState::RequiredStateReady)?;
                }
                return Ok(state);
            }
        }

        let resolved = self
            .resolver
            .resolve(selection.module_kind, selection.destination_chain_id)
            .await;
        let state = match resolved {
            Ok(state) => state,
            Err(e) => return self.fail(e),
        };

        self.run.required_state = Some(state.clone());
        self.emit(WorkflowEvent::RequiredStateResolved {
            module_kind: state.module_kind,
            chain_id: state.chain_id,
        });
        if self.state != WorkflowState::RequiredStateReady {
            self.transition(WorkflowState::RequiredStateReady)?;
        }
        Ok(state)
    }

    /// Record what the user holds and wants to move. With `available`, the
    /// amount may not exceed that balance.
    pub fn set_intent(
        &mut self,
        source_chain_id: u64,
        amount: &str,
        owner_address: Address,
        available: Option<TokenAmount>,
    ) -> WorkflowResult<Intent> {
        if !matches!(
            self.state,
            WorkflowState::RequiredStateReady | WorkflowState::IntentReady
        ) {
            return self.invalid(WorkflowState::IntentReady);
        }

        let built = match available {
            Some(available) => {
                self.intents
                    .build_with_balance(source_chain_id, amount, owner_address, available)
            }
            None => self.intents.build(source_chain_id, amount, owner_address),
        };
        let intent = match built {
            Ok(intent) => intent,
            Err(e) => return self.fail(e),
        };

        debug!(
            "Intent: {} from chain {} owned by {:?}",
            intent.amount, intent.source_chain_id, intent.owner_address
        );
        self.run.intent = Some(intent.clone());
        self.transition(WorkflowState::IntentReady)?;
        Ok(intent)
    }

    /// Encode the module config, sign and submit the orchestration request
    pub async fn create_orchestration(&mut self) -> WorkflowResult<BuiltOrchestration> {
        if self.state != WorkflowState::IntentReady {
            return self.invalid(WorkflowState::OrchestrationReady);
        }
        let selection = self.current_selection()?;
        let (required_state, intent) = match (&self.run.required_state, &self.run.intent) {
            (Some(state), Some(intent)) => (state.clone(), intent.clone()),
            _ => return self.fail(WorkflowError::Internal("run data is incomplete".into())),
        };

        if required_state.chain_id != selection.destination_chain_id
            || required_state.module_kind != selection.module_kind
        {
            warn!(
                "Required state for {} on chain {} does not match selection {} on chain {}",
                required_state.module_kind,
                required_state.chain_id,
                selection.module_kind,
                selection.destination_chain_id
            );
            return self.fail(WorkflowError::StaleRequiredState {
                resolved: required_state.chain_id,
                expected: selection.destination_chain_id,
            });
        }

        let chains = self.chains.clone();
        let destination = match chains.get(required_state.chain_id) {
            Ok(destination) => destination,
            Err(e) => return self.fail(e),
        };
        let encoded = match self.modules.encode(&EncodeContext {
            required_state: &required_state,
            destination,
            amount: intent.amount,
        }) {
            Ok(encoded) => encoded,
            Err(e) => return self.fail(e),
        };

        let token = self.cancel.token();
        let created = self
            .requests
            .build(
                &intent,
                &required_state,
                intent.owner_address,
                &self.api_key,
                &encoded,
                &token,
            )
            .await;
        let built = match created {
            Ok(built) => built,
            Err(e) => return self.fail(e),
        };

        self.run.orchestration = Some(built.clone());
        self.emit(WorkflowEvent::OrchestrationCreated {
            request_id: built.record.request_id.clone(),
            flow: built.flow,
        });
        self.transition(WorkflowState::OrchestrationReady)?;
        Ok(built)
    }

    /// Move the funds with the module's deposit strategy and notify the
    /// coordinator. A failed notification keeps the outcome for `retry_notify`.
    pub async fn submit_deposit(&mut self) -> WorkflowResult<DepositOutcome> {
        if self.state != WorkflowState::OrchestrationReady {
            return self.invalid(WorkflowState::DepositSubmitted);
        }
        let (built, intent, module_kind) = match (
            &self.run.orchestration,
            &self.run.intent,
            &self.run.required_state,
        ) {
            (Some(built), Some(intent), Some(state)) => {
                (built.clone(), intent.clone(), state.module_kind)
            }
            _ => return self.fail(WorkflowError::Internal("run data is incomplete".into())),
        };

        if self.cancel.is_cancelled() {
            return self.fail(WorkflowError::Cancelled);
        }

        let chains = self.chains.clone();
        let source_chain = match chains.get(intent.source_chain_id) {
            Ok(chain) => chain,
            Err(e) => return self.fail(e),
        };
        let strategy_kind = match self.modules.deposit_strategy(module_kind) {
            Ok(kind) => kind,
            Err(e) => return self.fail(e),
        };
        let strategy = executor_for(
            strategy_kind,
            self.signer.clone(),
            self.rpc.clone(),
            &self.deposit_config,
        );

        let ctx = DepositContext {
            record: &built.record,
            intent: &intent,
            flow: built.flow,
            source_chain,
        };
        info!(
            "Depositing {} for {} via {:?} to {:?}",
            intent.amount,
            built.record.request_id,
            strategy_kind,
            strategy.recipient(&ctx)
        );

        let token = self.cancel.token();
        let submitted = strategy.submit(&ctx, &token).await;
        let outcome = match submitted {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(e),
        };

        self.run.deposit = Some(outcome.clone());
        self.notify_stored_deposit().await?;
        Ok(outcome)
    }

    /// Re-send the notification for the deposit already made
    pub async fn retry_notify(&mut self) -> WorkflowResult<()> {
        if self.state != WorkflowState::NotifyFailed {
            return self.invalid(WorkflowState::DepositSubmitted);
        }
        self.notify_stored_deposit().await
    }

    async fn notify_stored_deposit(&mut self) -> WorkflowResult<()> {
        let (request_id, outcome) = match (&self.run.orchestration, &self.run.deposit) {
            (Some(built), Some(outcome)) => (built.record.request_id.clone(), outcome.clone()),
            _ => return self.fail(WorkflowError::Internal("no deposit to notify".into())),
        };

        let notified = notify_deposit(self.coordinator.as_ref(), &request_id, &outcome).await;
        match notified {
            Ok(()) => {
                self.emit(WorkflowEvent::DepositSubmitted {
                    request_id,
                    transfer_type: outcome.proof().transfer_type(),
                });
                self.transition(WorkflowState::DepositSubmitted)
            }
            Err(e) => {
                if self.state != WorkflowState::NotifyFailed {
                    self.transition(WorkflowState::NotifyFailed)?;
                }
                self.fail(e)
            }
        }
    }

    /// Poll the coordinator until the orchestration settles. `Completed` and
    /// `TimedOut` come back as outcomes; a remote failure or cancellation is
    /// an error. Cancelling returns the run to `DepositSubmitted`.
    pub async fn poll_status(&mut self, observer: &dyn StatusObserver) -> WorkflowResult<PollOutcome> {
        if !matches!(
            self.state,
            WorkflowState::DepositSubmitted | WorkflowState::TimedOut
        ) {
            return self.invalid(WorkflowState::Polling);
        }
        let request_id = match &self.run.orchestration {
            Some(built) => built.record.request_id.clone(),
            None => return self.fail(WorkflowError::Internal("no orchestration to poll".into())),
        };

        self.transition(WorkflowState::Polling)?;

        let token = self.cancel.token();
        let forwarder = EventForwarder {
            inner: observer,
            events: &self.events,
        };
        let outcome = self
            .poller
            .poll(&request_id, &self.poll_config, &forwarder, &token)
            .await;

        match &outcome {
            PollOutcome::Completed(status) => {
                self.run.last_status = Some(status.clone());
                self.transition(WorkflowState::Completed)?;
                Ok(outcome)
            }
            PollOutcome::Failed(status) => {
                self.run.last_status = Some(status.clone());
                self.transition(WorkflowState::Failed)?;
                let message = status
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Orchestration failed".to_string());
                self.fail(WorkflowError::RemoteFailure { message })
            }
            PollOutcome::TimedOut { last, .. } => {
                if let Some(last) = last {
                    self.run.last_status = Some(last.clone());
                }
                self.transition(WorkflowState::TimedOut)?;
                Ok(outcome)
            }
            PollOutcome::Cancelled => {
                self.transition(WorkflowState::DepositSubmitted)?;
                self.fail(WorkflowError::Cancelled)
            }
        }
    }

    /// Step back one editable state, keeping the resolved required state
    pub fn back(&mut self) -> WorkflowResult<()> {
        match self.state {
            WorkflowState::IntentReady => {
                self.run.intent = None;
                self.transition(WorkflowState::RequiredStateReady)
            }
            WorkflowState::RequiredStateReady => self.transition(WorkflowState::ModuleSelected),
            _ => Err(WorkflowError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "previous step".to_string(),
            }),
        }
    }

    /// Abandon the run from any state. Suspended work is cancelled and all
    /// run data dropped, so an abandoned record never receives a deposit.
    pub fn reset(&mut self) {
        if self.state.run_in_flight() {
            warn!("Resetting run in state {}", self.state);
        }
        self.cancel.cancel();
        self.cancel = CancelHandle::new();
        self.run = RunData::default();

        if self.state != WorkflowState::Idle {
            let from = self.state;
            self.state = WorkflowState::Idle;
            info!("Workflow {} -> {}", from, self.state);
            self.emit(WorkflowEvent::StateChanged {
                from,
                to: WorkflowState::Idle,
            });
        }
    }

    /// Drive a complete run: select, resolve, intent, create, deposit, poll
    pub async fn run(
        &mut self,
        request: &RunRequest,
        observer: &dyn StatusObserver,
    ) -> WorkflowResult<RunSummary> {
        if self.state.run_in_flight() {
            return self.fail(WorkflowError::RunInProgress);
        }
        if self.state != WorkflowState::Idle {
            self.reset();
        }

        let owner = self.signer.address();
        info!(
            "Starting run: {} from chain {} into {} on chain {}",
            request.amount,
            request.source_chain_id,
            request.module_kind,
            request.destination_chain_id
        );

        self.select_module(request.module_kind, request.destination_chain_id)?;
        self.resolve_required_state().await?;

        let available = if request.check_balance {
            let balance = self.source_balance(request.source_chain_id, owner).await;
            match balance {
                Ok(balance) => Some(balance),
                Err(e) => return self.fail(e),
            }
        } else {
            None
        };
        self.set_intent(request.source_chain_id, &request.amount, owner, available)?;

        self.create_orchestration().await?;
        self.submit_deposit().await?;
        self.poll_status(observer).await?;

        self.summary()
            .ok_or_else(|| WorkflowError::Internal("run finished without a deposit".into()))
    }

    /// Snapshot of the run once a deposit exists
    pub fn summary(&self) -> Option<RunSummary> {
        let built = self.run.orchestration.as_ref()?;
        let deposit = self.run.deposit.clone()?;

        Some(RunSummary {
            request_id: built.record.request_id.clone(),
            flow: built.flow,
            deposit,
            state: self.state,
            last_status: self.run.last_status.clone(),
        })
    }

    async fn source_balance(&self, chain_id: u64, owner: Address) -> WorkflowResult<TokenAmount> {
        let chain = self.chains.get(chain_id)?;
        let raw = self
            .rpc
            .read_balance(chain_id, chain.token_address, owner)
            .await
            .map_err(|e| {
                WorkflowError::Internal(format!(
                    "cannot read balance on chain {}: {}",
                    chain_id, e
                ))
            })?;
        TokenAmount::from_u256(raw)
    }

    fn current_selection(&self) -> WorkflowResult<ModuleSelection> {
        self.run
            .selection
            .ok_or_else(|| WorkflowError::Internal("no module selected".into()))
    }

    fn transition(&mut self, to: WorkflowState) -> WorkflowResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }

        let from = self.state;
        self.state = to;
        info!("Workflow {} -> {}", from, to);
        self.emit(WorkflowEvent::StateChanged { from, to });
        Ok(())
    }

    fn invalid<T>(&self, to: WorkflowState) -> WorkflowResult<T> {
        Err(WorkflowError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        })
    }

    /// Report a failed step. A fired cancel handle is replaced so the step
    /// can be retried.
    fn fail<T>(&mut self, error: WorkflowError) -> WorkflowResult<T> {
        warn!("Step failed in state {}: {}", self.state, error);

        if matches!(error, WorkflowError::Cancelled) || self.cancel.is_cancelled() {
            self.cancel = CancelHandle::new();
        }

        self.emit(WorkflowEvent::StepFailed {
            state: self.state,
            message: error.user_message(),
            ambiguous: error.is_ambiguous(),
        });
        Err(error)
    }

    fn emit(&self, event: WorkflowEvent) {
        debug!("Workflow event {}", event.name());
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
