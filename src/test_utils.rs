//! In-crate fakes shared by the unit tests

use crate::chain::{
    recommended_confirmations, ChainDescriptor, ChainRegistry, ChainRpc, ConfirmedReceipt,
    RpcError,
};
use crate::config::GasPriceStrategy;
use crate::coordinator::{
    Coordinator, CoordinatorError, CreateOrchestrationRequest, DepositProof, OrchestrationRecord,
    OrchestrationStatus, StatusKind,
};
use crate::deposit::{SignerError, WalletSigner};
use crate::intent::{Intent, TokenAmount};
use crate::module::{ConfigField, ModuleKind, RequiredState};
use crate::poller::StatusObserver;

use async_trait::async_trait;
use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

pub const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

fn address(text: &str) -> Address {
    Address::from_str(text).unwrap()
}

/// Base Sepolia and Arbitrum Sepolia, as shipped in the default config
pub fn test_registry() -> ChainRegistry {
    ChainRegistry::from_descriptors(vec![
        ChainDescriptor {
            chain_id: 84532,
            display_name: "Base Sepolia".to_string(),
            token_address: address("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
            pool_address: Some(address("0x07eA79F68B2B3df564D0A34F8e19D9B1e339814b")),
            rpc_urls: vec!["https://sepolia.base.org".to_string()],
            explorer_url: "https://sepolia.basescan.org".to_string(),
            token_name: "USDC".to_string(),
            token_version: "2".to_string(),
            confirmation_blocks: recommended_confirmations(84532),
            gas_price_strategy: GasPriceStrategy::Eip1559,
            max_gas_price_gwei: 50,
        },
        ChainDescriptor {
            chain_id: 421614,
            display_name: "Arbitrum Sepolia".to_string(),
            token_address: address("0x75faf114eafb1bdbe2f0316df893fd58ce46aa4d"),
            pool_address: Some(address("0xBfC91D59fdAA134A4ED45f7B584cAf96D7792Eff")),
            rpc_urls: vec!["https://sepolia-rollup.arbitrum.io/rpc".to_string()],
            explorer_url: "https://sepolia.arbiscan.io".to_string(),
            token_name: "USDC".to_string(),
            token_version: "2".to_string(),
            confirmation_blocks: recommended_confirmations(421614),
            gas_price_strategy: GasPriceStrategy::Arbitrum,
            max_gas_price_gwei: 50,
        },
    ])
}

/// A required state that encodes cleanly for `kind`
pub fn required_state(kind: ModuleKind, chain_id: u64) -> RequiredState {
    let (config_input_type, required_fields) = match kind {
        ModuleKind::Autoearn => (
            "AutoEarnConfig[]",
            vec![
                ConfigField::new("chainId", "uint256"),
                ConfigField::new("token", "address"),
                ConfigField::new("pool", "address"),
            ],
        ),
        ModuleKind::Bond => (
            "BondConfig",
            vec![
                ConfigField::new("tokenAddresses", "address[]"),
                ConfigField::new("totalAmounts", "uint256[]"),
            ],
        ),
        ModuleKind::Autoswap => (
            "AutoSwapConfig",
            vec![
                ConfigField::new("chainId", "uint256"),
                ConfigField::new("tokenAddress", "address"),
                ConfigField::new("amount", "uint256"),
            ],
        ),
        ModuleKind::VerifiableAgent => (
            "VerifiableAgentConfig",
            vec![
                ConfigField::new("chainId", "uint256"),
                ConfigField::new("amount", "uint256"),
            ],
        ),
    };

    RequiredState {
        chain_id,
        module_kind: kind,
        module_address: address("0x42CF1b746F96D6cc59e84F87d26Ea64D3fbCa3a0"),
        config_input_type: config_input_type.to_string(),
        required_fields,
        config_template: BTreeMap::new(),
    }
}

pub fn sample_intent(chain_id: u64, amount: &str, owner: Address) -> Intent {
    Intent {
        source_chain_id: chain_id,
        source_token_address: test_registry().get(chain_id).unwrap().token_address,
        amount: TokenAmount::parse(amount).unwrap(),
        owner_address: owner,
    }
}

/// Record with distinct source and destination accounts
pub fn sample_record(source_chain_id: u64, destination_chain_id: u64) -> OrchestrationRecord {
    OrchestrationRecord {
        request_id: "req-1".to_string(),
        source_chain_id,
        destination_chain_id,
        account_address_on_source_chain: Address::repeat_byte(0xa1),
        account_address_on_destination_chain: Address::repeat_byte(0xb2),
        destination_token_address: Address::repeat_byte(0xc3),
        source_chain_account_modules: vec![],
        destination_chain_account_modules: vec![],
    }
}

pub fn status(request_id: &str, kind: StatusKind) -> OrchestrationStatus {
    OrchestrationStatus {
        status: kind,
        request_id: request_id.to_string(),
        updated_at: Some(Utc::now()),
        created_at: None,
        error_message: None,
    }
}

#[derive(Default)]
struct CoordinatorState {
    resolve_calls: usize,
    resolve_failure: Option<String>,
    resolve_chain_override: Option<u64>,
    created: Vec<CreateOrchestrationRequest>,
    empty_request_id: bool,
    notify_failures: u32,
    notified: Vec<(String, DepositProof)>,
    statuses: VecDeque<OrchestrationStatus>,
    last_status: Option<OrchestrationStatus>,
    status_calls: u32,
    status_failures: u32,
}

/// Scriptable coordinator. Unscripted status queries report `COMPLETED`.
#[derive(Default)]
pub struct FakeCoordinator {
    state: Mutex<CoordinatorState>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_calls(&self) -> usize {
        self.state.lock().unwrap().resolve_calls
    }

    pub fn fail_resolve(&self, message: &str) {
        self.state.lock().unwrap().resolve_failure = Some(message.to_string());
    }

    /// Answer every resolution as if `chain_id` had been asked for
    pub fn answer_resolve_for_chain(&self, chain_id: u64) {
        self.state.lock().unwrap().resolve_chain_override = Some(chain_id);
    }

    pub fn created(&self) -> Vec<CreateOrchestrationRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn return_empty_request_id(&self) {
        self.state.lock().unwrap().empty_request_id = true;
    }

    /// Fail the next `count` notifications
    pub fn fail_notify(&self, count: u32) {
        self.state.lock().unwrap().notify_failures = count;
    }

    /// Notifications the coordinator accepted
    pub fn notified(&self) -> Vec<(String, DepositProof)> {
        self.state.lock().unwrap().notified.clone()
    }

    /// Replace the queued snapshots; the last one repeats once the queue drains
    pub fn script_statuses(&self, statuses: Vec<OrchestrationStatus>) {
        let mut state = self.state.lock().unwrap();
        state.statuses = statuses.into();
        state.last_status = None;
    }

    pub fn status_calls(&self) -> u32 {
        self.state.lock().unwrap().status_calls
    }

    /// Fail the next `count` status queries
    pub fn fail_status(&self, count: u32) {
        self.state.lock().unwrap().status_failures = count;
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn resolve_required_state(
        &self,
        module: ModuleKind,
        chain_id: u64,
    ) -> Result<RequiredState, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        state.resolve_calls += 1;

        if let Some(message) = &state.resolve_failure {
            return Err(CoordinatorError::Transport(message.clone()));
        }
        Ok(required_state(
            module,
            state.resolve_chain_override.unwrap_or(chain_id),
        ))
    }

    async fn create_orchestration(
        &self,
        request: &CreateOrchestrationRequest,
    ) -> Result<OrchestrationRecord, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        state.created.push(request.clone());

        let mut record = sample_record(
            request.current_state.chain_id,
            request.required_state.chain_id,
        );
        record.request_id = if state.empty_request_id {
            String::new()
        } else {
            format!("req-{}", state.created.len())
        };
        Ok(record)
    }

    async fn notify_deposit(
        &self,
        request_id: &str,
        proof: &DepositProof,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        if state.notify_failures > 0 {
            state.notify_failures -= 1;
            return Err(CoordinatorError::Api {
                status: 502,
                message: "Bad Gateway".to_string(),
            });
        }
        state.notified.push((request_id.to_string(), proof.clone()));
        Ok(())
    }

    async fn get_status(&self, request_id: &str) -> Result<OrchestrationStatus, CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        state.status_calls += 1;

        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(CoordinatorError::Transport("connection reset".to_string()));
        }

        if let Some(next) = state.statuses.pop_front() {
            state.last_status = Some(next.clone());
            return Ok(next);
        }
        Ok(state
            .last_status
            .clone()
            .unwrap_or_else(|| status(request_id, StatusKind::Completed)))
    }
}

#[derive(Default)]
struct RpcState {
    balances: HashMap<u64, U256>,
    failing: HashSet<u64>,
    receipt_block: Option<u64>,
    revert: bool,
}

/// Chain access without a node behind it
#[derive(Default)]
pub struct FakeChainRpc {
    state: Mutex<RpcState>,
}

impl FakeChainRpc {
    pub fn set_balance(&self, chain_id: u64, units: U256) {
        self.state.lock().unwrap().balances.insert(chain_id, units);
    }

    pub fn fail_balance(&self, chain_id: u64) {
        self.state.lock().unwrap().failing.insert(chain_id);
    }

    pub fn set_receipt_block(&self, block_number: u64) {
        self.state.lock().unwrap().receipt_block = Some(block_number);
    }

    pub fn revert_receipts(&self) {
        self.state.lock().unwrap().revert = true;
    }
}

#[async_trait]
impl ChainRpc for FakeChainRpc {
    async fn wait_for_receipt(
        &self,
        chain_id: u64,
        tx_hash: H256,
        _timeout: Duration,
    ) -> Result<ConfirmedReceipt, RpcError> {
        let state = self.state.lock().unwrap();
        if state.revert {
            return Err(RpcError::Reverted { chain_id, tx_hash });
        }
        Ok(ConfirmedReceipt {
            tx_hash,
            block_number: state.receipt_block.unwrap_or(1),
        })
    }

    async fn read_balance(
        &self,
        chain_id: u64,
        _token: Address,
        _owner: Address,
    ) -> Result<U256, RpcError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(&chain_id) {
            return Err(RpcError::Connection {
                chain_id,
                message: "connection refused".to_string(),
            });
        }
        Ok(state.balances.get(&chain_id).copied().unwrap_or_default())
    }
}

/// Signs with a fixed local key; broadcasts nothing
pub struct KeySigner {
    wallet: LocalWallet,
    delay: Option<Duration>,
}

impl KeySigner {
    pub fn new() -> Self {
        Self {
            wallet: TEST_KEY.parse().unwrap(),
            delay: None,
        }
    }

    /// Hold every signature request for `delay`, like a user deciding
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn wait(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl WalletSigner for KeySigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_message(&self, message: Vec<u8>) -> Result<Signature, SignerError> {
        self.wait().await;
        self.wallet
            .sign_message(message)
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))
    }

    async fn sign_authorization(&self, digest: H256) -> Result<Signature, SignerError> {
        self.wait().await;
        self.wallet
            .sign_hash(digest)
            .map_err(|e| SignerError::Failed(e.to_string()))
    }

    async fn send_transaction(
        &self,
        _chain_id: u64,
        _to: Address,
        _data: Bytes,
        _value: U256,
    ) -> Result<H256, SignerError> {
        self.wait().await;
        Ok(H256::repeat_byte(0xab))
    }
}

#[derive(Default)]
struct Recorded {
    pending_updates: usize,
    completions: usize,
    errors: Vec<String>,
}

/// Counts the callbacks a poll run delivered
#[derive(Default)]
pub struct RecordingObserver {
    recorded: Mutex<Recorded>,
}

impl RecordingObserver {
    pub fn pending_updates(&self) -> usize {
        self.recorded.lock().unwrap().pending_updates
    }

    pub fn completions(&self) -> usize {
        self.recorded.lock().unwrap().completions
    }

    pub fn errors(&self) -> Vec<String> {
        self.recorded.lock().unwrap().errors.clone()
    }
}

impl StatusObserver for RecordingObserver {
    fn on_update(&self, status: &OrchestrationStatus) {
        if status.status == StatusKind::Pending {
            self.recorded.lock().unwrap().pending_updates += 1;
        }
    }

    fn on_complete(&self, _status: &OrchestrationStatus) {
        self.recorded.lock().unwrap().completions += 1;
    }

    fn on_error(&self, message: &str) {
        self.recorded.lock().unwrap().errors.push(message.to_string());
    }
}
