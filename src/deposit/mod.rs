//! Deposit execution
//!
//! Two strategies move the owner's tokens toward the orchestration account:
//! - `GaslessDepositExecutor` signs an EIP-3009 authorization off-chain
//! - `OnChainDepositExecutor` broadcasts an ERC-20 transfer and waits for it
//!
//! The strategy is chosen once per run from the module kind. Both finish by
//! notifying the coordinator with the resulting proof.

pub mod gas;
pub mod gasless;
pub mod onchain;
pub mod signer;

pub use gasless::{AuthorizationDomain, GaslessDepositExecutor};
pub use onchain::OnChainDepositExecutor;
pub use signer::{LocalWalletSigner, SignerError, WalletSigner};

use crate::chain::{ChainDescriptor, ChainRpc};
use crate::config::DepositConfig;
use crate::coordinator::{Coordinator, DepositProof, OrchestrationRecord};
use crate::error::{WorkflowError, WorkflowResult};
use crate::intent::Intent;
use crate::module::DepositStrategyKind;
use crate::orchestration::FlowKind;
use crate::workflow::CancelToken;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::{info, warn};

/// Signed EIP-3009 `TransferWithAuthorization`
#[derive(Debug, Clone, PartialEq)]
pub struct SignedAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: H256,
    pub v: u64,
    pub r: H256,
    pub s: H256,
    /// 65-byte `r || s || v`
    pub signature: Bytes,
}

/// Result of a deposit, exactly one per run
#[derive(Debug, Clone, PartialEq)]
pub enum DepositOutcome {
    Gasless {
        signed_authorization: SignedAuthorization,
    },
    OnChain {
        tx_hash: H256,
        block_number: u64,
    },
}

impl DepositOutcome {
    /// Proof handed to the coordinator
    pub fn proof(&self) -> DepositProof {
        match self {
            DepositOutcome::Gasless {
                signed_authorization,
            } => DepositProof::TransferWithAuthorization(signed_authorization.clone()),
            DepositOutcome::OnChain {
                tx_hash,
                block_number,
            } => DepositProof::Transfer {
                tx_hash: *tx_hash,
                block_number: *block_number,
            },
        }
    }

    /// Account that received the funds
    pub fn recipient(&self) -> Option<Address> {
        match self {
            DepositOutcome::Gasless {
                signed_authorization,
            } => Some(signed_authorization.to),
            DepositOutcome::OnChain { .. } => None,
        }
    }
}

/// Everything a strategy needs for one deposit
#[derive(Debug, Clone, Copy)]
pub struct DepositContext<'a> {
    pub record: &'a OrchestrationRecord,
    pub intent: &'a Intent,
    pub flow: FlowKind,
    pub source_chain: &'a ChainDescriptor,
}

/// One way of moving funds to the orchestration account
#[async_trait]
pub trait DepositStrategy: Send + Sync {
    fn kind(&self) -> DepositStrategyKind;

    /// Account the funds are sent to
    fn recipient(&self, ctx: &DepositContext<'_>) -> Address;

    /// Perform the deposit. Cancellation is honoured while waiting on the signer.
    async fn submit(
        &self,
        ctx: &DepositContext<'_>,
        cancel: &CancelToken,
    ) -> WorkflowResult<DepositOutcome>;
}

/// Build the strategy for a module's deposit kind
pub fn executor_for(
    kind: DepositStrategyKind,
    signer: Arc<dyn WalletSigner>,
    rpc: Arc<dyn ChainRpc>,
    config: &DepositConfig,
) -> Arc<dyn DepositStrategy> {
    match kind {
        DepositStrategyKind::Gasless => Arc::new(GaslessDepositExecutor::new(
            signer,
            config.authorization_validity_secs,
        )),
        DepositStrategyKind::OnChain => Arc::new(OnChainDepositExecutor::new(
            signer,
            rpc,
            config.receipt_timeout(),
        )),
    }
}

/// Tell the coordinator about a finished deposit
pub async fn notify_deposit(
    coordinator: &dyn Coordinator,
    request_id: &str,
    outcome: &DepositOutcome,
) -> WorkflowResult<()> {
    let proof = outcome.proof();

    match coordinator.notify_deposit(request_id, &proof).await {
        Ok(()) => {
            info!(
                "Coordinator notified of {:?} deposit for request {}",
                proof.transfer_type(),
                request_id
            );
            Ok(())
        }
        Err(e) => {
            warn!("Deposit notification for request {} failed: {}", request_id, e);
            Err(WorkflowError::NotifyFailed {
                request_id: request_id.to_string(),
                cause: e.to_string(),
            })
        }
    }
}
