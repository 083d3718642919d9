//! On-chain deposits: a plain ERC-20 transfer confirmed before notifying

use super::signer::{SignerError, WalletSigner};
use super::{DepositContext, DepositOutcome, DepositStrategy};
use crate::chain::erc20::TransferCall;
use crate::chain::{ChainRpc, ConfirmedReceipt};
use crate::error::{WorkflowError, WorkflowResult};
use crate::module::DepositStrategyKind;
use crate::workflow::CancelToken;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct OnChainDepositExecutor {
    signer: Arc<dyn WalletSigner>,
    rpc: Arc<dyn ChainRpc>,
    receipt_timeout: Duration,
}

impl OnChainDepositExecutor {
    pub fn new(
        signer: Arc<dyn WalletSigner>,
        rpc: Arc<dyn ChainRpc>,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            signer,
            rpc,
            receipt_timeout,
        }
    }

    /// Transfer `amount` of `token` to `to` on `chain_id` and wait for confirmation.
    ///
    /// Cancellation only applies until the signer has broadcast; once a hash
    /// exists the receipt is awaited so the proof is never lost.
    pub async fn transfer(
        &self,
        chain_id: u64,
        to: Address,
        token: Address,
        amount: U256,
        cancel: &CancelToken,
    ) -> WorkflowResult<ConfirmedReceipt> {
        let calldata = TransferCall { to, amount }.encode();

        let tx_hash = cancel
            .run(
                self.signer
                    .send_transaction(chain_id, token, Bytes::from(calldata), U256::zero()),
            )
            .await
            .ok_or(WorkflowError::Cancelled)?
            .map_err(|e| match e {
                SignerError::Rejected => WorkflowError::SigningRejected,
                SignerError::Failed(cause) => WorkflowError::TransferFailed { cause },
            })?;

        info!(
            "Deposit transfer {:?} broadcast on chain {}, waiting for receipt",
            tx_hash, chain_id
        );

        self.rpc
            .wait_for_receipt(chain_id, tx_hash, self.receipt_timeout)
            .await
            .map_err(|e| {
                warn!("Deposit transfer {:?} did not confirm: {}", tx_hash, e);
                WorkflowError::TransferFailed {
                    cause: e.to_string(),
                }
            })
    }
}

#[async_trait]
impl DepositStrategy for OnChainDepositExecutor {
    fn kind(&self) -> DepositStrategyKind {
        DepositStrategyKind::OnChain
    }

    /// Bonds commit on the source account ahead of the batch, whatever the flow
    fn recipient(&self, ctx: &DepositContext<'_>) -> Address {
        ctx.record.account_address_on_source_chain
    }

    async fn submit(
        &self,
        ctx: &DepositContext<'_>,
        cancel: &CancelToken,
    ) -> WorkflowResult<DepositOutcome> {
        let receipt = self
            .transfer(
                ctx.intent.source_chain_id,
                self.recipient(ctx),
                ctx.intent.source_token_address,
                ctx.intent.amount.to_u256(),
                cancel,
            )
            .await?;

        Ok(DepositOutcome::OnChain {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        })
    }
}
