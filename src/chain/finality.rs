//! Receipt confirmation for deposit transfers
//!
//! A transfer counts as confirmed once its receipt is mined with a success
//! status and has at least the chain's confirmation depth on top of it.
//! Depths are counted in L2 blocks.

use super::provider::ChainProvider;
use super::RpcError;

use ethers::types::{TransactionReceipt, H256, U64};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// A mined, successful and sufficiently deep transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
}

/// Waits for transactions on one chain to reach the required depth
pub struct ReceiptWatcher<'a> {
    provider: &'a ChainProvider,
    confirmation_blocks: u64,
    poll_interval: Duration,
}

impl<'a> ReceiptWatcher<'a> {
    pub fn new(provider: &'a ChainProvider, confirmation_blocks: u64) -> Self {
        Self {
            provider,
            confirmation_blocks: confirmation_blocks.max(1),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Block until the transaction is confirmed, reverted, or `timeout` elapses
    pub async fn wait(&self, tx_hash: H256, timeout: Duration) -> Result<ConfirmedReceipt, RpcError> {
        let chain_id = self.provider.chain_id();
        let start = Instant::now();

        loop {
            if start.elapsed() >= timeout {
                warn!(
                    "Gave up waiting for tx {:?} on chain {} after {:?}",
                    tx_hash,
                    chain_id,
                    start.elapsed()
                );
                return Err(RpcError::Timeout {
                    chain_id,
                    tx_hash,
                    elapsed: start.elapsed(),
                });
            }

            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if let Some(confirmed) = self.check_receipt(tx_hash, &receipt).await? {
                        return Ok(confirmed);
                    }
                }
                Ok(None) => {
                    debug!("Tx {:?} not yet mined on chain {}", tx_hash, chain_id);
                }
                Err(e) => {
                    // Transient provider trouble must not fail a transfer that may be mined
                    warn!("Receipt lookup failed on chain {}: {}", chain_id, e);
                }
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Returns the confirmed receipt once deep enough, `None` while still shallow
    async fn check_receipt(
        &self,
        tx_hash: H256,
        receipt: &TransactionReceipt,
    ) -> Result<Option<ConfirmedReceipt>, RpcError> {
        let chain_id = self.provider.chain_id();

        let Some(tx_block) = receipt.block_number.map(|b| b.as_u64()) else {
            return Ok(None);
        };

        if receipt.status != Some(U64::from(1)) {
            warn!("Tx {:?} reverted on chain {} (block {})", tx_hash, chain_id, tx_block);
            return Err(RpcError::Reverted { chain_id, tx_hash });
        }

        let current_block = self.provider.get_block_number().await?;
        let confirmations = current_block.saturating_sub(tx_block) + 1;

        if confirmations < self.confirmation_blocks {
            debug!(
                "Transaction {:?} has {} / {} confirmations on chain {}",
                tx_hash, confirmations, self.confirmation_blocks, chain_id
            );
            return Ok(None);
        }

        // Reorg protection: the receipt must still be there at depth
        if self.confirmation_blocks > 1 && !self.verify_inclusion(tx_hash).await? {
            warn!(
                "Reorg detected: tx {:?} no longer included on chain {}",
                tx_hash, chain_id
            );
            return Ok(None);
        }

        info!(
            "Transaction {:?} confirmed on chain {} ({} confirmations)",
            tx_hash, chain_id, confirmations
        );
        Ok(Some(ConfirmedReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: tx_block,
        }))
    }

    async fn verify_inclusion(&self, tx_hash: H256) -> Result<bool, RpcError> {
        match self.provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => Ok(receipt.status == Some(U64::from(1))),
            None => Ok(false),
        }
    }
}

/// Get recommended confirmation depth for a deposit transfer
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 3,
        // Ethereum testnets
        11155111 | 17000 => 2,
        // Polygon (probabilistic finality)
        137 | 80002 => 32,
        // Rollups: sequencer inclusion is enough for the coordinator to pick up
        42161 | 421614 | 10 | 11155420 | 8453 | 84532 => 1,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // Default conservative
        _ => 2,
    }
}
