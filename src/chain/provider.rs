//! RPC access for one chain, spread over several endpoints
//!
//! Reads rotate to the next endpoint when the active one fails and give up
//! once every endpoint has been tried. Broadcasts go to the active endpoint
//! only.

use super::erc20::Erc20;
use super::registry::ChainDescriptor;
use super::RpcError;
use crate::config::GasPriceStrategy;

use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Tip used on rollup testnets, 0.1 gwei
const PRIORITY_FEE_WEI: u64 = 100_000_000;

pub struct ChainProvider {
    descriptor: ChainDescriptor,
    endpoints: Vec<Provider<Http>>,
    active: AtomicUsize,
}

impl ChainProvider {
    pub fn new(descriptor: ChainDescriptor) -> Result<Self, RpcError> {
        let endpoints: Vec<Provider<Http>> = descriptor
            .rpc_urls
            .iter()
            .filter_map(|url| match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    debug!("RPC endpoint for chain {}: {}", descriptor.chain_id, url);
                    Some(provider.interval(Duration::from_millis(500)))
                }
                Err(e) => {
                    warn!("Skipping RPC url {} for chain {}: {}", url, descriptor.chain_id, e);
                    None
                }
            })
            .collect();

        if endpoints.is_empty() {
            return Err(RpcError::Connection {
                chain_id: descriptor.chain_id,
                message: "no usable RPC url".to_string(),
            });
        }

        Ok(Self {
            descriptor,
            endpoints,
            active: AtomicUsize::new(0),
        })
    }

    fn endpoint(&self) -> (usize, Provider<Http>) {
        let index = self.active.load(Ordering::Relaxed) % self.endpoints.len();
        (index, self.endpoints[index].clone())
    }

    /// Move past `failed`, unless another caller already did
    fn rotate_from(&self, failed: usize) {
        let next = (failed + 1) % self.endpoints.len();
        if next != failed
            && self
                .active
                .compare_exchange(failed, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            warn!("Chain {} switched to RPC endpoint {}", self.chain_id(), next);
        }
    }

    /// Run a read against each endpoint in turn until one answers
    async fn read<T, F, Fut>(&self, what: &str, call: F) -> Result<T, RpcError>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = String::new();

        for _ in 0..self.endpoints.len() {
            let (index, provider) = self.endpoint();
            match call(provider).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} failed on chain {} endpoint {}: {}", what, self.chain_id(), index, e);
                    last_error = e.to_string();
                    self.rotate_from(index);
                }
            }
        }

        Err(RpcError::Connection {
            chain_id: self.chain_id(),
            message: format!("{}: {}", what, last_error),
        })
    }

    pub async fn get_block_number(&self) -> Result<u64, RpcError> {
        self.read("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
            .map(|block| block.as_u64())
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.read("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
    }

    /// Next nonce for an account, counting pending transactions
    pub async fn get_transaction_count(&self, account: Address) -> Result<U256, RpcError> {
        self.read("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(account, Some(BlockNumber::Pending.into()))
                .await
        })
        .await
    }

    /// Estimation errors usually mean the call would revert, so no failover
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, RpcError> {
        let (_, provider) = self.endpoint();
        provider
            .estimate_gas(tx, None)
            .await
            .map_err(|e| RpcError::GasEstimation(e.to_string()))
    }

    /// Current price in the shape the chain's strategy calls for
    pub async fn get_gas_price(&self) -> Result<GasPrice, RpcError> {
        match self.descriptor.gas_price_strategy {
            // Arbitrum folds L1 data cost into its L2 price
            GasPriceStrategy::Legacy | GasPriceStrategy::Arbitrum => {
                let price = self
                    .read("eth_gasPrice", |p| async move { p.get_gas_price().await })
                    .await
                    .map_err(|e| RpcError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism => self.eip1559_price().await,
        }
    }

    /// `2 * base fee + tip`, capped at the chain's configured maximum
    async fn eip1559_price(&self) -> Result<GasPrice, RpcError> {
        let block = self
            .read("eth_getBlockByNumber", |p| async move {
                p.get_block(BlockNumber::Latest).await
            })
            .await
            .map_err(|e| RpcError::GasEstimation(e.to_string()))?
            .ok_or_else(|| RpcError::GasEstimation("no latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| RpcError::GasEstimation("latest block has no base fee".to_string()))?;

        let cap = U256::from(self.descriptor.max_gas_price_gwei) * U256::exp10(9);
        let priority = U256::from(PRIORITY_FEE_WEI);
        let max_fee = std::cmp::min(base_fee * 2 + priority, cap);

        Ok(GasPrice::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: std::cmp::min(priority, max_fee),
        })
    }

    /// Broadcast a signed transaction
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError> {
        let (_, provider) = self.endpoint();
        let pending = provider.send_raw_transaction(raw).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("insufficient funds") {
                RpcError::InsufficientFunds {
                    chain_id: self.chain_id(),
                }
            } else {
                RpcError::Broadcast(message)
            }
        })?;
        Ok(pending.tx_hash())
    }

    /// ERC-20 balance of `owner` in base units
    pub async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, RpcError> {
        self.read("balanceOf", |p| async move {
            Erc20::new(token, Arc::new(p))
                .balance_of(owner)
                .call()
                .await
                .map_err(|e| ProviderError::CustomError(e.to_string()))
        })
        .await
    }

    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.chain_id(), e);
                false
            }
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.descriptor.chain_id
    }

    pub fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }
}

/// Gas price in legacy or EIP-1559 form
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_registry;

    #[test]
    fn test_rejects_descriptor_without_usable_urls() {
        let mut descriptor = test_registry().get(84532).unwrap().clone();
        descriptor.rpc_urls = vec!["not a url".to_string()];
        assert!(matches!(
            ChainProvider::new(descriptor),
            Err(RpcError::Connection { chain_id: 84532, .. })
        ));
    }

    #[test]
    fn test_rotation_wraps_around() {
        let mut descriptor = test_registry().get(421614).unwrap().clone();
        descriptor.rpc_urls = vec![
            "https://one.example".to_string(),
            "https://two.example".to_string(),
        ];
        let provider = ChainProvider::new(descriptor).unwrap();

        assert_eq!(provider.endpoint().0, 0);
        provider.rotate_from(0);
        assert_eq!(provider.endpoint().0, 1);
        // A stale failure report does not move the active endpoint again
        provider.rotate_from(0);
        assert_eq!(provider.endpoint().0, 1);
        provider.rotate_from(1);
        assert_eq!(provider.endpoint().0, 0);
    }
}
