//! Chain module - supported chains and RPC access
//!
//! This module provides:
//! - The immutable registry of supported chains
//! - Multi-RPC provider management with automatic failover
//! - Receipt confirmation for on-chain deposits
//! - Concurrent token balance reads across chains

pub mod balances;
pub mod erc20;
pub mod finality;
pub mod provider;
pub mod registry;

pub use balances::{fetch_balances, ChainBalance};
pub use finality::{recommended_confirmations, ConfirmedReceipt, ReceiptWatcher};
pub use provider::{ChainProvider, GasPrice};
pub use registry::{ChainDescriptor, ChainRegistry};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors raised while talking to chain RPC endpoints
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Chain connection error for chain {chain_id}: {message}")]
    Connection { chain_id: u64, message: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("insufficient funds for gas on chain {chain_id}")]
    InsufficientFunds { chain_id: u64 },

    #[error("Transaction {tx_hash:?} reverted on chain {chain_id}")]
    Reverted { chain_id: u64, tx_hash: H256 },

    #[error("Timeout waiting for tx {tx_hash:?} on chain {chain_id} after {elapsed:?}")]
    Timeout {
        chain_id: u64,
        tx_hash: H256,
        elapsed: Duration,
    },
}

/// Read-side chain access the workflow needs
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Wait until `tx_hash` is mined, successful and deep enough, bounded by `timeout`
    async fn wait_for_receipt(
        &self,
        chain_id: u64,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<ConfirmedReceipt, RpcError>;

    /// Token balance of `owner` in base units
    async fn read_balance(&self, chain_id: u64, token: Address, owner: Address)
        -> Result<U256, RpcError>;
}

/// Providers for every supported chain, indexed by chain ID
pub struct ChainClients {
    providers: HashMap<u64, Arc<ChainProvider>>,
}

impl ChainClients {
    /// Create providers for all chains in the registry
    pub fn connect(registry: &ChainRegistry) -> Result<Self, RpcError> {
        let mut providers = HashMap::new();

        for descriptor in registry.iter() {
            let provider = ChainProvider::new(descriptor.clone())?;
            providers.insert(descriptor.chain_id, Arc::new(provider));
            info!(
                "Chain {} (ID: {}) provider ready",
                descriptor.display_name, descriptor.chain_id
            );
        }

        Ok(Self { providers })
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: u64) -> Result<Arc<ChainProvider>, RpcError> {
        self.providers
            .get(&chain_id)
            .cloned()
            .ok_or(RpcError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let checks = self.providers.iter().map(|(chain_id, provider)| async move {
            (*chain_id, provider.health_check().await)
        });
        futures::future::join_all(checks).await
    }
}

#[async_trait]
impl ChainRpc for ChainClients {
    async fn wait_for_receipt(
        &self,
        chain_id: u64,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<ConfirmedReceipt, RpcError> {
        let provider = self.get_provider(chain_id)?;
        let depth = provider.descriptor().confirmation_blocks;
        ReceiptWatcher::new(&provider, depth).wait(tx_hash, timeout).await
    }

    async fn read_balance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
    ) -> Result<U256, RpcError> {
        self.get_provider(chain_id)?
            .token_balance(token, owner)
            .await
    }
}
