//! Wallet signer - the owner's key
//!
//! The workflow never touches key material directly. It asks a
//! `WalletSigner` to sign the orchestration request, EIP-3009
//! authorizations and deposit transfers. A human-backed signer may decline.

use super::gas::GasPolicy;
use crate::chain::{ChainClients, GasPrice, RpcError};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignerError {
    #[error("signature request rejected")]
    Rejected,

    #[error("signer failed: {0}")]
    Failed(String),
}

impl From<RpcError> for SignerError {
    fn from(err: RpcError) -> Self {
        SignerError::Failed(err.to_string())
    }
}

/// Signing capability of the deposit owner
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> Address;

    /// EIP-191 personal message signature
    async fn sign_message(&self, message: Vec<u8>) -> Result<Signature, SignerError>;

    /// Signature over a precomputed EIP-712 digest
    async fn sign_authorization(&self, digest: H256) -> Result<Signature, SignerError>;

    /// Sign and broadcast a call, returning its hash
    async fn send_transaction(
        &self,
        chain_id: u64,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<H256, SignerError>;
}

/// Signer backed by a private key held in the process
pub struct LocalWalletSigner {
    wallet: LocalWallet,
    chains: Arc<ChainClients>,
    gas: GasPolicy,
}

impl LocalWalletSigner {
    /// Load the key from the named environment variable
    pub fn from_env(var: &str, chains: Arc<ChainClients>) -> Result<Self, SignerError> {
        let key = std::env::var(var).map_err(|_| {
            SignerError::Failed(format!("No wallet configured. Set {}", var))
        })?;
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| SignerError::Failed(format!("Invalid private key: {}", e)))?;

        info!("Wallet signer initialized: {:?}", wallet.address());

        Ok(Self::new(wallet, chains))
    }

    pub fn new(wallet: LocalWallet, chains: Arc<ChainClients>) -> Self {
        Self {
            wallet,
            chains,
            gas: GasPolicy::default(),
        }
    }

    fn build_tx(
        &self,
        chain_id: u64,
        to: Address,
        data: Bytes,
        value: U256,
        nonce: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        match gas_price {
            GasPrice::Legacy(price) => {
                let tx = TransactionRequest::new()
                    .from(self.address())
                    .to(to)
                    .data(data)
                    .value(value)
                    .nonce(nonce)
                    .gas_price(*price)
                    .chain_id(chain_id);
                TypedTransaction::Legacy(tx)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let tx = Eip1559TransactionRequest::new()
                    .from(self.address())
                    .to(to)
                    .data(data)
                    .value(value)
                    .nonce(nonce)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .chain_id(chain_id);
                TypedTransaction::Eip1559(tx)
            }
        }
    }
}

#[async_trait]
impl WalletSigner for LocalWalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_message(&self, message: Vec<u8>) -> Result<Signature, SignerError> {
        self.wallet
            .sign_message(message)
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))
    }

    async fn sign_authorization(&self, digest: H256) -> Result<Signature, SignerError> {
        self.wallet
            .sign_hash(digest)
            .map_err(|e| SignerError::Failed(e.to_string()))
    }

    async fn send_transaction(
        &self,
        chain_id: u64,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<H256, SignerError> {
        let provider = self.chains.get_provider(chain_id)?;

        let nonce = provider.get_transaction_count(self.address()).await?;
        let gas_price = self.gas.price(&provider).await?;

        let mut tx = self.build_tx(chain_id, to, data, value, nonce, &gas_price);
        let gas_limit = self.gas.limit(&provider, &tx).await?;
        tx.set_gas(gas_limit);

        debug!(
            "Sending tx on chain {} (nonce {}, gas {}, max cost {} wei)",
            chain_id,
            nonce,
            gas_limit,
            gas_price.max_cost(gas_limit)
        );

        let wallet = self.wallet.clone().with_chain_id(chain_id);
        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))?;

        let tx_hash = provider.send_raw_transaction(tx.rlp_signed(&signature)).await?;
        info!("Transaction sent on chain {}: {:?}", chain_id, tx_hash);

        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainRegistry;
    use crate::test_utils::test_registry;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn signer() -> LocalWalletSigner {
        let registry: ChainRegistry = test_registry();
        let chains = Arc::new(ChainClients::connect(&registry).unwrap());
        LocalWalletSigner::new(KEY.parse().unwrap(), chains)
    }

    #[tokio::test]
    async fn test_message_signature_recovers_owner() {
        let signer = signer();
        let message = b"orchestration".to_vec();
        let signature = signer.sign_message(message.clone()).await.unwrap();
        assert_eq!(signature.recover(message).unwrap(), signer.address());
    }

    #[tokio::test]
    async fn test_digest_signature_recovers_owner() {
        let signer = signer();
        let digest = H256::repeat_byte(0x42);
        let signature = signer.sign_authorization(digest).await.unwrap();
        assert_eq!(signature.recover(digest).unwrap(), signer.address());
    }

    #[test]
    fn test_missing_key_env() {
        let registry = test_registry();
        let chains = Arc::new(ChainClients::connect(&registry).unwrap());
        let err = LocalWalletSigner::from_env("DEPOSITOR_TEST_UNSET_KEY", chains)
            .err()
            .unwrap();
        assert!(matches!(err, SignerError::Failed(_)));
    }
}
