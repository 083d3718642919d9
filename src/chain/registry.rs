//! Immutable lookup of supported chains

use crate::config::{GasPriceStrategy, Settings};
use crate::error::{WorkflowError, WorkflowResult};

use ethers::types::Address;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info};

use super::finality::recommended_confirmations;

/// Static description of one supported chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainDescriptor {
    pub chain_id: u64,
    pub display_name: String,
    pub token_address: Address,
    pub pool_address: Option<Address>,
    pub rpc_urls: Vec<String>,
    pub explorer_url: String,
    pub token_name: String,
    pub token_version: String,
    pub confirmation_blocks: u64,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
}

impl ChainDescriptor {
    /// Explorer link for an address on this chain
    pub fn address_url(&self, address: Address) -> String {
        format!("{}/address/{:?}", self.explorer_url.trim_end_matches('/'), address)
    }

    /// Explorer link for a transaction on this chain
    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx_hash)
    }
}

/// Read-only set of chain descriptors, loaded once and shared by reference
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, ChainDescriptor>,
}

impl ChainRegistry {
    /// Build the registry from all enabled chains in the settings
    pub fn from_settings(settings: &Settings) -> WorkflowResult<Self> {
        let mut chains = BTreeMap::new();

        for (name, chain) in settings.enabled_chains() {
            let token_address = parse_address(&chain.token_address, name, "token_address")?;
            let pool_address = chain
                .pool_address
                .as_deref()
                .map(|p| parse_address(p, name, "pool_address"))
                .transpose()?;

            let descriptor = ChainDescriptor {
                chain_id: chain.chain_id,
                display_name: chain.name.clone(),
                token_address,
                pool_address,
                rpc_urls: chain.rpc_urls.clone(),
                explorer_url: chain.explorer_url.clone(),
                token_name: chain.token_name.clone(),
                token_version: chain.token_version.clone(),
                confirmation_blocks: chain
                    .confirmation_blocks
                    .unwrap_or_else(|| recommended_confirmations(chain.chain_id)),
                gas_price_strategy: chain.gas_price_strategy,
                max_gas_price_gwei: chain.max_gas_price_gwei,
            };

            debug!(
                "Registered chain {} (ID: {})",
                descriptor.display_name, descriptor.chain_id
            );
            chains.insert(chain.chain_id, descriptor);
        }

        info!("Chain registry loaded with {} chains", chains.len());
        Ok(Self { chains })
    }

    /// Build a registry from already-parsed descriptors
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ChainDescriptor>) -> Self {
        Self {
            chains: descriptors.into_iter().map(|d| (d.chain_id, d)).collect(),
        }
    }

    /// Get the descriptor for a chain
    pub fn get(&self, chain_id: u64) -> WorkflowResult<&ChainDescriptor> {
        self.chains
            .get(&chain_id)
            .ok_or(WorkflowError::ChainNotFound { chain_id })
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    /// All supported chain IDs, ascending
    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.keys().copied().collect()
    }

    /// Explorer link for an account on a supported chain
    pub fn explorer_address_url(&self, chain_id: u64, address: Address) -> WorkflowResult<String> {
        Ok(self.get(chain_id)?.address_url(address))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

fn parse_address(value: &str, chain: &str, field: &str) -> WorkflowResult<Address> {
    Address::from_str(value).map_err(|e| {
        WorkflowError::Config(format!("Chain {} has invalid {}: {}", chain, field, e))
    })
}
