//! Token balances across all supported chains
//!
//! Balance reads are independent of any run and are issued concurrently.

use super::{ChainRegistry, ChainRpc};
use crate::intent::TokenAmount;

use ethers::types::Address;
use futures::future::join_all;
use tracing::warn;

/// Balance of the deposit token on one chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainBalance {
    pub chain_id: u64,
    pub display_name: String,
    /// `None` when the chain could not be read
    pub amount: Option<TokenAmount>,
}

/// Read the owner's token balance on every registered chain at once
pub async fn fetch_balances(
    rpc: &dyn ChainRpc,
    registry: &ChainRegistry,
    owner: Address,
) -> Vec<ChainBalance> {
    let reads = registry.iter().map(|chain| async move {
        let amount = match rpc.read_balance(chain.chain_id, chain.token_address, owner).await {
            Ok(units) => TokenAmount::from_u256(units).ok(),
            Err(e) => {
                warn!("Failed to read balance on chain {}: {}", chain.chain_id, e);
                None
            }
        };

        ChainBalance {
            chain_id: chain.chain_id,
            display_name: chain.display_name.clone(),
            amount,
        }
    });

    join_all(reads).await
}
