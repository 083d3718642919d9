//! Gas pricing for deposit transfers

use crate::chain::{ChainProvider, GasPrice, RpcError};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

fn with_headroom(value: U256, percent: u64) -> U256 {
    value + value * percent / 100
}

impl GasPrice {
    /// Every fee component raised by `percent`
    pub fn padded(&self, percent: u64) -> GasPrice {
        match self {
            GasPrice::Legacy(price) => GasPrice::Legacy(with_headroom(*price, percent)),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: with_headroom(*max_fee_per_gas, percent),
                max_priority_fee_per_gas: with_headroom(*max_priority_fee_per_gas, percent),
            },
        }
    }

    /// Most a transaction with `gas_limit` can cost, in wei
    pub fn max_cost(&self, gas_limit: U256) -> U256 {
        let per_gas = match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
        };
        gas_limit * per_gas
    }
}

/// Headroom added on top of node quotes
#[derive(Debug, Clone, Copy)]
pub struct GasPolicy {
    pub limit_headroom_percent: u64,
    pub price_headroom_percent: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            limit_headroom_percent: 20,
            price_headroom_percent: 10,
        }
    }
}

impl GasPolicy {
    /// Current price for the provider's chain, padded
    pub async fn price(&self, provider: &ChainProvider) -> Result<GasPrice, RpcError> {
        let quoted = provider.get_gas_price().await?;
        let padded = quoted.padded(self.price_headroom_percent);
        debug!("Chain {} gas price {:?} -> {:?}", provider.chain_id(), quoted, padded);
        Ok(padded)
    }

    /// Node estimate for `tx`, padded
    pub async fn limit(
        &self,
        provider: &ChainProvider,
        tx: &TypedTransaction,
    ) -> Result<U256, RpcError> {
        let estimate = provider.estimate_gas(tx).await?;
        Ok(with_headroom(estimate, self.limit_headroom_percent))
    }
}
