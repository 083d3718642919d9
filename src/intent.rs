//! User intent: which chain and how much to move
//!
//! Token amounts are exact fixed-point values. Parsing never rounds: an
//! input with more fractional digits than the token carries is rejected.

use crate::chain::ChainRegistry;
use crate::error::{WorkflowError, WorkflowResult};

use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Decimals of the stable token moved by the workflow
pub const TOKEN_DECIMALS: u32 = 6;

/// Exact token amount in integer base units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount {
    units: u128,
}

impl TokenAmount {
    pub fn from_units(units: u128) -> Self {
        Self { units }
    }

    /// Parse a decimal string such as `"12.345"`
    pub fn parse(input: &str) -> WorkflowResult<Self> {
        let invalid = |reason: &str| WorkflowError::InvalidAmount {
            amount: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("amount is empty"));
        }

        let value = Decimal::from_str_exact(trimmed).map_err(|_| invalid("not a decimal number"))?;
        if value.is_sign_negative() || value.is_zero() {
            return Err(invalid("amount must be positive"));
        }

        // "1.500000000" has scale 9 but no precision loss; drop trailing zeros first
        let value = value.normalize();
        if value.scale() > TOKEN_DECIMALS {
            return Err(invalid("more than 6 fractional digits"));
        }

        let mantissa = u128::try_from(value.mantissa()).map_err(|_| invalid("amount too large"))?;
        let units = 10u128
            .checked_pow(TOKEN_DECIMALS - value.scale())
            .and_then(|factor| mantissa.checked_mul(factor))
            .ok_or_else(|| invalid("amount too large"))?;

        Ok(Self { units })
    }

    pub fn units(&self) -> u128 {
        self.units
    }

    pub fn to_u256(&self) -> U256 {
        U256::from(self.units)
    }

    pub fn from_u256(value: U256) -> WorkflowResult<Self> {
        if value > U256::from(u128::MAX) {
            return Err(WorkflowError::InvalidAmount {
                amount: value.to_string(),
                reason: "amount too large".to_string(),
            });
        }
        Ok(Self {
            units: value.as_u128(),
        })
    }

    pub fn is_zero(&self) -> bool {
        self.units == 0
    }
}

impl fmt::Display for TokenAmount {
    /// Always renders exactly six fractional digits
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = 10u128.pow(TOKEN_DECIMALS);
        write!(
            f,
            "{}.{:0width$}",
            self.units / scale,
            self.units % scale,
            width = TOKEN_DECIMALS as usize
        )
    }
}

impl FromStr for TokenAmount {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Normalized description of what the user holds and wants to move
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub source_chain_id: u64,
    pub source_token_address: Address,
    pub amount: TokenAmount,
    pub owner_address: Address,
}

/// Validates raw user input against the chain registry
pub struct IntentBuilder {
    registry: Arc<ChainRegistry>,
}

impl IntentBuilder {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry }
    }

    /// Build an intent; the token address comes from the source chain descriptor
    pub fn build(
        &self,
        source_chain_id: u64,
        amount: &str,
        owner_address: Address,
    ) -> WorkflowResult<Intent> {
        let chain = self.registry.get(source_chain_id)?;

        if owner_address.is_zero() {
            return Err(WorkflowError::Config(
                "Owner address must not be the zero address".to_string(),
            ));
        }

        let amount = TokenAmount::parse(amount)?;

        Ok(Intent {
            source_chain_id,
            source_token_address: chain.token_address,
            amount,
            owner_address,
        })
    }

    /// Build an intent and check it against the balance available on the source chain
    pub fn build_with_balance(
        &self,
        source_chain_id: u64,
        amount: &str,
        owner_address: Address,
        available: TokenAmount,
    ) -> WorkflowResult<Intent> {
        let intent = self.build(source_chain_id, amount, owner_address)?;
        if intent.amount > available {
            return Err(WorkflowError::InsufficientBalance {
                chain_id: source_chain_id,
                have: available.to_string(),
                need: intent.amount.to_string(),
            });
        }
        Ok(intent)
    }
}
