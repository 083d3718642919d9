//! Encoder registry keyed by module kind
//!
//! Each module kind supplies its configuration schema, how its config is
//! ABI encoded for the destination account, and which deposit path it uses.

use super::{ConfigField, ModuleKind, RequiredState};
use crate::chain::ChainDescriptor;
use crate::error::{WorkflowError, WorkflowResult};
use crate::intent::TokenAmount;

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, I256, U256};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

/// How funds reach the orchestration account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositStrategyKind {
    /// Off-chain EIP-3009 authorization redeemed by the coordinator
    Gasless,
    /// ERC-20 transfer broadcast by the owner
    OnChain,
}

/// Inputs available to a module encoder
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub required_state: &'a RequiredState,
    pub destination: &'a ChainDescriptor,
    pub amount: TokenAmount,
}

/// Behaviour a strategy module plugs into the workflow
pub trait ModuleSpec: Send + Sync {
    fn kind(&self) -> ModuleKind;

    /// Fixed configuration schema, `None` when the coordinator's fields drive encoding
    fn field_schema(&self) -> Option<Vec<ConfigField>>;

    fn encode_config(&self, ctx: &EncodeContext<'_>) -> WorkflowResult<Bytes>;

    fn deposit_strategy(&self) -> DepositStrategyKind {
        DepositStrategyKind::Gasless
    }
}

fn encoding_error(module: ModuleKind, cause: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::OrchestrationCreationFailed {
        cause: format!("cannot encode {} config: {}", module, cause),
    }
}

/// Aave supply on the destination chain: `(uint256 chainId, address token, address pool)[]`
struct AutoEarnModule;

impl ModuleSpec for AutoEarnModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Autoearn
    }

    fn field_schema(&self) -> Option<Vec<ConfigField>> {
        Some(vec![
            ConfigField::new("chainId", "uint256"),
            ConfigField::new("token", "address"),
            ConfigField::new("pool", "address"),
        ])
    }

    fn encode_config(&self, ctx: &EncodeContext<'_>) -> WorkflowResult<Bytes> {
        encode_pool_config(self.kind(), ctx)
    }
}

/// One `(chainId, token, pool)` entry for the destination chain
fn encode_pool_config(kind: ModuleKind, ctx: &EncodeContext<'_>) -> WorkflowResult<Bytes> {
    let pool = ctx.destination.pool_address.ok_or_else(|| {
        encoding_error(
            kind,
            format!("chain {} has no pool address", ctx.destination.chain_id),
        )
    })?;

    let entry = Token::Tuple(vec![
        Token::Uint(U256::from(ctx.destination.chain_id)),
        Token::Address(ctx.destination.token_address),
        Token::Address(pool),
    ]);

    Ok(encode(&[Token::Array(vec![entry])]).into())
}

/// Bond the deposit: `(address[] tokenAddresses, uint256[] totalAmounts)`
struct BondModule;

impl ModuleSpec for BondModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Bond
    }

    fn field_schema(&self) -> Option<Vec<ConfigField>> {
        Some(vec![
            ConfigField::new("tokenAddresses", "address[]"),
            ConfigField::new("totalAmounts", "uint256[]"),
        ])
    }

    fn encode_config(&self, ctx: &EncodeContext<'_>) -> WorkflowResult<Bytes> {
        let config = Token::Tuple(vec![
            Token::Array(vec![Token::Address(ctx.destination.token_address)]),
            Token::Array(vec![Token::Uint(ctx.amount.to_u256())]),
        ]);

        Ok(encode(&[config]).into())
    }

    fn deposit_strategy(&self) -> DepositStrategyKind {
        DepositStrategyKind::OnChain
    }
}

/// Module whose config layout comes from the coordinator's required fields
struct TemplateModule {
    kind: ModuleKind,
}

impl TemplateModule {
    /// Value for a field: well-known context first, then the coordinator's template
    fn lookup(&self, name: &str, ctx: &EncodeContext<'_>) -> Option<Value> {
        let known = match name {
            "chainId" => Some(Value::String(ctx.destination.chain_id.to_string())),
            "token" | "tokenAddress" => {
                Some(Value::String(format!("{:?}", ctx.destination.token_address)))
            }
            "pool" | "poolAddress" => ctx
                .destination
                .pool_address
                .map(|pool| Value::String(format!("{:?}", pool))),
            "amount" => Some(Value::String(ctx.amount.units().to_string())),
            _ => None,
        };

        known.or_else(|| {
            ctx.required_state
                .config_template
                .get(name)
                .cloned()
                .flatten()
                .filter(|v| !v.is_null())
        })
    }
}

impl ModuleSpec for TemplateModule {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn field_schema(&self) -> Option<Vec<ConfigField>> {
        None
    }

    fn encode_config(&self, ctx: &EncodeContext<'_>) -> WorkflowResult<Bytes> {
        let fields = &ctx.required_state.required_fields;
        if fields.is_empty() {
            debug!("{} declares no fields, using the pool layout", self.kind);
            return encode_pool_config(self.kind, ctx);
        }

        let tokens = fields
            .iter()
            .map(|field| {
                let value = self.lookup(&field.name, ctx).ok_or_else(|| {
                    encoding_error(self.kind, format!("no value for field {}", field.name))
                })?;
                to_token(&field.field_type, &value).map_err(|e| {
                    encoding_error(self.kind, format!("field {}: {}", field.name, e))
                })
            })
            .collect::<WorkflowResult<Vec<_>>>()?;

        Ok(encode(&[Token::Tuple(tokens)]).into())
    }
}

/// Convert a JSON value to an ABI token of the given Solidity type
fn to_token(solidity_type: &str, value: &Value) -> Result<Token, String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => return Err(format!("unsupported value {}", other)),
    };

    match solidity_type {
        "address" => Address::from_str(&text)
            .map(Token::Address)
            .map_err(|e| e.to_string()),
        "bool" => text
            .parse::<bool>()
            .map(Token::Bool)
            .map_err(|e| e.to_string()),
        "string" => Ok(Token::String(text)),
        "bytes32" => {
            let raw = decode_hex(&text)?;
            if raw.len() != 32 {
                return Err(format!("expected 32 bytes, got {}", raw.len()));
            }
            Ok(Token::FixedBytes(raw))
        }
        "bytes" => decode_hex(&text).map(Token::Bytes),
        t if t.starts_with("uint") => parse_uint(&text).map(Token::Uint),
        t if t.starts_with("int") => I256::from_dec_str(&text)
            .map(|v| Token::Int(v.into_raw()))
            .map_err(|e| e.to_string()),
        other => Err(format!("unsupported type {}", other)),
    }
}

fn parse_uint(text: &str) -> Result<U256, String> {
    match text.strip_prefix("0x") {
        Some(hex_digits) => U256::from_str_radix(hex_digits, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(text).map_err(|e| e.to_string()),
    }
}

fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    hex::decode(text.trim_start_matches("0x")).map_err(|e| e.to_string())
}

/// All module kinds and their encoders
pub struct ModuleRegistry {
    modules: HashMap<ModuleKind, Box<dyn ModuleSpec>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        let specs: Vec<Box<dyn ModuleSpec>> = vec![
            Box::new(AutoEarnModule),
            Box::new(BondModule),
            Box::new(TemplateModule {
                kind: ModuleKind::Autoswap,
            }),
            Box::new(TemplateModule {
                kind: ModuleKind::VerifiableAgent,
            }),
        ];

        Self {
            modules: specs.into_iter().map(|spec| (spec.kind(), spec)).collect(),
        }
    }

    pub fn get(&self, kind: ModuleKind) -> WorkflowResult<&dyn ModuleSpec> {
        self.modules
            .get(&kind)
            .map(|spec| spec.as_ref())
            .ok_or_else(|| WorkflowError::Internal(format!("no encoder for module {}", kind)))
    }

    /// Encode the module config described by `ctx`
    pub fn encode(&self, ctx: &EncodeContext<'_>) -> WorkflowResult<Bytes> {
        self.get(ctx.required_state.module_kind)?.encode_config(ctx)
    }

    pub fn deposit_strategy(&self, kind: ModuleKind) -> WorkflowResult<DepositStrategyKind> {
        Ok(self.get(kind)?.deposit_strategy())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
