//! Strategy modules - what a destination smart account can be configured to do
//!
//! This module provides:
//! - The closed set of module kinds the coordinator understands
//! - The required-state contract the coordinator resolves per chain
//! - An encoder registry keyed by module kind
//! - The resolver that fetches required state for a destination chain

pub mod registry;
pub mod resolver;

pub use registry::{DepositStrategyKind, EncodeContext, ModuleRegistry, ModuleSpec};
pub use resolver::ModuleResolver;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Strategy module a deposit ends up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleKind {
    /// Supply into an Aave lending pool
    #[serde(alias = "YIELD_AAVE")]
    Autoearn,
    Autoswap,
    VerifiableAgent,
    /// Lock tokens in a bond; funds are committed on-chain up front
    Bond,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Autoearn,
        ModuleKind::Autoswap,
        ModuleKind::VerifiableAgent,
        ModuleKind::Bond,
    ];

    /// Wire name used by the coordinator
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Autoearn => "AUTOEARN",
            ModuleKind::Autoswap => "AUTOSWAP",
            ModuleKind::VerifiableAgent => "VERIFIABLE_AGENT",
            ModuleKind::Bond => "BOND",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "AUTOEARN" | "YIELD_AAVE" => Ok(ModuleKind::Autoearn),
            "AUTOSWAP" => Ok(ModuleKind::Autoswap),
            "VERIFIABLE_AGENT" => Ok(ModuleKind::VerifiableAgent),
            "BOND" => Ok(ModuleKind::Bond),
            other => Err(format!("unknown module kind: {}", other)),
        }
    }
}

/// The user's current module pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSelection {
    pub module_kind: ModuleKind,
    pub destination_chain_id: u64,
}

/// One configuration input a module expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    /// Solidity type, e.g. `address` or `uint256`
    #[serde(rename = "type")]
    pub field_type: String,
}

impl ConfigField {
    pub fn new(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
        }
    }
}

/// On-chain configuration a module needs on a given chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredState {
    #[serde(with = "chain_id_string")]
    pub chain_id: u64,
    #[serde(rename = "moduleName")]
    pub module_kind: ModuleKind,
    pub module_address: Address,
    pub config_input_type: String,
    #[serde(default)]
    pub required_fields: Vec<ConfigField>,
    #[serde(default)]
    pub config_template: BTreeMap<String, Option<serde_json::Value>>,
}

/// Chain ids travel as decimal strings on the coordinator wire but some
/// responses carry plain numbers
pub(crate) mod chain_id_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) => s.trim().parse().map_err(de::Error::custom),
        }
    }
}
