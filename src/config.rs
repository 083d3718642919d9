//! Configuration management for the depositor
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::module::ModuleKind;

/// Environment variable pointing at the configuration file
pub const CONFIG_ENV: &str = "DEPOSITOR_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub deposit: DepositConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub run: Option<RunConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_attempts: 60,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositConfig {
    /// Upper bound on waiting for an on-chain transfer to confirm
    pub receipt_timeout_secs: u64,
    /// How long a gasless authorization stays redeemable
    pub authorization_validity_secs: u64,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_secs: 300,
            authorization_validity_secs: 3_600,
        }
    }
}

impl DepositConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "DEPOSITOR_PRIVATE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub explorer_url: String,
    pub token_address: String,
    pub pool_address: Option<String>,
    /// EIP-712 domain name of the token contract
    #[serde(default = "default_token_name")]
    pub token_name: String,
    /// EIP-712 domain version of the token contract
    #[serde(default = "default_token_version")]
    pub token_version: String,
    pub confirmation_blocks: Option<u64>,
    #[serde(default)]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    #[default]
    Eip1559,
    Arbitrum,
    Optimism,
}

/// Parameters of a single run driven from the command line
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub module: ModuleKind,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub amount: String,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_token_name() -> String {
    "USDC".to_string()
}

fn default_token_version() -> String {
    "2".to_string()
}

fn default_max_gas_price_gwei() -> u64 {
    50
}

fn default_enabled() -> bool {
    true
}

impl Settings {
    /// Load settings from the file named by `DEPOSITOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        if self.coordinator.base_url.is_empty() {
            anyhow::bail!("Coordinator base_url is required");
        }

        if self.coordinator.api_key.is_empty() {
            tracing::warn!("Coordinator api_key is empty - requests will likely be rejected");
        }

        if self.polling.max_attempts == 0 {
            anyhow::bail!("polling.max_attempts must be at least 1");
        }

        let mut seen = std::collections::HashSet::new();
        for (name, chain) in &self.chains {
            if !chain.enabled {
                continue;
            }
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.token_address.is_empty() {
                anyhow::bail!("Chain {} has no token address configured", name);
            }
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Chain id {} is configured more than once", chain.chain_id);
            }
            if chain.pool_address.is_none() {
                tracing::warn!("Chain {} has no pool address - AUTOEARN cannot target it", name);
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[coordinator]
base_url = "https://coordinator.example"
api_key = "${DEPOSITOR_TEST_API_KEY}"

[polling]
interval_ms = 250
max_attempts = 4

[chains.base_sepolia]
chain_id = 84532
name = "Base Sepolia"
rpc_urls = ["https://sepolia.base.org"]
explorer_url = "https://sepolia.basescan.org"
token_address = "0x036CbD53842c5426634e7929541eC2318f3dCF7e"
pool_address = "0x07eA79F68B2B3df564D0A34F8e19D9B1e339814b"

[run]
module = "BOND"
source_chain_id = 84532
destination_chain_id = 84532
amount = "1.50"
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("DEPOSITOR_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${DEPOSITOR_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        env::set_var("DEPOSITOR_TEST_API_KEY", "secret-key");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.coordinator.api_key, "secret-key");
        assert_eq!(settings.coordinator.request_timeout_secs, 30);
        assert_eq!(settings.polling.max_attempts, 4);
        assert_eq!(settings.deposit.receipt_timeout_secs, 300);
        assert_eq!(settings.wallet.private_key_env, "DEPOSITOR_PRIVATE_KEY");

        let chain = settings.get_chain_by_id(84532).unwrap();
        assert_eq!(chain.token_name, "USDC");
        assert_eq!(chain.token_version, "2");
        assert_eq!(chain.gas_price_strategy, GasPriceStrategy::Eip1559);

        let run = settings.run.unwrap();
        assert_eq!(run.module, ModuleKind::Bond);
        assert_eq!(run.amount, "1.50");
    }

    #[test]
    fn test_rejects_duplicate_chain_ids() {
        let doubled = format!(
            "{}\n{}",
            SAMPLE,
            r#"
[chains.base_again]
chain_id = 84532
name = "Base again"
rpc_urls = ["https://sepolia.base.org"]
explorer_url = "https://sepolia.basescan.org"
token_address = "0x036CbD53842c5426634e7929541eC2318f3dCF7e"
"#
        );
        assert!(Settings::parse(&doubled).is_err());
    }

    #[test]
    fn test_rejects_zero_poll_attempts() {
        let broken = SAMPLE.replace("max_attempts = 4", "max_attempts = 0");
        assert!(Settings::parse(&broken).is_err());
    }
}
