//! Project configuration.
//!
//! Loaded once from a JSON file at the project root; environment variables of
//! the form `PROXYDIFF_*` override individual fields, which keeps CI setups
//! from having to rewrite the file.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for one proxy-upgrade testing project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxydiffConfig {
    /// Directory for run reports.
    #[serde(rename = "reportsDir", default = "default_reports_dir")]
    pub reports_dir: String,
    /// JSON file holding the recorded transaction sample.
    #[serde(rename = "transactionsPath", default = "default_transactions_path")]
    pub transactions_path: String,
    /// Root of the sources fetched for the deployed (pre-upgrade) contracts.
    #[serde(rename = "DeployedSourcesDir", default = "default_deployed_sources")]
    pub deployed_sources_dir: String,
    /// Root of the upgraded (candidate) contract sources.
    #[serde(rename = "UpgradedSourcesDir", default = "default_upgraded_sources")]
    pub upgraded_sources_dir: String,
    /// Path to the proxy contract source.
    #[serde(rename = "ProxyPath", default)]
    pub proxy_path: String,
    /// Path to the upgraded logic contract source.
    #[serde(rename = "UpgradedLogicPath", default)]
    pub upgraded_logic_path: String,
    /// On-chain address of the proxy.
    #[serde(rename = "DeployedProxyAddr", default)]
    pub deployed_proxy_addr: String,
    /// On-chain address of the currently deployed logic contract.
    #[serde(rename = "DeployedLogicAddr", default)]
    pub deployed_logic_addr: String,
    /// State variables skipped during layout resolution (reserved gaps).
    #[serde(rename = "stateVarsBlacklist", default = "default_blacklist")]
    pub state_vars_blacklist: Vec<String>,
    /// Directory holding mutated source files (`Contract-<id>.sol`).
    #[serde(rename = "mutantsDir", default = "default_mutants_dir")]
    pub mutants_dir: String,
    /// Mutation metadata produced by the mutation tool.
    #[serde(rename = "mutationsPath", default = "default_mutations_path")]
    pub mutations_path: String,
    /// Whether storage-only divergence fails a replay session. Off by
    /// default: sessions pass on outcome equality alone, while mutant
    /// classification still treats storage divergence as a kill.
    #[serde(rename = "failOnStorageDivergence", default)]
    pub fail_on_storage_divergence: bool,
    /// Balance granted to the impersonated sender, 0x-hex wei.
    #[serde(rename = "senderFundingWei", default = "default_funding")]
    pub sender_funding_wei: String,
    /// Gas limit for replayed calls.
    #[serde(rename = "gasLimit", default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_reports_dir() -> String {
    "./proxydiff".to_string()
}
fn default_transactions_path() -> String {
    "./proxydiff/transactions/transactions.json".to_string()
}
fn default_deployed_sources() -> String {
    "./contracts/deployed".to_string()
}
fn default_upgraded_sources() -> String {
    "./contracts".to_string()
}
fn default_blacklist() -> Vec<String> {
    vec!["__gap".to_string(), "_gap".to_string()]
}
fn default_mutants_dir() -> String {
    "./mutants".to_string()
}
fn default_mutations_path() -> String {
    "./mutants/mutations.json".to_string()
}
fn default_funding() -> String {
    "0x10000000000000000000".to_string()
}
fn default_gas_limit() -> u64 {
    2_100_000
}

impl Default for ProxydiffConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl ProxydiffConfig {
    /// Load the configuration file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<ProxydiffConfig> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read config {}", path.display()))?;
        let mut config: ProxydiffConfig = serde_json::from_str(&raw)
            .with_context(|| format!("malformed config {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override individual fields from `PROXYDIFF_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.deployed_proxy_addr =
            env_var_or("PROXYDIFF_PROXY_ADDR", &self.deployed_proxy_addr);
        self.deployed_logic_addr =
            env_var_or("PROXYDIFF_LOGIC_ADDR", &self.deployed_logic_addr);
        self.transactions_path =
            env_var_or("PROXYDIFF_TRANSACTIONS", &self.transactions_path);
        self.mutants_dir = env_var_or("PROXYDIFF_MUTANTS_DIR", &self.mutants_dir);
    }

    /// Check that every field a replay needs is present.
    ///
    /// Mirrors the setup-time completeness check: a partially filled
    /// configuration aborts before any chain state is touched.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("ProxyPath", &self.proxy_path),
            ("UpgradedLogicPath", &self.upgraded_logic_path),
            ("DeployedProxyAddr", &self.deployed_proxy_addr),
            ("DeployedLogicAddr", &self.deployed_logic_addr),
            ("DeployedSourcesDir", &self.deployed_sources_dir),
            ("UpgradedSourcesDir", &self.upgraded_sources_dir),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                bail!("configuration incomplete: {field} is empty");
            }
        }
        Ok(())
    }

    /// Whether a variable name is blacklisted from resolution.
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.state_vars_blacklist.iter().any(|b| b == name)
    }
}

/// Read an environment variable, falling back to the given default.
pub fn env_var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
