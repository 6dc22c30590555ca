//! Configuration management for the atomic swap relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub timelock: TimelockConfig,
    #[serde(default)]
    pub partial_fill: PartialFillConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    /// Sweep interval for active swaps
    pub poll_interval_ms: u64,
    pub max_concurrent_txs: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub submission_timeout_ms: u64,
    /// A submission with no observed effect after this long may be resent
    pub resubmit_after_ms: u64,
    pub health_check_interval_secs: u64,
    /// Terminal swaps leave the in-memory registry after this long
    #[serde(default = "default_archive_after_secs")]
    pub archive_after_secs: u64,
}

fn default_archive_after_secs() -> u64 {
    3600
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            instance_id: "relayer-dev".to_string(),
            poll_interval_ms: 1000,
            max_concurrent_txs: 32,
            max_retries: 5,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            submission_timeout_ms: 10_000,
            resubmit_after_ms: 15_000,
            health_check_interval_secs: 30,
            archive_after_secs: default_archive_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelockConfig {
    /// Gap between destination and source expiry (Δ)
    pub safety_margin_secs: u64,
    /// Lower bound for Δ
    pub min_margin_secs: u64,
    /// Shortest destination window worth opening
    pub min_leg_duration_secs: u64,
    pub max_duration_secs: u64,
    /// Used when a request names no duration
    pub default_duration_secs: u64,
}

impl Default for TimelockConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: 1800,
            min_margin_secs: 600,
            min_leg_duration_secs: 900,
            max_duration_secs: 48 * 3600,
            default_duration_secs: 4 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialFillConfig {
    /// Minimum fill ratio for a partial execution, basis points
    pub min_fill_bps: u32,
    /// Queued intents are cancelled after this long
    pub queue_ttl_secs: u64,
}

impl Default for PartialFillConfig {
    fn default() -> Self {
        Self {
            min_fill_bps: 3000,
            queue_ttl_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
    #[serde(default = "default_advisor_timeout_ms")]
    pub advisor_timeout_ms: u64,
    /// Asset symbol to asset class
    #[serde(default)]
    pub asset_classes: HashMap<String, String>,
    /// Asset class to destination venue
    #[serde(default)]
    pub default_venues: HashMap<String, String>,
}

fn default_advisor_timeout_ms() -> u64 {
    2000
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            advisor_timeout_ms: default_advisor_timeout_ms(),
            asset_classes: HashMap::new(),
            default_venues: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,
    pub name: String,
    /// Account the relayer signs as on this chain
    pub coordinator_account: String,
    pub min_timelock_secs: u64,
    pub max_timelock_secs: u64,
    pub max_escrows_per_account: usize,
    #[serde(default)]
    pub genesis: Vec<GenesisBalance>,
    pub enabled: bool,
}

/// Initial balance on a local chain
#[derive(Debug, Clone, Deserialize)]
pub struct GenesisBalance {
    pub account: String,
    pub asset: String,
    /// Decimal string in the asset's smallest unit
    pub amount: String,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // A swap needs two ledgers
        if self.enabled_chains().len() < 2 {
            anyhow::bail!("At least two chains must be enabled");
        }

        if self.timelock.safety_margin_secs <= self.timelock.min_margin_secs {
            anyhow::bail!(
                "Timelock safety margin {}s must exceed the minimum {}s",
                self.timelock.safety_margin_secs,
                self.timelock.min_margin_secs
            );
        }

        if self.relayer.max_retries == 0 {
            anyhow::bail!("relayer.max_retries must be at least 1");
        }

        if self.partial_fill.min_fill_bps > 10_000 {
            anyhow::bail!(
                "partial_fill.min_fill_bps {} exceeds 10000",
                self.partial_fill.min_fill_bps
            );
        }

        if self.database.backend == StoreBackend::Postgres && self.database.url.is_empty() {
            anyhow::bail!("database.url is required for the postgres backend");
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.coordinator_account.is_empty() {
                tracing::warn!("Chain {} has no coordinator account - will skip", name);
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");

    re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
