//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section and key has a default, so a partial file (or none at all) still
//! yields a runnable configuration. Secrets (the results-feed key) are
//! referenced by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::scheduler::SchedulerConfig;
use crate::engine::EngineConfig;
use crate::oracle::{HttpOracle, OutcomeOracle, ResultBoard, SimulatedOracle};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub scheduler: SchedulerSection,
    pub oracle: OracleConfig,
    pub listing: ListingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    pub database_url: String,
    /// Registration bonus for new accounts.
    pub opening_balance: Decimal,
    pub lock_timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://bankroll.db".into(),
            opening_balance: dec!(1000.00),
            lock_timeout_ms: 5_000,
            max_connections: 5,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub tick_timeout_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            tick_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    #[default]
    Simulated,
    Board,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OracleConfig {
    pub provider: OracleProvider,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: OracleProvider::Simulated,
            base_url: None,
            api_key_env: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ListingConfig {
    pub default_limit: u32,
    pub max_limit: u32,
    pub entries_default_limit: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            entries_default_limit: 20,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Like [`AppConfig::load`], but a missing file yields defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.ledger.opening_balance >= Decimal::ZERO,
            "ledger.opening_balance must not be negative"
        );
        anyhow::ensure!(self.scheduler.interval_secs > 0, "scheduler.interval_secs must be > 0");
        anyhow::ensure!(self.listing.max_limit > 0, "listing.max_limit must be > 0");
        anyhow::ensure!(
            self.listing.default_limit <= self.listing.max_limit
                && self.listing.entries_default_limit <= self.listing.max_limit,
            "listing defaults must not exceed listing.max_limit"
        );
        if self.oracle.provider == OracleProvider::Http {
            anyhow::ensure!(
                self.oracle.base_url.is_some(),
                "oracle.base_url is required for the http provider"
            );
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            opening_balance: self.ledger.opening_balance,
            default_limit: self.listing.default_limit,
            max_limit: self.listing.max_limit,
            entries_default_limit: self.listing.entries_default_limit,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.scheduler.interval_secs),
            tick_timeout: Duration::from_secs(self.scheduler.tick_timeout_secs),
        }
    }

    /// Build the configured outcome oracle.
    pub fn build_oracle(&self) -> Result<Arc<dyn OutcomeOracle>> {
        let oracle: Arc<dyn OutcomeOracle> = match self.oracle.provider {
            OracleProvider::Simulated => Arc::new(SimulatedOracle::new()),
            OracleProvider::Board => {
                warn!("Board oracle has no results until they are declared");
                Arc::new(ResultBoard::new())
            }
            OracleProvider::Http => {
                let base_url = self
                    .oracle
                    .base_url
                    .as_deref()
                    .context("oracle.base_url is required for the http provider")?;
                let api_key = match self.oracle.api_key_env.as_deref() {
                    Some(env) => match Self::resolve_env(env) {
                        Ok(key) => Some(key),
                        Err(e) => {
                            warn!(error = %e, "Results feed key missing, calling without auth");
                            None
                        }
                    },
                    None => None,
                };
                let http = HttpOracle::new(
                    base_url,
                    api_key,
                    Duration::from_secs(self.oracle.timeout_secs),
                )?;
                Arc::new(http)
            }
        };
        info!(oracle = oracle.name(), "Outcome oracle configured");
        Ok(oracle)
    }
}
