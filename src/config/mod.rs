//! Configuration management for the hedge keeper.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Decision engine parameters
    #[serde(default)]
    pub engine: EngineConfig,
    /// SQLite persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Chains to register at startup
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Asset symbol whose price is compared across chains
    #[serde(default = "default_asset")]
    pub asset: String,
    /// Maximum age of a price reading still considered fresh
    #[serde(default = "default_staleness_bound")]
    pub staleness_bound_secs: u64,
    /// Decimal places kept on position amounts (truncated)
    #[serde(default = "default_amount_decimals")]
    pub amount_decimals: u32,
    /// Pending transfers older than this are failed by the sweep
    #[serde(default = "default_bridge_timeout")]
    pub bridge_timeout_secs: u64,
    /// Keeper loop cadence in paper mode
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Per-subscriber domain event buffer
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

/// A chain to register, with the paper capabilities that serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_capability_ref")]
    pub price_feed_ref: String,
    #[serde(default = "default_capability_ref")]
    pub bridge_adapter_ref: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Starting price for the paper feed
    pub paper_price: Decimal,
    /// Flat fee charged by the paper bridge
    #[serde(default)]
    pub paper_bridge_fee: Decimal,
    /// Paper bridge delivers transfers after this many seconds
    #[serde(default = "default_paper_confirm_after")]
    pub paper_confirm_after_secs: u64,
}

// Default value functions
fn default_asset() -> String {
    "ETH".to_string()
}

fn default_staleness_bound() -> u64 {
    300 // 5 minutes
}

fn default_amount_decimals() -> u32 {
    8
}

fn default_bridge_timeout() -> u64 {
    3600 // 1 hour
}

fn default_check_interval() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    1024
}

fn default_db_path() -> String {
    "data/hedge_keeper.db".to_string()
}

fn default_capability_ref() -> String {
    "paper".to_string()
}

fn default_true() -> bool {
    true
}

fn default_paper_confirm_after() -> u64 {
    30
}

fn default_chains() -> Vec<ChainSettings> {
    vec![
        ChainSettings {
            chain_id: 1,
            name: "ethereum".to_string(),
            price_feed_ref: default_capability_ref(),
            bridge_adapter_ref: default_capability_ref(),
            is_active: true,
            paper_price: Decimal::new(2000, 0),
            paper_bridge_fee: Decimal::new(1, 3), // 0.001
            paper_confirm_after_secs: default_paper_confirm_after(),
        },
        ChainSettings {
            chain_id: 42161,
            name: "arbitrum".to_string(),
            price_feed_ref: default_capability_ref(),
            bridge_adapter_ref: default_capability_ref(),
            is_active: true,
            paper_price: Decimal::new(2000, 0),
            paper_bridge_fee: Decimal::new(1, 3),
            paper_confirm_after_secs: default_paper_confirm_after(),
        },
    ]
}

impl EngineConfig {
    pub fn staleness_bound(&self) -> Duration {
        Duration::seconds(self.staleness_bound_secs as i64)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::seconds(self.bridge_timeout_secs as i64)
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("HEDGE"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.engine.asset.is_empty(), "asset must not be empty");

        anyhow::ensure!(
            self.engine.staleness_bound_secs > 0,
            "staleness_bound_secs must be greater than 0"
        );

        anyhow::ensure!(
            self.engine.bridge_timeout_secs > 0,
            "bridge_timeout_secs must be greater than 0"
        );

        anyhow::ensure!(
            self.engine.amount_decimals <= 18,
            "amount_decimals must be at most 18"
        );

        anyhow::ensure!(self.engine.event_buffer > 0, "event_buffer must be positive");

        let mut seen = HashSet::new();
        for chain in &self.chains {
            anyhow::ensure!(
                seen.insert(chain.chain_id),
                "chain {} is configured more than once",
                chain.chain_id
            );
            anyhow::ensure!(
                chain.paper_price > Decimal::ZERO,
                "chain {} paper_price must be positive",
                chain.chain_id
            );
            anyhow::ensure!(
                chain.paper_bridge_fee >= Decimal::ZERO,
                "chain {} paper_bridge_fee must not be negative",
                chain.chain_id
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            persistence: PersistenceConfig::default(),
            chains: default_chains(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            asset: default_asset(),
            staleness_bound_secs: default_staleness_bound(),
            amount_decimals: default_amount_decimals(),
            bridge_timeout_secs: default_bridge_timeout(),
            check_interval_secs: default_check_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
