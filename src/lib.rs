//! # Hedge Keeper
//!
//! Cross-chain hedge rebalancing driven by an external keeper.
//!
//! ## Architecture
//!
//! - `chain`: Chain registry plus the price feed and bridge capabilities
//! - `ledger`: Authoritative hedge position book
//! - `policy`: Per-owner automation policies
//! - `automation`: Check/perform decision engine and rebalance executor
//! - `events`: Domain events for observability collaborators
//! - `persistence`: SQLite state and pending-transfer table
//! - `config`: Configuration management and validation
//! - `utils`: Shared decimal arithmetic

pub mod automation;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod persistence;
pub mod policy;
pub mod utils;

pub use config::Config;
