//! Chain identifiers, configs and capability value types.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric chain identifier (EVM-style chain id or bridge chain selector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier a bridge adapter hands out for an initiated transfer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub String);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Registry entry for a single chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    /// Human readable name, display only
    pub name: String,
    /// Identifier of the price feed instance serving this chain
    pub price_feed_ref: String,
    /// Identifier of the bridge adapter instance serving this chain
    pub bridge_adapter_ref: String,
    pub is_active: bool,
}

/// A single price observation from a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReading {
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
}

impl PriceReading {
    pub fn new(price: Decimal, as_of: DateTime<Utc>) -> Self {
        Self { price, as_of }
    }

    /// Returns true if the reading is older than `max_age` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.as_of > max_age
    }
}

/// Delivery state of a cross-chain transfer as reported by a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Confirmed { delivered_amount: Decimal },
    Failed { reason: String },
}
