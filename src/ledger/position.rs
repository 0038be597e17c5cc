use crate::chain::ChainId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Index of a position within its `(owner, chain)` slot list.
pub type PositionId = usize;

/// A recorded hedge commitment on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HedgePosition {
    pub owner: String,
    pub chain_id: ChainId,
    pub position_id: PositionId,
    /// Hedge-token quantity, truncated to the ledger's decimal count
    pub amount: Decimal,
    /// Reference price the position was opened at
    pub target_price: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl HedgePosition {
    /// Notional value at the opening price.
    pub fn notional(&self) -> Decimal {
        self.amount * self.target_price
    }

    /// How long the position has been (or was) open.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.closed_at.unwrap_or(now) - self.created_at
    }
}
