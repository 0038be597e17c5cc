//! Records of cross-chain transfers started by rebalances.

use crate::chain::{ChainId, TransferId};
use crate::ledger::PositionId;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    /// Delivery claimed; the target open may or may not have been recorded
    Confirming,
    Confirmed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Confirming => "confirming",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "confirming" => Ok(TransferStatus::Confirming),
            "confirmed" => Ok(TransferStatus::Confirmed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status: {other}")),
        }
    }
}

/// A row of the pending-transfer table.
///
/// Exposure sits in this record between the source close and the target
/// open; nothing bounds how long it stays `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub transfer_id: TransferId,
    pub owner: String,
    pub source_chain_id: ChainId,
    pub target_chain_id: ChainId,
    /// Position closed on the source chain when the transfer started
    pub source_position_id: PositionId,
    pub amount: Decimal,
    pub fee: Decimal,
    /// Fallback price for the target open if the feed is unreachable
    pub target_price_at_initiation: Decimal,
    pub status: TransferStatus,
    pub delivered_amount: Option<Decimal>,
    pub target_position_id: Option<PositionId>,
    pub failure_reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingTransfer {
    pub fn is_pending(&self) -> bool {
        self.status == TransferStatus::Pending
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_pending() && now - self.initiated_at > timeout
    }
}
