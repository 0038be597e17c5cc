//! Remediation intents passed from the check phase to the perform phase.

use crate::chain::{ChainId, TransferId};
use crate::ledger::PositionId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the check phase wants done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IntentKind {
    /// Price fell below the owner's minimum: open a hedge on this chain
    OpenPosition { chain_id: ChainId },
    /// Price rose above the owner's maximum: close the hedge on this chain
    ClosePosition { chain_id: ChainId },
    /// Move exposure from the higher-priced chain to the lower-priced one
    RebalanceAcrossChains {
        source_chain_id: ChainId,
        target_chain_id: ChainId,
        deviation_bps: Decimal,
    },
}

/// A proposed remediation for one owner.
///
/// Not persisted and never trusted at perform time; every field is
/// re-derived from current state before acting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationIntent {
    pub owner: String,
    pub kind: IntentKind,
    /// Price seen at check time (source chain price for rebalances)
    pub observed_price: Decimal,
}

impl fmt::Display for RemediationIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IntentKind::OpenPosition { chain_id } => {
                write!(f, "open {} on chain {} @ {}", self.owner, chain_id, self.observed_price)
            }
            IntentKind::ClosePosition { chain_id } => {
                write!(f, "close {} on chain {} @ {}", self.owner, chain_id, self.observed_price)
            }
            IntentKind::RebalanceAcrossChains {
                source_chain_id,
                target_chain_id,
                deviation_bps,
            } => write!(
                f,
                "rebalance {} chain {} -> {} ({:.1} bps)",
                self.owner, source_chain_id, target_chain_id, deviation_bps
            ),
        }
    }
}

/// Result of the read-only check phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkeepCheck {
    pub needs_action: bool,
    pub intents: Vec<RemediationIntent>,
}

impl UpkeepCheck {
    pub fn new(intents: Vec<RemediationIntent>) -> Self {
        Self {
            needs_action: !intents.is_empty(),
            intents,
        }
    }
}

/// What happened to one intent in the perform phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntentOutcome {
    Opened { position_id: PositionId },
    Closed { position_id: PositionId },
    TransferInitiated { transfer_id: TransferId },
    /// Re-validation no longer holds; expected under races
    Skipped { reason: String },
    /// The intent was aborted; other intents are unaffected
    Failed { error: String },
}

impl IntentOutcome {
    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        IntentOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_action(&self) -> bool {
        matches!(
            self,
            IntentOutcome::Opened { .. }
                | IntentOutcome::Closed { .. }
                | IntentOutcome::TransferInitiated { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentResult {
    pub intent: RemediationIntent,
    pub outcome: IntentOutcome,
}

/// Per-intent results of one perform call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformReport {
    pub results: Vec<IntentResult>,
}

impl PerformReport {
    pub fn acted(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_action()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, IntentOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, IntentOutcome::Failed { .. }))
            .count()
    }
}
