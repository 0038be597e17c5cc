//! Domain events published for observability and alerting collaborators.
//!
//! Every event is:
//! - logged as a single-line JSON record under the `domain_event` target
//! - appended to the durable journal when one is attached
//! - broadcast to in-process subscribers

use crate::chain::{ChainId, TransferId};
use crate::persistence::PersistenceManager;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    PositionOpened {
        owner: String,
        chain_id: ChainId,
        position_id: usize,
        amount: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    PositionClosed {
        owner: String,
        chain_id: ChainId,
        position_id: usize,
        amount: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    CrossChainHedgeInitiated {
        owner: String,
        transfer_id: TransferId,
        source_chain_id: ChainId,
        target_chain_id: ChainId,
        amount: Decimal,
        fee: Decimal,
        timestamp: DateTime<Utc>,
    },
    RebalanceTriggered {
        owner: String,
        transfer_id: TransferId,
        source_chain: ChainId,
        target_chain: ChainId,
        delivered_amount: Decimal,
        timestamp: DateTime<Utc>,
    },
    RebalanceFailed {
        owner: String,
        /// None when the bridge never accepted the transfer
        transfer_id: Option<TransferId>,
        source_chain: ChainId,
        target_chain: ChainId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Event name as used in the journal.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::PositionOpened { .. } => "PositionOpened",
            DomainEvent::PositionClosed { .. } => "PositionClosed",
            DomainEvent::CrossChainHedgeInitiated { .. } => "CrossChainHedgeInitiated",
            DomainEvent::RebalanceTriggered { .. } => "RebalanceTriggered",
            DomainEvent::RebalanceFailed { .. } => "RebalanceFailed",
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            DomainEvent::PositionOpened { owner, .. }
            | DomainEvent::PositionClosed { owner, .. }
            | DomainEvent::CrossChainHedgeInitiated { owner, .. }
            | DomainEvent::RebalanceTriggered { owner, .. }
            | DomainEvent::RebalanceFailed { owner, .. } => owner,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::PositionOpened { timestamp, .. }
            | DomainEvent::PositionClosed { timestamp, .. }
            | DomainEvent::CrossChainHedgeInitiated { timestamp, .. }
            | DomainEvent::RebalanceTriggered { timestamp, .. }
            | DomainEvent::RebalanceFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Emit as structured log.
    fn log(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        match self {
            DomainEvent::RebalanceFailed { .. } => {
                warn!(target: "domain_event", "DOMAIN_EVENT: {}", json)
            }
            _ => info!(target: "domain_event", "DOMAIN_EVENT: {}", json),
        }
    }
}

/// Fan-out point for domain events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
    journal: Option<Arc<PersistenceManager>>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, journal: None }
    }

    /// Append every emitted event to the persistence journal.
    pub fn with_journal(mut self, journal: Arc<PersistenceManager>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Never fails: journal errors are logged, missing
    /// subscribers are fine.
    pub fn emit(&self, event: DomainEvent) {
        event.log();

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_event(&event) {
                warn!(kind = event.kind(), error = %e, "Failed to journal domain event");
            }
        }

        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
