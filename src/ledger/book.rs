//! The position book: single owner of position mutation.

use super::position::{HedgePosition, PositionId};
use crate::chain::{ChainId, ChainRegistry};
use crate::error::{LedgerError, RegistryError};
use crate::events::{DomainEvent, EventBus};
use crate::persistence::PersistenceManager;
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

type SlotKey = (String, ChainId);

/// Authoritative record of every hedge position.
///
/// Positions live in append-only lists per `(owner, chain)`; closing flips
/// `is_active` and keeps the slot for the audit trail.
///
/// With a journal attached, every open and close is written to the store
/// before it becomes visible in memory.
pub struct HedgeLedger {
    registry: Arc<ChainRegistry>,
    events: EventBus,
    amount_decimals: u32,
    journal: Option<Arc<PersistenceManager>>,
    slots: RwLock<BTreeMap<SlotKey, Vec<HedgePosition>>>,
}

impl HedgeLedger {
    pub fn new(registry: Arc<ChainRegistry>, events: EventBus, amount_decimals: u32) -> Self {
        Self {
            registry,
            events,
            amount_decimals,
            journal: None,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Persist each position change to `store`.
    pub fn with_journal(mut self, store: Arc<PersistenceManager>) -> Self {
        self.journal = Some(store);
        self
    }

    fn persist(&self, position: &HedgePosition) -> Result<(), LedgerError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        journal.upsert_position(position).map_err(|e| {
            error!(
                owner = %position.owner,
                chain = %position.chain_id,
                position_id = position.position_id,
                error = %e,
                "Failed to persist position"
            );
            LedgerError::Store(e.to_string())
        })
    }

    /// Append a new active position and return its index.
    pub async fn open(
        &self,
        owner: &str,
        chain_id: ChainId,
        amount: Decimal,
        target_price: Decimal,
    ) -> Result<PositionId, LedgerError> {
        let amount = amount.round_dp_with_strategy(self.amount_decimals, RoundingStrategy::ToZero);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::ZeroAmount(amount));
        }
        if target_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice(target_price));
        }

        let config = self.registry.get(chain_id).await.map_err(|e| match e {
            RegistryError::NotFound(id) => LedgerError::UnknownChain(id),
            RegistryError::Inactive(id) | RegistryError::AlreadyRegistered(id) => {
                LedgerError::ChainInactive(id)
            }
        })?;
        if !config.is_active {
            return Err(LedgerError::ChainInactive(chain_id));
        }

        let position = {
            let mut slots = self.slots.write().await;
            let list = slots.entry((owner.to_string(), chain_id)).or_default();
            let position = HedgePosition {
                owner: owner.to_string(),
                chain_id,
                position_id: list.len(),
                amount,
                target_price,
                is_active: true,
                created_at: Utc::now(),
                closed_at: None,
            };
            self.persist(&position)?;
            list.push(position.clone());
            position
        };

        info!(
            %owner,
            chain = %chain_id,
            position_id = position.position_id,
            %amount,
            %target_price,
            "Hedge position opened"
        );

        self.events.emit(DomainEvent::PositionOpened {
            owner: position.owner,
            chain_id,
            position_id: position.position_id,
            amount,
            price: target_price,
            timestamp: position.created_at,
        });

        Ok(position.position_id)
    }

    /// Deactivate a position. Closing an already closed position is a no-op.
    ///
    /// Returns true if the position transitioned to inactive.
    pub async fn close(
        &self,
        owner: &str,
        chain_id: ChainId,
        position_id: PositionId,
    ) -> Result<bool, LedgerError> {
        self.close_at(owner, chain_id, position_id, None).await
    }

    /// Deactivate a position, recording the price it was closed at.
    pub async fn close_at(
        &self,
        owner: &str,
        chain_id: ChainId,
        position_id: PositionId,
        exit_price: Option<Decimal>,
    ) -> Result<bool, LedgerError> {
        let closed = {
            let mut slots = self.slots.write().await;
            let position = slots
                .get_mut(&(owner.to_string(), chain_id))
                .and_then(|list| list.get_mut(position_id))
                .ok_or_else(|| LedgerError::PositionNotFound {
                    owner: owner.to_string(),
                    chain_id,
                    position_id,
                })?;

            if !position.is_active {
                debug!(%owner, chain = %chain_id, position_id, "Position already closed");
                return Ok(false);
            }

            let mut closed = position.clone();
            closed.is_active = false;
            closed.closed_at = Some(Utc::now());
            self.persist(&closed)?;
            *position = closed.clone();
            closed
        };

        let price = exit_price.unwrap_or(closed.target_price);
        info!(
            %owner,
            chain = %chain_id,
            position_id,
            amount = %closed.amount,
            %price,
            "Hedge position closed"
        );

        self.events.emit(DomainEvent::PositionClosed {
            owner: closed.owner,
            chain_id,
            position_id,
            amount: closed.amount,
            price,
            timestamp: closed.closed_at.unwrap_or_else(Utc::now),
        });

        Ok(true)
    }

    /// Indices of the active positions for `(owner, chain)`, ascending.
    pub async fn list_active(&self, owner: &str, chain_id: ChainId) -> Vec<PositionId> {
        self.slots
            .read()
            .await
            .get(&(owner.to_string(), chain_id))
            .map(|list| {
                list.iter()
                    .filter(|p| p.is_active)
                    .map(|p| p.position_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The lowest-indexed active position for `(owner, chain)`.
    pub async fn first_active(&self, owner: &str, chain_id: ChainId) -> Option<HedgePosition> {
        self.slots
            .read()
            .await
            .get(&(owner.to_string(), chain_id))
            .and_then(|list| list.iter().find(|p| p.is_active).cloned())
    }

    pub async fn has_active(&self, owner: &str, chain_id: ChainId) -> bool {
        self.first_active(owner, chain_id).await.is_some()
    }

    pub async fn get(
        &self,
        owner: &str,
        chain_id: ChainId,
        position_id: PositionId,
    ) -> Option<HedgePosition> {
        self.slots
            .read()
            .await
            .get(&(owner.to_string(), chain_id))
            .and_then(|list| list.get(position_id).cloned())
    }

    /// Every position of an owner across chains, active and closed.
    pub async fn list_positions(&self, owner: &str) -> Vec<HedgePosition> {
        self.slots
            .read()
            .await
            .iter()
            .filter(|((slot_owner, _), _)| slot_owner == owner)
            .flat_map(|(_, list)| list.iter().cloned())
            .collect()
    }

    /// All positions, for persistence.
    pub async fn snapshot(&self) -> Vec<HedgePosition> {
        self.slots
            .read()
            .await
            .values()
            .flat_map(|list| list.iter().cloned())
            .collect()
    }

    /// Replace the book with persisted positions.
    ///
    /// Positions are re-slotted by `position_id`; no events are emitted.
    pub async fn restore(&self, mut positions: Vec<HedgePosition>) {
        positions.sort_by(|a, b| {
            (&a.owner, a.chain_id, a.position_id).cmp(&(&b.owner, b.chain_id, b.position_id))
        });

        let mut slots: BTreeMap<SlotKey, Vec<HedgePosition>> = BTreeMap::new();
        for mut position in positions {
            let list = slots
                .entry((position.owner.clone(), position.chain_id))
                .or_default();
            position.position_id = list.len();
            list.push(position);
        }

        let count: usize = slots.values().map(Vec::len).sum();
        *self.slots.write().await = slots;
        info!(positions = count, "Ledger restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainConfig, PaperBridge, PaperPriceFeed};
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    async fn setup_ledger() -> (HedgeLedger, EventBus) {
        let registry = Arc::new(ChainRegistry::new());
        let feed = Arc::new(PaperPriceFeed::new());
        let bridge = Arc::new(PaperBridge::new(dec!(0)));
        for (id, active) in [(1u64, true), (10, true), (56, false)] {
            registry
                .register(
                    ChainConfig {
                        chain_id: ChainId(id),
                        name: format!("chain-{id}"),
                        price_feed_ref: "paper".to_string(),
                        bridge_adapter_ref: "paper".to_string(),
                        is_active: active,
                    },
                    feed.clone(),
                    bridge.clone(),
                )
                .await
                .unwrap();
        }
        let events = EventBus::new(64);
        (HedgeLedger::new(registry, events.clone(), 8), events)
    }

    async fn setup_journaled_ledger() -> (HedgeLedger, Arc<PersistenceManager>) {
        let store = Arc::new(PersistenceManager::new(":memory:").unwrap());
        let (ledger, _events) = setup_ledger().await;
        (ledger.with_journal(store.clone()), store)
    }

    #[tokio::test]
    async fn test_open_appends_positions() {
        let (ledger, events) = setup_ledger().await;
        let mut rx = events.subscribe();

        let first = ledger.open("alice", ChainId(1), dec!(2), dec!(1850)).await.unwrap();
        let second = ledger.open("alice", ChainId(1), dec!(1), dec!(1840)).await.unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(ledger.list_active("alice", ChainId(1)).await, vec![0, 1]);
        assert!(ledger.list_active("alice", ChainId(10)).await.is_empty());
        assert!(ledger.list_active("bob", ChainId(1)).await.is_empty());

        match rx.try_recv().unwrap() {
            DomainEvent::PositionOpened { owner, chain_id, amount, price, .. } => {
                assert_eq!(owner, "alice");
                assert_eq!(chain_id, ChainId(1));
                assert_eq!(amount, dec!(2));
                assert_eq!(price, dec!(1850));
            }
            other => panic!("Expected PositionOpened, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_input() {
        let (ledger, _events) = setup_ledger().await;

        assert_eq!(
            ledger.open("alice", ChainId(1), dec!(0), dec!(2000)).await,
            Err(LedgerError::ZeroAmount(dec!(0)))
        );
        // Truncated below the decimal count
        assert!(matches!(
            ledger.open("alice", ChainId(1), dec!(0.000000001), dec!(2000)).await,
            Err(LedgerError::ZeroAmount(_))
        ));
        assert_eq!(
            ledger.open("alice", ChainId(1), dec!(1), dec!(0)).await,
            Err(LedgerError::InvalidPrice(dec!(0)))
        );
        assert_eq!(
            ledger.open("alice", ChainId(999), dec!(1), dec!(2000)).await,
            Err(LedgerError::UnknownChain(ChainId(999)))
        );
        assert_eq!(
            ledger.open("alice", ChainId(56), dec!(1), dec!(2000)).await,
            Err(LedgerError::ChainInactive(ChainId(56)))
        );
        assert!(ledger.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_amount_truncated_to_decimals() {
        let (ledger, _events) = setup_ledger().await;

        let id = ledger
            .open("alice", ChainId(1), dec!(1.123456789), dec!(2000))
            .await
            .unwrap();

        let position = ledger.get("alice", ChainId(1), id).await.unwrap();
        assert_eq!(position.amount, dec!(1.12345678));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (ledger, events) = setup_ledger().await;
        let id = ledger.open("alice", ChainId(1), dec!(1), dec!(2000)).await.unwrap();
        let mut rx = events.subscribe();

        assert_eq!(assert_ok!(ledger.close("alice", ChainId(1), id).await), true);
        let after_first = ledger.snapshot().await;

        assert_eq!(assert_ok!(ledger.close("alice", ChainId(1), id).await), false);
        assert_eq!(ledger.snapshot().await, after_first);

        // Only the first close emits
        assert!(matches!(rx.try_recv().unwrap(), DomainEvent::PositionClosed { .. }));
        assert!(rx.try_recv().is_err());

        // Slot is kept for the audit trail
        let position = ledger.get("alice", ChainId(1), id).await.unwrap();
        assert!(!position.is_active);
        assert!(position.closed_at.is_some());
        assert!(ledger.list_active("alice", ChainId(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_close_unknown_position() {
        let (ledger, _events) = setup_ledger().await;
        assert_err!(ledger.close("alice", ChainId(1), 0).await);
    }

    #[tokio::test]
    async fn test_first_active_skips_closed() {
        let (ledger, _events) = setup_ledger().await;
        ledger.open("alice", ChainId(1), dec!(1), dec!(2000)).await.unwrap();
        ledger.open("alice", ChainId(1), dec!(3), dec!(1990)).await.unwrap();
        ledger.close("alice", ChainId(1), 0).await.unwrap();

        let first = ledger.first_active("alice", ChainId(1)).await.unwrap();
        assert_eq!(first.position_id, 1);
        assert_eq!(first.amount, dec!(3));
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let (ledger, _events) = setup_ledger().await;
        ledger.open("alice", ChainId(1), dec!(1), dec!(2000)).await.unwrap();
        ledger.open("alice", ChainId(10), dec!(2), dec!(2010)).await.unwrap();
        ledger.open("bob", ChainId(1), dec!(3), dec!(2000)).await.unwrap();
        ledger.close("alice", ChainId(1), 0).await.unwrap();

        let snapshot = ledger.snapshot().await;
        let (restored, _events) = setup_ledger().await;
        restored.restore(snapshot.clone()).await;

        assert_eq!(restored.snapshot().await, snapshot);
        assert_eq!(restored.list_positions("alice").await.len(), 2);
        assert!(restored.has_active("alice", ChainId(10)).await);
        assert!(!restored.has_active("alice", ChainId(1)).await);
    }

    #[tokio::test]
    async fn test_journal_tracks_every_change() {
        let (ledger, store) = setup_journaled_ledger().await;
        ledger.open("alice", ChainId(1), dec!(1), dec!(2000)).await.unwrap();
        ledger.open("alice", ChainId(10), dec!(2), dec!(2010)).await.unwrap();
        ledger.close("alice", ChainId(1), 0).await.unwrap();

        let stored = store.load_positions().unwrap();
        assert_eq!(stored, ledger.snapshot().await);
        assert!(!stored[0].is_active);
        assert!(stored[1].is_active);
    }

    #[tokio::test]
    async fn test_unpersisted_change_is_not_applied() {
        let (ledger, store) = setup_journaled_ledger().await;
        let id = ledger.open("alice", ChainId(1), dec!(1), dec!(2000)).await.unwrap();

        store
            .execute_batch(
                "CREATE TRIGGER reject_update BEFORE UPDATE ON positions
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;
                 CREATE TRIGGER reject_insert BEFORE INSERT ON positions
                 WHEN NEW.chain_id = 10
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        assert!(matches!(
            ledger.close("alice", ChainId(1), id).await,
            Err(LedgerError::Store(_))
        ));
        assert_eq!(ledger.list_active("alice", ChainId(1)).await, vec![id]);

        assert!(matches!(
            ledger.open("alice", ChainId(10), dec!(1), dec!(2000)).await,
            Err(LedgerError::Store(_))
        ));
        assert_eq!(ledger.list_positions("alice").await.len(), 1);

        store.execute_batch("DROP TRIGGER reject_update;").unwrap();
        assert_eq!(assert_ok!(ledger.close("alice", ChainId(1), id).await), true);
        assert_eq!(store.load_positions().unwrap(), ledger.snapshot().await);
    }
}
