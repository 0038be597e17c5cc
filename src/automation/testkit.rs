//! Shared fixtures for engine and executor tests.

use super::{AutomationEngine, RebalanceExecutor};
use crate::chain::{BridgeAdapter, ChainConfig, ChainId, ChainRegistry, PaperBridge, PaperPriceFeed};
use crate::config::EngineConfig;
use crate::events::{DomainEvent, EventBus};
use crate::ledger::HedgeLedger;
use crate::persistence::PersistenceManager;
use crate::policy::{AutomationPolicy, PolicyStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::broadcast;

pub(crate) const A: ChainId = ChainId(1);
pub(crate) const B: ChainId = ChainId(10);
pub(crate) const C: ChainId = ChainId(137);

pub(crate) const OWNER: &str = "alice";

pub(crate) struct Harness {
    pub registry: Arc<ChainRegistry>,
    pub feed: Arc<PaperPriceFeed>,
    pub bridge: Arc<PaperBridge>,
    pub ledger: Arc<HedgeLedger>,
    pub store: Arc<PersistenceManager>,
    pub events: EventBus,
    pub executor: Arc<RebalanceExecutor>,
    pub engine: AutomationEngine,
}

impl Harness {
    /// Paper feed and paper bridge (fee 0.01) on every chain.
    pub async fn new(chains: &[ChainId]) -> Self {
        let bridge = Arc::new(PaperBridge::new(dec!(0.01)));
        Self::build(chains, bridge.clone(), bridge).await
    }

    /// Paper feed with a custom bridge on every chain.
    pub async fn with_bridge(chains: &[ChainId], bridge: Arc<dyn BridgeAdapter>) -> Self {
        Self::build(chains, Arc::new(PaperBridge::new(dec!(0.01))), bridge).await
    }

    async fn build(
        chains: &[ChainId],
        paper_bridge: Arc<PaperBridge>,
        bridge: Arc<dyn BridgeAdapter>,
    ) -> Self {
        let config = EngineConfig::default();
        let registry = Arc::new(ChainRegistry::new());
        let feed = Arc::new(PaperPriceFeed::new());

        for &chain_id in chains {
            registry
                .register(
                    ChainConfig {
                        chain_id,
                        name: format!("chain-{chain_id}"),
                        price_feed_ref: "paper".to_string(),
                        bridge_adapter_ref: "test".to_string(),
                        is_active: true,
                    },
                    feed.clone(),
                    bridge.clone(),
                )
                .await
                .unwrap();
        }

        let store = Arc::new(PersistenceManager::new(":memory:").unwrap());
        let events = EventBus::new(256);
        let ledger = Arc::new(
            HedgeLedger::new(registry.clone(), events.clone(), config.amount_decimals)
                .with_journal(store.clone()),
        );
        let executor = Arc::new(RebalanceExecutor::new(
            registry.clone(),
            ledger.clone(),
            events.clone(),
            store.clone(),
            config.asset.clone(),
            config.bridge_timeout(),
        ));
        let policies = Arc::new(PolicyStore::new(registry.clone()));
        let engine = AutomationEngine::new(
            config,
            registry.clone(),
            policies,
            ledger.clone(),
            executor.clone(),
        );

        Self {
            registry,
            feed,
            bridge: paper_bridge,
            ledger,
            store,
            events,
            executor,
            engine,
        }
    }

    /// Ledger and executor rebuilt from the store, as after a process restart.
    pub async fn restart(&self) -> (Arc<HedgeLedger>, RebalanceExecutor) {
        let config = EngineConfig::default();
        let ledger = Arc::new(
            HedgeLedger::new(self.registry.clone(), self.events.clone(), config.amount_decimals)
                .with_journal(self.store.clone()),
        );
        ledger.restore(self.store.load_positions().unwrap()).await;
        let executor = RebalanceExecutor::new(
            self.registry.clone(),
            ledger.clone(),
            self.events.clone(),
            self.store.clone(),
            config.asset.clone(),
            config.bridge_timeout(),
        );
        (ledger, executor)
    }

    /// Make the next matching write to the transfer table abort.
    pub fn reject_transfer_writes(&self, name: &str, event: &str, when: &str) {
        self.store
            .execute_batch(&format!(
                "CREATE TRIGGER {name} BEFORE {event} ON pending_transfers WHEN {when}
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;"
            ))
            .unwrap();
    }

    pub fn allow_transfer_writes(&self, name: &str) {
        self.store
            .execute_batch(&format!("DROP TRIGGER {name};"))
            .unwrap();
    }

    pub async fn set_prices(&self, prices: &[(ChainId, Decimal)]) {
        for &(chain_id, price) in prices {
            self.feed.set_price(chain_id, price).await;
        }
    }
}

pub(crate) fn policy(
    min_price: Decimal,
    max_price: Decimal,
    rebalance_threshold_bps: u32,
    chains: &[ChainId],
) -> AutomationPolicy {
    AutomationPolicy {
        min_price,
        max_price,
        rebalance_threshold_bps,
        monitored_chain_ids: chains.iter().copied().collect(),
        hedge_amount: dec!(1),
    }
}

/// Everything currently buffered on a subscription.
pub(crate) fn drain(rx: &mut broadcast::Receiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) fn kinds(events: &[DomainEvent]) -> Vec<&'static str> {
    events.iter().map(DomainEvent::kind).collect()
}
