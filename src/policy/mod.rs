//! Per-owner automation policies.
//!
//! A policy is validated against the chain registry and replaced wholesale.
//! The table holds `Arc<AutomationPolicy>` values so readers keep a
//! consistent snapshot while a writer swaps in a new one.

use crate::chain::{ChainId, ChainRegistry};
use crate::error::PolicyError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Automation settings for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationPolicy {
    /// Below this price a hedge is opened
    pub min_price: Decimal,
    /// Above this price an open hedge is closed
    pub max_price: Decimal,
    /// Minimum cross-chain price divergence (bps) that justifies moving exposure
    pub rebalance_threshold_bps: u32,
    pub monitored_chain_ids: BTreeSet<ChainId>,
    /// Quantity committed when a position is opened
    pub hedge_amount: Decimal,
}

impl AutomationPolicy {
    /// Check the invariants that do not need the registry.
    pub fn validate_shape(&self) -> Result<(), PolicyError> {
        if self.min_price <= Decimal::ZERO || self.min_price >= self.max_price {
            return Err(PolicyError::InvalidBounds {
                min_price: self.min_price,
                max_price: self.max_price,
            });
        }
        if self.rebalance_threshold_bps == 0 {
            return Err(PolicyError::InvalidThreshold);
        }
        if self.monitored_chain_ids.is_empty() {
            return Err(PolicyError::EmptyChainSet);
        }
        if self.hedge_amount <= Decimal::ZERO {
            return Err(PolicyError::InvalidAmount(self.hedge_amount));
        }
        Ok(())
    }

    pub fn monitors(&self, chain_id: ChainId) -> bool {
        self.monitored_chain_ids.contains(&chain_id)
    }
}

/// Table of policies keyed by owner.
pub struct PolicyStore {
    registry: Arc<ChainRegistry>,
    policies: RwLock<BTreeMap<String, Arc<AutomationPolicy>>>,
}

impl PolicyStore {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self {
            registry,
            policies: RwLock::new(BTreeMap::new()),
        }
    }

    /// Validate and install a policy, replacing any previous one.
    ///
    /// Invalid policies are never stored.
    pub async fn set(&self, owner: &str, policy: AutomationPolicy) -> Result<(), PolicyError> {
        policy.validate_shape()?;

        // The whole policy fails if any chain is unusable.
        for &chain_id in &policy.monitored_chain_ids {
            if !self.registry.is_active(chain_id).await {
                return Err(PolicyError::UnknownChain(chain_id));
            }
        }

        info!(
            %owner,
            min_price = %policy.min_price,
            max_price = %policy.max_price,
            threshold_bps = policy.rebalance_threshold_bps,
            chains = ?policy.monitored_chain_ids,
            hedge_amount = %policy.hedge_amount,
            "Automation policy set"
        );

        let policy = Arc::new(policy);
        self.policies.write().await.insert(owner.to_string(), policy);
        Ok(())
    }

    pub async fn get(&self, owner: &str) -> Result<Arc<AutomationPolicy>, PolicyError> {
        self.policies
            .read()
            .await
            .get(owner)
            .cloned()
            .ok_or_else(|| PolicyError::NotConfigured(owner.to_string()))
    }

    /// Remove an owner's policy. Returns true if one existed.
    pub async fn clear(&self, owner: &str) -> bool {
        let removed = self.policies.write().await.remove(owner).is_some();
        if removed {
            info!(%owner, "Automation policy cleared");
        }
        removed
    }

    /// Owners with a policy, sorted.
    pub async fn owners(&self) -> Vec<String> {
        self.policies.read().await.keys().cloned().collect()
    }

    /// Consistent copy of the whole table.
    pub async fn snapshot(&self) -> Vec<(String, Arc<AutomationPolicy>)> {
        self.policies
            .read()
            .await
            .iter()
            .map(|(owner, policy)| (owner.clone(), policy.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainConfig, PaperBridge, PaperPriceFeed};
    use rust_decimal_macros::dec;

    async fn setup_store() -> (PolicyStore, Arc<ChainRegistry>) {
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
        (PolicyStore::new(registry.clone()), registry)
    }

    fn policy(chains: &[u64]) -> AutomationPolicy {
        AutomationPolicy {
            min_price: dec!(1900),
            max_price: dec!(2100),
            rebalance_threshold_bps: 500,
            monitored_chain_ids: chains.iter().map(|&id| ChainId(id)).collect(),
            hedge_amount: dec!(1),
        }
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _registry) = setup_store().await;

        store.set("alice", policy(&[1, 10])).await.unwrap();

        let stored = store.get("alice").await.unwrap();
        assert_eq!(*stored, policy(&[1, 10]));
        assert_eq!(
            store.get("bob").await.unwrap_err(),
            PolicyError::NotConfigured("bob".to_string())
        );
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (store, _registry) = setup_store().await;

        let mut inverted = policy(&[1]);
        inverted.min_price = dec!(2100);
        assert!(matches!(
            store.set("alice", inverted).await,
            Err(PolicyError::InvalidBounds { .. })
        ));

        let mut zero_threshold = policy(&[1]);
        zero_threshold.rebalance_threshold_bps = 0;
        assert_eq!(
            store.set("alice", zero_threshold).await,
            Err(PolicyError::InvalidThreshold)
        );

        assert_eq!(store.set("alice", policy(&[])).await, Err(PolicyError::EmptyChainSet));

        assert_eq!(
            store.set("alice", policy(&[1, 999])).await,
            Err(PolicyError::UnknownChain(ChainId(999)))
        );
        assert_eq!(
            store.set("alice", policy(&[1, 56])).await,
            Err(PolicyError::UnknownChain(ChainId(56)))
        );

        let mut no_amount = policy(&[1]);
        no_amount.hedge_amount = Decimal::ZERO;
        assert_eq!(
            store.set("alice", no_amount).await,
            Err(PolicyError::InvalidAmount(Decimal::ZERO))
        );

        // Nothing was stored
        assert!(store.owners().await.is_empty());
    }

    #[tokio::test]
    async fn test_replacement_keeps_old_snapshot() {
        let (store, _registry) = setup_store().await;
        store.set("alice", policy(&[1])).await.unwrap();

        let before = store.get("alice").await.unwrap();
        store.set("alice", policy(&[1, 10])).await.unwrap();

        // A reader holding the old snapshot never sees a partial update
        assert_eq!(before.monitored_chain_ids.len(), 1);
        assert_eq!(store.get("alice").await.unwrap().monitored_chain_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_replacement_keeps_existing() {
        let (store, _registry) = setup_store().await;
        store.set("alice", policy(&[1])).await.unwrap();

        assert!(store.set("alice", policy(&[999])).await.is_err());
        assert_eq!(*store.get("alice").await.unwrap(), policy(&[1]));
    }

    #[tokio::test]
    async fn test_clear_and_owners() {
        let (store, _registry) = setup_store().await;
        store.set("carol", policy(&[1])).await.unwrap();
        store.set("alice", policy(&[10])).await.unwrap();

        assert_eq!(store.owners().await, vec!["alice", "carol"]);
        assert!(store.clear("alice").await);
        assert!(!store.clear("alice").await);
        assert_eq!(store.owners().await, vec!["carol"]);
    }

    #[tokio::test]
    async fn test_policy_json_shape() {
        let json = r#"{
            "min_price": "1900",
            "max_price": "2100",
            "rebalance_threshold_bps": 500,
            "monitored_chain_ids": [10, 1],
            "hedge_amount": "1.5"
        }"#;

        let parsed: AutomationPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.monitored_chain_ids.iter().next(), Some(&ChainId(1)));
        assert_eq!(parsed.hedge_amount, dec!(1.5));
        assert!(parsed.validate_shape().is_ok());
    }
}
