//! Chain registry: which chains exist, whether they are active, and which
//! capability instances serve them.

use super::traits::{BridgeAdapter, PriceFeed};
use super::types::{ChainConfig, ChainId};
use crate::error::RegistryError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

struct ChainEntry {
    config: ChainConfig,
    price_feed: Arc<dyn PriceFeed>,
    bridge: Arc<dyn BridgeAdapter>,
}

/// Holds exactly one config per chain id.
///
/// Read-mostly; registration and activation changes are administrative.
#[derive(Default)]
pub struct ChainRegistry {
    chains: RwLock<BTreeMap<ChainId, ChainEntry>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain with the feed and bridge that serve it.
    pub async fn register(
        &self,
        config: ChainConfig,
        price_feed: Arc<dyn PriceFeed>,
        bridge: Arc<dyn BridgeAdapter>,
    ) -> Result<(), RegistryError> {
        let mut chains = self.chains.write().await;
        if chains.contains_key(&config.chain_id) {
            return Err(RegistryError::AlreadyRegistered(config.chain_id));
        }

        info!(
            chain = %config.chain_id,
            name = %config.name,
            price_feed = %config.price_feed_ref,
            bridge = %config.bridge_adapter_ref,
            active = config.is_active,
            "Chain registered"
        );

        chains.insert(
            config.chain_id,
            ChainEntry {
                config,
                price_feed,
                bridge,
            },
        );
        Ok(())
    }

    /// Activate or deactivate a registered chain.
    pub async fn set_active(&self, chain_id: ChainId, active: bool) -> Result<(), RegistryError> {
        let mut chains = self.chains.write().await;
        let entry = chains
            .get_mut(&chain_id)
            .ok_or(RegistryError::NotFound(chain_id))?;

        if entry.config.is_active != active {
            warn!(chain = %chain_id, active, "Chain activation changed");
        }
        entry.config.is_active = active;
        Ok(())
    }

    pub async fn get(&self, chain_id: ChainId) -> Result<ChainConfig, RegistryError> {
        self.chains
            .read()
            .await
            .get(&chain_id)
            .map(|entry| entry.config.clone())
            .ok_or(RegistryError::NotFound(chain_id))
    }

    /// Unknown chains are reported as inactive.
    pub async fn is_active(&self, chain_id: ChainId) -> bool {
        self.chains
            .read()
            .await
            .get(&chain_id)
            .is_some_and(|entry| entry.config.is_active)
    }

    /// All registered chain ids in ascending order.
    pub async fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.read().await.keys().copied().collect()
    }

    /// Price feed serving an active chain.
    pub async fn price_feed(&self, chain_id: ChainId) -> Result<Arc<dyn PriceFeed>, RegistryError> {
        let chains = self.chains.read().await;
        let entry = Self::active_entry(&chains, chain_id)?;
        Ok(entry.price_feed.clone())
    }

    /// Bridge adapter serving an active chain.
    pub async fn bridge(&self, chain_id: ChainId) -> Result<Arc<dyn BridgeAdapter>, RegistryError> {
        let chains = self.chains.read().await;
        let entry = Self::active_entry(&chains, chain_id)?;
        Ok(entry.bridge.clone())
    }

    /// Price feed of a chain regardless of activation.
    ///
    /// Used when delivered exposure has to be priced on a chain that may have
    /// been deactivated after the transfer started.
    pub(crate) async fn price_feed_any(
        &self,
        chain_id: ChainId,
    ) -> Result<Arc<dyn PriceFeed>, RegistryError> {
        self.chains
            .read()
            .await
            .get(&chain_id)
            .map(|entry| entry.price_feed.clone())
            .ok_or(RegistryError::NotFound(chain_id))
    }

    /// Bridge of a chain regardless of activation, for polling transfers
    /// already in flight.
    pub(crate) async fn bridge_any(
        &self,
        chain_id: ChainId,
    ) -> Result<Arc<dyn BridgeAdapter>, RegistryError> {
        self.chains
            .read()
            .await
            .get(&chain_id)
            .map(|entry| entry.bridge.clone())
            .ok_or(RegistryError::NotFound(chain_id))
    }

    fn active_entry(
        chains: &BTreeMap<ChainId, ChainEntry>,
        chain_id: ChainId,
    ) -> Result<&ChainEntry, RegistryError> {
        let entry = chains
            .get(&chain_id)
            .ok_or(RegistryError::NotFound(chain_id))?;
        if !entry.config.is_active {
            return Err(RegistryError::Inactive(chain_id));
        }
        Ok(entry)
    }
}
