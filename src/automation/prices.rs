//! Fresh price reads across chains.

use crate::chain::{ChainId, ChainRegistry};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Why a chain's price was left out of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceExclusion {
    /// Chain is unknown or deactivated in the registry
    Unavailable(String),
    /// Feed returned an error
    FeedError(String),
    /// Reading older than the staleness bound
    Stale { age_secs: i64 },
    /// Feed reported a zero or negative price
    NonPositive(Decimal),
}

impl fmt::Display for PriceExclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceExclusion::Unavailable(e) => write!(f, "chain unavailable: {e}"),
            PriceExclusion::FeedError(e) => write!(f, "price feed error: {e}"),
            PriceExclusion::Stale { age_secs } => write!(f, "price stale ({age_secs}s old)"),
            PriceExclusion::NonPositive(p) => write!(f, "non-positive price {p}"),
        }
    }
}

/// Read one chain's price, rejecting anything we must not act on.
pub async fn fresh_price(
    registry: &ChainRegistry,
    chain_id: ChainId,
    asset: &str,
    staleness_bound: Duration,
    now: DateTime<Utc>,
) -> Result<Decimal, PriceExclusion> {
    let feed = registry
        .price_feed(chain_id)
        .await
        .map_err(|e| PriceExclusion::Unavailable(e.to_string()))?;

    let reading = feed
        .latest_price(chain_id, asset)
        .await
        .map_err(|e| PriceExclusion::FeedError(e.to_string()))?;

    if reading.is_stale(now, staleness_bound) {
        return Err(PriceExclusion::Stale {
            age_secs: (now - reading.as_of).num_seconds(),
        });
    }
    if reading.price <= Decimal::ZERO {
        return Err(PriceExclusion::NonPositive(reading.price));
    }

    Ok(reading.price)
}

/// Read several chains concurrently, keeping only fresh prices.
///
/// Exclusions are logged; callers only see the chains that survived.
pub async fn fresh_prices(
    registry: &ChainRegistry,
    chains: impl IntoIterator<Item = ChainId>,
    asset: &str,
    staleness_bound: Duration,
    now: DateTime<Utc>,
) -> BTreeMap<ChainId, Decimal> {
    let chains: Vec<ChainId> = chains.into_iter().collect();
    let reads = join_all(
        chains
            .iter()
            .map(|&chain_id| fresh_price(registry, chain_id, asset, staleness_bound, now)),
    )
    .await;

    let mut prices = BTreeMap::new();
    for (chain_id, read) in chains.into_iter().zip(reads) {
        match read {
            Ok(price) => {
                debug!(chain = %chain_id, %price, "Fresh price");
                prices.insert(chain_id, price);
            }
            Err(exclusion) => {
                warn!(chain = %chain_id, reason = %exclusion, "Excluding chain from evaluation");
            }
        }
    }
    prices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainConfig, MockPriceFeed, PaperBridge, PaperPriceFeed, PriceReading};
    use anyhow::anyhow;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn chain(id: u64, active: bool) -> ChainConfig {
        ChainConfig {
            chain_id: ChainId(id),
            name: format!("chain-{id}"),
            price_feed_ref: "test".to_string(),
            bridge_adapter_ref: "paper".to_string(),
            is_active: active,
        }
    }

    #[tokio::test]
    async fn test_fresh_prices_excludes_stale_and_unavailable() {
        let registry = ChainRegistry::new();
        let feed = Arc::new(PaperPriceFeed::new());
        let bridge = Arc::new(PaperBridge::new(dec!(0)));
        for (id, active) in [(1u64, true), (10, true), (56, false), (137, true)] {
            registry
                .register(chain(id, active), feed.clone(), bridge.clone())
                .await
                .unwrap();
        }

        let now = Utc::now();
        feed.set_reading(ChainId(1), PriceReading::new(dec!(2000), now)).await;
        feed.set_reading(ChainId(10), PriceReading::new(dec!(1990), now - Duration::minutes(10)))
            .await;
        feed.set_reading(ChainId(56), PriceReading::new(dec!(2005), now)).await;
        // 137 has no reading at all

        let prices = fresh_prices(
            &registry,
            [ChainId(1), ChainId(10), ChainId(56), ChainId(137), ChainId(999)],
            "ETH",
            Duration::minutes(5),
            now,
        )
        .await;

        assert_eq!(prices.len(), 1);
        assert_eq!(prices[&ChainId(1)], dec!(2000));
    }

    #[tokio::test]
    async fn test_feed_error_and_bad_price_excluded() {
        let registry = ChainRegistry::new();
        let bridge = Arc::new(PaperBridge::new(dec!(0)));

        let mut failing = MockPriceFeed::new();
        failing
            .expect_latest_price()
            .returning(|_, _| Err(anyhow!("rpc timeout")));
        registry
            .register(chain(1, true), Arc::new(failing), bridge.clone())
            .await
            .unwrap();

        let mut zero = MockPriceFeed::new();
        zero.expect_latest_price()
            .returning(|_, _| Ok(PriceReading::new(Decimal::ZERO, Utc::now())));
        registry
            .register(chain(10, true), Arc::new(zero), bridge.clone())
            .await
            .unwrap();

        let now = Utc::now();
        let bound = Duration::minutes(5);

        assert!(matches!(
            fresh_price(&registry, ChainId(1), "ETH", bound, now).await,
            Err(PriceExclusion::FeedError(_))
        ));
        assert_eq!(
            fresh_price(&registry, ChainId(10), "ETH", bound, now).await,
            Err(PriceExclusion::NonPositive(Decimal::ZERO))
        );
    }
}
