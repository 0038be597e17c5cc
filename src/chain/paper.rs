//! Paper price feed and bridge for simulated keeper runs and tests.

use super::traits::{BridgeAdapter, PriceFeed};
use super::types::{ChainId, DeliveryStatus, PriceReading, TransferId};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

static TRANSFER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Price feed backed by an in-memory table of readings.
#[derive(Default)]
pub struct PaperPriceFeed {
    readings: RwLock<HashMap<ChainId, PriceReading>>,
}

impl PaperPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fresh reading (observed now) for a chain.
    pub async fn set_price(&self, chain_id: ChainId, price: Decimal) {
        self.set_reading(chain_id, PriceReading::new(price, Utc::now()))
            .await;
    }

    /// Set a reading with an explicit observation time.
    pub async fn set_reading(&self, chain_id: ChainId, reading: PriceReading) {
        debug!(chain = %chain_id, price = %reading.price, as_of = %reading.as_of, "Paper price updated");
        self.readings.write().await.insert(chain_id, reading);
    }

    /// Drop the reading for a chain so the next lookup fails.
    pub async fn remove(&self, chain_id: ChainId) {
        self.readings.write().await.remove(&chain_id);
    }
}

#[async_trait]
impl PriceFeed for PaperPriceFeed {
    async fn latest_price(&self, chain_id: ChainId, asset: &str) -> Result<PriceReading> {
        self.readings
            .read()
            .await
            .get(&chain_id)
            .copied()
            .ok_or_else(|| anyhow!("no {asset} price on chain {chain_id}"))
    }
}

/// Simulated transfer record.
#[derive(Debug, Clone)]
pub struct PaperTransfer {
    pub target: ChainId,
    pub amount: Decimal,
    pub fee: Decimal,
    pub initiated_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

/// Bridge that accepts every transfer and delivers on request or after a
/// fixed delay.
pub struct PaperBridge {
    fee: Decimal,
    /// Deliver automatically once a transfer is this old (None = manual only)
    confirm_after: Option<Duration>,
    transfers: RwLock<HashMap<TransferId, PaperTransfer>>,
    fail_estimates: AtomicBool,
    fail_initiations: AtomicBool,
}

impl PaperBridge {
    /// Create a bridge charging a flat fee per transfer.
    pub fn new(fee: Decimal) -> Self {
        Self {
            fee,
            confirm_after: None,
            transfers: RwLock::new(HashMap::new()),
            fail_estimates: AtomicBool::new(false),
            fail_initiations: AtomicBool::new(false),
        }
    }

    /// Auto-confirm transfers once they are older than `delay`.
    pub fn with_confirm_after(mut self, delay: Duration) -> Self {
        self.confirm_after = Some(delay);
        self
    }

    /// Make every fee estimate fail.
    pub fn fail_estimates(&self, fail: bool) {
        self.fail_estimates.store(fail, Ordering::SeqCst);
    }

    /// Make every transfer initiation fail.
    pub fn fail_initiations(&self, fail: bool) {
        self.fail_initiations.store(fail, Ordering::SeqCst);
    }

    /// Mark a transfer as delivered.
    pub async fn confirm(&self, transfer_id: &TransferId, delivered_amount: Decimal) -> Result<()> {
        self.set_status(transfer_id, DeliveryStatus::Confirmed { delivered_amount })
            .await
    }

    /// Mark a transfer as failed.
    pub async fn fail(&self, transfer_id: &TransferId, reason: &str) -> Result<()> {
        self.set_status(
            transfer_id,
            DeliveryStatus::Failed {
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Snapshot of all simulated transfers.
    pub async fn transfers(&self) -> HashMap<TransferId, PaperTransfer> {
        self.transfers.read().await.clone()
    }

    async fn set_status(&self, transfer_id: &TransferId, status: DeliveryStatus) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(transfer_id)
            .ok_or_else(|| anyhow!("unknown paper transfer {transfer_id}"))?;
        transfer.status = status;
        Ok(())
    }
}

#[async_trait]
impl BridgeAdapter for PaperBridge {
    async fn estimate_fees(&self, target: ChainId, amount: Decimal) -> Result<Decimal> {
        if self.fail_estimates.load(Ordering::SeqCst) {
            bail!("paper bridge fee quote unavailable for chain {target}");
        }
        debug!(%target, %amount, fee = %self.fee, "Paper fee estimate");
        Ok(self.fee)
    }

    async fn initiate_transfer(&self, target: ChainId, amount: Decimal) -> Result<TransferId> {
        if self.fail_initiations.load(Ordering::SeqCst) {
            bail!("paper bridge rejected transfer to chain {target}");
        }

        // Ids must stay unique across bridge instances and restarts
        let n = TRANSFER_COUNTER.fetch_add(1, Ordering::SeqCst);
        let transfer_id = TransferId(format!(
            "paper-{}-{n}",
            Utc::now().timestamp_millis()
        ));

        self.transfers.write().await.insert(
            transfer_id.clone(),
            PaperTransfer {
                target,
                amount,
                fee: self.fee,
                initiated_at: Utc::now(),
                status: DeliveryStatus::Pending,
            },
        );

        debug!(%transfer_id, %target, %amount, "Paper transfer initiated");
        Ok(transfer_id)
    }

    async fn delivery_status(&self, transfer_id: &TransferId) -> Result<DeliveryStatus> {
        let mut transfers = self.transfers.write().await;
        let transfer = transfers
            .get_mut(transfer_id)
            .ok_or_else(|| anyhow!("unknown paper transfer {transfer_id}"))?;

        if let (DeliveryStatus::Pending, Some(delay)) = (&transfer.status, self.confirm_after) {
            if Utc::now() - transfer.initiated_at >= delay {
                let delivered_amount = (transfer.amount - transfer.fee).max(Decimal::ZERO);
                transfer.status = DeliveryStatus::Confirmed { delivered_amount };
            }
        }

        Ok(transfer.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_feed_readings() {
        let feed = PaperPriceFeed::new();
        assert!(feed.latest_price(ChainId(1), "ETH").await.is_err());

        feed.set_price(ChainId(1), dec!(2000)).await;
        let reading = feed.latest_price(ChainId(1), "ETH").await.unwrap();
        assert_eq!(reading.price, dec!(2000));

        feed.remove(ChainId(1)).await;
        assert!(feed.latest_price(ChainId(1), "ETH").await.is_err());
    }

    #[tokio::test]
    async fn test_manual_delivery() {
        let bridge = PaperBridge::new(dec!(2));
        let id = bridge.initiate_transfer(ChainId(10), dec!(5)).await.unwrap();

        assert_eq!(
            bridge.delivery_status(&id).await.unwrap(),
            DeliveryStatus::Pending
        );

        bridge.confirm(&id, dec!(4.9)).await.unwrap();
        assert_eq!(
            bridge.delivery_status(&id).await.unwrap(),
            DeliveryStatus::Confirmed {
                delivered_amount: dec!(4.9)
            }
        );
    }

    #[tokio::test]
    async fn test_auto_confirm_deducts_fee() {
        let bridge = PaperBridge::new(dec!(0.5)).with_confirm_after(Duration::zero());
        let id = bridge.initiate_transfer(ChainId(10), dec!(5)).await.unwrap();

        assert_eq!(
            bridge.delivery_status(&id).await.unwrap(),
            DeliveryStatus::Confirmed {
                delivered_amount: dec!(4.5)
            }
        );
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let bridge = PaperBridge::new(dec!(1));
        bridge.fail_estimates(true);
        assert!(bridge.estimate_fees(ChainId(10), dec!(5)).await.is_err());

        bridge.fail_initiations(true);
        assert!(bridge.initiate_transfer(ChainId(10), dec!(5)).await.is_err());
        assert!(bridge.transfers().await.is_empty());
    }
}
