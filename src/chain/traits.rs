//! Pluggable capabilities a chain is served by.
//!
//! The engine never talks to an oracle or a bridge directly; it resolves the
//! instances registered for a chain and calls through these traits:
//! - `PriceFeed` for the latest asset price on a chain
//! - `BridgeAdapter` for fee estimates, transfer initiation and delivery status

use super::types::{ChainId, DeliveryStatus, PriceReading, TransferId};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Source of the latest known price for an asset on a chain.
///
/// Implementations report the observation time; deciding whether a reading
/// is too old is the caller's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn latest_price(&self, chain_id: ChainId, asset: &str) -> anyhow::Result<PriceReading>;
}

/// Cross-chain transfer mechanism.
///
/// Initiation and delivery are separate: `initiate_transfer` returns as soon
/// as the transfer is accepted, delivery is observed later through
/// `delivery_status` or pushed to the executor's callbacks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeAdapter: Send + Sync {
    /// Estimate the fee for moving `amount` to `target`.
    async fn estimate_fees(&self, target: ChainId, amount: Decimal) -> anyhow::Result<Decimal>;

    /// Start a transfer of `amount` to `target`.
    async fn initiate_transfer(
        &self,
        target: ChainId,
        amount: Decimal,
    ) -> anyhow::Result<TransferId>;

    /// Current delivery state of a previously initiated transfer.
    async fn delivery_status(&self, transfer_id: &TransferId) -> anyhow::Result<DeliveryStatus>;
}
