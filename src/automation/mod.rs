//! Keeper automation.
//!
//! ## Check
//! `AutomationEngine::check_upkeep` evaluates every owner's policy against
//! fresh cross-chain prices and returns remediation intents without writing.
//!
//! ## Perform
//! `AutomationEngine::perform_upkeep` re-validates each intent and hands it
//! to the `RebalanceExecutor`, which sequences ledger and bridge calls.
//!
//! ## Delivery
//! Bridge confirmations and failures resolve entries of the durable
//! pending-transfer table, either pushed by a listener or pulled by
//! `poll_deliveries` and `sweep_timed_out`.

mod engine;
mod executor;
mod intent;
mod prices;
mod transfer;

#[cfg(test)]
pub(crate) mod testkit;

pub use engine::{decide, AutomationEngine};
pub use executor::{DeliveryOutcome, RebalanceExecutor, RebalanceRequest, RebalanceStart};
pub use intent::{
    IntentKind, IntentOutcome, IntentResult, PerformReport, RemediationIntent, UpkeepCheck,
};
pub use prices::{fresh_price, fresh_prices, PriceExclusion};
pub use transfer::{PendingTransfer, TransferStatus};
