//! Hedge position ledger.
//!
//! Tracks each hedge position's lifecycle:
//! - Opening on an active, registered chain
//! - Idempotent deactivation (close or bridge-out)
//! - Append-only slots per owner and chain for auditing

mod book;
mod position;

pub use book::HedgeLedger;
pub use position::{HedgePosition, PositionId};
