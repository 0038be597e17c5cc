//! Chain integrations for the hedge keeper.
//!
//! ## Registry
//! One config per chain id, mapping each chain to the price feed and bridge
//! adapter instances that serve it.
//!
//! ## Capabilities
//! `PriceFeed` and `BridgeAdapter` are pluggable; `paper` provides simulated
//! implementations for paper runs and tests.

pub mod paper;
mod registry;
mod traits;
mod types;

pub use paper::{PaperBridge, PaperPriceFeed};
pub use registry::ChainRegistry;
pub use traits::{BridgeAdapter, PriceFeed};
#[cfg(test)]
pub use traits::{MockBridgeAdapter, MockPriceFeed};
pub use types::*;
