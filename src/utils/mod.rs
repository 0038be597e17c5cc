//! Shared utilities.

pub mod decimal;

pub use decimal::{deviation_bps, to_basis_points};
