//! Typed errors for the engine components.
//!
//! Capability implementations (price feeds, bridges) and application glue
//! return `anyhow::Result`; the components the engine owns return these.

use crate::chain::{ChainId, TransferId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors from the chain registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No config exists for the chain.
    #[error("chain {0} is not registered")]
    NotFound(ChainId),

    /// The chain is registered but deactivated.
    #[error("chain {0} is inactive")]
    Inactive(ChainId),

    /// A config already exists for the chain.
    #[error("chain {0} is already registered")]
    AlreadyRegistered(ChainId),
}

/// Errors from the hedge position ledger.
///
/// All but `Store` are invariant violations: the caller asked for something
/// the ledger can never do.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("position amount must be positive after truncation, got {0}")]
    ZeroAmount(Decimal),

    #[error("target price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("chain {0} is not registered")]
    UnknownChain(ChainId),

    #[error("chain {0} is inactive")]
    ChainInactive(ChainId),

    #[error("position {position_id} not found for owner {owner} on chain {chain_id}")]
    PositionNotFound {
        owner: String,
        chain_id: ChainId,
        position_id: usize,
    },

    #[error("position change could not be persisted: {0}")]
    Store(String),
}

/// Policy validation and lookup errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid price bounds: min {min_price} must be positive and below max {max_price}")]
    InvalidBounds {
        min_price: Decimal,
        max_price: Decimal,
    },

    #[error("monitored chain {0} is unknown or inactive")]
    UnknownChain(ChainId),

    #[error("policy must monitor at least one chain")]
    EmptyChainSet,

    #[error("rebalance threshold must be greater than 0 bps")]
    InvalidThreshold,

    #[error("hedge amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("no policy configured for owner {0}")]
    NotConfigured(String),
}

/// Errors raised while carrying out a remediation or a delivery callback.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("fee estimation failed for transfer to chain {target}: {source}")]
    FeeEstimation {
        target: ChainId,
        #[source]
        source: anyhow::Error,
    },

    #[error("transfer to chain {target} could not be initiated: {source}")]
    TransferInitiation {
        target: ChainId,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),

    #[error("pending transfer store failed: {0}")]
    Store(#[source] anyhow::Error),
}
