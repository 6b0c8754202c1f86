//! # sharepool-types
//!
//! Shared domain types used across the sharepool workspace: account and
//! asset identifiers, pool keys, basis-point constants and the ledger event
//! records observed by external indexers.

pub mod events;
pub mod ids;

pub use ids::{Address, AssetId, PoolKey};

/// Common type aliases.
pub type Hash = [u8; 32];
pub type Bps = u16;
pub type Amount = u128;
pub type CheckpointIndex = u64;
pub type PeriodIndex = u32;
pub type Timestamp = u64;

/// Basis points representing 100% of an inflow.
pub const MAX_BPS: Bps = 10_000;

/// Error returned when parsing identifiers from text.
#[derive(Debug, thiserror::Error)]
pub enum ParseIdError {
    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The decoded input had the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The pool key was not `<client-hex>:<pool-id>`.
    #[error("malformed pool key: {0}")]
    MalformedPoolKey(String),
}
