//! # sharepool-ledger
//!
//! Proportional revenue-sharing ledger.
//!
//! Clients register share pools of recipients, each entitled to a basis-point
//! cut of every future inflow. Inflows are recorded in an append-only
//! checkpoint log; recipients withdraw lazily, and settlement walks only the
//! checkpoints created since their last withdrawal.
//!
//! ## Modules
//!
//! - [`model`]: Persistent records: pools, checkpoints, account shares, resume state
//! - [`store`]: `LedgerStore` trait with in-memory and SQLite backends
//! - [`membership`]: Adding, removing and re-weighting recipients
//! - [`deposit`]: Inflow allocation and checkpoint creation
//! - [`settlement`]: Pure settlement over a checkpoint window
//! - [`withdrawal`]: Authorized withdrawals and previews
//! - [`auth`]: Direct, delegated and signed withdrawal authorization
//! - [`custody`]: The custodian collaborator interface
//! - [`events`]: Event sinks
//! - [`audit`]: Invariant checks over stored state

pub mod audit;
pub mod auth;
pub mod custody;
pub mod deposit;
pub mod events;
pub mod ledger;
pub mod limits;
pub mod membership;
pub mod model;
pub mod settlement;
pub mod store;
pub mod withdrawal;

use sharepool_types::{Address, AssetId, Bps, PeriodIndex, PoolKey, Timestamp};

pub use auth::{Authorization, SignedWithdrawal, WithdrawalRequest};
pub use custody::{Custodian, CustodyError, Inflow, MemoryCustodian, Payout};
pub use events::{EventLog, EventSink};
pub use ledger::Ledger;
pub use limits::LedgerLimits;
pub use membership::ShareGrant;
pub use store::{LedgerStore, MemoryStore, SqliteStore, StoreError};

/// Error types for ledger operations.
///
/// Every error aborts the enclosing call with no state change.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    // Budget
    /// The pool's total bps would exceed 10000.
    #[error("bps budget exceeded: pool total would be {attempted} (max 10000)")]
    BpsBudgetExceeded { attempted: u32 },

    /// A decrease larger than the account's current bps.
    #[error("bps underflow: cannot decrease {current} bps by {delta}")]
    BpsUnderflow { current: Bps, delta: Bps },

    // Authorization
    /// Caller is neither the account, an approved delegate, nor covered by
    /// the wildcard delegate.
    #[error("caller {caller} is not authorized to withdraw for {account}")]
    Unauthorized { caller: Address, account: Address },

    /// The signed authorization's signature did not verify.
    #[error("invalid withdrawal signature")]
    InvalidSignature,

    /// The signed authorization has expired.
    #[error("withdrawal authorization expired at {expiry}, current time {now}")]
    SignatureExpired { expiry: Timestamp, now: Timestamp },

    /// The signing key does not own the account.
    #[error("signing key does not own account {account}")]
    SignerMismatch { account: Address },

    /// The signed authorization's nonce was already used.
    #[error("authorization nonce {nonce} already used")]
    NonceReused { nonce: u64 },

    // Timing
    /// Removal or decrease attempted before the account's removable time.
    #[error("account {account} not removable until {removable_at}, current time {now}")]
    NotYetRemovable {
        account: Address,
        removable_at: Timestamp,
        now: Timestamp,
    },

    // Input validation
    /// A batch call was given no entries.
    #[error("empty batch")]
    EmptyBatch,

    /// A withdrawal named no assets.
    #[error("empty asset list")]
    EmptyAssets,

    /// The same account appears twice in one batch.
    #[error("duplicate account {0} in batch")]
    DuplicateAccount(Address),

    /// The same asset appears twice in one withdrawal.
    #[error("duplicate asset {0} in withdrawal")]
    DuplicateAsset(AssetId),

    /// A share was added with zero bps.
    #[error("account {0} added with zero bps")]
    ZeroBps(Address),

    /// A bps change of zero.
    #[error("bps delta must be non-zero")]
    ZeroDelta,

    /// The reserved wildcard address was used as an account.
    #[error("reserved address cannot hold a share")]
    ReservedAddress,

    /// A configured limit was exceeded.
    #[error("{what} limit exceeded: {actual} > {max}")]
    LimitExceeded {
        what: &'static str,
        actual: usize,
        max: usize,
    },

    /// The pool does not exist.
    #[error("unknown pool {0}")]
    UnknownPool(PoolKey),

    /// The account has never been registered in the pool.
    #[error("unknown account {account} in pool {pool}")]
    UnknownAccount { pool: PoolKey, account: Address },

    /// The account has no open period.
    #[error("account {0} has no active share")]
    NoActivePeriod(Address),

    /// The account already has an open period.
    #[error("account {0} already has an active share")]
    AlreadyActive(Address),

    /// The period index is out of range.
    #[error("unknown period {period_index} for account {account} ({period_count} periods)")]
    UnknownPeriod {
        account: Address,
        period_index: PeriodIndex,
        period_count: usize,
    },

    // Transfer
    /// The custodian failed to move assets.
    #[error("custody error: {0}")]
    Custody(#[from] CustodyError),

    /// Arithmetic overflow.
    #[error("arithmetic overflow in ledger calculation")]
    Overflow,

    /// Storage backend failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
