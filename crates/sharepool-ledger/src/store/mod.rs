//! Ledger persistence.
//!
//! The engine reads and writes all state through [`LedgerStore`]. Every
//! mutating ledger call is bracketed by `begin` / `commit`, or `rollback` on
//! failure, so a call's writes land together or not at all.
//!
//! - [`memory`]: In-memory store (snapshot rollback)
//! - [`sqlite`]: SQLite store over `sharepool-db`

pub mod memory;
pub mod sqlite;

use std::ops::Range;

use sharepool_types::events::LedgerEvent;
use sharepool_types::{Address, AssetId, CheckpointIndex, PeriodIndex, PoolKey};

use crate::model::{AccountShare, BalanceSumCheckpoint, SharePool, WithdrawalCheckpoint};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors raised by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite backend failure.
    #[error("database error: {0}")]
    Db(#[from] sharepool_db::DbError),

    /// Transaction misuse (nested begin, commit without begin).
    #[error("transaction error: {0}")]
    Transaction(&'static str),

    /// Stored data violates a structural expectation.
    #[error("corrupt ledger state: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage backend for the ledger.
pub trait LedgerStore {
    fn begin(&mut self) -> StoreResult<()>;
    fn commit(&mut self) -> StoreResult<()>;
    fn rollback(&mut self) -> StoreResult<()>;

    fn pool(&self, pool: &PoolKey) -> StoreResult<Option<SharePool>>;
    fn put_pool(&mut self, pool: &PoolKey, state: &SharePool) -> StoreResult<()>;
    /// All known pools, in key order.
    fn pools(&self) -> StoreResult<Vec<PoolKey>>;

    fn checkpoint(
        &self,
        pool: &PoolKey,
        index: CheckpointIndex,
    ) -> StoreResult<Option<BalanceSumCheckpoint>>;
    /// Checkpoints in `range`, in index order. Indices past the end of the
    /// log are simply absent.
    fn checkpoints(
        &self,
        pool: &PoolKey,
        range: Range<CheckpointIndex>,
    ) -> StoreResult<Vec<BalanceSumCheckpoint>>;
    fn append_checkpoint(
        &mut self,
        pool: &PoolKey,
        index: CheckpointIndex,
        checkpoint: &BalanceSumCheckpoint,
    ) -> StoreResult<()>;

    fn account(&self, pool: &PoolKey, account: &Address) -> StoreResult<Option<AccountShare>>;
    fn put_account(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        share: &AccountShare,
    ) -> StoreResult<()>;
    /// All accounts ever registered in `pool`, in address order.
    fn accounts(&self, pool: &PoolKey) -> StoreResult<Vec<(Address, AccountShare)>>;

    fn withdrawal_checkpoint(
        &self,
        pool: &PoolKey,
        account: &Address,
        period: PeriodIndex,
        asset: &AssetId,
    ) -> StoreResult<Option<WithdrawalCheckpoint>>;
    fn put_withdrawal_checkpoint(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        period: PeriodIndex,
        asset: &AssetId,
        checkpoint: &WithdrawalCheckpoint,
    ) -> StoreResult<()>;

    /// Mark a signed-authorization nonce as used. Returns `false` if it was
    /// already used.
    fn consume_nonce(&mut self, pool: &PoolKey, account: &Address, nonce: u64)
        -> StoreResult<bool>;

    /// Append committed events to the store's event log.
    fn append_events(&mut self, events: &[LedgerEvent]) -> StoreResult<()>;
}
