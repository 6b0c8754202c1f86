//! SQLite ledger store.
//!
//! Thin mapping between the ledger model and the `sharepool-db` row types.
//! Transactions are real SQLite transactions (`BEGIN IMMEDIATE`), so a
//! rollback discards every row written by the call.

use std::ops::Range;
use std::path::Path;

use rusqlite::Connection;
use sharepool_db::queries::{accounts, checkpoints, events, nonces, pools, withdrawals};
use sharepool_types::events::LedgerEvent;
use sharepool_types::{Address, AssetId, CheckpointIndex, PeriodIndex, PoolKey};

use super::{LedgerStore, StoreError, StoreResult};
use crate::model::{
    AccountShare, AccountSharePeriod, BalanceSumCheckpoint, SharePool, WithdrawalCheckpoint,
};

/// Ledger state in a SQLite database.
pub struct SqliteStore {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStore {
    /// Open or create a ledger database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self::from_connection(sharepool_db::open(path)?))
    }

    /// Open a fresh in-memory database.
    pub fn open_memory() -> StoreResult<Self> {
        Ok(Self::from_connection(sharepool_db::open_memory()?))
    }

    /// Wrap a connection that already carries the ledger schema.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            in_transaction: false,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Stored events of `pool` after sequence number `after`.
    pub fn events(
        &self,
        pool: &PoolKey,
        after: u64,
        limit: u32,
    ) -> StoreResult<Vec<events::EventRow>> {
        Ok(events::list_for_pool(&self.conn, pool, after, limit)?)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.conn.path())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

fn checkpoint_from_row(row: checkpoints::CheckpointRow) -> BalanceSumCheckpoint {
    BalanceSumCheckpoint {
        total_bps: row.total_bps,
        cumulative: row.balances,
    }
}

fn share_from_row(row: accounts::AccountRow) -> AccountShare {
    AccountShare {
        periods: row
            .periods
            .into_iter()
            .map(|p| AccountSharePeriod {
                bps: p.bps,
                start_index: p.start_index,
                end_index: p.end_index,
            })
            .collect(),
        active_period: row.active_period,
        created_at: row.created_at,
        removable_at: row.removable_at,
        delegates: row.delegates.into_iter().collect(),
    }
}

fn share_to_row(account: &Address, share: &AccountShare) -> accounts::AccountRow {
    accounts::AccountRow {
        account: *account,
        active_period: share.active_period,
        created_at: share.created_at,
        removable_at: share.removable_at,
        periods: share
            .periods
            .iter()
            .map(|p| accounts::PeriodRow {
                bps: p.bps,
                start_index: p.start_index,
                end_index: p.end_index,
            })
            .collect(),
        delegates: share.delegates.iter().copied().collect(),
    }
}

impl LedgerStore for SqliteStore {
    fn begin(&mut self) -> StoreResult<()> {
        if self.in_transaction {
            return Err(StoreError::Transaction("transaction already open"));
        }
        sharepool_db::begin(&self.conn)?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("commit without open transaction"));
        }
        sharepool_db::commit(&self.conn)?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("rollback without open transaction"));
        }
        self.in_transaction = false;
        sharepool_db::rollback(&self.conn)?;
        Ok(())
    }

    fn pool(&self, pool: &PoolKey) -> StoreResult<Option<SharePool>> {
        Ok(pools::get(&self.conn, &pool.client, pool.pool_id)?.map(|row| SharePool {
            total_bps: row.total_bps,
            checkpoint_count: row.checkpoint_count,
            created_at: row.created_at,
        }))
    }

    fn put_pool(&mut self, pool: &PoolKey, state: &SharePool) -> StoreResult<()> {
        pools::upsert(
            &self.conn,
            &pool.client,
            pool.pool_id,
            state.total_bps,
            state.checkpoint_count,
            state.created_at,
        )?;
        Ok(())
    }

    fn pools(&self) -> StoreResult<Vec<PoolKey>> {
        Ok(pools::list(&self.conn)?)
    }

    fn checkpoint(
        &self,
        pool: &PoolKey,
        index: CheckpointIndex,
    ) -> StoreResult<Option<BalanceSumCheckpoint>> {
        Ok(checkpoints::get(&self.conn, &pool.client, pool.pool_id, index)?
            .map(checkpoint_from_row))
    }

    fn checkpoints(
        &self,
        pool: &PoolKey,
        range: Range<CheckpointIndex>,
    ) -> StoreResult<Vec<BalanceSumCheckpoint>> {
        let rows = checkpoints::range(&self.conn, &pool.client, pool.pool_id, range.clone())?;
        let mut expected = range.start;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if row.index != expected {
                return Err(StoreError::Corrupt(format!(
                    "checkpoint log of {pool} has a gap at {expected}"
                )));
            }
            expected += 1;
            out.push(checkpoint_from_row(row));
        }
        Ok(out)
    }

    fn append_checkpoint(
        &mut self,
        pool: &PoolKey,
        index: CheckpointIndex,
        checkpoint: &BalanceSumCheckpoint,
    ) -> StoreResult<()> {
        if index > 0
            && checkpoints::get(&self.conn, &pool.client, pool.pool_id, index - 1)?.is_none()
        {
            return Err(StoreError::Corrupt(format!(
                "checkpoint {index} appended without predecessor"
            )));
        }
        checkpoints::insert(
            &self.conn,
            &pool.client,
            pool.pool_id,
            index,
            checkpoint.total_bps,
            &checkpoint.cumulative,
        )?;
        Ok(())
    }

    fn account(&self, pool: &PoolKey, account: &Address) -> StoreResult<Option<AccountShare>> {
        Ok(accounts::get(&self.conn, &pool.client, pool.pool_id, account)?.map(share_from_row))
    }

    fn put_account(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        share: &AccountShare,
    ) -> StoreResult<()> {
        accounts::upsert(
            &self.conn,
            &pool.client,
            pool.pool_id,
            &share_to_row(account, share),
        )?;
        Ok(())
    }

    fn accounts(&self, pool: &PoolKey) -> StoreResult<Vec<(Address, AccountShare)>> {
        Ok(accounts::list(&self.conn, &pool.client, pool.pool_id)?
            .into_iter()
            .map(|row| (row.account, share_from_row(row)))
            .collect())
    }

    fn withdrawal_checkpoint(
        &self,
        pool: &PoolKey,
        account: &Address,
        period: PeriodIndex,
        asset: &AssetId,
    ) -> StoreResult<Option<WithdrawalCheckpoint>> {
        let key = withdrawals::WithdrawalKey {
            account,
            period_index: period,
            asset,
        };
        Ok(withdrawals::get(&self.conn, &pool.client, pool.pool_id, key)?.map(
            |(processed_until, cumulative)| WithdrawalCheckpoint {
                processed_until,
                cumulative,
            },
        ))
    }

    fn put_withdrawal_checkpoint(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        period: PeriodIndex,
        asset: &AssetId,
        checkpoint: &WithdrawalCheckpoint,
    ) -> StoreResult<()> {
        let key = withdrawals::WithdrawalKey {
            account,
            period_index: period,
            asset,
        };
        withdrawals::upsert(
            &self.conn,
            &pool.client,
            pool.pool_id,
            key,
            checkpoint.processed_until,
            checkpoint.cumulative,
        )?;
        Ok(())
    }

    fn consume_nonce(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        nonce: u64,
    ) -> StoreResult<bool> {
        Ok(nonces::consume(
            &self.conn,
            &pool.client,
            pool.pool_id,
            account,
            nonce,
        )?)
    }

    fn append_events(&mut self, batch: &[LedgerEvent]) -> StoreResult<()> {
        for event in batch {
            events::append(&self.conn, event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PoolKey {
        PoolKey::new(Address::from_bytes([1; 32]), 3)
    }

    fn store_with_pool() -> SqliteStore {
        let mut store = SqliteStore::open_memory().expect("open");
        store.begin().expect("begin");
        store
            .put_pool(
                &pool(),
                &SharePool {
                    total_bps: 1000,
                    checkpoint_count: 0,
                    created_at: 5,
                },
            )
            .expect("put pool");
        store.commit().expect("commit");
        store
    }

    #[test]
    fn test_account_round_trip() {
        let mut store = store_with_pool();
        let account = Address::from_bytes([2; 32]);
        let mut share = AccountShare::new(5, 50);
        share.open_period(1000, 0);
        share.close_active(3);
        share.open_period(2500, 3);
        share.delegates.insert(Address::ANY);

        store.begin().expect("begin");
        store.put_account(&pool(), &account, &share).expect("put");
        store.commit().expect("commit");

        let loaded = store.account(&pool(), &account).expect("get").expect("exists");
        assert_eq!(loaded, share);
        assert!(loaded.has_wildcard_delegate());
        assert_eq!(store.accounts(&pool()).expect("list").len(), 1);
    }

    #[test]
    fn test_checkpoint_log() {
        let mut store = store_with_pool();
        let asset = AssetId::NATIVE;
        let first = BalanceSumCheckpoint::default()
            .next(1000, asset, 100)
            .expect("no overflow");
        let second = first.next(1000, asset, 50).expect("no overflow");

        store.begin().expect("begin");
        assert!(store.append_checkpoint(&pool(), 1, &first).is_err());
        store.append_checkpoint(&pool(), 0, &first).expect("first");
        store.append_checkpoint(&pool(), 1, &second).expect("second");
        store.commit().expect("commit");

        let loaded = store.checkpoints(&pool(), 0..10).expect("range");
        assert_eq!(loaded, vec![first, second.clone()]);
        assert_eq!(store.checkpoint(&pool(), 1).expect("get"), Some(second));
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut store = store_with_pool();
        let account = Address::from_bytes([2; 32]);

        store.begin().expect("begin");
        assert!(store.consume_nonce(&pool(), &account, 1).expect("nonce"));
        store
            .append_events(&[LedgerEvent::PoolCreated {
                pool: pool(),
                at: 9,
            }])
            .expect("events");
        store.rollback().expect("rollback");

        assert!(store.events(&pool(), 0, 10).expect("events").is_empty());
        store.begin().expect("begin");
        assert!(store.consume_nonce(&pool(), &account, 1).expect("nonce"));
        store.commit().expect("commit");
    }

    #[test]
    fn test_withdrawal_checkpoint_round_trip() {
        let mut store = store_with_pool();
        let account = Address::from_bytes([2; 32]);
        let mut share = AccountShare::new(5, 5);
        share.open_period(1000, 0);
        let resume = WithdrawalCheckpoint {
            processed_until: 4,
            cumulative: u128::MAX,
        };

        store.begin().expect("begin");
        store.put_account(&pool(), &account, &share).expect("put");
        store
            .put_withdrawal_checkpoint(&pool(), &account, 0, &AssetId::NATIVE, &resume)
            .expect("put resume");
        store.commit().expect("commit");

        assert_eq!(
            store
                .withdrawal_checkpoint(&pool(), &account, 0, &AssetId::NATIVE)
                .expect("get"),
            Some(resume)
        );
        assert!(store
            .withdrawal_checkpoint(&pool(), &account, 1, &AssetId::NATIVE)
            .expect("get")
            .is_none());
    }
}
