//! In-memory ledger store.
//!
//! Writes inside a transaction record how to undo themselves in a journal;
//! `rollback` replays it backwards. A call therefore costs only what it
//! touches, never the size of the stored history.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use sharepool_types::events::LedgerEvent;
use sharepool_types::{Address, AssetId, CheckpointIndex, PeriodIndex, PoolKey};

use super::{LedgerStore, StoreError, StoreResult};
use crate::model::{AccountShare, BalanceSumCheckpoint, SharePool, WithdrawalCheckpoint};

type WithdrawalKey = (PoolKey, Address, PeriodIndex, AssetId);

#[derive(Debug, Default)]
struct State {
    pools: BTreeMap<PoolKey, SharePool>,
    checkpoints: BTreeMap<PoolKey, Vec<BalanceSumCheckpoint>>,
    accounts: BTreeMap<(PoolKey, Address), AccountShare>,
    withdrawals: BTreeMap<WithdrawalKey, WithdrawalCheckpoint>,
    nonces: BTreeSet<(PoolKey, Address, u64)>,
    events: Vec<LedgerEvent>,
}

/// How to reverse one write.
#[derive(Debug)]
enum Undo {
    Pool(PoolKey, Option<SharePool>),
    /// A checkpoint was pushed onto the pool's log.
    Checkpoint(PoolKey),
    Account((PoolKey, Address), Option<AccountShare>),
    Withdrawal(WithdrawalKey, Option<WithdrawalCheckpoint>),
    Nonce((PoolKey, Address, u64)),
    /// The event log had this length before the append.
    Events(usize),
}

/// Ledger state held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: State,
    journal: Option<Vec<Undo>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event committed so far, in order.
    pub fn events(&self) -> &[LedgerEvent] {
        &self.state.events
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
    }

    fn undo(&mut self, undo: Undo) {
        let state = &mut self.state;
        match undo {
            Undo::Pool(key, previous) => restore(&mut state.pools, key, previous),
            Undo::Checkpoint(key) => {
                if let Some(log) = state.checkpoints.get_mut(&key) {
                    log.pop();
                }
            }
            Undo::Account(key, previous) => restore(&mut state.accounts, key, previous),
            Undo::Withdrawal(key, previous) => restore(&mut state.withdrawals, key, previous),
            Undo::Nonce(key) => {
                state.nonces.remove(&key);
            }
            Undo::Events(len) => state.events.truncate(len),
        }
    }
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => map.insert(key, value),
        None => map.remove(&key),
    };
}

impl LedgerStore for MemoryStore {
    fn begin(&mut self) -> StoreResult<()> {
        if self.journal.is_some() {
            return Err(StoreError::Transaction("transaction already open"));
        }
        self.journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.journal
            .take()
            .map(|_| ())
            .ok_or(StoreError::Transaction("commit without open transaction"))
    }

    fn rollback(&mut self) -> StoreResult<()> {
        let journal = self
            .journal
            .take()
            .ok_or(StoreError::Transaction("rollback without open transaction"))?;
        for undo in journal.into_iter().rev() {
            self.undo(undo);
        }
        Ok(())
    }

    fn pool(&self, pool: &PoolKey) -> StoreResult<Option<SharePool>> {
        Ok(self.state.pools.get(pool).cloned())
    }

    fn put_pool(&mut self, pool: &PoolKey, state: &SharePool) -> StoreResult<()> {
        let previous = self.state.pools.insert(*pool, state.clone());
        self.record(Undo::Pool(*pool, previous));
        Ok(())
    }

    fn pools(&self) -> StoreResult<Vec<PoolKey>> {
        Ok(self.state.pools.keys().copied().collect())
    }

    fn checkpoint(
        &self,
        pool: &PoolKey,
        index: CheckpointIndex,
    ) -> StoreResult<Option<BalanceSumCheckpoint>> {
        Ok(self
            .state
            .checkpoints
            .get(pool)
            .and_then(|log| log.get(index as usize))
            .cloned())
    }

    fn checkpoints(
        &self,
        pool: &PoolKey,
        range: Range<CheckpointIndex>,
    ) -> StoreResult<Vec<BalanceSumCheckpoint>> {
        let Some(log) = self.state.checkpoints.get(pool) else {
            return Ok(Vec::new());
        };
        let end = (range.end as usize).min(log.len());
        let start = (range.start as usize).min(end);
        Ok(log[start..end].to_vec())
    }

    fn append_checkpoint(
        &mut self,
        pool: &PoolKey,
        index: CheckpointIndex,
        checkpoint: &BalanceSumCheckpoint,
    ) -> StoreResult<()> {
        let log = self.state.checkpoints.entry(*pool).or_default();
        if log.len() as CheckpointIndex != index {
            return Err(StoreError::Corrupt(format!(
                "checkpoint {index} appended to log of length {}",
                log.len()
            )));
        }
        log.push(checkpoint.clone());
        self.record(Undo::Checkpoint(*pool));
        Ok(())
    }

    fn account(&self, pool: &PoolKey, account: &Address) -> StoreResult<Option<AccountShare>> {
        Ok(self.state.accounts.get(&(*pool, *account)).cloned())
    }

    fn put_account(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        share: &AccountShare,
    ) -> StoreResult<()> {
        let key = (*pool, *account);
        let previous = self.state.accounts.insert(key, share.clone());
        self.record(Undo::Account(key, previous));
        Ok(())
    }

    fn accounts(&self, pool: &PoolKey) -> StoreResult<Vec<(Address, AccountShare)>> {
        Ok(self
            .state
            .accounts
            .iter()
            .filter(|((p, _), _)| p == pool)
            .map(|((_, account), share)| (*account, share.clone()))
            .collect())
    }

    fn withdrawal_checkpoint(
        &self,
        pool: &PoolKey,
        account: &Address,
        period: PeriodIndex,
        asset: &AssetId,
    ) -> StoreResult<Option<WithdrawalCheckpoint>> {
        Ok(self
            .state
            .withdrawals
            .get(&(*pool, *account, period, *asset))
            .copied())
    }

    fn put_withdrawal_checkpoint(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        period: PeriodIndex,
        asset: &AssetId,
        checkpoint: &WithdrawalCheckpoint,
    ) -> StoreResult<()> {
        let key = (*pool, *account, period, *asset);
        let previous = self.state.withdrawals.insert(key, *checkpoint);
        self.record(Undo::Withdrawal(key, previous));
        Ok(())
    }

    fn consume_nonce(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        nonce: u64,
    ) -> StoreResult<bool> {
        let key = (*pool, *account, nonce);
        let fresh = self.state.nonces.insert(key);
        if fresh {
            self.record(Undo::Nonce(key));
        }
        Ok(fresh)
    }

    fn append_events(&mut self, events: &[LedgerEvent]) -> StoreResult<()> {
        let len = self.state.events.len();
        self.state.events.extend_from_slice(events);
        self.record(Undo::Events(len));
        Ok(())
    }
}
