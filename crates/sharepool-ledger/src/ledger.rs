//! The ledger engine.
//!
//! [`Ledger`] owns a store, a custodian and an event sink. Every mutating
//! call runs inside [`Ledger::atomically`]: one store transaction joined by
//! the custodian's unit of work, events buffered until commit, and a
//! rollback of both on any error. The operations
//! themselves live in [`crate::membership`], [`crate::deposit`] and
//! [`crate::withdrawal`] as methods on [`Txn`].

use sharepool_types::events::LedgerEvent;
use sharepool_types::{
    Address, AssetId, Bps, CheckpointIndex, PeriodIndex, PoolKey, Timestamp,
};

use crate::custody::Custodian;
use crate::events::{EventLog, EventSink};
use crate::limits::LedgerLimits;
use crate::model::{
    AccountShare, AccountSharePeriod, BalanceSumCheckpoint, SharePool, WithdrawalCheckpoint,
};
use crate::store::LedgerStore;
use crate::{LedgerError, Result};

/// Proportional revenue-sharing ledger.
pub struct Ledger<S, C, E = EventLog> {
    store: S,
    custodian: C,
    sink: E,
    limits: LedgerLimits,
}

/// State visible to an operation while its transaction is open.
pub struct Txn<'a, S, C> {
    pub(crate) store: &'a mut S,
    pub(crate) custodian: &'a mut C,
    pub(crate) limits: LedgerLimits,
    events: Vec<LedgerEvent>,
    /// Prefix of `events` already appended to the store.
    persisted: usize,
}

impl<S: LedgerStore, C: Custodian, E: EventSink> Ledger<S, C, E> {
    pub fn new(store: S, custodian: C, sink: E) -> Self {
        Self {
            store,
            custodian,
            sink,
            limits: LedgerLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: LedgerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> &LedgerLimits {
        &self.limits
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn custodian(&self) -> &C {
        &self.custodian
    }

    /// Mutable access to the custodian, for hosts that feed it inflows.
    pub fn custodian_mut(&mut self) -> &mut C {
        &mut self.custodian
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    pub fn into_parts(self) -> (S, C, E) {
        (self.store, self.custodian, self.sink)
    }

    /// Run `op` inside one store transaction and one custodian unit of work.
    ///
    /// On success the remaining buffered events are appended to the store,
    /// the store commits, then the custodian, and the events reach the sink.
    /// On any error both roll back and no event is published.
    pub(crate) fn atomically<T>(
        &mut self,
        op: impl FnOnce(&mut Txn<'_, S, C>) -> Result<T>,
    ) -> Result<T> {
        self.store.begin()?;
        if let Err(err) = self.custodian.begin() {
            self.rollback_store();
            return Err(err.into());
        }

        let mut txn = Txn {
            store: &mut self.store,
            custodian: &mut self.custodian,
            limits: self.limits,
            events: Vec::new(),
            persisted: 0,
        };
        let outcome = op(&mut txn).and_then(|value| {
            txn.persist_events()?;
            Ok(value)
        });
        let events = std::mem::take(&mut txn.events);

        match outcome {
            Ok(value) => {
                if let Err(err) = self.store.commit() {
                    self.abort();
                    return Err(err.into());
                }
                self.custodian.commit();
                for event in events {
                    self.sink.emit(event);
                }
                Ok(value)
            }
            Err(err) => {
                self.abort();
                tracing::debug!(error = %err, "ledger call aborted");
                Err(err)
            }
        }
    }

    fn rollback_store(&mut self) {
        if let Err(err) = self.store.rollback() {
            tracing::error!(error = %err, "store rollback failed");
        }
    }

    fn abort(&mut self) {
        self.rollback_store();
        if let Err(err) = self.custodian.rollback() {
            tracing::error!(error = %err, "custodian rollback failed");
        }
    }

    // Read-only queries

    /// Pool state.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownPool`] if the pool has never been created
    pub fn pool(&self, pool: &PoolKey) -> Result<SharePool> {
        self.store
            .pool(pool)?
            .ok_or(LedgerError::UnknownPool(*pool))
    }

    /// Current sum of active bps.
    pub fn total_bps(&self, pool: &PoolKey) -> Result<Bps> {
        Ok(self.pool(pool)?.total_bps)
    }

    /// Length of the pool's checkpoint log.
    pub fn checkpoint_count(&self, pool: &PoolKey) -> Result<CheckpointIndex> {
        Ok(self.pool(pool)?.checkpoint_count)
    }

    /// The checkpoint at `index`, if the log is that long.
    pub fn checkpoint(
        &self,
        pool: &PoolKey,
        index: CheckpointIndex,
    ) -> Result<Option<BalanceSumCheckpoint>> {
        Ok(self.store.checkpoint(pool, index)?)
    }

    /// An account's full share record.
    pub fn account_share(&self, pool: &PoolKey, account: &Address) -> Result<AccountShare> {
        self.store
            .account(pool, account)?
            .ok_or(LedgerError::UnknownAccount {
                pool: *pool,
                account: *account,
            })
    }

    /// One of an account's periods.
    pub fn period(
        &self,
        pool: &PoolKey,
        account: &Address,
        period_index: PeriodIndex,
    ) -> Result<AccountSharePeriod> {
        let share = self.account_share(pool, account)?;
        share
            .period(period_index)
            .copied()
            .ok_or(LedgerError::UnknownPeriod {
                account: *account,
                period_index,
                period_count: share.periods.len(),
            })
    }

    /// Resume state for one (account, period, asset), if any withdrawal has
    /// advanced it.
    pub fn withdrawal_checkpoint(
        &self,
        pool: &PoolKey,
        account: &Address,
        period_index: PeriodIndex,
        asset: &AssetId,
    ) -> Result<Option<WithdrawalCheckpoint>> {
        Ok(self
            .store
            .withdrawal_checkpoint(pool, account, period_index, asset)?)
    }

    /// Every pool known to the store.
    pub fn pools(&self) -> Result<Vec<PoolKey>> {
        Ok(self.store.pools()?)
    }
}

impl<S: LedgerStore, C: Custodian> Txn<'_, S, C> {
    pub(crate) fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    /// Append the events emitted so far to the store. The sink still only
    /// sees them once the transaction commits.
    pub(crate) fn persist_events(&mut self) -> Result<()> {
        let fresh = self.events.get(self.persisted..).unwrap_or_default();
        if !fresh.is_empty() {
            self.store.append_events(fresh)?;
        }
        self.persisted = self.events.len();
        Ok(())
    }

    pub(crate) fn load_pool(&self, pool: &PoolKey) -> Result<SharePool> {
        self.store
            .pool(pool)?
            .ok_or(LedgerError::UnknownPool(*pool))
    }

    /// Load `pool`, creating it on first use.
    pub(crate) fn load_or_create_pool(&mut self, pool: &PoolKey, now: Timestamp) -> Result<SharePool> {
        if let Some(state) = self.store.pool(pool)? {
            return Ok(state);
        }
        let state = SharePool {
            created_at: now,
            ..SharePool::default()
        };
        self.store.put_pool(pool, &state)?;
        self.emit(LedgerEvent::PoolCreated {
            pool: *pool,
            at: now,
        });
        tracing::info!(%pool, "share pool created");
        Ok(state)
    }

    pub(crate) fn load_account(&self, pool: &PoolKey, account: &Address) -> Result<AccountShare> {
        self.store
            .account(pool, account)?
            .ok_or(LedgerError::UnknownAccount {
                pool: *pool,
                account: *account,
            })
    }
}
