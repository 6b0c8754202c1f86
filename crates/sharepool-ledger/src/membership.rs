//! Membership lifecycle.
//!
//! Adding an account opens a period at the current checkpoint count;
//! removing one closes its active period there; changing bps does both at
//! the same boundary. Every mutation first flushes the custodian's pending
//! inflows so earlier value is attributed under the old membership.
//!
//! ## Validation order
//!
//! All inputs are validated before the flush. A call that fails validation
//! leaves the custodian's queue untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sharepool_types::events::LedgerEvent;
use sharepool_types::{Address, Bps, PoolKey, Timestamp};

use crate::custody::Custodian;
use crate::events::EventSink;
use crate::ledger::{Ledger, Txn};
use crate::limits::LedgerLimits;
use crate::model::{within_budget, AccountShare};
use crate::store::LedgerStore;
use crate::{LedgerError, Result};

/// One entry of an add batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub account: Address,
    pub bps: Bps,
    /// Earliest time the account may be removed or have its bps decreased.
    pub removable_at: Timestamp,
    /// Initially approved withdrawal delegates.
    #[serde(default)]
    pub delegates: Vec<Address>,
}

impl ShareGrant {
    pub fn new(account: Address, bps: Bps, removable_at: Timestamp) -> Self {
        Self {
            account,
            bps,
            removable_at,
            delegates: Vec::new(),
        }
    }

    pub fn with_delegates(mut self, delegates: impl IntoIterator<Item = Address>) -> Self {
        self.delegates.extend(delegates);
        self
    }
}

/// Direction of a bps change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BpsChange {
    Increase,
    Decrease,
}

fn check_removable(share: &AccountShare, account: &Address, now: Timestamp) -> Result<()> {
    if now < share.removable_at {
        return Err(LedgerError::NotYetRemovable {
            account: *account,
            removable_at: share.removable_at,
            now,
        });
    }
    Ok(())
}

fn check_batch(len: usize, limits: &LedgerLimits) -> Result<()> {
    if len == 0 {
        return Err(LedgerError::EmptyBatch);
    }
    LedgerLimits::check("batch size", len, limits.max_batch_size)
}

impl<S: LedgerStore, C: Custodian> Txn<'_, S, C> {
    fn add_account_shares(
        &mut self,
        pool: &PoolKey,
        grants: &[ShareGrant],
        now: Timestamp,
    ) -> Result<()> {
        check_batch(grants.len(), &self.limits)?;

        let current_total = self.store.pool(pool)?.map_or(0, |p| p.total_bps);
        let mut total = u32::from(current_total);
        let mut seen = BTreeSet::new();
        let mut existing = Vec::with_capacity(grants.len());
        for grant in grants {
            if grant.account.is_wildcard() {
                return Err(LedgerError::ReservedAddress);
            }
            if grant.bps == 0 {
                return Err(LedgerError::ZeroBps(grant.account));
            }
            if !seen.insert(grant.account) {
                return Err(LedgerError::DuplicateAccount(grant.account));
            }
            let share = self.store.account(pool, &grant.account)?;
            if share.as_ref().is_some_and(|s| s.active().is_some()) {
                return Err(LedgerError::AlreadyActive(grant.account));
            }
            let delegates: BTreeSet<&Address> = share
                .iter()
                .flat_map(|s| s.delegates.iter())
                .chain(grant.delegates.iter())
                .collect();
            LedgerLimits::check("delegates", delegates.len(), self.limits.max_delegates)?;
            existing.push(share);

            total += u32::from(grant.bps);
            if !within_budget(total) {
                return Err(LedgerError::BpsBudgetExceeded { attempted: total });
            }
        }

        self.load_or_create_pool(pool, now)?;
        self.flush_pending(pool)?;
        let mut state = self.load_pool(pool)?;
        let start_index = state.checkpoint_count;

        for (grant, share) in grants.iter().zip(existing) {
            let mut share = share.unwrap_or_else(|| AccountShare::new(now, grant.removable_at));
            share.removable_at = grant.removable_at;
            let period_index = share.open_period(grant.bps, start_index);
            state.total_bps += grant.bps;

            let mut approved = Vec::new();
            for delegate in &grant.delegates {
                if share.delegates.insert(*delegate) {
                    approved.push(*delegate);
                }
            }
            self.store.put_account(pool, &grant.account, &share)?;

            tracing::info!(
                %pool,
                account = %grant.account,
                bps = grant.bps,
                period_index,
                start_index,
                "account share added"
            );
            self.emit(LedgerEvent::AccountShareAdded {
                pool: *pool,
                account: grant.account,
                period_index,
                bps: grant.bps,
                start_index,
                removable_at: grant.removable_at,
                pool_total_bps: state.total_bps,
            });
            for delegate in approved {
                self.emit(LedgerEvent::WithdrawalDelegateUpdated {
                    pool: *pool,
                    account: grant.account,
                    delegate,
                    approved: true,
                });
            }
        }

        self.store.put_pool(pool, &state)?;
        Ok(())
    }

    fn remove_account_shares(
        &mut self,
        pool: &PoolKey,
        accounts: &[Address],
        now: Timestamp,
    ) -> Result<()> {
        check_batch(accounts.len(), &self.limits)?;
        self.load_pool(pool)?;

        let mut seen = BTreeSet::new();
        let mut shares = Vec::with_capacity(accounts.len());
        for account in accounts {
            if !seen.insert(*account) {
                return Err(LedgerError::DuplicateAccount(*account));
            }
            let share = self.load_account(pool, account)?;
            if share.active().is_none() {
                return Err(LedgerError::NoActivePeriod(*account));
            }
            check_removable(&share, account, now)?;
            shares.push(share);
        }

        self.flush_pending(pool)?;
        let mut state = self.load_pool(pool)?;
        let end_index = state.checkpoint_count;

        for (account, mut share) in accounts.iter().zip(shares) {
            let (period_index, bps) = share
                .close_active(end_index)
                .ok_or(LedgerError::NoActivePeriod(*account))?;
            state.total_bps = state
                .total_bps
                .checked_sub(bps)
                .ok_or(LedgerError::BpsUnderflow {
                    current: state.total_bps,
                    delta: bps,
                })?;
            self.store.put_account(pool, account, &share)?;

            tracing::info!(%pool, %account, period_index, end_index, "account share removed");
            self.emit(LedgerEvent::AccountShareRemoved {
                pool: *pool,
                account: *account,
                period_index,
                end_index,
                pool_total_bps: state.total_bps,
            });
        }

        self.store.put_pool(pool, &state)?;
        Ok(())
    }

    fn change_bps(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        delta: Bps,
        change: BpsChange,
        now: Timestamp,
    ) -> Result<()> {
        if delta == 0 {
            return Err(LedgerError::ZeroDelta);
        }
        let state = self.load_pool(pool)?;
        let share = self.load_account(pool, account)?;
        let current = share
            .active()
            .map(|(_, p)| p.bps)
            .ok_or(LedgerError::NoActivePeriod(*account))?;

        let new_bps = match change {
            BpsChange::Increase => {
                let attempted = u32::from(state.total_bps) + u32::from(delta);
                if !within_budget(attempted) {
                    return Err(LedgerError::BpsBudgetExceeded { attempted });
                }
                current + delta
            }
            BpsChange::Decrease => {
                check_removable(&share, account, now)?;
                current
                    .checked_sub(delta)
                    .ok_or(LedgerError::BpsUnderflow { current, delta })?
            }
        };

        self.flush_pending(pool)?;
        let mut state = self.load_pool(pool)?;
        let mut share = share;
        let boundary_index = state.checkpoint_count;

        let (closed_period_index, old_bps) = share
            .close_active(boundary_index)
            .ok_or(LedgerError::NoActivePeriod(*account))?;
        let opened_period_index = share.open_period(new_bps, boundary_index);
        state.total_bps = state.total_bps - old_bps + new_bps;

        self.store.put_account(pool, account, &share)?;
        self.store.put_pool(pool, &state)?;

        tracing::info!(
            %pool,
            %account,
            old_bps,
            new_bps,
            boundary_index,
            "account bps changed"
        );
        self.emit(LedgerEvent::AccountShareBpsChanged {
            pool: *pool,
            account: *account,
            closed_period_index,
            opened_period_index,
            old_bps,
            new_bps,
            boundary_index,
            pool_total_bps: state.total_bps,
        });
        Ok(())
    }

    fn set_withdrawal_delegates(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        updates: &[(Address, bool)],
    ) -> Result<()> {
        check_batch(updates.len(), &self.limits)?;
        self.load_pool(pool)?;
        let mut share = self.load_account(pool, account)?;

        let mut changed = Vec::new();
        for (delegate, approved) in updates {
            let applied = if *approved {
                share.delegates.insert(*delegate)
            } else {
                share.delegates.remove(delegate)
            };
            if applied {
                changed.push((*delegate, *approved));
            }
        }
        LedgerLimits::check("delegates", share.delegates.len(), self.limits.max_delegates)?;

        self.store.put_account(pool, account, &share)?;
        for (delegate, approved) in changed {
            tracing::info!(%pool, %account, %delegate, approved, "withdrawal delegate updated");
            self.emit(LedgerEvent::WithdrawalDelegateUpdated {
                pool: *pool,
                account: *account,
                delegate,
                approved,
            });
        }
        Ok(())
    }
}

impl<S: LedgerStore, C: Custodian, E: EventSink> Ledger<S, C, E> {
    /// Register accounts in `pool`, creating the pool on first use.
    ///
    /// Each grant opens a period starting at the current checkpoint count.
    /// The bps budget is checked cumulatively across the batch.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EmptyBatch`] if `grants` is empty
    /// - [`LedgerError::ZeroBps`], [`LedgerError::DuplicateAccount`],
    ///   [`LedgerError::ReservedAddress`] for malformed entries
    /// - [`LedgerError::AlreadyActive`] if an account already holds a share
    /// - [`LedgerError::BpsBudgetExceeded`] if the pool total would pass 10000
    pub fn add_account_shares(
        &mut self,
        pool: &PoolKey,
        grants: &[ShareGrant],
        now: Timestamp,
    ) -> Result<()> {
        self.atomically(|txn| txn.add_account_shares(pool, grants, now))
    }

    /// Close the active period of each account.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotYetRemovable`] if `now` is before an account's
    ///   removable time
    /// - [`LedgerError::UnknownPool`], [`LedgerError::UnknownAccount`],
    ///   [`LedgerError::NoActivePeriod`]
    pub fn remove_account_shares(
        &mut self,
        pool: &PoolKey,
        accounts: &[Address],
        now: Timestamp,
    ) -> Result<()> {
        self.atomically(|txn| txn.remove_account_shares(pool, accounts, now))
    }

    /// Self-service removal: `caller` leaves `pool`.
    pub fn remove_self(&mut self, pool: &PoolKey, caller: &Address, now: Timestamp) -> Result<()> {
        self.atomically(|txn| txn.remove_account_shares(pool, std::slice::from_ref(caller), now))
    }

    /// Raise an account's bps by `delta`. No timing restriction.
    pub fn increase_bps(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        delta: Bps,
        now: Timestamp,
    ) -> Result<()> {
        self.atomically(|txn| txn.change_bps(pool, account, delta, BpsChange::Increase, now))
    }

    /// Lower an account's bps by `delta`. Requires `now >= removable_at`.
    /// Lowering to exactly zero keeps a zero-bps period open.
    pub fn decrease_bps(
        &mut self,
        pool: &PoolKey,
        account: &Address,
        delta: Bps,
        now: Timestamp,
    ) -> Result<()> {
        self.atomically(|txn| txn.change_bps(pool, account, delta, BpsChange::Decrease, now))
    }

    /// Approve or revoke withdrawal delegates. Only the account itself may
    /// manage its delegates, so `caller` names the account.
    pub fn set_withdrawal_delegates(
        &mut self,
        pool: &PoolKey,
        caller: &Address,
        updates: &[(Address, bool)],
    ) -> Result<()> {
        self.atomically(|txn| txn.set_withdrawal_delegates(pool, caller, updates))
    }
}
