//! Inflow allocation and checkpoint creation.
//!
//! The custodian reports each inflow; the pool's bps-weighted share of it is
//! recorded as a new checkpoint and returned so the custodian can keep that
//! amount out of its spendable balance.
//!
//! Inflows that allocate nothing (no members, or an amount too small to
//! round to one unit) append no checkpoint. The checkpoint log therefore
//! only grows when value actually accrues to the pool.

use sharepool_types::events::LedgerEvent;
use sharepool_types::{Amount, AssetId, Bps, PoolKey, MAX_BPS};

use crate::custody::{Custodian, Inflow};
use crate::events::EventSink;
use crate::ledger::{Ledger, Txn};
use crate::settlement::pro_rata;
use crate::store::LedgerStore;
use crate::{LedgerError, Result};

/// The pool's share of an inflow: `floor(amount * total_bps / 10000)`.
///
/// # Errors
///
/// - [`LedgerError::BpsBudgetExceeded`] if `total_bps` is above 10000
pub fn allocation(amount: Amount, total_bps: Bps) -> Result<Amount> {
    if total_bps > MAX_BPS {
        return Err(LedgerError::BpsBudgetExceeded {
            attempted: u32::from(total_bps),
        });
    }
    pro_rata(amount, total_bps, MAX_BPS).ok_or(LedgerError::Overflow)
}

impl<S: LedgerStore, C: Custodian> Txn<'_, S, C> {
    pub(crate) fn process_inflow(
        &mut self,
        pool: &PoolKey,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<Amount> {
        let Some(mut state) = self.store.pool(pool)? else {
            tracing::debug!(%pool, %asset, amount, "inflow to unknown pool, nothing allocated");
            return Ok(0);
        };

        let allocated = allocation(amount, state.total_bps)?;
        if allocated == 0 {
            tracing::debug!(%pool, %asset, amount, total_bps = state.total_bps, "zero allocation, no checkpoint");
            return Ok(0);
        }

        let index = state.checkpoint_count;
        let previous = match index.checked_sub(1) {
            Some(last) => self.store.checkpoint(pool, last)?.ok_or_else(|| {
                LedgerError::Store(crate::StoreError::Corrupt(format!(
                    "pool {pool} missing checkpoint {last}"
                )))
            })?,
            None => Default::default(),
        };
        let checkpoint = previous
            .next(state.total_bps, *asset, allocated)
            .ok_or(LedgerError::Overflow)?;

        self.store.append_checkpoint(pool, index, &checkpoint)?;
        state.checkpoint_count = index + 1;
        self.store.put_pool(pool, &state)?;

        let cumulative = checkpoint.cumulative_of(asset);
        tracing::debug!(%pool, index, %asset, amount, allocated, cumulative, "checkpoint created");
        self.emit(LedgerEvent::CheckpointCreated {
            pool: *pool,
            index,
            asset: *asset,
            inflow: amount,
            allocated,
            cumulative,
            total_bps: state.total_bps,
        });
        Ok(allocated)
    }

    /// Drain the custodian's unreported inflows for `pool`, checkpoint each
    /// one and reserve what was allocated.
    pub(crate) fn flush_pending(&mut self, pool: &PoolKey) -> Result<Vec<(Inflow, Amount)>> {
        let pending = self.custodian.drain_pending(pool)?;
        let mut processed = Vec::with_capacity(pending.len());
        for inflow in pending {
            let allocated = self.process_inflow(pool, &inflow.asset, inflow.amount)?;
            if allocated > 0 {
                self.custodian.reserve(pool, &inflow.asset, allocated)?;
            }
            processed.push((inflow, allocated));
        }
        Ok(processed)
    }
}

impl<S: LedgerStore, C: Custodian, E: EventSink> Ledger<S, C, E> {
    /// Record an inflow of `amount` of `asset` that the custodian has
    /// already received for `pool`.
    ///
    /// Returns the amount allocated to the pool, which the caller must keep
    /// out of its spendable balance. Unknown pools and pools without members
    /// allocate zero.
    pub fn process_inflow(&mut self, pool: &PoolKey, asset: &AssetId, amount: Amount) -> Result<Amount> {
        self.atomically(|txn| txn.process_inflow(pool, asset, amount))
    }

    /// Pull the custodian's queued inflows for `pool` into the checkpoint
    /// log, reserving each allocation with the custodian.
    pub fn flush_pending_inflows(&mut self, pool: &PoolKey) -> Result<Vec<(Inflow, Amount)>> {
        self.atomically(|txn| txn.flush_pending(pool))
    }
}
