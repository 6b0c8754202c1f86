//! Persistent ledger records.
//!
//! Layout mirrors the stores keyed by `(pool)`, `(pool, index)`,
//! `(pool, account)` and `(pool, account, period, asset)`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sharepool_types::{
    Address, Amount, AssetId, Bps, CheckpointIndex, PeriodIndex, Timestamp, MAX_BPS,
};

/// Pool-level state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePool {
    /// Sum of bps across all currently active periods. Never above 10000.
    pub total_bps: Bps,
    /// Length of the checkpoint log.
    pub checkpoint_count: CheckpointIndex,
    /// When the pool was implicitly created.
    pub created_at: Timestamp,
}

/// One entry of a pool's append-only checkpoint log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSumCheckpoint {
    /// The pool's total bps when this checkpoint was written.
    pub total_bps: Bps,
    /// Cumulative amount of each asset allocated to the pool through this
    /// checkpoint.
    pub cumulative: BTreeMap<AssetId, Amount>,
}

impl BalanceSumCheckpoint {
    /// Cumulative allocation of `asset`, zero if it never accrued.
    pub fn cumulative_of(&self, asset: &AssetId) -> Amount {
        self.cumulative.get(asset).copied().unwrap_or(0)
    }

    /// The checkpoint following this one after `allocated` more of `asset`
    /// accrued. Other assets carry forward unchanged.
    pub fn next(&self, total_bps: Bps, asset: AssetId, allocated: Amount) -> Option<Self> {
        let mut cumulative = self.cumulative.clone();
        let entry = cumulative.entry(asset).or_insert(0);
        *entry = entry.checked_add(allocated)?;
        Some(Self {
            total_bps,
            cumulative,
        })
    }
}

/// A span of checkpoint history during which an account's bps was constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSharePeriod {
    pub bps: Bps,
    /// First checkpoint index that accrues to this period (inclusive).
    pub start_index: CheckpointIndex,
    /// Index at which accrual stopped (exclusive); `None` while open.
    pub end_index: Option<CheckpointIndex>,
}

impl AccountSharePeriod {
    pub fn open(bps: Bps, start_index: CheckpointIndex) -> Self {
        Self {
            bps,
            start_index,
            end_index: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_index.is_none()
    }

    /// Exclusive end of the period, clamped to the current log length.
    pub fn effective_end(&self, checkpoint_count: CheckpointIndex) -> CheckpointIndex {
        self.end_index
            .map_or(checkpoint_count, |end| end.min(checkpoint_count))
    }

    /// Whether checkpoint `index` accrues to this period.
    pub fn contains(&self, index: CheckpointIndex) -> bool {
        index >= self.start_index && self.end_index.map_or(true, |end| index < end)
    }
}

/// Per (pool, account) membership record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountShare {
    pub periods: Vec<AccountSharePeriod>,
    /// Index of the open period, always the last one, if any.
    pub active_period: Option<PeriodIndex>,
    pub created_at: Timestamp,
    /// Earliest time the account may be removed or have its bps decreased.
    pub removable_at: Timestamp,
    /// Addresses allowed to trigger withdrawal for this account.
    pub delegates: BTreeSet<Address>,
}

impl AccountShare {
    pub fn new(created_at: Timestamp, removable_at: Timestamp) -> Self {
        Self {
            periods: Vec::new(),
            active_period: None,
            created_at,
            removable_at,
            delegates: BTreeSet::new(),
        }
    }

    /// The open period and its index.
    pub fn active(&self) -> Option<(PeriodIndex, &AccountSharePeriod)> {
        let index = self.active_period?;
        self.periods.get(index as usize).map(|p| (index, p))
    }

    /// Current bps, zero when the account is not active.
    pub fn current_bps(&self) -> Bps {
        self.active().map_or(0, |(_, p)| p.bps)
    }

    pub fn period(&self, index: PeriodIndex) -> Option<&AccountSharePeriod> {
        self.periods.get(index as usize)
    }

    /// Open a new period at `start_index` and make it active.
    pub(crate) fn open_period(&mut self, bps: Bps, start_index: CheckpointIndex) -> PeriodIndex {
        let index = self.periods.len() as PeriodIndex;
        self.periods.push(AccountSharePeriod::open(bps, start_index));
        self.active_period = Some(index);
        index
    }

    /// Close the active period at `end_index`, returning its index and bps.
    pub(crate) fn close_active(&mut self, end_index: CheckpointIndex) -> Option<(PeriodIndex, Bps)> {
        let index = self.active_period.take()?;
        let period = self.periods.get_mut(index as usize)?;
        period.end_index = Some(end_index);
        Some((index, period.bps))
    }

    /// Whether `caller` is covered by the delegate set.
    pub fn is_delegate(&self, caller: &Address) -> bool {
        self.delegates.contains(caller)
    }

    pub fn has_wildcard_delegate(&self) -> bool {
        self.delegates.contains(&Address::ANY)
    }
}

/// Resume state for one (account, period, asset) settlement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalCheckpoint {
    /// Exclusive checkpoint index up to which the tuple is settled and paid.
    pub processed_until: CheckpointIndex,
    /// Asset cumulative at `processed_until - 1`: the next diff baseline.
    pub cumulative: Amount,
}

/// Whether `bps` fits the pool budget.
pub fn within_budget(total: u32) -> bool {
    total <= u32::from(MAX_BPS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_next_carries_other_assets() {
        let a = AssetId::from_bytes([1; 32]);
        let b = AssetId::from_bytes([2; 32]);
        let first = BalanceSumCheckpoint::default()
            .next(1000, a, 100)
            .expect("no overflow");
        let second = first.next(1500, b, 40).expect("no overflow");

        assert_eq!(second.total_bps, 1500);
        assert_eq!(second.cumulative_of(&a), 100);
        assert_eq!(second.cumulative_of(&b), 40);
        assert_eq!(first.cumulative_of(&b), 0);
    }

    #[test]
    fn test_checkpoint_next_overflow() {
        let a = AssetId::NATIVE;
        let full = BalanceSumCheckpoint::default()
            .next(10_000, a, Amount::MAX)
            .expect("fits");
        assert!(full.next(10_000, a, 1).is_none());
    }

    #[test]
    fn test_period_bounds() {
        let mut period = AccountSharePeriod::open(500, 3);
        assert!(period.is_open());
        assert!(!period.contains(2));
        assert!(period.contains(3));
        assert!(period.contains(100));
        assert_eq!(period.effective_end(7), 7);

        period.end_index = Some(5);
        assert!(period.contains(4));
        assert!(!period.contains(5));
        assert_eq!(period.effective_end(7), 5);
        assert_eq!(period.effective_end(4), 4);
    }

    #[test]
    fn test_account_open_close() {
        let mut share = AccountShare::new(10, 20);
        assert_eq!(share.current_bps(), 0);

        let first = share.open_period(1000, 0);
        assert_eq!(first, 0);
        assert_eq!(share.current_bps(), 1000);

        assert_eq!(share.close_active(4), Some((0, 1000)));
        assert!(share.active().is_none());
        assert!(share.close_active(5).is_none());

        let second = share.open_period(2000, 6);
        assert_eq!(second, 1);
        assert_eq!(share.period(0).and_then(|p| p.end_index), Some(4));
        assert_eq!(share.active().map(|(i, p)| (i, p.bps)), Some((1, 2000)));
    }

    #[test]
    fn test_budget() {
        assert!(within_budget(10_000));
        assert!(!within_budget(10_001));
    }
}
