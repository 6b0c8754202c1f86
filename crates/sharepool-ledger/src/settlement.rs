//! Settlement over a checkpoint window.
//!
//! Settlement is pure: it reads a loaded slice of the checkpoint log and the
//! resume state for one (account, period, asset) and returns what is owed.
//! Callers load only the checkpoints the [`ScanPlan`] asks for, so the cost
//! of a withdrawal is bounded by the checkpoints created since the last one.
//!
//! ## Rounding
//!
//! Each checkpoint contributes `floor(diff * bps / total_bps)`. The
//! remainder is never reimbursed; it stays in the pool as dust.

use std::ops::Range;

use sharepool_types::{Amount, AssetId, Bps, CheckpointIndex};

use crate::model::{AccountSharePeriod, BalanceSumCheckpoint, WithdrawalCheckpoint};
use crate::store::StoreError;
use crate::{LedgerError, Result};

/// `floor(value * numerator / denominator)` without intermediate overflow
/// for `numerator <= denominator`.
///
/// Returns `None` if `denominator` is zero or the result does not fit.
pub fn pro_rata(value: Amount, numerator: Bps, denominator: Bps) -> Option<Amount> {
    if denominator == 0 {
        return None;
    }
    let numerator = Amount::from(numerator);
    let denominator = Amount::from(denominator);
    let whole = (value / denominator).checked_mul(numerator)?;
    let rest = (value % denominator).checked_mul(numerator)? / denominator;
    whole.checked_add(rest)
}

/// Where the diff baseline for the first scanned checkpoint comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Baseline {
    /// Cached from a previous withdrawal.
    Cached(Amount),
    /// The asset's cumulative at the given checkpoint, the one just before
    /// the period starts.
    At(CheckpointIndex),
    /// The period starts at the head of the log.
    Zero,
}

/// Which checkpoints a settlement visits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanPlan {
    pub range: Range<CheckpointIndex>,
    pub baseline: Baseline,
}

impl ScanPlan {
    /// Plan the scan for `period`, resuming after `resume`, over a log of
    /// `log_len` checkpoints.
    pub fn new(
        period: &AccountSharePeriod,
        resume: &WithdrawalCheckpoint,
        log_len: CheckpointIndex,
    ) -> Self {
        let end = period.effective_end(log_len);
        let resuming = resume.processed_until > period.start_index;
        let start = if resuming {
            resume.processed_until
        } else {
            period.start_index
        }
        .min(end);

        let baseline = if resuming {
            Baseline::Cached(resume.cumulative)
        } else if period.start_index == 0 {
            Baseline::Zero
        } else {
            Baseline::At(period.start_index - 1)
        };

        Self {
            range: start..end,
            baseline,
        }
    }

    /// First checkpoint index that must be loaded.
    pub fn load_start(&self) -> CheckpointIndex {
        match self.baseline {
            Baseline::At(index) => index,
            Baseline::Cached(_) | Baseline::Zero => self.range.start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// A contiguous slice of a pool's checkpoint log.
#[derive(Clone, Debug, Default)]
pub struct CheckpointWindow {
    first: CheckpointIndex,
    checkpoints: Vec<BalanceSumCheckpoint>,
}

impl CheckpointWindow {
    /// `checkpoints[0]` is the checkpoint at index `first`.
    pub fn new(first: CheckpointIndex, checkpoints: Vec<BalanceSumCheckpoint>) -> Self {
        Self { first, checkpoints }
    }

    pub fn get(&self, index: CheckpointIndex) -> Option<&BalanceSumCheckpoint> {
        let offset = index.checked_sub(self.first)?;
        self.checkpoints.get(usize::try_from(offset).ok()?)
    }

    /// Exclusive end index of the window.
    pub fn end(&self) -> CheckpointIndex {
        self.first + self.checkpoints.len() as CheckpointIndex
    }

    fn require(&self, index: CheckpointIndex) -> Result<&BalanceSumCheckpoint> {
        self.get(index).ok_or_else(|| {
            LedgerError::Store(StoreError::Corrupt(format!(
                "checkpoint {index} missing from window {}..{}",
                self.first,
                self.end()
            )))
        })
    }
}

/// Outcome of settling one (account, period, asset).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settlement {
    /// Amount owed for the scanned checkpoints.
    pub amount: Amount,
    /// Exclusive end of the scanned range.
    pub processed_until: CheckpointIndex,
    /// The asset's cumulative at `processed_until - 1`.
    pub cumulative: Amount,
    /// Number of checkpoints visited.
    pub visited: u64,
}

impl Settlement {
    /// The resume state to persist, if this settlement advanced.
    pub fn resume_checkpoint(&self) -> Option<WithdrawalCheckpoint> {
        (self.visited > 0).then_some(WithdrawalCheckpoint {
            processed_until: self.processed_until,
            cumulative: self.cumulative,
        })
    }
}

/// Settle `period` for `asset` across `plan`, reading checkpoints from
/// `window`.
///
/// # Errors
///
/// - [`LedgerError::Overflow`] if the running total does not fit
/// - [`LedgerError::Store`] if `window` lacks a checkpoint the plan needs
pub fn settle(
    period: &AccountSharePeriod,
    asset: &AssetId,
    plan: &ScanPlan,
    window: &CheckpointWindow,
) -> Result<Settlement> {
    if period.bps == 0 || plan.is_empty() {
        return Ok(Settlement {
            amount: 0,
            processed_until: plan.range.start,
            cumulative: 0,
            visited: 0,
        });
    }

    let mut baseline = match plan.baseline {
        Baseline::Cached(amount) => amount,
        Baseline::At(index) => window.require(index)?.cumulative_of(asset),
        Baseline::Zero => 0,
    };

    let mut amount: Amount = 0;
    for index in plan.range.clone() {
        let checkpoint = window.require(index)?;
        let cumulative = checkpoint.cumulative_of(asset);
        let diff = cumulative.saturating_sub(baseline);
        if diff > 0 && checkpoint.total_bps > 0 {
            let share =
                pro_rata(diff, period.bps, checkpoint.total_bps).ok_or(LedgerError::Overflow)?;
            amount = amount.checked_add(share).ok_or(LedgerError::Overflow)?;
            tracing::trace!(index, %asset, diff, share, "settled checkpoint");
        }
        baseline = cumulative;
    }

    Ok(Settlement {
        amount,
        processed_until: plan.range.end,
        cumulative: baseline,
        visited: plan.range.end.saturating_sub(plan.range.start),
    })
}
