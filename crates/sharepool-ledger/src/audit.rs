//! Invariant checks over stored ledger state.
//!
//! The engine maintains these invariants on every call. The audit re-derives
//! them from the store alone, so it can run against a database written by
//! any version of the engine.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use sharepool_types::{Address, AssetId, CheckpointIndex, PoolKey, MAX_BPS};

use crate::model::{AccountShare, BalanceSumCheckpoint, SharePool};
use crate::store::LedgerStore;
use crate::{LedgerError, Result};

/// Stable identifiers for the audited invariants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantId {
    /// A checkpoint recorded more than 10000 bps.
    CheckpointBpsBounded,
    /// A checkpoint's total bps disagrees with the periods covering it.
    CheckpointBpsMatchesPeriods,
    /// The stored log length disagrees with the pool's checkpoint count.
    LogLengthMatchesCount,
    /// An asset's cumulative decreased along the log.
    CumulativeMonotone,
    /// The pool total disagrees with the sum of active periods.
    PoolTotalMatchesActive,
    /// A period ends before it starts, or two periods of an account overlap.
    PeriodsDisjoint,
    /// The active period pointer is not the single open, last period.
    ActivePeriodConsistent,
    /// A resume checkpoint lies outside its period or caches a wrong baseline.
    ResumeWithinPeriod,
}

/// One failed invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub id: InvariantId,
    pub details: String,
}

impl Violation {
    fn new(id: InvariantId, details: impl Into<String>) -> Self {
        Self {
            id,
            details: details.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.id, self.details)
    }
}

/// Audit outcome for one pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub pool: PoolKey,
    pub total_bps: u16,
    pub checkpoints: CheckpointIndex,
    pub accounts: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

fn check_log(state: &SharePool, log: &[BalanceSumCheckpoint], out: &mut Vec<Violation>) {
    if log.len() as CheckpointIndex != state.checkpoint_count {
        out.push(Violation::new(
            InvariantId::LogLengthMatchesCount,
            format!(
                "pool records {} checkpoints, log holds {}",
                state.checkpoint_count,
                log.len()
            ),
        ));
    }
    for (index, checkpoint) in log.iter().enumerate() {
        if checkpoint.total_bps > MAX_BPS {
            out.push(Violation::new(
                InvariantId::CheckpointBpsBounded,
                format!("checkpoint {index} records {} bps", checkpoint.total_bps),
            ));
        }
    }
    for (index, pair) in log.windows(2).enumerate() {
        for (asset, before) in &pair[0].cumulative {
            let after = pair[1].cumulative_of(asset);
            if after < *before {
                out.push(Violation::new(
                    InvariantId::CumulativeMonotone,
                    format!(
                        "{asset} cumulative fell from {before} to {after} at checkpoint {}",
                        index + 1
                    ),
                ));
            }
        }
    }
}

fn check_periods(account: &Address, share: &AccountShare, out: &mut Vec<Violation>) {
    let mut previous_end: Option<CheckpointIndex> = None;
    for (index, period) in share.periods.iter().enumerate() {
        if let Some(end) = period.end_index {
            if end < period.start_index {
                out.push(Violation::new(
                    InvariantId::PeriodsDisjoint,
                    format!(
                        "{account} period {index} ends at {end} before its start {}",
                        period.start_index
                    ),
                ));
            }
        }
        if let Some(prev) = previous_end {
            if period.start_index < prev {
                out.push(Violation::new(
                    InvariantId::PeriodsDisjoint,
                    format!(
                        "{account} period {index} starts at {} inside the previous period ending {prev}",
                        period.start_index
                    ),
                ));
            }
        }
        match period.end_index {
            Some(end) => previous_end = Some(end),
            None if index + 1 < share.periods.len() => out.push(Violation::new(
                InvariantId::ActivePeriodConsistent,
                format!("{account} period {index} is open but not last"),
            )),
            None => previous_end = Some(CheckpointIndex::MAX),
        }
    }

    let open_last = share
        .periods
        .last()
        .filter(|p| p.is_open())
        .map(|_| (share.periods.len() - 1) as u32);
    if share.active_period != open_last {
        out.push(Violation::new(
            InvariantId::ActivePeriodConsistent,
            format!(
                "{account} active period {:?}, open last period {:?}",
                share.active_period, open_last
            ),
        ));
    }
}

fn check_resume<S: LedgerStore>(
    store: &S,
    pool: &PoolKey,
    account: &Address,
    share: &AccountShare,
    assets: &BTreeSet<AssetId>,
    log: &[BalanceSumCheckpoint],
    out: &mut Vec<Violation>,
) -> Result<()> {
    let len = log.len() as CheckpointIndex;
    for (index, period) in share.periods.iter().enumerate() {
        let period_index = index as u32;
        for asset in assets {
            let Some(resume) = store.withdrawal_checkpoint(pool, account, period_index, asset)? else {
                continue;
            };
            let end = period.effective_end(len);
            if resume.processed_until <= period.start_index || resume.processed_until > end {
                out.push(Violation::new(
                    InvariantId::ResumeWithinPeriod,
                    format!(
                        "{account} period {index} {asset} resumes at {} outside {}..={end}",
                        resume.processed_until,
                        period.start_index + 1
                    ),
                ));
                continue;
            }
            let expected = log
                .get((resume.processed_until - 1) as usize)
                .map_or(0, |c| c.cumulative_of(asset));
            if resume.cumulative != expected {
                out.push(Violation::new(
                    InvariantId::ResumeWithinPeriod,
                    format!(
                        "{account} period {index} {asset} caches {} but checkpoint {} holds {expected}",
                        resume.cumulative,
                        resume.processed_until - 1
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Check every invariant of `pool`.
///
/// # Errors
///
/// - [`LedgerError::UnknownPool`] if the pool does not exist
/// - [`LedgerError::Store`] on backend failure
pub fn check_pool<S: LedgerStore>(store: &S, pool: &PoolKey) -> Result<AuditReport> {
    let state = store
        .pool(pool)?
        .ok_or(LedgerError::UnknownPool(*pool))?;
    let log = store.checkpoints(pool, 0..state.checkpoint_count)?;
    let accounts = store.accounts(pool)?;
    let mut violations = Vec::new();

    check_log(&state, &log, &mut violations);

    let mut covered = vec![0u32; log.len()];
    let mut active_total = 0u32;
    for (account, share) in &accounts {
        check_periods(account, share, &mut violations);
        active_total += u32::from(share.current_bps());
        for period in &share.periods {
            let end = period.effective_end(log.len() as CheckpointIndex);
            for index in period.start_index..end {
                if let Some(slot) = covered.get_mut(index as usize) {
                    *slot += u32::from(period.bps);
                }
            }
        }
    }

    for (index, (checkpoint, expected)) in log.iter().zip(&covered).enumerate() {
        if u32::from(checkpoint.total_bps) != *expected {
            violations.push(Violation::new(
                InvariantId::CheckpointBpsMatchesPeriods,
                format!(
                    "checkpoint {index} records {} bps, periods cover {expected}",
                    checkpoint.total_bps
                ),
            ));
        }
    }

    if u32::from(state.total_bps) != active_total {
        violations.push(Violation::new(
            InvariantId::PoolTotalMatchesActive,
            format!(
                "pool total {} bps, active periods sum to {active_total}",
                state.total_bps
            ),
        ));
    }

    let assets: BTreeSet<AssetId> = log
        .iter()
        .flat_map(|c| c.cumulative.keys().copied())
        .collect();
    for (account, share) in &accounts {
        check_resume(store, pool, account, share, &assets, &log, &mut violations)?;
    }

    for violation in &violations {
        tracing::warn!(%pool, %violation, "invariant violated");
    }
    tracing::debug!(%pool, checkpoints = log.len(), accounts = accounts.len(), violations = violations.len(), "pool audited");

    Ok(AuditReport {
        pool: *pool,
        total_bps: state.total_bps,
        checkpoints: state.checkpoint_count,
        accounts: accounts.len(),
        violations,
    })
}

/// Audit every pool in the store.
pub fn check_all<S: LedgerStore>(store: &S) -> Result<Vec<AuditReport>> {
    store
        .pools()?
        .iter()
        .map(|pool| check_pool(store, pool))
        .collect()
}
