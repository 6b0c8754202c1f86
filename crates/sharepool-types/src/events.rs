//! Ledger events.
//!
//! Every committed mutation emits one or more events. Taken together they
//! form an append-only log from which an external observer can rebuild the
//! full account-share and checkpoint history of every pool.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{
    Address, Amount, AssetId, Bps, CheckpointIndex, PeriodIndex, PoolKey, Timestamp,
};

/// Event type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PoolCreated,
    AccountShareAdded,
    AccountShareRemoved,
    AccountShareBpsChanged,
    WithdrawalDelegateUpdated,
    CheckpointCreated,
    CheckpointWithdrawal,
}

impl EventType {
    /// Stable string form, as stored in the event log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoolCreated => "pool_created",
            Self::AccountShareAdded => "account_share_added",
            Self::AccountShareRemoved => "account_share_removed",
            Self::AccountShareBpsChanged => "account_share_bps_changed",
            Self::WithdrawalDelegateUpdated => "withdrawal_delegate_updated",
            Self::CheckpointCreated => "checkpoint_created",
            Self::CheckpointWithdrawal => "checkpoint_withdrawal",
        }
    }
}

/// Who authorized a withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Authorizer {
    /// The account itself.
    Account,
    /// An explicitly approved delegate.
    Delegate { caller: Address },
    /// Any caller, admitted by the wildcard delegate.
    Wildcard { caller: Address },
    /// An off-line signed authorization.
    Signature { nonce: u64 },
}

/// A ledger event.
///
/// Amounts are serialized as decimal strings so that values above 2^53 survive
/// JSON consumers.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A pool was created by its first membership mutation.
    PoolCreated { pool: PoolKey, at: Timestamp },

    /// An account joined (or re-joined) a pool, opening a period.
    AccountShareAdded {
        pool: PoolKey,
        account: Address,
        period_index: PeriodIndex,
        bps: Bps,
        start_index: CheckpointIndex,
        removable_at: Timestamp,
        pool_total_bps: Bps,
    },

    /// An account left a pool; its active period was closed.
    AccountShareRemoved {
        pool: PoolKey,
        account: Address,
        period_index: PeriodIndex,
        end_index: CheckpointIndex,
        pool_total_bps: Bps,
    },

    /// An account's bps changed: one period closed and another opened at the
    /// same checkpoint boundary.
    AccountShareBpsChanged {
        pool: PoolKey,
        account: Address,
        closed_period_index: PeriodIndex,
        opened_period_index: PeriodIndex,
        old_bps: Bps,
        new_bps: Bps,
        boundary_index: CheckpointIndex,
        pool_total_bps: Bps,
    },

    /// A withdrawal delegate was approved or revoked.
    WithdrawalDelegateUpdated {
        pool: PoolKey,
        account: Address,
        delegate: Address,
        approved: bool,
    },

    /// An inflow was allocated to the pool and recorded as a checkpoint.
    CheckpointCreated {
        pool: PoolKey,
        index: CheckpointIndex,
        asset: AssetId,
        #[serde_as(as = "DisplayFromStr")]
        inflow: Amount,
        #[serde_as(as = "DisplayFromStr")]
        allocated: Amount,
        #[serde_as(as = "DisplayFromStr")]
        cumulative: Amount,
        total_bps: Bps,
    },

    /// A settled amount was withdrawn for one (account, period, asset).
    CheckpointWithdrawal {
        pool: PoolKey,
        account: Address,
        receiver: Address,
        period_index: PeriodIndex,
        asset: AssetId,
        #[serde_as(as = "DisplayFromStr")]
        amount: Amount,
        processed_until: CheckpointIndex,
        authorizer: Authorizer,
    },
}

impl LedgerEvent {
    /// The type tag of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::PoolCreated { .. } => EventType::PoolCreated,
            Self::AccountShareAdded { .. } => EventType::AccountShareAdded,
            Self::AccountShareRemoved { .. } => EventType::AccountShareRemoved,
            Self::AccountShareBpsChanged { .. } => EventType::AccountShareBpsChanged,
            Self::WithdrawalDelegateUpdated { .. } => EventType::WithdrawalDelegateUpdated,
            Self::CheckpointCreated { .. } => EventType::CheckpointCreated,
            Self::CheckpointWithdrawal { .. } => EventType::CheckpointWithdrawal,
        }
    }

    /// The pool this event belongs to.
    pub fn pool(&self) -> &PoolKey {
        match self {
            Self::PoolCreated { pool, .. }
            | Self::AccountShareAdded { pool, .. }
            | Self::AccountShareRemoved { pool, .. }
            | Self::AccountShareBpsChanged { pool, .. }
            | Self::WithdrawalDelegateUpdated { pool, .. }
            | Self::CheckpointCreated { pool, .. }
            | Self::CheckpointWithdrawal { pool, .. } => pool,
        }
    }
}
