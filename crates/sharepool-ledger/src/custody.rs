//! The custodian collaborator.
//!
//! The custodian actually holds assets. It reports inflows to the ledger,
//! keeps each pool's allocation out of its freely spendable balance, and
//! moves assets to receivers when a withdrawal settles.
//!
//! Custodian calls join the ledger's transaction. Between
//! [`Custodian::begin`] and [`Custodian::commit`] drains, reservations and
//! payouts are provisional, and [`Custodian::rollback`] reverses them. A
//! custodian whose transfers cannot be reversed performs them in
//! [`Custodian::payout`]; the ledger persists every other write of the call
//! before paying out, so only the store commit follows a transfer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sharepool_types::{Address, Amount, AssetId, PoolKey};

/// Value received for a pool but not yet reported to the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inflow {
    pub asset: AssetId,
    pub amount: Amount,
}

/// One asset movement of a withdrawal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub asset: AssetId,
    pub amount: Amount,
}

/// Error types for custodian operations.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// Not enough of the asset is held for the pool.
    #[error("insufficient custody balance of {asset}: requested {requested}, available {available}")]
    InsufficientBalance {
        asset: AssetId,
        requested: Amount,
        available: Amount,
    },

    /// The receiving account refused the transfer.
    #[error("receiver {0} rejected the transfer")]
    ReceiverRejected(Address),

    /// Any other custodian failure.
    #[error("custodian failure: {0}")]
    Backend(String),
}

/// Interface the ledger calls on the custodian.
pub trait Custodian {
    /// Open a unit of work alongside the store transaction.
    fn begin(&mut self) -> Result<(), CustodyError>;

    /// Make the open unit of work final. Runs after the store has
    /// committed, so it cannot fail.
    fn commit(&mut self);

    /// Undo the open unit of work: drained inflows go back on the queue,
    /// reservations and payouts are reversed.
    fn rollback(&mut self) -> Result<(), CustodyError>;

    /// Take the inflows received for `pool` since the last drain.
    fn drain_pending(&mut self, pool: &PoolKey) -> Result<Vec<Inflow>, CustodyError>;

    /// Retain `amount` of `asset` as owed to `pool`.
    fn reserve(&mut self, pool: &PoolKey, asset: &AssetId, amount: Amount)
        -> Result<(), CustodyError>;

    /// Transfer every payout in the batch from `pool`'s reserve to
    /// `receiver`. All-or-nothing: on error no payout has moved.
    fn payout(
        &mut self,
        pool: &PoolKey,
        receiver: &Address,
        payouts: &[Payout],
    ) -> Result<(), CustodyError>;
}

/// In-memory custodian that keeps books instead of moving real assets.
///
/// Receivers registered with [`MemoryCustodian::reject_native`] refuse
/// native-asset transfers, mirroring accounts that cannot receive them.
#[derive(Debug, Default)]
pub struct MemoryCustodian {
    holdings: BTreeMap<AssetId, Amount>,
    reserved: BTreeMap<(PoolKey, AssetId), Amount>,
    pending: BTreeMap<PoolKey, Vec<Inflow>>,
    paid: BTreeMap<(Address, AssetId), Amount>,
    rejects_native: BTreeSet<Address>,
    journal: Option<Vec<Undo>>,
}

/// How to reverse one provisional change. Amounts are the prior values.
#[derive(Debug)]
enum Undo {
    Drained(PoolKey, Vec<Inflow>),
    Holdings(AssetId, Amount),
    Reserved((PoolKey, AssetId), Amount),
    Paid((Address, AssetId), Amount),
}

impl MemoryCustodian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take custody of `amount` for `pool` and queue it for the ledger.
    pub fn receive(&mut self, pool: &PoolKey, asset: AssetId, amount: Amount) {
        let held = self.holdings.entry(asset).or_insert(0);
        *held = held.saturating_add(amount);
        self.pending
            .entry(*pool)
            .or_default()
            .push(Inflow { asset, amount });
    }

    /// Make `receiver` refuse native-asset transfers.
    pub fn reject_native(&mut self, receiver: Address) {
        self.rejects_native.insert(receiver);
    }

    /// Total custody of `asset`.
    pub fn holdings(&self, asset: &AssetId) -> Amount {
        self.holdings.get(asset).copied().unwrap_or(0)
    }

    /// Amount of `asset` currently owed to `pool`.
    pub fn reserved(&self, pool: &PoolKey, asset: &AssetId) -> Amount {
        self.reserved.get(&(*pool, *asset)).copied().unwrap_or(0)
    }

    /// Custody of `asset` not owed to any pool.
    pub fn spendable(&self, asset: &AssetId) -> Amount {
        let owed: Amount = self
            .reserved
            .iter()
            .filter(|((_, a), _)| a == asset)
            .map(|(_, amount)| *amount)
            .sum();
        self.holdings(asset).saturating_sub(owed)
    }

    /// Total paid out to `receiver` in `asset`.
    pub fn paid(&self, receiver: &Address, asset: &AssetId) -> Amount {
        self.paid.get(&(*receiver, *asset)).copied().unwrap_or(0)
    }

    /// Number of inflows waiting for the ledger.
    pub fn pending_count(&self, pool: &PoolKey) -> usize {
        self.pending.get(pool).map_or(0, Vec::len)
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
    }

    fn undo(&mut self, undo: Undo) {
        match undo {
            Undo::Drained(pool, mut inflows) => {
                inflows.extend(self.pending.remove(&pool).unwrap_or_default());
                self.pending.insert(pool, inflows);
            }
            Undo::Holdings(asset, amount) => {
                self.holdings.insert(asset, amount);
            }
            Undo::Reserved(key, amount) => {
                self.reserved.insert(key, amount);
            }
            Undo::Paid(key, amount) => {
                self.paid.insert(key, amount);
            }
        }
    }
}

impl Custodian for MemoryCustodian {
    fn begin(&mut self) -> Result<(), CustodyError> {
        if self.journal.is_some() {
            return Err(CustodyError::Backend("unit of work already open".to_string()));
        }
        self.journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) {
        self.journal = None;
    }

    fn rollback(&mut self) -> Result<(), CustodyError> {
        let journal = self
            .journal
            .take()
            .ok_or_else(|| CustodyError::Backend("no unit of work open".to_string()))?;
        for undo in journal.into_iter().rev() {
            self.undo(undo);
        }
        Ok(())
    }

    fn drain_pending(&mut self, pool: &PoolKey) -> Result<Vec<Inflow>, CustodyError> {
        let drained = self.pending.remove(pool).unwrap_or_default();
        if !drained.is_empty() {
            self.record(Undo::Drained(*pool, drained.clone()));
        }
        Ok(drained)
    }

    fn reserve(
        &mut self,
        pool: &PoolKey,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        let available = self.spendable(asset);
        if amount > available {
            return Err(CustodyError::InsufficientBalance {
                asset: *asset,
                requested: amount,
                available,
            });
        }
        let key = (*pool, *asset);
        let previous = self.reserved(pool, asset);
        self.record(Undo::Reserved(key, previous));
        self.reserved.insert(key, previous + amount);
        Ok(())
    }

    fn payout(
        &mut self,
        pool: &PoolKey,
        receiver: &Address,
        payouts: &[Payout],
    ) -> Result<(), CustodyError> {
        // Validate the whole batch before moving anything.
        let mut needed: BTreeMap<AssetId, Amount> = BTreeMap::new();
        for payout in payouts {
            if payout.asset == AssetId::NATIVE && self.rejects_native.contains(receiver) {
                return Err(CustodyError::ReceiverRejected(*receiver));
            }
            let total = needed.entry(payout.asset).or_insert(0);
            *total = total
                .checked_add(payout.amount)
                .ok_or_else(|| CustodyError::Backend("payout total overflows".to_string()))?;
        }
        for (asset, requested) in &needed {
            let available = self.reserved(pool, asset);
            if *requested > available {
                return Err(CustodyError::InsufficientBalance {
                    asset: *asset,
                    requested: *requested,
                    available,
                });
            }
        }

        for (asset, amount) in needed {
            let reserved = self.reserved(pool, &asset);
            let held = self.holdings(&asset);
            let paid = self.paid(receiver, &asset);
            self.record(Undo::Reserved((*pool, asset), reserved));
            self.record(Undo::Holdings(asset, held));
            self.record(Undo::Paid((*receiver, asset), paid));
            self.reserved.insert((*pool, asset), reserved - amount);
            self.holdings.insert(asset, held.saturating_sub(amount));
            self.paid.insert((*receiver, asset), paid.saturating_add(amount));
        }
        Ok(())
    }
}
