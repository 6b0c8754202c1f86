//! Withdrawals.
//!
//! A withdrawal settles one period of one account for a list of assets,
//! advances the per-asset resume checkpoints and asks the custodian to pay
//! the receiver. Resume checkpoints and events are written before the payout runs and
//! the whole call shares one transaction, so a failed payout leaves no
//! trace and a repeated call finds nothing new to pay.

use std::collections::BTreeSet;

use sharepool_types::events::LedgerEvent;
use sharepool_types::{Address, AssetId, CheckpointIndex, PeriodIndex, PoolKey, Timestamp};

use crate::auth::{authorize, Authorization, WithdrawalRequest};
use crate::custody::{Custodian, Payout};
use crate::events::EventSink;
use crate::ledger::{Ledger, Txn};
use crate::limits::LedgerLimits;
use crate::model::{AccountShare, AccountSharePeriod};
use crate::settlement::{settle, CheckpointWindow, ScanPlan, Settlement};
use crate::store::LedgerStore;
use crate::{LedgerError, Result};

fn check_assets(assets: &[AssetId], limits: &LedgerLimits) -> Result<()> {
    if assets.is_empty() {
        return Err(LedgerError::EmptyAssets);
    }
    LedgerLimits::check("assets", assets.len(), limits.max_assets_per_withdrawal)?;
    let mut seen = BTreeSet::new();
    for asset in assets {
        if !seen.insert(*asset) {
            return Err(LedgerError::DuplicateAsset(*asset));
        }
    }
    Ok(())
}

fn period_of(
    share: &AccountShare,
    account: &Address,
    period_index: PeriodIndex,
) -> Result<AccountSharePeriod> {
    share
        .period(period_index)
        .copied()
        .ok_or(LedgerError::UnknownPeriod {
            account: *account,
            period_index,
            period_count: share.periods.len(),
        })
}

/// Settle every asset of one period, loading the checkpoint window once.
fn settle_assets<S: LedgerStore>(
    store: &S,
    pool: &PoolKey,
    account: &Address,
    period_index: PeriodIndex,
    period: &AccountSharePeriod,
    assets: &[AssetId],
    log_len: CheckpointIndex,
) -> Result<Vec<(AssetId, Settlement)>> {
    let mut plans = Vec::with_capacity(assets.len());
    for asset in assets {
        let resume = store
            .withdrawal_checkpoint(pool, account, period_index, asset)?
            .unwrap_or_default();
        plans.push((*asset, ScanPlan::new(period, &resume, log_len)));
    }

    let needed: Vec<&ScanPlan> = plans.iter().map(|(_, p)| p).filter(|p| !p.is_empty()).collect();
    let window = match (
        needed.iter().map(|p| p.load_start()).min(),
        needed.iter().map(|p| p.range.end).max(),
    ) {
        (Some(start), Some(end)) if period.bps > 0 => {
            CheckpointWindow::new(start, store.checkpoints(pool, start..end)?)
        }
        _ => CheckpointWindow::default(),
    };

    let mut settled = Vec::with_capacity(plans.len());
    for (asset, plan) in plans {
        let settlement = settle(period, &asset, &plan, &window)?;
        tracing::debug!(
            %pool,
            %account,
            period_index,
            %asset,
            amount = settlement.amount,
            visited = settlement.visited,
            "settled"
        );
        settled.push((asset, settlement));
    }
    Ok(settled)
}

impl<S: LedgerStore, C: Custodian> Txn<'_, S, C> {
    fn withdraw(
        &mut self,
        request: &WithdrawalRequest,
        authorization: &Authorization,
        now: Timestamp,
    ) -> Result<Vec<Payout>> {
        check_assets(&request.assets, &self.limits)?;
        let pool = &request.pool;
        let account = &request.account;
        let state = self.load_pool(pool)?;
        let share = self.load_account(pool, account)?;

        let authorizer = authorize(&mut *self.store, authorization, request, &share, now)?;
        let period = period_of(&share, account, request.period_index)?;

        let settled = settle_assets(
            &*self.store,
            pool,
            account,
            request.period_index,
            &period,
            &request.assets,
            state.checkpoint_count,
        )?;

        let mut payouts = Vec::with_capacity(settled.len());
        for (asset, settlement) in &settled {
            if let Some(resume) = settlement.resume_checkpoint() {
                self.store.put_withdrawal_checkpoint(
                    pool,
                    account,
                    request.period_index,
                    asset,
                    &resume,
                )?;
            }
            payouts.push(Payout {
                asset: *asset,
                amount: settlement.amount,
            });
        }

        for (asset, settlement) in settled.iter().filter(|(_, s)| s.amount > 0) {
            self.emit(LedgerEvent::CheckpointWithdrawal {
                pool: *pool,
                account: *account,
                receiver: request.receiver,
                period_index: request.period_index,
                asset: *asset,
                amount: settlement.amount,
                processed_until: settlement.processed_until,
                authorizer: authorizer.clone(),
            });
        }
        // Everything but the commit is written before assets move.
        self.persist_events()?;

        let transfers: Vec<Payout> = payouts.iter().copied().filter(|p| p.amount > 0).collect();
        if !transfers.is_empty() {
            self.custodian.payout(pool, &request.receiver, &transfers)?;
        }

        for transfer in &transfers {
            tracing::info!(
                %pool,
                %account,
                receiver = %request.receiver,
                period_index = request.period_index,
                asset = %transfer.asset,
                amount = transfer.amount,
                "checkpoint withdrawal"
            );
        }
        Ok(payouts)
    }
}

impl<S: LedgerStore, C: Custodian, E: EventSink> Ledger<S, C, E> {
    /// Withdraw what one period of an account has accrued in each asset.
    ///
    /// Returns one payout per requested asset, in request order. Assets with
    /// nothing new to pay come back with a zero amount; that is a success.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EmptyAssets`], [`LedgerError::DuplicateAsset`]
    /// - [`LedgerError::Unauthorized`] and the signature errors of
    ///   [`crate::auth::SignedWithdrawal::verify`]
    /// - [`LedgerError::UnknownPool`], [`LedgerError::UnknownAccount`],
    ///   [`LedgerError::UnknownPeriod`]
    /// - [`LedgerError::Custody`] if the payout fails; nothing is persisted
    pub fn withdraw(
        &mut self,
        request: &WithdrawalRequest,
        authorization: &Authorization,
        now: Timestamp,
    ) -> Result<Vec<Payout>> {
        self.atomically(|txn| txn.withdraw(request, authorization, now))
    }

    /// What [`Ledger::withdraw`] would pay right now, without changing any
    /// state. Inflows still queued at the custodian are not included.
    pub fn withdrawable_balances(
        &self,
        pool: &PoolKey,
        account: &Address,
        assets: &[AssetId],
        period_index: PeriodIndex,
    ) -> Result<Vec<Payout>> {
        check_assets(assets, self.limits())?;
        let state = self.pool(pool)?;
        let share = self.account_share(pool, account)?;
        let period = period_of(&share, account, period_index)?;

        let settled = settle_assets(
            self.store(),
            pool,
            account,
            period_index,
            &period,
            assets,
            state.checkpoint_count,
        )?;
        Ok(settled
            .into_iter()
            .map(|(asset, s)| Payout {
                asset,
                amount: s.amount,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::{CustodyError, MemoryCustodian};
    use crate::events::EventLog;
    use crate::membership::ShareGrant;
    use crate::store::MemoryStore;
    use sharepool_types::events::EventType;
    use sharepool_types::Amount;

    type TestLedger = Ledger<MemoryStore, MemoryCustodian, EventLog>;

    fn pool() -> PoolKey {
        PoolKey::new(Address::from_bytes([1; 32]), 1)
    }

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 32])
    }

    fn request(account: Address, receiver: Address) -> WithdrawalRequest {
        WithdrawalRequest {
            pool: pool(),
            account,
            receiver,
            assets: vec![AssetId::NATIVE],
            period_index: 0,
        }
    }

    /// A ledger with one account and one custodied inflow.
    fn funded(bps: u16, inflow: Amount) -> TestLedger {
        let mut ledger = Ledger::new(MemoryStore::new(), MemoryCustodian::new(), EventLog::new());
        ledger
            .add_account_shares(&pool(), &[ShareGrant::new(addr(2), bps, 0)], 0)
            .expect("add");
        ledger
            .custodian_mut()
            .receive(&pool(), AssetId::NATIVE, inflow);
        ledger.flush_pending_inflows(&pool()).expect("flush");
        ledger
    }

    #[test]
    fn test_withdraw_pays_receiver() {
        let mut ledger = funded(1000, 1000);
        let payouts = ledger
            .withdraw(&request(addr(2), addr(5)), &Authorization::Direct(addr(2)), 1)
            .expect("withdraw");
        assert_eq!(payouts[0].amount, 100);
        assert_eq!(ledger.custodian().paid(&addr(5), &AssetId::NATIVE), 100);
        assert_eq!(ledger.custodian().reserved(&pool(), &AssetId::NATIVE), 0);
        assert_eq!(ledger.sink().of_type(EventType::CheckpointWithdrawal).count(), 1);

        let resume = ledger
            .withdrawal_checkpoint(&pool(), &addr(2), 0, &AssetId::NATIVE)
            .expect("query")
            .expect("written");
        assert_eq!(resume.processed_until, 1);
        assert_eq!(resume.cumulative, 100);
    }

    #[test]
    fn test_repeat_withdraw_is_zero_and_unchanged() {
        let mut ledger = funded(1000, 1000);
        let req = request(addr(2), addr(2));
        let auth = Authorization::Direct(addr(2));
        ledger.withdraw(&req, &auth, 1).expect("first");
        let events_before = ledger.store().events().len();
        let resume_before = ledger
            .withdrawal_checkpoint(&pool(), &addr(2), 0, &AssetId::NATIVE)
            .expect("query");

        let second = ledger.withdraw(&req, &auth, 2).expect("second");
        assert_eq!(second[0].amount, 0);
        assert_eq!(ledger.store().events().len(), events_before);
        assert_eq!(
            ledger
                .withdrawal_checkpoint(&pool(), &addr(2), 0, &AssetId::NATIVE)
                .expect("query"),
            resume_before
        );
    }

    #[test]
    fn test_preview_matches_withdraw() {
        let mut ledger = funded(2500, 4000);
        let preview = ledger
            .withdrawable_balances(&pool(), &addr(2), &[AssetId::NATIVE], 0)
            .expect("preview");
        assert_eq!(preview[0].amount, 1000);
        assert!(ledger
            .withdrawal_checkpoint(&pool(), &addr(2), 0, &AssetId::NATIVE)
            .expect("query")
            .is_none());

        let paid = ledger
            .withdraw(&request(addr(2), addr(2)), &Authorization::Direct(addr(2)), 1)
            .expect("withdraw");
        assert_eq!(paid, preview);
    }

    #[test]
    fn test_input_validation() {
        let mut ledger = funded(1000, 1000);
        let auth = Authorization::Direct(addr(2));

        let mut empty = request(addr(2), addr(2));
        empty.assets.clear();
        assert!(matches!(
            ledger.withdraw(&empty, &auth, 1),
            Err(LedgerError::EmptyAssets)
        ));

        let mut dup = request(addr(2), addr(2));
        dup.assets.push(AssetId::NATIVE);
        assert!(matches!(
            ledger.withdraw(&dup, &auth, 1),
            Err(LedgerError::DuplicateAsset(_))
        ));

        let mut bad_period = request(addr(2), addr(2));
        bad_period.period_index = 1;
        assert!(matches!(
            ledger.withdraw(&bad_period, &auth, 1),
            Err(LedgerError::UnknownPeriod {
                period_index: 1,
                period_count: 1,
                ..
            })
        ));

        assert!(matches!(
            ledger.withdraw(&request(addr(9), addr(9)), &Authorization::Direct(addr(9)), 1),
            Err(LedgerError::UnknownAccount { .. })
        ));
    }

    #[test]
    fn test_failed_payout_rolls_back() {
        let mut ledger = funded(1000, 1000);
        ledger.custodian_mut().reject_native(addr(6));
        let stored_before = ledger.store().events().len();
        let sink_before = ledger.sink().len();

        let result = ledger.withdraw(&request(addr(2), addr(6)), &Authorization::Direct(addr(2)), 1);
        assert!(matches!(
            result,
            Err(LedgerError::Custody(CustodyError::ReceiverRejected(_)))
        ));
        assert!(ledger
            .withdrawal_checkpoint(&pool(), &addr(2), 0, &AssetId::NATIVE)
            .expect("query")
            .is_none());
        // The withdrawal event is appended before the payout runs and must
        // go with the rollback.
        assert_eq!(ledger.store().events().len(), stored_before);
        assert_eq!(ledger.sink().len(), sink_before);
        assert_eq!(ledger.custodian().paid(&addr(6), &AssetId::NATIVE), 0);

        let retry = ledger
            .withdraw(&request(addr(2), addr(5)), &Authorization::Direct(addr(2)), 1)
            .expect("retry");
        assert_eq!(retry[0].amount, 100);
    }

    #[test]
    fn test_unauthorized_caller() {
        let mut ledger = funded(1000, 1000);
        let result = ledger.withdraw(&request(addr(2), addr(2)), &Authorization::Direct(addr(3)), 1);
        assert!(matches!(result, Err(LedgerError::Unauthorized { .. })));
    }
}
