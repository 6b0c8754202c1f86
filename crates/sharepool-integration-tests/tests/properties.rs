//! Integration test: ledger properties over generated histories.
//!
//! 1. A repeated withdrawal with no new inflow pays nothing and leaves the
//!    store untouched.
//! 2. Settling in two steps pays exactly what one step would.
//! 3. Conservation: every period is paid exactly its per-checkpoint
//!    entitlement, and the pool never pays out more than it was allocated.
//! 4. The stored-state audit stays clean across random histories.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sharepool_integration_tests::{
    addr, deposit, join, memory_ledger, pool, request, sqlite_ledger, token, withdraw_native,
    TestLedger, BASE_TIME,
};
use sharepool_ledger::audit;
use sharepool_ledger::{Authorization, LedgerStore};
use sharepool_types::{Address, Amount, AssetId, PeriodIndex, MAX_BPS};

const ACCOUNTS: u8 = 6;

fn assets() -> [AssetId; 2] {
    [AssetId::NATIVE, token(7)]
}

/// Entitlement of one period recomputed from the raw log, one checkpoint
/// at a time.
fn entitlement<S: LedgerStore>(
    ledger: &TestLedger<S>,
    account: &Address,
    period_index: PeriodIndex,
    asset: &AssetId,
) -> Amount {
    let period = ledger
        .period(&pool(), account, period_index)
        .expect("period");
    let count = ledger.checkpoint_count(&pool()).expect("count");
    let end = period.effective_end(count);
    let mut total = 0;
    for index in period.start_index..end {
        let checkpoint = ledger
            .checkpoint(&pool(), index)
            .expect("read")
            .expect("checkpoint");
        let previous = match index.checked_sub(1) {
            Some(prev) => ledger
                .checkpoint(&pool(), prev)
                .expect("read")
                .expect("checkpoint")
                .cumulative_of(asset),
            None => 0,
        };
        let diff = checkpoint.cumulative_of(asset) - previous;
        if diff > 0 && checkpoint.total_bps > 0 {
            total += diff * Amount::from(period.bps) / Amount::from(checkpoint.total_bps);
        }
    }
    total
}

/// Drive `steps` random operations against `ledger`. Returns what was
/// withdrawn per (account, period, asset) and allocated per asset.
fn random_history<S: LedgerStore>(
    ledger: &mut TestLedger<S>,
    seed: u64,
    steps: usize,
) -> (
    BTreeMap<(Address, PeriodIndex, AssetId), Amount>,
    BTreeMap<AssetId, Amount>,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut withdrawn = BTreeMap::new();
    let mut allocated: BTreeMap<AssetId, Amount> = BTreeMap::new();
    let now = BASE_TIME;

    for _ in 0..steps {
        let account = addr(rng.gen_range(1..=ACCOUNTS));
        let total = ledger.total_bps(&pool()).unwrap_or(0);
        let share = ledger.account_share(&pool(), &account).ok();
        let current = share.as_ref().and_then(|s| s.active()).map(|(_, p)| p.bps);
        let headroom = MAX_BPS - total;

        match rng.gen_range(0..6) {
            0 if current.is_none() && headroom > 0 => {
                join(ledger, account, rng.gen_range(1..=headroom.min(3000)), now);
            }
            1 if current.is_some() && headroom > 0 => {
                let delta = rng.gen_range(1..=headroom.min(1000));
                ledger
                    .increase_bps(&pool(), &account, delta, now)
                    .expect("increase");
            }
            2 if current.is_some_and(|bps| bps > 0) => {
                let bps = current.unwrap_or(0);
                let delta = rng.gen_range(1..=bps);
                ledger
                    .decrease_bps(&pool(), &account, delta, now)
                    .expect("decrease");
            }
            3 if current.is_some() => {
                ledger.remove_self(&pool(), &account, now).expect("remove");
            }
            4 => {
                if let Some(share) = share.filter(|s| !s.periods.is_empty()) {
                    let period_index = rng.gen_range(0..share.periods.len()) as PeriodIndex;
                    let wanted: Vec<AssetId> = if rng.gen_bool(0.5) {
                        assets().to_vec()
                    } else {
                        vec![assets()[rng.gen_range(0..2)]]
                    };
                    let payouts = ledger
                        .withdraw(
                            &request(account, period_index, &wanted),
                            &Authorization::Direct(account),
                            now,
                        )
                        .expect("withdraw");
                    for payout in payouts {
                        *withdrawn
                            .entry((account, period_index, payout.asset))
                            .or_insert(0) += payout.amount;
                    }
                }
            }
            _ => {
                let asset = assets()[rng.gen_range(0..2)];
                let amount = rng.gen_range(0..100_000u64) as Amount;
                *allocated.entry(asset).or_insert(0) += deposit(ledger, asset, amount);
            }
        }
    }
    (withdrawn, allocated)
}

/// Withdraw everything still owed, folding it into `withdrawn`.
fn drain<S: LedgerStore>(
    ledger: &mut TestLedger<S>,
    withdrawn: &mut BTreeMap<(Address, PeriodIndex, AssetId), Amount>,
) {
    for n in 1..=ACCOUNTS {
        let account = addr(n);
        let Ok(share) = ledger.account_share(&pool(), &account) else {
            continue;
        };
        for period_index in 0..share.periods.len() as PeriodIndex {
            let payouts = ledger
                .withdraw(
                    &request(account, period_index, &assets()),
                    &Authorization::Direct(account),
                    BASE_TIME,
                )
                .expect("final withdraw");
            for payout in payouts {
                *withdrawn
                    .entry((account, period_index, payout.asset))
                    .or_insert(0) += payout.amount;
            }
        }
    }
}

fn check_conservation<S: LedgerStore>(ledger: &mut TestLedger<S>, seed: u64) {
    let (mut withdrawn, allocated) = random_history(ledger, seed, 200);
    drain(ledger, &mut withdrawn);

    let mut paid: BTreeMap<AssetId, Amount> = BTreeMap::new();
    for ((account, period_index, asset), amount) in &withdrawn {
        assert_eq!(
            *amount,
            entitlement(ledger, account, *period_index, asset),
            "seed {seed}: {account} period {period_index} asset {asset}"
        );
        *paid.entry(*asset).or_insert(0) += amount;
    }
    for asset in assets() {
        let allocated = allocated.get(&asset).copied().unwrap_or(0);
        let paid = paid.get(&asset).copied().unwrap_or(0);
        assert!(paid <= allocated, "seed {seed}: paid {paid} > allocated {allocated}");
        assert_eq!(
            ledger.custodian().reserved(&pool(), &asset),
            allocated - paid,
            "seed {seed}: reserve tracks the undistributed remainder"
        );
    }

    if ledger.pools().expect("pools").is_empty() {
        return;
    }
    let report = audit::check_pool(ledger.store(), &pool()).expect("audit");
    assert!(report.is_clean(), "seed {seed}: {:?}", report.violations);
}

#[test]
fn repeated_withdrawal_changes_nothing() {
    let mut ledger = sqlite_ledger();
    let alice = addr(1);
    join(&mut ledger, alice, 2500, BASE_TIME);
    deposit(&mut ledger, AssetId::NATIVE, 4000);
    deposit(&mut ledger, token(7), 800);

    let req = request(alice, 0, &assets());
    let first = ledger
        .withdraw(&req, &Authorization::Direct(alice), BASE_TIME)
        .expect("first");
    assert_eq!(first[0].amount, 1000);
    assert_eq!(first[1].amount, 200);

    let resume = ledger
        .withdrawal_checkpoint(&pool(), &alice, 0, &AssetId::NATIVE)
        .expect("resume")
        .expect("written");
    let events = ledger.sink().len();

    let second = ledger
        .withdraw(&req, &Authorization::Direct(alice), BASE_TIME)
        .expect("second");
    assert!(second.iter().all(|p| p.amount == 0));
    assert_eq!(
        ledger
            .withdrawal_checkpoint(&pool(), &alice, 0, &AssetId::NATIVE)
            .expect("resume"),
        Some(resume)
    );
    assert_eq!(ledger.sink().len(), events);
    assert_eq!(ledger.custodian().paid(&alice, &AssetId::NATIVE), 1000);
}

fn staged<S: LedgerStore>(ledger: &mut TestLedger<S>, withdraw_midway: bool) -> Amount {
    let (alice, bob) = (addr(1), addr(2));
    join(ledger, alice, 3333, BASE_TIME);
    join(ledger, bob, 1111, BASE_TIME);

    let mut paid = 0;
    for (i, amount) in [997u128, 10_003, 1, 77_777].into_iter().enumerate() {
        deposit(ledger, AssetId::NATIVE, amount);
        if i == 1 {
            ledger
                .increase_bps(&pool(), &bob, 4000, BASE_TIME)
                .expect("increase");
        }
        if withdraw_midway {
            paid += withdraw_native(ledger, alice, 0);
        }
    }
    paid + withdraw_native(ledger, alice, 0)
}

#[test]
fn two_step_settlement_matches_one_step() {
    let once = staged(&mut memory_ledger(), false);
    let stepwise = staged(&mut memory_ledger(), true);
    assert_eq!(once, stepwise);

    let mut ledger = memory_ledger();
    staged(&mut ledger, false);
    assert_eq!(once, entitlement(&ledger, &addr(1), 0, &AssetId::NATIVE));
}

#[test]
fn preview_matches_withdrawal() {
    let mut ledger = memory_ledger();
    random_history(&mut ledger, 11, 120);
    let account = addr(2);
    let Ok(share) = ledger.account_share(&pool(), &account) else {
        return;
    };
    for period_index in 0..share.periods.len() as PeriodIndex {
        let preview = ledger
            .withdrawable_balances(&pool(), &account, &assets(), period_index)
            .expect("preview");
        let paid = ledger
            .withdraw(
                &request(account, period_index, &assets()),
                &Authorization::Direct(account),
                BASE_TIME,
            )
            .expect("withdraw");
        assert_eq!(preview, paid);
    }
}

#[test]
fn conservation_memory_store() {
    for seed in 0..8 {
        check_conservation(&mut memory_ledger(), seed);
    }
}

#[test]
fn conservation_sqlite_store() {
    for seed in 100..104 {
        check_conservation(&mut sqlite_ledger(), seed);
    }
}
