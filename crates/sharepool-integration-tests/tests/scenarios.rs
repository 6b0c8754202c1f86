//! Integration test: worked scenarios over both stores.
//!
//! A. One account at 1000 bps receives its tenth of a single inflow.
//! B. Two equal halves of an odd inflow leave one unit of dust.
//! C. A mid-history bps increase settles each side of the boundary at its
//!    own rate.
//! D. Removal is time-locked and freezes accrual once it happens.
//! E. Delegation: strangers are rejected until the wildcard is approved.

use sharepool_integration_tests::{
    addr, deposit, join, memory_ledger, pool, request, sqlite_ledger, withdraw_native, TestLedger,
    BASE_TIME,
};
use sharepool_ledger::{Authorization, LedgerError, LedgerStore};
use sharepool_types::events::{Authorizer, EventType, LedgerEvent};
use sharepool_types::AssetId;

fn scenario_a<S: LedgerStore>(mut ledger: TestLedger<S>) {
    let alice = addr(1);
    join(&mut ledger, alice, 1000, BASE_TIME);

    assert_eq!(deposit(&mut ledger, AssetId::NATIVE, 1000), 100);
    assert_eq!(withdraw_native(&mut ledger, alice, 0), 100);
    assert_eq!(ledger.custodian().paid(&alice, &AssetId::NATIVE), 100);
    // The other 900 never belonged to the pool.
    assert_eq!(ledger.custodian().spendable(&AssetId::NATIVE), 900);
}

fn scenario_b<S: LedgerStore>(mut ledger: TestLedger<S>) {
    let (alice, bob) = (addr(1), addr(2));
    join(&mut ledger, alice, 5000, BASE_TIME);
    join(&mut ledger, bob, 5000, BASE_TIME);

    assert_eq!(deposit(&mut ledger, AssetId::NATIVE, 3), 3);
    assert_eq!(withdraw_native(&mut ledger, alice, 0), 1);
    assert_eq!(withdraw_native(&mut ledger, bob, 0), 1);

    // Dust stays reserved for the pool.
    assert_eq!(ledger.custodian().reserved(&pool(), &AssetId::NATIVE), 1);
    assert_eq!(withdraw_native(&mut ledger, alice, 0), 0);
}

fn scenario_c<S: LedgerStore>(mut ledger: TestLedger<S>) {
    let (alice, bob) = (addr(1), addr(2));
    join(&mut ledger, alice, 1000, BASE_TIME);
    join(&mut ledger, bob, 1000, BASE_TIME);

    // Checkpoint 0 at 2000 bps total.
    assert_eq!(deposit(&mut ledger, AssetId::NATIVE, 1000), 200);

    ledger
        .increase_bps(&pool(), &alice, 1000, BASE_TIME)
        .expect("increase");
    let share = ledger.account_share(&pool(), &alice).expect("share");
    assert_eq!(share.periods.len(), 2);
    assert_eq!(share.periods[0].end_index, Some(1));
    assert_eq!(share.periods[1].start_index, 1);
    assert_eq!(share.current_bps(), 2000);

    // Checkpoint 1 at 3000 bps total.
    assert_eq!(deposit(&mut ledger, AssetId::NATIVE, 1000), 300);

    // Old period: 200 * 1000 / 2000. New period: 300 * 2000 / 3000.
    assert_eq!(withdraw_native(&mut ledger, alice, 0), 100);
    assert_eq!(withdraw_native(&mut ledger, alice, 1), 200);
    // Bob's single period spans both: 100 + 300 * 1000 / 3000.
    assert_eq!(withdraw_native(&mut ledger, bob, 0), 200);

    assert_eq!(ledger.custodian().reserved(&pool(), &AssetId::NATIVE), 0);
}

fn scenario_d<S: LedgerStore>(mut ledger: TestLedger<S>) {
    let alice = addr(1);
    let unlock = BASE_TIME + 100;
    join(&mut ledger, alice, 1000, unlock);
    assert_eq!(deposit(&mut ledger, AssetId::NATIVE, 1000), 100);

    let early = ledger.remove_account_shares(&pool(), &[alice], unlock - 1);
    assert!(matches!(
        early,
        Err(LedgerError::NotYetRemovable { removable_at, .. }) if removable_at == unlock
    ));
    assert_eq!(ledger.total_bps(&pool()).expect("total"), 1000);

    ledger
        .remove_account_shares(&pool(), &[alice], unlock)
        .expect("remove at unlock time");
    assert_eq!(ledger.total_bps(&pool()).expect("total"), 0);

    // Nobody left to allocate to, so nothing accrues and no checkpoint lands.
    assert_eq!(deposit(&mut ledger, AssetId::NATIVE, 1000), 0);
    assert_eq!(ledger.checkpoint_count(&pool()).expect("count"), 1);

    // A newcomer's inflows do not reach the frozen period.
    join(&mut ledger, addr(2), 2000, BASE_TIME);
    assert_eq!(deposit(&mut ledger, AssetId::NATIVE, 1000), 200);
    assert_eq!(withdraw_native(&mut ledger, alice, 0), 100);
    assert_eq!(withdraw_native(&mut ledger, addr(2), 0), 200);
}

fn scenario_e<S: LedgerStore>(mut ledger: TestLedger<S>) {
    let (alice, stranger) = (addr(1), addr(9));
    join(&mut ledger, alice, 1000, BASE_TIME);
    deposit(&mut ledger, AssetId::NATIVE, 1000);

    let req = request(alice, 0, &[AssetId::NATIVE]);
    let rejected = ledger.withdraw(&req, &Authorization::Direct(stranger), BASE_TIME);
    assert!(matches!(rejected, Err(LedgerError::Unauthorized { .. })));

    ledger
        .set_withdrawal_delegates(&pool(), &alice, &[(sharepool_types::Address::ANY, true)])
        .expect("approve wildcard");

    let payouts = ledger
        .withdraw(&req, &Authorization::Direct(stranger), BASE_TIME)
        .expect("wildcard withdrawal");
    assert_eq!(payouts[0].amount, 100);
    assert_eq!(ledger.custodian().paid(&alice, &AssetId::NATIVE), 100);
    assert_eq!(ledger.custodian().paid(&stranger, &AssetId::NATIVE), 0);

    let recorded = ledger
        .sink()
        .of_type(EventType::CheckpointWithdrawal)
        .last()
        .cloned()
        .expect("withdrawal event");
    match recorded {
        LedgerEvent::CheckpointWithdrawal {
            account,
            receiver,
            authorizer,
            ..
        } => {
            assert_eq!(account, alice);
            assert_eq!(receiver, alice);
            assert_eq!(authorizer, Authorizer::Wildcard { caller: stranger });
        }
        other => unreachable!("unexpected event {other:?}"),
    }
}

#[test]
fn scenario_a_single_account_memory() {
    scenario_a(memory_ledger());
}

#[test]
fn scenario_a_single_account_sqlite() {
    scenario_a(sqlite_ledger());
}

#[test]
fn scenario_b_rounding_dust_memory() {
    scenario_b(memory_ledger());
}

#[test]
fn scenario_b_rounding_dust_sqlite() {
    scenario_b(sqlite_ledger());
}

#[test]
fn scenario_c_bps_change_boundary_memory() {
    scenario_c(memory_ledger());
}

#[test]
fn scenario_c_bps_change_boundary_sqlite() {
    scenario_c(sqlite_ledger());
}

#[test]
fn scenario_d_timelocked_removal_memory() {
    scenario_d(memory_ledger());
}

#[test]
fn scenario_d_timelocked_removal_sqlite() {
    scenario_d(sqlite_ledger());
}

#[test]
fn scenario_e_wildcard_delegate_memory() {
    scenario_e(memory_ledger());
}

#[test]
fn scenario_e_wildcard_delegate_sqlite() {
    scenario_e(sqlite_ledger());
}
