//! Integration test crate for the sharepool ledger.
//!
//! The library half holds fixtures shared by the scenarios under `tests/`:
//! deterministic addresses, ledgers over either store, and deposit and
//! withdrawal shorthands that fail the test on error.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p sharepool-integration-tests
//! ```

use sharepool_ledger::{
    Authorization, EventLog, Ledger, LedgerStore, MemoryCustodian, MemoryStore, Payout,
    ShareGrant, SqliteStore, WithdrawalRequest,
};
use sharepool_types::{Address, Amount, AssetId, Bps, PeriodIndex, PoolKey, Timestamp};

/// Base timestamp for test scenarios.
pub const BASE_TIME: Timestamp = 1_700_000_000;

/// A ledger over `S` with the in-memory custodian and event log.
pub type TestLedger<S> = Ledger<S, MemoryCustodian, EventLog>;

/// Install a test-friendly tracing subscriber once per process.
/// Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic address `n`.
pub fn addr(n: u8) -> Address {
    Address::from_bytes([n; 32])
}

/// Deterministic non-native asset `n`.
pub fn token(n: u8) -> AssetId {
    AssetId::from_bytes([n; 32])
}

/// The pool most scenarios use.
pub fn pool() -> PoolKey {
    PoolKey::new(addr(0xC1), 1)
}

pub fn memory_ledger() -> TestLedger<MemoryStore> {
    init_tracing();
    Ledger::new(MemoryStore::new(), MemoryCustodian::new(), EventLog::new())
}

pub fn sqlite_ledger() -> TestLedger<SqliteStore> {
    init_tracing();
    let store = SqliteStore::open_memory().expect("open in-memory ledger database");
    Ledger::new(store, MemoryCustodian::new(), EventLog::new())
}

/// Add `account` at `bps`, removable at `removable_at`.
pub fn join<S: LedgerStore>(
    ledger: &mut TestLedger<S>,
    account: Address,
    bps: Bps,
    removable_at: Timestamp,
) {
    ledger
        .add_account_shares(&pool(), &[ShareGrant::new(account, bps, removable_at)], BASE_TIME)
        .expect("add account share");
}

/// Hand `amount` of `asset` to the custodian and flush it into the log.
/// Returns what the pool was allocated.
pub fn deposit<S: LedgerStore>(
    ledger: &mut TestLedger<S>,
    asset: AssetId,
    amount: Amount,
) -> Amount {
    ledger.custodian_mut().receive(&pool(), asset, amount);
    ledger
        .flush_pending_inflows(&pool())
        .expect("flush pending inflows")
        .iter()
        .map(|(_, allocated)| *allocated)
        .sum()
}

/// The request `account` makes to withdraw `assets` of one period to itself.
pub fn request(account: Address, period_index: PeriodIndex, assets: &[AssetId]) -> WithdrawalRequest {
    WithdrawalRequest {
        pool: pool(),
        account,
        receiver: account,
        assets: assets.to_vec(),
        period_index,
    }
}

/// Withdraw as the account itself; returns the single native payout.
pub fn withdraw_native<S: LedgerStore>(
    ledger: &mut TestLedger<S>,
    account: Address,
    period_index: PeriodIndex,
) -> Amount {
    let payouts: Vec<Payout> = ledger
        .withdraw(
            &request(account, period_index, &[AssetId::NATIVE]),
            &Authorization::Direct(account),
            BASE_TIME,
        )
        .expect("withdraw");
    payouts[0].amount
}
