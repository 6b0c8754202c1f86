//! SQL schema definitions.
//!
//! Pools are keyed by `(client, pool_id)`. Foreign keys are deferred so a
//! single ledger call may write child rows before the parent row it creates.

/// Complete schema for the v1 ledger database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Pools and the checkpoint log
-- ============================================================

CREATE TABLE IF NOT EXISTS pools (
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    total_bps INTEGER NOT NULL CHECK (total_bps BETWEEN 0 AND 10000),
    checkpoint_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (client, pool_id)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    idx INTEGER NOT NULL,
    total_bps INTEGER NOT NULL CHECK (total_bps BETWEEN 0 AND 10000),
    PRIMARY KEY (client, pool_id, idx),
    FOREIGN KEY (client, pool_id) REFERENCES pools(client, pool_id)
        DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS checkpoint_balances (
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    idx INTEGER NOT NULL,
    asset BLOB NOT NULL,
    cumulative BLOB NOT NULL,
    PRIMARY KEY (client, pool_id, idx, asset),
    FOREIGN KEY (client, pool_id, idx) REFERENCES checkpoints(client, pool_id, idx)
        DEFERRABLE INITIALLY DEFERRED
);

-- ============================================================
-- Account shares
-- ============================================================

CREATE TABLE IF NOT EXISTS account_shares (
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    account BLOB NOT NULL,
    active_period INTEGER,
    created_at INTEGER NOT NULL,
    removable_at INTEGER NOT NULL,
    PRIMARY KEY (client, pool_id, account),
    FOREIGN KEY (client, pool_id) REFERENCES pools(client, pool_id)
        DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS account_periods (
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    account BLOB NOT NULL,
    period_index INTEGER NOT NULL,
    bps INTEGER NOT NULL CHECK (bps BETWEEN 0 AND 10000),
    start_index INTEGER NOT NULL,
    end_index INTEGER,
    PRIMARY KEY (client, pool_id, account, period_index),
    FOREIGN KEY (client, pool_id, account) REFERENCES account_shares(client, pool_id, account)
        DEFERRABLE INITIALLY DEFERRED,
    CHECK (end_index IS NULL OR end_index >= start_index)
);

CREATE TABLE IF NOT EXISTS withdrawal_delegates (
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    account BLOB NOT NULL,
    delegate BLOB NOT NULL,
    PRIMARY KEY (client, pool_id, account, delegate),
    FOREIGN KEY (client, pool_id, account) REFERENCES account_shares(client, pool_id, account)
        DEFERRABLE INITIALLY DEFERRED
);

-- ============================================================
-- Withdrawal resume state and replay protection
-- ============================================================

CREATE TABLE IF NOT EXISTS withdrawal_checkpoints (
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    account BLOB NOT NULL,
    period_index INTEGER NOT NULL,
    asset BLOB NOT NULL,
    processed_until INTEGER NOT NULL,
    cumulative BLOB NOT NULL,
    PRIMARY KEY (client, pool_id, account, period_index, asset),
    FOREIGN KEY (client, pool_id, account, period_index)
        REFERENCES account_periods(client, pool_id, account, period_index)
        DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS used_nonces (
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    account BLOB NOT NULL,
    nonce INTEGER NOT NULL,
    PRIMARY KEY (client, pool_id, account, nonce)
);

-- ============================================================
-- Append-only event log
-- ============================================================

CREATE TABLE IF NOT EXISTS ledger_events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    client BLOB NOT NULL,
    pool_id INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_events_pool ON ledger_events(client, pool_id, seq);
"#;
