//! Account share rows: membership metadata, periods and delegates.

use rusqlite::{Connection, OptionalExtension};
use sharepool_types::Address;

use crate::{address_from_blob, Result};

/// A raw account share with its periods and delegates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRow {
    pub account: Address,
    pub active_period: Option<u32>,
    pub created_at: u64,
    pub removable_at: u64,
    pub periods: Vec<PeriodRow>,
    pub delegates: Vec<Address>,
}

/// A raw period row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRow {
    pub bps: u16,
    pub start_index: u64,
    pub end_index: Option<u64>,
}

/// Insert or replace an account share and all of its child rows.
pub fn upsert(conn: &Connection, client: &Address, pool_id: u64, row: &AccountRow) -> Result<()> {
    conn.execute(
        "INSERT INTO account_shares (client, pool_id, account, active_period, created_at, removable_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (client, pool_id, account) DO UPDATE SET
             active_period = excluded.active_period,
             removable_at = excluded.removable_at",
        rusqlite::params![
            client.as_bytes().as_slice(),
            pool_id as i64,
            row.account.as_bytes().as_slice(),
            row.active_period.map(i64::from),
            row.created_at as i64,
            row.removable_at as i64,
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO account_periods (client, pool_id, account, period_index, bps, start_index, end_index)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (client, pool_id, account, period_index) DO UPDATE SET
             end_index = excluded.end_index",
    )?;
    for (index, period) in row.periods.iter().enumerate() {
        stmt.execute(rusqlite::params![
            client.as_bytes().as_slice(),
            pool_id as i64,
            row.account.as_bytes().as_slice(),
            index as i64,
            period.bps,
            period.start_index as i64,
            period.end_index.map(|e| e as i64),
        ])?;
    }

    conn.execute(
        "DELETE FROM withdrawal_delegates WHERE client = ?1 AND pool_id = ?2 AND account = ?3",
        rusqlite::params![
            client.as_bytes().as_slice(),
            pool_id as i64,
            row.account.as_bytes().as_slice()
        ],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO withdrawal_delegates (client, pool_id, account, delegate) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for delegate in &row.delegates {
        stmt.execute(rusqlite::params![
            client.as_bytes().as_slice(),
            pool_id as i64,
            row.account.as_bytes().as_slice(),
            delegate.as_bytes().as_slice(),
        ])?;
    }
    Ok(())
}

/// Load one account share.
pub fn get(conn: &Connection, client: &Address, pool_id: u64, account: &Address) -> Result<Option<AccountRow>> {
    let header = conn
        .query_row(
            "SELECT active_period, created_at, removable_at FROM account_shares
             WHERE client = ?1 AND pool_id = ?2 AND account = ?3",
            rusqlite::params![
                client.as_bytes().as_slice(),
                pool_id as i64,
                account.as_bytes().as_slice()
            ],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, i64>(1)? as u64,
                    row.get::<_, i64>(2)? as u64,
                ))
            },
        )
        .optional()?;

    let Some((active_period, created_at, removable_at)) = header else {
        return Ok(None);
    };

    Ok(Some(AccountRow {
        account: *account,
        active_period: active_period.map(|p| p as u32),
        created_at,
        removable_at,
        periods: periods(conn, client, pool_id, account)?,
        delegates: delegates(conn, client, pool_id, account)?,
    }))
}

/// List every account ever registered in a pool, ordered by address.
pub fn list(conn: &Connection, client: &Address, pool_id: u64) -> Result<Vec<AccountRow>> {
    let mut stmt = conn.prepare(
        "SELECT account FROM account_shares WHERE client = ?1 AND pool_id = ?2 ORDER BY account",
    )?;
    let accounts = stmt
        .query_map(
            rusqlite::params![client.as_bytes().as_slice(), pool_id as i64],
            |row| row.get::<_, Vec<u8>>(0),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(accounts.len());
    for raw in accounts {
        let account = address_from_blob(&raw)?;
        if let Some(row) = get(conn, client, pool_id, &account)? {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn periods(conn: &Connection, client: &Address, pool_id: u64, account: &Address) -> Result<Vec<PeriodRow>> {
    let mut stmt = conn.prepare(
        "SELECT bps, start_index, end_index FROM account_periods
         WHERE client = ?1 AND pool_id = ?2 AND account = ?3
         ORDER BY period_index",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                client.as_bytes().as_slice(),
                pool_id as i64,
                account.as_bytes().as_slice()
            ],
            |row| {
                Ok(PeriodRow {
                    bps: row.get(0)?,
                    start_index: row.get::<_, i64>(1)? as u64,
                    end_index: row.get::<_, Option<i64>>(2)?.map(|e| e as u64),
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn delegates(conn: &Connection, client: &Address, pool_id: u64, account: &Address) -> Result<Vec<Address>> {
    let mut stmt = conn.prepare(
        "SELECT delegate FROM withdrawal_delegates
         WHERE client = ?1 AND pool_id = ?2 AND account = ?3
         ORDER BY delegate",
    )?;
    let raw = stmt
        .query_map(
            rusqlite::params![
                client.as_bytes().as_slice(),
                pool_id as i64,
                account.as_bytes().as_slice()
            ],
            |row| row.get::<_, Vec<u8>>(0),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raw.iter().map(|blob| address_from_blob(blob)).collect()
}
