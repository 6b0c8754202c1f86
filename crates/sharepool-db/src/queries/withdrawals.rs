//! Withdrawal resume checkpoints.

use rusqlite::{Connection, OptionalExtension};
use sharepool_types::{Address, Amount, AssetId};

use crate::{amount_from_blob, amount_to_blob, Result};

/// Key of a resume checkpoint within a pool.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawalKey<'a> {
    pub account: &'a Address,
    pub period_index: u32,
    pub asset: &'a AssetId,
}

/// Get the resume checkpoint as `(processed_until, cumulative)`.
pub fn get(
    conn: &Connection,
    client: &Address,
    pool_id: u64,
    key: WithdrawalKey<'_>,
) -> Result<Option<(u64, Amount)>> {
    let raw = conn
        .query_row(
            "SELECT processed_until, cumulative FROM withdrawal_checkpoints
             WHERE client = ?1 AND pool_id = ?2 AND account = ?3 AND period_index = ?4 AND asset = ?5",
            rusqlite::params![
                client.as_bytes().as_slice(),
                pool_id as i64,
                key.account.as_bytes().as_slice(),
                i64::from(key.period_index),
                key.asset.as_bytes().as_slice(),
            ],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, Vec<u8>>(1)?)),
        )
        .optional()?;

    match raw {
        Some((processed_until, cumulative)) => {
            Ok(Some((processed_until, amount_from_blob(&cumulative)?)))
        }
        None => Ok(None),
    }
}

/// Insert or advance a resume checkpoint.
pub fn upsert(
    conn: &Connection,
    client: &Address,
    pool_id: u64,
    key: WithdrawalKey<'_>,
    processed_until: u64,
    cumulative: Amount,
) -> Result<()> {
    conn.execute(
        "INSERT INTO withdrawal_checkpoints
             (client, pool_id, account, period_index, asset, processed_until, cumulative)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (client, pool_id, account, period_index, asset) DO UPDATE SET
             processed_until = excluded.processed_until,
             cumulative = excluded.cumulative",
        rusqlite::params![
            client.as_bytes().as_slice(),
            pool_id as i64,
            key.account.as_bytes().as_slice(),
            i64::from(key.period_index),
            key.asset.as_bytes().as_slice(),
            processed_until as i64,
            amount_to_blob(cumulative).as_slice(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{accounts, pools};

    #[test]
    fn test_upsert_and_advance() {
        let conn = crate::open_memory().expect("open test db");
        let client = Address::from_bytes([1; 32]);
        let account = Address::from_bytes([2; 32]);
        pools::upsert(&conn, &client, 1, 1000, 2, 100).expect("pool");
        accounts::upsert(
            &conn,
            &client,
            1,
            &accounts::AccountRow {
                account,
                active_period: Some(0),
                created_at: 100,
                removable_at: 100,
                periods: vec![accounts::PeriodRow {
                    bps: 1000,
                    start_index: 0,
                    end_index: None,
                }],
                delegates: Vec::new(),
            },
        )
        .expect("account");

        let key = WithdrawalKey {
            account: &account,
            period_index: 0,
            asset: &AssetId::NATIVE,
        };
        assert!(get(&conn, &client, 1, key).expect("get").is_none());

        upsert(&conn, &client, 1, key, 1, 100).expect("insert");
        upsert(&conn, &client, 1, key, 2, 250).expect("advance");
        assert_eq!(get(&conn, &client, 1, key).expect("get"), Some((2, 250)));
    }
}
