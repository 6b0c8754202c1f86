//! Replay protection for signed withdrawal authorizations.

use rusqlite::Connection;
use sharepool_types::Address;

use crate::Result;

/// Record a nonce as used. Returns `false` if it had already been used.
pub fn consume(conn: &Connection, client: &Address, pool_id: u64, account: &Address, nonce: u64) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO used_nonces (client, pool_id, account, nonce) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            client.as_bytes().as_slice(),
            pool_id as i64,
            account.as_bytes().as_slice(),
            nonce as i64,
        ],
    )?;
    Ok(inserted == 1)
}
