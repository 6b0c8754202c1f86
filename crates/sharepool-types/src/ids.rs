//! Account, asset and pool identifiers.
//!
//! Addresses and asset identifiers are opaque 32-byte values. Addresses that
//! belong to a signing identity are derived from an Ed25519 public key by
//! `sharepool-crypto`; any other stable caller identifier can be used for
//! accounts that only withdraw directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::ParseIdError;

/// A stable, unforgeable caller or recipient identifier.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(#[serde_as(as = "serde_with::hex::Hex")] pub [u8; 32]);

impl Address {
    /// Wildcard delegate: when present in a delegate set, anyone may trigger
    /// withdrawal on the account's behalf. Never a valid account.
    pub const ANY: Address = Address([0xFF; 32]);

    /// Create an address from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of this address.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the reserved wildcard address.
    pub fn is_wildcard(&self) -> bool {
        *self == Self::ANY
    }
}

/// Identifier of an asset accruing in a pool.
///
/// The native value asset and fungible tokens are treated uniformly.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(#[serde_as(as = "serde_with::hex::Hex")] pub [u8; 32]);

impl AssetId {
    /// The host's native value asset.
    pub const NATIVE: AssetId = AssetId([0u8; 32]);

    /// Create an asset identifier from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of this asset identifier.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Identifies a share pool: the client that owns it plus the client's
/// internal pool number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub client: Address,
    pub pool_id: u64,
}

impl PoolKey {
    pub const fn new(client: Address, pool_id: u64) -> Self {
        Self { client, pool_id }
    }
}

fn decode_32(s: &str) -> Result<[u8; 32], ParseIdError> {
    let bytes = hex::decode(s)?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ParseIdError::InvalidLength {
            expected: 32,
            actual,
        })
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return f.write_str("Address(ANY)");
        }
        write!(f, "Address({}..)", &hex::encode(self.0)[..8])
    }
}

impl FromStr for Address {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_32(s).map(Self)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NATIVE {
            return f.write_str("AssetId(NATIVE)");
        }
        write!(f, "AssetId({}..)", &hex::encode(self.0)[..8])
    }
}

impl FromStr for AssetId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_32(s).map(Self)
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.pool_id)
    }
}

/// Parses the `<client-hex>:<pool-id>` form produced by `Display`.
impl FromStr for PoolKey {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (client, pool_id) = s
            .split_once(':')
            .ok_or_else(|| ParseIdError::MalformedPoolKey(s.to_string()))?;
        let pool_id = pool_id
            .parse()
            .map_err(|_| ParseIdError::MalformedPoolKey(s.to_string()))?;
        Ok(Self {
            client: client.parse()?,
            pool_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_parse() {
        let addr = Address([0xAB; 32]);
        let text = addr.to_string();
        assert_eq!(text.len(), 64);
        let parsed: Address = text.parse().expect("parse address");
        assert_eq!(parsed, addr);
    }

    #[test]
    fn test_address_wrong_length_rejected() {
        let result = "abcd".parse::<Address>();
        assert!(matches!(
            result,
            Err(ParseIdError::InvalidLength {
                expected: 32,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_wildcard_is_distinct() {
        assert!(Address::ANY.is_wildcard());
        assert!(!Address([0u8; 32]).is_wildcard());
        assert_eq!(format!("{:?}", Address::ANY), "Address(ANY)");
    }

    #[test]
    fn test_pool_key_display_parse() {
        let key = PoolKey::new(Address([0x01; 32]), 42);
        let text = key.to_string();
        assert!(text.ends_with(":42"));
        let parsed: PoolKey = text.parse().expect("parse pool key");
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_pool_key_malformed() {
        assert!("no-separator".parse::<PoolKey>().is_err());
        let bad_id = format!("{}:abc", Address([0x01; 32]));
        assert!(bad_id.parse::<PoolKey>().is_err());
    }

    #[test]
    fn test_asset_serializes_as_hex() {
        let asset = AssetId([0x0F; 32]);
        let json = serde_json::to_string(&asset).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "0f".repeat(32)));
        let back: AssetId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, asset);
    }
}
