//! Domain-separated BLAKE3 hashing.
//!
//! Every hash computed by the ledger is bound to a registered context string
//! so that a digest produced for one purpose can never be replayed as
//! another.
//!
//! ## Modes
//!
//! - [`derive_key`]: Context-bound derivation: addresses, authorization digests
//! - [`keyed_hash`]: Keyed MAC/PRF

/// Registered BLAKE3 context strings.
pub mod contexts {
    pub const ADDRESS_DERIVATION: &str = "Sharepool v1 address-derivation";
    pub const WITHDRAWAL_AUTHORIZATION: &str = "Sharepool v1 withdrawal-authorization";
    pub const AUTHORIZATION_NONCE: &str = "Sharepool v1 authorization-nonce";

    /// All registered context strings. Used for validation.
    pub const ALL_CONTEXTS: &[&str] = &[
        ADDRESS_DERIVATION,
        WITHDRAWAL_AUTHORIZATION,
        AUTHORIZATION_NONCE,
    ];
}

/// Derive a 32-byte value using BLAKE3's key derivation mode.
///
/// # Arguments
///
/// * `context` - A registered context string (must start with "Sharepool v1 ")
/// * `key_material` - The input key material
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    debug_assert!(
        is_registered_context(context),
        "unregistered BLAKE3 context {context:?}"
    );
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    *hasher.finalize().as_bytes()
}

/// Compute a keyed BLAKE3 hash (MAC/PRF).
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

/// Verify that a context string is registered.
pub fn is_registered_context(context: &str) -> bool {
    contexts::ALL_CONTEXTS.contains(&context)
}

/// Encode multiple dynamic fields using length-prefixed encoding.
///
/// `LE32(len(field1)) || field1 || LE32(len(field2)) || field2 || ...`
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut output = Vec::with_capacity(total_len);
    for field in fields {
        output.extend_from_slice(&(field.len() as u32).to_le_bytes());
        output.extend_from_slice(field);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_context_strings_prefixed() {
        for ctx in contexts::ALL_CONTEXTS {
            assert!(
                ctx.starts_with("Sharepool v1 "),
                "Context string '{ctx}' has wrong prefix"
            );
        }
    }

    #[test]
    fn test_derive_key_different_contexts() {
        let key1 = derive_key(contexts::ADDRESS_DERIVATION, &[0u8; 32]);
        let key2 = derive_key(contexts::WITHDRAWAL_AUTHORIZATION, &[0u8; 32]);
        assert_ne!(key1, key2);
        assert_eq!(key1, derive_key(contexts::ADDRESS_DERIVATION, &[0u8; 32]));
    }

    #[test]
    fn test_keyed_hash_depends_on_key() {
        let k1 = derive_key(contexts::AUTHORIZATION_NONCE, b"a");
        let k2 = derive_key(contexts::AUTHORIZATION_NONCE, b"b");
        assert_ne!(keyed_hash(&k1, b"msg"), keyed_hash(&k2, b"msg"));
    }

    #[test]
    fn test_multi_field_encoding() {
        let encoded = encode_multi_field(&[b"hello", b"world"]);
        assert_eq!(encoded.len(), 4 + 5 + 4 + 5);
        assert_eq!(&encoded[0..4], &5u32.to_le_bytes());
        assert_eq!(&encoded[4..9], b"hello");
        assert_eq!(&encoded[9..13], &5u32.to_le_bytes());
        assert_eq!(&encoded[13..18], b"world");
    }

    #[test]
    fn test_multi_field_boundaries_unambiguous() {
        let a = encode_multi_field(&[b"ab", b"c"]);
        let b = encode_multi_field(&[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_registered_context() {
        assert!(is_registered_context("Sharepool v1 withdrawal-authorization"));
        assert!(!is_registered_context("Sharepool v1 made-up-context"));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unregistered BLAKE3 context")]
    fn test_derive_key_rejects_unregistered_context() {
        derive_key("Sharepool v1 made-up-context", b"material");
    }
}
