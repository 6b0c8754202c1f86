//! Ed25519 signing and verification (RFC 8032).
//!
//! Recipients that want to authorize withdrawals off-line hold an Ed25519
//! keypair. Their ledger address is derived from the public key, so a
//! signature can be checked against an account without any key registry.
//!
//! This module wraps `ed25519-dalek` with sharepool-specific types.

use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};
use sharepool_types::Address;
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// An Ed25519 signing key (private key).
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl Clone for SigningKey {
    fn clone(&self) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(&self.inner.to_bytes()),
        }
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        let mut bytes = self.inner.to_bytes();
        bytes.zeroize();
    }
}

/// An Ed25519 verification key (public key).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

/// An Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

/// An Ed25519 keypair.
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a signing key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Get the raw bytes of this signing key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Get the corresponding verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }
}

impl VerifyingKey {
    /// Create a verifying key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Get the raw bytes of this verifying key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Get the raw bytes as a slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.inner.as_bytes()
    }

    /// Verify a signature on a message.
    ///
    /// Uses strict verification, rejecting malleable signatures.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.inner
            .verify_strict(message, &signature.inner)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// The ledger address owned by this key.
    pub fn address(&self) -> Address {
        derive_address(self)
    }
}

impl Signature {
    /// Create a signature from raw bytes.
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: ed25519_dalek::Signature::from_bytes(bytes),
        }
    }

    /// Get the raw bytes of this signature.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}

impl KeyPair {
    /// Generate a new random Ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate();
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create a keypair from a signing key's raw bytes.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// The ledger address owned by this keypair.
    pub fn address(&self) -> Address {
        self.verifying_key.address()
    }
}

/// Derive a ledger address from a public key.
///
/// `address = BLAKE3::derive_key("Sharepool v1 address-derivation", public_key)`
pub fn derive_address(public_key: &VerifyingKey) -> Address {
    Address::from_bytes(crate::blake3::derive_key(
        crate::blake3::contexts::ADDRESS_DERIVATION,
        public_key.as_bytes(),
    ))
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.verifying_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let kp = KeyPair::generate();
        let msg = b"sharepool withdrawal";
        let sig = kp.signing_key.sign(msg);
        assert!(kp.verifying_key.verify(msg, &sig).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let kp = KeyPair::generate();
        let sig = kp.signing_key.sign(b"correct message");
        assert!(kp.verifying_key.verify(b"wrong message", &sig).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let sig = kp1.signing_key.sign(b"test");
        assert!(kp2.verifying_key.verify(b"test", &sig).is_err());
    }

    #[test]
    fn test_signature_bytes_roundtrip() {
        let kp = KeyPair::generate();
        let sig = kp.signing_key.sign(b"test");
        assert_eq!(Signature::from_bytes(&sig.to_bytes()), sig);
    }

    #[test]
    fn test_verifying_key_bytes_roundtrip() {
        let kp = KeyPair::generate();
        let restored = VerifyingKey::from_bytes(&kp.verifying_key.to_bytes()).expect("valid key");
        assert_eq!(restored, kp.verifying_key);
    }

    #[test]
    fn test_address_derivation_deterministic() {
        let seed = [42u8; 32];
        let kp1 = KeyPair::from_bytes(&seed);
        let kp2 = KeyPair::from_bytes(&seed);
        assert_eq!(kp1.address(), kp2.address());

        let kp3 = KeyPair::from_bytes(&[43u8; 32]);
        assert_ne!(kp1.address(), kp3.address());
    }

    #[test]
    fn test_address_is_not_raw_public_key() {
        let kp = KeyPair::from_bytes(&[7u8; 32]);
        assert_ne!(kp.address().as_bytes(), kp.verifying_key.as_bytes());
        assert!(!kp.address().is_wildcard());
    }
}
