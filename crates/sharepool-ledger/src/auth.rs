//! Withdrawal authorization.
//!
//! A withdrawal is authorized either directly by a caller identity (the
//! account itself, an approved delegate, or anyone when the wildcard
//! delegate is set) or by an off-line Ed25519 signature from the key that
//! owns the account.
//!
//! ## Signed authorization
//!
//! The signature covers a domain-separated BLAKE3 digest:
//!
//! ```text
//! digest = BLAKE3::derive_key("Sharepool v1 withdrawal-authorization",
//!     encode_multi_field([client, pool_id, account, receiver, assets,
//!                         period_index, nonce, expiry]))
//! ```
//!
//! Integers are big-endian; `assets` is the concatenation of the 32-byte
//! asset identifiers in request order.

use sharepool_crypto::blake3::{self, contexts};
use sharepool_crypto::ed25519::{derive_address, KeyPair, Signature, VerifyingKey};
use sharepool_types::events::Authorizer;
use sharepool_types::{Address, AssetId, PeriodIndex, PoolKey, Timestamp};

use crate::model::AccountShare;
use crate::store::LedgerStore;
use crate::{LedgerError, Result};

/// The parameters of one withdrawal call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub pool: PoolKey,
    pub account: Address,
    /// Where the withdrawn assets go. Need not be the account.
    pub receiver: Address,
    pub assets: Vec<AssetId>,
    pub period_index: PeriodIndex,
}

/// How a withdrawal is authorized.
#[derive(Clone, Debug)]
pub enum Authorization {
    /// A stable caller identity supplied by the host.
    Direct(Address),
    /// An off-line signature by the account's key.
    Signed(SignedWithdrawal),
}

/// An off-line signed withdrawal authorization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedWithdrawal {
    pub public_key: [u8; 32],
    /// Replay protection; each nonce is accepted once per account.
    pub nonce: u64,
    /// Last accepted timestamp (inclusive).
    pub expiry: Timestamp,
    pub signature: [u8; 64],
}

impl SignedWithdrawal {
    /// The digest a signer signs for `request`.
    pub fn digest(request: &WithdrawalRequest, nonce: u64, expiry: Timestamp) -> [u8; 32] {
        let assets: Vec<u8> = request
            .assets
            .iter()
            .flat_map(|a| a.as_bytes().iter().copied())
            .collect();
        let material = blake3::encode_multi_field(&[
            request.pool.client.as_bytes(),
            &request.pool.pool_id.to_be_bytes(),
            request.account.as_bytes(),
            request.receiver.as_bytes(),
            &assets,
            &request.period_index.to_be_bytes(),
            &nonce.to_be_bytes(),
            &expiry.to_be_bytes(),
        ]);
        blake3::derive_key(contexts::WITHDRAWAL_AUTHORIZATION, &material)
    }

    /// Sign `request` with `keypair`.
    pub fn sign(keypair: &KeyPair, request: &WithdrawalRequest, nonce: u64, expiry: Timestamp) -> Self {
        let digest = Self::digest(request, nonce, expiry);
        Self {
            public_key: keypair.verifying_key.to_bytes(),
            nonce,
            expiry,
            signature: keypair.signing_key.sign(&digest).to_bytes(),
        }
    }

    /// Deterministic per-key nonce sequence, so a signer needs only a
    /// counter to avoid reuse.
    pub fn derive_nonce(keypair: &KeyPair, counter: u64) -> u64 {
        let nonce_key = blake3::derive_key(
            contexts::AUTHORIZATION_NONCE,
            &keypair.signing_key.to_bytes(),
        );
        let out = blake3::keyed_hash(&nonce_key, &counter.to_be_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&out[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Check expiry, key ownership and the signature. Does not touch the
    /// nonce store.
    pub fn verify(&self, request: &WithdrawalRequest, now: Timestamp) -> Result<()> {
        if now > self.expiry {
            return Err(LedgerError::SignatureExpired {
                expiry: self.expiry,
                now,
            });
        }
        let key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|_| LedgerError::InvalidSignature)?;
        if derive_address(&key) != request.account {
            return Err(LedgerError::SignerMismatch {
                account: request.account,
            });
        }
        let digest = Self::digest(request, self.nonce, self.expiry);
        key.verify(&digest, &Signature::from_bytes(&self.signature))
            .map_err(|_| LedgerError::InvalidSignature)
    }
}

/// Resolve a direct caller against the account's delegate set.
///
/// # Errors
///
/// - [`LedgerError::Unauthorized`] if the caller is not covered
pub fn authorize_caller(
    caller: &Address,
    account: &Address,
    share: &AccountShare,
) -> Result<Authorizer> {
    if caller == account {
        Ok(Authorizer::Account)
    } else if share.is_delegate(caller) {
        Ok(Authorizer::Delegate { caller: *caller })
    } else if share.has_wildcard_delegate() {
        Ok(Authorizer::Wildcard { caller: *caller })
    } else {
        Err(LedgerError::Unauthorized {
            caller: *caller,
            account: *account,
        })
    }
}

/// Authorize `request`, consuming the nonce of a signed authorization.
pub(crate) fn authorize<S: LedgerStore>(
    store: &mut S,
    authorization: &Authorization,
    request: &WithdrawalRequest,
    share: &AccountShare,
    now: Timestamp,
) -> Result<Authorizer> {
    let result = match authorization {
        Authorization::Direct(caller) => authorize_caller(caller, &request.account, share),
        Authorization::Signed(signed) => signed.verify(request, now).and_then(|()| {
            if store.consume_nonce(&request.pool, &request.account, signed.nonce)? {
                Ok(Authorizer::Signature {
                    nonce: signed.nonce,
                })
            } else {
                Err(LedgerError::NonceReused {
                    nonce: signed.nonce,
                })
            }
        }),
    };
    if let Err(err) = &result {
        tracing::warn!(pool = %request.pool, account = %request.account, error = %err, "withdrawal authorization rejected");
    }
    result
}
