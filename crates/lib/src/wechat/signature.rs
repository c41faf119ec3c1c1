//! Endpoint ownership signature: SHA-1 over the sorted (token, timestamp, nonce) triple.
//!
//! The provider signs the challenge GET and every message POST with the same scheme.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Why a signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("account has no token configured")]
    EmptyToken,
    #[error("timestamp is not numeric: {0:?}")]
    BadTimestamp(String),
    #[error("signature mismatch")]
    Mismatch,
}

/// Compute the expected signature: sort the three strings, concatenate, SHA-1, lowercase hex.
pub fn sign(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    for p in parts {
        hasher.update(p.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Check a provider signature, returning the reason on rejection.
pub fn check(token: &str, timestamp: &str, nonce: &str, signature: &str) -> Result<(), SignatureError> {
    if token.is_empty() {
        return Err(SignatureError::EmptyToken);
    }
    if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SignatureError::BadTimestamp(timestamp.to_string()));
    }
    let expected = sign(token, timestamp, nonce);
    if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// True when `signature` is the provider signature for (token, timestamp, nonce).
pub fn verify(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    check(token, timestamp, nonce, signature).is_ok()
}
