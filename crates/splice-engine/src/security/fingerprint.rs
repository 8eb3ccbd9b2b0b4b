//! Optimized-cache fingerprints

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::SecurityError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `bytes` keyed by `key`
pub fn fingerprint(key: &[u8], bytes: &[u8]) -> Result<[u8; 32], SecurityError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SecurityError::Hmac(e.to_string()))?;
    mac.update(bytes);
    Ok(mac.finalize().into_bytes().into())
}

/// Hex form stored in the security store
pub fn fingerprint_hex(key: &[u8], bytes: &[u8]) -> Result<String, SecurityError> {
    Ok(hex::encode(fingerprint(key, bytes)?))
}

/// Constant-time comparison against a stored hex fingerprint
///
/// A stored value that is not valid hex never matches.
pub fn matches(key: &[u8], bytes: &[u8], stored_hex: &str) -> Result<bool, SecurityError> {
    let Ok(stored) = hex::decode(stored_hex.trim()) else {
        return Ok(false);
    };
    let actual = fingerprint(key, bytes)?;
    Ok(actual.as_slice().ct_eq(stored.as_slice()).into())
}
