//! `splice fingerprint`: the HMAC the engine stores for an optimized cache.

use std::fs;
use std::path::Path;

use anyhow::Context;
use splice_engine::security::fingerprint_hex;

use super::read_public_key;

pub fn execute(file: &Path, key: &str) -> anyhow::Result<String> {
    let publisher = read_public_key(key)?;
    let bytes = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    Ok(fingerprint_hex(publisher.as_bytes(), &bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn test_fingerprint_depends_on_key_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.apatch");
        fs::write(&file, b"cache bytes").unwrap();
        let a = hex::encode(SigningKey::from_bytes(&[1u8; 32]).verifying_key().as_bytes());
        let b = hex::encode(SigningKey::from_bytes(&[2u8; 32]).verifying_key().as_bytes());

        let fa = execute(&file, &a).unwrap();
        assert_eq!(fa.len(), 64);
        assert_eq!(fa, execute(&file, &a).unwrap());
        assert_ne!(fa, execute(&file, &b).unwrap());

        fs::write(&file, b"cache bytez").unwrap();
        assert_ne!(fa, execute(&file, &a).unwrap());
    }
}
