//! Subcommand implementations

pub mod fingerprint;
pub mod inspect;
pub mod keygen;
pub mod pack;
pub mod verify;

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use ed25519_dalek::{SigningKey, VerifyingKey};

/// Parse a public key given as hex or as a path to a file holding the hex
pub fn read_public_key(arg: &str) -> anyhow::Result<VerifyingKey> {
    let path = Path::new(arg);
    let text = if path.is_file() {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    } else {
        arg.to_string()
    };

    let mut bytes = [0u8; 32];
    hex::decode_to_slice(text.trim(), &mut bytes).context("public key is not 32 hex-encoded bytes")?;
    VerifyingKey::from_bytes(&bytes).context("public key is not a valid ed25519 point")
}

/// Read a secret key file written by `keygen`
pub fn read_signing_key(path: &Path) -> anyhow::Result<SigningKey> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut bytes = [0u8; 32];
    if hex::decode_to_slice(text.trim(), &mut bytes).is_err() {
        bail!("{} does not hold a hex-encoded secret key", path.display());
    }
    Ok(SigningKey::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_from_hex_or_file() {
        let key = SigningKey::from_bytes(&[3u8; 32]).verifying_key();
        let hex_key = hex::encode(key.as_bytes());
        assert_eq!(read_public_key(&hex_key).unwrap(), key);

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("publisher.key.pub");
        fs::write(&file, format!("{}\n", hex_key)).unwrap();
        assert_eq!(read_public_key(file.to_str().unwrap()).unwrap(), key);

        assert!(read_public_key("not-hex").is_err());
    }

    #[test]
    fn test_bad_secret_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("publisher.key");
        fs::write(&file, "abc").unwrap();
        assert!(read_signing_key(&file).is_err());
        assert!(read_signing_key(&dir.path().join("missing")).is_err());
    }
}
