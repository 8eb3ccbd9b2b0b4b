//! `splice keygen`: generate a publisher key pair.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

/// Path of the public half for a secret key file
pub fn public_path(secret: &Path) -> PathBuf {
    let mut name = secret.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// Write a fresh key pair and return the public key as hex
pub fn execute(out: &Path, force: bool) -> anyhow::Result<String> {
    let public_file = public_path(out);
    if !force && (out.exists() || public_file.exists()) {
        bail!("{} already exists, pass --force to replace it", out.display());
    }

    let key = SigningKey::generate(&mut OsRng);
    let public = hex::encode(key.verifying_key().as_bytes());

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(out, format!("{}\n", hex::encode(key.to_bytes())))
        .with_context(|| format!("failed to write {}", out.display()))?;
    fs::write(&public_file, format!("{}\n", public))
        .with_context(|| format!("failed to write {}", public_file.display()))?;
    Ok(public)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{read_public_key, read_signing_key};

    #[test]
    fn test_keygen_writes_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("keys/publisher.key");

        let public = execute(&out, false).unwrap();

        let secret = read_signing_key(&out).unwrap();
        let stored = read_public_key(public_path(&out).to_str().unwrap()).unwrap();
        assert_eq!(secret.verifying_key(), stored);
        assert_eq!(hex::encode(stored.as_bytes()), public);
    }

    #[test]
    fn test_keygen_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("publisher.key");
        let first = execute(&out, false).unwrap();

        assert!(execute(&out, false).is_err());
        assert_eq!(read_public_key(&first).unwrap(), read_signing_key(&out).unwrap().verifying_key());

        let second = execute(&out, true).unwrap();
        assert_ne!(first, second);
    }
}
