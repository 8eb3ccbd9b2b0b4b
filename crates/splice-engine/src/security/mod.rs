//! Security gate
//!
//! Two checks guard everything the binder executes:
//! - bundles must carry a valid ed25519 signature by the trusted publisher key
//!   over the bundle's content digest
//! - optimized caches must match the HMAC fingerprint recorded when they were
//!   produced
//!
//! The trusted publisher key is bound to the host's own signer the first time
//! the gate is asked for it, and persisted under [`PUBLISHER_KEY`].

mod fingerprint;

pub use fingerprint::{fingerprint, fingerprint_hex};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bundle::{ArchiveLimits, BundleArchive, BundleError};
use crate::store::{KeyValueStore, StoreError};

/// Store key of the bound publisher key
pub const PUBLISHER_KEY: &str = "publisher";

/// Prefix of cache fingerprint keys, keeping them apart from [`PUBLISHER_KEY`]
pub const FINGERPRINT_PREFIX: &str = "opt:";

/// Errors that keep the gate from reaching a verdict
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Security store failure
    #[error("Security store error: {0}")]
    Store(#[from] StoreError),

    /// Failed to read a cache file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bundle could not be read for verification
    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// The persisted publisher key is not a valid ed25519 key
    #[error("Stored publisher key is invalid: {0}")]
    InvalidStoredKey(String),

    /// HMAC could not be keyed
    #[error("HMAC error: {0}")]
    Hmac(String),
}

/// Signature and cache-fingerprint verifier
pub struct SecurityGate {
    host_signer: VerifyingKey,
    store: Arc<dyn KeyValueStore>,
    limits: ArchiveLimits,
}

impl SecurityGate {
    /// Create a gate for a host signed by `host_signer`
    ///
    /// # Arguments
    /// * `host_signer` - Public key the host program was signed with
    /// * `store` - Store for the publisher binding and fingerprints
    pub fn new(host_signer: VerifyingKey, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            host_signer,
            store,
            limits: ArchiveLimits::default(),
        }
    }

    /// Use `limits` when reading bundles for verification
    pub fn with_limits(mut self, limits: ArchiveLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The trusted publisher key, binding it to the host signer on first use
    pub fn trusted_key(&self) -> Result<VerifyingKey, SecurityError> {
        if let Some(stored) = self.store.get(PUBLISHER_KEY)? {
            let mut bytes = [0u8; 32];
            hex::decode_to_slice(stored.trim(), &mut bytes)
                .map_err(|e| SecurityError::InvalidStoredKey(e.to_string()))?;
            return VerifyingKey::from_bytes(&bytes)
                .map_err(|e| SecurityError::InvalidStoredKey(e.to_string()));
        }

        self.store
            .put(PUBLISHER_KEY, &hex::encode(self.host_signer.to_bytes()))?;
        info!(
            key = %hex::encode(self.host_signer.to_bytes()),
            "bound publisher key to host signer"
        );
        Ok(self.host_signer)
    }

    /// Check that the bundle at `path` is signed by the trusted publisher
    ///
    /// # Returns
    /// * `Ok(true)` - At least one signature entry verifies
    /// * `Ok(false)` - No signature entry verifies
    /// * `Err(_)` - The bundle or the store could not be read
    pub fn verify_bundle(&self, path: &Path) -> Result<bool, SecurityError> {
        let trusted = self.trusted_key()?;
        let archive = BundleArchive::open_with_limits(path, &self.limits)?;
        let digest = archive.content_digest();

        for block in archive.signature_blocks() {
            let block = match block {
                Ok(block) => block,
                Err(e) => {
                    debug!(bundle = %path.display(), error = %e, "skipping signature entry");
                    continue;
                }
            };
            if block.signer_key != trusted.to_bytes() {
                debug!(bundle = %path.display(), entry = %block.entry, "signer is not the trusted publisher");
                continue;
            }
            let signature = Signature::from_bytes(&block.signature);
            if trusted.verify(&digest, &signature).is_ok() {
                debug!(bundle = %path.display(), entry = %block.entry, "signature verified");
                return Ok(true);
            }
            warn!(bundle = %path.display(), entry = %block.entry, "signature does not match content");
        }
        Ok(false)
    }

    /// Record the fingerprint of the optimized cache at `opt_file`
    pub fn persist_cache_fingerprint(&self, opt_file: &Path) -> Result<(), SecurityError> {
        let key = self.trusted_key()?;
        let bytes = fs::read(opt_file)?;
        self.store
            .put(&store_key(opt_file), &fingerprint_hex(key.as_bytes(), &bytes)?)?;
        debug!(cache = %opt_file.display(), "persisted cache fingerprint");
        Ok(())
    }

    /// Compare the cache at `opt_file` against its recorded fingerprint
    ///
    /// A cache without a recorded fingerprint does not verify.
    pub fn verify_cache(&self, opt_file: &Path) -> Result<bool, SecurityError> {
        let Some(stored) = self.store.get(&store_key(opt_file))? else {
            return Ok(false);
        };
        let key = self.trusted_key()?;
        let bytes = fs::read(opt_file)?;
        fingerprint::matches(key.as_bytes(), &bytes, &stored)
    }

    /// Forget the fingerprint of the cache named `file_name`
    pub fn remove_fingerprint(&self, file_name: &str) -> Result<(), SecurityError> {
        self.store.remove(&fingerprint_key(file_name))?;
        Ok(())
    }
}

fn fingerprint_key(file_name: &str) -> String {
    format!("{}{}", FINGERPRINT_PREFIX, file_name)
}

fn store_key(opt_file: &Path) -> String {
    let name = opt_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| opt_file.to_string_lossy().into_owned());
    fingerprint_key(&name)
}
