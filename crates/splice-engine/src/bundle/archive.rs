//! Raw bundle archive access

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::{BundleError, Manifest};

/// Path of the patch manifest inside a bundle
pub const MANIFEST_ENTRY: &str = "META-INF/PATCH.MF";

const SIGNATURE_PREFIX: &str = "META-INF/";
const SIGNATURE_SUFFIX: &str = ".SIG";
const SIGNER_KEY: &str = "Signer-Key";
const SIGNATURE: &str = "Signature";

/// Default cap on the uncompressed size of one entry
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 16 * 1024 * 1024;

/// Default cap on the uncompressed size of a whole bundle
pub const DEFAULT_MAX_BUNDLE_SIZE: u64 = 64 * 1024 * 1024;

/// Size caps applied while a bundle is read into memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    /// Largest uncompressed entry accepted
    pub max_entry_size: u64,
    /// Largest uncompressed total accepted
    pub max_bundle_size: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_bundle_size: DEFAULT_MAX_BUNDLE_SIZE,
        }
    }
}

/// One parsed `META-INF/*.SIG` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    /// Entry name the block was read from
    pub entry: String,
    /// Ed25519 public key of the signer
    pub signer_key: [u8; 32],
    /// Ed25519 signature over the content digest
    pub signature: [u8; 64],
}

impl SignatureBlock {
    /// Parse a signature entry body
    pub fn parse(entry: &str, body: &str) -> Result<Self, BundleError> {
        let malformed = |reason: String| BundleError::MalformedSignature {
            entry: entry.to_string(),
            reason,
        };
        let attrs = Manifest::parse(body).map_err(|e| malformed(e.to_string()))?;

        let key_hex = attrs
            .get(SIGNER_KEY)
            .ok_or_else(|| malformed(format!("missing {}", SIGNER_KEY)))?;
        let sig_hex = attrs
            .get(SIGNATURE)
            .ok_or_else(|| malformed(format!("missing {}", SIGNATURE)))?;

        let mut signer_key = [0u8; 32];
        hex::decode_to_slice(key_hex.trim(), &mut signer_key)
            .map_err(|e| malformed(format!("bad {}: {}", SIGNER_KEY, e)))?;
        let mut signature = [0u8; 64];
        hex::decode_to_slice(sig_hex.trim(), &mut signature)
            .map_err(|e| malformed(format!("bad {}: {}", SIGNATURE, e)))?;

        Ok(Self {
            entry: entry.to_string(),
            signer_key,
            signature,
        })
    }

    /// Encode as entry body
    pub fn to_text(&self) -> String {
        let mut attrs = Manifest::new();
        attrs.insert("Signature-Version", "1.0");
        attrs.insert(SIGNER_KEY, &hex::encode(self.signer_key));
        attrs.insert(SIGNATURE, &hex::encode(self.signature));
        attrs.to_text()
    }
}

/// A bundle archive read fully into memory
#[derive(Debug, Clone)]
pub struct BundleArchive {
    path: PathBuf,
    entries: Vec<(String, Vec<u8>)>,
}

impl BundleArchive {
    /// Read every file entry of the archive at `path` under the default limits
    pub fn open(path: &Path) -> Result<Self, BundleError> {
        Self::open_with_limits(path, &ArchiveLimits::default())
    }

    /// Read every file entry of the archive at `path`
    ///
    /// Each entry is read through a reader bounded by `limits`; declared sizes
    /// only serve to reject early.
    ///
    /// # Errors
    /// * `EntryTooLarge` - an entry, or the running total, exceeds `limits`
    pub fn open_with_limits(path: &Path, limits: &ArchiveLimits) -> Result<Self, BundleError> {
        let file = File::open(path)?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file))?;

        let mut entries = Vec::new();
        let mut total: u64 = 0;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let remaining = limits.max_bundle_size.saturating_sub(total);
            let cap = limits.max_entry_size.min(remaining);
            let too_large = |name: String| BundleError::EntryTooLarge {
                entry: name,
                limit: cap,
            };
            if entry.size() > cap {
                return Err(too_large(name));
            }

            let mut bytes = Vec::new();
            entry.by_ref().take(cap + 1).read_to_end(&mut bytes)?;
            if bytes.len() as u64 > cap {
                return Err(too_large(name));
            }
            total += bytes.len() as u64;
            entries.push((name, bytes));
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Path the archive was read from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry bytes by exact name
    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.as_slice())
    }

    /// Entry names in archive order
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Entries under `prefix`, in archive order
    pub fn entries_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a [u8])> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.starts_with(prefix))
            .map(|(n, b)| (n.as_str(), b.as_slice()))
    }

    /// Parse `META-INF/PATCH.MF`
    pub fn manifest(&self) -> Result<Manifest, BundleError> {
        let bytes = self.entry(MANIFEST_ENTRY).ok_or(BundleError::MissingManifest)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|e| BundleError::MalformedManifest(format!("not UTF-8: {}", e)))?;
        Manifest::parse(text)
    }

    /// Every signature entry; malformed entries are returned as errors
    pub fn signature_blocks(&self) -> Vec<Result<SignatureBlock, BundleError>> {
        self.entries
            .iter()
            .filter(|(n, _)| is_signature_entry(n))
            .map(|(name, bytes)| {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    BundleError::MalformedSignature {
                        entry: name.clone(),
                        reason: format!("not UTF-8: {}", e),
                    }
                })?;
                SignatureBlock::parse(name, text)
            })
            .collect()
    }

    /// Digest over every non-signature entry; the message publishers sign
    pub fn content_digest(&self) -> [u8; 32] {
        content_digest(
            self.entries
                .iter()
                .map(|(n, b)| (n.as_str(), b.as_slice())),
        )
    }
}

/// Whether an entry name is a signature block
pub(crate) fn is_signature_entry(name: &str) -> bool {
    name.starts_with(SIGNATURE_PREFIX)
        && name.ends_with(SIGNATURE_SUFFIX)
        && !name[SIGNATURE_PREFIX.len()..].contains('/')
}

/// SHA-256 over `name || 0x00 || sha256(bytes)` for each non-signature entry,
/// in name order
pub fn content_digest<'a>(entries: impl Iterator<Item = (&'a str, &'a [u8])>) -> [u8; 32] {
    let mut signed: Vec<(&str, &[u8])> = entries.filter(|(n, _)| !is_signature_entry(n)).collect();
    signed.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (name, bytes) in signed {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(Sha256::digest(bytes));
    }
    hasher.finalize().into()
}
