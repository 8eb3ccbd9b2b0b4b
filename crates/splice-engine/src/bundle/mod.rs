//! Patch bundles
//!
//! A bundle is a zip archive:
//!
//! ```text
//! out.apatch
//! ├── META-INF/PATCH.MF      manifest (Patch-Name, Created-Time, *-Classes)
//! ├── META-INF/<ALIAS>.SIG   one or more publisher signatures
//! └── classes/...            replacement classes, format owned by the runtime
//! ```
//!
//! [`Patch`] is the in-memory view of a bundle's manifest; [`BundleArchive`]
//! gives raw entry access for the security gate and the runtime;
//! [`BundleWriter`] produces signed bundles for tooling and tests.

mod archive;
mod manifest;
mod patch;
mod writer;

pub use archive::{
    content_digest, ArchiveLimits, BundleArchive, SignatureBlock, DEFAULT_MAX_BUNDLE_SIZE,
    DEFAULT_MAX_ENTRY_SIZE, MANIFEST_ENTRY,
};
pub use manifest::Manifest;
pub use patch::{format_time, parse_time, Patch, SubPatch};
pub use writer::BundleWriter;

use thiserror::Error;

/// Errors that make a single bundle unusable
#[derive(Debug, Error)]
pub enum BundleError {
    /// Failed to read the bundle file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive structure is corrupt
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// An entry, or the bundle as a whole, is larger than the configured cap
    #[error("Entry {entry} exceeds the {limit} byte limit")]
    EntryTooLarge { entry: String, limit: u64 },

    /// `META-INF/PATCH.MF` is absent
    #[error("Missing manifest entry {}", MANIFEST_ENTRY)]
    MissingManifest,

    /// Manifest text does not follow the manifest grammar
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// Required attribute absent
    #[error("Missing required attribute: {0}")]
    MissingAttribute(&'static str),

    /// `Created-Time` is not an RFC-1123 date
    #[error("Invalid Created-Time {0:?}")]
    InvalidTimestamp(String),

    /// No `*-Classes` attribute at all
    #[error("Manifest declares no *-Classes attribute")]
    NoClasses,

    /// Signature entry is not well formed
    #[error("Malformed signature entry {entry}: {reason}")]
    MalformedSignature { entry: String, reason: String },
}
