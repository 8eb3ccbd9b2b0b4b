//! Engine error taxonomy
//!
//! Every failure the engine can observe maps onto one [`ErrorKind`]. The kind
//! decides the policy: most kinds are local skips (a bundle, a class, a method)
//! and only [`ErrorKind::FileNotFound`] and [`ErrorKind::BundleIo`] ever reach a
//! caller of the public manager API as a `Result`.

use std::path::PathBuf;

use thiserror::Error;

use crate::bundle::BundleError;
use crate::security::SecurityError;
use crate::vm::RuntimeError;

/// Coarse classification of engine failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Host runtime is not on the validated layout allow-list
    UnsupportedRuntime,
    /// Reading or copying a bundle failed
    BundleIo,
    /// The bundle manifest is missing or malformed
    BundleManifestMalformed,
    /// No trusted signature on the bundle
    SignatureInvalid,
    /// The optimized cache did not match its fingerprint
    OptCacheTampered,
    /// A class named by the bundle could not be resolved
    ClassNotFound,
    /// A target method could not be resolved
    MethodNotFound,
    /// The VM refused or failed the record surgery
    VmInstallFailed,
    /// `add_patch` was given a path that does not exist
    FileNotFound,
}

impl ErrorKind {
    /// Stable upper-case label, used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedRuntime => "UNSUPPORTED_RUNTIME",
            ErrorKind::BundleIo => "BUNDLE_IO",
            ErrorKind::BundleManifestMalformed => "BUNDLE_MANIFEST_MALFORMED",
            ErrorKind::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorKind::OptCacheTampered => "OPT_CACHE_TAMPERED",
            ErrorKind::ClassNotFound => "CLASS_NOT_FOUND",
            ErrorKind::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorKind::VmInstallFailed => "VM_INSTALL_FAILED",
            ErrorKind::FileNotFound => "FILE_NOT_FOUND",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the binder and the patch manager
#[derive(Debug, Error)]
pub enum EngineError {
    /// Host runtime is not supported
    #[error("Unsupported runtime: {0}")]
    UnsupportedRuntime(String),

    /// Bundle could not be read or copied
    #[error("Bundle I/O error on {path}: {source}")]
    BundleIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bundle parsing failed
    #[error("Unusable bundle {path}: {source}")]
    Bundle {
        path: PathBuf,
        #[source]
        source: BundleError,
    },

    /// The runtime could not open the bundle's code
    #[error("Failed to open bundle code {path}: {source}")]
    BundleLoad {
        path: PathBuf,
        #[source]
        source: RuntimeError,
    },

    /// Bundle carries no trusted signature
    #[error("Signature check failed for {0}")]
    SignatureInvalid(PathBuf),

    /// Optimized cache fingerprint mismatch that could not be repaired
    #[error("Optimized cache {0} was tampered with and could not be removed")]
    OptCacheTampered(PathBuf),

    /// Security gate failure other than a plain mismatch
    #[error("Security gate error: {0}")]
    Security(#[from] SecurityError),

    /// Class could not be loaded
    #[error("Class not found: {name}: {source}")]
    ClassNotFound {
        name: String,
        #[source]
        source: RuntimeError,
    },

    /// Target method could not be resolved
    #[error("Method not found: {class}.{method}({params})")]
    MethodNotFound {
        class: String,
        method: String,
        params: String,
    },

    /// Record surgery failed inside the VM
    #[error("Install failed for {class}.{method}: {source}")]
    VmInstallFailed {
        class: String,
        method: String,
        #[source]
        source: RuntimeError,
    },

    /// Source file for `add_patch` does not exist
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

impl EngineError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnsupportedRuntime(_) => ErrorKind::UnsupportedRuntime,
            EngineError::BundleIo { .. } => ErrorKind::BundleIo,
            EngineError::Bundle { source, .. } => match source {
                BundleError::Io(_) | BundleError::Archive(_) => ErrorKind::BundleIo,
                _ => ErrorKind::BundleManifestMalformed,
            },
            EngineError::BundleLoad { .. } => ErrorKind::BundleIo,
            EngineError::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            EngineError::OptCacheTampered(_) => ErrorKind::OptCacheTampered,
            EngineError::Security(_) => ErrorKind::SignatureInvalid,
            EngineError::ClassNotFound { .. } => ErrorKind::ClassNotFound,
            EngineError::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            EngineError::VmInstallFailed { .. } => ErrorKind::VmInstallFailed,
            EngineError::FileNotFound(_) => ErrorKind::FileNotFound,
        }
    }
}

/// Engine result
pub type EngineResult<T> = Result<T, EngineError>;
