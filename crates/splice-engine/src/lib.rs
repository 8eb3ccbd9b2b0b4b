//! Splice hot-patch engine
//!
//! Replaces method bodies of a running managed program with bodies shipped in
//! signed patch bundles, without a restart:
//! - Platform probe keyed on a validated method-record layout table
//! - Security gate (publisher signatures, optimized-cache fingerprints)
//! - Bundle reading and writing (`META-INF/PATCH.MF` manifest)
//! - Binder (patch class loader, fix-class cache, record surgery)
//! - Patch manager (patch directory, version rollover, patch-name loaders)
//!
//! The host VM is reached only through the traits in [`vm`].

pub mod binder;
pub mod bundle;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod probe;
pub mod security;
pub mod store;
pub mod vm;

pub use binder::{Binder, FixClassCache, FixReport, PatchClassLoader, Redirect};
pub use bundle::{
    ArchiveLimits, BundleArchive, BundleError, BundleWriter, Manifest, Patch, SubPatch,
};
pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use logging::{init_logging, LogLevel};
pub use manager::{PatchManager, WILDCARD};
pub use probe::Platform;
pub use security::{SecurityError, SecurityGate};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use vm::{
    AccessFlags, ClassId, ClassLoader, ClassTable, FieldDescriptor, FieldId, ManagedRuntime,
    MethodDescriptor, MethodId, MethodReplace, RecordLayout, RuntimeError, RuntimeFlavor,
    RuntimeResult,
};
