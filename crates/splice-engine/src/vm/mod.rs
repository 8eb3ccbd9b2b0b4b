//! Runtime interface
//!
//! The engine never touches VM internals directly. Everything it needs from the
//! managed runtime goes through the traits in this module:
//! - [`ClassLoader`] - name-to-class resolution with an identity
//! - [`ClassTable`] - lazily resolving class table of one opened bundle
//! - [`ManagedRuntime`] - reflection, class initialization and raw access to
//!   method-metadata records
//!
//! The record surgery itself lives in [`surgery`] and is keyed on the
//! [`layout`] allow-list.

mod flags;
pub mod layout;
pub mod surgery;

pub use flags::AccessFlags;
pub use layout::{RecordLayout, RuntimeFlavor, Slot, LAYOUTS};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

/// Namespace of the types the engine contributes to patched code
///
/// The bundle packager strips these from bundles, so the patch class loader
/// sources them from the host.
pub const ENGINE_NAMESPACE: &str = "splice.annotation";

/// Fully-qualified name of the replacement annotation type
pub const METHOD_REPLACE_ANNOTATION: &str = "splice.annotation.MethodReplace";

/// Errors reported by a managed runtime
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// No loader in the chain could resolve the class
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    /// Handle does not name a live class
    #[error("Unknown class handle: {0}")]
    UnknownClass(ClassId),

    /// Handle does not name a live method
    #[error("Unknown method handle: {0}")]
    UnknownMethod(MethodId),

    /// Handle does not name a live field
    #[error("Unknown field handle: {0}")]
    UnknownField(FieldId),

    /// A static initializer failed
    #[error("Initialization of {class} failed: {reason}")]
    InitializationFailed { class: String, reason: String },

    /// Access check rejected a member access
    #[error("Illegal access: {0}")]
    IllegalAccess(String),

    /// A method record did not have the layout's size
    #[error("Method record size mismatch: expected {expected} bytes, got {actual}")]
    RecordSize { expected: usize, actual: usize },

    /// Bundle code could not be read or optimized
    #[error("Invalid bundle code: {0}")]
    InvalidCode(String),

    /// Filesystem error while opening a bundle
    #[error("I/O error: {0}")]
    Io(String),

    /// Error raised while executing managed code
    #[error("Execution error: {0}")]
    Execution(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}

/// Runtime result
pub type RuntimeResult<T> = Result<T, RuntimeError>;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// Opaque handle to a loaded class
    ClassId,
    "class"
);
handle!(
    /// Opaque handle to a declared method
    MethodId,
    "method"
);
handle!(
    /// Opaque handle to a declared field
    FieldId,
    "field"
);

/// The `MethodReplace` annotation carried by a replacement method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodReplace {
    /// Target class, fully qualified
    pub clazz: String,
    /// Target method simple name
    pub method: String,
}

impl MethodReplace {
    /// Both fields non-empty
    pub fn is_complete(&self) -> bool {
        !self.clazz.is_empty() && !self.method.is_empty()
    }
}

/// Reflective view of a declared method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method handle
    pub id: MethodId,
    /// Simple name
    pub name: String,
    /// Parameter type names, in order
    pub params: Vec<String>,
    /// Access flags at the time of the query
    pub flags: AccessFlags,
    /// Replacement annotation, if the method carries one
    pub replace: Option<MethodReplace>,
}

impl MethodDescriptor {
    /// Signature string used in logs and errors, e.g. `f(int,String)`
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.params.join(","))
    }
}

/// Reflective view of a declared field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field handle
    pub id: FieldId,
    /// Field name
    pub name: String,
    /// Access flags at the time of the query
    pub flags: AccessFlags,
}

/// A class loader as seen by the engine
pub trait ClassLoader: Send + Sync {
    /// Stable identity, used to key the fix-class cache
    fn identity(&self) -> String;

    /// Resolve a class by fully-qualified name
    fn load_class(&self, name: &str) -> RuntimeResult<ClassId>;
}

impl fmt::Debug for dyn ClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassLoader({})", self.identity())
    }
}

/// Class table of an opened bundle
pub trait ClassTable: Send + Sync {
    /// Class names in declaration order
    fn entries(&self) -> Vec<String>;

    /// Define (or return the already-defined) class `name` with `loader` as
    /// its defining loader. `Ok(None)` when the bundle has no such class.
    fn define_class(
        &self,
        name: &str,
        loader: Arc<dyn ClassLoader>,
    ) -> RuntimeResult<Option<ClassId>>;
}

/// Everything the engine needs from the host VM
pub trait ManagedRuntime: Send + Sync {
    /// VM version string (e.g. `"2.1.0"`)
    fn vm_version(&self) -> String;

    /// Platform API level
    fn api_level(&self) -> u32;

    /// The host application's class loader
    fn host_loader(&self) -> Arc<dyn ClassLoader>;

    /// Open a bundle's code, producing the optimized cache at `opt_file` if it
    /// does not exist and consuming it otherwise
    fn open_bundle(&self, bundle: &Path, opt_file: &Path) -> RuntimeResult<Arc<dyn ClassTable>>;

    /// Fully-qualified name of a class
    fn class_name(&self, class: ClassId) -> RuntimeResult<String>;

    /// Run static initializers if they have not run yet
    fn initialize_class(&self, class: ClassId) -> RuntimeResult<()>;

    /// Declared methods, in declaration order
    fn declared_methods(&self, class: ClassId) -> RuntimeResult<Vec<MethodDescriptor>>;

    /// Declared fields, in declaration order
    fn declared_fields(&self, class: ClassId) -> RuntimeResult<Vec<FieldDescriptor>>;

    /// Copy of a method's raw metadata record
    fn read_method_record(&self, method: MethodId) -> RuntimeResult<Vec<u8>>;

    /// Edit a method's raw metadata record inside the VM's critical section
    fn write_method_record(
        &self,
        method: MethodId,
        edit: &mut dyn FnMut(&mut [u8]) -> RuntimeResult<()>,
    ) -> RuntimeResult<()>;

    /// Rewrite a field's access flags, returning the new flags
    fn update_field_flags(
        &self,
        field: FieldId,
        update: &dyn Fn(AccessFlags) -> AccessFlags,
    ) -> RuntimeResult<AccessFlags>;
}

/// Find a declared method by name and exact parameter-type vector
pub fn find_declared_method(
    runtime: &dyn ManagedRuntime,
    class: ClassId,
    name: &str,
    params: &[String],
) -> RuntimeResult<Option<MethodDescriptor>> {
    Ok(runtime
        .declared_methods(class)?
        .into_iter()
        .find(|m| m.name == name && m.params == params))
}
