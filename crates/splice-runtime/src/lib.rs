//! Splice reference runtime
//!
//! A small managed VM that implements [`splice_engine::ManagedRuntime`]:
//! - classes with fields, static initializers and loader-scoped names
//! - methods backed by raw metadata records in the engine's layouts
//! - a tiny expression language for method bodies ([`code::Expr`])
//! - bundle opening with an optimized cache ([`bundle`])
//!
//! It exists so hosts and tests can drive the engine end to end.

pub mod bundle;
pub mod code;
mod interp;
mod loader;
mod vm;

pub use bundle::{BundleTable, OptCache, CLASSES_PREFIX};
pub use code::{AnnotationDef, ClassDef, Expr, FieldDef, MethodDef, StaticInit, Value};
pub use loader::VmLoader;
pub use vm::{ExecutionMode, Vm, VmConfig};
