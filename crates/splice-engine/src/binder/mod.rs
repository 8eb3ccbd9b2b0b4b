//! Binder
//!
//! Applies the replacements of one bundle to the classes reachable from a
//! caller's loader:
//!
//! 1. refuse on unsupported runtimes
//! 2. verify the bundle signature
//! 3. gate an existing optimized cache through its fingerprint, regenerating it
//!    when it does not match
//! 4. open the bundle's code and wrap it in a [`PatchClassLoader`]
//! 5. define every declared (and filtered) class and fix its annotated methods
//! 6. fingerprint a freshly produced cache
//!
//! Failures are local: a bad bundle is skipped, a bad class or method is
//! recorded in the [`FixReport`] and the rest of the bundle proceeds.

mod cache;
mod loader;

pub use cache::FixClassCache;
pub use loader::PatchClassLoader;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorKind};
use crate::probe::Platform;
use crate::security::SecurityGate;
use crate::vm::{
    find_declared_method, surgery, ClassId, ClassLoader, ManagedRuntime, MethodDescriptor,
    MethodReplace, RecordLayout, RuntimeError,
};

/// One installed redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Target class name
    pub target_class: String,
    /// Target method signature, e.g. `f(int)`
    pub target_method: String,
    /// Replacement class name
    pub replacement_class: String,
}

/// Outcome of applying one bundle
#[derive(Debug)]
pub struct FixReport {
    /// Bundle the report is about
    pub bundle: PathBuf,
    /// Set when the whole bundle was skipped
    pub skipped: Option<EngineError>,
    /// Redirects installed, in install order
    pub redirects: Vec<Redirect>,
    /// Per-class and per-method failures
    pub failures: Vec<EngineError>,
}

impl FixReport {
    fn new(bundle: &Path) -> Self {
        Self {
            bundle: bundle.to_path_buf(),
            skipped: None,
            redirects: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn skip(mut self, reason: EngineError) -> Self {
        warn!(
            bundle = %self.bundle.display(),
            kind = %reason.kind(),
            error = %reason,
            "bundle skipped"
        );
        self.skipped = Some(reason);
        self
    }

    /// The bundle was processed (possibly with per-unit failures)
    pub fn is_applied(&self) -> bool {
        self.skipped.is_none()
    }

    /// Kind of the whole-bundle skip, if any
    pub fn skip_kind(&self) -> Option<ErrorKind> {
        self.skipped.as_ref().map(EngineError::kind)
    }

    /// Kinds of the per-unit failures, in occurrence order
    pub fn failure_kinds(&self) -> Vec<ErrorKind> {
        self.failures.iter().map(EngineError::kind).collect()
    }
}

/// Redirect installer for one host runtime
pub struct Binder {
    runtime: Arc<dyn ManagedRuntime>,
    platform: Platform,
    opt_dir: PathBuf,
    opt_dir_ready: bool,
    gate: Arc<SecurityGate>,
    fixed: FixClassCache,
    lock: Mutex<()>,
    warned_unsupported: AtomicBool,
}

impl Binder {
    /// Create a binder, preparing the optimized-cache directory
    ///
    /// If the directory cannot be created, or its path is taken by a file (which
    /// is then removed), the binder treats the runtime as unsupported.
    pub fn new(
        runtime: Arc<dyn ManagedRuntime>,
        config: &EngineConfig,
        gate: Arc<SecurityGate>,
    ) -> Self {
        let platform = Platform::probe(runtime.as_ref());
        let opt_dir = config.opt_dir_path();
        let opt_dir_ready = prepare_opt_dir(&opt_dir);
        debug!(
            platform = %platform.describe(),
            opt_dir = %opt_dir.display(),
            ready = opt_dir_ready,
            "binder created"
        );

        Self {
            runtime,
            platform,
            opt_dir,
            opt_dir_ready,
            gate,
            fixed: FixClassCache::new(),
            lock: Mutex::new(()),
            warned_unsupported: AtomicBool::new(false),
        }
    }

    /// Probe verdict for the host runtime
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Whether `fix` will do anything at all
    pub fn is_supported(&self) -> bool {
        self.platform.is_supported() && self.opt_dir_ready
    }

    /// The host runtime
    pub fn runtime(&self) -> &Arc<dyn ManagedRuntime> {
        &self.runtime
    }

    /// Directory holding optimized caches
    pub fn opt_dir(&self) -> &Path {
        &self.opt_dir
    }

    /// Optimized-cache sibling of `bundle`
    pub fn opt_file(&self, bundle: &Path) -> PathBuf {
        match bundle.file_name() {
            Some(name) => self.opt_dir.join(name),
            None => self.opt_dir.join(bundle),
        }
    }

    /// Apply `bundle` against the host loader with no filter
    pub fn fix_path(&self, bundle: &Path) -> FixReport {
        self.fix(bundle, self.runtime.host_loader(), None)
    }

    /// Apply every replacement in `bundle` to classes reachable from `loader`
    ///
    /// # Arguments
    /// * `bundle` - Bundle file
    /// * `loader` - Loader the targets are resolved through
    /// * `filter` - `None` applies every declared class; `Some` applies only
    ///   the listed classes the bundle declares, in list order
    pub fn fix(
        &self,
        bundle: &Path,
        loader: Arc<dyn ClassLoader>,
        filter: Option<&[String]>,
    ) -> FixReport {
        let mut report = FixReport::new(bundle);
        let layout = match self.platform.layout() {
            Some(layout) if self.opt_dir_ready => layout,
            _ => return self.unsupported(report),
        };

        let _guard = self.lock.lock();

        match self.gate.verify_bundle(bundle) {
            Ok(true) => {}
            Ok(false) => return report.skip(EngineError::SignatureInvalid(bundle.to_path_buf())),
            Err(e) => return report.skip(e.into()),
        }

        let opt_file = self.opt_file(bundle);
        let fresh = if opt_file.exists() {
            match self.gate.verify_cache(&opt_file) {
                Ok(true) => false,
                Ok(false) => {
                    warn!(
                        cache = %opt_file.display(),
                        kind = %ErrorKind::OptCacheTampered,
                        "optimized cache does not match its fingerprint, regenerating"
                    );
                    if let Err(e) = fs::remove_file(&opt_file) {
                        error!(cache = %opt_file.display(), error = %e, "failed to delete tampered cache");
                        return report.skip(EngineError::OptCacheTampered(opt_file));
                    }
                    true
                }
                Err(e) => return report.skip(e.into()),
            }
        } else {
            true
        };

        let table = match self.runtime.open_bundle(bundle, &opt_file) {
            Ok(table) => table,
            Err(source) => {
                return report.skip(EngineError::BundleLoad {
                    path: bundle.to_path_buf(),
                    source,
                })
            }
        };
        let patch_loader = PatchClassLoader::new(
            bundle,
            loader.clone(),
            table,
            self.runtime.host_loader(),
        );

        let names = select_classes(patch_loader.bundle_classes(), filter);
        for name in &names {
            match patch_loader.define_bundle_class(name) {
                Ok(Some(class)) => self.fix_class(layout, class, name, &loader, &mut report),
                Ok(None) => report.failures.push(EngineError::ClassNotFound {
                    name: name.clone(),
                    source: RuntimeError::ClassNotFound(name.clone()),
                }),
                Err(source) => report.failures.push(EngineError::ClassNotFound {
                    name: name.clone(),
                    source,
                }),
            }
        }

        if fresh {
            if let Err(e) = self.gate.persist_cache_fingerprint(&opt_file) {
                warn!(cache = %opt_file.display(), error = %e, "failed to fingerprint cache");
            }
        }

        for failure in &report.failures {
            warn!(bundle = %bundle.display(), kind = %failure.kind(), error = %failure, "unit skipped");
        }
        info!(
            bundle = %bundle.display(),
            classes = names.len(),
            redirects = report.redirects.len(),
            failures = report.failures.len(),
            "bundle applied"
        );
        report
    }

    /// Delete the optimized cache of `bundle` and its fingerprint
    ///
    /// Returns `false` when a cache file remains afterwards.
    pub fn remove_opt_file(&self, bundle: &Path) -> bool {
        let _guard = self.lock.lock();
        let opt_file = self.opt_file(bundle);

        let removed = match fs::remove_file(&opt_file) {
            Ok(()) => {
                debug!(cache = %opt_file.display(), "removed optimized cache");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(cache = %opt_file.display(), error = %e, "failed to remove optimized cache");
                false
            }
        };
        if let Some(name) = opt_file.file_name() {
            if let Err(e) = self.gate.remove_fingerprint(&name.to_string_lossy()) {
                warn!(cache = %opt_file.display(), error = %e, "failed to remove cache fingerprint");
            }
        }
        removed
    }

    fn unsupported(&self, report: FixReport) -> FixReport {
        let reason = self.platform.describe();
        if !self.warned_unsupported.swap(true, Ordering::Relaxed) {
            warn!(
                kind = %ErrorKind::UnsupportedRuntime,
                platform = %reason,
                opt_dir_ready = self.opt_dir_ready,
                "runtime not supported, patching disabled"
            );
        }
        FixReport {
            skipped: Some(EngineError::UnsupportedRuntime(reason)),
            ..report
        }
    }

    /// Install every annotated method of `class`
    fn fix_class(
        &self,
        layout: &RecordLayout,
        class: ClassId,
        class_name: &str,
        loader: &Arc<dyn ClassLoader>,
        report: &mut FixReport,
    ) {
        let methods = match self.runtime.declared_methods(class) {
            Ok(methods) => methods,
            Err(source) => {
                report.failures.push(EngineError::ClassNotFound {
                    name: class_name.to_string(),
                    source,
                });
                return;
            }
        };

        for method in &methods {
            let Some(replace) = method.replace.as_ref().filter(|r| r.is_complete()) else {
                continue;
            };
            match self.replace_method(layout, class, method, replace, loader) {
                Ok(()) => {
                    info!(
                        method = %format!("{}.{}", replace.clazz, method.signature()),
                        replacement = %class_name,
                        "redirect installed"
                    );
                    report.redirects.push(Redirect {
                        target_class: replace.clazz.clone(),
                        target_method: format!("{}({})", replace.method, method.params.join(",")),
                        replacement_class: class_name.to_string(),
                    });
                }
                Err(e) => report.failures.push(e),
            }
        }
    }

    fn replace_method(
        &self,
        layout: &RecordLayout,
        replacement_class: ClassId,
        replacement: &MethodDescriptor,
        replace: &MethodReplace,
        loader: &Arc<dyn ClassLoader>,
    ) -> Result<(), EngineError> {
        let target_class = self.prepare_target_class(&replace.clazz, loader)?;

        let target = find_declared_method(
            self.runtime.as_ref(),
            target_class,
            &replace.method,
            &replacement.params,
        )
        .map_err(|source| EngineError::ClassNotFound {
            name: replace.clazz.clone(),
            source,
        })?
        .ok_or_else(|| EngineError::MethodNotFound {
            class: replace.clazz.clone(),
            method: replace.method.clone(),
            params: replacement.params.join(","),
        })?;

        surgery::install(
            self.runtime.as_ref(),
            layout,
            &target,
            replacement,
            replacement_class,
        )
        .map_err(|source| EngineError::VmInstallFailed {
            class: replace.clazz.clone(),
            method: target.signature(),
            source,
        })
    }

    /// Resolve, initialize and field-promote a target class once per loader
    fn prepare_target_class(
        &self,
        name: &str,
        loader: &Arc<dyn ClassLoader>,
    ) -> Result<ClassId, EngineError> {
        let key = FixClassCache::key(name, loader.as_ref());
        if let Some(class) = self.fixed.get(&key) {
            return Ok(class);
        }

        let not_found = |source| EngineError::ClassNotFound {
            name: name.to_string(),
            source,
        };
        let class = loader.load_class(name).map_err(not_found)?;
        self.runtime.initialize_class(class).map_err(not_found)?;
        let promoted = surgery::promote_fields(self.runtime.as_ref(), class).map_err(not_found)?;
        debug!(class = %name, fields = promoted, "prepared target class");

        self.fixed.insert(key, class);
        Ok(class)
    }
}

/// Declared names restricted by `filter`
///
/// No filter keeps declaration order; a filter is walked in its own order and
/// keeps only names the bundle declares.
fn select_classes(declared: Vec<String>, filter: Option<&[String]>) -> Vec<String> {
    match filter {
        None => declared,
        Some(filter) => filter
            .iter()
            .filter(|name| declared.contains(name))
            .cloned()
            .collect(),
    }
}

fn prepare_opt_dir(dir: &Path) -> bool {
    if dir.exists() && !dir.is_dir() {
        if let Err(e) = fs::remove_file(dir) {
            warn!(path = %dir.display(), error = %e, "failed to remove file in place of cache dir");
        }
        warn!(path = %dir.display(), "cache dir path was a file");
        return false;
    }
    match fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to create cache dir");
            false
        }
    }
}
