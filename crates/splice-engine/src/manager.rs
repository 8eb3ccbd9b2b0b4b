//! Patch manager
//!
//! Owns the managed patch directory, the ordered set of active patches and the
//! patch-name to loader registrations. This is the surface a host embeds:
//!
//! ```ignore
//! let manager = PatchManager::new(runtime, EngineConfig::new(files_dir), host_signer);
//! manager.init("1.0");
//! manager.load_patch();
//! // later, at runtime
//! let reports = manager.add_patch(Path::new("/sdcard/out.apatch"))?;
//! ```
//!
//! [`PatchManager::from_config_file`] builds the same manager from a TOML file.
//!
//! Mutating operations are serialized; [`PatchManager::patches`] only takes a
//! read lock on the active set.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use ed25519_dalek::VerifyingKey;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::binder::{Binder, FixReport};
use crate::bundle::Patch;
use crate::config::{ConfigError, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::security::SecurityGate;
use crate::store::{FileStore, KeyValueStore};
use crate::vm::{ClassLoader, ManagedRuntime};

/// Patch-name that registers the host loader for every sub-patch
pub const WILDCARD: &str = "*";

/// Engine entry point for a host process
pub struct PatchManager {
    config: EngineConfig,
    patch_dir: PathBuf,
    binder: Arc<Binder>,
    prefs: Arc<dyn KeyValueStore>,
    patches: RwLock<BTreeSet<Patch>>,
    loaders: DashMap<String, Arc<dyn ClassLoader>>,
    lock: Mutex<()>,
}

impl PatchManager {
    /// Create a manager with file-backed stores under the prefs directory
    ///
    /// # Arguments
    /// * `runtime` - The host VM
    /// * `config` - Directory layout and store names
    /// * `host_signer` - Public key the host program is signed with
    pub fn new(
        runtime: Arc<dyn ManagedRuntime>,
        config: EngineConfig,
        host_signer: VerifyingKey,
    ) -> Self {
        let prefs_dir = config.prefs_dir_path();
        let prefs = Arc::new(FileStore::open(&prefs_dir, &config.prefs_name));
        let security = Arc::new(FileStore::open(&prefs_dir, &config.security_prefs_name));
        Self::with_stores(runtime, config, host_signer, prefs, security)
    }

    /// Create a file-backed manager from the TOML config at `path`
    ///
    /// # Errors
    /// Any [`ConfigError`] from reading or validating the file
    pub fn from_config_file(
        runtime: Arc<dyn ManagedRuntime>,
        path: &Path,
        host_signer: VerifyingKey,
    ) -> Result<Self, ConfigError> {
        let config = EngineConfig::from_file(path)?;
        info!(config = %path.display(), files = %config.files_dir.display(), "loaded engine config");
        Ok(Self::new(runtime, config, host_signer))
    }

    /// Create a manager over host-supplied stores
    pub fn with_stores(
        runtime: Arc<dyn ManagedRuntime>,
        config: EngineConfig,
        host_signer: VerifyingKey,
        prefs: Arc<dyn KeyValueStore>,
        security: Arc<dyn KeyValueStore>,
    ) -> Self {
        let gate = Arc::new(
            SecurityGate::new(host_signer, security).with_limits(config.archive_limits()),
        );
        let binder = Arc::new(Binder::new(runtime, &config, gate));
        Self {
            patch_dir: config.patch_dir_path(),
            config,
            binder,
            prefs,
            patches: RwLock::new(BTreeSet::new()),
            loaders: DashMap::new(),
            lock: Mutex::new(()),
        }
    }

    /// The binder used for every install
    pub fn binder(&self) -> &Arc<Binder> {
        &self.binder
    }

    /// Managed patch directory
    pub fn patch_dir(&self) -> &Path {
        &self.patch_dir
    }

    /// Snapshot of the active patches, in application order
    pub fn patches(&self) -> Vec<Patch> {
        self.patches.read().iter().cloned().collect()
    }

    /// Prepare the patch directory for `app_version`
    ///
    /// A first run or a changed version wipes every patch and cache and records
    /// the new version. An unchanged version re-registers the bundles already in
    /// the patch directory; call [`PatchManager::load_patch`] to apply them.
    pub fn init(&self, app_version: &str) {
        let _guard = self.lock.lock();

        if self.patch_dir.exists() && !self.patch_dir.is_dir() {
            error!(path = %self.patch_dir.display(), "patch dir path is a file, removing it");
            if let Err(e) = fs::remove_file(&self.patch_dir) {
                warn!(path = %self.patch_dir.display(), error = %e, "failed to remove file");
            }
            return;
        }
        if let Err(e) = fs::create_dir_all(&self.patch_dir) {
            error!(path = %self.patch_dir.display(), error = %e, "failed to create patch dir");
            return;
        }

        let stored = match self.prefs.get(&self.config.version_key) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "failed to read stored app version");
                None
            }
        };

        if stored.as_deref() == Some(app_version) {
            debug!(version = %app_version, "app version unchanged, restoring patches");
            for file in self.bundle_files() {
                self.register(&file);
            }
            return;
        }

        info!(
            previous = stored.as_deref().unwrap_or("<none>"),
            version = %app_version,
            "app version changed, cleaning patches"
        );
        self.clean_locked();
        if let Err(e) = self.prefs.put(&self.config.version_key, app_version) {
            warn!(error = %e, "failed to record app version");
        }
    }

    /// Install a bundle at runtime
    ///
    /// The file is copied into the patch directory and applied immediately
    /// through the registered loaders. Adding a bundle whose file name is
    /// already present is a no-op.
    ///
    /// # Returns
    /// One report per sub-patch that reached a loader; empty when nothing was
    /// applied
    ///
    /// # Errors
    /// * `FileNotFound` - `path` does not exist
    /// * `BundleIo` - the copy failed
    pub fn add_patch(&self, path: &Path) -> EngineResult<Vec<FixReport>> {
        let _guard = self.lock.lock();

        if !path.is_file() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        let Some(file_name) = path.file_name() else {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        };
        let dest = self.patch_dir.join(file_name);
        if dest.exists() {
            debug!(patch = %dest.display(), "patch already added");
            return Ok(Vec::new());
        }

        fs::create_dir_all(&self.patch_dir)
            .and_then(|()| fs::copy(path, &dest).map(|_| ()))
            .map_err(|source| EngineError::BundleIo {
                path: path.to_path_buf(),
                source,
            })?;
        info!(source = %path.display(), patch = %dest.display(), "patch added");

        Ok(self
            .register(&dest)
            .map(|patch| self.apply(&patch))
            .unwrap_or_default())
    }

    /// Apply every active patch against the host loader
    ///
    /// Registers the host loader under the wildcard patch-name.
    pub fn load_patch(&self) -> Vec<FixReport> {
        let _guard = self.lock.lock();

        let host = self.binder.runtime().host_loader();
        self.loaders.insert(WILDCARD.to_string(), host.clone());

        let mut reports = Vec::new();
        for patch in self.patches() {
            for sub in patch.sub_patches() {
                let filter = Some(sub.classes.as_slice());
                reports.push(self.binder.fix(patch.file(), host.clone(), filter));
            }
        }
        reports
    }

    /// Apply the `patch_name` sub-patches of every active patch through `loader`
    ///
    /// Registers `loader` for `patch_name` so later [`PatchManager::add_patch`]
    /// calls reach it too.
    pub fn load_patch_for(&self, patch_name: &str, loader: Arc<dyn ClassLoader>) -> Vec<FixReport> {
        let _guard = self.lock.lock();

        self.loaders.insert(patch_name.to_string(), loader.clone());

        let mut reports = Vec::new();
        for patch in self.patches() {
            if let Some(classes) = patch.classes(patch_name) {
                reports.push(self.binder.fix(patch.file(), loader.clone(), Some(classes)));
            }
        }
        reports
    }

    /// Remove every patch and cache and forget the recorded app version
    pub fn remove_all_patch(&self) {
        let _guard = self.lock.lock();
        self.clean_locked();
        if let Err(e) = self.prefs.clear() {
            warn!(error = %e, "failed to clear stored app version");
        }
    }

    /// Remove every patch file and its optimized cache
    pub fn clean_patch(&self) {
        let _guard = self.lock.lock();
        self.clean_locked();
    }

    fn clean_locked(&self) {
        for file in list_files(&self.patch_dir) {
            self.binder.remove_opt_file(&file);
            match fs::remove_file(&file) {
                Ok(()) => debug!(patch = %file.display(), "patch removed"),
                Err(e) => warn!(patch = %file.display(), error = %e, "failed to remove patch"),
            }
        }
        // caches whose bundle is already gone
        for orphan in list_files(self.binder.opt_dir()) {
            self.binder.remove_opt_file(&orphan);
        }
        self.patches.write().clear();
    }

    /// Parse `file` and insert it into the active set
    fn register(&self, file: &Path) -> Option<Patch> {
        if !self.config.is_bundle(file) {
            return None;
        }
        match Patch::open_with_limits(file, &self.config.archive_limits()) {
            Ok(patch) => {
                debug!(patch = %patch.name(), file = %file.display(), "patch registered");
                self.patches.write().insert(patch.clone());
                Some(patch)
            }
            Err(source) => {
                let e = EngineError::Bundle {
                    path: file.to_path_buf(),
                    source,
                };
                warn!(kind = %e.kind(), error = %e, "bundle skipped");
                None
            }
        }
    }

    /// Apply a newly added patch through the registered loaders
    ///
    /// The wildcard registration takes precedence over a named one.
    fn apply(&self, patch: &Patch) -> Vec<FixReport> {
        let wildcard = self.loaders.get(WILDCARD).map(|l| l.value().clone());
        let mut reports = Vec::new();
        for sub in patch.sub_patches() {
            let loader = match &wildcard {
                Some(host) => host.clone(),
                None => match self.loaders.get(&sub.name) {
                    Some(loader) => loader.value().clone(),
                    None => {
                        debug!(patch = %patch.name(), sub = %sub.name, "no loader registered");
                        continue;
                    }
                },
            };
            reports.push(self.binder.fix(patch.file(), loader, Some(sub.classes.as_slice())));
        }
        reports
    }

    fn bundle_files(&self) -> Vec<PathBuf> {
        list_files(&self.patch_dir)
            .into_iter()
            .filter(|f| self.config.is_bundle(f))
            .collect()
    }
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to list directory");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}
