//! Patch manager tests against a runtime without a validated layout
//!
//! Everything here exercises directory, version and active-set handling; the
//! binder refuses to touch the VM, so no record surgery takes place.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ed25519_dalek::SigningKey;
use splice_engine::{
    BundleWriter, ClassId, ClassLoader, ClassTable, ConfigError, EngineConfig, EngineError, ErrorKind,
    FieldDescriptor, FieldId, KeyValueStore, ManagedRuntime, MemoryStore, MethodDescriptor,
    MethodId, Patch, PatchManager, RuntimeError, RuntimeResult, SubPatch,
};
use splice_engine::AccessFlags;
use tempfile::TempDir;

struct HostLoader;

impl ClassLoader for HostLoader {
    fn identity(&self) -> String {
        "host".to_string()
    }

    fn load_class(&self, name: &str) -> RuntimeResult<ClassId> {
        Err(RuntimeError::ClassNotFound(name.to_string()))
    }
}

/// A VM the probe does not recognize
struct UnknownRuntime;

impl ManagedRuntime for UnknownRuntime {
    fn vm_version(&self) -> String {
        "0.9.4".to_string()
    }

    fn api_level(&self) -> u32 {
        23
    }

    fn host_loader(&self) -> Arc<dyn ClassLoader> {
        Arc::new(HostLoader)
    }

    fn open_bundle(&self, _bundle: &Path, _opt_file: &Path) -> RuntimeResult<Arc<dyn ClassTable>> {
        panic!("unsupported runtime must never open bundles")
    }

    fn class_name(&self, class: ClassId) -> RuntimeResult<String> {
        Err(RuntimeError::UnknownClass(class))
    }

    fn initialize_class(&self, class: ClassId) -> RuntimeResult<()> {
        Err(RuntimeError::UnknownClass(class))
    }

    fn declared_methods(&self, class: ClassId) -> RuntimeResult<Vec<MethodDescriptor>> {
        Err(RuntimeError::UnknownClass(class))
    }

    fn declared_fields(&self, class: ClassId) -> RuntimeResult<Vec<FieldDescriptor>> {
        Err(RuntimeError::UnknownClass(class))
    }

    fn read_method_record(&self, method: MethodId) -> RuntimeResult<Vec<u8>> {
        Err(RuntimeError::UnknownMethod(method))
    }

    fn write_method_record(
        &self,
        method: MethodId,
        _edit: &mut dyn FnMut(&mut [u8]) -> RuntimeResult<()>,
    ) -> RuntimeResult<()> {
        Err(RuntimeError::UnknownMethod(method))
    }

    fn update_field_flags(
        &self,
        field: FieldId,
        _update: &dyn Fn(AccessFlags) -> AccessFlags,
    ) -> RuntimeResult<AccessFlags> {
        Err(RuntimeError::UnknownField(field))
    }
}

struct Fixture {
    _dir: TempDir,
    files: PathBuf,
    sdcard: PathBuf,
    prefs: Arc<MemoryStore>,
    security: Arc<MemoryStore>,
    signer: SigningKey,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let files = dir.path().join("files");
        let sdcard = dir.path().join("sdcard");
        fs::create_dir_all(&sdcard).unwrap();
        Self {
            files,
            sdcard,
            _dir: dir,
            prefs: Arc::new(MemoryStore::new()),
            security: Arc::new(MemoryStore::new()),
            signer: SigningKey::from_bytes(&[11u8; 32]),
        }
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::new(&self.files)
    }

    fn manager(&self) -> PatchManager {
        PatchManager::with_stores(
            Arc::new(UnknownRuntime),
            self.config(),
            self.signer.verifying_key(),
            self.prefs.clone(),
            self.security.clone(),
        )
    }

    fn bundle(&self, file: &str, name: &str, secs: i64) -> PathBuf {
        let path = self.sdcard.join(file);
        let time = Utc.timestamp_opt(1_604_886_807 + secs, 0).unwrap();
        let patch = Patch::new(
            &path,
            name,
            time,
            vec![SubPatch {
                name: name.to_string(),
                classes: vec!["U_CF".to_string()],
            }],
        );
        BundleWriter::for_patch(&patch)
            .add_entry("classes/U_CF.json", b"{}".to_vec())
            .sign_with("cert", self.signer.clone())
            .write_to(&path)
            .unwrap();
        path
    }
}

#[test]
fn test_init_first_run_records_version() {
    let fx = Fixture::new();
    let manager = fx.manager();

    manager.init("1.0");

    assert!(fx.config().patch_dir_path().is_dir());
    assert_eq!(fx.prefs.get("version").unwrap(), Some("1.0".to_string()));
    assert!(manager.patches().is_empty());
}

#[test]
fn test_init_removes_file_at_patch_dir() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let patch_dir = fx.config().patch_dir_path();
    fs::create_dir_all(&fx.files).unwrap();
    fs::write(&patch_dir, b"not a directory").unwrap();

    manager.init("1.0");
    assert!(!patch_dir.exists());
    assert!(manager.patches().is_empty());

    // the next start creates the directory normally
    manager.init("1.0");
    assert!(patch_dir.is_dir());
}

#[test]
fn test_from_config_file() {
    let fx = Fixture::new();
    let path = fx.sdcard.join("splice.toml");
    fs::write(
        &path,
        format!(
            "files_dir = {:?}\npatch_dir = \"bundles\"\n",
            fx.files.display().to_string()
        ),
    )
    .unwrap();

    let manager = PatchManager::from_config_file(
        Arc::new(UnknownRuntime),
        &path,
        fx.signer.verifying_key(),
    )
    .unwrap();
    assert_eq!(manager.patch_dir(), fx.files.join("bundles").as_path());

    manager.init("1.0");
    assert!(fx.files.join("bundles").is_dir());
    assert!(fx.files.join("prefs").is_dir());
}

#[test]
fn test_from_config_file_rejects_invalid_config() {
    let fx = Fixture::new();
    let path = fx.sdcard.join("splice.toml");
    fs::write(&path, "opt_dir = \"apatch\"\n").unwrap();

    let result = PatchManager::from_config_file(
        Arc::new(UnknownRuntime),
        &path,
        fx.signer.verifying_key(),
    );
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_add_patch_missing_file() {
    let fx = Fixture::new();
    let manager = fx.manager();
    manager.init("1.0");

    let err = manager
        .add_patch(&fx.sdcard.join("missing.apatch"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
    assert!(matches!(err, EngineError::FileNotFound(_)));
}

#[test]
fn test_add_patch_is_idempotent() {
    let fx = Fixture::new();
    let manager = fx.manager();
    manager.init("1.0");
    let bundle = fx.bundle("out.apatch", "p", 0);

    manager.add_patch(&bundle).unwrap();
    manager.add_patch(&bundle).unwrap();

    assert_eq!(manager.patches().len(), 1);
    assert!(fx.config().patch_dir_path().join("out.apatch").is_file());
}

#[test]
fn test_add_patch_skips_malformed_bundle() {
    let fx = Fixture::new();
    let manager = fx.manager();
    manager.init("1.0");

    let junk = fx.sdcard.join("junk.apatch");
    fs::write(&junk, b"not a zip").unwrap();

    manager.add_patch(&junk).unwrap();
    assert!(manager.patches().is_empty());
}

#[test]
fn test_unchanged_version_restores_patches() {
    let fx = Fixture::new();
    {
        let manager = fx.manager();
        manager.init("1.0");
        manager.add_patch(&fx.bundle("b.apatch", "second", 5)).unwrap();
        manager.add_patch(&fx.bundle("a.apatch", "first", 0)).unwrap();
    }

    // next process run
    let manager = fx.manager();
    manager.init("1.0");

    let names: Vec<String> = manager
        .patches()
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[test]
fn test_version_change_wipes_patches_and_caches() {
    let fx = Fixture::new();
    {
        let manager = fx.manager();
        manager.init("1.0");
        manager.add_patch(&fx.bundle("out.apatch", "p", 0)).unwrap();
    }
    let opt_dir = fx.config().opt_dir_path();
    fs::write(opt_dir.join("out.apatch"), b"cache").unwrap();
    fs::write(opt_dir.join("orphan.apatch"), b"cache").unwrap();

    let manager = fx.manager();
    manager.init("1.1");

    assert_eq!(fs::read_dir(fx.config().patch_dir_path()).unwrap().count(), 0);
    assert_eq!(fs::read_dir(&opt_dir).unwrap().count(), 0);
    assert!(manager.patches().is_empty());
    assert_eq!(fx.prefs.get("version").unwrap(), Some("1.1".to_string()));
}

#[test]
fn test_remove_all_patch_forgets_version() {
    let fx = Fixture::new();
    let manager = fx.manager();
    manager.init("1.0");
    manager.add_patch(&fx.bundle("out.apatch", "p", 0)).unwrap();

    manager.remove_all_patch();

    assert!(manager.patches().is_empty());
    assert_eq!(fx.prefs.get("version").unwrap(), None);
    assert!(!fx.config().patch_dir_path().join("out.apatch").exists());
}

#[test]
fn test_unsupported_runtime_is_a_noop() {
    let fx = Fixture::new();
    let manager = fx.manager();
    manager.init("1.0");
    manager.add_patch(&fx.bundle("out.apatch", "p", 0)).unwrap();

    assert!(!manager.binder().is_supported());
    let reports = manager.load_patch();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].skip_kind(), Some(ErrorKind::UnsupportedRuntime));
    assert!(reports[0].redirects.is_empty());

    // nothing was opened, so nothing was cached or fingerprinted
    assert_eq!(fs::read_dir(fx.config().opt_dir_path()).unwrap().count(), 0);
    assert_eq!(fx.security.get("opt:out.apatch").unwrap(), None);
}

#[test]
fn test_add_patch_reports_through_registered_loader() {
    let fx = Fixture::new();
    let manager = fx.manager();
    manager.init("1.0");

    // no loader registered yet: stored, not applied
    let reports = manager.add_patch(&fx.bundle("a.apatch", "a", 0)).unwrap();
    assert!(reports.is_empty());

    manager.load_patch();
    let bundle = fx.bundle("b.apatch", "b", 1);
    let reports = manager.add_patch(&bundle).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].skip_kind(), Some(ErrorKind::UnsupportedRuntime));

    // already present
    assert!(manager.add_patch(&bundle).unwrap().is_empty());
}

#[test]
fn test_same_time_patches_both_kept() {
    let fx = Fixture::new();
    let manager = fx.manager();
    manager.init("1.0");
    manager.add_patch(&fx.bundle("x.apatch", "x", 0)).unwrap();
    manager.add_patch(&fx.bundle("y.apatch", "y", 0)).unwrap();

    let files: Vec<String> = manager
        .patches()
        .iter()
        .map(|p| p.file().file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["x.apatch", "y.apatch"]);
}
