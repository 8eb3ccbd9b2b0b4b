//! Shared fixture: a host application on the reference VM plus bundle builders

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use splice_engine::{AccessFlags, BundleWriter, ClassId, ClassLoader, EngineConfig, Patch, PatchManager, SubPatch};
use splice_runtime::code::expr::*;
use splice_runtime::{ClassDef, Value, Vm, VmConfig};
use tempfile::TempDir;

pub const PUBLIC_STATIC: AccessFlags = AccessFlags(0x0009);
pub const PRIVATE_STATIC: AccessFlags = AccessFlags(0x000A);

/// The host program's class `U`
///
/// ```text
/// class U {
///     private String name;
///     static String f(int x) { return "orig-" + x; }
///     static String g() { return "g-orig"; }
///     String greet() { return "hello " + name; }
/// }
/// ```
pub fn host_class() -> ClassDef {
    ClassDef::new("U")
        .field("name", AccessFlags::PRIVATE)
        .method("f", &["int"], PUBLIC_STATIC, concat(vec![str("orig-"), arg(0)]))
        .method("g", &[], PUBLIC_STATIC, str("g-orig"))
        .method("greet", &[], AccessFlags::PUBLIC, concat(vec![str("hello "), get_field("name")]))
}

/// Replacement for `U.f` returning `<prefix><x>`, where the prefix sits in a
/// private static field set by the static initializer
pub fn replacement(class: &str, prefix: &str) -> ClassDef {
    ClassDef::new(class)
        .field("prefix", PRIVATE_STATIC)
        .init("prefix", str(prefix))
        .method(
            "f",
            &["int"],
            PUBLIC_STATIC,
            concat(vec![get_static(class, "prefix"), arg(0)]),
        )
        .replaces("U", "f")
}

/// Replacement for `U.f` returning a constant
pub fn constant_replacement(class: &str, value: &str) -> ClassDef {
    ClassDef::new(class)
        .method("f", &["int"], PUBLIC_STATIC, str(value))
        .replaces("U", "f")
}

pub fn time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_604_886_807 + secs, 0).unwrap()
}

/// Write a bundle
///
/// `subs` maps sub-patch names to manifest class lists; the sub-patch named
/// like the patch becomes `Patch-Classes`.
pub fn write_bundle(
    path: &Path,
    name: &str,
    time: DateTime<Utc>,
    subs: &[(&str, &[&str])],
    classes: &[ClassDef],
    signer: Option<&SigningKey>,
) {
    let sub_patches = subs
        .iter()
        .map(|(sub, list)| SubPatch {
            name: sub.to_string(),
            classes: list.iter().map(|c| c.to_string()).collect(),
        })
        .collect();
    let patch = Patch::new(path, name, time, sub_patches);

    let mut writer = BundleWriter::for_patch(&patch);
    for class in classes {
        writer.add_entry(
            format!("classes/{}.json", class.name),
            serde_json::to_vec(class).unwrap(),
        );
    }
    if let Some(key) = signer {
        writer.sign_with("cert", key.clone());
    }
    writer.write_to(path).unwrap();
}

/// One simulated device: private files dir, external storage, publisher key
pub struct Device {
    _dir: TempDir,
    pub files: PathBuf,
    pub sdcard: PathBuf,
    pub signer: SigningKey,
    pub vm_config: VmConfig,
}

/// One process run on a device
pub struct Process {
    pub vm: Arc<Vm>,
    pub manager: PatchManager,
    pub u: ClassId,
}

impl Device {
    pub fn new(vm_config: VmConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let files = dir.path().join("files");
        let sdcard = dir.path().join("sdcard");
        fs::create_dir_all(&sdcard).unwrap();
        Self {
            _dir: dir,
            files,
            sdcard,
            signer: SigningKey::from_bytes(&[42u8; 32]),
            vm_config,
        }
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig::new(&self.files)
    }

    /// Start a fresh process: new VM, host classes defined, new manager
    pub fn start(&self) -> Process {
        let vm = Vm::new(self.vm_config.clone());
        let u = vm.define_host(&host_class());
        let manager = PatchManager::new(vm.clone(), self.config(), self.signer.verifying_key());
        Process { vm, manager, u }
    }

    /// Path on external storage
    pub fn sdcard(&self, file: &str) -> PathBuf {
        self.sdcard.join(file)
    }

    /// A signed bundle on external storage with a single `Patch-Classes` list
    pub fn signed_bundle(&self, file: &str, name: &str, secs: i64, classes: &[ClassDef]) -> PathBuf {
        let path = self.sdcard(file);
        let names: Vec<&str> = classes.iter().map(|c| c.name.as_str()).collect();
        write_bundle(
            &path,
            name,
            time(secs),
            &[(name, names.as_slice())],
            classes,
            Some(&self.signer),
        );
        path
    }

    pub fn opt_file(&self, file: &str) -> PathBuf {
        self.config().opt_dir_path().join(file)
    }

    pub fn patch_file(&self, file: &str) -> PathBuf {
        self.config().patch_dir_path().join(file)
    }
}

impl Process {
    pub fn f(&self, x: i64) -> String {
        match self.vm.invoke_static(self.u, "f", vec![Value::Int(x)]).unwrap() {
            Value::Str(s) => s,
            other => panic!("unexpected {:?}", other),
        }
    }

    pub fn call(&self, class: ClassId, method: &str) -> Value {
        self.vm.invoke_static(class, method, vec![]).unwrap()
    }

    pub fn host_class(&self, name: &str) -> ClassId {
        self.vm.host().load_class(name).unwrap()
    }
}

pub fn dir_len(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
