//! Bundle code and the optimized cache
//!
//! Opening a bundle reads its `classes/*.json` entries. The parsed classes are
//! written to the optimized cache as one JSON document, tagged with the SHA-256
//! of the bundle they came from. Later opens consume the cache instead of the
//! bundle as long as that tag still matches; the cache content itself is
//! trusted, so guarding it is up to the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use splice_engine::{BundleArchive, ClassId, ClassLoader, ClassTable, RuntimeError, RuntimeResult};
use tracing::{debug, warn};

use crate::code::ClassDef;
use crate::vm::Vm;

/// Entry prefix of class definitions inside a bundle
pub const CLASSES_PREFIX: &str = "classes/";

const OPT_FORMAT: &str = "splice-opt/1";

/// On-disk optimized cache
#[derive(Debug, Serialize, Deserialize)]
pub struct OptCache {
    /// Cache format tag
    pub format: String,
    /// Hex SHA-256 of the source bundle
    pub source: String,
    /// Class definitions, in bundle order
    pub classes: Vec<ClassDef>,
}

/// Parse every class definition in `bundle`
pub fn read_classes(bundle: &Path) -> RuntimeResult<Vec<ClassDef>> {
    let archive =
        BundleArchive::open(bundle).map_err(|e| RuntimeError::InvalidCode(e.to_string()))?;

    let mut classes = Vec::new();
    for (name, bytes) in archive.entries_under(CLASSES_PREFIX) {
        if !name.ends_with(".json") {
            continue;
        }
        let def: ClassDef = serde_json::from_slice(bytes)
            .map_err(|e| RuntimeError::InvalidCode(format!("{}: {}", name, e)))?;
        classes.push(def);
    }
    Ok(classes)
}

/// Load the classes of `bundle`, producing or consuming `opt_file`
pub fn load_classes(bundle: &Path, opt_file: &Path) -> RuntimeResult<Vec<ClassDef>> {
    let source = hex::encode(Sha256::digest(fs::read(bundle)?));

    if opt_file.exists() {
        match read_cache(opt_file) {
            Ok(cache) if cache.format == OPT_FORMAT && cache.source == source => {
                debug!(cache = %opt_file.display(), "using optimized cache");
                return Ok(cache.classes);
            }
            Ok(_) => debug!(cache = %opt_file.display(), "optimized cache is stale"),
            Err(e) => warn!(cache = %opt_file.display(), error = %e, "unreadable optimized cache"),
        }
    }

    let classes = read_classes(bundle)?;
    let cache = OptCache {
        format: OPT_FORMAT.to_string(),
        source,
        classes,
    };
    let json = serde_json::to_vec(&cache).map_err(|e| RuntimeError::Io(e.to_string()))?;
    if let Some(parent) = opt_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(opt_file, json)?;
    debug!(cache = %opt_file.display(), classes = cache.classes.len(), "wrote optimized cache");
    Ok(cache.classes)
}

fn read_cache(opt_file: &Path) -> RuntimeResult<OptCache> {
    let bytes = fs::read(opt_file)?;
    serde_json::from_slice(&bytes).map_err(|e| RuntimeError::InvalidCode(e.to_string()))
}

/// Class table of one opened bundle
pub struct BundleTable {
    vm: Weak<Vm>,
    bundle: PathBuf,
    classes: Vec<ClassDef>,
}

impl BundleTable {
    pub(crate) fn open(vm: Weak<Vm>, bundle: &Path, opt_file: &Path) -> RuntimeResult<Arc<Self>> {
        let classes = load_classes(bundle, opt_file)?;
        Ok(Arc::new(Self {
            vm,
            bundle: bundle.to_path_buf(),
            classes,
        }))
    }

    /// Bundle the table was opened from
    pub fn bundle(&self) -> &Path {
        &self.bundle
    }
}

impl ClassTable for BundleTable {
    fn entries(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }

    fn define_class(
        &self,
        name: &str,
        loader: Arc<dyn ClassLoader>,
    ) -> RuntimeResult<Option<ClassId>> {
        let Some(def) = self.classes.iter().find(|c| c.name == name) else {
            return Ok(None);
        };
        let vm = self
            .vm
            .upgrade()
            .ok_or_else(|| RuntimeError::Execution("runtime was shut down".to_string()))?;
        Ok(Some(vm.define(def, loader)))
    }
}
