//! Patch class loader
//!
//! Resolution order for a name:
//! 1. the parent (the caller's loader)
//! 2. the bundle's class table, with this loader as defining loader
//! 3. the engine's own loader, only for names inside [`ENGINE_NAMESPACE`]
//!
//! Step 3 exists because bundle packaging strips the engine's annotation types.

use std::path::Path;
use std::sync::{Arc, Weak};

use crate::vm::{ClassId, ClassLoader, ClassTable, RuntimeError, RuntimeResult, ENGINE_NAMESPACE};

/// Loader for the classes of one bundle
pub struct PatchClassLoader {
    this: Weak<PatchClassLoader>,
    identity: String,
    parent: Arc<dyn ClassLoader>,
    table: Arc<dyn ClassTable>,
    engine: Arc<dyn ClassLoader>,
}

impl PatchClassLoader {
    /// Create a loader over `table`
    ///
    /// # Arguments
    /// * `bundle` - Bundle the table was opened from, used for the identity
    /// * `parent` - Loader consulted first
    /// * `table` - The bundle's class table
    /// * `engine` - Loader that owns the engine namespace
    pub fn new(
        bundle: &Path,
        parent: Arc<dyn ClassLoader>,
        table: Arc<dyn ClassTable>,
        engine: Arc<dyn ClassLoader>,
    ) -> Arc<Self> {
        let identity = format!("patch:{}", bundle.display());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            identity,
            parent,
            table,
            engine,
        })
    }

    /// Define `name` from the bundle, bypassing the parent
    ///
    /// `Ok(None)` when the bundle has no such class.
    pub fn define_bundle_class(&self, name: &str) -> RuntimeResult<Option<ClassId>> {
        let Some(this) = self.this.upgrade() else {
            return Err(RuntimeError::ClassNotFound(name.to_string()));
        };
        self.table.define_class(name, this)
    }

    /// Names declared by the bundle, in declaration order
    pub fn bundle_classes(&self) -> Vec<String> {
        self.table.entries()
    }
}

impl ClassLoader for PatchClassLoader {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn load_class(&self, name: &str) -> RuntimeResult<ClassId> {
        match self.parent.load_class(name) {
            Err(RuntimeError::ClassNotFound(_)) => {}
            other => return other,
        }
        if let Some(class) = self.define_bundle_class(name)? {
            return Ok(class);
        }
        if in_engine_namespace(name) {
            return self.engine.load_class(name);
        }
        Err(RuntimeError::ClassNotFound(name.to_string()))
    }
}

fn in_engine_namespace(name: &str) -> bool {
    name.strip_prefix(ENGINE_NAMESPACE)
        .is_some_and(|rest| rest.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::METHOD_REPLACE_ANNOTATION;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MapLoader {
        name: &'static str,
        classes: HashMap<&'static str, u64>,
    }

    impl ClassLoader for MapLoader {
        fn identity(&self) -> String {
            self.name.to_string()
        }

        fn load_class(&self, name: &str) -> RuntimeResult<ClassId> {
            self.classes
                .get(name)
                .map(|id| ClassId(*id))
                .ok_or_else(|| RuntimeError::ClassNotFound(name.to_string()))
        }
    }

    #[derive(Default)]
    struct Table {
        defined: Mutex<Vec<(String, String)>>,
    }

    impl ClassTable for Table {
        fn entries(&self) -> Vec<String> {
            vec!["U_CF".to_string()]
        }

        fn define_class(
            &self,
            name: &str,
            loader: Arc<dyn ClassLoader>,
        ) -> RuntimeResult<Option<ClassId>> {
            if name != "U_CF" {
                return Ok(None);
            }
            self.defined
                .lock()
                .push((name.to_string(), loader.identity()));
            Ok(Some(ClassId(100)))
        }
    }

    fn loader(table: Arc<Table>) -> Arc<PatchClassLoader> {
        let parent = Arc::new(MapLoader {
            name: "plugin",
            classes: HashMap::from([("U", 1)]),
        });
        let engine = Arc::new(MapLoader {
            name: "engine",
            classes: HashMap::from([(METHOD_REPLACE_ANNOTATION, 9), ("U", 2)]),
        });
        PatchClassLoader::new(Path::new("/p/out.apatch"), parent, table, engine)
    }

    #[test]
    fn test_parent_first() {
        let table = Arc::new(Table::default());
        let loader = loader(table.clone());
        assert_eq!(loader.load_class("U").unwrap(), ClassId(1));
        assert!(table.defined.lock().is_empty());
    }

    #[test]
    fn test_bundle_defines_with_patch_loader() {
        let table = Arc::new(Table::default());
        let loader = loader(table.clone());
        assert_eq!(loader.load_class("U_CF").unwrap(), ClassId(100));
        assert_eq!(
            table.defined.lock()[0],
            ("U_CF".to_string(), "patch:/p/out.apatch".to_string())
        );
    }

    #[test]
    fn test_engine_namespace_fallback() {
        let loader = loader(Arc::new(Table::default()));
        assert_eq!(
            loader.load_class(METHOD_REPLACE_ANNOTATION).unwrap(),
            ClassId(9)
        );
    }

    #[test]
    fn test_other_names_fail() {
        let loader = loader(Arc::new(Table::default()));
        assert_eq!(
            loader.load_class("V"),
            Err(RuntimeError::ClassNotFound("V".to_string()))
        );
        // prefix match must stop at a package boundary
        assert!(loader.load_class("splice.annotationX.Foo").is_err());
    }
}
