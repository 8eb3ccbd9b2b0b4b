//! Runtime class loaders

use std::sync::{Arc, Weak};

use splice_engine::{ClassId, ClassLoader, RuntimeError, RuntimeResult};

use crate::vm::Vm;

/// A named loader: parent first, then the classes it defined itself
pub struct VmLoader {
    identity: String,
    vm: Weak<Vm>,
    parent: Option<Arc<dyn ClassLoader>>,
}

impl VmLoader {
    pub(crate) fn new(
        identity: impl Into<String>,
        vm: Weak<Vm>,
        parent: Option<Arc<dyn ClassLoader>>,
    ) -> Self {
        Self {
            identity: identity.into(),
            vm,
            parent,
        }
    }
}

impl ClassLoader for VmLoader {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn load_class(&self, name: &str) -> RuntimeResult<ClassId> {
        if let Some(parent) = &self.parent {
            match parent.load_class(name) {
                Err(RuntimeError::ClassNotFound(_)) => {}
                other => return other,
            }
        }
        self.vm
            .upgrade()
            .and_then(|vm| vm.find_defined(&self.identity, name))
            .ok_or_else(|| RuntimeError::ClassNotFound(name.to_string()))
    }
}
