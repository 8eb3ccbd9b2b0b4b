//! Fix-class cache
//!
//! Target classes are initialized and field-promoted once per
//! `(class name, loader)` pair; later redirects into the same class reuse the
//! resolved handle.

use dashmap::DashMap;

use crate::vm::{ClassId, ClassLoader};

/// Concurrent `className@loaderIdentity -> ClassId` map
#[derive(Debug, Default)]
pub struct FixClassCache {
    classes: DashMap<String, ClassId>,
}

impl FixClassCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for `class_name` resolved through `loader`
    pub fn key(class_name: &str, loader: &dyn ClassLoader) -> String {
        format!("{}@{}", class_name, loader.identity())
    }

    /// Cached class for `key`
    pub fn get(&self, key: &str) -> Option<ClassId> {
        self.classes.get(key).map(|entry| *entry.value())
    }

    /// Remember a prepared class
    pub fn insert(&self, key: String, class: ClassId) {
        self.classes.insert(key, class);
    }

    /// Number of cached classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
