//! Engine configuration
//!
//! All paths are derived from the host's private files directory:
//!
//! ```text
//! <files_dir>/
//! ├── apatch/          active bundles (*.apatch)
//! ├── apatch_opt/      optimized caches, same file names as the bundles
//! └── prefs/           key/value stores (*.json)
//! ```
//!
//! Every field has a default, so a TOML file only needs the keys it overrides:
//!
//! ```toml
//! files_dir = "/data/data/com.example/files"
//! suffix = ".apatch"
//! max_entry_size = 4194304
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::bundle::{ArchiveLimits, DEFAULT_MAX_BUNDLE_SIZE, DEFAULT_MAX_ENTRY_SIZE};

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Host's private files directory
    pub files_dir: PathBuf,

    /// Directory name for active bundles
    pub patch_dir: String,

    /// Directory name for optimized caches
    pub opt_dir: String,

    /// Directory name for key/value stores
    pub prefs_dir: String,

    /// Bundle file suffix
    pub suffix: String,

    /// Store holding the last-seen app version
    pub prefs_name: String,

    /// Store holding the publisher binding and cache fingerprints
    pub security_prefs_name: String,

    /// Key of the last-seen app version
    pub version_key: String,

    /// Largest uncompressed bundle entry read into memory, in bytes
    pub max_entry_size: u64,

    /// Largest uncompressed bundle read into memory, in bytes
    pub max_bundle_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            files_dir: PathBuf::from("files"),
            patch_dir: "apatch".to_string(),
            opt_dir: "apatch_opt".to_string(),
            prefs_dir: "prefs".to_string(),
            suffix: ".apatch".to_string(),
            prefs_name: "_andfix_".to_string(),
            security_prefs_name: "_andfix_security_".to_string(),
            version_key: "version".to_string(),
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_bundle_size: DEFAULT_MAX_BUNDLE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Default configuration rooted at `files_dir`
    pub fn new(files_dir: impl Into<PathBuf>) -> Self {
        Self {
            files_dir: files_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("patch_dir", &self.patch_dir),
            ("opt_dir", &self.opt_dir),
            ("prefs_dir", &self.prefs_dir),
        ] {
            if value.is_empty() || value.contains('/') || value.contains('\\') {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a single non-empty path component, got {:?}",
                    key, value
                )));
            }
        }
        if self.patch_dir == self.opt_dir {
            return Err(ConfigError::Invalid(
                "patch_dir and opt_dir must differ".to_string(),
            ));
        }
        if !self.suffix.starts_with('.') || self.suffix.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "suffix must look like \".ext\", got {:?}",
                self.suffix
            )));
        }
        if self.prefs_name.is_empty() || self.security_prefs_name.is_empty() {
            return Err(ConfigError::Invalid("store names cannot be empty".to_string()));
        }
        if self.prefs_name == self.security_prefs_name {
            return Err(ConfigError::Invalid(
                "prefs_name and security_prefs_name must differ".to_string(),
            ));
        }
        if self.max_entry_size == 0 || self.max_bundle_size == 0 {
            return Err(ConfigError::Invalid("size limits must be positive".to_string()));
        }
        if self.max_entry_size > self.max_bundle_size {
            return Err(ConfigError::Invalid(
                "max_entry_size cannot exceed max_bundle_size".to_string(),
            ));
        }
        Ok(())
    }

    /// `<files_dir>/<patch_dir>`
    pub fn patch_dir_path(&self) -> PathBuf {
        self.files_dir.join(&self.patch_dir)
    }

    /// `<files_dir>/<opt_dir>`
    pub fn opt_dir_path(&self) -> PathBuf {
        self.files_dir.join(&self.opt_dir)
    }

    /// `<files_dir>/<prefs_dir>`
    pub fn prefs_dir_path(&self) -> PathBuf {
        self.files_dir.join(&self.prefs_dir)
    }

    /// Size caps for reading bundles
    pub fn archive_limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_entry_size: self.max_entry_size,
            max_bundle_size: self.max_bundle_size,
        }
    }

    /// Check whether a path carries the bundle suffix
    pub fn is_bundle(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&self.suffix))
    }
}
