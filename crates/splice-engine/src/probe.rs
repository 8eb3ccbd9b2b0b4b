//! Platform probe
//!
//! Decides whether the engine may operate on the host VM at all. Support is a
//! positive allow-list: the VM flavor and API level must map to a validated
//! [`RecordLayout`]. Anything else gets `is_supported() == false` and every
//! binder operation becomes a logged no-op.

use crate::vm::layout::layout_for;
use crate::vm::{ManagedRuntime, RecordLayout, RuntimeFlavor};

/// Outcome of probing the host runtime
#[derive(Debug, Clone)]
pub struct Platform {
    vm_version: String,
    api_level: u32,
    flavor: RuntimeFlavor,
    layout: Option<&'static RecordLayout>,
}

impl Platform {
    /// Probe a live runtime
    pub fn probe(runtime: &dyn ManagedRuntime) -> Self {
        Self::detect(&runtime.vm_version(), runtime.api_level())
    }

    /// Classify a version string and API level
    pub fn detect(vm_version: &str, api_level: u32) -> Self {
        let flavor = RuntimeFlavor::from_vm_version(vm_version);
        Self {
            vm_version: vm_version.to_string(),
            api_level,
            flavor,
            layout: layout_for(flavor, api_level),
        }
    }

    /// The VM matches a validated record layout
    pub fn is_supported(&self) -> bool {
        self.layout.is_some()
    }

    /// Flavor hint: ahead-of-time compiling runtime
    pub fn is_art_like(&self) -> bool {
        self.flavor == RuntimeFlavor::Art
    }

    /// Platform API level
    pub fn api_level(&self) -> u32 {
        self.api_level
    }

    /// Raw VM version string
    pub fn vm_version(&self) -> &str {
        &self.vm_version
    }

    /// Detected flavor
    pub fn flavor(&self) -> RuntimeFlavor {
        self.flavor
    }

    /// Validated record layout, if supported
    pub fn layout(&self) -> Option<&'static RecordLayout> {
        self.layout
    }

    /// Short reason string for logs when unsupported
    pub fn describe(&self) -> String {
        match self.layout {
            Some(layout) => format!("{} (api {})", layout.name, self.api_level),
            None => format!(
                "vm {} ({:?}) api {} has no validated layout",
                self.vm_version, self.flavor, self.api_level
            ),
        }
    }
}
