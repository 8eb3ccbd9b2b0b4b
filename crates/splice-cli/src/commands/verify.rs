//! `splice verify`: check a bundle the way the engine's security gate does.

use std::path::Path;
use std::sync::Arc;

use splice_engine::{MemoryStore, SecurityGate};

use super::read_public_key;

/// `true` if some signature in `bundle` is by `key` and verifies
pub fn execute(bundle: &Path, key: &str) -> anyhow::Result<bool> {
    let publisher = read_public_key(key)?;
    let gate = SecurityGate::new(publisher, Arc::new(MemoryStore::new()));
    Ok(gate.verify_bundle(bundle)?)
}
