//! `splice pack`: build a signed bundle from a directory of class files.
//!
//! Every regular file in the directory becomes `classes/<file name>`; the
//! file stems form the `Patch-Classes` list in name order.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::Utc;
use splice_engine::{BundleWriter, Patch, SubPatch};

use super::read_signing_key;

/// Signature alias used for publisher signatures
const SIGNER_ALIAS: &str = "CERT";

pub fn execute(classes_dir: &Path, name: &str, key: &Path, out: &Path) -> anyhow::Result<Patch> {
    let key = read_signing_key(key)?;

    let mut files: Vec<_> = fs::read_dir(classes_dir)
        .with_context(|| format!("failed to read {}", classes_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    if files.is_empty() {
        bail!("{} holds no class files", classes_dir.display());
    }

    let mut classes = Vec::with_capacity(files.len());
    let mut entries = Vec::with_capacity(files.len());
    for file in &files {
        let (Some(stem), Some(file_name)) = (file.file_stem(), file.file_name()) else {
            continue;
        };
        classes.push(stem.to_string_lossy().into_owned());
        entries.push((
            format!("classes/{}", file_name.to_string_lossy()),
            fs::read(file).with_context(|| format!("failed to read {}", file.display()))?,
        ));
    }

    let patch = Patch::new(
        out,
        name,
        Utc::now(),
        vec![SubPatch {
            name: name.to_string(),
            classes,
        }],
    );
    let mut writer = BundleWriter::for_patch(&patch);
    for (entry, bytes) in entries {
        writer.add_entry(entry, bytes);
    }
    writer.sign_with(SIGNER_ALIAS, key);
    writer
        .write_to(out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{keygen, verify};

    #[test]
    fn test_pack_produces_verifiable_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        fs::create_dir_all(&classes).unwrap();
        fs::write(classes.join("B_CF.json"), b"{}").unwrap();
        fs::write(classes.join("A_CF.json"), b"{}").unwrap();
        let key = dir.path().join("publisher.key");
        let public = keygen::execute(&key, false).unwrap();
        let out = dir.path().join("out.apatch");

        let patch = execute(&classes, "app-fix", &key, &out).unwrap();

        assert_eq!(
            patch.classes("app-fix").unwrap(),
            &["A_CF".to_string(), "B_CF".to_string()][..]
        );
        let reread = Patch::open(&out).unwrap();
        assert_eq!(reread.name(), "app-fix");
        assert_eq!(reread.classes("app-fix"), patch.classes("app-fix"));
        assert!(verify::execute(&out, &public).unwrap());
    }

    #[test]
    fn test_pack_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("publisher.key");
        keygen::execute(&key, false).unwrap();

        let result = execute(dir.path().join("classes").as_path(), "p", &key, &dir.path().join("o"));
        assert!(result.is_err());

        fs::create_dir_all(dir.path().join("empty")).unwrap();
        let result = execute(&dir.path().join("empty"), "p", &key, &dir.path().join("o"));
        assert!(result.is_err());
    }
}
