//! `splice inspect`: show what a bundle declares.

use std::path::Path;

use anyhow::Context;
use serde_json::{json, Value};
use splice_engine::bundle::format_time;
use splice_engine::{BundleArchive, Patch};

/// Everything `inspect` prints about one bundle
pub struct InspectReport {
    pub patch: Patch,
    /// Entry name and size, in archive order
    pub entries: Vec<(String, usize)>,
    /// Signer key hex per signature entry, or why the entry is malformed
    pub signers: Vec<Result<(String, String), String>>,
}

pub fn execute(bundle: &Path) -> anyhow::Result<InspectReport> {
    let archive = BundleArchive::open(bundle)
        .with_context(|| format!("failed to open {}", bundle.display()))?;
    let manifest = archive.manifest()?;
    let patch = Patch::from_manifest(bundle, &manifest)?;

    let entries = archive
        .entry_names()
        .map(|name| {
            let size = archive.entry(name).map_or(0, |b| b.len());
            (name.to_string(), size)
        })
        .collect();
    let signers = archive
        .signature_blocks()
        .into_iter()
        .map(|block| {
            block
                .map(|b| (b.entry, hex::encode(b.signer_key)))
                .map_err(|e| e.to_string())
        })
        .collect();

    Ok(InspectReport {
        patch,
        entries,
        signers,
    })
}

impl InspectReport {
    pub fn print(&self) {
        let patch = &self.patch;
        println!("Patch:        {}", patch.name());
        println!("Created:      {}", format_time(&patch.time()));
        if let Some(from) = patch.from_file() {
            println!("From-File:    {}", from);
        }
        if let Some(to) = patch.to_file() {
            println!("To-File:      {}", to);
        }

        println!();
        println!("Sub-patches:");
        for sub in patch.sub_patches() {
            println!("  {} ({} classes)", sub.name, sub.classes.len());
            for class in &sub.classes {
                println!("    {}", class);
            }
        }

        println!();
        println!("Entries:");
        for (name, size) in &self.entries {
            println!("  {:>8}  {}", size, name);
        }

        println!();
        if self.signers.is_empty() {
            println!("Signatures:   (unsigned)");
        } else {
            println!("Signatures:");
            for signer in &self.signers {
                match signer {
                    Ok((entry, key)) => println!("  {}  {}", entry, key),
                    Err(reason) => println!("  malformed: {}", reason),
                }
            }
        }
    }

    pub fn to_json(&self) -> Value {
        let patch = &self.patch;
        json!({
            "name": patch.name(),
            "created": format_time(&patch.time()),
            "from_file": patch.from_file(),
            "to_file": patch.to_file(),
            "sub_patches": patch
                .sub_patches()
                .iter()
                .map(|s| json!({ "name": s.name, "classes": s.classes }))
                .collect::<Vec<_>>(),
            "entries": self
                .entries
                .iter()
                .map(|(name, size)| json!({ "name": name, "size": size }))
                .collect::<Vec<_>>(),
            "signatures": self
                .signers
                .iter()
                .map(|s| match s {
                    Ok((entry, key)) => json!({ "entry": entry, "signer_key": key }),
                    Err(reason) => json!({ "error": reason }),
                })
                .collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ed25519_dalek::SigningKey;
    use splice_engine::{BundleWriter, SubPatch};

    #[test]
    fn test_inspect_lists_sub_patches_and_signers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.apatch");
        let patch = Patch::new(
            &path,
            "app",
            Utc.timestamp_opt(1_604_886_807, 0).unwrap(),
            vec![
                SubPatch {
                    name: "app".to_string(),
                    classes: vec!["A_CF".to_string()],
                },
                SubPatch {
                    name: "plugin".to_string(),
                    classes: vec!["P_CF".to_string(), "Q_CF".to_string()],
                },
            ],
        );
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let mut writer = BundleWriter::for_patch(&patch);
        writer
            .add_entry("classes/A_CF.json", b"{}".to_vec())
            .sign_with("cert", key.clone());
        writer.write_to(&path).unwrap();

        let report = execute(&path).unwrap();

        assert_eq!(report.patch.sub_patches().len(), 2);
        assert!(report.entries.iter().any(|(n, s)| n == "classes/A_CF.json" && *s == 2));
        assert_eq!(report.signers.len(), 1);
        let (entry, signer) = report.signers[0].as_ref().unwrap();
        assert_eq!(entry, "META-INF/CERT.SIG");
        assert_eq!(signer, &hex::encode(key.verifying_key().as_bytes()));

        let json = report.to_json();
        assert_eq!(json["name"], "app");
        assert_eq!(json["sub_patches"][1]["classes"][1], "Q_CF");
    }

    #[test]
    fn test_inspect_rejects_non_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.apatch");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(execute(&path).is_err());
    }
}
