//! Signed bundle writer

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use ed25519_dalek::{Signer, SigningKey};

use super::{content_digest, BundleError, Manifest, Patch, SignatureBlock, MANIFEST_ENTRY};

/// Builds a signed bundle archive
///
/// # Example
/// ```ignore
/// let mut writer = BundleWriter::new(patch.to_manifest());
/// writer
///     .add_entry("classes/U_CF.json", class_bytes)
///     .sign_with("CERT", signing_key);
/// writer.write_to(Path::new("out.apatch"))?;
/// ```
pub struct BundleWriter {
    manifest: Manifest,
    entries: Vec<(String, Vec<u8>)>,
    signers: Vec<(String, SigningKey)>,
}

impl BundleWriter {
    /// Start a bundle with the given manifest
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            entries: Vec::new(),
            signers: Vec::new(),
        }
    }

    /// Start a bundle from a patch description
    pub fn for_patch(patch: &Patch) -> Self {
        Self::new(patch.to_manifest())
    }

    /// Add a file entry; entries keep insertion order in the archive
    pub fn add_entry(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.push((name.into(), bytes.into()));
        self
    }

    /// Sign the bundle with `key`, stored as `META-INF/<alias>.SIG`
    pub fn sign_with(&mut self, alias: &str, key: SigningKey) -> &mut Self {
        self.signers.push((alias.to_uppercase(), key));
        self
    }

    /// Encode the archive
    pub fn to_bytes(&self) -> Result<Vec<u8>, BundleError> {
        let manifest = self.manifest.to_text().into_bytes();
        let mut contents: Vec<(&str, &[u8])> = vec![(MANIFEST_ENTRY, manifest.as_slice())];
        contents.extend(self.entries.iter().map(|(n, b)| (n.as_str(), b.as_slice())));

        let digest = content_digest(contents.iter().copied());
        let signatures: Vec<(String, String)> = self
            .signers
            .iter()
            .map(|(alias, key)| {
                let block = SignatureBlock {
                    entry: format!("META-INF/{}.SIG", alias),
                    signer_key: key.verifying_key().to_bytes(),
                    signature: key.sign(&digest).to_bytes(),
                };
                (block.entry.clone(), block.to_text())
            })
            .collect();

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in &contents {
            zip.start_file(*name, options)?;
            zip.write_all(bytes)?;
        }
        for (name, text) in &signatures {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(text.as_bytes())?;
        }
        Ok(zip.finish()?.into_inner())
    }

    /// Write the archive to `path`
    pub fn write_to(&self, path: &Path) -> Result<(), BundleError> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }
}
