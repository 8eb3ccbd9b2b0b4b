//! In-memory patch model

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{ArchiveLimits, BundleArchive, BundleError, Manifest};

const MANIFEST_VERSION: &str = "Manifest-Version";
const PATCH_NAME: &str = "Patch-Name";
const CREATED_TIME: &str = "Created-Time";
const FROM_FILE: &str = "From-File";
const TO_FILE: &str = "To-File";
const PATCH_CLASSES: &str = "Patch-Classes";
const CLASSES_SUFFIX: &str = "-Classes";

/// Class list of one logical sub-patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPatch {
    /// Logical patch-name (`Patch-Name` for `Patch-Classes`, else the `<X>` of `<X>-Classes`)
    pub name: String,
    /// Class names, in manifest order
    pub classes: Vec<String>,
}

/// A parsed patch bundle
///
/// Immutable after construction. Patches order by creation time; ties are
/// broken by bundle file name and then by full path, so two distinct bundle
/// files never compare equal.
#[derive(Debug, Clone)]
pub struct Patch {
    file: PathBuf,
    name: String,
    time: DateTime<Utc>,
    sub_patches: Vec<SubPatch>,
    from_file: Option<String>,
    to_file: Option<String>,
}

impl Patch {
    /// Read the manifest of the bundle at `file`
    pub fn open(file: &Path) -> Result<Self, BundleError> {
        Self::open_with_limits(file, &ArchiveLimits::default())
    }

    /// Read the manifest of the bundle at `file` under explicit size caps
    pub fn open_with_limits(file: &Path, limits: &ArchiveLimits) -> Result<Self, BundleError> {
        let archive = BundleArchive::open_with_limits(file, limits)?;
        let manifest = archive.manifest()?;
        Self::from_manifest(file, &manifest)
    }

    /// Build a patch from an already-parsed manifest
    pub fn from_manifest(file: &Path, manifest: &Manifest) -> Result<Self, BundleError> {
        if manifest.get(MANIFEST_VERSION).is_none() {
            return Err(BundleError::MissingAttribute(MANIFEST_VERSION));
        }
        let name = manifest
            .get(PATCH_NAME)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(BundleError::MissingAttribute(PATCH_NAME))?
            .to_string();
        let time = parse_time(
            manifest
                .get(CREATED_TIME)
                .ok_or(BundleError::MissingAttribute(CREATED_TIME))?,
        )?;

        let mut sub_patches: Vec<SubPatch> = Vec::new();
        for (attr, value) in manifest.iter() {
            let Some(prefix) = strip_classes_suffix(attr) else {
                continue;
            };
            let key = if attr.eq_ignore_ascii_case(PATCH_CLASSES) {
                name.clone()
            } else if prefix.is_empty() {
                return Err(BundleError::MalformedManifest(format!(
                    "attribute {:?} names no sub-patch",
                    attr
                )));
            } else {
                prefix.to_string()
            };
            let classes = split_classes(value);
            match sub_patches.iter_mut().find(|s| s.name == key) {
                Some(existing) => existing.classes = classes,
                None => sub_patches.push(SubPatch { name: key, classes }),
            }
        }
        if sub_patches.is_empty() {
            return Err(BundleError::NoClasses);
        }

        Ok(Self {
            file: file.to_path_buf(),
            name,
            time,
            sub_patches,
            from_file: manifest.get(FROM_FILE).map(str::to_string),
            to_file: manifest.get(TO_FILE).map(str::to_string),
        })
    }

    /// Construct a patch directly, for tooling that writes bundles
    pub fn new(
        file: impl Into<PathBuf>,
        name: impl Into<String>,
        time: DateTime<Utc>,
        sub_patches: Vec<SubPatch>,
    ) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            time,
            sub_patches,
            from_file: None,
            to_file: None,
        }
    }

    /// Set the informational `From-File`/`To-File` attributes
    pub fn with_files(mut self, from: Option<String>, to: Option<String>) -> Self {
        self.from_file = from;
        self.to_file = to;
        self
    }

    /// Encode as a manifest
    ///
    /// The sub-patch named like the patch itself becomes `Patch-Classes`.
    pub fn to_manifest(&self) -> Manifest {
        let mut manifest = Manifest::new();
        manifest.insert(MANIFEST_VERSION, "1.0");
        manifest.insert(PATCH_NAME, &self.name);
        manifest.insert(CREATED_TIME, &format_time(&self.time));
        if let Some(from) = &self.from_file {
            manifest.insert(FROM_FILE, from);
        }
        if let Some(to) = &self.to_file {
            manifest.insert(TO_FILE, to);
        }
        for sub in &self.sub_patches {
            let attr = if sub.name == self.name {
                PATCH_CLASSES.to_string()
            } else {
                format!("{}{}", sub.name, CLASSES_SUFFIX)
            };
            manifest.insert(&attr, &sub.classes.join(","));
        }
        manifest
    }

    /// Bundle path
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Logical patch-name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation timestamp
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Sub-patch names in manifest order
    pub fn patch_names(&self) -> impl Iterator<Item = &str> {
        self.sub_patches.iter().map(|s| s.name.as_str())
    }

    /// Check whether the bundle advertises `patch_name`
    pub fn has_patch_name(&self, patch_name: &str) -> bool {
        self.sub_patches.iter().any(|s| s.name == patch_name)
    }

    /// Class list of one sub-patch
    pub fn classes(&self, patch_name: &str) -> Option<&[String]> {
        self.sub_patches
            .iter()
            .find(|s| s.name == patch_name)
            .map(|s| s.classes.as_slice())
    }

    /// All sub-patches, in manifest order
    pub fn sub_patches(&self) -> &[SubPatch] {
        &self.sub_patches
    }

    /// Informational source file
    pub fn from_file(&self) -> Option<&str> {
        self.from_file.as_deref()
    }

    /// Informational destination file
    pub fn to_file(&self) -> Option<&str> {
        self.to_file.as_deref()
    }

    fn file_name(&self) -> &std::ffi::OsStr {
        self.file.file_name().unwrap_or(self.file.as_os_str())
    }
}

impl PartialEq for Patch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Patch {}

impl PartialOrd for Patch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Patch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.file_name().cmp(other.file_name()))
            .then_with(|| self.file.cmp(&other.file))
    }
}

/// Parse an RFC-1123 (RFC-2822 compatible) timestamp
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, BundleError> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| BundleError::InvalidTimestamp(value.to_string()))
}

/// Format a timestamp as RFC-1123, e.g. `Mon, 09 Nov 2020 01:53:27 GMT`
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Case-insensitively strip `-Classes`, returning the prefix
fn strip_classes_suffix(attr: &str) -> Option<&str> {
    let split = attr.len().checked_sub(CLASSES_SUFFIX.len())?;
    if !attr.is_char_boundary(split) {
        return None;
    }
    let (prefix, suffix) = attr.split_at(split);
    suffix
        .eq_ignore_ascii_case(CLASSES_SUFFIX)
        .then_some(prefix)
}

fn split_classes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(extra: &[(&str, &str)]) -> Manifest {
        let mut m = Manifest::new();
        m.insert("Manifest-Version", "1.0");
        m.insert("Patch-Name", "app-release-fix");
        m.insert("Created-Time", "9 Nov 2020 01:53:27 GMT");
        for (k, v) in extra {
            m.insert(k, v);
        }
        m
    }

    #[test]
    fn test_patch_classes_maps_to_patch_name() {
        let m = manifest(&[("Patch-Classes", "com.a.U_CF, com.a.V_CF"), ("Q-Classes", "Z")]);
        let p = Patch::from_manifest(Path::new("/p/out.apatch"), &m).unwrap();

        assert_eq!(p.name(), "app-release-fix");
        assert_eq!(
            p.classes("app-release-fix").unwrap(),
            &["com.a.U_CF".to_string(), "com.a.V_CF".to_string()]
        );
        assert_eq!(p.classes("Q").unwrap(), &["Z".to_string()]);
        let names: Vec<&str> = p.patch_names().collect();
        assert_eq!(names, vec!["app-release-fix", "Q"]);
    }

    #[test]
    fn test_time_parsed() {
        let p = Patch::from_manifest(Path::new("a.apatch"), &manifest(&[("Patch-Classes", "X")]))
            .unwrap();
        assert_eq!(format_time(&p.time()), "Mon, 09 Nov 2020 01:53:27 GMT");
    }

    #[test]
    fn test_empty_patch_classes_is_noop_list() {
        let p = Patch::from_manifest(Path::new("a.apatch"), &manifest(&[("Patch-Classes", "")]))
            .unwrap();
        assert_eq!(p.classes("app-release-fix").unwrap().len(), 0);
    }

    #[test]
    fn test_bare_classes_attribute_rejected() {
        let err = Patch::from_manifest(Path::new("a.apatch"), &manifest(&[("-Classes", "X")]))
            .unwrap_err();
        assert!(matches!(err, BundleError::MalformedManifest(_)));
    }

    #[test]
    fn test_missing_attributes() {
        let err = Patch::from_manifest(Path::new("a.apatch"), &manifest(&[])).unwrap_err();
        assert!(matches!(err, BundleError::NoClasses));

        let mut m = manifest(&[("Patch-Classes", "X")]);
        m.insert("Created-Time", "yesterday");
        let err = Patch::from_manifest(Path::new("a.apatch"), &m).unwrap_err();
        assert!(matches!(err, BundleError::InvalidTimestamp(_)));

        let mut m = Manifest::new();
        m.insert("Patch-Name", "p");
        let err = Patch::from_manifest(Path::new("a.apatch"), &m).unwrap_err();
        assert!(matches!(err, BundleError::MissingAttribute("Manifest-Version")));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let m = manifest(&[
            ("From-File", "app-1.0.apk"),
            ("To-File", "app-1.0-fix.apk"),
            ("Patch-Classes", "B,A,C"),
            ("plugin-Classes", "P1"),
        ]);
        let p = Patch::from_manifest(Path::new("a.apatch"), &m).unwrap();
        let text = p.to_manifest().to_text();
        let back = Patch::from_manifest(Path::new("a.apatch"), &Manifest::parse(&text).unwrap())
            .unwrap();

        assert_eq!(back.name(), p.name());
        assert_eq!(back.time(), p.time());
        assert_eq!(back.sub_patches(), p.sub_patches());
        assert_eq!(back.from_file(), Some("app-1.0.apk"));
        assert_eq!(back.to_file(), Some("app-1.0-fix.apk"));
    }

    #[test]
    fn test_ordering_by_time_then_file() {
        let t0 = parse_time("9 Nov 2020 01:53:27 GMT").unwrap();
        let t1 = parse_time("9 Nov 2020 01:53:28 GMT").unwrap();
        let subs = vec![SubPatch {
            name: "p".to_string(),
            classes: vec![],
        }];
        let late = Patch::new("/d/a.apatch", "p", t1, subs.clone());
        let early_b = Patch::new("/d/b.apatch", "p", t0, subs.clone());
        let early_a = Patch::new("/d/a.apatch", "p", t0, subs.clone());

        let mut set = std::collections::BTreeSet::new();
        set.insert(late.clone());
        set.insert(early_b.clone());
        set.insert(early_a.clone());

        let order: Vec<&Path> = set.iter().map(|p| p.file()).collect();
        assert_eq!(
            order,
            vec![
                Path::new("/d/a.apatch"),
                Path::new("/d/b.apatch"),
                Path::new("/d/a.apatch")
            ]
        );
        assert_eq!(set.iter().last().unwrap().time(), t1);
        assert_ne!(early_a, early_b);
    }
}
