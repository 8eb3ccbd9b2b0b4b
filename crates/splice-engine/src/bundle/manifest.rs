//! Manifest text format
//!
//! JAR-style main section: one `Name: value` header per line, continuation
//! lines start with a single space, the section ends at the first blank line.
//! Header names compare case-insensitively and keep their first spelling.
//! Lines are wrapped at 72 bytes on output.

use super::BundleError;

/// Maximum encoded line length, in bytes, excluding the line break
const MAX_LINE: usize = 72;

/// Maximum header name length
const MAX_NAME: usize = 70;

/// Ordered, case-insensitive attribute list of a manifest main section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    attributes: Vec<(String, String)>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse manifest text
    pub fn parse(text: &str) -> Result<Self, BundleError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut manifest = Manifest::new();
        let mut current: Option<(String, String)> = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);

            if let Some(rest) = line.strip_prefix(' ') {
                match current.as_mut() {
                    Some((_, value)) => value.push_str(rest),
                    None => {
                        return Err(BundleError::MalformedManifest(format!(
                            "line {}: continuation without a header",
                            lineno + 1
                        )))
                    }
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                manifest.insert(&name, &value);
            }

            if line.is_empty() {
                // end of main section
                break;
            }

            let (name, value) = line.split_once(": ").ok_or_else(|| {
                BundleError::MalformedManifest(format!(
                    "line {}: expected \"Name: value\"",
                    lineno + 1
                ))
            })?;
            if !is_valid_name(name) {
                return Err(BundleError::MalformedManifest(format!(
                    "line {}: invalid attribute name {:?}",
                    lineno + 1,
                    name
                )));
            }
            current = Some((name.to_string(), value.to_string()));
        }

        if let Some((name, value)) = current {
            manifest.insert(&name, &value);
        }
        Ok(manifest)
    }

    /// Look up an attribute (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing one with the same name
    pub fn insert(&mut self, name: &str, value: &str) {
        match self
            .attributes
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
    }

    /// Attributes in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the manifest has no attributes
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Encode as manifest text, terminated by a blank line
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.attributes {
            write_wrapped(&mut out, &format!("{}: {}", name, value));
        }
        out.push_str("\r\n");
        out
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Append `line` split into 72-byte physical lines
fn write_wrapped(out: &mut String, line: &str) {
    let mut rest = line;
    let mut limit = MAX_LINE;
    loop {
        if rest.len() <= limit {
            out.push_str(rest);
            out.push_str("\r\n");
            return;
        }
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n ");
        rest = &rest[cut..];
        // continuation lines spend one byte on the leading space
        limit = MAX_LINE - 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let text = "Manifest-Version: 1.0\r\nPatch-Name: app-release-fix\r\nCreated-Time: 9 Nov 2020 01:53:27 GMT\r\n\r\n";
        let m = Manifest::parse(text).unwrap();
        assert_eq!(m.get("Manifest-Version"), Some("1.0"));
        assert_eq!(m.get("patch-name"), Some("app-release-fix"));
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn test_parse_continuation() {
        let text = "Patch-Classes: com.example.A,com.ex\n ample.B\nPatch-Name: p\n";
        let m = Manifest::parse(text).unwrap();
        assert_eq!(m.get("Patch-Classes"), Some("com.example.A,com.example.B"));
        assert_eq!(m.get("Patch-Name"), Some("p"));
    }

    #[test]
    fn test_parse_stops_at_blank_line() {
        let text = "Patch-Name: p\n\nName: section\nIgnored: yes\n";
        let m = Manifest::parse(text).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("Ignored"), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Manifest::parse("no separator here\n"),
            Err(BundleError::MalformedManifest(_))
        ));
        assert!(matches!(
            Manifest::parse(" leading continuation\n"),
            Err(BundleError::MalformedManifest(_))
        ));
        assert!(matches!(
            Manifest::parse("Bad Name: x\n"),
            Err(BundleError::MalformedManifest(_))
        ));
    }

    #[test]
    fn test_duplicate_header_last_wins() {
        let m = Manifest::parse("A-Classes: x\na-classes: y\n").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("A-Classes"), Some("y"));
        assert_eq!(m.iter().next().unwrap().0, "A-Classes");
    }

    #[test]
    fn test_wrapping_keeps_lines_short() {
        let mut m = Manifest::new();
        let long: Vec<String> = (0..20).map(|i| format!("com.example.pkg.Class{}", i)).collect();
        m.insert("Patch-Classes", &long.join(","));
        let text = m.to_text();

        for line in text.split("\r\n") {
            assert!(line.len() <= MAX_LINE, "line too long: {}", line.len());
        }
        let back = Manifest::parse(&text).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_wrapping_respects_char_boundaries() {
        let mut m = Manifest::new();
        m.insert("From-File", &"é".repeat(80));
        let back = Manifest::parse(&m.to_text()).unwrap();
        assert_eq!(back.get("From-File"), m.get("From-File"));
    }
}
