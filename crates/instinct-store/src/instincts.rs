//! Instinct files written by the analysis engine
//!
//! Each instinct is a text file with a YAML header block followed by free-form
//! sections. This module only reads them: it makes sure the directory exists
//! before the engine runs and reports files that break the header contract.

use anyhow::{anyhow, Context, Result};
use instinct_types::{InstinctHeader, MAX_CONFIDENCE, MIN_CONFIDENCE};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A parsed instinct file
#[derive(Debug, Clone)]
pub struct InstinctFile {
    pub path: PathBuf,
    pub header: InstinctHeader,
    pub body: String,
}

impl InstinctFile {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let (header, body) = parse_instinct_content(&content)
            .with_context(|| format!("Failed to parse instinct from {:?}", path))?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            body,
        })
    }
}

/// A contract violation found while verifying the instinct directory
#[derive(Debug, Clone, PartialEq)]
pub enum InstinctIssue {
    Unreadable { path: PathBuf, reason: String },
    InvalidId { path: PathBuf, id: String },
    ConfidenceOutOfRange { path: PathBuf, id: String, confidence: f64 },
    UnknownDomain { path: PathBuf, id: String, domain: String },
    DuplicateId { id: String, paths: Vec<PathBuf> },
}

impl fmt::Display for InstinctIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstinctIssue::Unreadable { path, reason } => {
                write!(f, "{}: {}", path.display(), reason)
            }
            InstinctIssue::InvalidId { path, id } => {
                write!(f, "{}: invalid id '{}'", path.display(), id)
            }
            InstinctIssue::ConfidenceOutOfRange { path, id, confidence } => write!(
                f,
                "{}: instinct '{}' confidence {} outside [{}, {}]",
                path.display(),
                id,
                confidence,
                MIN_CONFIDENCE,
                MAX_CONFIDENCE
            ),
            InstinctIssue::UnknownDomain { path, id, domain } => write!(
                f,
                "{}: instinct '{}' has unknown domain '{}'",
                path.display(),
                id,
                domain
            ),
            InstinctIssue::DuplicateId { id, paths } => {
                write!(f, "instinct '{}' defined in {} files", id, paths.len())
            }
        }
    }
}

/// Outcome of [`InstinctStore::verify`]
#[derive(Debug, Default)]
pub struct VerificationReport {
    pub checked: usize,
    pub issues: Vec<InstinctIssue>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Directory of instinct files keyed by identifier
#[derive(Debug, Clone)]
pub struct InstinctStore {
    dir: PathBuf,
}

impl InstinctStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the instinct directory if absent
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))
    }

    /// Candidate instinct files, sorted by path
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            debug!("Instinct directory does not exist: {:?}", self.dir);
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read directory {:?}", self.dir))?
        {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if path.is_file() && !hidden {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Number of instinct files on disk
    pub fn count(&self) -> Result<usize> {
        Ok(self.files()?.len())
    }

    /// Parse every file and check the header contract.
    ///
    /// Files are never modified; problems are returned and logged.
    pub fn verify(&self) -> Result<VerificationReport> {
        let id_re = Regex::new(r"^[a-z0-9][a-z0-9-]*$")
            .map_err(|e| anyhow!("Failed to compile id validation regex: {}", e))?;

        let mut report = VerificationReport::default();
        let mut by_id: HashMap<String, Vec<PathBuf>> = HashMap::new();

        for path in self.files()? {
            report.checked += 1;

            let instinct = match InstinctFile::from_path(&path) {
                Ok(instinct) => instinct,
                Err(e) => {
                    report.issues.push(InstinctIssue::Unreadable {
                        path,
                        reason: format!("{:#}", e),
                    });
                    continue;
                }
            };
            let header = &instinct.header;

            if !id_re.is_match(&header.id) {
                report.issues.push(InstinctIssue::InvalidId {
                    path: path.clone(),
                    id: header.id.clone(),
                });
            }
            if !header.confidence_in_range() {
                report.issues.push(InstinctIssue::ConfidenceOutOfRange {
                    path: path.clone(),
                    id: header.id.clone(),
                    confidence: header.confidence,
                });
            }
            if header.domain().is_none() {
                report.issues.push(InstinctIssue::UnknownDomain {
                    path: path.clone(),
                    id: header.id.clone(),
                    domain: header.domain.clone(),
                });
            }

            by_id.entry(header.id.clone()).or_default().push(path);
        }

        let mut duplicates: Vec<_> = by_id
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(id, paths)| InstinctIssue::DuplicateId { id, paths })
            .collect();
        duplicates.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        report.issues.extend(duplicates);

        for issue in &report.issues {
            warn!("Instinct contract violation: {}", issue);
        }
        info!(
            "Verified {} instinct file(s), {} issue(s)",
            report.checked,
            report.issues.len()
        );

        Ok(report)
    }
}

/// Split an instinct file into its header block and body
fn parse_instinct_content(content: &str) -> Result<(InstinctHeader, String)> {
    let frontmatter_re = Regex::new(r"^---\s*\n([\s\S]*?)\n---\s*(?:\n([\s\S]*))?$")
        .map_err(|e| anyhow!("Failed to compile regex: {}", e))?;

    let captures = frontmatter_re
        .captures(content)
        .ok_or_else(|| anyhow!("No header block found"))?;

    let yaml_str = captures
        .get(1)
        .ok_or_else(|| anyhow!("Failed to extract header block"))?
        .as_str();
    let body = captures.get(2).map(|m| m.as_str()).unwrap_or("");

    let header: InstinctHeader =
        serde_yaml::from_str(yaml_str).with_context(|| "Failed to parse header block")?;

    Ok((header, body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instinct_text(id: &str, confidence: f64, domain: &str) -> String {
        format!(
            "---\nid: {id}\ntrigger: \"when writing tests\"\nconfidence: {confidence}\ndomain: \"{domain}\"\nsource: \"session-observation\"\n---\n\n# Prefer table tests\n\n## Action\nUse table-driven tests.\n\n## Evidence\n- Seen 4 times\n"
        )
    }

    #[test]
    fn test_parse_instinct_content() {
        let (header, body) = parse_instinct_content(&instinct_text("table-tests", 0.6, "testing")).unwrap();
        assert_eq!(header.id, "table-tests");
        assert_eq!(header.trigger, "when writing tests");
        assert_eq!(header.confidence, 0.6);
        assert_eq!(header.source, "session-observation");
        assert!(body.contains("## Action"));
    }

    #[test]
    fn test_parse_rejects_missing_header() {
        assert!(parse_instinct_content("# just a title\n").is_err());
    }

    #[test]
    fn test_verify_clean_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstinctStore::new(dir.path().join("personal"));
        store.ensure_dir().unwrap();
        fs::write(store.dir().join("table-tests.md"), instinct_text("table-tests", 0.6, "testing")).unwrap();
        fs::write(store.dir().join("small-commits.md"), instinct_text("small-commits", 0.4, "git")).unwrap();

        let report = store.verify().unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_verify_flags_violations() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstinctStore::new(dir.path());
        fs::write(dir.path().join("a.md"), instinct_text("dup", 0.95, "testing")).unwrap();
        fs::write(dir.path().join("b.md"), instinct_text("dup", 0.5, "cooking")).unwrap();
        fs::write(dir.path().join("c.md"), "no header here").unwrap();

        let report = store.verify().unwrap();
        assert_eq!(report.checked, 3);
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, InstinctIssue::ConfidenceOutOfRange { confidence, .. } if *confidence == 0.95)));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, InstinctIssue::UnknownDomain { domain, .. } if domain == "cooking")));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, InstinctIssue::DuplicateId { id, paths } if id == "dup" && paths.len() == 2)));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, InstinctIssue::Unreadable { .. })));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstinctStore::new(dir.path().join("nope"));
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.verify().unwrap().is_clean());
    }
}
