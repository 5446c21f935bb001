//! Worklist parsing and fail-closed validation.
//!
//! A worklist is a newline-delimited list of `repository/name@sha256:<hex>`
//! identifiers naming the versions that should be archived (or deleted).
//! Any malformed entry or unsupported repository rejects the whole list.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{ArchiveError, Result};
use crate::version::{is_valid_digest, ImageVersion};

/// Parsed `repository/name@digest` identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionId {
    pub repository: String,
    pub name: String,
    pub digest: String,
}

impl VersionId {
    /// Parse an identifier with the strict `repository/name@sha256:<hex>` pattern.
    pub fn parse(entry: &str) -> Result<Self> {
        let invalid = || ArchiveError::Validation(format!("Invalid image specified: {entry}"));

        let (path, digest) = entry.split_once('@').ok_or_else(invalid)?;
        let (repository, name) = path.split_once('/').ok_or_else(invalid)?;

        if repository.is_empty()
            || name.is_empty()
            || name.starts_with('/')
            || name.ends_with('/')
            || entry.chars().any(char::is_whitespace)
            || !is_valid_digest(digest)
        {
            return Err(invalid());
        }

        Ok(Self {
            repository: repository.to_string(),
            name: name.to_string(),
            digest: digest.to_string(),
        })
    }

    /// Whether this identifier names `version` (state-qualified).
    pub fn matches(&self, version: &ImageVersion) -> bool {
        self.repository == version.repository
            && self.name == version.name
            && self.digest == version.digest
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.repository, self.name, self.digest)
    }
}

/// Validated, de-duplicated set of version identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Worklist {
    entries: BTreeSet<VersionId>,
}

impl Worklist {
    /// Parse worklist text, checking every entry against `supported`
    /// repository names.
    ///
    /// Blank lines and `#` comments are skipped.
    pub fn parse(text: &str, supported: &[String]) -> Result<Self> {
        let mut entries = BTreeSet::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let id = VersionId::parse(line)?;
            if !supported.iter().any(|repo| repo == &id.repository) {
                return Err(ArchiveError::Validation(format!(
                    "Unsupported repository: {}",
                    id.repository
                )));
            }
            entries.insert(id);
        }

        Ok(Self { entries })
    }

    /// Read and parse a worklist file.
    pub fn load(path: &Path, supported: &[String]) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ArchiveError::Validation(format!(
                "Failed to read worklist {}: {}",
                path.display(),
                e
            ))
        })?;
        let worklist = Self::parse(&text, supported)?;

        tracing::info!(
            path = %path.display(),
            entries = worklist.len(),
            "Loaded worklist"
        );
        Ok(worklist)
    }

    /// Identifiers (as strings) belonging to `repository`.
    pub fn ids_for_repository(&self, repository: &str) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|id| id.repository == repository)
            .map(ToString::to_string)
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.to_string() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionId> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
