//! Image version identity and active/archived path transforms.
//!
//! A version is identified by `repository/name@digest`. The archived copy of a
//! version lives in the sibling repository carrying the reserved
//! [`ARCHIVE_SUFFIX`], so the same logical version can be addressed in either
//! state by toggling that suffix.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// Reserved suffix marking the archived state of a repository.
pub const ARCHIVE_SUFFIX: &str = "-archive";

/// Digest algorithm prefix accepted for version digests.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Lifecycle state encoded in a repository name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Active,
    Archived,
}

impl VersionStatus {
    /// The state a move from this state ends in.
    pub fn opposite(self) -> Self {
        match self {
            Self::Active => Self::Archived,
            Self::Archived => Self::Active,
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// One immutable, content-addressed version of a named image inside one
/// repository state.
///
/// Values are snapshots: after any registry call the tag set may be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVersion {
    /// GCP project hosting the repository
    pub project: String,
    /// Repository location (e.g., "australia-southeast1")
    pub location: String,
    /// Repository name, including the archive suffix when archived
    pub repository: String,
    /// Image name, may contain `/`
    pub name: String,
    /// Content digest (e.g., "sha256:abc123...")
    pub digest: String,
    /// Tags attached to this version
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Image size in bytes as reported by the registry
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub build_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub upload_time: Option<DateTime<Utc>>,
}

impl ImageVersion {
    /// Create a version with no tags and no backend metadata.
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        repository: impl Into<String>,
        name: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            repository: repository.into(),
            name: name.into(),
            digest: digest.into(),
            tags: BTreeSet::new(),
            size_bytes: 0,
            build_time: None,
            update_time: None,
            upload_time: None,
        }
    }

    /// Builder-style helper to attach tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Parse an Artifact Registry `dockerImages` resource name.
    ///
    /// Format:
    /// `projects/{project}/locations/{location}/repositories/{repository}/dockerImages/{name}@sha256:{hex}`
    ///
    /// Nested image names may arrive URL-encoded (`%2F`).
    pub fn from_resource_name(resource_name: &str) -> Result<Self> {
        let invalid = || ArchiveError::Validation(format!("Invalid image path: {resource_name}"));

        let path = resource_name.replace("%2F", "/");
        let rest = path.strip_prefix("projects/").ok_or_else(invalid)?;
        let (project, rest) = rest.split_once("/locations/").ok_or_else(invalid)?;
        let (location, rest) = rest.split_once("/repositories/").ok_or_else(invalid)?;
        let (repository, rest) = rest.split_once("/dockerImages/").ok_or_else(invalid)?;
        let (name, digest) = rest.rsplit_once('@').ok_or_else(invalid)?;

        if [project, location, repository, name]
            .iter()
            .any(|part| part.is_empty() || part.contains('@'))
            || project.contains('/')
            || location.contains('/')
            || repository.contains('/')
        {
            return Err(invalid());
        }
        if !is_valid_digest(digest) {
            return Err(invalid());
        }

        Ok(Self::new(project, location, repository, name, digest))
    }

    /// Hex part of the digest, without the algorithm prefix.
    pub fn digest_hex(&self) -> &str {
        self.digest
            .strip_prefix(DIGEST_PREFIX)
            .unwrap_or(&self.digest)
    }

    /// State encoded by the repository name.
    pub fn status(&self) -> VersionStatus {
        if self.repository.ends_with(ARCHIVE_SUFFIX) {
            VersionStatus::Archived
        } else {
            VersionStatus::Active
        }
    }

    /// `repository/name`
    pub fn short_path(&self) -> String {
        format!("{}/{}", self.repository, self.name)
    }

    /// State-qualified identifier: `repository/name@digest`.
    pub fn version_id(&self) -> String {
        format!("{}@{}", self.short_path(), self.digest)
    }

    /// Repository name in the active state.
    pub fn active_repository(&self) -> &str {
        self.repository
            .strip_suffix(ARCHIVE_SUFFIX)
            .unwrap_or(&self.repository)
    }

    /// Repository name in the archived state.
    pub fn archived_repository(&self) -> String {
        archived_repository_name(&self.repository)
    }

    /// Identifier of this version as if it were active.
    pub fn active_version_id(&self) -> String {
        format!("{}/{}@{}", self.active_repository(), self.name, self.digest)
    }

    /// Identifier of this version as if it were archived.
    pub fn archived_version_id(&self) -> String {
        format!("{}/{}@{}", self.archived_repository(), self.name, self.digest)
    }

    /// Pullable reference, e.g.
    /// `australia-southeast1-docker.pkg.dev/project/images/foo@sha256:...`
    pub fn docker_name(&self) -> String {
        format!(
            "{}-docker.pkg.dev/{}/{}/{}@{}",
            self.location, self.project, self.repository, self.name, self.digest
        )
    }

    /// Artifact Registry resource name of this version's docker image.
    pub fn full_path(&self) -> String {
        format!(
            "{}/dockerImages/{}@{}",
            self.repository_resource_name(),
            self.name,
            self.digest
        )
    }

    /// `projects/{p}/locations/{l}/repositories/{r}`
    pub fn repository_resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/repositories/{}",
            self.project, self.location, self.repository
        )
    }

    /// The same version recomputed in the active repository.
    pub fn to_active(&self) -> Self {
        Self {
            repository: self.active_repository().to_string(),
            ..self.clone()
        }
    }

    /// The same version recomputed in the archived repository.
    pub fn to_archived(&self) -> Self {
        Self {
            repository: self.archived_repository(),
            ..self.clone()
        }
    }

    /// The same version in the opposite state.
    pub fn counterpart(&self) -> Self {
        match self.status() {
            VersionStatus::Active => self.to_archived(),
            VersionStatus::Archived => self.to_active(),
        }
    }
}

impl std::fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.version_id())
    }
}

/// Archived name for a repository; already-archived names are returned unchanged.
pub fn archived_repository_name(repository: &str) -> String {
    if repository.ends_with(ARCHIVE_SUFFIX) {
        repository.to_string()
    } else {
        format!("{repository}{ARCHIVE_SUFFIX}")
    }
}

/// `sha256:` followed by at least one lowercase hex character.
pub fn is_valid_digest(digest: &str) -> bool {
    match digest.strip_prefix(DIGEST_PREFIX) {
        Some(hex) => {
            !hex.is_empty()
                && hex
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        }
        None => false,
    }
}
