//! Bulk-delete item operation.
//!
//! Each version is checked for existence, marked with `{prefix}-{digest}`,
//! stripped of every tag and deleted. A delete blocked by the backend puts
//! the original tags back and, optionally, removes the archived copy of an
//! active version so the two states do not drift apart.

use image_archive_core::error::{ArchiveError, Result};
use image_archive_core::{ImageVersion, RegistryGateway, Repository, VersionStatus};

use crate::tags::{self, DeleteResult};

/// Settings for a delete pass.
#[derive(Debug, Clone)]
pub struct DeleteOptions {
    /// Report intended deletions without mutating anything
    pub dry_run: bool,
    /// Marker tags are `{marker_prefix}-{digest hex}`
    pub marker_prefix: String,
    /// Delete the archived copy when deleting an active version is blocked
    pub reconcile_archive_copy: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            marker_prefix: "ARCHIVED".to_string(),
            reconcile_archive_copy: true,
        }
    }
}

impl DeleteOptions {
    pub fn marker_tag(&self, version: &ImageVersion) -> String {
        format!("{}-{}", self.marker_prefix, version.digest_hex())
    }
}

/// What happened to the archived copy after a blocked delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveCopyOutcome {
    /// Reconciliation disabled, or the version is itself archived
    NotConfigured,
    Absent,
    Deleted,
    Failed(String),
}

impl std::fmt::Display for ArchiveCopyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveCopyOutcome::NotConfigured => write!(f, "archive copy not reconciled"),
            ArchiveCopyOutcome::Absent => write!(f, "no archive copy"),
            ArchiveCopyOutcome::Deleted => write!(f, "archive copy deleted"),
            ArchiveCopyOutcome::Failed(e) => write!(f, "archive copy delete failed: {}", e),
        }
    }
}

/// Outcome of deleting one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    DryRun,
    /// Nothing to do, the version does not exist
    AlreadyAbsent,
    Deleted,
    /// FailedPrecondition; original tags restored
    Blocked {
        message: String,
        archive_copy: ArchiveCopyOutcome,
    },
    /// Any other failure; stripped tags restored
    Failed { message: String },
}

impl DeleteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DeleteOutcome::DryRun | DeleteOutcome::AlreadyAbsent | DeleteOutcome::Deleted
        )
    }

    /// The failure in terms of the error taxonomy.
    pub fn error(&self, version: &ImageVersion) -> Option<ArchiveError> {
        match self {
            DeleteOutcome::Blocked { message, .. } => Some(ArchiveError::DeleteFailedPrecondition {
                version: version.version_id(),
                message: message.clone(),
            }),
            DeleteOutcome::Failed { message } => Some(ArchiveError::DeleteFailed {
                version: version.version_id(),
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// Delete one version.
///
/// `Err` is reserved for errors that must stop the run; every item-level
/// failure is reported through [`DeleteOutcome`].
pub async fn delete_version(
    gateway: &dyn RegistryGateway,
    version: &ImageVersion,
    options: &DeleteOptions,
) -> Result<DeleteOutcome> {
    let marker = options.marker_tag(version);

    match gateway.version_exists(version).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(version = %version, "Version does not exist, skipping deletion");
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
        Err(e) => {
            return Ok(DeleteOutcome::Failed {
                message: format!("existence check failed: {}", e),
            })
        }
    }

    if options.dry_run {
        tracing::info!(version = %version, "DRY RUN: version would be deleted");
        return Ok(DeleteOutcome::DryRun);
    }

    match gateway.add_tag(version, &marker).await {
        Ok(()) | Err(ArchiveError::AlreadyExists(_)) => {}
        Err(ArchiveError::NotFound(_)) => return Ok(DeleteOutcome::AlreadyAbsent),
        Err(e) => {
            return Ok(DeleteOutcome::Failed {
                message: format!("marker tag failed: {}", e),
            })
        }
    }

    let mut strip: Vec<String> = version.tags.iter().filter(|t| **t != marker).cloned().collect();
    strip.push(marker.clone());

    tracing::info!(version = %version, tags = strip.len(), "Deleting version");
    let attempt = tags::untag_and_delete(gateway, version, &strip).await;
    match attempt.result {
        DeleteResult::Deleted => Ok(DeleteOutcome::Deleted),
        DeleteResult::AlreadyAbsent => {
            tracing::warn!(version = %version, "Version disappeared during deletion");
            Ok(DeleteOutcome::AlreadyAbsent)
        }
        DeleteResult::Blocked(message) => {
            tracing::warn!(version = %version, message = %message, "Delete blocked by precondition");
            let original: Vec<String> = attempt
                .stripped
                .into_iter()
                .filter(|t| *t != marker)
                .collect();
            tags::restore_tags(gateway, version, &original).await;
            let archive_copy = reconcile_archive_copy(gateway, version, options).await;
            Ok(DeleteOutcome::Blocked {
                message,
                archive_copy,
            })
        }
        DeleteResult::Failed(message) => {
            tracing::warn!(version = %version, message = %message, "Delete failed");
            tags::restore_tags(gateway, version, &attempt.stripped).await;
            Ok(DeleteOutcome::Failed { message })
        }
    }
}

/// Remove the archived copy of an active version whose delete was blocked.
async fn reconcile_archive_copy(
    gateway: &dyn RegistryGateway,
    version: &ImageVersion,
    options: &DeleteOptions,
) -> ArchiveCopyOutcome {
    if !options.reconcile_archive_copy || version.status() != VersionStatus::Active {
        return ArchiveCopyOutcome::NotConfigured;
    }

    // Tags are addressed per image name, so only the tags the archived copy
    // itself carries may be stripped
    let archived_id = version.archived_version_id();
    let archived = match gateway.list_versions(&version.archived_repository()).await {
        Ok(listed) => match Repository::new(listed).get(&archived_id) {
            Some(copy) => copy.clone(),
            None => return ArchiveCopyOutcome::Absent,
        },
        Err(e) => return ArchiveCopyOutcome::Failed(format!("archive listing failed: {}", e)),
    };

    let attempt = tags::untag_and_delete(gateway, &archived, &archived.tags).await;
    match attempt.result {
        DeleteResult::Deleted | DeleteResult::AlreadyAbsent => {
            tracing::info!(version = %archived, "Archive copy deleted");
            ArchiveCopyOutcome::Deleted
        }
        DeleteResult::Blocked(e) | DeleteResult::Failed(e) => {
            tags::restore_tags(gateway, &archived, &attempt.stripped).await;
            tracing::warn!(version = %archived, error = %e, "Failed to delete archive copy");
            ArchiveCopyOutcome::Failed(e)
        }
    }
}
