//! Tag bookkeeping shared by the move and delete operations.

use image_archive_core::error::{ArchiveError, Result};
use image_archive_core::{ImageVersion, RegistryGateway};

/// Attach `tags` to `version`, returning the ones this call attached.
///
/// A tag that already exists counts as added but is not returned: it may be
/// held by another digest of the same image.
pub(crate) async fn add_tags<'a>(
    gateway: &dyn RegistryGateway,
    version: &ImageVersion,
    tags: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<String>> {
    let mut attached = Vec::new();
    for tag in tags {
        match gateway.add_tag(version, tag).await {
            Ok(()) => attached.push(tag.clone()),
            Err(ArchiveError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(attached)
}

/// Detach `tags` from `version`, returning the ones actually removed.
///
/// A missing tag is skipped. On any other error the tags removed so far are
/// put back before the error is returned.
pub(crate) async fn strip_tags<'a>(
    gateway: &dyn RegistryGateway,
    version: &ImageVersion,
    tags: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for tag in tags {
        match gateway.remove_tag(version, tag).await {
            Ok(()) => removed.push(tag.clone()),
            Err(ArchiveError::NotFound(_)) => {}
            Err(e) => {
                restore_tags(gateway, version, &removed).await;
                return Err(e);
            }
        }
    }
    Ok(removed)
}

/// Best-effort re-attach of previously stripped tags.
pub(crate) async fn restore_tags(gateway: &dyn RegistryGateway, version: &ImageVersion, tags: &[String]) {
    for tag in tags {
        match gateway.add_tag(version, tag).await {
            Ok(()) | Err(ArchiveError::AlreadyExists(_)) => {}
            Err(e) => tracing::warn!(
                version = %version,
                tag = %tag,
                error = %e,
                "Failed to restore tag"
            ),
        }
    }
}

/// Result of trying to remove a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeleteResult {
    Deleted,
    /// The version was already gone
    AlreadyAbsent,
    /// FailedPrecondition: the backend refused the delete
    Blocked(String),
    Failed(String),
}

/// Outcome of [`untag_and_delete`] plus the tags that were stripped on the way.
#[derive(Debug)]
pub(crate) struct DeleteAttempt {
    pub result: DeleteResult,
    pub stripped: Vec<String>,
}

/// Strip `tags` from `version` and delete it.
///
/// Tags are left stripped whatever the result; callers decide what to put
/// back.
pub(crate) async fn untag_and_delete<'a>(
    gateway: &dyn RegistryGateway,
    version: &ImageVersion,
    tags: impl IntoIterator<Item = &'a String>,
) -> DeleteAttempt {
    let stripped = match strip_tags(gateway, version, tags).await {
        Ok(stripped) => stripped,
        Err(e) => {
            return DeleteAttempt {
                result: DeleteResult::Failed(format!("untag failed: {}", e)),
                stripped: Vec::new(),
            }
        }
    };

    let result = match gateway.delete_version(version).await {
        Ok(()) => DeleteResult::Deleted,
        Err(ArchiveError::NotFound(_)) => DeleteResult::AlreadyAbsent,
        Err(ArchiveError::FailedPrecondition(message)) => DeleteResult::Blocked(message),
        Err(e) => DeleteResult::Failed(e.to_string()),
    };
    DeleteAttempt { result, stripped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayOp, InMemoryRegistry, Injection};

    fn foo() -> ImageVersion {
        ImageVersion::new("p", "l", "images", "foo", "sha256:aaa").with_tags(["1.0", "latest"])
    }

    #[tokio::test]
    async fn test_add_tags_tolerates_existing() {
        let registry = InMemoryRegistry::with_versions([foo()]);
        let tags = vec!["1.0".to_string(), "2.0".to_string()];
        let attached = add_tags(&registry, &foo(), &tags).await.unwrap();
        assert_eq!(attached, vec!["2.0".to_string()]);
        let stored = registry.get("images/foo@sha256:aaa").unwrap();
        assert_eq!(stored.tags.len(), 3);
    }

    #[tokio::test]
    async fn test_strip_error_leaves_tags_attached() {
        let registry = InMemoryRegistry::with_versions([foo()]);
        let tags = vec!["1.0".to_string(), "latest".to_string()];
        registry.inject(
            GatewayOp::RemoveTag,
            "images/foo@sha256:aaa",
            Injection::Error("boom".to_string()),
        );
        assert!(strip_tags(&registry, &foo(), &tags).await.is_err());
        assert_eq!(registry.get("images/foo@sha256:aaa").unwrap().tags, foo().tags);
    }

    #[tokio::test]
    async fn test_untag_and_delete() {
        let registry = InMemoryRegistry::with_versions([foo()]);
        let tags: Vec<String> = foo().tags.into_iter().collect();

        let attempt = untag_and_delete(&registry, &foo(), &tags).await;
        assert_eq!(attempt.result, DeleteResult::Deleted);
        assert_eq!(attempt.stripped, tags);
        assert!(!registry.contains("images/foo@sha256:aaa"));

        let attempt = untag_and_delete(&registry, &foo(), &tags).await;
        assert_eq!(attempt.result, DeleteResult::AlreadyAbsent);
        assert!(attempt.stripped.is_empty());
    }

    #[tokio::test]
    async fn test_untag_and_delete_blocked_keeps_tags_stripped() {
        let registry = InMemoryRegistry::with_versions([foo()]);
        registry.protect("images/foo@sha256:aaa");
        let tags: Vec<String> = foo().tags.into_iter().collect();

        let attempt = untag_and_delete(&registry, &foo(), &tags).await;
        assert!(matches!(attempt.result, DeleteResult::Blocked(_)));
        assert!(registry.get("images/foo@sha256:aaa").unwrap().tags.is_empty());
    }
}
