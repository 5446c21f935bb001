//! Read-only duplicate scan and legacy marker cleanup.

use image_archive_core::error::Result;
use image_archive_core::{ImageVersion, RegistryGateway};

use crate::tags;

/// Where a version's counterpart stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// The counterpart exists in the opposite state
    Duplicate { counterpart: String },
    /// Only this copy exists
    Unique { counterpart: String },
    /// The version itself no longer exists
    Missing,
}

/// Check whether `version` also exists in the opposite state.
pub async fn scan_version(gateway: &dyn RegistryGateway, version: &ImageVersion) -> Result<ScanResult> {
    if !gateway.version_exists(version).await? {
        tracing::info!(version = %version, "Version does not exist");
        return Ok(ScanResult::Missing);
    }

    let counterpart = version.counterpart();
    let id = counterpart.version_id();
    if gateway.version_exists(&counterpart).await? {
        tracing::debug!(version = %version, counterpart = %id, "Counterpart exists");
        Ok(ScanResult::Duplicate { counterpart: id })
    } else {
        Ok(ScanResult::Unique { counterpart: id })
    }
}

/// Whether `tag` is a delete marker for `prefix`.
pub fn is_marker_tag(tag: &str, prefix: &str) -> bool {
    tag.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('-'))
}

/// Remove every marker tag from `version`, returning the tags removed.
pub async fn unmark_version(
    gateway: &dyn RegistryGateway,
    version: &ImageVersion,
    prefix: &str,
) -> Result<Vec<String>> {
    let markers: Vec<String> = version
        .tags
        .iter()
        .filter(|tag| is_marker_tag(tag, prefix))
        .cloned()
        .collect();

    let removed = tags::strip_tags(gateway, version, &markers).await?;
    for tag in &removed {
        tracing::info!(version = %version, tag = %tag, "Removed marker tag");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryRegistry;

    fn foo() -> ImageVersion {
        ImageVersion::new("p", "l", "images", "foo", "sha256:aaa")
    }

    #[tokio::test]
    async fn test_scan_duplicate() {
        let registry = InMemoryRegistry::with_versions([foo(), foo().to_archived()]);
        let result = scan_version(&registry, &foo()).await.unwrap();
        assert_eq!(
            result,
            ScanResult::Duplicate {
                counterpart: "images-archive/foo@sha256:aaa".to_string()
            }
        );
        assert!(registry.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_scan_unique_and_missing() {
        let registry = InMemoryRegistry::with_versions([foo().to_archived()]);
        assert!(matches!(
            scan_version(&registry, &foo().to_archived()).await.unwrap(),
            ScanResult::Unique { .. }
        ));
        assert_eq!(scan_version(&registry, &foo()).await.unwrap(), ScanResult::Missing);
    }

    #[test]
    fn test_is_marker_tag() {
        assert!(is_marker_tag("ARCHIVED-abc", "ARCHIVED"));
        assert!(!is_marker_tag("ARCHIVEDabc", "ARCHIVED"));
        assert!(!is_marker_tag("latest", "ARCHIVED"));
    }

    #[tokio::test]
    async fn test_unmark_removes_only_markers() {
        let marked = foo().with_tags(["1.0", "ARCHIVED-aaa"]);
        let registry = InMemoryRegistry::with_versions([marked.clone()]);

        let removed = unmark_version(&registry, &marked, "ARCHIVED").await.unwrap();

        assert_eq!(removed, vec!["ARCHIVED-aaa".to_string()]);
        let tags = registry.get("images/foo@sha256:aaa").unwrap().tags;
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["1.0".to_string()]);
    }
}
