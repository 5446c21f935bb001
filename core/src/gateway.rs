//! Registry gateway seam.
//!
//! The only shared mutable resource is the remote registry. Every call is a
//! suspension point and may fail independently; none are transactional.

use async_trait::async_trait;

use crate::error::Result;
use crate::version::ImageVersion;

/// Primitive operations the archive state machines rely on.
///
/// Expected error conditions are reported through the error taxonomy:
/// `add_tag` may return [`ArchiveError::AlreadyExists`], `remove_tag` may
/// return [`ArchiveError::NotFound`], and `delete_version` may return
/// [`ArchiveError::NotFound`] or [`ArchiveError::FailedPrecondition`].
///
/// [`ArchiveError::AlreadyExists`]: crate::ArchiveError::AlreadyExists
/// [`ArchiveError::NotFound`]: crate::ArchiveError::NotFound
/// [`ArchiveError::FailedPrecondition`]: crate::ArchiveError::FailedPrecondition
#[async_trait]
pub trait RegistryGateway: Send + Sync {
    /// List every version in `repository`.
    async fn list_versions(&self, repository: &str) -> Result<Vec<ImageVersion>>;

    /// Whether `version` exists, looked up by digest.
    async fn version_exists(&self, version: &ImageVersion) -> Result<bool>;

    /// Copy `source` to `destination`, preserving the digest and every
    /// platform variant of a multi-arch index.
    async fn copy_version(&self, source: &ImageVersion, destination: &ImageVersion) -> Result<()>;

    /// Attach `tag` to `version`.
    async fn add_tag(&self, version: &ImageVersion, tag: &str) -> Result<()>;

    /// Detach `tag` from `version`'s image.
    async fn remove_tag(&self, version: &ImageVersion, tag: &str) -> Result<()>;

    /// Delete `version`.
    async fn delete_version(&self, version: &ImageVersion) -> Result<()>;
}
