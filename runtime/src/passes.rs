//! Batch drivers.
//!
//! Each pass turns a set of versions into pool items, runs one item
//! operation per version and classifies the results into a
//! [`BatchReport`]. Per-item failures stay in the report; only listing
//! errors and fatal errors surface to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use image_archive_core::error::{ArchiveError, Result};
use image_archive_core::version::archived_repository_name;
use image_archive_core::{ImageVersion, RegistryGateway, Repository, Worklist};

use crate::delete::{self, DeleteOptions, DeleteOutcome};
use crate::migrate::{MoveFailure, MoveOperation, MoveState};
use crate::pool::{WorkItem, WorkerPool};
use crate::report::{BatchReport, ItemReport, ItemStatus, PassKind};
use crate::scan::{self, ScanResult};

impl WorkItem for ImageVersion {
    fn id(&self) -> String {
        self.version_id()
    }
}

/// Versions to move in each direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePlan {
    pub to_archive: Vec<ImageVersion>,
    pub to_unarchive: Vec<ImageVersion>,
}

impl ArchivePlan {
    pub fn is_empty(&self) -> bool {
        self.to_archive.is_empty() && self.to_unarchive.is_empty()
    }
}

/// Snapshots of both states of one repository.
#[derive(Debug, Clone)]
pub struct RepositoryState {
    pub repository: String,
    pub active: Repository,
    pub archived: Repository,
}

/// Reports of the archive and unarchive passes over one repository.
#[derive(Debug)]
pub struct RepositoryRun {
    pub repository: String,
    pub plan: ArchivePlan,
    pub archive: BatchReport,
    pub unarchive: BatchReport,
}

impl RepositoryRun {
    pub fn is_success(&self) -> bool {
        self.archive.is_success() && self.unarchive.is_success()
    }
}

/// Compute the archive and unarchive deltas.
///
/// `desired` holds active version ids that should end up archived. An
/// active version is archived when desired, even if a copy already sits in
/// the archive; an archived version is restored when no longer desired.
pub fn plan_archive(
    active: &Repository,
    archived: &Repository,
    desired: &BTreeSet<String>,
) -> ArchivePlan {
    let to_archive = active
        .iter()
        .filter(|v| desired.contains(&v.active_version_id()))
        .cloned()
        .collect();
    let to_unarchive = archived
        .iter()
        .filter(|v| !desired.contains(&v.active_version_id()))
        .cloned()
        .collect();
    ArchivePlan {
        to_archive,
        to_unarchive,
    }
}

/// List both states of `repository`.
pub async fn snapshot_repository(
    gateway: &dyn RegistryGateway,
    repository: &str,
) -> Result<RepositoryState> {
    let active = Repository::new(gateway.list_versions(repository).await?);
    let archived =
        Repository::new(gateway.list_versions(&archived_repository_name(repository)).await?);
    tracing::info!(
        repository,
        active = active.len(),
        archived = archived.len(),
        "Loaded repository snapshots"
    );
    Ok(RepositoryState {
        repository: repository.to_string(),
        active,
        archived,
    })
}

fn move_report(pass: PassKind, operation: MoveOperation) -> ItemReport {
    let id = operation.source().version_id();
    let state = operation.state();

    if state.is_success() {
        let status = match pass {
            PassKind::Unarchive => ItemStatus::Unarchived,
            _ => ItemStatus::Archived,
        };
        let verb = if operation.copy_created() { "copied to" } else { "already in" };
        return ItemReport::new(id, status, format!("{} {}", verb, operation.destination()));
    }

    let status = match state {
        MoveState::Failed(MoveFailure::ConflictingTags(_)) => ItemStatus::ConflictingTags,
        MoveState::Failed(MoveFailure::CopyFailed(_)) => ItemStatus::CopyFailed,
        MoveState::Failed(MoveFailure::TagFailed(_)) => ItemStatus::TagFailed,
        MoveState::Failed(MoveFailure::VerificationFailed(_)) => ItemStatus::VerificationFailed,
        MoveState::DeleteFailed {
            precondition: true, ..
        } => ItemStatus::PreconditionFailed,
        MoveState::DeleteFailed { .. } => ItemStatus::DeleteFailed,
        MoveState::CompensatedDelete { .. } => ItemStatus::CompensatedDelete,
        MoveState::CompensationSkipped { .. } => ItemStatus::CompensationSkipped,
        MoveState::CompensationFailed { .. } => ItemStatus::CompensationFailed,
        _ => ItemStatus::Failed,
    };

    let error = operation.error();
    let mut message = error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("move stopped in state {}", state.name()));
    if let MoveState::CompensationFailed {
        compensation_error, ..
    } = state
    {
        message = format!("{}; compensation failed: {}", message, compensation_error);
    }
    let retryable = error.as_ref().is_some_and(|e| e.is_retryable());

    ItemReport::new(id, status, message).retryable(retryable)
}

async fn move_pass(
    pass: PassKind,
    gateway: Arc<dyn RegistryGateway>,
    pool: &WorkerPool,
    versions: Vec<ImageVersion>,
    destination: Arc<Repository>,
) -> BatchReport {
    tracing::info!(pass = %pass, versions = versions.len(), "Starting pass");

    let run = pool
        .run(versions, move |version| {
            let gateway = gateway.clone();
            let snapshot = destination.clone();
            async move { MoveOperation::new(version, snapshot).run(gateway.as_ref()).await }
        })
        .await;

    let report = BatchReport::from_run(pass, run, |_, operation| move_report(pass, operation));
    tracing::info!(
        pass = %pass,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Pass finished"
    );
    report
}

/// Move active versions into the archive.
///
/// `archived` is the snapshot of the destination repository.
pub async fn archive_pass(
    gateway: Arc<dyn RegistryGateway>,
    pool: &WorkerPool,
    versions: Vec<ImageVersion>,
    archived: Arc<Repository>,
) -> BatchReport {
    move_pass(PassKind::Archive, gateway, pool, versions, archived).await
}

/// Move archived versions back to the active repository.
///
/// `active` is the snapshot of the destination repository.
pub async fn unarchive_pass(
    gateway: Arc<dyn RegistryGateway>,
    pool: &WorkerPool,
    versions: Vec<ImageVersion>,
    active: Arc<Repository>,
) -> BatchReport {
    move_pass(PassKind::Unarchive, gateway, pool, versions, active).await
}

/// Reconcile one repository with the desired archive set.
///
/// The unarchive pass runs against a fresh listing of the active
/// repository, taken after the archive pass. It is skipped, with every item
/// reported as aborted, when the archive pass hit a fatal error.
pub async fn archive_repository(
    gateway: Arc<dyn RegistryGateway>,
    pool: &WorkerPool,
    repository: &str,
    desired: &BTreeSet<String>,
) -> Result<RepositoryRun> {
    let state = snapshot_repository(gateway.as_ref(), repository).await?;
    let plan = plan_archive(&state.active, &state.archived, desired);
    tracing::info!(
        repository,
        to_archive = plan.to_archive.len(),
        to_unarchive = plan.to_unarchive.len(),
        "Computed archive plan"
    );

    let archive = archive_pass(
        gateway.clone(),
        pool,
        plan.to_archive.clone(),
        Arc::new(state.archived),
    )
    .await;

    let unarchive = if archive.fatal.is_some() {
        let mut skipped = BatchReport::new(PassKind::Unarchive);
        for version in &plan.to_unarchive {
            skipped.record(
                ItemReport::new(version.version_id(), ItemStatus::Aborted, "run aborted by a fatal error")
                    .retryable(true),
            );
        }
        skipped
    } else if plan.to_unarchive.is_empty() {
        BatchReport::new(PassKind::Unarchive)
    } else {
        let active = Repository::new(gateway.list_versions(repository).await?);
        unarchive_pass(gateway, pool, plan.to_unarchive.clone(), Arc::new(active)).await
    };

    Ok(RepositoryRun {
        repository: repository.to_string(),
        plan,
        archive,
        unarchive,
    })
}

fn delete_report(version: &ImageVersion, outcome: DeleteOutcome) -> ItemReport {
    let id = version.version_id();
    match &outcome {
        DeleteOutcome::DryRun => ItemReport::new(id, ItemStatus::DryRun, "DRY RUN: version not deleted"),
        DeleteOutcome::AlreadyAbsent => {
            ItemReport::new(id, ItemStatus::AlreadyAbsent, "version does not exist")
        }
        DeleteOutcome::Deleted => ItemReport::new(id, ItemStatus::Deleted, "deleted"),
        DeleteOutcome::Blocked {
            message,
            archive_copy,
        } => ItemReport::new(
            id,
            ItemStatus::PreconditionFailed,
            format!("{}; {}", message, archive_copy),
        )
        .retryable(true),
        DeleteOutcome::Failed { message } => {
            ItemReport::new(id, ItemStatus::DeleteFailed, message.clone()).retryable(true)
        }
    }
}

/// Delete `versions`.
pub async fn delete_pass(
    gateway: Arc<dyn RegistryGateway>,
    pool: &WorkerPool,
    versions: Vec<ImageVersion>,
    options: DeleteOptions,
) -> BatchReport {
    tracing::info!(
        versions = versions.len(),
        dry_run = options.dry_run,
        "Starting delete pass"
    );
    let options = Arc::new(options);

    let run = pool
        .run(versions, move |version| {
            let gateway = gateway.clone();
            let options = options.clone();
            async move {
                let outcome = delete::delete_version(gateway.as_ref(), &version, &options).await?;
                Ok::<_, ArchiveError>((version, outcome))
            }
        })
        .await;

    BatchReport::from_run(PassKind::Delete, run, |_, (version, outcome)| {
        delete_report(&version, outcome)
    })
}

/// Report, per version, whether its counterpart exists. Read-only.
pub async fn duplicate_scan(
    gateway: Arc<dyn RegistryGateway>,
    pool: &WorkerPool,
    versions: Vec<ImageVersion>,
) -> BatchReport {
    let run = pool
        .run(versions, move |version| {
            let gateway = gateway.clone();
            async move { scan::scan_version(gateway.as_ref(), &version).await }
        })
        .await;

    BatchReport::from_run(PassKind::DuplicateScan, run, |id, result| match result {
        ScanResult::Duplicate { counterpart } => {
            ItemReport::new(id, ItemStatus::Duplicate, format!("{} exists", counterpart))
        }
        ScanResult::Unique { counterpart } => {
            ItemReport::new(id, ItemStatus::Unique, format!("{} does not exist", counterpart))
        }
        ScanResult::Missing => ItemReport::new(id, ItemStatus::Missing, "version does not exist"),
    })
}

/// Remove `{prefix}-*` marker tags from every version of `repository`.
pub async fn unmark_pass(
    gateway: Arc<dyn RegistryGateway>,
    pool: &WorkerPool,
    repository: &str,
    prefix: &str,
) -> Result<BatchReport> {
    let marked: Vec<ImageVersion> = gateway
        .list_versions(repository)
        .await?
        .into_iter()
        .filter(|v| v.tags.iter().any(|tag| scan::is_marker_tag(tag, prefix)))
        .collect();
    tracing::info!(repository, marked = marked.len(), "Starting unmark pass");

    let prefix = Arc::new(prefix.to_string());
    let run = pool
        .run(marked, move |version| {
            let gateway = gateway.clone();
            let prefix = prefix.clone();
            async move { scan::unmark_version(gateway.as_ref(), &version, &prefix).await }
        })
        .await;

    Ok(BatchReport::from_run(PassKind::Unmark, run, |id, removed| {
        ItemReport::new(id, ItemStatus::Unmarked, format!("removed {}", removed.join(", ")))
    }))
}

/// Look up worklist entries in the listings of their repositories.
///
/// Entries that are not listed come back as bare versions without tags, so
/// delete and scan passes report them as absent instead of dropping them.
pub async fn resolve_worklist(
    gateway: &dyn RegistryGateway,
    worklist: &Worklist,
    project: &str,
    location: &str,
) -> Result<Vec<ImageVersion>> {
    let repositories: BTreeSet<&str> = worklist.iter().map(|id| id.repository.as_str()).collect();

    let mut listed: BTreeMap<String, ImageVersion> = BTreeMap::new();
    for repository in repositories {
        for version in gateway.list_versions(repository).await? {
            listed.insert(version.version_id(), version);
        }
    }

    Ok(worklist
        .iter()
        .map(|id| {
            listed.remove(&id.to_string()).unwrap_or_else(|| {
                tracing::debug!(version = %id, "Worklist entry not listed");
                ImageVersion::new(project, location, &id.repository, &id.name, &id.digest)
            })
        })
        .collect())
}

/// Every version of `repositories` and their archive siblings.
pub async fn inventory(
    gateway: &dyn RegistryGateway,
    repositories: &[String],
) -> Result<Vec<ImageVersion>> {
    let mut versions = Vec::new();
    for repository in repositories {
        versions.extend(gateway.list_versions(repository).await?);
        versions.extend(
            gateway
                .list_versions(&archived_repository_name(repository))
                .await?,
        );
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayCall, GatewayOp, InMemoryRegistry, Injection};

    fn version(repository: &str, name: &str, digest: &str, tags: &[&str]) -> ImageVersion {
        ImageVersion::new("p", "l", repository, name, digest).with_tags(tags.iter().copied())
    }

    fn desired(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn gateway(registry: &Arc<InMemoryRegistry>) -> Arc<dyn RegistryGateway> {
        registry.clone()
    }

    #[test]
    fn test_plan_archive() {
        let active = Repository::new(vec![
            version("images", "foo", "sha256:aaa", &[]),
            version("images", "foo", "sha256:bbb", &[]),
        ]);
        let archived = Repository::new(vec![
            version("images-archive", "bar", "sha256:ccc", &[]),
            version("images-archive", "baz", "sha256:ddd", &[]),
        ]);

        let plan = plan_archive(
            &active,
            &archived,
            &desired(&["images/foo@sha256:aaa", "images/baz@sha256:ddd"]),
        );

        let ids = |vs: &[ImageVersion]| vs.iter().map(|v| v.version_id()).collect::<Vec<_>>();
        assert_eq!(ids(&plan.to_archive), vec!["images/foo@sha256:aaa"]);
        assert_eq!(ids(&plan.to_unarchive), vec!["images-archive/bar@sha256:ccc"]);
    }

    #[test]
    fn test_plan_includes_versions_in_both_states() {
        let v = version("images", "foo", "sha256:aaa", &[]);
        let active = Repository::new(vec![v.clone()]);
        let archived = Repository::new(vec![v.to_archived()]);

        let plan = plan_archive(&active, &archived, &desired(&["images/foo@sha256:aaa"]));
        assert_eq!(plan.to_archive, vec![v]);
        assert!(plan.to_unarchive.is_empty());
    }

    #[tokio::test]
    async fn test_fresh_archive_scenario() {
        let registry = Arc::new(InMemoryRegistry::with_versions([version(
            "images",
            "foo",
            "sha256:aaa",
            &["1.0"],
        )]));
        let pool = WorkerPool::new(4);
        let wanted = desired(&["images/foo@sha256:aaa"]);

        let run = archive_repository(gateway(&registry), &pool, "images", &wanted)
            .await
            .unwrap();

        assert!(run.is_success());
        assert_eq!(run.archive.succeeded.len(), 1);
        assert_eq!(run.archive.succeeded[0].status, ItemStatus::Archived);
        assert!(registry.contains("images-archive/foo@sha256:aaa"));
        assert!(!registry.contains("images/foo@sha256:aaa"));
        assert!(registry
            .get("images-archive/foo@sha256:aaa")
            .unwrap()
            .tags
            .contains("1.0"));
    }

    #[tokio::test]
    async fn test_archive_is_idempotent() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            version("images", "foo", "sha256:aaa", &["1.0"]),
            version("images", "bar", "sha256:bbb", &["2.0"]),
            version("images-archive", "baz", "sha256:ccc", &[]),
        ]));
        let pool = WorkerPool::new(2);
        let wanted = desired(&["images/foo@sha256:aaa", "images/baz@sha256:ccc"]);

        let first = archive_repository(gateway(&registry), &pool, "images", &wanted)
            .await
            .unwrap();
        assert!(first.is_success());

        let state = snapshot_repository(registry.as_ref(), "images").await.unwrap();
        let plan = plan_archive(&state.active, &state.archived, &wanted);
        assert!(plan.is_empty());

        registry.clear_calls();
        let second = archive_repository(gateway(&registry), &pool, "images", &wanted)
            .await
            .unwrap();
        assert_eq!(second.archive.total() + second.unarchive.total(), 0);
        assert!(registry.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unarchive_restores_undesired_versions() {
        let registry = Arc::new(InMemoryRegistry::with_versions([version(
            "images-archive",
            "foo",
            "sha256:aaa",
            &["1.0"],
        )]));

        let run = archive_repository(gateway(&registry), &WorkerPool::default(), "images", &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(run.unarchive.succeeded[0].status, ItemStatus::Unarchived);
        assert!(registry.contains("images/foo@sha256:aaa"));
        assert!(!registry.contains("images-archive/foo@sha256:aaa"));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_pass() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            version("images", "foo", "sha256:aaa", &[]),
            version("images", "bar", "sha256:bbb", &[]),
        ]));
        registry.inject(
            GatewayOp::Copy,
            "images-archive/foo@sha256:aaa",
            Injection::Error("quota".to_string()),
        );
        let wanted = desired(&["images/foo@sha256:aaa", "images/bar@sha256:bbb"]);

        let run = archive_repository(gateway(&registry), &WorkerPool::new(1), "images", &wanted)
            .await
            .unwrap();

        assert_eq!(run.archive.succeeded.len(), 1);
        assert_eq!(run.archive.failed.len(), 1);
        assert_eq!(run.archive.failed[0].status, ItemStatus::CopyFailed);
        assert!(run.archive.failed[0].retryable);
        assert!(run.archive.fatal.is_none());
        assert!(registry.contains("images/foo@sha256:aaa"));
    }

    #[tokio::test]
    async fn test_fatal_error_skips_unarchive() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            version("images", "foo", "sha256:aaa", &[]),
            version("images-archive", "bar", "sha256:bbb", &[]),
        ]));
        registry.protect("images/foo@sha256:aaa");
        registry.inject(GatewayOp::Exists, "images/foo@sha256:aaa", Injection::Absent);

        let run = archive_repository(
            gateway(&registry),
            &WorkerPool::new(1),
            "images",
            &desired(&["images/foo@sha256:aaa"]),
        )
        .await
        .unwrap();

        assert!(run.archive.fatal.is_some());
        assert_eq!(run.unarchive.failed[0].status, ItemStatus::Aborted);
        assert!(registry.contains("images-archive/bar@sha256:bbb"));
    }

    #[tokio::test]
    async fn test_delete_pass() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            version("images", "foo", "sha256:aaa", &["1.0"]),
            version("images", "bar", "sha256:bbb", &["2.0"]),
        ]));
        registry.protect("images/bar@sha256:bbb");
        let versions = vec![
            version("images", "foo", "sha256:aaa", &["1.0"]),
            version("images", "bar", "sha256:bbb", &["2.0"]),
            version("images", "gone", "sha256:ccc", &[]),
        ];
        let options = DeleteOptions {
            dry_run: false,
            ..Default::default()
        };

        let report = delete_pass(gateway(&registry), &WorkerPool::new(3), versions, options).await;

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "images/bar@sha256:bbb");
        assert_eq!(report.failed[0].status, ItemStatus::PreconditionFailed);
        assert!(!registry.contains("images/foo@sha256:aaa"));
    }

    #[tokio::test]
    async fn test_duplicate_scan() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            version("images", "foo", "sha256:aaa", &[]),
            version("images-archive", "foo", "sha256:aaa", &[]),
            version("images", "bar", "sha256:bbb", &[]),
        ]));
        let versions = vec![
            version("images", "foo", "sha256:aaa", &[]),
            version("images", "bar", "sha256:bbb", &[]),
        ];

        let report = duplicate_scan(gateway(&registry), &WorkerPool::new(2), versions).await;

        assert!(report.is_success());
        let status_of = |id: &str| {
            report
                .succeeded
                .iter()
                .find(|r| r.id == id)
                .map(|r| r.status)
        };
        assert_eq!(status_of("images/foo@sha256:aaa"), Some(ItemStatus::Duplicate));
        assert_eq!(status_of("images/bar@sha256:bbb"), Some(ItemStatus::Unique));
        assert!(registry.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unmark_pass() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            version("images", "foo", "sha256:aaa", &["1.0", "ARCHIVED-aaa"]),
            version("images", "bar", "sha256:bbb", &["2.0"]),
        ]));

        let report = unmark_pass(gateway(&registry), &WorkerPool::new(2), "images", "ARCHIVED")
            .await
            .unwrap();

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].id, "images/foo@sha256:aaa");
        let removals: Vec<_> = registry
            .calls()
            .into_iter()
            .filter(|c| matches!(c, GatewayCall::RemoveTag { .. }))
            .collect();
        assert_eq!(removals.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_worklist() {
        let registry = InMemoryRegistry::with_versions([version("images", "foo", "sha256:aaa", &["1.0"])]);
        let worklist = Worklist::parse(
            "images/foo@sha256:aaa\nimages/gone@sha256:bbb\n",
            &["images".to_string()],
        )
        .unwrap();

        let versions = resolve_worklist(&registry, &worklist, "p", "l").await.unwrap();

        assert_eq!(versions.len(), 2);
        let foo = versions.iter().find(|v| v.name == "foo").unwrap();
        assert!(foo.tags.contains("1.0"));
        let gone = versions.iter().find(|v| v.name == "gone").unwrap();
        assert!(gone.tags.is_empty());
        assert_eq!(gone.project, "p");
    }

    #[tokio::test]
    async fn test_inventory_lists_both_states() {
        let registry = InMemoryRegistry::with_versions([
            version("images", "foo", "sha256:aaa", &[]),
            version("images-archive", "bar", "sha256:bbb", &[]),
        ]);
        let versions = inventory(&registry, &["images".to_string()]).await.unwrap();
        assert_eq!(versions.len(), 2);
    }
}
