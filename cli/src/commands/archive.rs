//! `image-archive archive` command.

use std::path::PathBuf;

use clap::Args;
use image_archive_runtime::{archive_repository, plan_archive, snapshot_repository};

use super::Context;
use crate::output;

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// File of `repository/name@sha256:<hex>` entries to keep archived
    #[arg(short, long)]
    pub worklist: PathBuf,

    /// Print the plan without moving anything
    #[arg(long)]
    pub dry_run: bool,
}

pub(crate) async fn execute(args: ArchiveArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let worklist = ctx.load_worklist(&args.worklist)?;

    // Every archived version missing from the worklist gets restored, so an
    // empty list would unarchive everything
    if worklist.is_empty() {
        return Err(format!(
            "worklist {} has no entries, refusing to unarchive every version",
            args.worklist.display()
        )
        .into());
    }

    let pool = ctx.pool();
    let mut reports = Vec::new();

    for repository in &ctx.config.repositories {
        let desired = worklist.ids_for_repository(repository);

        if args.dry_run {
            let state = snapshot_repository(ctx.gateway.as_ref(), repository).await?;
            let plan = plan_archive(&state.active, &state.archived, &desired);
            println!("{}\n", output::render_plan(repository, &plan));
            continue;
        }

        let run = archive_repository(ctx.gateway.clone(), &pool, repository, &desired).await?;
        let aborted = run.archive.fatal.is_some() || run.unarchive.fatal.is_some();
        reports.push(run.archive);
        reports.push(run.unarchive);
        if aborted {
            tracing::error!(repository = %repository, "Fatal error, skipping remaining repositories");
            break;
        }
    }

    super::finish(&reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{test_config, worklist_file};
    use image_archive_core::ImageVersion;
    use image_archive_runtime::InMemoryRegistry;
    use std::sync::Arc;

    fn foo(digest: &str, tags: &[&str]) -> ImageVersion {
        ImageVersion::new("p", "l", "images", "foo", digest).with_tags(tags.iter().copied())
    }

    fn context(registry: &Arc<InMemoryRegistry>) -> Context {
        Context::with_gateway(test_config(), registry.clone())
    }

    #[tokio::test]
    async fn test_archive_moves_listed_and_restores_others() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            foo("sha256:aaa", &["1.0"]),
            foo("sha256:bbb", &["2.0"]).to_archived(),
        ]));
        let file = worklist_file(&["images/foo@sha256:aaa"]);
        let args = ArchiveArgs {
            worklist: file.path().to_path_buf(),
            dry_run: false,
        };

        execute(args, &context(&registry)).await.unwrap();

        assert!(registry.contains("images-archive/foo@sha256:aaa"));
        assert!(!registry.contains("images/foo@sha256:aaa"));
        assert!(registry.contains("images/foo@sha256:bbb"));
        assert!(!registry.contains("images-archive/foo@sha256:bbb"));
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let registry = Arc::new(InMemoryRegistry::with_versions([foo("sha256:aaa", &["1.0"])]));
        let file = worklist_file(&["images/foo@sha256:aaa"]);
        let args = ArchiveArgs {
            worklist: file.path().to_path_buf(),
            dry_run: true,
        };

        execute(args, &context(&registry)).await.unwrap();

        assert!(registry.mutating_calls().is_empty());
        assert!(registry.contains("images/foo@sha256:aaa"));
    }

    #[tokio::test]
    async fn test_empty_worklist_is_rejected() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            foo("sha256:bbb", &["2.0"]).to_archived(),
        ]));
        let file = worklist_file(&["# nothing to archive"]);
        let args = ArchiveArgs {
            worklist: file.path().to_path_buf(),
            dry_run: false,
        };

        let err = execute(args, &context(&registry)).await.unwrap_err();

        assert!(err.to_string().contains("no entries"));
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_worklist_fails_before_any_call() {
        let registry = Arc::new(InMemoryRegistry::new());
        let file = worklist_file(&["images/foo@sha256:aaa", "not-an-id"]);
        let args = ArchiveArgs {
            worklist: file.path().to_path_buf(),
            dry_run: false,
        };

        let err = execute(args, &context(&registry)).await.unwrap_err();

        assert!(err.to_string().contains("Invalid image specified"));
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn test_passed_deadline_times_out_every_pass() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            foo("sha256:aaa", &["1.0"]),
            foo("sha256:bbb", &["2.0"]).to_archived(),
        ]));
        let mut ctx = context(&registry);
        ctx.deadline = Some(tokio::time::Instant::now());
        let file = worklist_file(&["images/foo@sha256:aaa"]);
        let args = ArchiveArgs {
            worklist: file.path().to_path_buf(),
            dry_run: false,
        };

        let err = execute(args, &ctx).await.unwrap_err();

        // One archive item and one unarchive item, neither dispatched
        assert_eq!(err.to_string(), "2 item(s) failed");
        assert!(registry.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_item_failure_sets_error() {
        let registry = Arc::new(InMemoryRegistry::with_versions([
            foo("sha256:aaa", &["1.0"]),
            // Tag "1.0" is already held by another version in the archive
            ImageVersion::new("p", "l", "images-archive", "foo", "sha256:ccc").with_tags(["1.0"]),
        ]));
        let file = worklist_file(&["images/foo@sha256:aaa", "images/foo@sha256:ccc"]);
        let args = ArchiveArgs {
            worklist: file.path().to_path_buf(),
            dry_run: false,
        };

        let err = execute(args, &context(&registry)).await.unwrap_err();

        assert_eq!(err.to_string(), "1 item(s) failed");
        assert!(registry.contains("images/foo@sha256:aaa"));
    }
}
