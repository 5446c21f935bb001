//! `image-archive delete` command.

use std::path::PathBuf;

use clap::Args;
use image_archive_core::version::archived_repository_name;
use image_archive_core::Worklist;
use image_archive_runtime::{delete_pass, resolve_worklist, DeleteOptions};

use super::Context;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// File of `repository/name@sha256:<hex>` entries to delete
    #[arg(short, long)]
    pub worklist: PathBuf,

    /// Actually delete; without this flag the run is a dry run
    #[arg(long)]
    pub execute: bool,

    /// Keep the archived copy when deleting an active version is blocked
    #[arg(long)]
    pub no_reconcile: bool,
}

pub(crate) async fn execute(args: DeleteArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    // Entries may name either state of a configured repository
    let mut supported = ctx.config.repositories.clone();
    supported.extend(ctx.config.repositories.iter().map(|r| archived_repository_name(r)));
    let worklist = Worklist::load(&args.worklist, &supported)?;

    let versions = resolve_worklist(
        ctx.gateway.as_ref(),
        &worklist,
        &ctx.config.project,
        &ctx.config.location,
    )
    .await?;

    let options = DeleteOptions {
        dry_run: !args.execute,
        marker_prefix: ctx.config.marker_prefix.clone(),
        reconcile_archive_copy: ctx.config.reconcile_archive_copy && !args.no_reconcile,
    };
    if options.dry_run {
        println!("DRY RUN: pass --execute to delete\n");
    }

    let report = delete_pass(ctx.gateway.clone(), &ctx.pool(), versions, options).await;
    super::finish(&[report])
}
