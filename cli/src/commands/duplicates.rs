//! `image-archive duplicates` command.

use std::path::PathBuf;

use clap::Args;
use image_archive_core::version::archived_repository_name;
use image_archive_core::Worklist;
use image_archive_runtime::{duplicate_scan, inventory, resolve_worklist};

use super::Context;

#[derive(Args, Debug)]
pub struct DuplicatesArgs {
    /// Repository to scan, both states (default: every configured repository)
    #[arg(short, long)]
    pub repository: Vec<String>,

    /// Scan only the versions named in this file
    #[arg(short, long, conflicts_with = "repository")]
    pub worklist: Option<PathBuf>,
}

pub(crate) async fn execute(args: DuplicatesArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let versions = match &args.worklist {
        Some(path) => {
            let mut supported = ctx.config.repositories.clone();
            supported.extend(ctx.config.repositories.iter().map(|r| archived_repository_name(r)));
            let worklist = Worklist::load(path, &supported)?;
            resolve_worklist(
                ctx.gateway.as_ref(),
                &worklist,
                &ctx.config.project,
                &ctx.config.location,
            )
            .await?
        }
        None => {
            let repositories = ctx.repositories_or_configured(&args.repository);
            inventory(ctx.gateway.as_ref(), &repositories).await?
        }
    };

    let report = duplicate_scan(ctx.gateway.clone(), &ctx.pool(), versions).await;
    super::finish(&[report])
}
