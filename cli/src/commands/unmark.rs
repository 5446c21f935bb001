//! `image-archive unmark` command.

use clap::Args;
use image_archive_runtime::unmark_pass;

use super::Context;

#[derive(Args, Debug)]
pub struct UnmarkArgs {
    /// Repository to clean (default: every configured repository)
    #[arg(short, long)]
    pub repository: Vec<String>,
}

pub(crate) async fn execute(args: UnmarkArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let pool = ctx.pool();
    let mut reports = Vec::new();

    for repository in ctx.repositories_or_configured(&args.repository) {
        let report = unmark_pass(
            ctx.gateway.clone(),
            &pool,
            &repository,
            &ctx.config.marker_prefix,
        )
        .await?;
        reports.push(report);
    }

    super::finish(&reports)
}
