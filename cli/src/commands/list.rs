//! `image-archive list` command.

use clap::Args;
use image_archive_core::ImageVersion;
use image_archive_runtime::inventory;
use serde::Serialize;

use super::Context;
use crate::output;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Repository to list, both states (default: every configured repository)
    #[arg(short, long)]
    pub repository: Vec<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// One listed version.
#[derive(Debug, Serialize)]
struct VersionRow {
    id: String,
    status: String,
    active_id: String,
    full_path: String,
    tags: Vec<String>,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploaded: Option<chrono::DateTime<chrono::Utc>>,
}

impl VersionRow {
    fn from_version(version: &ImageVersion) -> Self {
        Self {
            id: version.version_id(),
            status: version.status().to_string(),
            active_id: version.active_version_id(),
            full_path: version.full_path(),
            tags: version.tags.iter().cloned().collect(),
            size_bytes: version.size_bytes,
            uploaded: version.upload_time,
        }
    }
}

pub(crate) async fn execute(args: ListArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let repositories = ctx.repositories_or_configured(&args.repository);
    let versions = inventory(ctx.gateway.as_ref(), &repositories).await?;
    let rows: Vec<VersionRow> = versions.iter().map(VersionRow::from_version).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{}", render_rows(&versions));
    Ok(())
}

fn render_rows(versions: &[ImageVersion]) -> String {
    let mut table = output::new_table(&["REPOSITORY", "IMAGE", "DIGEST", "STATUS", "TAGS", "SIZE", "UPLOADED"]);
    for version in versions {
        let tags: Vec<&str> = version.tags.iter().map(String::as_str).collect();
        let uploaded = version
            .upload_time
            .as_ref()
            .map(output::format_ago)
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            version.repository.clone(),
            version.name.clone(),
            output::short_digest(&version.digest),
            version.status().to_string(),
            tags.join(","),
            output::format_bytes(version.size_bytes),
            uploaded,
        ]);
    }
    table.to_string()
}
