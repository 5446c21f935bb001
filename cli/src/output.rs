//! Table formatting helpers for CLI output.

use comfy_table::{CellAlignment, ContentArrangement, Table};
use image_archive_runtime::{ArchivePlan, BatchReport};

/// Columns rendered right-aligned by [`new_table`].
const NUMERIC_COLUMNS: &[&str] = &["SIZE", "ENTRIES"];

/// Borderless table with numeric columns right-aligned.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().copied());
    for (index, header) in headers.iter().enumerate() {
        if !NUMERIC_COLUMNS.contains(header) {
            continue;
        }
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    table
}

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Image size in binary units, one decimal above bytes.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < SIZE_UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", SIZE_UNITS[unit])
    }
}

/// Largest-first spans for [`format_ago`], in seconds.
const AGE_SPANS: [(i64, &str); 5] = [
    (365 * 86_400, "y"),
    (30 * 86_400, "mo"),
    (86_400, "d"),
    (3_600, "h"),
    (60, "m"),
];

/// Compact upload age such as `3h ago`. Future timestamps read `just now`.
pub fn format_ago(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let secs = chrono::Utc::now().signed_duration_since(*dt).num_seconds();
    if secs < 1 {
        return "just now".to_string();
    }
    AGE_SPANS
        .iter()
        .find(|(span, _)| secs >= *span)
        .map(|(span, suffix)| format!("{}{suffix} ago", secs / span))
        .unwrap_or_else(|| format!("{secs}s ago"))
}

/// Shorten `sha256:<hex>` to the first 12 hex characters.
pub fn short_digest(digest: &str) -> String {
    match digest.strip_prefix("sha256:") {
        Some(hex) => format!("sha256:{}", &hex[..hex.len().min(12)]),
        None => digest.to_string(),
    }
}

/// Summary line of a report, e.g. `archive: 3 succeeded, 1 failed`.
pub fn report_summary(report: &BatchReport) -> String {
    format!(
        "{}: {} succeeded, {} failed",
        report.pass,
        report.succeeded.len(),
        report.failed.len()
    )
}

/// Render both collections of a report.
pub fn render_report(report: &BatchReport) -> String {
    let mut out = report_summary(report);

    if !report.succeeded.is_empty() {
        let mut table = new_table(&["VERSION", "STATUS", "MESSAGE"]);
        for item in &report.succeeded {
            table.add_row(vec![item.id.clone(), item.status.to_string(), item.message.clone()]);
        }
        out.push_str(&format!("\n\nSucceeded:\n{table}"));
    }

    if !report.failed.is_empty() {
        let mut table = new_table(&["VERSION", "STATUS", "RETRYABLE", "MESSAGE"]);
        for item in &report.failed {
            table.add_row(vec![
                item.id.clone(),
                item.status.to_string(),
                if item.retryable { "yes" } else { "no" }.to_string(),
                item.message.clone(),
            ]);
        }
        out.push_str(&format!("\n\nFailed:\n{table}"));
    }

    if let Some(fatal) = &report.fatal {
        out.push_str(&format!("\n\nRun aborted: {fatal}"));
    }
    out
}

/// Render a plan without executing it.
pub fn render_plan(repository: &str, plan: &ArchivePlan) -> String {
    let mut table = new_table(&["ACTION", "VERSION", "TAGS"]);
    for (action, versions) in [("archive", &plan.to_archive), ("unarchive", &plan.to_unarchive)] {
        for version in versions {
            let tags: Vec<&str> = version.tags.iter().map(String::as_str).collect();
            table.add_row(vec![action.to_string(), version.version_id(), tags.join(",")]);
        }
    }
    format!(
        "{repository}: {} to archive, {} to unarchive\n{table}",
        plan.to_archive.len(),
        plan.to_unarchive.len()
    )
}
