//! Per-item outcomes aggregated into success and failure collections.

use image_archive_core::error::ArchiveError;
use serde::{Deserialize, Serialize};

use crate::pool::PoolRun;

/// Outcome class of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    // Success
    Archived,
    Unarchived,
    Deleted,
    AlreadyAbsent,
    DryRun,
    Duplicate,
    Unique,
    Unmarked,

    // Failure
    Missing,
    ConflictingTags,
    CopyFailed,
    TagFailed,
    VerificationFailed,
    DeleteFailed,
    PreconditionFailed,
    CompensatedDelete,
    CompensationSkipped,
    CompensationFailed,
    Failed,
    TimedOut,
    Aborted,
}

impl ItemStatus {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ItemStatus::Archived
                | ItemStatus::Unarchived
                | ItemStatus::Deleted
                | ItemStatus::AlreadyAbsent
                | ItemStatus::DryRun
                | ItemStatus::Duplicate
                | ItemStatus::Unique
                | ItemStatus::Unmarked
        )
    }

    /// Status for an error that escaped an item operation.
    pub fn for_error(error: &ArchiveError) -> Self {
        match error {
            ArchiveError::ConflictingTags { .. } => ItemStatus::ConflictingTags,
            ArchiveError::CopyFailed { .. } => ItemStatus::CopyFailed,
            ArchiveError::TagFailed { .. } => ItemStatus::TagFailed,
            ArchiveError::VerificationFailed { .. } => ItemStatus::VerificationFailed,
            ArchiveError::DeleteFailedPrecondition { .. } => ItemStatus::PreconditionFailed,
            ArchiveError::DeleteFailed { .. } => ItemStatus::DeleteFailed,
            ArchiveError::Timeout(_) => ItemStatus::TimedOut,
            _ => ItemStatus::Failed,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Archived => "archived",
            ItemStatus::Unarchived => "unarchived",
            ItemStatus::Deleted => "deleted",
            ItemStatus::AlreadyAbsent => "already-absent",
            ItemStatus::DryRun => "dry-run",
            ItemStatus::Duplicate => "duplicate",
            ItemStatus::Unique => "unique",
            ItemStatus::Unmarked => "unmarked",
            ItemStatus::Missing => "missing",
            ItemStatus::ConflictingTags => "conflicting-tags",
            ItemStatus::CopyFailed => "copy-failed",
            ItemStatus::TagFailed => "tag-failed",
            ItemStatus::VerificationFailed => "verification-failed",
            ItemStatus::DeleteFailed => "delete-failed",
            ItemStatus::PreconditionFailed => "precondition-failed",
            ItemStatus::CompensatedDelete => "compensated-delete",
            ItemStatus::CompensationSkipped => "compensation-skipped",
            ItemStatus::CompensationFailed => "compensation-failed",
            ItemStatus::Failed => "failed",
            ItemStatus::TimedOut => "timed-out",
            ItemStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Result row for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    /// Version id the item acted on
    pub id: String,
    pub status: ItemStatus,
    pub message: String,
    /// Whether retrying the item later may succeed
    pub retryable: bool,
}

impl ItemReport {
    pub fn new(id: impl Into<String>, status: ItemStatus, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Failure row for an item whose operation returned an error.
    pub fn from_error(id: impl Into<String>, error: &ArchiveError) -> Self {
        Self::new(id, ItemStatus::for_error(error), error.to_string()).retryable(error.is_retryable())
    }
}

/// Which batch pass produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassKind {
    Archive,
    Unarchive,
    Delete,
    DuplicateScan,
    Unmark,
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassKind::Archive => write!(f, "archive"),
            PassKind::Unarchive => write!(f, "unarchive"),
            PassKind::Delete => write!(f, "delete"),
            PassKind::DuplicateScan => write!(f, "duplicate-scan"),
            PassKind::Unmark => write!(f, "unmark"),
        }
    }
}

/// Success and failure collections of one pass, each in completion order.
#[derive(Debug)]
pub struct BatchReport {
    pub pass: PassKind,
    pub succeeded: Vec<ItemReport>,
    pub failed: Vec<ItemReport>,
    /// First run-aborting error, if any
    pub fatal: Option<ArchiveError>,
}

impl BatchReport {
    pub fn new(pass: PassKind) -> Self {
        Self {
            pass,
            succeeded: Vec::new(),
            failed: Vec::new(),
            fatal: None,
        }
    }

    /// Classify every item of a pool run.
    ///
    /// Items that were never dispatched are reported as `timed-out` or
    /// `aborted` failures, after the completed ones.
    pub fn from_run<T>(
        pass: PassKind,
        run: PoolRun<T>,
        classify: impl Fn(&str, T) -> ItemReport,
    ) -> Self {
        let mut report = Self::new(pass);

        for (id, outcome) in run.completed {
            match outcome {
                Ok(value) => report.record(classify(&id, value)),
                Err(e) => {
                    report.record(ItemReport::from_error(&id, &e));
                    if e.is_fatal() && report.fatal.is_none() {
                        report.fatal = Some(e);
                    }
                }
            }
        }
        for id in run.timed_out {
            report.record(
                ItemReport::new(id, ItemStatus::TimedOut, "batch timeout reached before dispatch")
                    .retryable(true),
            );
        }
        for id in run.aborted {
            report.record(
                ItemReport::new(id, ItemStatus::Aborted, "run aborted by a fatal error")
                    .retryable(true),
            );
        }
        report
    }

    /// Append a row to the collection its status belongs to.
    pub fn record(&mut self, item: ItemReport) {
        if item.status.is_success() {
            self.succeeded.push(item);
        } else {
            self.failed.push(item);
        }
    }

    /// No failed item and no fatal error.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.fatal.is_none()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Append the rows of `other`; the first fatal error wins.
    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        if self.fatal.is_none() {
            self.fatal = other.fatal;
        }
    }
}
