//! Move state machine.
//!
//! A move relocates one version between the active and archived repository
//! states using only non-transactional registry primitives:
//!
//! ```text
//! Pending → Copied → Tagged → Verified → SourceDeleted
//!    │         │        │         │
//!    └─────────┴────────┴─────────┴──→ Failed(reason)
//!                                 │
//!                                 └──→ DeleteFailed ─┬─→ CompensatedDelete
//!                                                    ├─→ CompensationSkipped
//!                                                    └─→ CompensationFailed
//! ```
//!
//! Every terminal state leaves at least one of {source, destination}
//! reachable by digest. The source is only deleted after the destination has
//! been verified, and the destination is only deleted when this operation
//! created it and the source has just been seen alive.

use std::sync::Arc;

use image_archive_core::error::{ArchiveError, Result};
use image_archive_core::{ImageVersion, RegistryGateway, Repository};

use crate::tags::{self, DeleteResult};

/// Why a move stopped before touching the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveFailure {
    /// Destination tags already attached to another digest of the same name
    ConflictingTags(Vec<String>),
    CopyFailed(String),
    TagFailed(String),
    VerificationFailed(String),
}

/// State of a [`MoveOperation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveState {
    Pending,
    /// Destination present; `created` is false when the copy was skipped
    Copied { created: bool },
    Tagged,
    Verified,
    /// Terminal success
    SourceDeleted,
    /// Terminal failure, source untouched
    Failed(MoveFailure),
    /// Deleting the source failed. Terminal unless `precondition` is set, in
    /// which case compensation follows.
    DeleteFailed { message: String, precondition: bool },
    /// Terminal failure, the destination copy created by this move was removed
    CompensatedDelete { message: String },
    /// Terminal failure, both copies left in place
    CompensationSkipped { message: String },
    /// Terminal failure, removing the destination copy failed too
    CompensationFailed {
        message: String,
        compensation_error: String,
    },
}

impl MoveState {
    pub fn is_terminal(&self) -> bool {
        match self {
            MoveState::Pending
            | MoveState::Copied { .. }
            | MoveState::Tagged
            | MoveState::Verified => false,
            MoveState::DeleteFailed { precondition, .. } => !precondition,
            _ => true,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MoveState::SourceDeleted)
    }

    /// Short state name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            MoveState::Pending => "pending",
            MoveState::Copied { .. } => "copied",
            MoveState::Tagged => "tagged",
            MoveState::Verified => "verified",
            MoveState::SourceDeleted => "source-deleted",
            MoveState::Failed(_) => "failed",
            MoveState::DeleteFailed { .. } => "delete-failed",
            MoveState::CompensatedDelete { .. } => "compensated-delete",
            MoveState::CompensationSkipped { .. } => "compensation-skipped",
            MoveState::CompensationFailed { .. } => "compensation-failed",
        }
    }
}

/// One version moving from its current state to the opposite one.
#[derive(Debug, Clone)]
pub struct MoveOperation {
    source: ImageVersion,
    destination: ImageVersion,
    /// Listing of the destination repository taken before the pass started
    snapshot: Arc<Repository>,
    state: MoveState,
    history: Vec<MoveState>,
    copy_created: bool,
    /// Tags this operation attached to the destination
    attached_tags: Vec<String>,
}

impl MoveOperation {
    /// Move `source` into its counterpart repository.
    pub fn new(source: ImageVersion, snapshot: Arc<Repository>) -> Self {
        let destination = source.counterpart();
        Self::with_destination(source, destination, snapshot)
    }

    /// Move `source` to an explicit destination.
    pub fn with_destination(
        source: ImageVersion,
        destination: ImageVersion,
        snapshot: Arc<Repository>,
    ) -> Self {
        Self {
            source,
            destination,
            snapshot,
            state: MoveState::Pending,
            history: vec![MoveState::Pending],
            copy_created: false,
            attached_tags: Vec::new(),
        }
    }

    pub fn source(&self) -> &ImageVersion {
        &self.source
    }

    pub fn destination(&self) -> &ImageVersion {
        &self.destination
    }

    pub fn state(&self) -> &MoveState {
        &self.state
    }

    /// Every state entered, starting with `Pending`.
    pub fn history(&self) -> &[MoveState] {
        &self.history
    }

    /// Whether this operation created the destination copy.
    pub fn copy_created(&self) -> bool {
        self.copy_created
    }

    /// Tags attached to the destination by this operation.
    pub fn attached_tags(&self) -> &[String] {
        &self.attached_tags
    }

    fn transition(&mut self, state: MoveState) {
        tracing::debug!(
            version = %self.source,
            from = self.state.name(),
            to = state.name(),
            "Move state transition"
        );
        self.history.push(state.clone());
        self.state = state;
    }

    fn fail(&mut self, failure: MoveFailure) -> Result<Self> {
        tracing::warn!(version = %self.source, failure = ?failure, "Move failed");
        self.transition(MoveState::Failed(failure));
        Ok(self.clone())
    }

    /// Drive the operation to a terminal state.
    ///
    /// Item-level failures are recorded in the returned operation's state.
    /// `Err` is only returned for an invariant violation, which must stop
    /// the whole run.
    pub async fn run(mut self, gateway: &dyn RegistryGateway) -> Result<Self> {
        tracing::info!(
            source = %self.source,
            destination = %self.destination,
            "Moving version"
        );

        // Conflict check, before any gateway call
        let conflicts = self.snapshot.find_conflicting_tags(&self.destination);
        if !conflicts.is_empty() {
            return self.fail(MoveFailure::ConflictingTags(conflicts));
        }

        // Copy if absent
        if self.snapshot.includes_version(&self.destination) {
            tracing::debug!(destination = %self.destination, "Destination exists, skipping copy");
        } else {
            if let Err(e) = gateway.copy_version(&self.source, &self.destination).await {
                return self.fail(MoveFailure::CopyFailed(e.to_string()));
            }
            self.copy_created = true;
        }
        self.transition(MoveState::Copied {
            created: self.copy_created,
        });

        // Tag
        match tags::add_tags(gateway, &self.destination, &self.destination.tags).await {
            Ok(attached) => self.attached_tags = attached,
            Err(e) => return self.fail(MoveFailure::TagFailed(e.to_string())),
        }
        self.transition(MoveState::Tagged);

        // Verify
        match gateway.version_exists(&self.destination).await {
            Ok(true) => self.transition(MoveState::Verified),
            Ok(false) => {
                return self.fail(MoveFailure::VerificationFailed(format!(
                    "{} not found after copy",
                    self.destination
                )))
            }
            Err(e) => return self.fail(MoveFailure::VerificationFailed(e.to_string())),
        }

        // Delete source
        let source_tags: Vec<String> = self.source.tags.iter().cloned().collect();
        let attempt = tags::untag_and_delete(gateway, &self.source, &source_tags).await;
        match attempt.result {
            DeleteResult::Deleted | DeleteResult::AlreadyAbsent => {
                self.transition(MoveState::SourceDeleted);
                tracing::info!(source = %self.source, destination = %self.destination, "Version moved");
            }
            DeleteResult::Blocked(message) => {
                tags::restore_tags(gateway, &self.source, &attempt.stripped).await;
                tracing::warn!(source = %self.source, message = %message, "Source delete blocked");
                self.transition(MoveState::DeleteFailed {
                    message: message.clone(),
                    precondition: true,
                });
                self.compensate(gateway, message).await?;
            }
            DeleteResult::Failed(message) => {
                tags::restore_tags(gateway, &self.source, &attempt.stripped).await;
                tracing::warn!(source = %self.source, message = %message, "Source delete failed");
                self.transition(MoveState::DeleteFailed {
                    message,
                    precondition: false,
                });
            }
        }

        Ok(self)
    }

    /// Undo the copy after the source delete was blocked.
    async fn compensate(&mut self, gateway: &dyn RegistryGateway, message: String) -> Result<()> {
        if !self.copy_created {
            // The destination predates this move and may be relied upon
            self.transition(MoveState::CompensationSkipped { message });
            return Ok(());
        }

        match gateway.version_exists(&self.source).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(
                    source = %self.source,
                    destination = %self.destination,
                    "Source vanished during compensation, keeping destination"
                );
                return Err(ArchiveError::Invariant(format!(
                    "source {} vanished after a blocked delete; destination {} kept",
                    self.source, self.destination
                )));
            }
            Err(e) => {
                self.transition(MoveState::CompensationSkipped {
                    message: format!("{}; source check failed: {}", message, e),
                });
                return Ok(());
            }
        }

        // A tag that already existed may belong to another digest of the same
        // image, so only tags attached by this move are stripped
        let attached = self.attached_tags.clone();
        let attempt = tags::untag_and_delete(gateway, &self.destination, &attached).await;
        match attempt.result {
            DeleteResult::Deleted | DeleteResult::AlreadyAbsent => {
                tracing::info!(destination = %self.destination, "Compensated: destination copy removed");
                self.transition(MoveState::CompensatedDelete { message });
            }
            DeleteResult::Blocked(error) | DeleteResult::Failed(error) => {
                tags::restore_tags(gateway, &self.destination, &attempt.stripped).await;
                tracing::warn!(
                    destination = %self.destination,
                    error = %error,
                    "Compensation failed, both copies kept"
                );
                self.transition(MoveState::CompensationFailed {
                    message,
                    compensation_error: error,
                });
            }
        }
        Ok(())
    }

    /// The failure of a finished operation, in terms of the error taxonomy.
    pub fn error(&self) -> Option<ArchiveError> {
        let source = self.source.version_id();
        let destination = self.destination.version_id();
        match &self.state {
            MoveState::Failed(MoveFailure::ConflictingTags(tags)) => {
                Some(ArchiveError::ConflictingTags {
                    version: destination,
                    tags: tags.clone(),
                })
            }
            MoveState::Failed(MoveFailure::CopyFailed(message)) => Some(ArchiveError::CopyFailed {
                source_version: source,
                destination,
                message: message.clone(),
            }),
            MoveState::Failed(MoveFailure::TagFailed(message)) => Some(ArchiveError::TagFailed {
                version: destination,
                message: message.clone(),
            }),
            MoveState::Failed(MoveFailure::VerificationFailed(_)) => {
                Some(ArchiveError::VerificationFailed {
                    version: destination,
                })
            }
            MoveState::DeleteFailed {
                message,
                precondition: false,
            } => Some(ArchiveError::DeleteFailed {
                version: source,
                message: message.clone(),
            }),
            MoveState::DeleteFailed { message, .. }
            | MoveState::CompensatedDelete { message }
            | MoveState::CompensationSkipped { message }
            | MoveState::CompensationFailed { message, .. } => {
                Some(ArchiveError::DeleteFailedPrecondition {
                    version: source,
                    message: message.clone(),
                })
            }
            MoveState::Pending
            | MoveState::Copied { .. }
            | MoveState::Tagged
            | MoveState::Verified
            | MoveState::SourceDeleted => None,
        }
    }
}
