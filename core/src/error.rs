use thiserror::Error;

/// Image archive error types
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Malformed worklist entry or unsupported repository
    #[error("Validation error: {0}")]
    Validation(String),

    /// Destination already carries a colliding tag
    #[error("Conflicting tags for {version}: {}", tags.join(","))]
    ConflictingTags { version: String, tags: Vec<String> },

    /// Copy to the destination repository failed; nothing was created
    #[error("Copy failed: {source_version} -> {destination}: {message}")]
    CopyFailed {
        source_version: String,
        destination: String,
        message: String,
    },

    /// Tagging the destination version failed
    #[error("Tagging failed for {version}: {message}")]
    TagFailed { version: String, message: String },

    /// Destination not visible after the copy
    #[error("Verification failed: {version} does not exist after copy")]
    VerificationFailed { version: String },

    /// Delete was blocked by the backend (tagged, referenced or retained)
    #[error("Delete blocked by precondition for {version}: {message}")]
    DeleteFailedPrecondition { version: String, message: String },

    /// Delete failed for another reason (retryable)
    #[error("Delete failed for {version}: {message}")]
    DeleteFailed { version: String, message: String },

    /// Backend reported that the resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend reported that the resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Backend refused the call because a precondition was not met
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Any other registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// A safety invariant was violated; the run must stop
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ArchiveError {
    /// Errors that abort the whole run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArchiveError::Validation(_) | ArchiveError::Invariant(_) | ArchiveError::Config(_)
        )
    }

    /// Errors that may succeed when the same item is retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiveError::CopyFailed { .. }
                | ArchiveError::TagFailed { .. }
                | ArchiveError::DeleteFailedPrecondition { .. }
                | ArchiveError::DeleteFailed { .. }
                | ArchiveError::Registry { .. }
                | ArchiveError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ArchiveError {
    fn from(err: serde_yaml::Error) -> Self {
        ArchiveError::Serialization(err.to_string())
    }
}

/// Result type alias for image archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;
