//! Image Archive Core - Foundational Types and Abstractions
//!
//! This crate provides the version identity model, repository snapshots,
//! worklist validation and the registry gateway seam shared by the
//! runtime and the CLI.

pub mod config;
pub mod error;
pub mod gateway;
pub mod repository;
pub mod version;
pub mod worklist;

// Re-export commonly used types
pub use config::{ArchiveConfig, LogConfig, LogFormat, LogLevel, RegistryConfig};
pub use error::{ArchiveError, Result};
pub use gateway::RegistryGateway;
pub use repository::Repository;
pub use version::{ImageVersion, VersionStatus, ARCHIVE_SUFFIX};
pub use worklist::{VersionId, Worklist};

/// Image Archive version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
