//! Image Archive Runtime - archive state machines and batch drivers.
//!
//! This crate moves image versions between the active and archived
//! repositories: the per-version move state machine, the delete, duplicate
//! and unmark item operations, the bounded worker pool that applies them
//! across a worklist, and the registry gateway implementations.

pub mod delete;
pub mod gateway;
pub mod migrate;
pub mod passes;
pub mod pool;
pub mod report;
pub mod scan;
mod tags;

// Re-export common types
pub use delete::{delete_version, ArchiveCopyOutcome, DeleteOptions, DeleteOutcome};
pub use gateway::{
    ArtifactRegistryGateway, GatewayAuth, GatewayCall, GatewayOp, InMemoryRegistry, Injection,
};
pub use migrate::{MoveFailure, MoveOperation, MoveState};
pub use passes::{
    archive_pass, archive_repository, delete_pass, duplicate_scan, inventory, plan_archive,
    resolve_worklist, snapshot_repository, unarchive_pass, unmark_pass, ArchivePlan,
    RepositoryRun, RepositoryState,
};
pub use pool::{PoolRun, WorkItem, WorkerPool};
pub use report::{BatchReport, ItemReport, ItemStatus, PassKind};
pub use scan::{scan_version, unmark_version, ScanResult};

/// Image Archive Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
