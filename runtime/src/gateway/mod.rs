//! Registry gateway implementations.

mod artifact_registry;
mod auth;
pub mod memory;

pub use artifact_registry::ArtifactRegistryGateway;
pub use auth::GatewayAuth;
pub use memory::{GatewayCall, GatewayOp, InMemoryRegistry, Injection};
