//! In-memory registry with recorded calls and failure injection.
//!
//! Mirrors the backend semantics the state machines depend on:
//! - tags are unique per image name within a repository,
//! - copies are made by digest and arrive untagged,
//! - tagged or protected versions cannot be deleted (FailedPrecondition),
//! - deleting or untagging something absent reports NotFound.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use image_archive_core::error::{ArchiveError, Result};
use image_archive_core::{ImageVersion, RegistryGateway};
use parking_lot::Mutex;

const REGISTRY: &str = "memory";

/// Gateway operation kinds, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    List,
    Exists,
    Copy,
    AddTag,
    RemoveTag,
    Delete,
}

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    List(String),
    Exists(String),
    Copy { source: String, destination: String },
    AddTag { version: String, tag: String },
    RemoveTag { version: String, tag: String },
    Delete(String),
}

impl GatewayCall {
    /// Whether the call changes registry state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, GatewayCall::List(_) | GatewayCall::Exists(_))
    }
}

/// Failure returned instead of performing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// Generic backend error
    Error(String),
    /// FailedPrecondition with the given message
    FailedPrecondition(String),
    /// NotFound
    NotFound,
    /// `version_exists` answers false (only meaningful for [`GatewayOp::Exists`])
    Absent,
}

#[derive(Default)]
struct State {
    /// repository → (version_id → version)
    repositories: BTreeMap<String, BTreeMap<String, ImageVersion>>,
    protected: HashSet<String>,
    /// (op, key) → injection. The key is the repository for `List`, the
    /// destination version id for `Copy` and the version id otherwise.
    injections: HashMap<(GatewayOp, String), Injection>,
    calls: Vec<GatewayCall>,
}

impl State {
    fn injected(&self, op: GatewayOp, key: &str) -> Option<Injection> {
        self.injections.get(&(op, key.to_string())).cloned()
    }

    fn contains(&self, version: &ImageVersion) -> bool {
        self.repositories
            .get(&version.repository)
            .is_some_and(|versions| versions.contains_key(&version.version_id()))
    }

    /// Version of the same image name in the same repository holding `tag`.
    fn tag_holder_mut(&mut self, version: &ImageVersion, tag: &str) -> Option<&mut ImageVersion> {
        self.repositories
            .get_mut(&version.repository)?
            .values_mut()
            .find(|v| v.name == version.name && v.tags.contains(tag))
    }
}

/// Simulated registry backend.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with `versions`.
    pub fn with_versions(versions: impl IntoIterator<Item = ImageVersion>) -> Self {
        let registry = Self::new();
        for version in versions {
            registry.insert(version);
        }
        registry
    }

    /// Insert or replace a version.
    pub fn insert(&self, version: ImageVersion) {
        let mut state = self.state.lock();
        state
            .repositories
            .entry(version.repository.clone())
            .or_default()
            .insert(version.version_id(), version);
    }

    /// Make deletes of `version_id` fail with FailedPrecondition, as a
    /// retention policy would.
    pub fn protect(&self, version_id: &str) {
        self.state.lock().protected.insert(version_id.to_string());
    }

    /// Fail every future `op` call on `key` with `injection`.
    pub fn inject(&self, op: GatewayOp, key: &str, injection: Injection) {
        self.state
            .lock()
            .injections
            .insert((op, key.to_string()), injection);
    }

    pub fn clear_injection(&self, op: GatewayOp, key: &str) {
        self.state.lock().injections.remove(&(op, key.to_string()));
    }

    /// Current copy of a version, if present.
    pub fn get(&self, version_id: &str) -> Option<ImageVersion> {
        let state = self.state.lock();
        state
            .repositories
            .values()
            .find_map(|versions| versions.get(version_id).cloned())
    }

    pub fn contains(&self, version_id: &str) -> bool {
        self.get(version_id).is_some()
    }

    /// All versions currently in `repository`.
    pub fn versions(&self, repository: &str) -> Vec<ImageVersion> {
        let state = self.state.lock();
        state
            .repositories
            .get(repository)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Calls recorded so far, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    /// Recorded calls that changed (or tried to change) registry state.
    pub fn mutating_calls(&self) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(GatewayCall::is_mutating)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

fn injected_error(injection: Injection, key: &str) -> Option<ArchiveError> {
    match injection {
        Injection::Error(message) => Some(ArchiveError::Registry {
            registry: REGISTRY.to_string(),
            message,
        }),
        Injection::FailedPrecondition(message) => Some(ArchiveError::FailedPrecondition(message)),
        Injection::NotFound => Some(ArchiveError::NotFound(key.to_string())),
        Injection::Absent => None,
    }
}

#[async_trait]
impl RegistryGateway for InMemoryRegistry {
    async fn list_versions(&self, repository: &str) -> Result<Vec<ImageVersion>> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::List(repository.to_string()));
        if let Some(err) = state
            .injected(GatewayOp::List, repository)
            .and_then(|i| injected_error(i, repository))
        {
            return Err(err);
        }

        Ok(state
            .repositories
            .get(repository)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn version_exists(&self, version: &ImageVersion) -> Result<bool> {
        let id = version.version_id();
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::Exists(id.clone()));
        match state.injected(GatewayOp::Exists, &id) {
            Some(Injection::Absent) => return Ok(false),
            Some(injection) => {
                if let Some(err) = injected_error(injection, &id) {
                    return Err(err);
                }
            }
            None => {}
        }
        Ok(state.contains(version))
    }

    async fn copy_version(&self, source: &ImageVersion, destination: &ImageVersion) -> Result<()> {
        let source_id = source.version_id();
        let destination_id = destination.version_id();
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::Copy {
            source: source_id.clone(),
            destination: destination_id.clone(),
        });
        if let Some(err) = state
            .injected(GatewayOp::Copy, &destination_id)
            .and_then(|i| injected_error(i, &destination_id))
        {
            return Err(err);
        }

        let Some(original) = state
            .repositories
            .get(&source.repository)
            .and_then(|versions| versions.get(&source_id))
            .cloned()
        else {
            return Err(ArchiveError::NotFound(source_id));
        };

        if source.digest != destination.digest {
            return Err(ArchiveError::Registry {
                registry: REGISTRY.to_string(),
                message: format!("digest mismatch: {source_id} -> {destination_id}"),
            });
        }

        let versions = state
            .repositories
            .entry(destination.repository.clone())
            .or_default();
        versions.entry(destination_id).or_insert_with(|| ImageVersion {
            project: destination.project.clone(),
            location: destination.location.clone(),
            repository: destination.repository.clone(),
            tags: Default::default(),
            ..original
        });
        Ok(())
    }

    async fn add_tag(&self, version: &ImageVersion, tag: &str) -> Result<()> {
        let id = version.version_id();
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::AddTag {
            version: id.clone(),
            tag: tag.to_string(),
        });
        if let Some(err) = state
            .injected(GatewayOp::AddTag, &id)
            .and_then(|i| injected_error(i, &id))
        {
            return Err(err);
        }

        if !state.contains(version) {
            return Err(ArchiveError::NotFound(id));
        }
        if state.tag_holder_mut(version, tag).is_some() {
            return Err(ArchiveError::AlreadyExists(format!("{}:{tag}", version.short_path())));
        }
        if let Some(stored) = state
            .repositories
            .get_mut(&version.repository)
            .and_then(|versions| versions.get_mut(&id))
        {
            stored.tags.insert(tag.to_string());
        }
        Ok(())
    }

    async fn remove_tag(&self, version: &ImageVersion, tag: &str) -> Result<()> {
        let id = version.version_id();
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::RemoveTag {
            version: id.clone(),
            tag: tag.to_string(),
        });
        if let Some(err) = state
            .injected(GatewayOp::RemoveTag, &id)
            .and_then(|i| injected_error(i, &id))
        {
            return Err(err);
        }

        // Tags are addressed per image name, not per version
        match state.tag_holder_mut(version, tag) {
            Some(holder) => {
                holder.tags.remove(tag);
                Ok(())
            }
            None => Err(ArchiveError::NotFound(format!("{}:{tag}", version.short_path()))),
        }
    }

    async fn delete_version(&self, version: &ImageVersion) -> Result<()> {
        let id = version.version_id();
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::Delete(id.clone()));
        if let Some(err) = state
            .injected(GatewayOp::Delete, &id)
            .and_then(|i| injected_error(i, &id))
        {
            return Err(err);
        }

        let Some(stored) = state
            .repositories
            .get(&version.repository)
            .and_then(|versions| versions.get(&id))
        else {
            return Err(ArchiveError::NotFound(id));
        };

        if state.protected.contains(&id) {
            return Err(ArchiveError::FailedPrecondition(format!(
                "{id} is protected by a retention policy"
            )));
        }
        if !stored.tags.is_empty() {
            return Err(ArchiveError::FailedPrecondition(format!("{id} is tagged")));
        }

        if let Some(versions) = state.repositories.get_mut(&version.repository) {
            versions.remove(&id);
        }
        Ok(())
    }
}
