//! Read-only snapshot of one repository state.
//!
//! Built once from a listing and never mutated afterwards. Lookups are
//! keyed by state-qualified version id, and tags are indexed per image name
//! so colliding tags can be found before any copy is attempted.

use std::collections::HashMap;

use crate::version::ImageVersion;

/// In-memory index over the versions of one repository state.
#[derive(Debug, Clone, Default)]
pub struct Repository {
    /// Member versions, in listing order
    versions: Vec<ImageVersion>,
    /// version_id → index into `versions`
    by_id: HashMap<String, usize>,
    /// image name → (tag → digest)
    tags_by_name: HashMap<String, HashMap<String, String>>,
}

impl Repository {
    /// Build a snapshot from listed versions.
    ///
    /// A version id listed twice keeps the last entry.
    pub fn new(versions: Vec<ImageVersion>) -> Self {
        let mut snapshot = Self::default();
        for version in versions {
            snapshot.insert(version);
        }
        snapshot
    }

    fn insert(&mut self, version: ImageVersion) {
        let id = version.version_id();
        let tags = self.tags_by_name.entry(version.name.clone()).or_default();

        for tag in &version.tags {
            if let Some(existing) = tags.get(tag) {
                if existing != &version.digest {
                    tracing::warn!(
                        name = %version.name,
                        tag = %tag,
                        digest = %version.digest,
                        other_digest = %existing,
                        "Tag listed on more than one digest"
                    );
                }
            }
            tags.insert(tag.clone(), version.digest.clone());
        }

        match self.by_id.get(&id) {
            Some(&index) => {
                tracing::warn!(version = %id, "Duplicate version in listing, keeping last");
                self.versions[index] = version;
            }
            None => {
                self.by_id.insert(id, self.versions.len());
                self.versions.push(version);
            }
        }
    }

    /// Whether the snapshot contains this exact version id.
    pub fn includes_version(&self, version: &ImageVersion) -> bool {
        self.by_id.contains_key(&version.version_id())
    }

    /// Look up a version by its state-qualified id.
    pub fn get(&self, version_id: &str) -> Option<&ImageVersion> {
        self.by_id.get(version_id).map(|&index| &self.versions[index])
    }

    /// Tags of `version` that are already attached to a different digest of
    /// the same image name in this repository. Sorted.
    pub fn find_conflicting_tags(&self, version: &ImageVersion) -> Vec<String> {
        let Some(tags) = self.tags_by_name.get(&version.name) else {
            return Vec::new();
        };

        // `version.tags` is a BTreeSet, so the result comes out sorted
        version
            .tags
            .iter()
            .filter(|tag| {
                tags.get(*tag)
                    .is_some_and(|digest| digest != &version.digest)
            })
            .cloned()
            .collect()
    }

    /// All member versions, in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageVersion> {
        self.versions.iter()
    }

    /// Consume the snapshot, returning its versions.
    pub fn into_versions(self) -> Vec<ImageVersion> {
        self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl FromIterator<ImageVersion> for Repository {
    fn from_iter<T: IntoIterator<Item = ImageVersion>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
