//! Named set of mounted archives
//!
//! The registry is owned by the caller; mounting the same file in two
//! registries opens it twice. Archives are shared behind [`Arc`] so lookups
//! never hold the lock while extracting.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{ExtractError, RegistryError, RegistryResult};
use crate::reader::ResourceArchive;

/// Archives addressed by name
#[derive(Debug, Default)]
pub struct ArchiveRegistry {
    archives: RwLock<BTreeMap<String, Arc<ResourceArchive>>>,
}

impl ArchiveRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the archive at `path` and mount it as `name`
    pub fn mount(
        &self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> RegistryResult<Arc<ResourceArchive>> {
        let name = name.into();
        if self.archives.read().contains_key(&name) {
            return Err(RegistryError::AlreadyMounted(name));
        }
        let archive = ResourceArchive::open(path)?;
        self.insert(name, archive)
    }

    /// Mount an already opened archive
    pub fn insert(
        &self,
        name: impl Into<String>,
        archive: ResourceArchive,
    ) -> RegistryResult<Arc<ResourceArchive>> {
        let name = name.into();
        let mut archives = self.archives.write();
        if archives.contains_key(&name) {
            return Err(RegistryError::AlreadyMounted(name));
        }

        info!(
            "Mounted '{}' as '{name}' ({} entries)",
            archive.path().display(),
            archive.len()
        );
        let archive = Arc::new(archive);
        archives.insert(name, Arc::clone(&archive));
        Ok(archive)
    }

    /// Remove an archive, returning it
    pub fn unmount(&self, name: &str) -> RegistryResult<Arc<ResourceArchive>> {
        let archive = self
            .archives
            .write()
            .remove(name)
            .ok_or_else(|| RegistryError::NotMounted(name.to_string()))?;
        debug!("Unmounted '{name}'");
        Ok(archive)
    }

    /// Archive mounted as `name`
    pub fn get(&self, name: &str) -> Option<Arc<ResourceArchive>> {
        self.archives.read().get(name).cloned()
    }

    /// Mounted names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.archives.read().keys().cloned().collect()
    }

    /// Number of mounted archives
    pub fn len(&self) -> usize {
        self.archives.read().len()
    }

    /// Whether nothing is mounted
    pub fn is_empty(&self) -> bool {
        self.archives.read().is_empty()
    }

    /// Check if the archive mounted as `name` contains `path`
    pub fn has_file(&self, name: &str, path: &str) -> RegistryResult<bool> {
        Ok(self.require(name)?.has_file(path))
    }

    /// Extract `path` from the archive mounted as `name`
    pub fn load_file(&self, name: &str, path: &str) -> RegistryResult<Vec<u8>> {
        Ok(self.require(name)?.extract(path)?)
    }

    /// First mounted archive, in name order, that contains `path`
    pub fn find(&self, path: &str) -> Option<(String, Arc<ResourceArchive>)> {
        self.archives
            .read()
            .iter()
            .find(|(_, archive)| archive.has_file(path))
            .map(|(name, archive)| (name.clone(), Arc::clone(archive)))
    }

    /// Extract `path` from the first archive that contains it
    pub fn load_any(&self, path: &str) -> RegistryResult<Vec<u8>> {
        let (_, archive) = self
            .find(path)
            .ok_or_else(|| ExtractError::NotFound(path.to_string()))?;
        Ok(archive.extract(path)?)
    }

    fn require(&self, name: &str) -> RegistryResult<Arc<ResourceArchive>> {
        self.get(name)
            .ok_or_else(|| RegistryError::NotMounted(name.to_string()))
    }
}
