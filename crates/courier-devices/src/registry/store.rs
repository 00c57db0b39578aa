//! Snapshot persistence for the device registry.

use super::{CourierDeviceSet, CourierId};
use crate::error::DeviceResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// On-disk shape of the registry, couriers in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub couriers: Vec<CourierDeviceSet>,
}

impl RegistrySnapshot {
    fn upsert(&mut self, record: &CourierDeviceSet) {
        match self
            .couriers
            .iter_mut()
            .find(|c| c.courier_id == record.courier_id)
        {
            Some(existing) => *existing = record.clone(),
            None => self.couriers.push(record.clone()),
        }
    }

    fn remove(&mut self, courier_id: CourierId) -> bool {
        let before = self.couriers.len();
        self.couriers.retain(|c| c.courier_id != courier_id);
        self.couriers.len() != before
    }
}

/// JSON file store.
///
/// Holds the last written document so single-record writes can be merged
/// into it. The document lock is held across the file write, so writes land
/// on disk in the order their records were merged.
pub struct FileStore {
    path: PathBuf,
    document: Mutex<RegistrySnapshot>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            document: Mutex::new(RegistrySnapshot::default()),
        }
    }

    /// Load the snapshot. A missing file is an empty registry.
    pub async fn load(&self) -> DeviceResult<RegistrySnapshot> {
        let mut document = self.document.lock().await;

        if !fs::try_exists(&self.path).await? {
            info!(
                "Device registry file not found at {:?}, starting empty",
                self.path
            );
            *document = RegistrySnapshot::default();
            return Ok(document.clone());
        }

        let data = fs::read(&self.path).await?;
        let snapshot: RegistrySnapshot = serde_json::from_slice(&data)?;

        info!(
            "Loaded device registry with {} couriers from {:?}",
            snapshot.couriers.len(),
            self.path
        );

        *document = snapshot.clone();
        Ok(snapshot)
    }

    /// Replace the cached document without writing, after the registry has
    /// cleaned up what was loaded.
    pub(crate) async fn seed(&self, snapshot: &RegistrySnapshot) {
        *self.document.lock().await = snapshot.clone();
    }

    pub(crate) async fn save_record(&self, record: &CourierDeviceSet) -> DeviceResult<()> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        next.upsert(record);
        self.write(&next).await?;
        *document = next;
        Ok(())
    }

    pub(crate) async fn remove_record(&self, courier_id: CourierId) -> DeviceResult<()> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        if !next.remove(courier_id) {
            return Ok(());
        }
        self.write(&next).await?;
        *document = next;
        Ok(())
    }

    pub(crate) async fn save_all(&self, snapshot: &RegistrySnapshot) -> DeviceResult<()> {
        let mut document = self.document.lock().await;
        self.write(snapshot).await?;
        *document = snapshot.clone();
        Ok(())
    }

    async fn write(&self, snapshot: &RegistrySnapshot) -> DeviceResult<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file + rename
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(
            "Saved device registry ({} bytes) to {:?}",
            data.len(),
            self.path
        );
        Ok(())
    }
}

/// Store that keeps nothing; the registry lives only in memory.
pub struct MemoryStore;

impl MemoryStore {
    pub async fn load(&self) -> DeviceResult<RegistrySnapshot> {
        debug!("Memory store: returning empty registry");
        Ok(RegistrySnapshot::default())
    }
}

/// Persistence backend for the registry.
///
/// Writes are crate-private: the registry runs each one on a task of its
/// own, so a write is never abandoned between the file and the cached
/// document.
pub enum Store {
    /// JSON file on disk
    File(FileStore),
    /// In-memory only (no persistence)
    Memory(MemoryStore),
    #[cfg(test)]
    Gated(gated::GatedStore),
}

impl Store {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Store::File(FileStore::new(path.into()))
    }

    pub fn memory() -> Self {
        Store::Memory(MemoryStore)
    }

    #[cfg(test)]
    pub(crate) fn gated(
        path: impl Into<PathBuf>,
        gate: std::sync::Arc<gated::WriteGate>,
    ) -> Self {
        Store::Gated(gated::GatedStore::new(FileStore::new(path.into()), gate))
    }

    pub async fn load(&self) -> DeviceResult<RegistrySnapshot> {
        match self {
            Store::File(s) => s.load().await,
            Store::Memory(s) => s.load().await,
            #[cfg(test)]
            Store::Gated(s) => s.file.load().await,
        }
    }

    pub(crate) async fn seed(&self, snapshot: &RegistrySnapshot) {
        match self {
            Store::File(s) => s.seed(snapshot).await,
            Store::Memory(_) => {}
            #[cfg(test)]
            Store::Gated(s) => s.file.seed(snapshot).await,
        }
    }

    /// Persist one courier's record.
    pub(crate) async fn save_record(&self, record: &CourierDeviceSet) -> DeviceResult<()> {
        match self {
            Store::File(s) => s.save_record(record).await,
            Store::Memory(_) => Ok(()),
            #[cfg(test)]
            Store::Gated(s) => {
                s.gate.pass().await?;
                s.file.save_record(record).await
            }
        }
    }

    /// Drop one courier's record.
    pub(crate) async fn remove_record(&self, courier_id: CourierId) -> DeviceResult<()> {
        match self {
            Store::File(s) => s.remove_record(courier_id).await,
            Store::Memory(_) => Ok(()),
            #[cfg(test)]
            Store::Gated(s) => {
                s.gate.pass().await?;
                s.file.remove_record(courier_id).await
            }
        }
    }

    /// Replace the whole persisted registry.
    pub(crate) async fn save_all(&self, snapshot: &RegistrySnapshot) -> DeviceResult<()> {
        match self {
            Store::File(s) => s.save_all(snapshot).await,
            Store::Memory(_) => Ok(()),
            #[cfg(test)]
            Store::Gated(s) => {
                s.gate.pass().await?;
                s.file.save_all(snapshot).await
            }
        }
    }
}
