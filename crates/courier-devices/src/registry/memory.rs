//! Registry implementation with one lock per courier record.

use super::store::{RegistrySnapshot, Store};
use super::{not_found, registry_fingerprint, CourierDeviceSet, CourierId, DeviceRegistry};
use crate::error::{DeviceError, DeviceResult};
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn, Instrument};

/// A courier's record. `None` once the courier has been removed, so a
/// writer that fetched the cell before the removal cannot bring it back.
type RecordCell = Arc<Mutex<Option<CourierDeviceSet>>>;

#[derive(Default)]
struct Couriers {
    /// Creation order; the tie-break order for lookups.
    order: Vec<CourierId>,
    records: HashMap<CourierId, RecordCell>,
}

impl Couriers {
    fn in_order(&self) -> Vec<RecordCell> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }
}

/// Device registry backed by a [`Store`].
///
/// Each courier record sits behind its own mutex, held across the store
/// write, and the in-memory record only changes once the write succeeded.
/// Mutations run on their own task: a caller that stops waiting does not
/// stop the write, and a retry sees exactly what was persisted. The store
/// never takes a record lock, so the lock order is always record then store.
pub struct Registry {
    inner: Arc<Inner>,
}

struct Inner {
    couriers: RwLock<Couriers>,
    store: Store,
}

/// Run a mutation to completion regardless of whether its caller is still waiting.
async fn detached<T, F>(mutation: F) -> DeviceResult<T>
where
    F: Future<Output = DeviceResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(mutation.in_current_span()).await?
}

impl Registry {
    /// Open a registry, loading existing records from the store.
    pub async fn open(store: Store) -> DeviceResult<Self> {
        let snapshot = normalize(store.load().await?);
        // Later writes merge into the store's document; it must match memory.
        store.seed(&snapshot).await;

        let registry = Self::from_snapshot(snapshot, store);
        info!(
            "Device registry ready with {} couriers",
            registry.inner.couriers.read().await.order.len()
        );
        Ok(registry)
    }

    /// Registry that persists nothing.
    pub fn in_memory() -> Self {
        Self::from_snapshot(RegistrySnapshot::default(), Store::memory())
    }

    fn from_snapshot(snapshot: RegistrySnapshot, store: Store) -> Self {
        let mut couriers = Couriers::default();
        for record in snapshot.couriers {
            couriers.order.push(record.courier_id);
            couriers
                .records
                .insert(record.courier_id, Arc::new(Mutex::new(Some(record))));
        }

        Self {
            inner: Arc::new(Inner {
                couriers: RwLock::new(couriers),
                store,
            }),
        }
    }

    /// Copy of every record in creation order.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let cells = self.inner.couriers.read().await.in_order();
        let mut couriers = Vec::with_capacity(cells.len());
        for cell in cells {
            if let Some(record) = cell.lock().await.as_ref() {
                couriers.push(record.clone());
            }
        }
        RegistrySnapshot { couriers }
    }
}

/// Drop repeated couriers (first wins) and repeated fingerprints.
fn normalize(snapshot: RegistrySnapshot) -> RegistrySnapshot {
    let mut seen = HashSet::new();
    let mut couriers = Vec::with_capacity(snapshot.couriers.len());

    for mut record in snapshot.couriers {
        if !seen.insert(record.courier_id) {
            warn!(courier_id = %record.courier_id, "Duplicate courier in stored registry, keeping first");
            continue;
        }
        record.dedup();
        couriers.push(record);
    }

    RegistrySnapshot { couriers }
}

impl Inner {
    async fn record(&self, courier_id: CourierId) -> DeviceResult<RecordCell> {
        self.couriers
            .read()
            .await
            .records
            .get(&courier_id)
            .cloned()
            .ok_or_else(|| not_found(courier_id))
    }

    async fn create_courier(
        &self,
        courier_id: CourierId,
        initial_fingerprint: Option<Fingerprint>,
    ) -> DeviceResult<bool> {
        let mut couriers = self.couriers.write().await;

        if couriers.records.contains_key(&courier_id) {
            return Err(DeviceError::CourierExists(courier_id));
        }

        let mut record = CourierDeviceSet::new(courier_id);
        let device_added = initial_fingerprint.map_or(false, |f| record.insert(f));
        self.store.save_record(&record).await?;

        couriers.order.push(courier_id);
        couriers
            .records
            .insert(courier_id, Arc::new(Mutex::new(Some(record))));

        info!(courier_id = %courier_id, device_added, "Courier device set created");
        Ok(device_added)
    }

    async fn remove_courier(&self, courier_id: CourierId) -> DeviceResult<bool> {
        let mut couriers = self.couriers.write().await;

        let Some(cell) = couriers.records.get(&courier_id).cloned() else {
            return Ok(false);
        };
        let mut record = cell.lock().await;

        self.store.remove_record(courier_id).await?;

        *record = None;
        couriers.records.remove(&courier_id);
        couriers.order.retain(|id| *id != courier_id);

        info!(courier_id = %courier_id, "Courier device set removed");
        Ok(true)
    }

    async fn add_fingerprint(
        &self,
        courier_id: CourierId,
        fingerprint: Fingerprint,
    ) -> DeviceResult<bool> {
        let cell = self.record(courier_id).await?;
        let mut slot = cell.lock().await;
        let record = slot.as_ref().ok_or_else(|| not_found(courier_id))?;

        if record.contains(&fingerprint) {
            debug!(courier_id = %courier_id, %fingerprint, "Fingerprint already known");
            return Ok(false);
        }

        let mut next = record.clone();
        next.insert(fingerprint.clone());

        if let Err(e) = self.store.save_record(&next).await {
            warn!(courier_id = %courier_id, %fingerprint, error = %e, "Failed to persist fingerprint");
            return Err(e);
        }

        let devices = next.len();
        *slot = Some(next);

        info!(courier_id = %courier_id, %fingerprint, devices, "Fingerprint added");
        Ok(true)
    }

    async fn reset_all(&self) -> DeviceResult<usize> {
        // Holding the map read lock keeps new couriers out of the snapshot
        // window. Creation order is the record lock order.
        let couriers = self.couriers.read().await;
        let cells = couriers.in_order();
        let mut slots = Vec::with_capacity(cells.len());
        for cell in &cells {
            slots.push(cell.lock().await);
        }

        let mut cleared = 0;
        let mut next = Vec::with_capacity(slots.len());
        for record in slots.iter().filter_map(|slot| slot.as_ref()) {
            let mut record = record.clone();
            if record.clear() {
                cleared += 1;
            }
            next.push(record);
        }

        let snapshot = RegistrySnapshot { couriers: next };
        if let Err(e) = self.store.save_all(&snapshot).await {
            warn!(error = %e, "Failed to persist device reset");
            return Err(e);
        }

        for record in slots.iter_mut().filter_map(|slot| slot.as_mut()) {
            record.clear();
        }

        warn!(cleared, couriers = snapshot.couriers.len(), "All courier device sets cleared");
        Ok(cleared)
    }
}

#[async_trait]
impl DeviceRegistry for Registry {
    #[instrument(skip(self))]
    async fn create_courier(
        &self,
        courier_id: CourierId,
        initial_fingerprint: Option<Fingerprint>,
    ) -> DeviceResult<bool> {
        let inner = self.inner.clone();
        detached(async move { inner.create_courier(courier_id, initial_fingerprint).await }).await
    }

    #[instrument(skip(self))]
    async fn remove_courier(&self, courier_id: CourierId) -> DeviceResult<bool> {
        let inner = self.inner.clone();
        detached(async move { inner.remove_courier(courier_id).await }).await
    }

    #[instrument(skip(self))]
    async fn add_fingerprint(&self, courier_id: CourierId, fingerprint: &str) -> DeviceResult<bool> {
        let Some(fingerprint) = registry_fingerprint(fingerprint)? else {
            debug!(courier_id = %courier_id, "Blank fingerprint ignored");
            return Ok(false);
        };

        let inner = self.inner.clone();
        detached(async move { inner.add_fingerprint(courier_id, fingerprint).await }).await
    }

    #[instrument(skip(self))]
    async fn contains(&self, courier_id: CourierId, fingerprint: &str) -> DeviceResult<bool> {
        let Some(fingerprint) = registry_fingerprint(fingerprint)? else {
            return Ok(false);
        };

        let cell = self.inner.record(courier_id).await?;
        let slot = cell.lock().await;
        let record = slot.as_ref().ok_or_else(|| not_found(courier_id))?;
        Ok(record.contains(&fingerprint))
    }

    #[instrument(skip(self))]
    async fn list_fingerprints(&self, courier_id: CourierId) -> DeviceResult<Vec<Fingerprint>> {
        let cell = self.inner.record(courier_id).await?;
        let slot = cell.lock().await;
        let record = slot.as_ref().ok_or_else(|| not_found(courier_id))?;
        Ok(record.fingerprints.clone())
    }

    #[instrument(skip(self))]
    async fn find_courier_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> DeviceResult<Option<CourierId>> {
        let Some(fingerprint) = registry_fingerprint(fingerprint)? else {
            return Ok(None);
        };

        // Each record is read under its own lock; no lock spans the scan.
        let cells = self.inner.couriers.read().await.in_order();
        for cell in cells {
            let slot = cell.lock().await;
            if let Some(record) = slot.as_ref().filter(|r| r.contains(&fingerprint)) {
                return Ok(Some(record.courier_id));
            }
        }

        Ok(None)
    }

    #[instrument(skip(self))]
    async fn reset_all(&self) -> DeviceResult<usize> {
        let inner = self.inner.clone();
        detached(async move { inner.reset_all().await }).await
    }

    async fn courier_count(&self) -> DeviceResult<usize> {
        Ok(self.inner.couriers.read().await.order.len())
    }
}
