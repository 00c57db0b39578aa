//! Courier device registry: which fingerprints each courier has been seen on.

mod memory;
mod store;

pub use memory::Registry;
pub use store::{FileStore, MemoryStore, RegistrySnapshot, Store};

#[cfg(test)]
pub(crate) use store::gated::WriteGate;

use crate::error::{DeviceError, DeviceResult};
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque courier identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourierId(Uuid);

impl CourierId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CourierId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CourierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CourierId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The fingerprints known for one courier.
///
/// A fingerprint appears at most once. Append order is kept for
/// compatibility with stored data but membership is what matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierDeviceSet {
    pub courier_id: CourierId,

    /// When the courier record was created; defines enumeration order.
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub fingerprints: Vec<Fingerprint>,
}

impl CourierDeviceSet {
    /// Create an empty set for a newly created courier.
    pub fn new(courier_id: CourierId) -> Self {
        Self {
            courier_id,
            created_at: Utc::now(),
            fingerprints: Vec::new(),
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.iter().any(|f| f == fingerprint)
    }

    /// Append unless already present. Returns whether the set changed.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if self.contains(&fingerprint) {
            return false;
        }
        self.fingerprints.push(fingerprint);
        true
    }

    pub fn remove(&mut self, fingerprint: &Fingerprint) -> bool {
        let before = self.fingerprints.len();
        self.fingerprints.retain(|f| f != fingerprint);
        self.fingerprints.len() != before
    }

    /// Empty the set. Returns whether it held anything.
    pub fn clear(&mut self) -> bool {
        let had_any = !self.fingerprints.is_empty();
        self.fingerprints.clear();
        had_any
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Remove duplicates while keeping first-seen order. Used when loading
    /// data written by older tooling.
    pub(crate) fn dedup(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.fingerprints.retain(|f| seen.insert(f.clone()));
    }
}

/// Registry contract for courier device sets.
///
/// Every failure is a storage failure and is returned as an error; no
/// operation turns a failure into an empty or negative answer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Create the device set for a new courier, seeded with the
    /// fingerprint it registered from. Both land in one persisted write.
    /// Returns whether a fingerprint was recorded.
    async fn create_courier(
        &self,
        courier_id: CourierId,
        initial_fingerprint: Option<Fingerprint>,
    ) -> DeviceResult<bool>;

    /// Forget a courier and its devices. Returns whether it existed.
    async fn remove_courier(&self, courier_id: CourierId) -> DeviceResult<bool>;

    /// Add a fingerprint to a courier's set.
    ///
    /// Blank input is a no-op returning `false`, as is a fingerprint that is
    /// already present. Concurrent adds for the same courier never lose an append.
    async fn add_fingerprint(&self, courier_id: CourierId, fingerprint: &str) -> DeviceResult<bool>;

    async fn contains(&self, courier_id: CourierId, fingerprint: &str) -> DeviceResult<bool>;

    /// The courier's fingerprints in append order.
    async fn list_fingerprints(&self, courier_id: CourierId) -> DeviceResult<Vec<Fingerprint>>;

    /// First courier, in creation order, whose set contains the fingerprint.
    async fn find_courier_by_fingerprint(&self, fingerprint: &str)
        -> DeviceResult<Option<CourierId>>;

    /// Clear every courier's set. Returns how many sets were non-empty.
    async fn reset_all(&self) -> DeviceResult<usize>;

    async fn courier_count(&self) -> DeviceResult<usize>;
}

/// Parse registry input, treating blank as absent.
pub(crate) fn registry_fingerprint(raw: &str) -> DeviceResult<Option<Fingerprint>> {
    Fingerprint::from_claim(Some(raw))
}

pub(crate) fn not_found(courier_id: CourierId) -> DeviceError {
    DeviceError::CourierNotFound(courier_id)
}
