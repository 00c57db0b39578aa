//! Decides whether a requesting device belongs to a known courier.
//!
//! An identity check walks four rules in order, first match wins:
//!
//! 1. an authenticated identity mapped to a courier is `AUTHENTICATED`;
//! 2. a non-blank claimed fingerprint found in the registry is `FINGERPRINT_KNOWN`;
//! 3. a non-blank claimed fingerprint not found is `FINGERPRINT_UNKNOWN`;
//! 4. otherwise `NO_FINGERPRINT_SUPPLIED`.
//!
//! The reconciler never mints a fingerprint itself. The only writes happen
//! after a successful login or registration, using the fingerprint the
//! client asserted.

use crate::error::{DeviceError, DeviceResult};
use crate::fingerprint::Fingerprint;
use crate::registry::{CourierId, DeviceRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default deadline for a single registry or directory round trip.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Authenticated identity, opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Login credentials handed to the [`Authenticator`].
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Credential check owned by the authentication layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` means the credentials were wrong.
    async fn authenticate(&self, credentials: &Credentials) -> DeviceResult<Option<Identity>>;
}

/// Maps authenticated identities to courier records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CourierDirectory: Send + Sync {
    async fn courier_for_identity(&self, identity: &Identity) -> DeviceResult<Option<CourierId>>;
}

/// Which rule an identity check matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    Authenticated,
    FingerprintKnown,
    FingerprintUnknown,
    NoFingerprintSupplied,
}

/// What the caller should present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Already logged in.
    SignedIn,
    ShowLogin,
    ShowRegister,
}

impl DeviceState {
    pub fn disposition(self) -> Disposition {
        match self {
            DeviceState::Authenticated => Disposition::SignedIn,
            DeviceState::FingerprintKnown => Disposition::ShowLogin,
            DeviceState::FingerprintUnknown | DeviceState::NoFingerprintSupplied => {
                Disposition::ShowRegister
            }
        }
    }

    pub fn is_new_device(self) -> bool {
        matches!(
            self,
            DeviceState::FingerprintUnknown | DeviceState::NoFingerprintSupplied
        )
    }

    fn message(self) -> &'static str {
        match self {
            DeviceState::Authenticated => "Courier already signed in",
            DeviceState::FingerprintKnown => "Device already registered",
            DeviceState::FingerprintUnknown => "New device, registration required",
            DeviceState::NoFingerprintSupplied => "No device id supplied, registration required",
        }
    }
}

/// Result of an identity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCheck {
    pub state: DeviceState,
    pub disposition: Disposition,
    /// The matched courier, for `Authenticated` and `FingerprintKnown`.
    pub courier_id: Option<CourierId>,
    /// The client's fingerprint, carried forward unchanged.
    pub echoed_fingerprint: Option<Fingerprint>,
}

impl DeviceCheck {
    fn new(
        state: DeviceState,
        courier_id: Option<CourierId>,
        echoed_fingerprint: Option<Fingerprint>,
    ) -> Self {
        Self {
            state,
            disposition: state.disposition(),
            courier_id,
            echoed_fingerprint,
        }
    }
}

/// Wire format for an identity check. Exactly one of `show_register` and
/// `show_login` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCheckResponse {
    pub is_new_device: bool,
    pub show_register: bool,
    pub show_login: bool,
    pub device_id: Option<String>,
    pub message: String,
}

impl From<DeviceCheck> for DeviceCheckResponse {
    fn from(check: DeviceCheck) -> Self {
        let show_register = check.disposition == Disposition::ShowRegister;
        Self {
            is_new_device: check.state.is_new_device(),
            show_register,
            show_login: !show_register,
            device_id: check.echoed_fingerprint.map(Fingerprint::into_inner),
            message: check.state.message().to_string(),
        }
    }
}

/// Successful login or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub identity: Identity,
    pub courier_id: CourierId,
    /// Whether the claimed fingerprint was new for this courier.
    pub device_added: bool,
}

/// Device reconciler over a registry and the authentication collaborators.
#[derive(Clone)]
pub struct DeviceReconciler {
    registry: Arc<dyn DeviceRegistry>,
    authenticator: Arc<dyn Authenticator>,
    directory: Arc<dyn CourierDirectory>,
    storage_timeout: Duration,
}

impl DeviceReconciler {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<dyn CourierDirectory>,
    ) -> Self {
        Self {
            registry,
            authenticator,
            directory,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    /// Deadline applied to each collaborator call. Elapsing is a storage
    /// failure, never a negative answer.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, fut: F) -> DeviceResult<T>
    where
        F: Future<Output = DeviceResult<T>>,
    {
        tokio::time::timeout(self.storage_timeout, fut).await?
    }

    /// Classify a request by its authenticated identity and claimed fingerprint.
    pub async fn check_device(
        &self,
        identity: Option<&Identity>,
        claimed_fingerprint: Option<&str>,
    ) -> DeviceResult<DeviceCheck> {
        if let Some(identity) = identity {
            if let Some(courier_id) = self.courier_for_identity(identity).await? {
                // A malformed claim does not block a signed-in courier.
                let echoed = Fingerprint::from_claim(claimed_fingerprint).ok().flatten();
                let check = DeviceCheck::new(DeviceState::Authenticated, Some(courier_id), echoed);
                info!(state = ?check.state, courier_id = %courier_id, "Device check resolved");
                return Ok(check);
            }
        }

        let claim = match Fingerprint::from_claim(claimed_fingerprint) {
            Ok(claim) => claim,
            // Nothing that long can have been stored, so the device is unknown.
            Err(DeviceError::InvalidFingerprint(reason)) => {
                info!(state = ?DeviceState::FingerprintUnknown, %reason, "Device check resolved");
                return Ok(DeviceCheck::new(DeviceState::FingerprintUnknown, None, None));
            }
            Err(e) => return Err(e),
        };

        let check = match claim {
            Some(fingerprint) => {
                match self
                    .bounded(
                        self.registry
                            .find_courier_by_fingerprint(fingerprint.as_str()),
                    )
                    .await?
                {
                    Some(courier_id) => DeviceCheck::new(
                        DeviceState::FingerprintKnown,
                        Some(courier_id),
                        Some(fingerprint),
                    ),
                    None => DeviceCheck::new(DeviceState::FingerprintUnknown, None, Some(fingerprint)),
                }
            }
            None => DeviceCheck::new(DeviceState::NoFingerprintSupplied, None, None),
        };

        info!(
            state = ?check.state,
            courier_id = ?check.courier_id,
            fingerprint = ?check.echoed_fingerprint,
            "Device check resolved"
        );
        Ok(check)
    }

    /// Remember the claimed fingerprint for a courier that just authenticated.
    ///
    /// Absent or blank claims change nothing. Returns whether the set grew.
    pub async fn record_successful_auth(
        &self,
        courier_id: CourierId,
        claimed_fingerprint: Option<&str>,
    ) -> DeviceResult<bool> {
        let Some(fingerprint) = Fingerprint::from_claim(claimed_fingerprint)? else {
            return Ok(false);
        };

        self.bounded(
            self.registry
                .add_fingerprint(courier_id, fingerprint.as_str()),
        )
        .await
    }

    /// Authenticate a courier and record the device they logged in from.
    ///
    /// Wrong credentials are `AuthenticationFailed`; a valid identity without
    /// a courier record is `NotACourier`. Neither is a device state.
    pub async fn login(
        &self,
        credentials: &Credentials,
        claimed_fingerprint: Option<&str>,
    ) -> DeviceResult<AuthOutcome> {
        // Validate before touching credentials so a bad claim is a plain input error.
        let fingerprint = Fingerprint::from_claim(claimed_fingerprint)?;

        let identity = match self
            .bounded(self.authenticator.authenticate(credentials))
            .await?
        {
            Some(identity) => identity,
            None => {
                warn!("Courier authentication failed");
                return Err(DeviceError::AuthenticationFailed);
            }
        };

        let courier_id = self
            .courier_for_identity(&identity)
            .await?
            .ok_or_else(|| DeviceError::NotACourier(identity.to_string()))?;

        let device_added = self
            .record_successful_auth(courier_id, fingerprint.as_ref().map(Fingerprint::as_str))
            .await?;

        info!(courier_id = %courier_id, device_added, "Courier logged in");
        Ok(AuthOutcome {
            identity,
            courier_id,
            device_added,
        })
    }

    /// Create the device set for a newly registered courier, seeded with the
    /// claimed fingerprint when there is one. On a storage failure the
    /// courier is removed again, so a failed registration leaves nothing behind.
    pub async fn register_courier(
        &self,
        courier_id: CourierId,
        claimed_fingerprint: Option<&str>,
    ) -> DeviceResult<bool> {
        let fingerprint = Fingerprint::from_claim(claimed_fingerprint)?;

        let device_added = match self
            .bounded(self.registry.create_courier(courier_id, fingerprint))
            .await
        {
            Ok(added) => added,
            Err(e @ DeviceError::StorageUnavailable(_)) => {
                // A create that timed out may still land; take it back out.
                match self.bounded(self.registry.remove_courier(courier_id)).await {
                    Ok(removed) => {
                        warn!(courier_id = %courier_id, removed, error = %e, "Courier registration failed")
                    }
                    Err(undo) => {
                        warn!(courier_id = %courier_id, error = %e, undo_error = %undo, "Courier registration failed and could not be undone")
                    }
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!(courier_id = %courier_id, device_added, "Courier registered");
        Ok(device_added)
    }

    /// The courier's remembered fingerprints in append order.
    pub async fn devices(&self, courier_id: CourierId) -> DeviceResult<Vec<Fingerprint>> {
        self.bounded(self.registry.list_fingerprints(courier_id)).await
    }

    pub async fn courier_for_identity(&self, identity: &Identity) -> DeviceResult<Option<CourierId>> {
        self.bounded(self.directory.courier_for_identity(identity)).await
    }

    pub async fn courier_count(&self) -> DeviceResult<usize> {
        self.bounded(self.registry.courier_count()).await
    }

    /// Clear every courier's devices. Callers must obtain operator
    /// confirmation first.
    pub async fn reset_all_devices(&self) -> DeviceResult<usize> {
        self.bounded(self.registry.reset_all()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MockDeviceRegistry, Registry, Store, WriteGate};
    use std::collections::HashMap;

    /// Directory backed by a fixed map.
    struct StaticDirectory(HashMap<Identity, CourierId>);

    #[async_trait]
    impl CourierDirectory for StaticDirectory {
        async fn courier_for_identity(&self, identity: &Identity) -> DeviceResult<Option<CourierId>> {
            Ok(self.0.get(identity).copied())
        }
    }

    /// Registry whose lookups never finish in time.
    struct StalledRegistry;

    #[async_trait]
    impl DeviceRegistry for StalledRegistry {
        async fn create_courier(&self, _: CourierId, _: Option<Fingerprint>) -> DeviceResult<bool> {
            Ok(false)
        }

        async fn remove_courier(&self, _: CourierId) -> DeviceResult<bool> {
            Ok(false)
        }

        async fn add_fingerprint(&self, _: CourierId, _: &str) -> DeviceResult<bool> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(true)
        }

        async fn contains(&self, _: CourierId, _: &str) -> DeviceResult<bool> {
            Ok(false)
        }

        async fn list_fingerprints(&self, _: CourierId) -> DeviceResult<Vec<Fingerprint>> {
            Ok(Vec::new())
        }

        async fn find_courier_by_fingerprint(&self, _: &str) -> DeviceResult<Option<CourierId>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn reset_all(&self) -> DeviceResult<usize> {
            Ok(0)
        }

        async fn courier_count(&self) -> DeviceResult<usize> {
            Ok(0)
        }
    }

    fn no_auth() -> Arc<dyn Authenticator> {
        let mut auth = MockAuthenticator::new();
        auth.expect_authenticate().never();
        Arc::new(auth)
    }

    fn directory(entries: &[(&str, CourierId)]) -> Arc<dyn CourierDirectory> {
        Arc::new(StaticDirectory(
            entries
                .iter()
                .map(|(name, id)| (Identity::new(*name), *id))
                .collect(),
        ))
    }

    async fn reconciler_with_known(fingerprint: &str) -> (DeviceReconciler, CourierId) {
        let registry = Arc::new(Registry::in_memory());
        let courier = CourierId::new();
        registry.create_courier(courier, None).await.unwrap();
        registry.add_fingerprint(courier, fingerprint).await.unwrap();

        let reconciler = DeviceReconciler::new(
            registry,
            no_auth(),
            directory(&[("courier@example.com", courier)]),
        );
        (reconciler, courier)
    }

    fn credentials() -> Credentials {
        Credentials {
            login: "courier@example.com".into(),
            secret: "hunter2".into(),
        }
    }

    #[tokio::test]
    async fn test_authenticated_courier() {
        let (reconciler, courier) = reconciler_with_known("abc123").await;
        let identity = Identity::new("courier@example.com");

        let check = reconciler.check_device(Some(&identity), None).await.unwrap();

        assert_eq!(check.state, DeviceState::Authenticated);
        assert_eq!(check.disposition, Disposition::SignedIn);
        assert_eq!(check.courier_id, Some(courier));
    }

    #[tokio::test]
    async fn test_authenticated_non_courier_falls_through() {
        let (reconciler, courier) = reconciler_with_known("abc123").await;
        let identity = Identity::new("customer@example.com");

        let check = reconciler
            .check_device(Some(&identity), Some("abc123"))
            .await
            .unwrap();

        assert_eq!(check.state, DeviceState::FingerprintKnown);
        assert_eq!(check.courier_id, Some(courier));
    }

    #[tokio::test]
    async fn test_known_fingerprint_shows_login() {
        let (reconciler, courier) = reconciler_with_known("abc123").await;

        let check = reconciler.check_device(None, Some("abc123")).await.unwrap();
        assert_eq!(check.state, DeviceState::FingerprintKnown);
        assert_eq!(check.courier_id, Some(courier));

        let response = DeviceCheckResponse::from(check);
        assert!(response.show_login);
        assert!(!response.show_register);
        assert!(!response.is_new_device);
        assert_eq!(response.device_id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_unknown_fingerprint_shows_register_and_echoes() {
        let (reconciler, _) = reconciler_with_known("abc123").await;

        let check = reconciler.check_device(None, Some("zzz999")).await.unwrap();
        assert_eq!(check.state, DeviceState::FingerprintUnknown);

        let response = DeviceCheckResponse::from(check);
        assert!(response.show_register);
        assert!(!response.show_login);
        assert!(response.is_new_device);
        assert_eq!(response.device_id.as_deref(), Some("zzz999"));
    }

    #[tokio::test]
    async fn test_no_fingerprint_shows_register_without_device_id() {
        let (reconciler, _) = reconciler_with_known("abc123").await;

        for claim in [None, Some(""), Some("   ")] {
            let check = reconciler.check_device(None, claim).await.unwrap();
            assert_eq!(check.state, DeviceState::NoFingerprintSupplied);

            let response = DeviceCheckResponse::from(check);
            assert!(response.show_register);
            assert!(!response.show_login);
            assert_eq!(response.device_id, None);
        }
    }

    #[tokio::test]
    async fn test_courier_without_devices_is_not_a_fallback_match() {
        let registry = Arc::new(Registry::in_memory());
        registry.create_courier(CourierId::new(), None).await.unwrap();
        let reconciler = DeviceReconciler::new(registry, no_auth(), directory(&[]));

        let check = reconciler.check_device(None, Some("zzz999")).await.unwrap();
        assert_eq!(check.state, DeviceState::FingerprintUnknown);
    }

    #[tokio::test]
    async fn test_check_does_not_write() {
        let (reconciler, courier) = reconciler_with_known("abc123").await;

        reconciler.check_device(None, Some("zzz999")).await.unwrap();

        let devices = reconciler.devices(courier).await.unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_unknown_device() {
        let mut registry = MockDeviceRegistry::new();
        registry
            .expect_find_courier_by_fingerprint()
            .times(1)
            .returning(|_| Err(DeviceError::StorageUnavailable("connection refused".into())));

        let reconciler = DeviceReconciler::new(Arc::new(registry), no_auth(), directory(&[]));

        let result = reconciler.check_device(None, Some("abc123")).await;
        assert!(matches!(result, Err(DeviceError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_directory_failure_propagates() {
        let mut dir = MockCourierDirectory::new();
        dir.expect_courier_for_identity()
            .times(1)
            .returning(|_| Err(DeviceError::StorageUnavailable("down".into())));

        let reconciler =
            DeviceReconciler::new(Arc::new(Registry::in_memory()), no_auth(), Arc::new(dir));

        let identity = Identity::new("courier@example.com");
        let result = reconciler.check_device(Some(&identity), Some("abc123")).await;
        assert!(matches!(result, Err(DeviceError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_lookup_timeout_is_a_failure() {
        let reconciler = DeviceReconciler::new(Arc::new(StalledRegistry), no_auth(), directory(&[]))
            .with_storage_timeout(Duration::from_millis(20));

        let result = reconciler.check_device(None, Some("abc123")).await;
        assert!(matches!(result, Err(DeviceError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_add_timeout_is_a_failure() {
        let reconciler = DeviceReconciler::new(Arc::new(StalledRegistry), no_auth(), directory(&[]))
            .with_storage_timeout(Duration::from_millis(20));

        let result = reconciler
            .record_successful_auth(CourierId::new(), Some("abc123"))
            .await;
        assert!(matches!(result, Err(DeviceError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_oversized_claim_is_an_unknown_device() {
        let (reconciler, courier) = reconciler_with_known("abc123").await;
        let claim = "x".repeat(crate::fingerprint::MAX_FINGERPRINT_LEN + 1);

        let check = reconciler.check_device(None, Some(&claim)).await.unwrap();
        assert_eq!(check.state, DeviceState::FingerprintUnknown);
        assert_eq!(check.echoed_fingerprint, None);

        let response = DeviceCheckResponse::from(check);
        assert!(response.show_register);

        // Writes still refuse it.
        let result = reconciler.record_successful_auth(courier, Some(&claim)).await;
        assert!(matches!(result, Err(DeviceError::InvalidFingerprint(_))));
    }

    #[tokio::test]
    async fn test_record_successful_auth_is_idempotent() {
        let (reconciler, courier) = reconciler_with_known("abc123").await;

        assert!(reconciler
            .record_successful_auth(courier, Some("new-device"))
            .await
            .unwrap());
        assert!(!reconciler
            .record_successful_auth(courier, Some("new-device"))
            .await
            .unwrap());
        assert!(!reconciler.record_successful_auth(courier, None).await.unwrap());
        assert!(!reconciler.record_successful_auth(courier, Some("")).await.unwrap());

        let devices = reconciler.devices(courier).await.unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn test_login_records_device() {
        let registry = Arc::new(Registry::in_memory());
        let courier = CourierId::new();
        registry.create_courier(courier, None).await.unwrap();

        let mut auth = MockAuthenticator::new();
        auth.expect_authenticate()
            .times(2)
            .returning(|c| Ok(Some(Identity::new(c.login.clone()))));

        let reconciler = DeviceReconciler::new(
            registry,
            Arc::new(auth),
            directory(&[("courier@example.com", courier)]),
        );

        let outcome = reconciler.login(&credentials(), Some("phone-1")).await.unwrap();
        assert_eq!(outcome.courier_id, courier);
        assert!(outcome.device_added);

        let again = reconciler.login(&credentials(), Some("phone-1")).await.unwrap();
        assert!(!again.device_added);

        let check = reconciler.check_device(None, Some("phone-1")).await.unwrap();
        assert_eq!(check.state, DeviceState::FingerprintKnown);
    }

    #[tokio::test]
    async fn test_login_wrong_credentials_is_authentication_failure() {
        let mut auth = MockAuthenticator::new();
        auth.expect_authenticate().times(1).returning(|_| Ok(None));

        let reconciler =
            DeviceReconciler::new(Arc::new(Registry::in_memory()), Arc::new(auth), directory(&[]));

        let result = reconciler.login(&credentials(), Some("phone-1")).await;
        assert!(matches!(result, Err(DeviceError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn test_login_non_courier() {
        let mut auth = MockAuthenticator::new();
        auth.expect_authenticate()
            .times(1)
            .returning(|_| Ok(Some(Identity::new("customer@example.com"))));

        let reconciler =
            DeviceReconciler::new(Arc::new(Registry::in_memory()), Arc::new(auth), directory(&[]));

        let result = reconciler.login(&credentials(), None).await;
        assert!(matches!(result, Err(DeviceError::NotACourier(_))));
    }

    #[tokio::test]
    async fn test_register_courier_seeds_device() {
        let reconciler = DeviceReconciler::new(
            Arc::new(Registry::in_memory()),
            no_auth(),
            directory(&[]),
        );
        let courier = CourierId::new();

        assert!(reconciler
            .register_courier(courier, Some(" phone-1 "))
            .await
            .unwrap());

        let check = reconciler.check_device(None, Some("phone-1")).await.unwrap();
        assert_eq!(check.courier_id, Some(courier));

        let empty = CourierId::new();
        assert!(!reconciler.register_courier(empty, None).await.unwrap());
        assert!(reconciler.devices(empty).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_registration_removes_courier() {
        let mut registry = MockDeviceRegistry::new();
        registry
            .expect_create_courier()
            .times(1)
            .returning(|_, _| Err(DeviceError::StorageUnavailable("disk full".into())));
        registry
            .expect_remove_courier()
            .times(1)
            .returning(|_| Ok(false));

        let reconciler = DeviceReconciler::new(Arc::new(registry), no_auth(), directory(&[]));

        let result = reconciler
            .register_courier(CourierId::new(), Some("phone-1"))
            .await;
        assert!(matches!(result, Err(DeviceError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_existing_courier() {
        let (reconciler, courier) = reconciler_with_known("abc123").await;

        let result = reconciler.register_courier(courier, Some("phone-2")).await;
        assert!(matches!(result, Err(DeviceError::CourierExists(_))));

        let check = reconciler.check_device(None, Some("abc123")).await.unwrap();
        assert_eq!(check.courier_id, Some(courier));
    }

    #[tokio::test]
    async fn test_timed_out_registration_leaves_no_courier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let gate = WriteGate::closed();
        let registry = Arc::new(
            Registry::open(Store::gated(&path, gate.clone()))
                .await
                .unwrap(),
        );
        let reconciler = DeviceReconciler::new(registry.clone(), no_auth(), directory(&[]))
            .with_storage_timeout(Duration::from_millis(50));

        let courier = CourierId::new();
        let result = reconciler.register_courier(courier, Some("phone-1")).await;
        assert!(matches!(result, Err(DeviceError::StorageUnavailable(_))));

        // Both the stalled create and its undo go through, in that order.
        gate.release(2);
        assert_eq!(registry.courier_count().await.unwrap(), 0);

        let reopened = Registry::open(Store::file(&path)).await.unwrap();
        assert_eq!(reopened.courier_count().await.unwrap(), 0);
        assert_eq!(
            reopened.find_courier_by_fingerprint("phone-1").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_timed_out_add_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let gate = WriteGate::closed();
        let registry = Arc::new(
            Registry::open(Store::gated(&path, gate.clone()))
                .await
                .unwrap(),
        );
        let courier = CourierId::new();
        gate.release(1);
        registry.create_courier(courier, None).await.unwrap();

        let reconciler = DeviceReconciler::new(registry, no_auth(), directory(&[]))
            .with_storage_timeout(Duration::from_millis(100));

        let result = reconciler.record_successful_auth(courier, Some("phone-1")).await;
        assert!(matches!(result, Err(DeviceError::StorageUnavailable(_))));

        // The stalled write fails; the device must not look known.
        gate.reject_writes(true);
        gate.release(1);
        let check = reconciler.check_device(None, Some("phone-1")).await.unwrap();
        assert_eq!(check.state, DeviceState::FingerprintUnknown);

        gate.reject_writes(false);
        gate.release(1);
        assert!(reconciler
            .record_successful_auth(courier, Some("phone-1"))
            .await
            .unwrap());

        let reopened = Registry::open(Store::file(&path)).await.unwrap();
        assert_eq!(
            reopened.find_courier_by_fingerprint("phone-1").await.unwrap(),
            Some(courier)
        );
    }

    #[tokio::test]
    async fn test_reset_forgets_devices() {
        let (reconciler, _) = reconciler_with_known("abc123").await;

        assert_eq!(reconciler.reset_all_devices().await.unwrap(), 1);

        let check = reconciler.check_device(None, Some("abc123")).await.unwrap();
        assert_eq!(check.state, DeviceState::FingerprintUnknown);
    }

    #[test]
    fn test_response_wire_format() {
        let check = DeviceCheck::new(DeviceState::NoFingerprintSupplied, None, None);
        let json = serde_json::to_value(DeviceCheckResponse::from(check)).unwrap();

        assert_eq!(json["is_new_device"], true);
        assert_eq!(json["show_register"], true);
        assert_eq!(json["show_login"], false);
        assert!(json["device_id"].is_null());
        assert!(json["message"].is_string());
    }

    #[test]
    fn test_exactly_one_prompt_per_state() {
        for state in [
            DeviceState::Authenticated,
            DeviceState::FingerprintKnown,
            DeviceState::FingerprintUnknown,
            DeviceState::NoFingerprintSupplied,
        ] {
            let response = DeviceCheckResponse::from(DeviceCheck::new(state, None, None));
            assert!(response.show_login != response.show_register, "{:?}", state);
        }
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("hunter2"));
    }
}
