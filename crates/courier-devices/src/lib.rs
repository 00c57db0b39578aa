//! Device-based identity reconciliation for couriers.
//!
//! Decides, for a request without a server session, whether the device
//! belongs to an already registered courier:
//! - `fingerprint` derives a short hint from request signals
//! - `registry` keeps each courier's set of known fingerprints
//! - `reconciler` maps a request to a login or registration prompt and grows
//!   the registry after successful authentication

pub mod error;
pub mod fingerprint;
pub mod reconciler;
pub mod registry;

pub use error::{DeviceError, DeviceResult};
pub use fingerprint::{generate_fingerprint, Fingerprint, RequestSignals};
pub use reconciler::{
    AuthOutcome, Authenticator, CourierDirectory, Credentials, DeviceCheck, DeviceCheckResponse,
    DeviceReconciler, DeviceState, Disposition, Identity,
};
pub use registry::{CourierDeviceSet, CourierId, DeviceRegistry, Registry, Store};
