//! Courier Gateway - HTTP front for device-based courier sign-in.
//!
//! Serves the device check that decides between the login and the
//! registration prompt, and the login and registration endpoints that
//! grow each courier's set of remembered devices.

pub mod accounts;
pub mod api;
pub mod config;
pub mod error;
pub mod extractors;

pub use accounts::Accounts;
pub use config::Config;
pub use error::GatewayError;
