//! Device fingerprints and the request-signal hash that can produce them.

use crate::error::{DeviceError, DeviceResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Upper bound on client-asserted fingerprints.
pub const MAX_FINGERPRINT_LEN: usize = 128;

const SIGNAL_SEPARATOR: &str = "|";

/// Opaque device hint. Compared by exact string equality everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a fingerprint that the caller requires to be present.
    pub fn parse(raw: &str) -> DeviceResult<Self> {
        let value = raw.trim();

        if value.is_empty() {
            return Err(DeviceError::InvalidFingerprint(
                "fingerprint must not be blank".into(),
            ));
        }

        if value.len() > MAX_FINGERPRINT_LEN {
            return Err(DeviceError::InvalidFingerprint(format!(
                "fingerprint longer than {} characters",
                MAX_FINGERPRINT_LEN
            )));
        }

        Ok(Self(value.to_string()))
    }

    /// Interpret an optional client claim. Absent or blank means "no fingerprint supplied".
    pub fn from_claim(raw: Option<&str>) -> DeviceResult<Option<Self>> {
        match raw {
            Some(value) if !value.trim().is_empty() => Self::parse(value).map(Some),
            _ => Ok(None),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Request-level signals hashed into a server-side fingerprint hint.
///
/// Field order is significant: it is the order in which the signals are
/// concatenated before hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSignals {
    pub client_address: String,
    pub user_agent: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub host: String,
    pub referrer: String,
}

impl RequestSignals {
    fn joined(&self) -> String {
        [
            self.client_address.as_str(),
            self.user_agent.as_str(),
            self.accept_language.as_str(),
            self.accept_encoding.as_str(),
            self.host.as_str(),
            self.referrer.as_str(),
        ]
        .join(SIGNAL_SEPARATOR)
    }
}

/// Derive a 16-character lower-case hex fingerprint from request signals.
///
/// Pure and infallible; all-empty signals still hash to a valid value.
pub fn generate_fingerprint(signals: &RequestSignals) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(signals.joined().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FINGERPRINT_LEN);
    Fingerprint(digest)
}
