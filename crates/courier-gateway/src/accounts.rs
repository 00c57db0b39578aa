//! Minimal in-memory credential and session collaborator.
//!
//! Implements the authentication and courier lookup seams the device
//! reconciler consumes. Identities are normalized email addresses.

use crate::error::GatewayError;
use async_trait::async_trait;
use courier_devices::{Authenticator, CourierDirectory, CourierId, Credentials, DeviceResult, Identity};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info};

const SALT_LEN: usize = 16;
const SESSION_TOKEN_LEN: usize = 32;

struct Account {
    full_name: String,
    salt: String,
    password_hash: String,
    courier_id: Option<CourierId>,
}

/// Accounts and bearer sessions.
#[derive(Default)]
pub struct Accounts {
    accounts: RwLock<HashMap<String, Account>>,
    sessions: RwLock<HashMap<String, Identity>>,
}

impl Accounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account. `courier_id` links it to a courier record.
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        courier_id: Option<CourierId>,
    ) -> Result<Identity, GatewayError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(GatewayError::InvalidRequest("password is required".into()));
        }

        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&email) {
            return Err(GatewayError::Conflict("email already registered".into()));
        }

        let salt = random_hex(SALT_LEN);
        let password_hash = hash_password(&salt, password);
        accounts.insert(
            email.clone(),
            Account {
                full_name: full_name.trim().to_string(),
                salt,
                password_hash,
                courier_id,
            },
        );

        info!(courier_id = ?courier_id, "Account created");
        Ok(Identity::new(email))
    }

    /// Remove an account and every session issued for it.
    pub async fn remove_account(&self, identity: &Identity) -> bool {
        let removed = self
            .accounts
            .write()
            .await
            .remove(identity.as_str())
            .is_some();
        self.sessions.write().await.retain(|_, i| i != identity);
        removed
    }

    pub async fn full_name(&self, identity: &Identity) -> Option<String> {
        self.accounts
            .read()
            .await
            .get(identity.as_str())
            .map(|a| a.full_name.clone())
    }

    /// Issue a random bearer token for an identity.
    pub async fn issue_session(&self, identity: &Identity) -> String {
        let token = random_hex(SESSION_TOKEN_LEN);
        self.sessions
            .write()
            .await
            .insert(token.clone(), identity.clone());
        debug!("Session issued");
        token
    }

    /// Identity behind a bearer token, if the token is live.
    pub async fn session(&self, token: &str) -> Option<Identity> {
        self.sessions.read().await.get(token).cloned()
    }

    pub async fn end_session(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

#[async_trait]
impl Authenticator for Accounts {
    async fn authenticate(&self, credentials: &Credentials) -> DeviceResult<Option<Identity>> {
        let Ok(email) = normalize_email(&credentials.login) else {
            return Ok(None);
        };

        let accounts = self.accounts.read().await;
        let Some(account) = accounts.get(&email) else {
            return Ok(None);
        };

        let digest = hash_password(&account.salt, &credentials.secret);
        if secrets_match(&digest, &account.password_hash) {
            Ok(Some(Identity::new(email)))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl CourierDirectory for Accounts {
    async fn courier_for_identity(&self, identity: &Identity) -> DeviceResult<Option<CourierId>> {
        Ok(self
            .accounts
            .read()
            .await
            .get(identity.as_str())
            .and_then(|a| a.courier_id))
    }
}

/// Lower-case and trim an email, rejecting anything without an `@`.
pub fn normalize_email(email: &str) -> Result<String, GatewayError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(GatewayError::InvalidRequest("invalid email address".into())),
    }
}

/// Salted SHA-256 of a password.
fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare two secrets in time independent of where they differ.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
