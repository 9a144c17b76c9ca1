//! Secret storage for the API key.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

pub const KEYRING_SERVICE: &str = "com.example.gptdesk";
pub const API_KEY_ENTRY: &str = "api-key";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing is stored under `(service, key)`.
    fn get(&self, service: &str, key: &str) -> Result<Option<String>>;
    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()>;
}

/// The OS key-store (Keychain, Secret Service, Credential Manager).
#[derive(Default)]
pub struct KeyringStore;

impl CredentialStore for KeyringStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(service, key)?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()> {
        keyring::Entry::new(service, key)?.set_password(secret)?;
        Ok(())
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl CredentialStore for MemoryStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .get(&(service.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()> {
        self.entries
            .lock()
            .insert((service.to_string(), key.to_string()), secret.to_string());
        Ok(())
    }
}

/// Look up the API key: key-store first, then the environment.
///
/// A key-store failure is logged and treated like a missing entry so the
/// environment fallback still gets a chance.
pub fn resolve_api_key(store: &dyn CredentialStore) -> Option<String> {
    match store.get(KEYRING_SERVICE, API_KEY_ENTRY) {
        Ok(Some(key)) if !key.trim().is_empty() => return Some(key),
        Ok(_) => {}
        Err(e) => tracing::warn!("key-store lookup failed: {}", e),
    }
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
}

pub fn save_api_key(store: &dyn CredentialStore, key: &str) -> Result<()> {
    store.set(KEYRING_SERVICE, API_KEY_ENTRY, key.trim())
}
