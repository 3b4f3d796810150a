//! Secret store gateway
//!
//! A thin facade over the OS keychain. Only [`SecretKey`]-typed keys get
//! through, there is no enumeration surface, and backend errors are redacted
//! before they cross the boundary. Secret values are never logged.

use parking_lot::RwLock;
use std::collections::HashMap;

use wt_core::error::{sanitize_message, WtError, WtResult};

use crate::key::SecretKey;

/// Keychain service name under which all Wardterm entries live
const SERVICE_NAME: &str = "wardterm";

/// Facade over an OS-backed secret store
pub trait SecretStore: Send + Sync {
    /// Store a secret value under a validated key
    fn store(&self, key: &SecretKey, value: &str) -> WtResult<()>;

    /// Retrieve a secret value; `Ok(None)` when absent
    fn retrieve(&self, key: &SecretKey) -> WtResult<Option<String>>;

    /// Delete a secret; deleting an absent entry is not an error
    fn delete(&self, key: &SecretKey) -> WtResult<()>;

    /// Check presence without exposing the value
    fn exists(&self, key: &SecretKey) -> WtResult<bool> {
        Ok(self.retrieve(key)?.is_some())
    }
}

/// OS keychain implementation backed by the `keyring` crate
pub struct KeyringStore {
    service: &'static str,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME,
        }
    }

    fn entry(&self, key: &SecretKey) -> WtResult<keyring::Entry> {
        keyring::Entry::new(self.service, &key.to_string()).map_err(redact)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn store(&self, key: &SecretKey, value: &str) -> WtResult<()> {
        self.entry(key)?.set_password(value).map_err(redact)?;
        // Log the namespace only, never the owner id or value
        tracing::debug!(kind = %key.kind(), "stored secret");
        Ok(())
    }

    fn retrieve(&self, key: &SecretKey) -> WtResult<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(redact(e)),
        }
    }

    fn delete(&self, key: &SecretKey) -> WtResult<()> {
        match self.entry(key)?.delete_password() {
            Ok(()) => {
                tracing::debug!(kind = %key.kind(), "deleted secret");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(redact(e)),
        }
    }
}

/// Redact a keyring backend error before it crosses the boundary
fn redact(err: keyring::Error) -> WtError {
    WtError::Secret(sanitize_message(&err.to_string()))
}

/// In-memory store for tests and headless environments
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for MemoryStore {
    fn store(&self, key: &SecretKey, value: &str) -> WtResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn retrieve(&self, key: &SecretKey) -> WtResult<Option<String>> {
        Ok(self.entries.read().get(&key.to_string()).cloned())
    }

    fn delete(&self, key: &SecretKey) -> WtResult<()> {
        self.entries.write().remove(&key.to_string());
        Ok(())
    }
}
