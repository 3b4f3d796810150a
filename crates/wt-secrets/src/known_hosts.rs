//! Trust-on-first-use host identity records
//!
//! Fingerprints are trusted on first explicit acceptance and checked on every
//! later contact. Records change only through [`KnownHostsStore::record`]
//! (the accept-persist path) or [`KnownHostsStore::forget`]; a mismatching
//! server key is never upgraded silently.

use base64::Engine as _;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use wt_core::config::{load_toml, save_toml};
use wt_core::error::{ConfigError, WtResult};
use wt_core::time::unix_now_secs;

const KNOWN_HOSTS_FILE: &str = "known_hosts.toml";

/// A trusted host key, keyed by (host, port)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostKeyRecord {
    pub host: String,
    pub port: u16,
    pub key_type: String,
    pub fingerprint: String,
    pub first_seen: u64,
}

/// Result of checking a presented fingerprint against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Fingerprint matches the stored record; proceed silently
    Trusted,
    /// No record for this endpoint; a human decision is required
    Unknown,
    /// A record exists but the fingerprint differs; possible interception
    Mismatch { stored: String },
}

/// On-disk file format
#[derive(Debug, Default, Serialize, Deserialize)]
struct KnownHostsFile {
    #[serde(default)]
    hosts: Vec<HostKeyRecord>,
}

/// Process-wide known-hosts store.
///
/// Concurrent reads, serialized writes; mutations persist before returning.
/// Records never expire on their own.
pub struct KnownHostsStore {
    records: RwLock<HashMap<(String, u16), HostKeyRecord>>,
    path: Option<PathBuf>,
}

impl KnownHostsStore {
    /// Load records from `<config_dir>/known_hosts.toml`
    pub fn load(config_dir: &Path) -> WtResult<Self> {
        let path = config_dir.join(KNOWN_HOSTS_FILE);
        let records = match load_toml::<KnownHostsFile>(&path) {
            Ok(file) => file
                .hosts
                .into_iter()
                .map(|r| ((r.host.clone(), r.port), r))
                .collect(),
            Err(ConfigError::NotFound(_)) => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    /// In-memory store for tests
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Check a presented fingerprint for an endpoint
    pub fn verify(&self, host: &str, port: u16, fingerprint: &str) -> VerifyOutcome {
        match self
            .records
            .read()
            .get(&(host.to_string(), port))
        {
            Some(record) if record.fingerprint == fingerprint => VerifyOutcome::Trusted,
            Some(record) => VerifyOutcome::Mismatch {
                stored: record.fingerprint.clone(),
            },
            None => VerifyOutcome::Unknown,
        }
    }

    /// Persist a fingerprint after an explicit accept-persist decision.
    ///
    /// Overwrites any existing record for the endpoint; this is the only
    /// path by which a changed key becomes trusted.
    pub fn record(&self, host: &str, port: u16, key_type: &str, fingerprint: &str) -> WtResult<()> {
        let record = HostKeyRecord {
            host: host.to_string(),
            port,
            key_type: key_type.to_string(),
            fingerprint: fingerprint.to_string(),
            first_seen: unix_now_secs(),
        };

        let mut records = self.records.write();
        records.insert((host.to_string(), port), record);
        self.persist(&records)?;

        tracing::info!(host, port, key_type, "trusted host key persisted");
        Ok(())
    }

    /// Drop the record for an endpoint, e.g. after a legitimate re-key.
    /// Returns whether a record existed.
    pub fn forget(&self, host: &str, port: u16) -> WtResult<bool> {
        let mut records = self.records.write();
        let removed = records.remove(&(host.to_string(), port)).is_some();
        if removed {
            self.persist(&records)?;
            tracing::info!(host, port, "host key record removed");
        }
        Ok(removed)
    }

    fn persist(&self, records: &HashMap<(String, u16), HostKeyRecord>) -> WtResult<()> {
        if let Some(path) = &self.path {
            let file = KnownHostsFile {
                hosts: records.values().cloned().collect(),
            };
            save_toml(path, &file)?;
        }
        Ok(())
    }
}

/// Compute the OpenSSH-style `SHA256:<base64>` fingerprint of raw key bytes
pub fn fingerprint_sha256(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    let b64 = base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest);
    format!("SHA256:{}", b64)
}
