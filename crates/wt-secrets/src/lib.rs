//! wt-secrets: Security-boundary leaves for Wardterm
//!
//! Two concerns live here: the secret store gateway (a validated facade over
//! the OS keychain) and the trust-on-first-use host identity verifier.

pub mod key;
pub mod known_hosts;
pub mod store;

pub use key::{SecretKey, SecretKind};
pub use known_hosts::{fingerprint_sha256, HostKeyRecord, KnownHostsStore, VerifyOutcome};
pub use store::{KeyringStore, MemoryStore, SecretStore};
