//! Validated secret-store keys
//!
//! Every key entering the secret store has the shape `<kind>:<ownerId>`,
//! with `kind` drawn from a closed set and `ownerId` restricted to
//! `[A-Za-z0-9_-]`. Construction is the only way in, so a malformed key
//! fails closed before any store lookup is attempted. This keeps callers
//! (including extensions and the UI layer) from resolving arbitrary
//! keychain entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use wt_core::error::{WtError, WtResult};

const MAX_OWNER_LEN: usize = 128;

/// Closed set of secret namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// Login password, owned by a profile id
    Password,
    /// Private key material, owned by a key id
    Key,
    /// Key passphrase, owned by a key id
    Passphrase,
    /// User-imported personal key, owned by a key id
    PersonalKey,
}

impl SecretKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecretKind::Password => "password",
            SecretKind::Key => "key",
            SecretKind::Passphrase => "passphrase",
            SecretKind::PersonalKey => "personal_key",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretKind {
    type Err = WtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(SecretKind::Password),
            "key" => Ok(SecretKind::Key),
            "passphrase" => Ok(SecretKind::Passphrase),
            "personal_key" => Ok(SecretKind::PersonalKey),
            other => Err(WtError::Validation(format!(
                "unknown secret kind: {}",
                other.chars().take(32).collect::<String>()
            ))),
        }
    }
}

/// A validated `<kind>:<ownerId>` secret-store key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretKey {
    kind: SecretKind,
    owner: String,
}

impl SecretKey {
    /// Build a key, validating the owner id
    pub fn new(kind: SecretKind, owner: impl Into<String>) -> WtResult<Self> {
        let owner = owner.into();
        validate_owner(&owner)?;
        Ok(Self { kind, owner })
    }

    /// Parse a `<kind>:<ownerId>` string
    pub fn parse(raw: &str) -> WtResult<Self> {
        let (kind, owner) = raw.split_once(':').ok_or_else(|| {
            WtError::Validation("secret key must have the form <kind>:<ownerId>".to_string())
        })?;
        Self::new(kind.parse::<SecretKind>()?, owner)
    }

    pub fn password(owner: impl Into<String>) -> WtResult<Self> {
        Self::new(SecretKind::Password, owner)
    }

    pub fn key(owner: impl Into<String>) -> WtResult<Self> {
        Self::new(SecretKind::Key, owner)
    }

    pub fn passphrase(owner: impl Into<String>) -> WtResult<Self> {
        Self::new(SecretKind::Passphrase, owner)
    }

    pub fn kind(&self) -> SecretKind {
        self.kind
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.owner)
    }
}

fn validate_owner(owner: &str) -> WtResult<()> {
    if owner.is_empty() || owner.len() > MAX_OWNER_LEN {
        return Err(WtError::Validation(
            "secret owner id must be 1-128 characters".to_string(),
        ));
    }
    if !owner
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WtError::Validation(
            "secret owner id may only contain [A-Za-z0-9_-]".to_string(),
        ));
    }
    Ok(())
}
