//! Extension security boundary
//!
//! Extensions are untrusted. Everything they do against the host goes
//! through a declared-capability check in [`broker::PermissionBroker`] and a
//! request dispatch in [`request::ExtensionDispatcher`]; nothing in this
//! module ever hands an extension a raw session or secret handle.

pub mod broker;
pub mod request;

pub use broker::{ExtensionGrant, PermissionBroker};
pub use request::{validate_entry_point, ExtensionDispatcher, ExtensionRequest, GrantedEffect};

use serde::{Deserialize, Serialize};
use std::fmt;

use wt_core::error::{WtError, WtResult};

const MAX_IDENTIFIER_LEN: usize = 128;

/// Capabilities an extension may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Network,
    Filesystem,
    Clipboard,
    Notifications,
    Terminal,
    Shell,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Network => "network",
            Capability::Filesystem => "filesystem",
            Capability::Clipboard => "clipboard",
            Capability::Notifications => "notifications",
            Capability::Terminal => "terminal",
            Capability::Shell => "shell",
        }
    }

    /// Capabilities that warrant an extra warning in the grant UI
    pub fn is_dangerous(self) -> bool {
        matches!(self, Capability::Shell)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared metadata of an installed extension.
///
/// `capabilities` is the *requested* set; nothing is granted until the user
/// enables the extension with an explicit grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl ExtensionManifest {
    /// Parse and validate a manifest from its JSON form
    pub fn from_json(raw: &str) -> WtResult<Self> {
        let manifest: Self = serde_json::from_str(raw)
            .map_err(|e| WtError::Validation(format!("invalid extension manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject malformed ids and entry points before registration
    pub fn validate(&self) -> WtResult<()> {
        validate_identifier(&self.id, "extension id")?;
        for entry_point in &self.entry_points {
            validate_entry_point(entry_point)?;
        }
        Ok(())
    }
}

fn validate_identifier(value: &str, what: &str) -> WtResult<()> {
    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN {
        return Err(WtError::Validation(format!(
            "{} must be 1-{} characters",
            what, MAX_IDENTIFIER_LEN
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WtError::Validation(format!(
            "{} may only contain [A-Za-z0-9_-]",
            what
        )));
    }
    Ok(())
}
