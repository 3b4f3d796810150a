//! Extension request dispatch
//!
//! Every host-facing action an extension takes arrives here as a typed
//! request. The dispatcher validates the entry point, checks the live grant
//! for the capability the request needs, and only then either performs the
//! action (terminal input goes straight to the session layer) or returns an
//! approved effect for the host chrome to execute (notifications, clipboard,
//! file and network access live outside this crate).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use wt_core::error::{WtError, WtResult};
use wt_core::types::SessionId;

use crate::client::ShellClient;

use super::{broker::PermissionBroker, Capability};

const MAX_ENTRY_POINT_LEN: usize = 128;

/// Validate an extension entry-point name.
///
/// Entry points are identifiers (`[A-Za-z_][A-Za-z0-9_]*`, at most 128
/// characters). Anything else is rejected before it could reach an
/// interpreter.
pub fn validate_entry_point(name: &str) -> WtResult<()> {
    if name.is_empty() || name.len() > MAX_ENTRY_POINT_LEN {
        return Err(WtError::Validation(format!(
            "entry point must be 1-{} characters",
            MAX_ENTRY_POINT_LEN
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('\0');
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(WtError::Validation(
            "entry point must start with a letter or underscore".to_string(),
        ));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(WtError::Validation(
            "entry point may only contain [A-Za-z0-9_]".to_string(),
        ));
    }
    Ok(())
}

/// A host-facing action requested by an extension
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ExtensionRequest {
    /// Write input to a session's remote shell
    SendInput { session_id: String, data: String },
    /// Show a desktop notification
    Notify { title: String, body: String },
    /// Read the system clipboard
    ReadClipboard,
    /// Replace the system clipboard contents
    SetClipboard { text: String },
    /// Write a file on the local machine
    WriteFile { path: String, contents: String },
    /// Fetch a URL
    Fetch { url: String },
    /// Run a local command
    RunCommand { command: String },
}

impl ExtensionRequest {
    /// The capability this request needs
    pub fn required_capability(&self) -> Capability {
        match self {
            ExtensionRequest::SendInput { .. } => Capability::Terminal,
            ExtensionRequest::Notify { .. } => Capability::Notifications,
            ExtensionRequest::ReadClipboard | ExtensionRequest::SetClipboard { .. } => {
                Capability::Clipboard
            }
            ExtensionRequest::WriteFile { .. } => Capability::Filesystem,
            ExtensionRequest::Fetch { .. } => Capability::Network,
            ExtensionRequest::RunCommand { .. } => Capability::Shell,
        }
    }
}

/// An action that passed the permission check.
///
/// `Done` means the dispatcher performed it; the other variants are handed
/// back to the host chrome, which owns the actual clipboard, notification,
/// filesystem, and network surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantedEffect {
    Done,
    Notify { title: String, body: String },
    ReadClipboard,
    SetClipboard { text: String },
    WriteFile { path: String, contents: String },
    Fetch { url: String },
    RunCommand { command: String },
}

/// Checks and routes extension requests
pub struct ExtensionDispatcher {
    broker: Arc<PermissionBroker>,
    client: Arc<ShellClient>,
}

impl ExtensionDispatcher {
    pub fn new(broker: Arc<PermissionBroker>, client: Arc<ShellClient>) -> Self {
        Self { broker, client }
    }

    pub fn broker(&self) -> &Arc<PermissionBroker> {
        &self.broker
    }

    /// Dispatch a request on behalf of `extension_id`'s `entry_point`.
    ///
    /// Validation and the permission check happen before any part of the
    /// request executes; a denied request has no side effect.
    pub fn dispatch(
        &self,
        extension_id: &str,
        entry_point: &str,
        request: ExtensionRequest,
    ) -> WtResult<GrantedEffect> {
        validate_entry_point(entry_point)?;
        self.broker.check(extension_id, request.required_capability())?;

        tracing::debug!(
            extension = extension_id,
            entry_point,
            capability = %request.required_capability(),
            "extension request approved"
        );

        match request {
            ExtensionRequest::SendInput { session_id, data } => {
                let id = SessionId::from(session_id);
                self.client.send(&id, data.as_bytes())?;
                Ok(GrantedEffect::Done)
            }
            ExtensionRequest::Notify { title, body } => Ok(GrantedEffect::Notify { title, body }),
            ExtensionRequest::ReadClipboard => Ok(GrantedEffect::ReadClipboard),
            ExtensionRequest::SetClipboard { text } => Ok(GrantedEffect::SetClipboard { text }),
            ExtensionRequest::WriteFile { path, contents } => {
                Ok(GrantedEffect::WriteFile { path, contents })
            }
            ExtensionRequest::Fetch { url } => Ok(GrantedEffect::Fetch { url }),
            ExtensionRequest::RunCommand { command } => Ok(GrantedEffect::RunCommand { command }),
        }
    }
}
