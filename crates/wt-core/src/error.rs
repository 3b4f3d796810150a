//! Error types for the Wardterm backend
//!
//! Validation and permission errors are rejected before any side effect and
//! are never retried. Transport errors drive a session into `Disconnected`
//! (a reconnect may retry). Host-key errors halt progress until a human
//! decision is made. Everything crossing the session/secret boundary goes
//! through [`sanitize_message`] so credential material cannot surface.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::SessionState;

/// Upper bound on error messages that cross the session/secret boundary.
const MAX_MESSAGE_LEN: usize = 160;

/// Top-level error type for the Wardterm backend
#[derive(Error, Debug)]
pub enum WtError {
    /// Malformed key or identifier, rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote rejected the presented credential
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Host identity could not be verified
    #[error("Host key error: {0}")]
    HostKey(#[from] HostKeyError),

    /// Network-level failure in the transport collaborator
    #[error("Transport error: {0}")]
    Transport(String),

    /// Extension lacks a granted capability
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Session, profile, secret, or extension absent
    #[error("{0}")]
    NotFound(#[from] NotFound),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Secret store backend failure (message already redacted)
    #[error("Secret store error: {0}")]
    Secret(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host-key verification failures
#[derive(Error, Debug)]
pub enum HostKeyError {
    /// User rejected the presented key
    #[error("host key rejected")]
    Rejected,

    /// Stored fingerprint differs from the presented one
    #[error("host key mismatch for {host}:{port} - possible interception")]
    Mismatch { host: String, port: u16 },

    /// No decision arrived within the decision window
    #[error("host key decision timed out")]
    DecisionTimeout,

    /// The transport presented no server key
    #[error("no host key presented by server")]
    Missing,
}

/// Lookup failures
#[derive(Error, Debug)]
pub enum NotFound {
    #[error("Session not found: {0}")]
    Session(String),

    #[error("Profile not found: {0}")]
    Profile(String),

    #[error("Secret not found: {0}")]
    Secret(String),

    #[error("Extension not found: {0}")]
    Extension(String),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// `send`/`resize` called while the session is not connected.
    /// Callers use this to offer a reconnect instead of silently dropping.
    #[error("session is not connected (state: {0})")]
    NotConnected(SessionState),

    /// The driver's command queue is full
    #[error("session command queue full")]
    QueueFull,

    /// The driver task is gone
    #[error("session driver stopped")]
    Stopped,

    /// The connect attempt exceeded its upper bound
    #[error("timed out")]
    ConnectTimeout,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type WtResult<T> = Result<T, WtError>;

/// Truncate an error message before it crosses the session/secret boundary.
///
/// Backend errors (keyring, transport) can embed paths or account details;
/// they are capped so nothing resembling credential material reaches a log,
/// toast, or event payload.
pub fn sanitize_message(msg: &str) -> String {
    if msg.len() > MAX_MESSAGE_LEN {
        let cut: String = msg.chars().take(MAX_MESSAGE_LEN).collect();
        format!("{}...", cut)
    } else {
        msg.to_string()
    }
}
