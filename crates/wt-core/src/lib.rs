//! wt-core: Core abstractions for Wardterm
//!
//! This crate provides the shared domain types, the error taxonomy, and the
//! profile store used by the session and security-boundary crates.

pub mod config;
pub mod error;
pub mod history;
pub mod profile;
pub mod time;
pub mod types;

pub use error::{WtError, WtResult};
pub use types::{SessionId, SessionState, TerminalSize};
