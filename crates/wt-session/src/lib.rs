//! wt-session: session management and security boundary for Wardterm
//!
//! The UI layer talks to [`ShellClient`]; the wire protocol plugs in behind
//! the [`transport`] traits. Between them sit the session state machine and
//! registry, the trust-on-first-use host-key gate, the per-session event
//! bus, the reconnection coordinator, and the extension permission broker.

pub mod client;
pub mod events;
pub mod ext;
pub mod registry;
pub mod session;
pub mod transport;

mod reconnect;

pub use client::{AdhocConfig, ShellClient};
pub use events::{EventBus, SessionEvent};
pub use ext::{
    Capability, ExtensionDispatcher, ExtensionGrant, ExtensionManifest, ExtensionRequest,
    GrantedEffect, PermissionBroker,
};
pub use registry::SessionRegistry;
pub use session::{
    HostKeyDecision, SessionHandle, SessionInfo, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DECISION_TIMEOUT,
};
pub use transport::{
    Credential, Endpoint, OpenConfig, PendingChannel, PresentedHostKey, ShellChannel, Transport,
};
