//! Client facade
//!
//! [`ShellClient`] is the one entry point the UI layer talks to. Commands
//! return synchronously; all connect and I/O work happens on per-session
//! driver tasks, and results come back through the [`EventBus`].

use std::sync::Arc;
use std::time::Duration;

use wt_core::error::{NotFound, WtError, WtResult};
use wt_core::history::HistoryStore;
use wt_core::profile::{AuthMethod, HostKeyPolicy, Profile, ProfileStore};
use wt_core::types::SessionId;
use wt_secrets::{KnownHostsStore, SecretKey, SecretStore};

use crate::events::{EventBus, SessionEvent};
use crate::registry::SessionRegistry;
use crate::session::{
    HostKeyDecision, SessionDriver, SessionHandle, SessionInfo, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_DECISION_TIMEOUT,
};
use crate::transport::{Credential, Endpoint, OpenConfig, Transport};

/// Connection parameters for a one-off session without a saved profile
#[derive(Debug, Clone)]
pub struct AdhocConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub host_key_policy: HostKeyPolicy,
}

pub struct ShellClient {
    transport: Arc<dyn Transport>,
    secrets: Arc<dyn SecretStore>,
    known_hosts: Arc<KnownHostsStore>,
    profiles: Arc<ProfileStore>,
    history: Arc<HistoryStore>,
    registry: Arc<SessionRegistry>,
    bus: Arc<EventBus>,
    connect_timeout: Duration,
    decision_timeout: Duration,
}

impl ShellClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        secrets: Arc<dyn SecretStore>,
        known_hosts: Arc<KnownHostsStore>,
        profiles: Arc<ProfileStore>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            transport,
            secrets,
            known_hosts,
            profiles,
            history,
            registry: Arc::new(SessionRegistry::new()),
            bus: Arc::new(EventBus::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            decision_timeout: DEFAULT_DECISION_TIMEOUT,
        }
    }

    /// Override the connect and host-key decision windows (mainly for tests)
    pub fn with_timeouts(mut self, connect: Duration, decision: Duration) -> Self {
        self.connect_timeout = connect;
        self.decision_timeout = decision;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn known_hosts(&self) -> &Arc<KnownHostsStore> {
        &self.known_hosts
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    /// Subscribe a handler for a session's events, replacing any previous one
    pub fn subscribe<F>(&self, session_id: SessionId, handler: F)
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(session_id, handler);
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    pub fn session_info(&self, id: &SessionId) -> WtResult<SessionInfo> {
        Ok(self.get(id)?.info())
    }

    /// Open a session from a saved profile. Returns the new id immediately;
    /// connection progress arrives as events.
    pub fn open_profile(&self, profile_id: &str) -> WtResult<SessionId> {
        let profile = self
            .profiles
            .get(profile_id)
            .ok_or_else(|| NotFound::Profile(profile_id.to_string()))?;
        let credential = self.resolve_credential(&profile.auth_method)?;
        let policy = profile.options.host_key_policy;
        Ok(self.start_session(
            profile_open_config(&profile),
            credential,
            policy,
            Some(profile.id),
            0,
            None,
        ))
    }

    /// Open a one-off session with explicit parameters
    pub fn open_adhoc(&self, config: AdhocConfig) -> WtResult<SessionId> {
        let open = OpenConfig::direct(Endpoint {
            host: config.host,
            port: config.port,
            username: config.username,
        });
        Ok(self.start_session(open, config.credential, config.host_key_policy, None, 0, None))
    }

    /// Queue input bytes for a connected session
    pub fn send(&self, id: &SessionId, data: &[u8]) -> WtResult<()> {
        self.get(id)?.send(data)
    }

    /// Queue a terminal resize for a connected session
    pub fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> WtResult<()> {
        self.get(id)?.resize(cols, rows)
    }

    /// Answer a pending host-key prompt
    pub fn host_key_decision(&self, id: &SessionId, decision: HostKeyDecision) -> WtResult<()> {
        self.get(id)?.resolve_host_key(decision)
    }

    /// Close a session.
    ///
    /// The driver is cancelled, the session lands in `Disconnected`, and the
    /// subscriber is removed; no event reaches a handler under this id after
    /// this call returns. Closing an already-terminal session is a no-op.
    pub fn close(&self, id: &SessionId) -> WtResult<()> {
        let handle = self.get(id)?;
        handle.cancel();
        if handle.mark_disconnected("user requested") {
            self.bus.publish(SessionEvent::StateChanged {
                session_id: id.clone(),
                state: wt_core::types::SessionState::Disconnected,
            });
            self.bus.publish(SessionEvent::Closed {
                session_id: id.clone(),
                reason: "user requested".to_string(),
            });
        }
        self.bus.unsubscribe(id);
        Ok(())
    }

    /// Drop a terminal session from the registry
    pub fn remove_session(&self, id: &SessionId) -> WtResult<()> {
        let handle = self.get(id)?;
        if !handle.state().is_terminal() {
            return Err(WtError::Validation(
                "session is still active; close it first".to_string(),
            ));
        }
        self.registry.remove(id);
        self.bus.unsubscribe(id);
        Ok(())
    }

    /// Delete a profile, void every secret it references, and clear its
    /// cached scrollback
    pub fn delete_profile(&self, profile_id: &str) -> WtResult<()> {
        let profile = self.profiles.remove(profile_id)?;
        let _ = self.history.clear(profile_id);

        if let Ok(key) = SecretKey::password(profile_id) {
            let _ = self.secrets.delete(&key);
        }
        match &profile.auth_method {
            AuthMethod::Password { password_key } => {
                if let Ok(key) = SecretKey::parse(password_key) {
                    let _ = self.secrets.delete(&key);
                }
            }
            AuthMethod::Key { key_id } => {
                if let Ok(key) = SecretKey::parse(key_id) {
                    let _ = self.secrets.delete(&key);
                    if let Ok(pass) = SecretKey::passphrase(key.owner()) {
                        let _ = self.secrets.delete(&pass);
                    }
                }
            }
            AuthMethod::Agent => {}
        }

        tracing::info!(profile = profile_id, "profile deleted, secrets voided");
        Ok(())
    }

    /// Resolve an auth method into credential material, immediately before
    /// the connect that consumes it
    pub(crate) fn resolve_credential(&self, auth: &AuthMethod) -> WtResult<Credential> {
        match auth {
            AuthMethod::Password { password_key } => {
                let key = SecretKey::parse(password_key)?;
                let value = self
                    .secrets
                    .retrieve(&key)?
                    .ok_or_else(|| NotFound::Secret(key.to_string()))?;
                Ok(Credential::Password(value))
            }
            AuthMethod::Key { key_id } => {
                let key = SecretKey::parse(key_id)?;
                let material = self
                    .secrets
                    .retrieve(&key)?
                    .ok_or_else(|| NotFound::Secret(key.to_string()))?;
                // A missing passphrase means an unencrypted key
                let passphrase = SecretKey::passphrase(key.owner())
                    .and_then(|k| self.secrets.retrieve(&k))
                    .unwrap_or(None);
                Ok(Credential::PrivateKey {
                    key: material,
                    passphrase,
                })
            }
            AuthMethod::Agent => Ok(Credential::Agent),
        }
    }

    /// Register a new session and spawn its driver.
    ///
    /// When `rebind_from` is set, the subscriber of that old session is moved
    /// to the new id before the driver starts, so no early event is lost.
    pub(crate) fn start_session(
        &self,
        config: OpenConfig,
        credential: Credential,
        policy: HostKeyPolicy,
        profile_id: Option<String>,
        reconnect_attempts: u32,
        rebind_from: Option<&SessionId>,
    ) -> SessionId {
        let (handle, command_rx) = SessionHandle::new(config, profile_id, reconnect_attempts);
        let id = handle.id.clone();
        self.registry.insert(handle.clone());

        if let Some(old) = rebind_from {
            self.bus.rebind(old, id.clone());
        }

        let driver = SessionDriver {
            handle,
            bus: self.bus.clone(),
            known_hosts: self.known_hosts.clone(),
            transport: self.transport.clone(),
            policy,
            connect_timeout: self.connect_timeout,
            decision_timeout: self.decision_timeout,
        };
        driver.spawn(credential, command_rx);
        id
    }

    pub(crate) fn get(&self, id: &SessionId) -> WtResult<Arc<SessionHandle>> {
        self.registry
            .get(id)
            .ok_or_else(|| NotFound::Session(id.to_string()).into())
    }
}

pub(crate) fn profile_open_config(profile: &Profile) -> OpenConfig {
    OpenConfig {
        endpoint: Endpoint {
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
        },
        jump_hosts: profile.jump_hosts.clone(),
        options: profile.options.clone(),
    }
}
