//! Session handle and driver
//!
//! Every session is owned by exactly one driver task. The handle is the
//! shared, cheaply-clonable view: it holds the state cell, the command queue
//! into the driver, and the cancellation token. All transport I/O happens on
//! the driver side, so commands from the UI thread never block on the
//! network.
//!
//! State transitions are monotonic. Once a session reaches `Disconnected` or
//! `Error` it stays there; [`SessionHandle::transition`] refuses to leave a
//! terminal state, which is what makes racing writers (driver vs. `close`)
//! safe to resolve by "first terminal transition wins".

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use wt_core::error::{sanitize_message, HostKeyError, SessionError, WtError, WtResult};
use wt_core::profile::HostKeyPolicy;
use wt_core::time::unix_now_secs;
use wt_core::types::{SessionId, SessionState};
use wt_secrets::{KnownHostsStore, VerifyOutcome};

use crate::events::{EventBus, SessionEvent};
use crate::transport::{
    Credential, Endpoint, OpenConfig, PendingChannel as _, PresentedHostKey, ShellChannel as _,
    Transport,
};

/// Upper bound on one connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a host-key prompt may stay unanswered
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(60);

const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Reason a session ended without an error
const REASON_USER_REQUESTED: &str = "user requested";
const REASON_REMOTE_CLOSED: &str = "connection closed";

/// Answer to a host-key prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyDecision {
    /// Proceed for this session only; nothing is persisted
    AcceptOnce,
    /// Proceed and record the fingerprint as trusted
    AcceptPersist,
    /// Abort the connection
    Reject,
}

/// Commands the UI side queues into the driver
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Write(Vec<u8>),
    Resize(u16, u16),
}

/// Snapshot of a session for the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub state: SessionState,
    pub profile_id: Option<String>,
    pub connected_at: Option<u64>,
    pub disconnected_at: Option<u64>,
    pub disconnect_reason: Option<String>,
    pub error_message: Option<String>,
    pub reconnect_attempts: u32,
}

/// Shared view of a live session
pub struct SessionHandle {
    pub id: SessionId,
    pub config: OpenConfig,
    pub profile_id: Option<String>,

    state: RwLock<SessionState>,
    connected_at: RwLock<Option<u64>>,
    disconnected_at: RwLock<Option<u64>>,
    disconnect_reason: RwLock<Option<String>>,
    error_message: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,

    command_tx: Mutex<Option<mpsc::Sender<SessionCommand>>>,
    hostkey_tx: Mutex<Option<oneshot::Sender<HostKeyDecision>>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(
        config: OpenConfig,
        profile_id: Option<String>,
        reconnect_attempts: u32,
    ) -> (Arc<Self>, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let handle = Arc::new(Self {
            id: SessionId::generate(),
            config,
            profile_id,
            state: RwLock::new(SessionState::Created),
            connected_at: RwLock::new(None),
            disconnected_at: RwLock::new(None),
            disconnect_reason: RwLock::new(None),
            error_message: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(reconnect_attempts),
            command_tx: Mutex::new(Some(command_tx)),
            hostkey_tx: Mutex::new(None),
            cancel: CancellationToken::new(),
        });
        (handle, command_rx)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            host: self.endpoint().host.clone(),
            port: self.endpoint().port,
            username: self.endpoint().username.clone(),
            state: self.state(),
            profile_id: self.profile_id.clone(),
            connected_at: *self.connected_at.read(),
            disconnected_at: *self.disconnected_at.read(),
            disconnect_reason: self.disconnect_reason.read().clone(),
            error_message: self.error_message.read().clone(),
            reconnect_attempts: self.reconnect_attempts(),
        }
    }

    /// Advance the state machine. Returns `false` when the session is
    /// already terminal; terminal states are never left.
    pub(crate) fn transition(&self, to: SessionState) -> bool {
        let mut state = self.state.write();
        if state.is_terminal() {
            return false;
        }
        tracing::debug!(session = %self.id, from = %*state, to = %to, "state transition");
        *state = to;
        true
    }

    pub(crate) fn mark_connected(&self) -> bool {
        if self.transition(SessionState::Connected) {
            *self.connected_at.write() = Some(unix_now_secs());
            true
        } else {
            false
        }
    }

    /// Terminal transition to `Disconnected`. First caller wins.
    pub(crate) fn mark_disconnected(&self, reason: &str) -> bool {
        if self.transition(SessionState::Disconnected) {
            *self.disconnect_reason.write() = Some(reason.to_string());
            *self.disconnected_at.write() = Some(unix_now_secs());
            self.teardown();
            true
        } else {
            false
        }
    }

    /// Terminal transition to `Error`. First caller wins.
    pub(crate) fn mark_error(&self, message: &str) -> bool {
        if self.transition(SessionState::Error) {
            *self.error_message.write() = Some(message.to_string());
            *self.disconnected_at.write() = Some(unix_now_secs());
            self.teardown();
            true
        } else {
            false
        }
    }

    fn teardown(&self) {
        self.command_tx.lock().take();
        self.hostkey_tx.lock().take();
    }

    /// Record why a later reconnect attempt failed, without changing state
    pub(crate) fn note_reconnect_failure(&self, message: &str) {
        *self.disconnect_reason.write() = Some(message.to_string());
    }

    pub(crate) fn bump_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Queue input bytes for the remote shell
    pub fn send(&self, data: &[u8]) -> WtResult<()> {
        self.queue(SessionCommand::Write(data.to_vec()))
    }

    /// Queue a terminal resize
    pub fn resize(&self, cols: u16, rows: u16) -> WtResult<()> {
        self.queue(SessionCommand::Resize(cols, rows))
    }

    fn queue(&self, command: SessionCommand) -> WtResult<()> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(SessionError::NotConnected(state).into());
        }
        let guard = self.command_tx.lock();
        let tx = guard.as_ref().ok_or(SessionError::Stopped)?;
        tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WtError::from(SessionError::QueueFull),
            mpsc::error::TrySendError::Closed(_) => WtError::from(SessionError::Stopped),
        })
    }

    /// Deliver the user's answer to a pending host-key prompt
    pub fn resolve_host_key(&self, decision: HostKeyDecision) -> WtResult<()> {
        let tx = self.hostkey_tx.lock().take().ok_or_else(|| {
            WtError::Validation("no host key decision is pending for this session".to_string())
        })?;
        tx.send(decision)
            .map_err(|_| WtError::from(SessionError::Stopped))
    }

    /// Ask the driver to stop. Idempotent.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Owns the connect/verify/authenticate/serve lifecycle of one session
pub(crate) struct SessionDriver {
    pub handle: Arc<SessionHandle>,
    pub bus: Arc<EventBus>,
    pub known_hosts: Arc<KnownHostsStore>,
    pub transport: Arc<dyn Transport>,
    pub policy: HostKeyPolicy,
    pub connect_timeout: Duration,
    pub decision_timeout: Duration,
}

/// What the I/O loop selected
enum LoopAction {
    Cancelled,
    Command(Option<SessionCommand>),
    Output(WtResult<Option<bytes::Bytes>>),
}

impl SessionDriver {
    pub fn spawn(self, credential: Credential, command_rx: mpsc::Receiver<SessionCommand>) {
        tokio::spawn(async move {
            self.run(credential, command_rx).await;
        });
    }

    async fn run(self, credential: Credential, command_rx: mpsc::Receiver<SessionCommand>) {
        match self.connect_and_serve(credential, command_rx).await {
            Ok(reason) => self.finish_disconnected(&reason),
            Err(err) => self.finish_failed(err),
        }
    }

    async fn connect_and_serve(
        &self,
        credential: Credential,
        mut command_rx: mpsc::Receiver<SessionCommand>,
    ) -> WtResult<String> {
        let handle = &self.handle;
        self.set_state(SessionState::Connecting);
        tracing::info!(
            session = %handle.id,
            endpoint = %handle.endpoint(),
            hops = handle.config.jump_hosts.len(),
            "connecting"
        );

        let open = tokio::time::timeout(self.connect_timeout, self.transport.open(&handle.config));
        let pending = tokio::select! {
            _ = handle.cancel.cancelled() => return Ok(REASON_USER_REQUESTED.to_string()),
            result = open => match result {
                Err(_) => return Err(SessionError::ConnectTimeout.into()),
                Ok(opened) => opened?,
            },
        };

        let presented = pending.server_key();
        if !self.check_host_key(&presented).await? {
            return Ok(REASON_USER_REQUESTED.to_string());
        }

        let mut channel = pending
            .authenticate(&handle.endpoint().username, credential)
            .await?;

        if !handle.mark_connected() {
            let _ = channel.close().await;
            return Ok(REASON_USER_REQUESTED.to_string());
        }
        self.bus.publish(SessionEvent::StateChanged {
            session_id: handle.id.clone(),
            state: SessionState::Connected,
        });
        tracing::info!(session = %handle.id, "connected");

        loop {
            let action = tokio::select! {
                _ = handle.cancel.cancelled() => LoopAction::Cancelled,
                command = command_rx.recv() => LoopAction::Command(command),
                chunk = channel.read() => LoopAction::Output(chunk),
            };

            match action {
                LoopAction::Cancelled | LoopAction::Command(None) => {
                    let _ = channel.close().await;
                    return Ok(REASON_USER_REQUESTED.to_string());
                }
                LoopAction::Command(Some(SessionCommand::Write(data))) => {
                    channel.write(&data).await?;
                }
                LoopAction::Command(Some(SessionCommand::Resize(cols, rows))) => {
                    channel.resize(cols, rows).await?;
                }
                LoopAction::Output(Ok(Some(data))) => {
                    self.bus.publish(SessionEvent::Data {
                        session_id: handle.id.clone(),
                        data,
                    });
                }
                LoopAction::Output(Ok(None)) => {
                    return Ok(REASON_REMOTE_CLOSED.to_string());
                }
                LoopAction::Output(Err(err)) => return Err(err),
            }
        }
    }

    /// Gate on the presented host key.
    ///
    /// Returns `Ok(false)` when the session was cancelled while waiting for
    /// a decision; the caller treats that as a clean user-requested close.
    async fn check_host_key(&self, presented: &PresentedHostKey) -> WtResult<bool> {
        let handle = &self.handle;
        let host = &handle.endpoint().host;
        let port = handle.endpoint().port;

        if self.policy == HostKeyPolicy::Accept {
            tracing::warn!(
                session = %handle.id,
                host,
                port,
                "host key verification skipped (insecure accept policy)"
            );
            return Ok(true);
        }

        let outcome = self.known_hosts.verify(host, port, &presented.fingerprint);
        let needs_decision = match (&outcome, self.policy) {
            (VerifyOutcome::Trusted, HostKeyPolicy::Strict) => false,
            // Ask re-prompts even for a trusted key
            (VerifyOutcome::Trusted, _) => true,
            (VerifyOutcome::Unknown, _) => true,
            (VerifyOutcome::Mismatch { stored }, HostKeyPolicy::Strict) => {
                tracing::error!(
                    session = %handle.id,
                    host,
                    port,
                    stored = %stored,
                    presented = %presented.fingerprint,
                    "host key mismatch"
                );
                return Err(HostKeyError::Mismatch {
                    host: host.clone(),
                    port,
                }
                .into());
            }
            (VerifyOutcome::Mismatch { .. }, _) => true,
        };
        if !needs_decision {
            return Ok(true);
        }

        self.set_state(SessionState::WaitingForHostKey);
        let (tx, rx) = oneshot::channel();
        *handle.hostkey_tx.lock() = Some(tx);
        self.bus.publish(SessionEvent::HostKeyRequest {
            session_id: handle.id.clone(),
            host: host.clone(),
            port,
            key_type: presented.key_type.clone(),
            fingerprint: presented.fingerprint.clone(),
        });

        let decision = tokio::select! {
            _ = handle.cancel.cancelled() => return Ok(false),
            decision = rx => decision.map_err(|_| HostKeyError::DecisionTimeout)?,
            _ = tokio::time::sleep(self.decision_timeout) => {
                handle.hostkey_tx.lock().take();
                return Err(HostKeyError::DecisionTimeout.into());
            }
        };

        match decision {
            HostKeyDecision::Reject => Err(HostKeyError::Rejected.into()),
            HostKeyDecision::AcceptOnce => Ok(true),
            HostKeyDecision::AcceptPersist => {
                self.known_hosts
                    .record(host, port, &presented.key_type, &presented.fingerprint)?;
                Ok(true)
            }
        }
    }

    fn set_state(&self, state: SessionState) -> bool {
        if self.handle.transition(state) {
            self.bus.publish(SessionEvent::StateChanged {
                session_id: self.handle.id.clone(),
                state,
            });
            true
        } else {
            false
        }
    }

    fn finish_disconnected(&self, reason: &str) {
        if self.handle.mark_disconnected(reason) {
            tracing::info!(session = %self.handle.id, reason, "disconnected");
            self.bus.publish(SessionEvent::StateChanged {
                session_id: self.handle.id.clone(),
                state: SessionState::Disconnected,
            });
            self.bus.publish(SessionEvent::Closed {
                session_id: self.handle.id.clone(),
                reason: reason.to_string(),
            });
        }
    }

    fn finish_failed(&self, err: WtError) {
        match err {
            // Network-level failures end the session cleanly and leave it
            // eligible for reconnect
            WtError::Transport(message) => {
                self.finish_disconnected(&sanitize_message(&message));
            }
            other => {
                let message = sanitize_message(&other.to_string());
                if self.handle.mark_error(&message) {
                    tracing::warn!(session = %self.handle.id, %message, "session failed");
                    self.bus.publish(SessionEvent::StateChanged {
                        session_id: self.handle.id.clone(),
                        state: SessionState::Error,
                    });
                    self.bus.publish(SessionEvent::Error {
                        session_id: self.handle.id.clone(),
                        message,
                    });
                }
            }
        }
    }
}
