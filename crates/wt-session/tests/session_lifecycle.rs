//! End-to-end session lifecycle tests against a scripted in-memory transport

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use wt_core::error::{NotFound, WtError, WtResult};
use wt_core::history::HistoryStore;
use wt_core::profile::{AuthMethod, HostKeyPolicy, JumpHost, Profile, ProfileStore};
use wt_core::types::{SessionId, SessionState};
use wt_secrets::{KnownHostsStore, MemoryStore, SecretKey, SecretStore, VerifyOutcome};
use wt_session::{
    AdhocConfig, Capability, Credential, ExtensionDispatcher, ExtensionManifest, ExtensionRequest,
    GrantedEffect, HostKeyDecision, OpenConfig, PendingChannel, PermissionBroker,
    PresentedHostKey, SessionEvent, ShellChannel, ShellClient, Transport,
};

const FINGERPRINT: &str = "SHA256:gNV6RnYmnCrKAf6a5Hw1NqiQvtZ9zWLJXBXqcA0rR5k";
const KEY_TYPE: &str = "ssh-ed25519";

/// What the next `open` call should do
#[derive(Clone)]
enum OpenPlan {
    /// Hand out a channel that replays `output`, then either stays open or
    /// reports a remote close
    Session {
        output: Vec<&'static str>,
        hold_open: bool,
    },
    TransportError(&'static str),
    AuthReject,
    Hang,
}

struct FakeTransport {
    plans: Mutex<VecDeque<OpenPlan>>,
    opens: AtomicUsize,
    last_config: Mutex<Option<OpenConfig>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    passwords: Arc<Mutex<Vec<String>>>,
}

impl FakeTransport {
    fn new(plans: Vec<OpenPlan>) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into()),
            opens: AtomicUsize::new(0),
            last_config: Mutex::new(None),
            writes: Arc::new(Mutex::new(Vec::new())),
            resizes: Arc::new(Mutex::new(Vec::new())),
            passwords: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, config: &OpenConfig) -> WtResult<Box<dyn PendingChannel>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock() = Some(config.clone());
        let plan = self.plans.lock().pop_front().expect("unplanned open call");
        match plan {
            OpenPlan::TransportError(msg) => Err(WtError::Transport(msg.to_string())),
            OpenPlan::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            plan => Ok(Box::new(FakePending {
                plan,
                writes: self.writes.clone(),
                resizes: self.resizes.clone(),
                passwords: self.passwords.clone(),
            })),
        }
    }
}

struct FakePending {
    plan: OpenPlan,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    passwords: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PendingChannel for FakePending {
    fn server_key(&self) -> PresentedHostKey {
        PresentedHostKey {
            key_type: KEY_TYPE.to_string(),
            fingerprint: FINGERPRINT.to_string(),
        }
    }

    async fn authenticate(
        self: Box<Self>,
        _username: &str,
        credential: Credential,
    ) -> WtResult<Box<dyn ShellChannel>> {
        if let Credential::Password(password) = &credential {
            self.passwords.lock().push(password.clone());
        }
        match self.plan {
            OpenPlan::AuthReject => Err(WtError::Auth("permission denied (password)".to_string())),
            OpenPlan::Session { output, hold_open } => Ok(Box::new(FakeChannel {
                output: output
                    .into_iter()
                    .map(|s| Bytes::from_static(s.as_bytes()))
                    .collect(),
                hold_open,
                writes: self.writes,
                resizes: self.resizes,
            })),
            OpenPlan::TransportError(_) | OpenPlan::Hang => unreachable!(),
        }
    }
}

struct FakeChannel {
    output: VecDeque<Bytes>,
    hold_open: bool,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
}

#[async_trait]
impl ShellChannel for FakeChannel {
    async fn read(&mut self) -> WtResult<Option<Bytes>> {
        if let Some(chunk) = self.output.pop_front() {
            return Ok(Some(chunk));
        }
        if self.hold_open {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    async fn write(&mut self, data: &[u8]) -> WtResult<()> {
        self.writes.lock().push(data.to_vec());
        Ok(())
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> WtResult<()> {
        self.resizes.lock().push((cols, rows));
        Ok(())
    }

    async fn close(&mut self) -> WtResult<()> {
        Ok(())
    }
}

struct Harness {
    client: Arc<ShellClient>,
    transport: Arc<FakeTransport>,
    secrets: Arc<MemoryStore>,
    known_hosts: Arc<KnownHostsStore>,
    profiles: Arc<ProfileStore>,
    _history_dir: tempfile::TempDir,
}

fn harness(plans: Vec<OpenPlan>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let transport = FakeTransport::new(plans);
    let secrets = Arc::new(MemoryStore::new());
    let known_hosts = Arc::new(KnownHostsStore::in_memory());
    let profiles = Arc::new(ProfileStore::in_memory());
    let history_dir = tempfile::tempdir().unwrap();
    let history = Arc::new(HistoryStore::new(history_dir.path()));
    let client = Arc::new(ShellClient::new(
        transport.clone(),
        secrets.clone(),
        known_hosts.clone(),
        profiles.clone(),
        history,
    ));
    Harness {
        client,
        transport,
        secrets,
        known_hosts,
        profiles,
        _history_dir: history_dir,
    }
}

fn adhoc(policy: HostKeyPolicy) -> AdhocConfig {
    AdhocConfig {
        host: "db.internal".to_string(),
        port: 22,
        username: "deploy".to_string(),
        credential: Credential::Password("hunter2".to_string()),
        host_key_policy: policy,
    }
}

fn subscribe(client: &ShellClient, id: &SessionId) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe(id.clone(), move |event| {
        let _ = tx.send(event);
    });
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    rx.recv().await.expect("event stream ended unexpectedly")
}

async fn wait_for_state(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    want: SessionState,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(
            &event,
            SessionEvent::StateChanged { state, .. } if *state == want
        );
        seen.push(event);
        if done {
            return seen;
        }
    }
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_unknown_host_prompts_then_connects() {
    let h = harness(vec![OpenPlan::Session {
        output: vec!["$ "],
        hold_open: false,
    }]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Strict)).unwrap();
    let mut rx = subscribe(&h.client, &id);

    wait_for_state(&mut rx, SessionState::WaitingForHostKey).await;
    let event = next_event(&mut rx).await;
    match event {
        SessionEvent::HostKeyRequest {
            host,
            port,
            key_type,
            fingerprint,
            ..
        } => {
            assert_eq!(host, "db.internal");
            assert_eq!(port, 22);
            assert_eq!(key_type, KEY_TYPE);
            assert_eq!(fingerprint, FINGERPRINT);
        }
        other => panic!("expected host key request, got {:?}", other),
    }

    h.client
        .host_key_decision(&id, HostKeyDecision::AcceptOnce)
        .unwrap();
    wait_for_state(&mut rx, SessionState::Connected).await;

    let event = next_event(&mut rx).await;
    assert!(matches!(event, SessionEvent::Data { ref data, .. } if &data[..] == b"$ "));

    let seen = wait_for_state(&mut rx, SessionState::Disconnected).await;
    assert!(!seen.is_empty());
    let event = next_event(&mut rx).await;
    assert!(
        matches!(event, SessionEvent::Closed { ref reason, .. } if reason == "connection closed")
    );

    // Accept-once persists nothing
    assert_eq!(
        h.known_hosts.verify("db.internal", 22, FINGERPRINT),
        VerifyOutcome::Unknown
    );
}

#[tokio::test(start_paused = true)]
async fn test_accept_persist_records_and_skips_future_prompts() {
    let h = harness(vec![
        OpenPlan::Session {
            output: vec![],
            hold_open: false,
        },
        OpenPlan::Session {
            output: vec![],
            hold_open: false,
        },
    ]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Strict)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::WaitingForHostKey).await;
    h.client
        .host_key_decision(&id, HostKeyDecision::AcceptPersist)
        .unwrap();
    wait_for_state(&mut rx, SessionState::Disconnected).await;

    assert_eq!(
        h.known_hosts.verify("db.internal", 22, FINGERPRINT),
        VerifyOutcome::Trusted
    );

    // Second session to the same endpoint connects silently
    let id2 = h.client.open_adhoc(adhoc(HostKeyPolicy::Strict)).unwrap();
    let mut rx2 = subscribe(&h.client, &id2);
    let seen = wait_for_state(&mut rx2, SessionState::Connected).await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::HostKeyRequest { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_host_key_fails_session() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Strict)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::WaitingForHostKey).await;
    h.client
        .host_key_decision(&id, HostKeyDecision::Reject)
        .unwrap();

    wait_for_state(&mut rx, SessionState::Error).await;
    let event = next_event(&mut rx).await;
    assert!(
        matches!(event, SessionEvent::Error { ref message, .. } if message.contains("host key rejected"))
    );
    // Authentication never ran
    assert!(h.transport.passwords.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mismatch_under_strict_blocks_without_prompt() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);
    h.known_hosts
        .record("db.internal", 22, KEY_TYPE, "SHA256:previously-trusted")
        .unwrap();

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Strict)).unwrap();
    let mut rx = subscribe(&h.client, &id);

    let seen = wait_for_state(&mut rx, SessionState::Error).await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::HostKeyRequest { .. })));
    let event = next_event(&mut rx).await;
    assert!(
        matches!(event, SessionEvent::Error { ref message, .. } if message.contains("mismatch"))
    );
    assert!(h.transport.passwords.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mismatch_under_ask_reprompts() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);
    h.known_hosts
        .record("db.internal", 22, KEY_TYPE, "SHA256:previously-trusted")
        .unwrap();

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Ask)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::WaitingForHostKey).await;
    h.client
        .host_key_decision(&id, HostKeyDecision::AcceptOnce)
        .unwrap();
    wait_for_state(&mut rx, SessionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_accept_policy_skips_verification() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);
    h.known_hosts
        .record("db.internal", 22, KEY_TYPE, "SHA256:previously-trusted")
        .unwrap();

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    let seen = wait_for_state(&mut rx, SessionState::Connected).await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::HostKeyRequest { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_fails_session() {
    let h = harness(vec![OpenPlan::Hang]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);

    wait_for_state(&mut rx, SessionState::Error).await;
    let event = next_event(&mut rx).await;
    assert!(
        matches!(event, SessionEvent::Error { ref message, .. } if message.contains("timed out"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_host_key_prompt_times_out() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Strict)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::WaitingForHostKey).await;

    // Nobody answers; the decision window elapses
    wait_for_state(&mut rx, SessionState::Error).await;
    let event = next_event(&mut rx).await;
    assert!(
        matches!(event, SessionEvent::Error { ref message, .. } if message.contains("timed out"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_reaches_error_state() {
    let h = harness(vec![OpenPlan::AuthReject]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);

    wait_for_state(&mut rx, SessionState::Error).await;
    let event = next_event(&mut rx).await;
    assert!(
        matches!(event, SessionEvent::Error { ref message, .. } if message.contains("Authentication failed"))
    );
    assert_eq!(
        h.client.session_info(&id).unwrap().state,
        SessionState::Error
    );
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_disconnects_cleanly() {
    let h = harness(vec![OpenPlan::TransportError("connection refused")]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);

    let seen = wait_for_state(&mut rx, SessionState::Disconnected).await;
    assert!(!seen.iter().any(|e| matches!(e, SessionEvent::Error { .. })));
    let event = next_event(&mut rx).await;
    assert!(
        matches!(event, SessionEvent::Closed { ref reason, .. } if reason.contains("connection refused"))
    );
    assert_eq!(
        h.client
            .session_info(&id)
            .unwrap()
            .disconnect_reason
            .as_deref(),
        Some("connection refused")
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_and_resize_reach_the_channel() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::Connected).await;

    h.client.send(&id, b"ls\n").unwrap();
    h.client.resize(&id, 120, 40).unwrap();
    settle().await;

    assert_eq!(h.transport.writes.lock().as_slice(), &[b"ls\n".to_vec()]);
    assert_eq!(h.transport.resizes.lock().as_slice(), &[(120u16, 40u16)]);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_clean_and_final() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::Connected).await;

    h.client.close(&id).unwrap();

    wait_for_state(&mut rx, SessionState::Disconnected).await;
    let event = next_event(&mut rx).await;
    assert!(matches!(event, SessionEvent::Closed { ref reason, .. } if reason == "user requested"));

    // Nothing more reaches the handler after close() returned
    settle().await;
    assert!(rx.try_recv().is_err());

    let info = h.client.session_info(&id).unwrap();
    assert_eq!(info.state, SessionState::Disconnected);
    assert_eq!(info.disconnect_reason.as_deref(), Some("user requested"));

    // Input after close is refused with the state attached
    let err = h.client.send(&id, b"ls\n").unwrap_err();
    assert!(err.to_string().contains("not connected"));
}

#[tokio::test(start_paused = true)]
async fn test_close_during_host_key_wait() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Strict)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::WaitingForHostKey).await;
    let _ = next_event(&mut rx).await; // the prompt

    h.client.close(&id).unwrap();
    settle().await;

    assert_eq!(
        h.client.session_info(&id).unwrap().state,
        SessionState::Disconnected
    );
    // The abandoned prompt can no longer be answered
    assert!(h
        .client
        .host_key_decision(&id, HostKeyDecision::AcceptOnce)
        .is_err());
}

fn saved_profile(h: &Harness, password: &str) -> Profile {
    let mut profile = Profile::new("db", "db.internal", "deploy");
    let key = SecretKey::password(&profile.id).unwrap();
    h.secrets.store(&key, password).unwrap();
    profile.auth_method = AuthMethod::Password {
        password_key: key.to_string(),
    };
    h.profiles.add(profile.clone()).unwrap();
    profile
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_opens_fresh_session_and_rebinds_events() {
    let h = harness(vec![
        OpenPlan::Session {
            output: vec![],
            hold_open: false,
        },
        OpenPlan::Session {
            output: vec!["back\n"],
            hold_open: true,
        },
    ]);
    h.known_hosts
        .record("db.internal", 22, KEY_TYPE, FINGERPRINT)
        .unwrap();
    let profile = saved_profile(&h, "hunter2");

    let old_id = h.client.open_profile(&profile.id).unwrap();
    let mut rx = subscribe(&h.client, &old_id);
    wait_for_state(&mut rx, SessionState::Disconnected).await;

    let new_id = h.client.reconnect(&old_id).unwrap();
    assert_ne!(new_id, old_id);

    // The original subscription keeps receiving events, now for the new id
    let seen = wait_for_state(&mut rx, SessionState::Connected).await;
    assert!(seen
        .iter()
        .all(|e| e.session_id() == &new_id || e.session_id() == &old_id));
    let event = next_event(&mut rx).await;
    match event {
        SessionEvent::Data { session_id, data } => {
            assert_eq!(session_id, new_id);
            assert_eq!(&data[..], b"back\n");
        }
        other => panic!("expected data for the new session, got {:?}", other),
    }

    let new_info = h.client.session_info(&new_id).unwrap();
    assert_eq!(new_info.reconnect_attempts, 1);
    assert_eq!(new_info.profile_id.as_deref(), Some(profile.id.as_str()));

    // The old session stays terminal and queryable
    assert_eq!(
        h.client.session_info(&old_id).unwrap().state,
        SessionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resolves_credentials_fresh() {
    let h = harness(vec![
        OpenPlan::Session {
            output: vec![],
            hold_open: false,
        },
        OpenPlan::Session {
            output: vec![],
            hold_open: true,
        },
    ]);
    h.known_hosts
        .record("db.internal", 22, KEY_TYPE, FINGERPRINT)
        .unwrap();
    let profile = saved_profile(&h, "old-password");

    let old_id = h.client.open_profile(&profile.id).unwrap();
    let mut rx = subscribe(&h.client, &old_id);
    wait_for_state(&mut rx, SessionState::Disconnected).await;

    // Password rotated between attempts
    let key = SecretKey::password(&profile.id).unwrap();
    h.secrets.store(&key, "new-password").unwrap();

    h.client.reconnect(&old_id).unwrap();
    wait_for_state(&mut rx, SessionState::Connected).await;

    assert_eq!(
        h.transport.passwords.lock().as_slice(),
        &["old-password".to_string(), "new-password".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_requires_profile() {
    let h = harness(vec![OpenPlan::TransportError("connection refused")]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::Disconnected).await;

    let err = h.client.reconnect(&id).unwrap_err();
    assert!(matches!(err, WtError::Validation(_)));
    // No second connect attempt was issued
    assert_eq!(h.transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_rejected_while_active() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);
    h.known_hosts
        .record("db.internal", 22, KEY_TYPE, FINGERPRINT)
        .unwrap();
    let profile = saved_profile(&h, "hunter2");

    let id = h.client.open_profile(&profile.id).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::Connected).await;

    let err = h.client.reconnect(&id).unwrap_err();
    assert!(matches!(err, WtError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_with_missing_secret_fails_without_opening() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: false,
    }]);
    h.known_hosts
        .record("db.internal", 22, KEY_TYPE, FINGERPRINT)
        .unwrap();
    let profile = saved_profile(&h, "hunter2");

    let old_id = h.client.open_profile(&profile.id).unwrap();
    let mut rx = subscribe(&h.client, &old_id);
    wait_for_state(&mut rx, SessionState::Disconnected).await;

    let key = SecretKey::password(&profile.id).unwrap();
    h.secrets.delete(&key).unwrap();

    let err = h.client.reconnect(&old_id).unwrap_err();
    assert!(matches!(err, WtError::NotFound(NotFound::Secret(_))));
    assert_eq!(h.transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_extension_input_goes_through_permission_check() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::Connected).await;

    let broker = Arc::new(PermissionBroker::new());
    broker
        .register(ExtensionManifest {
            id: "auto-typer".to_string(),
            name: "Auto Typer".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            author: String::new(),
            entry_points: vec!["on_prompt".to_string()],
            capabilities: vec![Capability::Terminal],
        })
        .unwrap();
    let dispatcher = ExtensionDispatcher::new(broker.clone(), h.client.clone());

    let request = ExtensionRequest::SendInput {
        session_id: id.to_string(),
        data: "echo hi\n".to_string(),
    };

    // Not enabled yet: denied, and nothing reaches the session
    let err = dispatcher
        .dispatch("auto-typer", "on_prompt", request.clone())
        .unwrap_err();
    assert!(matches!(err, WtError::PermissionDenied(_)));
    settle().await;
    assert!(h.transport.writes.lock().is_empty());

    broker.enable("auto-typer", &[Capability::Terminal]).unwrap();
    let effect = dispatcher
        .dispatch("auto-typer", "on_prompt", request.clone())
        .unwrap();
    assert_eq!(effect, GrantedEffect::Done);
    settle().await;
    assert_eq!(
        h.transport.writes.lock().as_slice(),
        &[b"echo hi\n".to_vec()]
    );

    // Revocation cuts access for the very next request
    broker.revoke("auto-typer", Capability::Terminal).unwrap();
    assert!(dispatcher
        .dispatch("auto-typer", "on_prompt", request)
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_profile_jump_hosts_and_options_reach_the_transport() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);
    h.known_hosts
        .record("db.internal", 22, KEY_TYPE, FINGERPRINT)
        .unwrap();

    let mut profile = saved_profile(&h, "hunter2");
    profile.jump_hosts = vec![JumpHost {
        host: "bastion.internal".to_string(),
        port: 2222,
        username: "deploy".to_string(),
        auth_method: AuthMethod::Agent,
    }];
    profile.options.keepalive_interval = 45;
    profile.options.agent_forwarding = true;
    profile.options.startup_commands = vec!["cd /srv".to_string()];
    h.profiles.update(profile.clone()).unwrap();

    let id = h.client.open_profile(&profile.id).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::Connected).await;

    let config = h.transport.last_config.lock().clone().unwrap();
    assert_eq!(config.endpoint.host, "db.internal");
    assert_eq!(config.jump_hosts.len(), 1);
    assert_eq!(config.jump_hosts[0].host, "bastion.internal");
    assert_eq!(config.jump_hosts[0].port, 2222);
    assert_eq!(config.options.keepalive_interval, 45);
    assert!(config.options.agent_forwarding);
    assert_eq!(config.options.startup_commands, vec!["cd /srv".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_delete_profile_voids_its_secrets() {
    let h = harness(vec![]);
    let profile = saved_profile(&h, "hunter2");
    let key = SecretKey::password(&profile.id).unwrap();
    assert!(h.secrets.exists(&key).unwrap());

    h.client.delete_profile(&profile.id).unwrap();

    assert!(h.profiles.get(&profile.id).is_none());
    assert!(!h.secrets.exists(&key).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_delete_profile_clears_saved_scrollback() {
    let h = harness(vec![]);
    let profile = saved_profile(&h, "hunter2");

    h.client
        .history()
        .save(&profile.id, b"deploy@db:~$ uptime\n")
        .unwrap();
    assert!(h.client.history().load(&profile.id).unwrap().is_some());

    h.client.delete_profile(&profile.id).unwrap();

    assert!(h.client.history().load(&profile.id).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_remove_session_requires_terminal_state() {
    let h = harness(vec![OpenPlan::Session {
        output: vec![],
        hold_open: true,
    }]);

    let id = h.client.open_adhoc(adhoc(HostKeyPolicy::Accept)).unwrap();
    let mut rx = subscribe(&h.client, &id);
    wait_for_state(&mut rx, SessionState::Connected).await;

    let err = h.client.remove_session(&id).unwrap_err();
    assert!(matches!(err, WtError::Validation(_)));

    h.client.close(&id).unwrap();
    h.client.remove_session(&id).unwrap();
    assert!(matches!(
        h.client.session_info(&id).unwrap_err(),
        WtError::NotFound(NotFound::Session(_))
    ));
}
