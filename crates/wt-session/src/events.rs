//! Session event fan-out
//!
//! Each session id has at most one subscribed handler; subscribing again
//! replaces the previous handler atomically, so a redraw-after-resubscribe
//! can never see the same chunk twice. Events for an id with no handler are
//! dropped, not queued.

use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use wt_core::types::{SessionId, SessionState};

/// Events a session driver publishes toward the rendering layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Lifecycle state changed
    StateChanged {
        session_id: SessionId,
        state: SessionState,
    },
    /// A chunk of remote output
    Data {
        session_id: SessionId,
        data: Bytes,
    },
    /// The server presented a key that needs a human decision
    HostKeyRequest {
        session_id: SessionId,
        host: String,
        port: u16,
        key_type: String,
        fingerprint: String,
    },
    /// The session ended cleanly
    Closed {
        session_id: SessionId,
        reason: String,
    },
    /// The session failed; `message` is already sanitized
    Error {
        session_id: SessionId,
        message: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::Data { session_id, .. }
            | SessionEvent::HostKeyRequest { session_id, .. }
            | SessionEvent::Closed { session_id, .. }
            | SessionEvent::Error { session_id, .. } => session_id,
        }
    }
}

/// One registered handler plus the state needed to retire it safely.
///
/// `active` is flipped off when the subscription is replaced or removed;
/// `delivery` serializes invocations and lets `unsubscribe` wait out an
/// in-flight delivery on another thread. The mutex is reentrant so a
/// handler may unsubscribe itself from inside a delivery.
struct Subscription {
    handler: Box<dyn Fn(SessionEvent) + Send + Sync>,
    active: AtomicBool,
    delivery: ReentrantMutex<()>,
}

/// Per-session event bus with replace-only subscription semantics
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<SessionId, Arc<Subscription>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler for a session, replacing any previous one.
    /// The replaced handler receives nothing from this point on, even if a
    /// publish had already looked it up.
    pub fn subscribe<F>(&self, session_id: SessionId, handler: F)
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let subscription = Arc::new(Subscription {
            handler: Box::new(handler),
            active: AtomicBool::new(true),
            delivery: ReentrantMutex::new(()),
        });
        if let Some(old) = self.handlers.lock().insert(session_id, subscription) {
            old.active.store(false, Ordering::SeqCst);
        }
    }

    /// Drop the handler for a session; later events for that id are
    /// discarded. Blocks until any delivery already in flight on another
    /// thread has finished, so once this returns the handler runs no more.
    pub fn unsubscribe(&self, session_id: &SessionId) {
        let removed = self.handlers.lock().remove(session_id);
        if let Some(subscription) = removed {
            subscription.active.store(false, Ordering::SeqCst);
            let _sync = subscription.delivery.lock();
        }
    }

    /// Move the handler registered under `old` to `new`.
    ///
    /// Used by reconnect so the existing view keeps receiving events without
    /// a resubscribe gap. A handler already registered under `new` wins.
    pub fn rebind(&self, old: &SessionId, new: SessionId) {
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(&new) {
            if let Some(dropped) = handlers.remove(old) {
                dropped.active.store(false, Ordering::SeqCst);
            }
            return;
        }
        if let Some(subscription) = handlers.remove(old) {
            handlers.insert(new, subscription);
        }
    }

    /// Deliver an event to the handler subscribed under its session id.
    ///
    /// The subscription is cloned out and invoked outside the map lock, so a
    /// handler may itself subscribe or unsubscribe without deadlocking; the
    /// active check under the delivery lock keeps a racing unsubscribe from
    /// letting one last event through.
    pub fn publish(&self, event: SessionEvent) {
        let subscription = self.handlers.lock().get(event.session_id()).cloned();
        match subscription {
            Some(subscription) => {
                let _sync = subscription.delivery.lock();
                if subscription.active.load(Ordering::SeqCst) {
                    (subscription.handler)(event);
                }
            }
            None => {
                tracing::trace!(session = %event.session_id(), "event dropped, no subscriber");
            }
        }
    }
}
