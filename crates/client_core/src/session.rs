//! One live connection for one task.
//!
//! A session is opened with [`open`], which returns immediately with a
//! [`SessionHandle`] while the connection is established on a background
//! task. Every callback into the [`SessionListener`] happens under the
//! handle's delivery latch, so once [`SessionHandle::close`] returns no
//! further callbacks fire, even if the transport needs more time to wind
//! down. Sessions never reconnect on their own.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use shared::{
    domain::TaskId,
    error::ParseError,
    protocol::{self, EventEnvelope},
};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::transport::{Frame, StreamConnector, TransportError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    StateChanged {
        session_id: SessionId,
        task_id: TaskId,
        state: ConnectionState,
        error: Option<TransportError>,
    },
    /// A frame was dropped because it did not parse; the session continues.
    FrameRejected {
        session_id: SessionId,
        task_id: TaskId,
        error: ParseError,
    },
}

impl SessionSignal {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::StateChanged { session_id, .. } | Self::FrameRejected { session_id, .. } => {
                *session_id
            }
        }
    }
}

/// Receives session output. Called from the session's background task;
/// implementations must not block and must not close the calling handle.
pub trait SessionListener: Send + Sync + 'static {
    fn on_envelope(&self, session_id: SessionId, envelope: EventEnvelope);
    fn on_state_change(&self, signal: SessionSignal);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Envelope {
        session_id: SessionId,
        envelope: EventEnvelope,
    },
    Signal(SessionSignal),
}

struct SessionShared {
    id: SessionId,
    task_id: TaskId,
    listener: Arc<dyn SessionListener>,
    delivering: Mutex<bool>,
    state: watch::Sender<ConnectionState>,
}

impl SessionShared {
    fn delivery(&self) -> MutexGuard<'_, bool> {
        self.delivering
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `to` unless the session is already terminal or closed.
    fn transition(&self, to: ConnectionState, error: Option<TransportError>) -> bool {
        let delivering = self.delivery();
        if !*delivering {
            return false;
        }
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == to {
                return false;
            }
            *current = to;
            true
        });
        if changed {
            self.listener.on_state_change(SessionSignal::StateChanged {
                session_id: self.id,
                task_id: self.task_id.clone(),
                state: to,
                error,
            });
        }
        changed
    }

    fn deliver(&self, frame: Frame) {
        let parsed = match &frame {
            Frame::Text(text) => protocol::parse(text),
            Frame::Binary(bytes) => protocol::parse_bytes(bytes),
        };
        let delivering = self.delivery();
        if !*delivering {
            return;
        }
        match parsed {
            Ok(envelope) => self.listener.on_envelope(self.id, envelope),
            Err(error) => {
                warn!(
                    session_id = %self.id,
                    task_id = %self.task_id,
                    error = %error,
                    "stream session: dropping malformed frame"
                );
                self.listener.on_state_change(SessionSignal::FrameRejected {
                    session_id: self.id,
                    task_id: self.task_id.clone(),
                    error,
                });
            }
        }
    }

    /// Shuts the delivery latch. Returns whether this call did the closing.
    fn close(&self) -> bool {
        let mut delivering = self.delivery();
        let was_delivering = std::mem::replace(&mut *delivering, false);
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = ConnectionState::Closed;
            true
        });
        was_delivering
    }
}

pub struct SessionHandle {
    shared: Arc<SessionShared>,
    state: watch::Receiver<ConnectionState>,
    cancel: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.shared.task_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Stops delivery immediately and asks the transport to shut down.
    /// Idempotent; a terminal handle keeps its terminal state.
    pub fn close(&self) {
        if self.shared.close() {
            info!(
                session_id = %self.shared.id,
                task_id = %self.shared.task_id,
                "stream session: closed"
            );
        }
        self.cancel.notify_one();
    }

    /// Resolves once the background task, and with it the transport, has
    /// finished. Does not close the session by itself.
    pub async fn terminated(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(err) = task.await {
            warn!(
                session_id = %self.shared.id,
                error = %err,
                "stream session: background task ended abnormally"
            );
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("task_id", &self.shared.task_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens a stream session for `task_id`. Must be called within a Tokio
/// runtime; returns without waiting for the connection.
pub fn open(
    connector: Arc<dyn StreamConnector>,
    task_id: TaskId,
    listener: Arc<dyn SessionListener>,
) -> SessionHandle {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    let shared = Arc::new(SessionShared {
        id: SessionId::next(),
        task_id,
        listener,
        delivering: Mutex::new(true),
        state: state_tx,
    });
    info!(
        session_id = %shared.id,
        task_id = %shared.task_id,
        "stream session: opening"
    );
    shared.transition(ConnectionState::Connecting, None);

    let cancel = Arc::new(Notify::new());
    let task = tokio::spawn(run_session(
        Arc::clone(&shared),
        connector,
        Arc::clone(&cancel),
    ));

    SessionHandle {
        shared,
        state: state_rx,
        cancel,
        task: Some(task),
    }
}

async fn run_session(
    shared: Arc<SessionShared>,
    connector: Arc<dyn StreamConnector>,
    cancel: Arc<Notify>,
) {
    let connected = tokio::select! {
        biased;
        _ = cancel.notified() => return,
        connected = connector.connect(&shared.task_id) => connected,
    };
    let mut source = match connected {
        Ok(source) => source,
        Err(error) => {
            warn!(
                session_id = %shared.id,
                task_id = %shared.task_id,
                error = %error,
                "stream session: connect failed"
            );
            shared.transition(ConnectionState::Failed, Some(error));
            return;
        }
    };

    if shared.transition(ConnectionState::Open, None) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.notified() => None,
                frame = source.next_frame() => Some(frame),
            };
            match next {
                None => break,
                Some(Some(Ok(frame))) => shared.deliver(frame),
                Some(Some(Err(error))) => {
                    warn!(
                        session_id = %shared.id,
                        task_id = %shared.task_id,
                        error = %error,
                        "stream session: transport failed"
                    );
                    shared.transition(ConnectionState::Failed, Some(error));
                    break;
                }
                Some(None) => {
                    info!(
                        session_id = %shared.id,
                        task_id = %shared.task_id,
                        "stream session: remote closed"
                    );
                    shared.transition(ConnectionState::Closed, None);
                    return;
                }
            }
        }
    }

    if let Err(error) = source.shutdown().await {
        debug!(
            session_id = %shared.id,
            error = %error,
            "stream session: transport shutdown failed"
        );
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
