//! Serializes task observation: at most one stream session is live at a
//! time, and only its output reaches the task view.

use std::{sync::Arc, time::Duration};

use shared::{domain::TaskId, protocol::EventEnvelope};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    render::{ConsoleNotice, RenderSink},
    session::{
        self, ConnectionState, SessionEvent, SessionHandle, SessionId, SessionListener,
        SessionSignal,
    },
    transport::{StreamConnector, TransportError},
    view::{reduce, Reduction, TaskView},
};

/// What to do when the stream drops while the task has not finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    #[default]
    Never,
    /// Open a fresh session for the same task after `delay`, at most
    /// `max_attempts` times in a row. The count resets once a session opens.
    Resubscribe { max_attempts: u32, delay: Duration },
}

#[derive(Debug)]
enum CoordinatorEvent {
    Session(SessionEvent),
    ReconnectDue { epoch: u64 },
}

struct CoordinatorListener(mpsc::UnboundedSender<CoordinatorEvent>);

impl SessionListener for CoordinatorListener {
    fn on_envelope(&self, session_id: SessionId, envelope: EventEnvelope) {
        let _ = self.0.send(CoordinatorEvent::Session(SessionEvent::Envelope {
            session_id,
            envelope,
        }));
    }

    fn on_state_change(&self, signal: SessionSignal) {
        let _ = self
            .0
            .send(CoordinatorEvent::Session(SessionEvent::Signal(signal)));
    }
}

pub struct SessionCoordinator<R> {
    connector: Arc<dyn StreamConnector>,
    renderer: R,
    policy: ReconnectPolicy,
    listener: Arc<dyn SessionListener>,
    events_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    events_rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
    active_task: Option<TaskId>,
    session: Option<SessionHandle>,
    session_state: ConnectionState,
    view: TaskView,
    reconnect_attempts: u32,
    reconnect: Option<JoinHandle<()>>,
    // Bumped whenever the user changes what is observed; stale reconnect
    // timers carry an older value.
    epoch: u64,
}

impl<R: RenderSink> SessionCoordinator<R> {
    pub fn new(connector: Arc<dyn StreamConnector>, renderer: R) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            renderer,
            policy: ReconnectPolicy::default(),
            listener: Arc::new(CoordinatorListener(events_tx.clone())),
            events_tx,
            events_rx,
            active_task: None,
            session: None,
            session_state: ConnectionState::Idle,
            view: TaskView::default(),
            reconnect_attempts: 0,
            reconnect: None,
            epoch: 0,
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn view(&self) -> &TaskView {
        &self.view
    }

    pub fn active_task(&self) -> Option<&TaskId> {
        self.active_task.as_ref()
    }

    /// Connection state of the active session, as of the last processed
    /// signal.
    pub fn connection_state(&self) -> ConnectionState {
        self.session_state
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// True when no live session and no scheduled reconnect remain, so no
    /// further view changes can arrive.
    pub fn is_idle(&self) -> bool {
        let session_done = self.session.is_none() || self.session_state.is_terminal();
        session_done && self.reconnect.is_none()
    }

    /// Starts observing `task_id`, replacing whatever was observed before.
    ///
    /// The previous session is closed and its transport torn down before
    /// the new one is opened. Observing the task that already has a live
    /// session does nothing.
    pub async fn observe(&mut self, task_id: TaskId) {
        let live = self
            .session
            .as_ref()
            .is_some_and(|session| !session.state().is_terminal());
        if live && self.active_task.as_ref() == Some(&task_id) {
            debug!(task_id = %task_id, "coordinator: already observing task");
            return;
        }

        self.cancel_reconnect();
        self.retire_session().await;
        self.reconnect_attempts = 0;

        if self.active_task.as_ref() != Some(&task_id) {
            self.view = TaskView::for_task(task_id.clone());
            self.active_task = Some(task_id.clone());
            self.renderer.render(&self.view);
        }
        info!(task_id = %task_id, "coordinator: observing task");
        self.open_session(task_id);
    }

    /// Stops observing. The view is cleared and any pending reconnect is
    /// cancelled.
    pub async fn stop(&mut self) {
        self.cancel_reconnect();
        self.retire_session().await;
        if let Some(task_id) = self.active_task.take() {
            info!(task_id = %task_id, "coordinator: stopped observing task");
        }
        self.view = TaskView::default();
        self.reconnect_attempts = 0;
    }

    /// Replaces live observation with a static view, e.g. one hydrated from
    /// task history.
    pub async fn show_snapshot(&mut self, view: TaskView) {
        self.cancel_reconnect();
        self.retire_session().await;
        self.reconnect_attempts = 0;
        self.active_task = view.task_id.clone();
        self.view = view;
        self.renderer.render(&self.view);
    }

    /// Processes one queued session event, waiting for it if necessary.
    /// Returns `false` without waiting once the coordinator is idle and
    /// nothing is queued.
    pub async fn pump(&mut self) -> bool {
        let event = match self.events_rx.try_recv() {
            Ok(event) => event,
            Err(_) if self.is_idle() => return false,
            Err(_) => match self.events_rx.recv().await {
                Some(event) => event,
                None => return false,
            },
        };
        self.apply(event).await;
        true
    }

    async fn apply(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Session(SessionEvent::Envelope {
                session_id,
                envelope,
            }) => self.apply_envelope(session_id, envelope),
            CoordinatorEvent::Session(SessionEvent::Signal(signal)) => self.apply_signal(signal),
            CoordinatorEvent::ReconnectDue { epoch } => self.reconnect(epoch).await,
        }
    }

    fn is_active(&self, session_id: SessionId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.id() == session_id)
    }

    fn apply_envelope(&mut self, session_id: SessionId, envelope: EventEnvelope) {
        if !self.is_active(session_id) || self.active_task.as_ref() != Some(envelope.task_id()) {
            debug!(
                session_id = %session_id,
                task_id = %envelope.task_id(),
                kind = envelope.kind(),
                "coordinator: discarding envelope for inactive task"
            );
            return;
        }

        let Reduction { view, anomalies } = reduce(&self.view, &envelope);
        for anomaly in anomalies {
            warn!(task_id = %envelope.task_id(), %anomaly, "coordinator: sequence anomaly");
            self.renderer.notice(&ConsoleNotice::SequenceAnomaly {
                task_id: envelope.task_id().clone(),
                anomaly,
            });
        }
        if view != self.view {
            self.view = view;
            self.renderer.render(&self.view);
        }
    }

    fn apply_signal(&mut self, signal: SessionSignal) {
        if !self.is_active(signal.session_id()) {
            debug!(session_id = %signal.session_id(), "coordinator: ignoring stale session signal");
            return;
        }
        match signal {
            SessionSignal::StateChanged {
                task_id,
                state,
                error,
                ..
            } => {
                debug!(task_id = %task_id, state = ?state, "coordinator: session state changed");
                self.session_state = state;
                match state {
                    ConnectionState::Open => self.reconnect_attempts = 0,
                    ConnectionState::Closed | ConnectionState::Failed => {
                        self.connection_lost(task_id, state, error)
                    }
                    ConnectionState::Idle | ConnectionState::Connecting => {}
                }
            }
            SessionSignal::FrameRejected { task_id, error, .. } => {
                self.renderer
                    .notice(&ConsoleNotice::MalformedFrame { task_id, error });
            }
        }
    }

    fn connection_lost(
        &mut self,
        task_id: TaskId,
        state: ConnectionState,
        error: Option<TransportError>,
    ) {
        if self.view.status.is_terminal() {
            info!(task_id = %task_id, status = %self.view.status, "coordinator: stream ended");
            return;
        }
        warn!(
            task_id = %task_id,
            state = ?state,
            error = ?error,
            "coordinator: connection lost before the task finished"
        );
        self.renderer.notice(&ConsoleNotice::ConnectionLost {
            task_id: task_id.clone(),
            state,
            error,
        });

        let ReconnectPolicy::Resubscribe {
            max_attempts,
            delay,
        } = self.policy
        else {
            return;
        };
        if self.reconnect_attempts >= max_attempts {
            warn!(task_id = %task_id, attempts = self.reconnect_attempts, "coordinator: giving up on reconnect");
            return;
        }
        self.reconnect_attempts += 1;
        self.renderer.notice(&ConsoleNotice::Reconnecting {
            task_id,
            attempt: self.reconnect_attempts,
            delay,
        });
        let events = self.events_tx.clone();
        let epoch = self.epoch;
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(CoordinatorEvent::ReconnectDue { epoch });
        }));
    }

    async fn reconnect(&mut self, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        self.reconnect = None;
        let Some(task_id) = self.active_task.clone() else {
            return;
        };
        self.retire_session().await;
        info!(task_id = %task_id, attempt = self.reconnect_attempts, "coordinator: resubscribing");
        self.open_session(task_id);
    }

    fn cancel_reconnect(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }

    async fn retire_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            session.terminated().await;
        }
        self.session_state = ConnectionState::Idle;
    }

    fn open_session(&mut self, task_id: TaskId) {
        let handle = session::open(
            Arc::clone(&self.connector),
            task_id,
            Arc::clone(&self.listener),
        );
        self.session_state = ConnectionState::Connecting;
        self.session = Some(handle);
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
