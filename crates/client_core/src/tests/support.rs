use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use shared::{
    domain::{BrowserName, FinalStatus, TaskId},
    protocol::EventEnvelope,
};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::{
    render::{ConsoleNotice, RenderSink},
    session::{SessionEvent, SessionId, SessionListener, SessionSignal},
    transport::{Frame, FrameSource, StreamConnector, TransportError},
    view::TaskView,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Forwards every callback into a channel so tests can await them in order.
impl SessionListener for mpsc::UnboundedSender<SessionEvent> {
    fn on_envelope(&self, session_id: SessionId, envelope: EventEnvelope) {
        let _ = self.send(SessionEvent::Envelope {
            session_id,
            envelope,
        });
    }

    fn on_state_change(&self, signal: SessionSignal) {
        let _ = self.send(SessionEvent::Signal(signal));
    }
}

pub fn start(task: &str) -> EventEnvelope {
    EventEnvelope::TaskStart {
        task_id: TaskId::from(task),
        prompt: "open example.com and read the headline".into(),
        max_steps: 15,
        browser: BrowserName::Chrome,
    }
}

pub fn step(task: &str, step_number: u32, url: &str) -> EventEnvelope {
    EventEnvelope::Step {
        task_id: TaskId::from(task),
        step_number,
        url: url.into(),
        thought: Some(format!("step {step_number}")),
        action: json!({ "go_to_url": url }),
        result: None,
    }
}

pub fn complete(task: &str, final_status: FinalStatus, summary: &str) -> EventEnvelope {
    EventEnvelope::TaskComplete {
        task_id: TaskId::from(task),
        final_status,
        summary: summary.into(),
    }
}

pub fn error(task: &str, message: &str) -> EventEnvelope {
    EventEnvelope::Error {
        task_id: TaskId::from(task),
        message: message.into(),
    }
}

pub fn frame(envelope: &EventEnvelope) -> Frame {
    Frame::Text(serde_json::to_string(envelope).expect("serialize envelope"))
}

/// Connector that hands out pre-registered in-memory streams, one per
/// `connect` call, in registration order.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<TaskId, VecDeque<ScriptedSource>>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, task: &str) -> StreamScript {
        self.register(task, false)
    }

    /// Like [`Self::script`], but the transport shutdown blocks until
    /// [`StreamScript::release_shutdown`] is called.
    pub fn script_with_held_shutdown(&self, task: &str) -> StreamScript {
        self.register(task, true)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn register(&self, task: &str, hold_shutdown: bool) -> StreamScript {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let shutdown_requested = Arc::new(Notify::new());
        let (release_tx, release_rx) = if hold_shutdown {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        self.scripts
            .lock()
            .expect("scripts")
            .entry(TaskId::from(task))
            .or_default()
            .push_back(ScriptedSource {
                frames: frames_rx,
                shutdown_requested: Arc::clone(&shutdown_requested),
                release: release_rx,
            });
        StreamScript {
            frames: Some(frames_tx),
            shutdown_requested,
            release: release_tx,
        }
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self, task_id: &TaskId) -> Result<Box<dyn FrameSource>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self
            .scripts
            .lock()
            .expect("scripts")
            .get_mut(task_id)
            .and_then(VecDeque::pop_front);
        match next {
            Some(source) => Ok(Box::new(source)),
            None => Err(TransportError::Connect {
                url: format!("scripted://{task_id}"),
                reason: "no stream scripted".into(),
            }),
        }
    }
}

pub struct StreamScript {
    frames: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    shutdown_requested: Arc<Notify>,
    release: Option<oneshot::Sender<()>>,
}

impl StreamScript {
    pub fn send(&self, envelope: &EventEnvelope) {
        self.push(Ok(frame(envelope)));
    }

    pub fn send_raw(&self, raw: &str) {
        self.push(Ok(Frame::Text(raw.to_string())));
    }

    pub fn fail(&self, error: TransportError) {
        self.push(Err(error));
    }

    /// Closes the stream from the remote side.
    pub fn hang_up(&mut self) {
        self.frames.take();
    }

    pub async fn shutdown_requested(&self) {
        tokio::time::timeout(WAIT, self.shutdown_requested.notified())
            .await
            .expect("transport shutdown was never requested");
    }

    pub fn release_shutdown(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }

    fn push(&self, item: Result<Frame, TransportError>) {
        if let Some(frames) = &self.frames {
            let _ = frames.send(item);
        }
    }
}

struct ScriptedSource {
    frames: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    shutdown_requested: Arc<Notify>,
    release: Option<oneshot::Receiver<()>>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.frames.recv().await
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.shutdown_requested.notify_one();
        if let Some(release) = self.release.take() {
            let _ = release.await;
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingRenderer {
    views: Arc<Mutex<Vec<TaskView>>>,
    notices: Arc<Mutex<Vec<ConsoleNotice>>>,
}

impl RecordingRenderer {
    pub fn views(&self) -> Vec<TaskView> {
        self.views.lock().expect("views").clone()
    }

    pub fn notices(&self) -> Vec<ConsoleNotice> {
        self.notices.lock().expect("notices").clone()
    }
}

impl RenderSink for RecordingRenderer {
    fn render(&mut self, view: &TaskView) {
        self.views.lock().expect("views").push(view.clone());
    }

    fn notice(&mut self, notice: &ConsoleNotice) {
        self.notices.lock().expect("notices").push(notice.clone());
    }
}
