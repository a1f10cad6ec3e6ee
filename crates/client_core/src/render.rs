//! Renderer seam: where task views and console notices are published.

use std::{fmt, time::Duration};

use shared::{domain::TaskId, error::ParseError};

use crate::{
    session::ConnectionState,
    transport::TransportError,
    view::{SequenceAnomaly, TaskView},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleNotice {
    /// The stream ended while the task had not finished; the backend may
    /// still be running it.
    ConnectionLost {
        task_id: TaskId,
        state: ConnectionState,
        error: Option<TransportError>,
    },
    Reconnecting {
        task_id: TaskId,
        attempt: u32,
        delay: Duration,
    },
    MalformedFrame {
        task_id: TaskId,
        error: ParseError,
    },
    SequenceAnomaly {
        task_id: TaskId,
        anomaly: SequenceAnomaly,
    },
}

impl ConsoleNotice {
    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::ConnectionLost { task_id, .. }
            | Self::Reconnecting { task_id, .. }
            | Self::MalformedFrame { task_id, .. }
            | Self::SequenceAnomaly { task_id, .. } => task_id,
        }
    }
}

impl fmt::Display for ConsoleNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost { error: Some(error), .. } => write!(
                f,
                "connection lost ({error}), task may still be running remotely"
            ),
            Self::ConnectionLost { error: None, .. } => {
                f.write_str("connection lost, task may still be running remotely")
            }
            Self::Reconnecting { attempt, delay, .. } => write!(
                f,
                "reconnecting in {}ms (attempt {attempt})",
                delay.as_millis()
            ),
            Self::MalformedFrame { error, .. } => write!(f, "ignored stream message: {error}"),
            Self::SequenceAnomaly { anomaly, .. } => write!(f, "{anomaly}"),
        }
    }
}

/// Paints the observed task. `render` is called once per view transition.
pub trait RenderSink: Send {
    fn render(&mut self, view: &TaskView);

    fn notice(&mut self, _notice: &ConsoleNotice) {}
}
