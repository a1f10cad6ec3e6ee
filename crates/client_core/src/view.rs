//! Task view state and the pure reducer that folds stream envelopes into it.

use serde_json::Value;
use shared::{
    domain::{BrowserName, TaskId, TaskStatus},
    protocol::EventEnvelope,
};

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step_number: u32,
    pub url: String,
    pub thought: Option<String>,
    pub action: Value,
    pub result: Option<Value>,
}

/// Renderable state of one observed task.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskView {
    pub task_id: Option<TaskId>,
    pub status: TaskStatus,
    pub prompt: Option<String>,
    pub max_steps: Option<u32>,
    pub browser: Option<BrowserName>,
    /// Arrival order; expected to be step-number ascending.
    pub steps: Vec<StepRecord>,
    pub final_summary: Option<String>,
    pub last_error: Option<String>,
    completion_recorded: bool,
}

impl TaskView {
    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::default()
        }
    }

    /// Whether a `task_complete` event has been folded in.
    pub fn is_completed(&self) -> bool {
        self.completion_recorded
    }

    pub fn last_step_number(&self) -> Option<u32> {
        self.steps.last().map(|step| step.step_number)
    }

    pub(crate) fn mark_completed(&mut self) {
        self.completion_recorded = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceAnomaly {
    OutOfOrder { expected: u32, received: u32 },
    AfterCompletion { step_number: u32, status: TaskStatus },
}

impl std::fmt::Display for SequenceAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfOrder { expected, received } => {
                write!(f, "step {received} arrived out of order (expected {expected})")
            }
            Self::AfterCompletion {
                step_number,
                status,
            } => write!(f, "step {step_number} arrived after the task was {status}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub view: TaskView,
    pub anomalies: Vec<SequenceAnomaly>,
}

/// Folds one envelope into `view`, returning the next view and any sequence
/// anomalies it exposed. The input view is left untouched.
pub fn reduce(view: &TaskView, envelope: &EventEnvelope) -> Reduction {
    let mut anomalies = Vec::new();
    let next = match envelope {
        EventEnvelope::TaskStart {
            task_id,
            prompt,
            max_steps,
            browser,
        } => TaskView {
            task_id: Some(task_id.clone()),
            status: TaskStatus::Running,
            prompt: Some(prompt.clone()),
            max_steps: Some(*max_steps),
            browser: Some(*browser),
            ..TaskView::default()
        },
        EventEnvelope::Step {
            step_number,
            url,
            thought,
            action,
            result,
            ..
        } => {
            let expected = view
                .last_step_number()
                .map_or(1, |last| last.saturating_add(1));
            if *step_number != expected {
                anomalies.push(SequenceAnomaly::OutOfOrder {
                    expected,
                    received: *step_number,
                });
            }
            if view.is_completed() {
                anomalies.push(SequenceAnomaly::AfterCompletion {
                    step_number: *step_number,
                    status: view.status,
                });
            }

            let mut next = view.clone();
            if next.status == TaskStatus::Pending {
                next.status = TaskStatus::Running;
            }
            next.steps.push(StepRecord {
                step_number: *step_number,
                url: url.clone(),
                thought: thought.clone(),
                action: action.clone(),
                result: result.clone(),
            });
            next
        }
        EventEnvelope::TaskComplete {
            final_status,
            summary,
            ..
        } => {
            let mut next = view.clone();
            next.status = (*final_status).into();
            next.final_summary = Some(summary.clone());
            next.mark_completed();
            next
        }
        EventEnvelope::Error { message, .. } => {
            let mut next = view.clone();
            next.last_error = Some(message.clone());
            if !view.is_completed() {
                next.status = TaskStatus::Failed;
            }
            next
        }
    };

    Reduction {
        view: next,
        anomalies,
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
