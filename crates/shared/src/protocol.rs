use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    domain::{BrowserName, FinalStatus, TaskId, TaskStatus},
    error::ParseError,
};

/// One message received over a task's live stream.
///
/// On the wire this is a flat JSON object whose `type` field selects the
/// variant; the remaining fields are the variant's snake_case fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    TaskStart {
        task_id: TaskId,
        prompt: String,
        max_steps: u32,
        browser: BrowserName,
    },
    Step {
        task_id: TaskId,
        step_number: u32,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
        action: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    TaskComplete {
        task_id: TaskId,
        final_status: FinalStatus,
        summary: String,
    },
    Error {
        task_id: TaskId,
        message: String,
    },
}

impl EventEnvelope {
    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::TaskStart { task_id, .. }
            | Self::Step { task_id, .. }
            | Self::TaskComplete { task_id, .. }
            | Self::Error { task_id, .. } => task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskStart { .. } => "task_start",
            Self::Step { .. } => "step",
            Self::TaskComplete { .. } => "task_complete",
            Self::Error { .. } => "error",
        }
    }
}

/// Validates a raw text frame into an [`EventEnvelope`].
///
/// Unknown discriminants, missing required fields and numerics that are not
/// non-negative integers are all rejected; nothing is coerced.
pub fn parse(raw: &str) -> Result<EventEnvelope, ParseError> {
    let envelope: EventEnvelope = serde_json::from_str(raw)?;
    if envelope.task_id().is_blank() {
        return Err(ParseError::BlankTaskId);
    }
    Ok(envelope)
}

pub fn parse_bytes(raw: &[u8]) -> Result<EventEnvelope, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|_| ParseError::NotText)?;
    parse(text)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTaskRequest {
    pub task_prompt: String,
    pub max_steps: u32,
    pub user_id: String,
    pub browser_name: BrowserName,
    #[serde(default = "default_browser_port")]
    pub browser_port: u16,
}

fn default_browser_port() -> u16 {
    9999
}

impl StartTaskRequest {
    pub fn new(task_prompt: impl Into<String>, max_steps: u32, browser_name: BrowserName) -> Self {
        Self {
            task_prompt: task_prompt.into(),
            max_steps,
            user_id: "default".to_string(),
            browser_name,
            browser_port: default_browser_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTaskResponse {
    pub success: bool,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    #[serde(default)]
    pub task_prompt: String,
    #[serde(default)]
    pub max_steps: u32,
    #[serde(deserialize_with = "status_any_case")]
    pub status: TaskStatus,
    #[serde(default)]
    pub user_id: String,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
}

fn status_any_case<'de, D>(deserializer: D) -> Result<TaskStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(de::Error::custom)
}

impl TaskRecord {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        unix_to_utc(self.created_at)
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        unix_to_utc(self.updated_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub success: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// One persisted output of a task, as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(default)]
    pub output_id: String,
    pub task_id: TaskId,
    pub output_type: String,
    /// JSON document encoded as a string.
    #[serde(default)]
    pub step_data: String,
    #[serde(default)]
    pub step_number: u32,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListTasksQuery {
    pub limit: u32,
    pub offset: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_id: String,
}

pub fn unix_to_utc(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    DateTime::from_timestamp(seconds, 0)
}
