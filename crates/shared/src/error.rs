use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an inbound stream frame could not become an event envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame is not UTF-8 text")]
    NotText,
    #[error("malformed event envelope: {0}")]
    Malformed(String),
    #[error("event envelope carries a blank task id")]
    BlankTaskId,
}

impl From<serde_json::Error> for ParseError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

/// Body of a non-2xx response from the task backend proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendError {
    pub error: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
