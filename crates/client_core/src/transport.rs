//! Transport seam between a stream session and the wire.

use async_trait::async_trait;
use futures::StreamExt;
use shared::domain::TaskId;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    #[error("failed to connect task stream {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("task stream receive failed: {0}")]
    Receive(String),
    #[error("task stream shutdown failed: {0}")]
    Shutdown(String),
}

/// An established connection yielding raw frames in transport order.
#[async_trait]
pub trait FrameSource: Send {
    /// Returns `None` once the remote side has closed the stream.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, task_id: &TaskId) -> Result<Box<dyn FrameSource>, TransportError>;
}

/// Dials `{ws base}/tasks/{task_id}/stream` over WebSocket.
#[derive(Debug, Clone)]
pub struct WsStreamConnector {
    base_url: Url,
}

impl WsStreamConnector {
    /// Accepts an `http(s)://` or `ws(s)://` base url; http schemes are
    /// mapped onto their websocket counterparts.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let mut url = Url::parse(base_url)
            .map_err(|err| TransportError::InvalidUrl(format!("{base_url}: {err}")))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "{base_url}: unsupported scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::InvalidUrl(format!("{base_url}: cannot use {scheme}")))?;
        if url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(format!(
                "{base_url}: not a base url"
            )));
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self { base_url: url })
    }

    pub fn stream_url(&self, task_id: &TaskId) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["tasks", task_id.as_str(), "stream"]);
        Ok(url)
    }
}

#[async_trait]
impl StreamConnector for WsStreamConnector {
    async fn connect(&self, task_id: &TaskId) -> Result<Box<dyn FrameSource>, TransportError> {
        let url = self.stream_url(task_id)?;
        let (stream, _) =
            connect_async(url.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
        info!(task_id = %task_id, url = %url, "task stream: connected");
        Ok(Box::new(WsFrameSource { stream }))
    }
}

struct WsFrameSource {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(bytes)) => return Some(Ok(Frame::Binary(bytes))),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "task stream: remote close");
                    return None;
                }
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(err) => return Some(Err(TransportError::Receive(err.to_string()))),
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(TransportError::Shutdown(err.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
