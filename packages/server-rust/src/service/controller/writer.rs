//! Outbound side of a socket session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use docintake_core::{Envelope, ErrorCode, StreamToken};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::network::{CloseReason, ConnectionHandle};
use crate::service::error::OperationError;
use crate::service::operation::TokenSink;

/// Minimal frame-level interface of a WebSocket write half.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), OperationError>;

    async fn close(&mut self, reason: CloseReason) -> Result<(), OperationError>;
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), OperationError> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|err| OperationError::Transport(err.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), OperationError> {
        let frame = CloseFrame {
            code: reason.code,
            reason: Utf8Bytes::from_static(reason.reason),
        };
        self.send(Message::Close(Some(frame)))
            .await
            .map_err(|err| OperationError::Transport(err.to_string()))
    }
}

/// Serializes envelopes onto one socket and closes it at most once.
pub struct SocketWriter<S> {
    sink: Mutex<S>,
    closed: AtomicBool,
    frames: AtomicU64,
    connection: Option<Arc<ConnectionHandle>>,
}

impl<S: FrameSink> SocketWriter<S> {
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            connection: None,
        }
    }

    /// Ties self-initiated closes to `connection`, so a draining server
    /// closes with going-away instead of a normal closure.
    #[must_use]
    pub fn with_connection(mut self, connection: Arc<ConnectionHandle>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Close frame for the way this session is ending.
    #[must_use]
    pub fn close_reason(&self) -> CloseReason {
        self.connection
            .as_ref()
            .map_or(CloseReason::SERVED, |connection| connection.close_reason())
    }

    /// Data frames delivered so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends one envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::Transport` if the socket is closed or the
    /// write fails.
    pub async fn send_envelope<T: Serialize + Sync>(&self, envelope: &Envelope<T>) -> Result<(), OperationError> {
        if self.is_closed() {
            return Err(OperationError::Transport("socket already closed".to_string()));
        }
        let text = serde_json::to_string(envelope).map_err(|err| OperationError::Internal(err.into()))?;
        self.sink.lock().await.send_text(text).await?;
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Tells the client about `err`. A failure to do so is logged, not returned.
    pub async fn notify_failure(&self, err: &OperationError) {
        self.notify(err.message(), err.code()).await;
    }

    async fn notify(&self, message: String, code: ErrorCode) {
        let envelope: Envelope<()> = Envelope::failure(message, code);
        if let Err(err) = self.send_envelope(&envelope).await {
            warn!(error = %err, "unable to send error message to client");
        }
    }

    /// Sends a close frame unless the socket is already closed.
    pub async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.sink.lock().await.close(reason).await {
            debug!(error = %err, code = reason.code, "close frame not delivered");
        }
    }
}

#[async_trait]
impl<S: FrameSink + 'static> TokenSink for SocketWriter<S> {
    /// Forwards a token as a success envelope. On failure the client gets an
    /// error envelope and the socket is closed.
    async fn send(&self, token: &StreamToken) -> Result<(), OperationError> {
        match self.send_envelope(&Envelope::success(token.content.as_str())).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.notify(format!("unable to forward token: {err}"), ErrorCode::Unidentified)
                    .await;
                self.close(self.close_reason()).await;
                Err(err)
            }
        }
    }
}
