//! Operation definitions: payloads, the sink callback, and type-erased handlers.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use docintake_core::{StreamToken, Transport, Verb};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::error::OperationError;
use super::graph::DependencyGraph;
use super::schema::schema_document;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Deferred HTTP invocation: the body is already decoded, only the graph is
/// still missing.
pub type HttpCall = Box<dyn FnOnce(Arc<DependencyGraph>) -> BoxFuture<Result<Value, OperationError>> + Send>;

type HttpBinder = Arc<dyn Fn(Payload<Value>) -> Result<HttpCall, OperationError> + Send + Sync>;

type MessageHandler = Arc<
    dyn Fn(Arc<DependencyGraph>, Payload<InboundMessage>, SinkCallback) -> BoxFuture<Result<Value, OperationError>>
        + Send
        + Sync,
>;

type SchemaFn = fn() -> Value;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// What an operation receives for one request or one socket message.
#[derive(Debug, Clone)]
pub struct Payload<T> {
    pub body: T,
    /// Request headers. HTTP only.
    pub headers: Option<HeaderMap>,
    /// Messages this socket already handled. WebSocket only.
    pub message_quantity: Option<u64>,
    /// Fires when the owning connection goes away.
    pub cancellation: CancellationToken,
}

impl<T> Payload<T> {
    #[must_use]
    pub fn http(body: T, headers: HeaderMap) -> Self {
        Self {
            body,
            headers: Some(headers),
            message_quantity: None,
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn message(body: T, quantity: u64, cancellation: CancellationToken) -> Self {
        Self {
            body,
            headers: None,
            message_quantity: Some(quantity),
            cancellation,
        }
    }

    /// Replaces the body, keeping the request metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Payload<U> {
        Payload {
            body: f(self.body),
            headers: self.headers,
            message_quantity: self.message_quantity,
            cancellation: self.cancellation,
        }
    }
}

// ---------------------------------------------------------------------------
// InboundMessage / MessageCounter
// ---------------------------------------------------------------------------

/// A raw WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Bytes),
}

impl InboundMessage {
    /// Frame content as text; binary frames are decoded lossily.
    #[must_use]
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text.as_str()),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    /// Decodes the frame as JSON.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::InvalidRequest` if the frame is not valid
    /// JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, OperationError> {
        let bytes = match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes.as_ref(),
        };
        serde_json::from_slice(bytes).map_err(|err| OperationError::InvalidRequest {
            cause: err.to_string(),
        })
    }
}

/// Number of messages one socket has handled successfully.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageCounter(u64);

impl MessageCounter {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn increment(&mut self) {
        self.0 += 1;
    }
}

// ---------------------------------------------------------------------------
// Sink callback
// ---------------------------------------------------------------------------

/// Destination for tokens a MESSAGE operation forwards while it streams.
#[async_trait]
pub trait TokenSink: Send + Sync {
    /// Forwards one token to the client.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::Transport` if the token could not be delivered.
    async fn send(&self, token: &StreamToken) -> Result<(), OperationError>;
}

/// Cloneable handle to the caller's [`TokenSink`].
#[derive(Clone)]
pub struct SinkCallback(Arc<dyn TokenSink>);

impl SinkCallback {
    #[must_use]
    pub fn new(sink: Arc<dyn TokenSink>) -> Self {
        Self(sink)
    }

    /// # Errors
    ///
    /// Propagates the sink's delivery failure.
    pub async fn send(&self, token: &StreamToken) -> Result<(), OperationError> {
        self.0.send(token).await
    }
}

impl fmt::Debug for SinkCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SinkCallback")
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

enum Handler {
    Http(HttpBinder),
    Message(MessageHandler),
}

/// One verb of a controller: a handler plus its advisory wire schemas.
pub struct Operation {
    verb: Verb,
    handler: Handler,
    request_schema: Option<SchemaFn>,
    response_schema: Option<SchemaFn>,
}

impl Operation {
    /// An HTTP operation whose JSON body decodes into `Req`.
    ///
    /// An empty request body decodes from `null`, so `()` or `Option<_>`
    /// request types accept bodiless requests.
    pub fn http<Req, Res, H, Fut>(verb: Verb, handler: H) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + 'static,
        H: Fn(Arc<DependencyGraph>, Payload<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, OperationError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let binder: HttpBinder = Arc::new(
            move |mut raw: Payload<Value>| -> Result<HttpCall, OperationError> {
                let body: Req = serde_json::from_value(std::mem::take(&mut raw.body)).map_err(
                    |err| OperationError::InvalidRequest {
                        cause: err.to_string(),
                    },
                )?;
                let payload = raw.map(|_| body);
                let handler = Arc::clone(&handler);
                Ok(Box::new(
                    move |graph: Arc<DependencyGraph>| -> BoxFuture<Result<Value, OperationError>> {
                        Box::pin(async move { to_json((*handler)(graph, payload).await?) })
                    },
                ))
            },
        );

        Self {
            verb,
            handler: Handler::Http(binder),
            request_schema: None,
            response_schema: None,
        }
    }

    /// A WebSocket MESSAGE operation. The handler receives the raw frame and
    /// a sink for streaming partial results.
    pub fn message<Res, H, Fut>(handler: H) -> Self
    where
        Res: Serialize + 'static,
        H: Fn(Arc<DependencyGraph>, Payload<InboundMessage>, SinkCallback) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<Res, OperationError>> + Send + 'static,
    {
        let handler: MessageHandler = Arc::new(
            move |graph: Arc<DependencyGraph>,
                  payload: Payload<InboundMessage>,
                  sink: SinkCallback|
                  -> BoxFuture<Result<Value, OperationError>> {
                let fut = handler(graph, payload, sink);
                Box::pin(async move { to_json(fut.await?) })
            },
        );

        Self {
            verb: Verb::Message,
            handler: Handler::Message(handler),
            request_schema: None,
            response_schema: None,
        }
    }

    #[must_use]
    pub fn with_request_schema<T: ToSchema>(mut self) -> Self {
        self.request_schema = Some(schema_document::<T>);
        self
    }

    #[must_use]
    pub fn with_response_schema<T: ToSchema>(mut self) -> Self {
        self.response_schema = Some(schema_document::<T>);
        self
    }

    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Transport implied by the handler kind.
    #[must_use]
    pub fn transport(&self) -> Transport {
        match self.handler {
            Handler::Http(_) => Transport::Http,
            Handler::Message(_) => Transport::Ws,
        }
    }

    pub(crate) fn request_schema(&self) -> Option<Value> {
        self.request_schema.map(|f| f())
    }

    pub(crate) fn response_schema(&self) -> Option<Value> {
        self.response_schema.map(|f| f())
    }

    /// Decodes an HTTP payload into a call that only needs the graph.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::InvalidRequest` if the body does not decode,
    /// or `OperationError::Internal` if this is not an HTTP operation.
    pub fn bind_http(&self, payload: Payload<Value>) -> Result<HttpCall, OperationError> {
        match &self.handler {
            Handler::Http(bind) => bind(payload),
            Handler::Message(_) => Err(anyhow::anyhow!("{} is not an HTTP operation", self.verb).into()),
        }
    }

    /// Runs a MESSAGE handler.
    ///
    /// # Errors
    ///
    /// Returns whatever the handler fails with, or `OperationError::Internal`
    /// if this is not a MESSAGE operation.
    pub async fn call_message(
        &self,
        graph: Arc<DependencyGraph>,
        payload: Payload<InboundMessage>,
        sink: SinkCallback,
    ) -> Result<Value, OperationError> {
        match &self.handler {
            Handler::Message(handler) => handler(graph, payload, sink).await,
            Handler::Http(_) => Err(anyhow::anyhow!("{} is not a MESSAGE operation", self.verb).into()),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("verb", &self.verb)
            .field("transport", &self.transport())
            .finish_non_exhaustive()
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, OperationError> {
    serde_json::to_value(value).map_err(|err| OperationError::Internal(err.into()))
}
