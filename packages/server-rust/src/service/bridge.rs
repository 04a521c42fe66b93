//! Runs operation computations with the dependency graph injected.
//!
//! The bridge owns the span for one invocation, turns panics into
//! [`OperationError::Panicked`], and logs the outcome. It returns typed
//! results; mapping them onto envelopes is left to the transport.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use docintake_core::{Transport, Verb};
use futures_util::FutureExt;
use tracing::{info, info_span, warn, Instrument};

use super::error::OperationError;
use super::graph::DependencyGraph;

/// Attributes recorded on the span of one operation invocation.
#[derive(Debug, Clone)]
pub struct SpanAttributes {
    /// Controller name.
    pub name: String,
    pub transport: Transport,
    pub method: Verb,
    /// Request path.
    pub target: String,
    /// Serialized request body or raw message text.
    pub body: Option<String>,
    /// Message quantity. WebSocket only.
    pub quantity: Option<u64>,
}

impl SpanAttributes {
    /// Span name in `{name}.{TRANSPORT}` form.
    #[must_use]
    pub fn otel_name(&self) -> String {
        format!("{}.{}", self.name, self.transport)
    }
}

#[derive(Clone)]
pub struct ExecutionBridge {
    graph: Arc<DependencyGraph>,
    service_name: Arc<str>,
}

impl ExecutionBridge {
    #[must_use]
    pub fn new(graph: Arc<DependencyGraph>, service_name: impl Into<Arc<str>>) -> Self {
        Self {
            graph,
            service_name: service_name.into(),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Runs `operation` inside a span named after `attrs`.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, or `OperationError::Panicked` if it
    /// panicked while being polled.
    pub async fn execute<T, F, Fut>(&self, attrs: SpanAttributes, operation: F) -> Result<T, OperationError>
    where
        T: fmt::Debug,
        F: FnOnce(Arc<DependencyGraph>) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let span = info_span!(
            "operation",
            otel.name = %attrs.otel_name(),
            protocol = %attrs.transport,
            method = %attrs.method,
            target = %attrs.target,
            body = attrs.body.as_deref(),
            quantity = attrs.quantity,
            service = %self.service_name,
        );

        let graph = Arc::clone(&self.graph);
        let run = AssertUnwindSafe(async move { operation(graph).await }).catch_unwind();

        async move {
            let result = match run.await {
                Ok(result) => result,
                Err(panic) => Err(OperationError::Panicked(panic_message(panic.as_ref()))),
            };
            match &result {
                Ok(value) => info!(result = ?value, "operation resolved"),
                Err(err) => warn!(code = %err.code(), error = %err, "operation failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

impl fmt::Debug for ExecutionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionBridge")
            .field("service_name", &self.service_name)
            .field("graph", &self.graph)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
