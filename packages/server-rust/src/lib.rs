//! docintake server: HTTP/WebSocket protocol dispatch over a shared
//! dependency graph, and bounded-retry consumption of LLM token streams.

pub mod app;
pub mod llm;
pub mod network;
pub mod service;
pub mod streaming;
pub mod telemetry;
pub mod usecase;

#[cfg(test)]
mod testing;

pub use app::{build_dependency_graph, build_module, controllers};
pub use network::{NetworkConfig, NetworkModule};
pub use service::{Controller, ExecutionBridge, Operation, OperationError, ServerConfig};
pub use streaming::{ConcatSink, ConsumerOptions, FoldingSink, RetryPolicy, StreamConsumer};
