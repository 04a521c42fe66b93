//! Operation dispatch framework.
//!
//! 1. **Operations** (`operation`): typed handlers keyed by verb
//! 2. **Controllers** (`controller`): mount a verb pool as HTTP routes or one WebSocket route
//! 3. **Bridge** (`bridge`): runs a handler with the dependency graph inside a span
//! 4. **Graph** (`graph`): type-keyed dependencies built once at startup
//! 5. **Schemas** (`schema`): advisory wire schemas per controller verb

pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod operation;
pub mod schema;

pub use bridge::{ExecutionBridge, SpanAttributes};
pub use config::ServerConfig;
pub use controller::{Controller, ControllerState};
pub use error::{ConfigError, OperationError};
pub use graph::{DependencyGraph, GraphBuilder, GraphError};
pub use operation::{InboundMessage, MessageCounter, Operation, Payload, SinkCallback, TokenSink};
pub use schema::SchemaRegistry;
