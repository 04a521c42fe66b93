//! Built-in HTTP handlers and the shared `AppState`.
//!
//! Controller routes are mounted separately by the service layer; this
//! module only carries the state they extract and the operational endpoints.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler, root_handler, schemas_handler};

use std::sync::Arc;
use std::time::Instant;

use super::{ConnectionRegistry, NetworkConfig, ShutdownController};
use crate::service::{ExecutionBridge, SchemaRegistry, ServerConfig};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Open WebSocket sessions.
    pub registry: Arc<ConnectionRegistry>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, TLS, per-connection settings).
    pub config: Arc<NetworkConfig>,
    pub server: Arc<ServerConfig>,
    /// Runs every controller operation.
    pub bridge: ExecutionBridge,
    /// Wire schemas registered by HTTP controllers.
    pub schemas: Arc<SchemaRegistry>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// Ready state with default configs over `graph`.
#[cfg(test)]
pub(crate) fn test_state(graph: crate::service::DependencyGraph) -> AppState {
    let server = ServerConfig::default();
    let state = AppState {
        registry: Arc::new(ConnectionRegistry::new()),
        shutdown: Arc::new(ShutdownController::new()),
        config: Arc::new(NetworkConfig::default()),
        bridge: ExecutionBridge::new(Arc::new(graph), server.service_name.as_str()),
        server: Arc::new(server),
        schemas: Arc::new(SchemaRegistry::new()),
        start_time: Instant::now(),
    };
    state.shutdown.set_ready();
    state
}
