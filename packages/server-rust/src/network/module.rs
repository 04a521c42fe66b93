//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `mount()` subscribes controllers,
//! `start()` binds the TCP listener, and `serve()` accepts connections until
//! the shutdown signal fires.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::connection::ConnectionRegistry;
use super::handlers::{
    health_handler, liveness_handler, readiness_handler, root_handler, schemas_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::{
    ConfigError, Controller, DependencyGraph, ExecutionBridge, SchemaRegistry, ServerConfig,
};

/// Manages the full HTTP/WebSocket server lifecycle.
///
/// 1. `new()` -- allocates shared state (registry, shutdown controller, bridge)
/// 2. `mount()` -- subscribes each controller onto the route table
/// 3. `start()` -- binds TCP listener to the configured address
/// 4. `serve()` -- begins accepting connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    server: Arc<ServerConfig>,
    listener: Option<TcpListener>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
    bridge: ExecutionBridge,
    schemas: Arc<SchemaRegistry>,
    routes: Router<AppState>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, server: ServerConfig, graph: Arc<DependencyGraph>) -> Self {
        let bridge = ExecutionBridge::new(graph, server.service_name.as_str());
        Self {
            config,
            server: Arc::new(server),
            listener: None,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
            bridge,
            schemas: Arc::new(SchemaRegistry::new()),
            routes: Router::new(),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub fn schemas(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.schemas)
    }

    /// Subscribes `controller`, adding its routes and wire schemas.
    ///
    /// # Errors
    ///
    /// Returns the controller's configuration error. Startup should abort.
    pub fn mount(&mut self, mut controller: Controller) -> Result<&mut Self, ConfigError> {
        let routes = std::mem::take(&mut self.routes);
        self.routes = controller.subscribe(routes, &self.schemas)?;
        Ok(self)
    }

    fn state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            server: Arc::clone(&self.server),
            bridge: self.bridge.clone(),
            schemas: Arc::clone(&self.schemas),
            start_time: self.start_time,
        }
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Built-in routes:
    /// - `GET /` -- `{"success": true}`
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    /// - `GET /schemas` -- registered wire schemas
    ///
    /// plus every mounted controller route.
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/schemas", get(schemas_handler))
            .merge(self.routes.clone())
            .layer(DefaultBodyLimit::disable())
            .layer(build_http_layers(&self.config))
            .with_state(self.state())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("unable to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then drains.
    ///
    /// When the signal fires, health moves to Draining and every open socket
    /// is cancelled so its session closes with 1001. After the listener
    /// stops, waits up to `drain_timeout` for in-flight work.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.build_router();

        let registry = Arc::clone(&self.registry);
        let shutdown_ctrl = Arc::clone(&self.shutdown);
        let signal = async move {
            shutdown.await;
            begin_drain(&registry, &shutdown_ctrl);
        };

        self.shutdown.set_ready();

        if let Some(tls_config) = &self.config.tls {
            serve_tls(listener, router, tls_config, signal).await?;
        } else {
            serve_plain(listener, router, signal).await?;
        }

        wait_for_drain(&self.shutdown, self.config.connection.drain_timeout).await;
        Ok(())
    }
}

/// Serves plain HTTP/WS connections using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP/WS connections");

    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await?;
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &TlsConfig,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .context("failed to load TLS certificates")?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        signal.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

/// Moves to Draining and cancels every open socket session.
fn begin_drain(registry: &ConnectionRegistry, shutdown_ctrl: &ShutdownController) {
    shutdown_ctrl.trigger_shutdown();
    let handles = registry.drain_all();
    if !handles.is_empty() {
        info!("Draining {} connections", handles.len());
    }
}

async fn wait_for_drain(shutdown_ctrl: &ShutdownController, timeout: Duration) {
    if shutdown_ctrl.wait_for_drain(timeout).await {
        info!("All connections drained successfully");
    } else {
        warn!(
            in_flight = shutdown_ctrl.in_flight_count(),
            "Drain timeout expired with in-flight work remaining"
        );
    }
}
