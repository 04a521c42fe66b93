//! docintake-server: serves the legal-advice extraction controllers over
//! HTTP and WebSocket, streaming completions from an Ollama-compatible model
//! server.
//!
//! ```text
//! docintake-server --port 3000 --ollama-base-url http://localhost:11434
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};

use docintake_server::llm::{ModelConfig, OllamaProvider};
use docintake_server::network::{NetworkConfig, TlsConfig};
use docintake_server::streaming::{ConsumerOptions, RetryPolicy};
use docintake_server::telemetry::{init_tracing, LogFormat, DEFAULT_FILTER};
use docintake_server::{build_dependency_graph, build_module, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "docintake-server", version, about = "docintake extraction server")]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "DOCINTAKE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "DOCINTAKE_PORT", default_value_t = 3000)]
    port: u16,

    /// PEM certificate chain. Serves TLS together with `--tls-key`.
    #[arg(long, env = "DOCINTAKE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, env = "DOCINTAKE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Allowed CORS origins, comma separated. `*` allows any.
    #[arg(long, env = "DOCINTAKE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Base URL of the Ollama-compatible model server.
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = "http://localhost:11434")]
    ollama_base_url: String,

    /// Model used for completions.
    #[arg(long, env = "LLM_MODEL", default_value = "llama3.1")]
    model: String,

    /// Retries allowed per stream read on transient failures.
    #[arg(long, env = "STREAM_MAX_RETRIES", default_value_t = 5)]
    stream_max_retries: u32,

    /// Seconds a single stream read may stay pending.
    #[arg(long, env = "STREAM_IDLE_TIMEOUT_SECS", default_value_t = 30)]
    stream_idle_timeout_secs: u64,

    /// Service label attached to operation spans.
    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = "docintake")]
    service_name: String,

    /// Log output format.
    #[arg(long, env = "DOCINTAKE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Keep WebSocket sessions open after the first handled message.
    #[arg(long)]
    keep_sockets_open: bool,
}

impl Cli {
    fn network_config(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            cors_origins: self.cors_origins.clone(),
            ..NetworkConfig::default()
        }
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            service_name: self.service_name.clone(),
            stream: ConsumerOptions {
                retry: RetryPolicy {
                    max_retries: self.stream_max_retries,
                    ..RetryPolicy::default()
                },
                idle_timeout: Duration::from_secs(self.stream_idle_timeout_secs),
            },
            ws_close_after_response: !self.keep_sockets_open,
        }
    }

    fn model_config(&self) -> ModelConfig {
        ModelConfig {
            base_url: self.ollama_base_url.clone(),
            model: self.model.clone(),
            ..ModelConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, DEFAULT_FILTER)?;

    let server = cli.server_config();
    let provider = OllamaProvider::new(cli.model_config()).context("unable to build model client")?;
    info!(
        base_url = %provider.config().base_url,
        model = %provider.config().model,
        "model provider configured"
    );

    let graph = build_dependency_graph(&server, Arc::new(provider))?;
    let mut module = build_module(cli.network_config(), server, Arc::new(graph))?;
    let port = module.start().await?;
    info!(port, "docintake server listening");

    module.serve(shutdown_signal()).await?;
    info!("docintake server stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
