//! Tracing subscriber setup for the server binary.

use std::io::{self, IsTerminal};

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,docintake_server=debug,tower_http=info";

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event, span fields flattened in.
    Json,
    /// Human-readable lines, coloured on terminals.
    #[default]
    Pretty,
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Service identity shared through the dependency graph's telemetry layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryContext {
    pub service_name: String,
}

/// Parses a filter directive string such as `info,docintake_server=debug`.
///
/// # Errors
///
/// Returns `TelemetryError::Filter` for malformed directives.
pub fn parse_filter(spec: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(spec).map_err(|err| TelemetryError::Filter(err.to_string()))
}

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
///
/// # Errors
///
/// Returns an error if the filter is malformed or a global subscriber is
/// already installed.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(default_filter)?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr);

    let installed = match format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Pretty => builder.with_ansi(io::stderr().is_terminal()).try_init(),
    };
    installed.map_err(|err| TelemetryError::Install(err.to_string()))
}
