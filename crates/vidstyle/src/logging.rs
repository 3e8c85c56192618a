//! Subscriber setup for binaries and tools embedding the pipeline.

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::LoggingError;

/// Installs the global tracing subscriber. `log` records from the worker
/// pool and tracker are bridged into it. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;

    LogTracer::init().map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    let result = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true),
            ),
        ),
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false)),
        ),
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// Filter from `RUST_LOG` when set, otherwise from the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.level.clone());

    EnvFilter::try_new(&directives).map_err(|e| LoggingError::Filter {
        filter: directives,
        message: e.to_string(),
    })
}
