//! Structured tracing setup, gated behind the `observability` feature.
//!
//! This crate itself never installs a global subscriber — libraries shouldn't
//! — but an embedding binary can call [`init_tracing`] once at startup to get
//! a sensible default. Everything else in the crate just emits `tracing`
//! events and lets the caller decide how (or whether) to collect them.

use std::sync::OnceLock;

use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Human-readable text, good for a terminal.
    #[default]
    Text,
    /// One JSON object per event, good for log aggregation.
    Json,
    /// Compact single-line text.
    Compact,
}

/// Configuration for [`init_tracing`].
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Minimum level if `RUST_LOG` isn't set (`trace`/`debug`/`info`/`warn`/`error`).
    pub level: String,
    pub format: OutputFormat,
    pub with_target: bool,
    pub with_file: bool,
    pub with_line_number: bool,
    pub span_events: FmtSpan,
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::default(),
            with_target: true,
            with_file: false,
            with_line_number: false,
            span_events: FmtSpan::NONE,
            ansi: true,
        }
    }
}

impl TracingConfig {
    /// JSON output, no ANSI, spans logged on close — suitable for a deployed worker fleet.
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Json,
            with_target: true,
            with_file: false,
            with_line_number: false,
            span_events: FmtSpan::CLOSE,
            ansi: false,
        }
    }

    /// Verbose text output with file/line, for running the pool locally.
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: OutputFormat::Text,
            with_target: true,
            with_file: true,
            with_line_number: true,
            span_events: FmtSpan::NEW | FmtSpan::CLOSE,
            ansi: true,
        }
    }
}

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs a global `tracing` subscriber built from `config`. Safe to call
/// more than once — every call after the first is a no-op.
pub fn init_tracing(config: TracingConfig) {
    if TRACING_INITIALIZED.set(()).is_err() {
        return;
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format {
        OutputFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_file(config.with_file)
                    .with_line_number(config.with_line_number)
                    .with_span_events(config.span_events),
            )
            .with(env_filter)
            .try_init(),
        OutputFormat::Text => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(config.with_target)
                    .with_file(config.with_file)
                    .with_line_number(config.with_line_number)
                    .with_span_events(config.span_events)
                    .with_ansi(config.ansi),
            )
            .with(env_filter)
            .try_init(),
        OutputFormat::Compact => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .compact()
                    .with_target(config.with_target)
                    .with_ansi(config.ansi),
            )
            .with(env_filter)
            .try_init(),
    };

    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {err:?}");
    }
}

/// `init_tracing(TracingConfig::default())`.
pub fn init_default() {
    init_tracing(TracingConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_text_info() {
        let config = TracingConfig::default();
        assert_eq!(config.level, "info");
        assert!(matches!(config.format, OutputFormat::Text));
    }

    #[test]
    fn production_config_is_json_no_ansi() {
        let config = TracingConfig::production();
        assert!(matches!(config.format, OutputFormat::Json));
        assert!(!config.ansi);
    }
}
