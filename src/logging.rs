//! Structured logging setup.
//!
//! Console output of the wrapped server is not routed through tracing; it is
//! kept in the [`crate::supervisor::OutputBuffer`]. Tracing carries the
//! supervisor's own events.

use serde::Deserialize;
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{
    Layer, Registry,
    filter::EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Logging format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty human-readable output
    #[default]
    Pretty,
    /// JSON output for log aggregation
    Json,
    /// Compact single-line output
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (pretty, json, compact)
    pub format: LogFormat,
    /// Minimum log level
    pub level: Level,
    /// Include span events (enter/exit)
    pub with_spans: bool,
    /// Include target (module path)
    pub with_target: bool,
    /// Include file name and line number
    pub with_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: Level::INFO,
            with_spans: false,
            with_target: false,
            with_file: false,
        }
    }
}

impl LogConfig {
    /// Create config for JSON logging (unattended hosts).
    pub const fn json() -> Self {
        Self {
            format: LogFormat::Json,
            level: Level::INFO,
            with_spans: true,
            with_target: true,
            with_file: false,
        }
    }

    /// Set the log level.
    #[must_use]
    pub const fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the log format.
    #[must_use]
    pub const fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at startup; later calls are ignored. `RUST_LOG`
/// overrides the configured level when set. Logs go to stderr so stdout
/// stays free for the server console, and colours are only used when
/// stderr is a terminal.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
    let subscriber = tracing_subscriber::registry()
        .with(output_layer(config))
        .with(filter);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn output_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let span_events = if config.with_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let ansi = io::stderr().is_terminal();

    let layer = fmt::layer()
        .with_target(config.with_target)
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_span_events(span_events)
        .with_writer(io::stderr);

    match config.format {
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().with_ansi(ansi).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, Level::INFO);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::default()
            .level(Level::DEBUG)
            .format(LogFormat::Compact);

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    fn test_log_format_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }
        let parsed: Wrapper = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(parsed.format, LogFormat::Json);
    }

    #[test]
    fn test_every_format_builds_a_layer() {
        for format in [LogFormat::Pretty, LogFormat::Json, LogFormat::Compact] {
            let _layer = output_layer(&LogConfig::default().format(format));
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(&LogConfig::default());
        init_logging(&LogConfig::json());
    }
}
