// Logging setup
//
// Console output through tracing-subscriber, filtered by RUST_LOG or
// LOG_LEVEL, optionally as JSON lines.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "scout=info,scout_durable=info,scout_directory=info";

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Filter directives, e.g. "info" or "scout_durable=debug"
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `RUST_LOG` or `LOG_LEVEL`: log filter
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays parseable.
pub fn init_telemetry(config: &TelemetryConfig) {
    let layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(config.filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(config.filter())
            .boxed()
    };

    tracing_subscriber::registry().with(layer).init();
}
