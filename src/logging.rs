//! Logging infrastructure for luacall
//!
//! Structured `tracing` events around every call, with a configurable
//! subscriber (pretty, compact or JSON; stderr, stdout or daily-rolling files).

use once_cell::sync::OnceCell;
use tracing::{debug, trace, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::core::CallError;

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rolling file
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span open/close events
    pub span_events: bool,
    /// Extra filter directives (e.g., "luacall::invoke=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `LUACALL_LOG_LEVEL`, `LUACALL_LOG_JSON` and
    /// `LUACALL_LOG_DIR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LUACALL_LOG_LEVEL") {
            if let Some(level) = parse_level(&level) {
                config.level = level;
            }
        }

        if std::env::var("LUACALL_LOG_JSON").is_ok() {
            config.format = LogFormat::Json;
        }

        if let Ok(dir) = std::env::var("LUACALL_LOG_DIR") {
            config.output = LogOutput::File {
                directory: dir,
                prefix: "luacall".to_string(),
            };
        }

        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Parse a level name; `None` for anything unrecognized.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Install the global subscriber.
///
/// Only the first call installs anything; later calls return `None`. Keep the
/// returned guard alive so buffered lines are flushed.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        guard = install(&config);
    });
    guard
}

/// Initialize logging from the environment.
pub fn init() -> Option<WorkerGuard> {
    init_logging(LogConfig::from_env())
}

pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

fn install(config: &LogConfig) -> Option<WorkerGuard> {
    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(rolling::daily(directory, prefix))
        }
    };

    let filter = build_filter(config);
    let spans = span_events_config(config.span_events);
    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .pretty()
            .with_span_events(spans)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(writer)
            .compact()
            .with_span_events(spans)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .with_span_events(spans)
            .with_filter(filter)
            .boxed(),
    };

    // Another subscriber may already be installed (e.g. by the host).
    tracing_subscriber::registry().with(layer).try_init().ok()?;
    Some(guard)
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("luacall={}", config.level.as_str().to_lowercase())));

    match &config.filter {
        Some(directives) => directives
            .split(',')
            .filter(|d| !d.trim().is_empty())
            .fold(base, |filter, directive| match directive.trim().parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => {
                    tracing::warn!("Invalid filter directive: {}", directive);
                    filter
                }
            }),
        None => base,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

// ============================================================================
// Call-path events
// ============================================================================

#[inline]
pub fn log_call(function: &str, payload_len: usize) {
    trace!(target: "luacall::invoke", function, payload_len, "invoking");
}

#[inline]
pub fn log_call_success(function: &str, result_len: usize) {
    trace!(target: "luacall::invoke", function, result_len, "invoke returned");
}

/// Failures are data for the host, so they are logged at debug only.
#[inline]
pub fn log_call_failure(function: &str, error: &CallError) {
    debug!(
        target: "luacall::invoke",
        function,
        kind = %error.kind(),
        error = %error,
        "invoke failed"
    );
}

#[inline]
pub fn log_type_conversion(from: &str, to: &str) {
    trace!(target: "luacall::marshal", from, to, "lossy conversion");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_filter("luacall=trace");

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.filter, Some("luacall=trace".to_string()));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_init_idempotent() {
        let _first = init_logging(LogConfig::new().with_level(Level::ERROR));
        let second = init_logging(LogConfig::new());
        assert!(second.is_none());
        assert!(is_initialized());
    }

    #[test]
    fn test_call_events_do_not_panic() {
        log_call("f", 3);
        log_call_success("f", 2);
        log_call_failure("f", &CallError::not_found());
        log_type_conversion("table", "null");
    }
}
