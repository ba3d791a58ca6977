//! Logging infrastructure
//!
//! Structured logging through `tracing`, with selectable format and
//! destination, plus event helpers for the registry, ABI boundary and
//! extension table. Each helper logs under a fixed target so it can be
//! filtered on its own (`registry`, `abi`, `extension`).

use std::path::Path;

use serde::{Deserialize, Serialize};
pub use tracing::{debug, error, info, trace, warn, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format with timestamps
    Pretty,
    /// Compact format for production
    Compact,
    /// JSON format for structured logging
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// File with daily rotation
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Whether to include span events
    pub span_events: bool,
    /// Custom filter directives (e.g., "registry=debug,abi=trace")
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

/// Initialize the global logging system
///
/// Returns a `WorkerGuard` that must be kept alive to flush buffered
/// output. If a global subscriber is already installed the call is ignored
/// and no guard is returned.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(rolling::daily(directory, prefix))
        }
    };

    if install(writer, &config) {
        Some(guard)
    } else {
        None
    }
}

fn install<W>(writer: W, config: &LogConfig) -> bool
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
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

    tracing_subscriber::registry().with(layer).try_init().is_ok()
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(filter_str) => filter_str
            .split(',')
            .map(str::trim)
            .filter(|directive| !directive.is_empty())
            .fold(base_filter, |filter, directive| {
                filter.add_directive(directive.parse().unwrap_or_else(|_| {
                    warn!("Invalid filter directive: {}", directive);
                    config.level.into()
                }))
            }),
        None => base_filter,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Initialize logging with defaults for development
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: true,
        filter: Some("cti=debug,registry=debug,abi=trace".to_string()),
    })
}

/// Initialize logging with defaults for production
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::INFO,
        format: LogFormat::Json,
        output: LogOutput::File {
            directory: log_dir.as_ref().to_string_lossy().to_string(),
            prefix: "cti".to_string(),
        },
        span_events: false,
        filter: Some("cti=info,warn".to_string()),
    })
}

// ============================================================================
// Event helpers
// ============================================================================

#[inline]
pub fn log_registration(registry: &str, name: &str) {
    debug!(target: "registry", registry, name, "registered");
}

#[inline]
pub fn log_duplicate_registration(registry: &str, name: &str) {
    error!(target: "registry", registry, name, "duplicate registration");
}

#[inline]
pub fn log_lookup_miss(registry: &str, name: &str) {
    trace!(target: "registry", registry, name, "lookup found no entry");
}

/// Log entry into a boundary function
#[inline]
pub fn log_boundary_call(entry: &str, args_count: usize) {
    trace!(target: "abi", entry, args_count, "boundary call");
}

#[inline]
pub fn log_boundary_return(entry: &str, status: i32) {
    trace!(target: "abi", entry, status, "boundary return");
}

/// Log a boundary call that ended with a non-zero status
#[inline]
pub fn log_boundary_failure(entry: &str, status: i32, error: &str) {
    warn!(target: "abi", entry, status, error, "boundary call failed");
}

/// Log a body that panicked inside a boundary call
#[inline]
pub fn log_boundary_panic(entry: &str, message: &str) {
    error!(target: "abi", entry, message, "panic caught at boundary");
}

#[inline]
pub fn log_layout_mismatch(
    expected_size: usize,
    expected_align: usize,
    found_size: usize,
    found_align: usize,
) {
    error!(
        target: "abi",
        expected_size,
        expected_align,
        found_size,
        found_align,
        "value layout mismatch"
    );
}

#[inline]
pub fn log_extension_registered(tag: u32, name: &str, copy_on_return: bool) {
    debug!(target: "extension", tag, name, copy_on_return, "extension registered");
}

#[inline]
pub fn log_init(registry_tag: &str) {
    info!(target: "cti", registry_tag, "packed calling convention initialized");
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
            .with_filter("registry=trace");

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.filter, Some("registry=trace".to_string()));
    }

    #[test]
    fn test_invalid_directive_falls_back() {
        let config = LogConfig::new().with_filter("registry=debug, ,not a directive=");
        // Must not panic on a malformed directive.
        let _ = build_filter(&config);
    }

    #[test]
    fn test_logging_functions() {
        log_registration("PackedFunc", "add");
        log_duplicate_registration("PackedFunc", "add");
        log_lookup_miss("PackedFunc", "missing");
        log_boundary_call("cti_packed_func_call", 2);
        log_boundary_return("cti_packed_func_call", 0);
        log_boundary_failure("cti_packed_func_call", 3, "Type mismatch");
        log_boundary_panic("cti_packed_func_call", "boom");
        log_layout_mismatch(8, 8, 16, 8);
        log_extension_registered(32, "Sample", false);
        log_init("PackedFunc");
    }
}
