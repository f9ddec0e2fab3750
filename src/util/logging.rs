//! Structured logging setup for layerpack
//!
//! Logging goes through the `tracing` ecosystem and is always written to
//! stderr, so stdout stays reserved for command output (rendered
//! Dockerfiles, JSON reports) and for the launched container's own streams.
//!
//! # Example
//!
//! ```no_run
//! use layerpack::util::logging;
//!
//! logging::init_from_env();
//!
//! tracing::info!(tag = "demo:latest", "Build finished");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level for layerpack's own targets
    pub level: Level,

    /// Use JSON output format
    pub use_json: bool,

    /// Include the module target (e.g., layerpack::build) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Creates a logging configuration with the specified level
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with source locations, for log collectors
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
        }
    }
}

/// Parses a log level from a string
///
/// Parsing is case-insensitive. Unknown values fall back to `Level::INFO`
/// with a warning on stderr.
///
/// ```
/// use layerpack::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// assert_eq!(parse_level("nope"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn build_filter(level: Level) -> EnvFilter {
    // RUST_LOG wins over the configured level when it is set
    if env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let mut filter = EnvFilter::new("warn");
    if let Ok(directive) = format!("layerpack={}", level).parse() {
        filter = filter.add_directive(directive);
    }
    filter
}

/// Initializes the logging system with the provided configuration
///
/// Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

/// Initializes logging with default configuration
pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Initializes logging from environment variables
///
/// Reads:
/// - `LAYERPACK_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
/// - `LAYERPACK_LOG_JSON` - Use JSON output (true/false)
/// - `RUST_LOG` - Standard filter, overrides the level when set
pub fn init_from_env() {
    let level_str = env::var("LAYERPACK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_logging(LoggingConfig {
        level: parse_level(&level_str),
        use_json: json_from_env(),
        ..Default::default()
    });
}

/// Whether `LAYERPACK_LOG_JSON` asks for JSON output
pub fn json_from_env() -> bool {
    env::var("LAYERPACK_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false)
}
