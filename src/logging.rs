//! Logging setup for domain-injector
//!
//! Every event the crate emits uses the `domain_injector` target. This
//! module installs a `tracing-subscriber` formatter for applications that
//! do not configure tracing themselves.
//!
//! # Features
//!
//! - `logging` - Emit tracing events (default)
//! - `logging-json` - JSON structured output
//! - `logging-pretty` - Colorful multi-line output
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_injector::logging;
//!
//! // JSON if logging-json is enabled, pretty otherwise
//! logging::init();
//!
//! // Only this crate's events, at TRACE
//! logging::builder()
//!     .trace()
//!     .injector_only()
//!     .pretty()
//!     .init();
//! ```

use tracing::Level;

/// The target every event of this crate is emitted under
pub const TARGET: &str = "domain_injector";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logging (production default)
    #[default]
    Json,
    /// Pretty colorful output (development)
    Pretty,
    /// Compact single-line output
    Compact,
}

/// Builder for the subscriber installed by [`LoggingBuilder::init`]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
        }
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum log level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Resolution steps and injection points (most verbose)
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// Registrations and domain lifecycle
    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    /// Duplicate registrations, cycles and failed injections only
    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    /// Filter to a single target
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show domain-injector events
    pub fn injector_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// The `EnvFilter` directive this builder installs
    pub fn filter_directive(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        match self.target {
            Some(target) => format!("{target}={level}"),
            None => level,
        }
    }

    /// Install the subscriber.
    ///
    /// Returns `false` if a global subscriber was already set. Without
    /// `logging-json` or `logging-pretty` this installs nothing.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) -> bool {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = EnvFilter::new(self.filter_directive());

        macro_rules! install {
            ($layer:expr) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        $layer
                            .with_file(self.with_file)
                            .with_line_number(self.with_line_number)
                            .with_thread_ids(self.with_thread_ids)
                            .with_target(true),
                    )
                    .try_init()
                    .is_ok()
            };
        }

        match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => install!(fmt::layer().json()),
            // Without JSON support the default format falls back to pretty
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => install!(fmt::layer().pretty()),
            LogFormat::Pretty => install!(fmt::layer().pretty()),
            LogFormat::Compact => install!(fmt::layer().compact()),
        }
    }

    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) -> bool {
        false
    }
}

/// Create a new logging builder
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize logging at DEBUG: JSON if `logging-json` is enabled, pretty
/// otherwise.
pub fn init() -> bool {
    if cfg!(feature = "logging-json") {
        init_json()
    } else {
        init_pretty()
    }
}

/// JSON output for log aggregation.
///
/// # Example output
/// ```json
/// {"timestamp":"2026-01-01T00:00:00.000Z","level":"DEBUG","fields":{"message":"Domain active","domain":"domain-1","name":"app","active":1},"target":"domain_injector"}
/// ```
pub fn init_json() -> bool {
    builder().json().debug().init()
}

/// Human-readable output for development.
///
/// # Example output
/// ```text
///   2026-01-01T00:00:00.000Z DEBUG domain_injector: Registering service, service: "app::Clock", lifetime: "lazy_singleton", depth: 0
/// ```
pub fn init_pretty() -> bool {
    builder().pretty().debug().init()
}

/// Only domain-injector events, at DEBUG
pub fn init_injector_only() -> bool {
    builder().injector_only().debug().init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.target.is_none());
        assert_eq!(builder.filter_directive(), "debug");
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .pretty()
            .with_file()
            .with_line_number()
            .injector_only();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Pretty);
        assert!(builder.with_file);
        assert!(builder.with_line_number);
        assert_eq!(builder.filter_directive(), "domain_injector=trace");
    }
}
