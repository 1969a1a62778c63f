//! Logging setup for the plugin bus host, built on `tracing` +
//! `tracing-subscriber` (+ `tracing-appender` for optional file rotation).

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};

/// Span event configuration for logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    pub const ACTIVE: Self = Self {
        new: false,
        enter: true,
        exit: true,
        close: false,
    };

    fn to_fmt_span(self) -> fmt::format::FmtSpan {
        let mut span = fmt::format::FmtSpan::NONE;
        if self.new {
            span |= fmt::format::FmtSpan::NEW;
        }
        if self.enter {
            span |= fmt::format::FmtSpan::ENTER;
        }
        if self.exit {
            span |= fmt::format::FmtSpan::EXIT;
        }
        if self.close {
            span |= fmt::format::FmtSpan::CLOSE;
        }
        span
    }
}

/// Holds the `tracing-appender` worker guard, if file logging was
/// configured. Dropping this stops the background flush thread, so the
/// caller must keep it alive for the lifetime of the process.
#[derive(Default)]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// A builder for configuring logging, mirroring the shape of a plain
/// `tracing_subscriber::registry()` pipeline.
#[derive(Default)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    span_events: SpanEvents,
    with_target: bool,
    with_thread_ids: bool,
    with_file: bool,
    with_line_number: bool,
    file_directory: Option<PathBuf>,
    #[cfg(feature = "json-log")]
    json: bool,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a builder from a loaded [`LoggingConfig`].
    pub fn from_config(config: &LoggingConfig) -> Self {
        let level = match config.level.to_lowercase().as_str() {
            "trace" => Some(tracing::Level::TRACE),
            "debug" => Some(tracing::Level::DEBUG),
            "warn" => Some(tracing::Level::WARN),
            "error" => Some(tracing::Level::ERROR),
            _ => Some(tracing::Level::INFO),
        };

        let builder = Self::new()
            .with_level(level.unwrap_or(tracing::Level::INFO))
            .with_target(config.with_target)
            .with_file_directory(config.file_directory.as_ref().map(PathBuf::from));

        #[cfg(feature = "json-log")]
        let builder = if config.format == LogFormat::Json {
            builder.json()
        } else {
            builder
        };
        #[cfg(not(feature = "json-log"))]
        let _ = LogFormat::Text;

        builder
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn with_span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    pub fn with_line_number(mut self, enabled: bool) -> Self {
        self.with_line_number = enabled;
        self
    }

    /// When set, logs are additionally written to a daily-rotating file in
    /// this directory via `tracing-appender`, in addition to stderr.
    pub fn with_file_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.file_directory = directory;
        self
    }

    #[cfg(feature = "json-log")]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let base_filter = match self.level {
            Some(tracing::Level::TRACE) => "trace",
            Some(tracing::Level::DEBUG) => "debug",
            Some(tracing::Level::WARN) => "warn",
            Some(tracing::Level::ERROR) => "error",
            _ => "info",
        };

        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_filter));
        for directive in &self.directives {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }

    fn build_fmt_layer<S>(&self) -> fmt::Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fmt::layer()
            .with_span_events(self.span_events.to_fmt_span())
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
    }

    /// Initializes the global subscriber. Panics if one is already set.
    pub fn init(self) -> LoggingGuard {
        self.try_init().expect("failed to install tracing subscriber")
    }

    /// Tries to initialize the global subscriber, returning an error
    /// instead of panicking if one is already set.
    pub fn try_init(self) -> Result<LoggingGuard, Box<dyn std::error::Error + Send + Sync>> {
        let filter = self.build_filter();
        let (file_layer, file_guard) = match &self.file_directory {
            Some(dir) => {
                let appender = tracing_appender::rolling::daily(dir, "plugin-bus.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                (Some(fmt::layer().with_ansi(false).with_writer(non_blocking)), Some(guard))
            }
            None => (None, None),
        };

        #[cfg(feature = "json-log")]
        if self.json {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_span_events(self.span_events.to_fmt_span()))
                .with(file_layer)
                .with(filter)
                .try_init()?;
            return Ok(LoggingGuard { _file_guard: file_guard });
        }

        tracing_subscriber::registry()
            .with(self.build_fmt_layer())
            .with(file_layer)
            .with(filter)
            .try_init()?;
        Ok(LoggingGuard { _file_guard: file_guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_maps_level_strings() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Text,
            file_directory: None,
            with_target: false,
        };
        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, Some(tracing::Level::DEBUG));
        assert!(!builder.with_target);
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        let config = LoggingConfig {
            level: "noisy".to_string(),
            format: LogFormat::Text,
            file_directory: None,
            with_target: true,
        };
        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, Some(tracing::Level::INFO));
    }
}
