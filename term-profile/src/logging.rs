//! Logging utilities and configuration for term-profile.
//!
//! The library only emits `tracing` events and spans; installing a subscriber is
//! left to the application. [`setup::init_logging`] is a convenience for binaries
//! and tests that want the usual `fmt` output.

use std::collections::BTreeMap;

/// Maximum length of a tag or metadata rendering inside log events and error
/// messages.
pub const MAX_FIELD_LENGTH: usize = 256;

/// Truncates a string to `max_length` bytes, respecting char boundaries.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Renders a string map as `{k=v, ...}`, bounded by [`MAX_FIELD_LENGTH`].
pub fn render_map(map: &BTreeMap<String, String>) -> String {
    let body = map
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    truncate_field(&format!("{{{body}}}"), MAX_FIELD_LENGTH)
}

/// Utilities for setting up structured logging.
pub mod setup {
    use tracing::Level;

    /// Configuration for the logging setup.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for the application
        pub level: Level,
        /// Log level for term-profile itself
        pub profile_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
        /// Emit an event when an instrumented span closes, with its busy and idle time
        pub span_timings: bool,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                profile_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
                span_timings: false,
            }
        }
    }

    impl LoggingConfig {
        /// Creates a configuration for production use.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                profile_level: Level::INFO,
                json_format: true,
                env_filter: None,
                span_timings: false,
            }
        }

        /// Creates a configuration for development use.
        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                profile_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
                span_timings: false,
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_profile_level(mut self, level: Level) -> Self {
            self.profile_level = level;
            self
        }

        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Reports how long merges, parses and fold steps took.
        pub fn with_span_timings(mut self, enabled: bool) -> Self {
            self.span_timings = enabled;
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},term_profile={}",
                    self.level.as_str().to_lowercase(),
                    self.profile_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Installs a global `fmt` subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured filter.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use term_profile::logging::setup::{LoggingConfig, init_logging};
    ///
    /// let config = LoggingConfig::development().with_json_format(true);
    /// init_logging(config).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::fmt::format::FmtSpan;
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let span_events = if config.span_timings {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let fmt_layer = tracing_subscriber::fmt::layer().with_span_events(span_events);
        let fmt_layer = if config.json_format {
            fmt_layer.json().boxed()
        } else {
            fmt_layer.boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::setup::LoggingConfig;
    use super::*;
    use tracing::Level;

    #[test]
    fn test_truncate_field() {
        assert_eq!(truncate_field("hello", 10), "hello");

        let tags = "{country=FR, name=orders, region=eu}";
        assert_eq!(truncate_field(tags, 13), "{country=FR, ...(truncated)");
    }

    #[test]
    fn test_truncate_field_respects_char_boundaries() {
        assert_eq!(truncate_field("héllo", 2), "h...(truncated)");
    }

    #[test]
    fn test_render_map() {
        let map: BTreeMap<String, String> = [("b", "2"), ("a", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(render_map(&map), "{a=1, b=2}");
        assert_eq!(render_map(&BTreeMap::new()), "{}");
    }

    #[test]
    fn test_env_filter() {
        let config = LoggingConfig::default();
        assert_eq!(config.env_filter(), "info,term_profile=debug");

        let config = LoggingConfig::production().with_env_filter("warn");
        assert_eq!(config.env_filter(), "warn");
        assert_eq!(
            LoggingConfig::development()
                .with_level(Level::ERROR)
                .env_filter(),
            "error,term_profile=debug"
        );
        assert!(!config.span_timings);
        assert!(LoggingConfig::default().with_span_timings(true).span_timings);
    }
}
