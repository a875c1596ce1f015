//! Stderr logging for processes with no queue to log into.
//!
//! Used by the binary before an aggregator exists and by workers started
//! without `--log-queue`.
//!
//! # Environment Variables
//!
//! - `APPLOG_LOG` - Log filter (overrides RUST_LOG)
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::record::Level;

/// Stderr logging configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Base level (default: WARNING)
    pub level: Level,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs (default: false)
    pub show_target: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            level: Level::Warning,
            filter: None,
            show_target: false,
        }
    }
}

impl ConsoleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.show_target = enabled;
        self
    }

    /// Apply `APPLOG_LOG` or `RUST_LOG`, unless a filter is already set.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("APPLOG_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let default = || EnvFilter::new(self.level.tracing_filter().to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                default()
            }),
            None => default(),
        }
    }
}

/// Install a stderr subscriber. Subsequent calls are silently ignored.
pub fn init(config: ConsoleConfig) {
    let layer = fmt::layer()
        .compact()
        .with_target(config.show_target)
        .with_writer(std::io::stderr);

    // Silently ignore if already initialized (idempotent)
    let _ = tracing_subscriber::registry()
        .with(config.build_filter())
        .with(layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_config_defaults() {
        let config = ConsoleConfig::default();
        assert_eq!(config.level, Level::Warning);
        assert!(config.filter.is_none());
        assert!(!config.show_target);
    }

    #[test]
    fn test_console_config_builder() {
        let config = ConsoleConfig::new()
            .with_level(Level::Debug)
            .with_target(true);
        assert_eq!(config.level, Level::Debug);
        assert!(config.show_target);
    }

    #[test]
    fn test_explicit_filter_survives_env_overrides() {
        let config = ConsoleConfig {
            filter: Some("applog=info".to_string()),
            ..ConsoleConfig::default()
        }
        .with_env_overrides();
        assert_eq!(config.filter.as_deref(), Some("applog=info"));
    }

    #[test]
    fn test_invalid_filter_falls_back_to_level() {
        let config = ConsoleConfig {
            filter: Some("applog=loudest".to_string()),
            ..ConsoleConfig::default()
        };
        assert_eq!(
            config.build_filter().max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::WARN)
        );
    }
}
