//! Tracing initialisation
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` taken from
//! `RUST_LOG` (falling back to [`DEFAULT_FILTER`]) and either human-readable
//! or JSON output.

use hub_core::{ConfigError, HubResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "hub_service=debug,hub_storage=info,info";

/// Logging configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Emit one JSON object per event instead of formatted lines.
    pub json: bool,
    /// Filter directives applied when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: std::env::var("HUB_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber. Call once at startup; a second call fails
/// because a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> HubResult<()> {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ConfigError::InvalidValue {
        field: "tracing".to_string(),
        value: if config.json { "json" } else { "text" }.to_string(),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(json = config.json, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let config = TelemetryConfig {
            json: false,
            default_filter: DEFAULT_FILTER.to_string(),
        };
        // Whatever RUST_LOG holds, building the filter must not panic.
        let _ = config.env_filter();
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig::default().json(true);
        let _ = init_tracing(&config);
        let err = init_tracing(&config).unwrap_err();
        assert!(matches!(err, hub_core::HubError::Config(_)));
    }
}
