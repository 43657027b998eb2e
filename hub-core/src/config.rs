//! Hub Configuration Module
//!
//! Cache TTL classes, store limits, the default operation timeout and the
//! delete policy for partitions that still hold children. Configuration is
//! loaded from `HUB_*` environment variables with defaults suitable for
//! development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::ConfigError;

// ============================================================================
// DELETE POLICY
// ============================================================================

/// What deleting an owner does to the rows stored in its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Delete only the owner row; children stay reachable by relation query.
    #[default]
    Orphan,
    /// Refuse to delete an owner that still has children.
    Restrict,
    /// Delete the children together with the owner.
    Cascade,
}

impl FromStr for DeletePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "orphan" => Ok(DeletePolicy::Orphan),
            "restrict" => Ok(DeletePolicy::Restrict),
            "cascade" => Ok(DeletePolicy::Cascade),
            other => Err(ConfigError::InvalidValue {
                field: "delete_policy".to_string(),
                value: other.to_string(),
                reason: "expected one of orphan, restrict, cascade".to_string(),
            }),
        }
    }
}

// ============================================================================
// CACHE SETTINGS
// ============================================================================

/// TTL per class of cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Point entries (`user:<id>`, `contact:<owner>:<id>`).
    pub entity_ttl: Duration,
    /// List entries, plain and filtered.
    pub list_ttl: Duration,
    /// Aggregates such as the per-user dashboard.
    pub aggregate_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            entity_ttl: Duration::from_secs(300),
            list_ttl: Duration::from_secs(300),
            aggregate_ttl: Duration::from_secs(120),
        }
    }
}

// ============================================================================
// STORE SETTINGS
// ============================================================================

/// Limits and location of the durable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub table_name: String,
    /// Maximum items per physical batch write call.
    pub batch_write_limit: usize,
    /// Maximum keys per physical batch get call.
    pub batch_get_limit: usize,
    /// Maximum items in one atomic transaction.
    pub transaction_limit: usize,
    /// Directory of the LMDB environment; `None` keeps data in memory.
    pub data_dir: Option<PathBuf>,
    /// LMDB map size in megabytes.
    pub map_size_mb: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            table_name: "application-table".to_string(),
            batch_write_limit: 25,
            batch_get_limit: 100,
            transaction_limit: 100,
            data_dir: None,
            map_size_mb: 256,
        }
    }
}

// ============================================================================
// HUB CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub cache: CacheSettings,
    pub store: StoreSettings,
    /// Deadline applied to coordinator calls that arrive without one.
    pub operation_timeout: Duration,
    pub delete_policy: DeletePolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            store: StoreSettings::default(),
            operation_timeout: Duration::from_secs(5),
            delete_policy: DeletePolicy::default(),
        }
    }
}

impl HubConfig {
    /// Create HubConfig from environment variables.
    ///
    /// Environment variables:
    /// - `HUB_ENTITY_TTL_SECS` (default: 300)
    /// - `HUB_LIST_TTL_SECS` (default: 300)
    /// - `HUB_AGGREGATE_TTL_SECS` (default: 120)
    /// - `HUB_TABLE_NAME` (default: application-table)
    /// - `HUB_BATCH_WRITE_LIMIT` (default: 25)
    /// - `HUB_BATCH_GET_LIMIT` (default: 100)
    /// - `HUB_TRANSACTION_LIMIT` (default: 100)
    /// - `HUB_DATA_DIR` (default: unset, in-memory)
    /// - `HUB_MAP_SIZE_MB` (default: 256)
    /// - `HUB_OPERATION_TIMEOUT_MS` (default: 5000)
    /// - `HUB_DELETE_POLICY`: orphan, restrict or cascade (default: orphan)
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; `from_env` reads the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());
        let secs = |name: &str, default: Duration| {
            parsed(name).map(Duration::from_secs).unwrap_or(default)
        };
        let count = |name: &str, default: usize| {
            parsed(name).map(|v| v as usize).unwrap_or(default)
        };

        let cache = CacheSettings {
            entity_ttl: secs("HUB_ENTITY_TTL_SECS", defaults.cache.entity_ttl),
            list_ttl: secs("HUB_LIST_TTL_SECS", defaults.cache.list_ttl),
            aggregate_ttl: secs("HUB_AGGREGATE_TTL_SECS", defaults.cache.aggregate_ttl),
        };

        let store = StoreSettings {
            table_name: lookup("HUB_TABLE_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.store.table_name),
            batch_write_limit: count("HUB_BATCH_WRITE_LIMIT", defaults.store.batch_write_limit),
            batch_get_limit: count("HUB_BATCH_GET_LIMIT", defaults.store.batch_get_limit),
            transaction_limit: count("HUB_TRANSACTION_LIMIT", defaults.store.transaction_limit),
            data_dir: lookup("HUB_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            map_size_mb: count("HUB_MAP_SIZE_MB", defaults.store.map_size_mb),
        };

        let operation_timeout = parsed("HUB_OPERATION_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.operation_timeout);

        let delete_policy = lookup("HUB_DELETE_POLICY")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Self {
            cache,
            store,
            operation_timeout,
            delete_policy,
        }
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_store(mut self, store: StoreSettings) -> Self {
        self.store = store;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn with_batch_write_limit(mut self, limit: usize) -> Self {
        self.store.batch_write_limit = limit;
        self
    }

    /// Reject settings the store or coordinator cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("store.batch_write_limit", self.store.batch_write_limit),
            ("store.batch_get_limit", self.store.batch_get_limit),
            ("store.transaction_limit", self.store.transaction_limit),
            ("store.map_size_mb", self.store.map_size_mb),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let ttls = [
            ("cache.entity_ttl", self.cache.entity_ttl),
            ("cache.list_ttl", self.cache.list_ttl),
            ("cache.aggregate_ttl", self.cache.aggregate_ttl),
            ("operation_timeout", self.operation_timeout),
        ];
        for (field, value) in ttls {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: "must be non-zero".to_string(),
                });
            }
        }

        if self.store.table_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "store.table_name".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.cache.entity_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.aggregate_ttl, Duration::from_secs(120));
        assert_eq!(config.store.table_name, "application-table");
        assert_eq!(config.store.batch_write_limit, 25);
        assert_eq!(config.store.batch_get_limit, 100);
        assert_eq!(config.delete_policy, DeletePolicy::Orphan);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = HubConfig::from_lookup(lookup_from(&[
            ("HUB_LIST_TTL_SECS", "30"),
            ("HUB_BATCH_WRITE_LIMIT", "10"),
            ("HUB_DATA_DIR", "/var/lib/hub"),
            ("HUB_OPERATION_TIMEOUT_MS", "250"),
            ("HUB_DELETE_POLICY", "Cascade"),
        ]));
        assert_eq!(config.cache.list_ttl, Duration::from_secs(30));
        assert_eq!(config.store.batch_write_limit, 10);
        assert_eq!(config.store.data_dir, Some(PathBuf::from("/var/lib/hub")));
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.delete_policy, DeletePolicy::Cascade);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = HubConfig::from_lookup(lookup_from(&[
            ("HUB_ENTITY_TTL_SECS", "soon"),
            ("HUB_DELETE_POLICY", "shred"),
        ]));
        assert_eq!(config, HubConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = HubConfig::default().with_batch_write_limit(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let config = HubConfig::default().with_operation_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delete_policy_parse() {
        assert_eq!("restrict".parse::<DeletePolicy>().unwrap(), DeletePolicy::Restrict);
        assert!("nuke".parse::<DeletePolicy>().is_err());
    }
}
