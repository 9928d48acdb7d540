//! Configuration loading and representation.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub const STORE_VAR: &str = "TALLY_STORE";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "TALLY_DB_MAX_CONNECTIONS";
pub const RUN_MIGRATIONS_VAR: &str = "TALLY_DB_RUN_MIGRATIONS";
pub const OUTBOX_POLL_MS_VAR: &str = "TALLY_OUTBOX_POLL_MS";
pub const OUTBOX_BATCH_SIZE_VAR: &str = "TALLY_OUTBOX_BATCH_SIZE";
pub const OUTBOX_BUFFER_VAR: &str = "TALLY_OUTBOX_BUFFER";

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingVar(&'static str),

    #[error("unknown store backend '{0}' (expected 'memory' or 'postgres')")]
    UnknownBackend(String),
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
        /// Create the schema on startup.
        run_migrations: bool,
    },
}

/// Outbox stream tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// How long a caught-up stream waits before polling again when no commit
    /// wakeup arrives (commits from other processes are only seen by polling).
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Channel capacity between the reader task and the consumer.
    pub buffer: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
            buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub store: StoreBackend,
    pub outbox: OutboxConfig,
}

impl LedgerConfig {
    pub fn in_memory() -> Self {
        Self {
            store: StoreBackend::Memory,
            outbox: OutboxConfig::default(),
        }
    }

    pub fn postgres(database_url: impl Into<String>) -> Self {
        Self {
            store: StoreBackend::Postgres {
                database_url: database_url.into(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
                run_migrations: true,
            },
            outbox: OutboxConfig::default(),
        }
    }

    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup` (a variable name -> value source).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = lookup(STORE_VAR).unwrap_or_else(|| "memory".to_string());
        let store = match backend.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "" => StoreBackend::Memory,
            "postgres" | "postgresql" => StoreBackend::Postgres {
                database_url: lookup(DATABASE_URL_VAR)
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::MissingVar(DATABASE_URL_VAR))?,
                max_connections: parse_or(&lookup, MAX_CONNECTIONS_VAR, DEFAULT_MAX_CONNECTIONS),
                run_migrations: parse_or(&lookup, RUN_MIGRATIONS_VAR, true),
            },
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let defaults = OutboxConfig::default();
        let poll_ms = parse_or(&lookup, OUTBOX_POLL_MS_VAR, defaults.poll_interval.as_millis() as u64);
        let outbox = OutboxConfig {
            poll_interval: Duration::from_millis(poll_ms),
            batch_size: parse_or(&lookup, OUTBOX_BATCH_SIZE_VAR, defaults.batch_size),
            buffer: parse_or(&lookup, OUTBOX_BUFFER_VAR, defaults.buffer),
        };

        Ok(Self { store, outbox })
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, default = ?default, "unparseable configuration value, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_to_in_memory() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LedgerConfig::in_memory());
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = LedgerConfig::from_lookup(lookup(&[(STORE_VAR, "postgres")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingVar(DATABASE_URL_VAR));
    }

    #[test]
    fn reads_postgres_and_outbox_settings() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (STORE_VAR, "Postgres"),
            (DATABASE_URL_VAR, "postgres://localhost/tally"),
            (MAX_CONNECTIONS_VAR, "4"),
            (RUN_MIGRATIONS_VAR, "false"),
            (OUTBOX_POLL_MS_VAR, "50"),
            (OUTBOX_BATCH_SIZE_VAR, "10"),
        ]))
        .unwrap();

        assert_eq!(
            config.store,
            StoreBackend::Postgres {
                database_url: "postgres://localhost/tally".to_string(),
                max_connections: 4,
                run_migrations: false,
            }
        );
        assert_eq!(config.outbox.poll_interval, Duration::from_millis(50));
        assert_eq!(config.outbox.batch_size, 10);
        assert_eq!(config.outbox.buffer, 256);
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (OUTBOX_BATCH_SIZE_VAR, "lots"),
            (OUTBOX_POLL_MS_VAR, "-1"),
        ]))
        .unwrap();
        assert_eq!(config.outbox, OutboxConfig::default());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert_eq!(
            LedgerConfig::from_lookup(lookup(&[(STORE_VAR, "redis")])).unwrap_err(),
            ConfigError::UnknownBackend("redis".to_string())
        );
    }
}
