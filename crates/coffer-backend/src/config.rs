//! Backend configuration.

use std::path::PathBuf;

use coffer_core::DEFAULT_BALLPARK_MS;

use crate::error::{BackendError, Result};

/// Database URL selecting the in-memory store.
pub const MOCKED_DB_URL: &str = "MOCKED";

/// Which store backs the components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbConfig {
    /// In-memory store, lost on drop.
    Mocked,
    /// SQLite database file, or `:memory:`.
    Sqlite { path: PathBuf },
}

impl DbConfig {
    /// Parse a database URL: `MOCKED`, or a SQLite path.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(BackendError::Config("empty database url".into()));
        }
        if url == MOCKED_DB_URL {
            return Ok(Self::Mocked);
        }
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        Ok(Self::Sqlite { path: path.into() })
    }

    pub fn is_mocked(&self) -> bool {
        matches!(self, Self::Mocked)
    }
}

/// Configuration for the backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Store selection.
    pub db: DbConfig,
    /// Accepted distance between a certificate timestamp and server time.
    pub timestamp_ballpark_ms: i64,
    /// Capacity of the event channel. Slow subscribers miss older events.
    pub event_capacity: usize,
    /// Log every rejected command.
    pub debug: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::Mocked,
            timestamp_ballpark_ms: DEFAULT_BALLPARK_MS,
            event_capacity: 256,
            debug: false,
        }
    }
}

impl BackendConfig {
    /// Default configuration on the database at `db_url`.
    pub fn from_db_url(db_url: &str) -> Result<Self> {
        Ok(Self::default().with_db(DbConfig::from_url(db_url)?))
    }

    pub fn with_db(mut self, db: DbConfig) -> Self {
        self.db = db;
        self
    }

    pub fn with_timestamp_ballpark_ms(mut self, tolerance_ms: i64) -> Self {
        self.timestamp_ballpark_ms = tolerance_ms;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_url() {
        assert_eq!(DbConfig::from_url("MOCKED").unwrap(), DbConfig::Mocked);
        assert_eq!(
            DbConfig::from_url(":memory:").unwrap(),
            DbConfig::Sqlite {
                path: ":memory:".into()
            }
        );
        assert_eq!(
            DbConfig::from_url("sqlite:///var/lib/coffer.db").unwrap(),
            DbConfig::Sqlite {
                path: "/var/lib/coffer.db".into()
            }
        );
        assert!(DbConfig::from_url("  ").is_err());
    }

    #[test]
    fn test_builders() {
        let config = BackendConfig::from_db_url("backend.sqlite")
            .unwrap()
            .with_timestamp_ballpark_ms(5_000)
            .with_debug(true);
        assert!(!config.db.is_mocked());
        assert_eq!(config.timestamp_ballpark_ms, 5_000);
        assert!(config.debug);
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.with_event_capacity(16).event_capacity, 16);
    }
}
