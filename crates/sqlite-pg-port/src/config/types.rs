//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (SQLite).
    pub source: SourceConfig,

    /// Destination database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Port behavior configuration.
    #[serde(default)]
    pub port: PortConfig,
}

/// Source database (SQLite) configuration.
///
/// The source is a snapshot file and must not be in use by a running server;
/// it is read over a single shared connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "sqlite3" for now).
    #[serde(default = "default_sqlite")]
    pub r#type: String,

    /// Path to the SQLite database file.
    pub database: PathBuf,
}

/// Destination database (PostgreSQL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "postgres" for now).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,
}

/// Port behavior configuration.
///
/// Fields use `Option<T>` to distinguish "not set" (use the default) from an
/// explicitly configured value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Rows per batch read from the source (default: 1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Maximum destination connections; bounds planner/copier concurrency
    /// (default: 8).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_connections: Option<usize>,
}

impl PortConfig {
    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(1000)
    }

    pub fn get_target_connections(&self) -> usize {
        self.target_connections.unwrap_or(8)
    }
}

// Default value functions for serde

fn default_sqlite() -> String {
    "sqlite3".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_pg_port() -> u16 {
    5432
}
