//! Error types for the porting library.

use thiserror::Error;

/// Main error type for porting operations.
#[derive(Error, Debug)]
pub enum PortError {
    /// Configuration error (invalid YAML, missing fields, wrong engine type)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database error
    #[error("Source database error: {0}")]
    Source(#[from] rusqlite::Error),

    /// Destination database error
    #[error("Destination database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Batch insert failed for a specific table
    #[error("Insert failed for table {table}: {message}")]
    Insert { table: String, message: String },

    /// Table planning/setup failed
    #[error("Setup failed for table {table}: {message}")]
    Setup { table: String, message: String },

    /// A spawned worker task failed or panicked
    #[error("Task error: {0}")]
    Task(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PortError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        PortError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create an Insert error
    pub fn insert(table: impl Into<String>, message: impl Into<String>) -> Self {
        PortError::Insert {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Setup error
    pub fn setup(table: impl Into<String>, message: impl Into<String>) -> Self {
        PortError::Setup {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for porting operations.
pub type Result<T> = std::result::Result<T, PortError>;
