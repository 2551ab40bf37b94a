//! Configuration validation.

use super::Config;
use crate::error::{PortError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.database.as_os_str().is_empty() {
        return Err(PortError::Config("source.database is required".into()));
    }
    if config.source.r#type != "sqlite3" {
        return Err(PortError::Config(format!(
            "source.type must be 'sqlite3', got '{}'",
            config.source.r#type
        )));
    }

    // Destination validation. A mismatched engine identifier is a startup
    // configuration error, never a runtime failure.
    if config.target.host.is_empty() {
        return Err(PortError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(PortError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(PortError::Config("target.user is required".into()));
    }
    if config.target.r#type != "postgres" {
        return Err(PortError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }

    // Port config validation - only check if explicitly set
    if let Some(0) = config.port.batch_size {
        return Err(PortError::Config(
            "port.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.port.target_connections {
        return Err(PortError::Config(
            "port.target_connections must be at least 1".into(),
        ));
    }

    Ok(())
}
