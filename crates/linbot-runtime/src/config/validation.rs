//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LinbotConfig, LogOutput};

/// Validates the entire configuration.
pub fn validate_config(config: &LinbotConfig) -> ConfigResult<()> {
    validate_port(config.server.port)?;
    validate_path(&config.server.path)?;

    if config.api.roster_timeout_ms == 0 || config.api.lookup_timeout_ms == 0 {
        return Err(ConfigError::validation("API timeouts must be greater than 0"));
    }

    if config.state.path.as_os_str().is_empty() {
        return Err(ConfigError::validation("state.path must not be empty"));
    }

    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output = \"file\"",
        ));
    }

    for (name, section) in &config.plugins {
        if !section.is_object() {
            return Err(ConfigError::validation(format!(
                "plugins.{name} must be a table"
            )));
        }
    }

    Ok(())
}

/// Validates a port number.
fn validate_port(port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

/// Validates a path.
fn validate_path(path: &str) -> ConfigResult<()> {
    if !path.starts_with('/') {
        return Err(ConfigError::validation("Path must start with '/'"));
    }
    Ok(())
}
