//! Configuration module for the linbot runtime.
//!
//! Layered loading (defaults, file, environment, overrides) and validation
//! of [`LinbotConfig`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{
    ApiConfig, DispatchConfig, LinbotConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, ServerConfig, SpanEventConfig, StateConfig,
};
pub use validation::validate_config;
