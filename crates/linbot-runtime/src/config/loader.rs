//! Configuration loader using figment.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Config file (`linbot.toml` / `config.toml`, or an explicit `--config` path)
//! 3. Environment variables (`LINBOT_*`)
//! 4. Explicit overrides set with [`ConfigLoader::set`] (command line flags)
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: TOML files
//! - `yaml-config`: YAML files (`linbot.yaml`, `linbot.yml`)
//!
//! # Environment Variable Mapping
//!
//! `LINBOT_` prefix, `__` as the nesting separator:
//!
//! - `LINBOT_SERVER__PORT=9000` → `server.port = 9000`
//! - `LINBOT_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `LINBOT_PLUGINS__SYSTEM__ADMINS=[10001]` → `plugins.system.admins = [10001]`

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::LinbotConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "LINBOT_";

/// Configuration loader with figment-based multi-source support.
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .file("./linbot.toml")
///     .set("server.port", 9000)
///     .load()?;
/// ```
pub struct ConfigLoader {
    /// Search paths for configuration files.
    search_paths: Vec<PathBuf>,
    /// Whether to load environment variables.
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
    /// Highest-priority values.
    overrides: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
            overrides: Figment::new(),
        }
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Overrides one dotted key, e.g. `set("server.port", 9000)`.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<LinbotConfig> {
        let figment = self.build_figment()?;
        let config: LinbotConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            port = config.server.port,
            logging_level = %config.logging.level,
            plugin_sections = config.plugins.len(),
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    fn build_figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(LinbotConfig::default()));

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    /// Merges a single config file into the figment, dispatching on file extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("linbot"));
        }
        paths
    }

    /// Loads the first config file found in the search paths.
    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let mut candidates: Vec<&str> = Vec::new();
        #[cfg(feature = "toml-config")]
        candidates.extend(["linbot.toml", "config.toml"]);
        #[cfg(feature = "yaml-config")]
        candidates.extend(["linbot.yaml", "linbot.yml"]);

        for dir in self.resolve_search_paths() {
            for name in &candidates {
                let path = dir.join(name);
                if !path.exists() {
                    continue;
                }
                info!(path = %path.display(), "Loading configuration file");
                match Self::merge_config_file(figment.clone(), &path) {
                    Ok(merged) => return merged,
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping configuration file"),
                }
            }
        }

        warn!("No configuration file found, using defaults");
        figment
    }
}

// =============================================================================
// Tests
// =============================================================================
