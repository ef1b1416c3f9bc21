//! Handler contract and plugin construction.
//!
//! A plugin is a static [`PluginDescriptor`] whose `build` function receives a
//! [`PluginEnv`] and returns a live [`Handler`]. Descriptors are declared in
//! [`PluginGroup`]s; the registry builds a whole catalogue at once.
//!
//! ```rust,ignore
//! pub static PING: PluginDescriptor = PluginDescriptor {
//!     name: "ping",
//!     build: |_env| Ok(Arc::new(Ping)),
//! };
//!
//! pub static BASIC: PluginGroup = PluginGroup {
//!     name: "basic",
//!     plugins: &[&PING],
//! };
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broker::CorrelationBroker;
use crate::control::ProcessControl;
use crate::event::ChatEvent;
use crate::registry::CommandCatalog;
use crate::session::{SessionHandle, SessionTable};

// ─── Handler ─────────────────────────────────────────────────────────────────

/// A command handler.
///
/// `command` and `description` must be non-empty and constant for the
/// lifetime of the handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Command word that triggers this handler.
    fn command(&self) -> &str;

    /// One-line description shown by the help listing.
    fn description(&self) -> &str;

    /// Returns whether `user_id` is in an ongoing conversation with this
    /// handler.
    fn is_engaged(&self, _user_id: i64) -> bool {
        false
    }

    /// Handles a message.
    ///
    /// `args` is the argument text after the command on a command match, or
    /// the whole trimmed message on a session continuation. `Ok(None)` means
    /// no reply.
    async fn handle(&self, args: &str, event: &ChatEvent) -> anyhow::Result<Option<String>>;
}

/// Shared handle to a handler.
pub type BoxedHandler = Arc<dyn Handler>;

// ─── Descriptors ─────────────────────────────────────────────────────────────

/// Factory signature of a plugin.
pub type BuildFn = fn(&PluginEnv) -> anyhow::Result<BoxedHandler>;

/// Static handle to a plugin.
#[derive(Clone, Copy)]
pub struct PluginDescriptor {
    /// Plugin name used in logs.
    pub name: &'static str,
    /// Creates the live handler.
    pub build: BuildFn,
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named set of plugins enabled and disabled together.
#[derive(Debug, Clone, Copy)]
pub struct PluginGroup {
    /// Group name; also the key of the group's config section.
    pub name: &'static str,
    pub plugins: &'static [&'static PluginDescriptor],
}

// ─── PluginEnv ───────────────────────────────────────────────────────────────

/// Call deadlines handed to plugins.
#[derive(Debug, Clone, Copy)]
pub struct ApiTimeouts {
    /// Friend and group list fetches.
    pub roster: Duration,
    /// Single-entity lookups.
    pub lookup: Duration,
}

impl Default for ApiTimeouts {
    fn default() -> Self {
        Self {
            roster: Duration::from_secs(5),
            lookup: Duration::from_secs(10),
        }
    }
}

/// Everything a plugin may depend on, injected at build time.
#[derive(Clone)]
pub struct PluginEnv {
    pub broker: Arc<CorrelationBroker>,
    pub sessions: SessionTable,
    pub control: ProcessControl,
    pub catalog: CommandCatalog,
    pub timeouts: ApiTimeouts,
    /// `plugins` config table; one section per group name.
    plugin_configs: Arc<Value>,
}

impl PluginEnv {
    /// Creates an environment with no plugin configuration.
    pub fn new(
        broker: Arc<CorrelationBroker>,
        sessions: SessionTable,
        control: ProcessControl,
        catalog: CommandCatalog,
    ) -> Self {
        Self {
            broker,
            sessions,
            control,
            catalog,
            timeouts: ApiTimeouts::default(),
            plugin_configs: Arc::new(Value::Object(Default::default())),
        }
    }

    /// Replaces the call deadlines.
    pub fn with_timeouts(mut self, timeouts: ApiTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replaces the plugin config table.
    pub fn with_plugin_configs(mut self, configs: Value) -> Self {
        self.plugin_configs = Arc::new(configs);
        self
    }

    /// Deserialises the config section named `section` into `T`.
    ///
    /// A missing section reads as an empty table, so `T` should use
    /// `#[serde(default)]` for optional fields.
    pub fn config_for<T>(&self, section: &str) -> serde_json::Result<T>
    where
        T: DeserializeOwned,
    {
        match self.plugin_configs.get(section) {
            Some(value) => T::deserialize(value),
            None => T::deserialize(&Value::Object(Default::default())),
        }
    }

    /// Session handle scoped to `command`.
    pub fn session(&self, command: &str) -> SessionHandle {
        self.sessions.handle(command)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::transport::ConnectionSlot;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct AdminConfig {
        admins: Vec<i64>,
    }

    fn env() -> PluginEnv {
        PluginEnv::new(
            Arc::new(CorrelationBroker::new(Arc::new(ConnectionSlot::new()))),
            SessionTable::new(),
            ProcessControl::new(),
            CommandCatalog::detached(),
        )
    }

    #[test]
    fn test_config_section_lookup() {
        let env = env().with_plugin_configs(json!({"system": {"admins": [1, 2]}}));
        let cfg: AdminConfig = env.config_for("system").unwrap();
        assert_eq!(cfg.admins, vec![1, 2]);

        let missing: AdminConfig = env.config_for("echo").unwrap();
        assert!(missing.admins.is_empty());

        let bad = env.with_plugin_configs(json!({"system": {"admins": "all"}}));
        assert!(bad.config_for::<AdminConfig>("system").is_err());
    }
}
