//! Plugin registry.
//!
//! Owns the live handlers, their grouping, and the persisted toggle state.
//! Handlers are kept in registration order, which is also dispatch order.
//!
//! # Persistence
//!
//! Every mutation writes the whole [`PersistedState`] through the injected
//! [`StateStore`]. A failed write is logged and the in-memory state stays
//! authoritative; the write is retried with the next mutation.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::handler::{BoxedHandler, PluginEnv, PluginGroup};
use crate::session::SessionTable;
use crate::state::{PersistedState, StateStore};

/// A registered command as seen by listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub command: String,
    pub description: String,
    pub enabled: bool,
    pub group: String,
}

/// A plugin group as seen by listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub name: String,
    /// `true` when every member is enabled.
    pub enabled: bool,
    pub commands: Vec<String>,
}

struct Entry {
    handler: BoxedHandler,
    group: String,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<Entry>,
    groups: Vec<(String, Vec<String>)>,
    persisted: PersistedState,
    /// In-memory state differs from what the store last accepted.
    dirty: bool,
    /// Engagements of a disabled command are ended here.
    sessions: Option<SessionTable>,
}

impl RegistryState {
    fn is_enabled(&self, command: &str) -> bool {
        self.persisted
            .plugin_states
            .get(command)
            .copied()
            .unwrap_or(true)
    }

    fn contains(&self, command: &str) -> bool {
        self.entries.iter().any(|e| e.handler.command() == command)
    }

    fn group_members(&self, name: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, commands)| commands.as_slice())
    }

    fn command_infos(&self) -> Vec<CommandInfo> {
        self.entries
            .iter()
            .map(|e| CommandInfo {
                command: e.handler.command().to_string(),
                description: e.handler.description().to_string(),
                enabled: self.is_enabled(e.handler.command()),
                group: e.group.clone(),
            })
            .collect()
    }

    fn release_sessions(&self, command: &str) {
        if let Some(sessions) = &self.sessions {
            sessions.release_command(command);
        }
    }

    /// Brings `plugin_states` in line with the live handlers.
    fn reconcile(&mut self) -> bool {
        let live: HashSet<String> = self
            .entries
            .iter()
            .map(|e| e.handler.command().to_string())
            .collect();

        let before = self.persisted.plugin_states.len();
        self.persisted
            .plugin_states
            .retain(|command, _| live.contains(command));
        let pruned = before - self.persisted.plugin_states.len();

        let mut added = 0;
        for command in live {
            if !self.persisted.plugin_states.contains_key(&command) {
                self.persisted.plugin_states.insert(command, true);
                added += 1;
            }
        }

        if pruned + added > 0 {
            debug!(pruned, added, "Reconciled plugin states");
            self.dirty = true;
        }
        pruned + added > 0
    }
}

/// Validates a handler against the contract.
fn check_contract(handler: &BoxedHandler) -> Result<(), &'static str> {
    if handler.command().trim().is_empty() {
        return Err("empty command");
    }
    if handler.description().trim().is_empty() {
        return Err("empty description");
    }
    Ok(())
}

// ─── PluginRegistry ──────────────────────────────────────────────────────────

/// Registry of command handlers and their toggle state.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PluginRegistry {
    state: Arc<RwLock<RegistryState>>,
    store: Arc<dyn StateStore>,
}

impl PluginRegistry {
    /// Creates an empty registry seeded from `store`.
    ///
    /// An unreadable store is logged and treated as empty.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        let persisted = store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load plugin state, starting from defaults");
            PersistedState::default()
        });
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                persisted,
                ..RegistryState::default()
            })),
            store,
        }
    }

    /// Builds every plugin of `groups` and replaces the current handler set.
    ///
    /// Plugins that fail to build or violate the handler contract are logged
    /// and skipped. Returns the number of handlers now registered.
    pub fn load(&self, groups: &[&PluginGroup], env: &PluginEnv) -> usize {
        let mut entries: Vec<Entry> = Vec::new();
        let mut group_list = Vec::with_capacity(groups.len());

        for group in groups {
            let mut commands = Vec::new();
            for desc in group.plugins {
                let handler = match (desc.build)(env) {
                    Ok(handler) => handler,
                    Err(e) => {
                        error!(plugin = desc.name, group = group.name, error = %e, "Failed to build plugin");
                        continue;
                    }
                };
                if let Err(reason) = check_contract(&handler) {
                    warn!(plugin = desc.name, group = group.name, reason, "Skipping invalid plugin");
                    continue;
                }
                let command = handler.command().to_string();
                if entries.iter().any(|e| e.handler.command() == command) {
                    warn!(plugin = desc.name, command = %command, "Duplicate command, keeping first registration");
                    continue;
                }
                debug!(plugin = desc.name, command = %command, group = group.name, "Plugin built");
                commands.push(command);
                entries.push(Entry {
                    handler,
                    group: group.name.to_string(),
                });
            }
            group_list.push((group.name.to_string(), commands));
        }

        let mut state = self.state.write();
        state.entries = entries;
        state.groups = group_list;
        state.sessions = Some(env.sessions.clone());
        state.reconcile();
        self.persist_locked(&mut state);

        info!(
            handlers = state.entries.len(),
            groups = state.groups.len(),
            "Plugins loaded"
        );
        state.entries.len()
    }

    /// Uses `sessions` to end engagements of commands that get disabled.
    ///
    /// [`load`](Self::load) binds the table of its environment.
    pub fn bind_sessions(&self, sessions: SessionTable) {
        self.state.write().sessions = Some(sessions);
    }

    /// Adds one handler under `group`.
    ///
    /// Returns `false` if the command is already taken (the first
    /// registration stays) or the handler violates the contract.
    pub fn register(&self, handler: BoxedHandler, group: &str) -> bool {
        if let Err(reason) = check_contract(&handler) {
            warn!(group, reason, "Rejected invalid handler");
            return false;
        }

        let mut state = self.state.write();
        let command = handler.command().to_string();
        if state.contains(&command) {
            warn!(command = %command, "Command already registered, ignoring duplicate");
            return false;
        }

        match state.groups.iter_mut().find(|(name, _)| name == group) {
            Some((_, commands)) => commands.push(command.clone()),
            None => state.groups.push((group.to_string(), vec![command.clone()])),
        }
        state.entries.push(Entry {
            handler,
            group: group.to_string(),
        });

        if !state.persisted.plugin_states.contains_key(&command) {
            state.persisted.plugin_states.insert(command.clone(), true);
            state.dirty = true;
        }
        self.persist_locked(&mut state);

        debug!(command = %command, group, "Handler registered");
        true
    }

    /// Prunes state for unknown commands and adds missing entries.
    ///
    /// Writes only when something changed or an earlier write failed.
    pub fn reconcile(&self) {
        let mut state = self.state.write();
        state.reconcile();
        self.persist_locked(&mut state);
    }

    /// Enables or disables one command. Returns `false` if it is unknown.
    ///
    /// Disabling also ends the command's engagements.
    pub fn set_enabled(&self, command: &str, enabled: bool) -> bool {
        let mut state = self.state.write();
        if !state.contains(command) {
            return false;
        }
        if state.persisted.plugin_states.insert(command.to_string(), enabled) != Some(enabled) {
            state.dirty = true;
        }
        if !enabled {
            state.release_sessions(command);
        }
        self.persist_locked(&mut state);
        info!(command, enabled, "Command toggled");
        true
    }

    /// Enables or disables every member of `group`. Returns `false` if the
    /// group is unknown.
    pub fn set_group_enabled(&self, group: &str, enabled: bool) -> bool {
        let mut state = self.state.write();
        let Some(members) = state.group_members(group).map(<[String]>::to_vec) else {
            return false;
        };
        for command in members {
            if !enabled {
                state.release_sessions(&command);
            }
            if state.persisted.plugin_states.insert(command, enabled) != Some(enabled) {
                state.dirty = true;
            }
        }
        self.persist_locked(&mut state);
        info!(group, enabled, "Plugin group toggled");
        true
    }

    /// Enabled flag of `command`, `None` if it is unknown.
    pub fn is_enabled(&self, command: &str) -> Option<bool> {
        let state = self.state.read();
        state.contains(command).then(|| state.is_enabled(command))
    }

    /// `true` when every member of `group` is enabled; `None` if unknown.
    pub fn is_group_enabled(&self, group: &str) -> Option<bool> {
        let state = self.state.read();
        state
            .group_members(group)
            .map(|members| members.iter().all(|c| state.is_enabled(c)))
    }

    /// Rooms are disabled unless explicitly enabled.
    pub fn is_room_enabled(&self, room_id: i64) -> bool {
        self.state
            .read()
            .persisted
            .group_states
            .get(&room_id)
            .copied()
            .unwrap_or(false)
    }

    /// Sets the enabled flag of a room.
    pub fn set_room_enabled(&self, room_id: i64, enabled: bool) {
        let mut state = self.state.write();
        if state.persisted.group_states.insert(room_id, enabled) != Some(enabled) {
            state.dirty = true;
        }
        self.persist_locked(&mut state);
        info!(room_id, enabled, "Room toggled");
    }

    /// Every room with a stored flag.
    pub fn room_states(&self) -> BTreeMap<i64, bool> {
        self.state.read().persisted.group_states.clone()
    }

    /// Copy of the whole persisted document.
    pub fn persisted(&self) -> PersistedState {
        self.state.read().persisted.clone()
    }

    /// All commands in registration order.
    pub fn list_commands(&self) -> Vec<CommandInfo> {
        self.state.read().command_infos()
    }

    /// All groups in declaration order.
    pub fn groups(&self) -> Vec<GroupSummary> {
        let state = self.state.read();
        state
            .groups
            .iter()
            .map(|(name, commands)| GroupSummary {
                name: name.clone(),
                enabled: commands.iter().all(|c| state.is_enabled(c)),
                commands: commands.clone(),
            })
            .collect()
    }

    /// Enabled handlers in registration order.
    pub fn enabled_handlers(&self) -> Vec<BoxedHandler> {
        let state = self.state.read();
        state
            .entries
            .iter()
            .filter(|e| state.is_enabled(e.handler.command()))
            .map(|e| Arc::clone(&e.handler))
            .collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Non-owning listing handle for plugins.
    pub fn catalog(&self) -> CommandCatalog {
        CommandCatalog {
            state: Arc::downgrade(&self.state),
        }
    }

    fn persist_locked(&self, state: &mut RegistryState) {
        if !state.dirty {
            return;
        }
        match self.store.save(&state.persisted) {
            Ok(()) => state.dirty = false,
            Err(e) => warn!(error = %e, "Failed to persist plugin state, will retry on next change"),
        }
    }
}

// ─── CommandCatalog ──────────────────────────────────────────────────────────

/// Read-only view of the registry's commands.
///
/// Holds a weak reference so handlers can list their peers without keeping
/// the registry alive.
#[derive(Clone)]
pub struct CommandCatalog {
    state: Weak<RwLock<RegistryState>>,
}

impl CommandCatalog {
    /// A catalogue not connected to any registry; always empty.
    pub fn detached() -> Self {
        Self { state: Weak::new() }
    }

    /// All commands in registration order.
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.state
            .upgrade()
            .map(|state| state.read().command_infos())
            .unwrap_or_default()
    }

    /// Enabled commands in registration order.
    pub fn enabled_commands(&self) -> Vec<CommandInfo> {
        let mut commands = self.commands();
        commands.retain(|c| c.enabled);
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::PluginDescriptor;
    use crate::state::MemoryStore;
    use crate::testing::{StaticHandler, test_env};

    fn registry_with(store: Arc<MemoryStore>) -> PluginRegistry {
        PluginRegistry::new(store)
    }

    fn handler(command: &str) -> BoxedHandler {
        Arc::new(StaticHandler::new(command, "reply"))
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        assert!(registry.register(Arc::new(StaticHandler::new("a", "first")), "g"));
        assert!(!registry.register(Arc::new(StaticHandler::new("a", "second")), "g"));

        let commands = registry.list_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].description, "a: first");
    }

    #[test]
    fn test_contract_violations_are_rejected() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        assert!(!registry.register(handler(""), "g"));
        assert!(!registry.register(Arc::new(StaticHandler::with_description("x", "  ")), "g"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reconcile_prunes_and_adds() {
        let mut initial = PersistedState::default();
        initial.plugin_states.insert("a".into(), true);
        initial.plugin_states.insert("b".into(), false);
        initial.plugin_states.insert("stale".into(), true);
        let store = Arc::new(MemoryStore::with_state(initial));
        let registry = registry_with(Arc::clone(&store));

        for command in ["a", "b", "c"] {
            registry.register(handler(command), "g");
        }
        registry.reconcile();

        let expected: BTreeMap<String, bool> = [("a", true), ("b", false), ("c", true)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(store.snapshot().plugin_states, expected);
        assert_eq!(registry.persisted().plugin_states, expected);
    }

    #[test]
    fn test_reconcile_without_changes_does_not_write() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));
        registry.register(handler("a"), "g");
        let saves = store.save_count();

        registry.reconcile();
        assert_eq!(store.save_count(), saves);
    }

    #[test]
    fn test_group_toggle_cascades() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        registry.register(handler("a"), "g1");
        registry.register(handler("b"), "g1");
        registry.register(handler("c"), "g2");

        assert!(registry.set_group_enabled("g1", false));
        assert_eq!(registry.is_enabled("a"), Some(false));
        assert_eq!(registry.is_enabled("b"), Some(false));
        assert_eq!(registry.is_enabled("c"), Some(true));
        assert_eq!(registry.is_group_enabled("g1"), Some(false));

        let enabled: Vec<_> = registry
            .enabled_handlers()
            .iter()
            .map(|h| h.command().to_string())
            .collect();
        assert_eq!(enabled, vec!["c"]);

        // Group reads enabled only when every member is.
        registry.set_enabled("a", true);
        assert_eq!(registry.is_group_enabled("g1"), Some(false));
        registry.set_enabled("b", true);
        assert_eq!(registry.is_group_enabled("g1"), Some(true));

        assert!(!registry.set_group_enabled("missing", true));
        assert!(!registry.set_enabled("missing", true));
    }

    #[test]
    fn test_rooms_default_deny() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));
        assert!(!registry.is_room_enabled(42));

        registry.set_room_enabled(42, true);
        assert!(registry.is_room_enabled(42));
        assert_eq!(store.snapshot().group_states.get(&42), Some(&true));

        registry.set_room_enabled(42, false);
        assert!(!registry.is_room_enabled(42));
    }

    #[test]
    fn test_failed_write_is_retried_on_next_mutation() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));
        registry.register(handler("a"), "g");
        registry.register(handler("b"), "g");

        store.set_fail_writes(true);
        assert!(registry.set_enabled("a", false));
        assert_eq!(registry.is_enabled("a"), Some(false));
        assert_eq!(store.snapshot().plugin_states.get("a"), Some(&true));

        store.set_fail_writes(false);
        registry.set_room_enabled(1, true);
        let saved = store.snapshot();
        assert_eq!(saved.plugin_states.get("a"), Some(&false));
        assert_eq!(saved.group_states.get(&1), Some(&true));
    }

    fn build_good(_: &PluginEnv) -> anyhow::Result<BoxedHandler> {
        Ok(Arc::new(StaticHandler::new("good", "ok")))
    }

    fn build_broken(_: &PluginEnv) -> anyhow::Result<BoxedHandler> {
        Err(anyhow::anyhow!("missing dependency"))
    }

    fn build_shadow(_: &PluginEnv) -> anyhow::Result<BoxedHandler> {
        Ok(Arc::new(StaticHandler::new("good", "shadowed")))
    }

    fn build_other(_: &PluginEnv) -> anyhow::Result<BoxedHandler> {
        Ok(Arc::new(StaticHandler::new("other", "ok")))
    }

    static GOOD: PluginDescriptor = PluginDescriptor {
        name: "good",
        build: build_good,
    };

    static BROKEN: PluginDescriptor = PluginDescriptor {
        name: "broken",
        build: build_broken,
    };

    static SHADOW: PluginDescriptor = PluginDescriptor {
        name: "shadow",
        build: build_shadow,
    };

    static OTHER: PluginDescriptor = PluginDescriptor {
        name: "other",
        build: build_other,
    };

    static FIRST: PluginGroup = PluginGroup {
        name: "first",
        plugins: &[&GOOD, &BROKEN],
    };

    static SECOND: PluginGroup = PluginGroup {
        name: "second",
        plugins: &[&SHADOW, &OTHER],
    };

    #[test]
    fn test_load_skips_failures_and_replaces_handlers() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));
        registry.register(handler("manual"), "adhoc");

        let env = test_env(&registry);
        assert_eq!(registry.load(&[&FIRST, &SECOND], &env), 2);

        let commands: Vec<_> = registry
            .list_commands()
            .into_iter()
            .map(|c| (c.command, c.group))
            .collect();
        assert_eq!(
            commands,
            vec![
                ("good".to_string(), "first".to_string()),
                ("other".to_string(), "second".to_string()),
            ]
        );
        assert_eq!(registry.list_commands()[0].description, "good: ok");

        let persisted = store.snapshot().plugin_states;
        assert!(!persisted.contains_key("manual"));
        assert_eq!(persisted.len(), 2);

        let groups = registry.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].commands, vec!["good"]);
    }

    #[test]
    fn test_disabling_ends_engagements() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        let env = test_env(&registry);
        registry.load(&[&FIRST, &SECOND], &env);

        let good = env.sessions.handle("good");
        let other = env.sessions.handle("other");
        good.engage(7).unwrap();
        other.engage(8).unwrap();

        assert!(registry.set_enabled("good", false));
        assert_eq!(env.sessions.owner_of(7), None);
        assert_eq!(env.sessions.owner_of(8).as_deref(), Some("other"));
        assert!(!good.contains(7));

        assert!(registry.set_enabled("good", true));
        assert_eq!(env.sessions.owner_of(7), None);
        other.engage(7).unwrap();

        assert!(registry.set_group_enabled("second", false));
        assert!(env.sessions.is_empty());
    }

    #[test]
    fn test_bound_sessions_apply_to_registered_handlers() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        let sessions = SessionTable::new();
        registry.bind_sessions(sessions.clone());
        registry.register(handler("a"), "g");

        sessions.handle("a").engage(1).unwrap();
        registry.set_group_enabled("g", false);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_catalog_does_not_keep_registry_alive() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        registry.register(handler("a"), "g");
        registry.register(handler("b"), "g");
        registry.set_enabled("b", false);

        let catalog = registry.catalog();
        assert_eq!(catalog.commands().len(), 2);
        let enabled = catalog.enabled_commands();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].command, "a");

        drop(registry);
        assert!(catalog.commands().is_empty());
    }
}
