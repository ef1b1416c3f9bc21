//! Built-in linbot plugins.
//!
//! | Group | Command | Purpose |
//! |-------|---------|---------|
//! | `help` | `帮助` | List enabled commands |
//! | `userinfo` | `个人信息` | Sender profile via gateway lookups |
//! | `echo` | `复读` | Conversation-session demo |
//! | `system` | `关机`, `重启` | Admin-only exit / restart |
//!
//! Per-group settings come from `[plugins.<group>]` in the config file:
//!
//! ```toml
//! [plugins.system]
//! admins = [10001]
//!
//! [plugins.userinfo]
//! utc_offset_hours = 8
//! ```

pub mod echo;
pub mod help;
pub mod system;
pub mod userinfo;

#[cfg(test)]
pub(crate) mod testing;

use linbot_core::PluginGroup;

/// Every built-in group, in dispatch order.
pub static BUILTIN_GROUPS: &[&PluginGroup] = &[
    &help::GROUP,
    &userinfo::GROUP,
    &echo::GROUP,
    &system::GROUP,
];
