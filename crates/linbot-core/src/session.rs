//! Conversation sessions.
//!
//! A handler that wants to see a user's follow-up messages *engages* the
//! user. The table allows one engagement per user across all handlers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::SessionConflict;

/// Process-wide table of engaged users (user id → owning command).
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<HashMap<i64, String>>>,
}

impl SessionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle scoped to `command`.
    pub fn handle(&self, command: impl Into<String>) -> SessionHandle {
        SessionHandle {
            table: self.clone(),
            command: command.into(),
        }
    }

    /// Command currently engaged with `user_id`.
    pub fn owner_of(&self, user_id: i64) -> Option<String> {
        self.inner.lock().get(&user_id).cloned()
    }

    /// Ends every engagement owned by `command`. Returns how many ended.
    pub fn release_command(&self, command: &str) -> usize {
        let mut sessions = self.inner.lock();
        let before = sessions.len();
        sessions.retain(|_, owner| owner != command);
        let released = before - sessions.len();
        if released > 0 {
            debug!(command, released, "Sessions released");
        }
        released
    }

    /// Number of engaged users.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns whether no user is engaged.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// A handler's view of the session table.
///
/// Can only add or remove engagements owned by its own command.
#[derive(Clone)]
pub struct SessionHandle {
    table: SessionTable,
    command: String,
}

impl SessionHandle {
    /// Engages `user_id` with this handler.
    ///
    /// Engaging a user this handler already holds is a no-op.
    pub fn engage(&self, user_id: i64) -> Result<(), SessionConflict> {
        let mut sessions = self.table.inner.lock();
        match sessions.get(&user_id) {
            Some(owner) if *owner == self.command => Ok(()),
            Some(owner) => Err(SessionConflict {
                user_id,
                owner: owner.clone(),
            }),
            None => {
                sessions.insert(user_id, self.command.clone());
                debug!(command = %self.command, user_id, "Session engaged");
                Ok(())
            }
        }
    }

    /// Ends this handler's engagement with `user_id`.
    ///
    /// Returns `false` if the user was not engaged with this handler.
    pub fn release(&self, user_id: i64) -> bool {
        let mut sessions = self.table.inner.lock();
        if sessions.get(&user_id).is_some_and(|owner| *owner == self.command) {
            sessions.remove(&user_id);
            debug!(command = %self.command, user_id, "Session released");
            true
        } else {
            false
        }
    }

    /// Returns whether `user_id` is engaged with this handler.
    pub fn contains(&self, user_id: i64) -> bool {
        self.table
            .inner
            .lock()
            .get(&user_id)
            .is_some_and(|owner| *owner == self.command)
    }

    /// The command this handle is scoped to.
    pub fn command(&self) -> &str {
        &self.command
    }
}
