//! Command dispatch.
//!
//! Resolution for one message, over the enabled handlers in registration
//! order:
//!
//! 1. **Command match.** The trimmed text equals a command, or starts with the
//!    command followed by a space. The first matching handler is invoked with
//!    the remaining text and its outcome ends dispatch, reply or not.
//! 2. **Session continuation.** Only when nothing matched: handlers engaged
//!    with the sender get the whole trimmed text. The first non-empty reply
//!    wins; an empty or absent reply passes the message on.
//!
//! A handler error is logged, answered with a generic message naming the
//! command, and stops dispatch.

use tracing::{Instrument, debug, error, info_span};

use crate::event::ChatEvent;
use crate::handler::BoxedHandler;
use crate::registry::{CommandInfo, PluginRegistry};

/// Resolves messages to handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: PluginRegistry,
}

/// Reply sent when a handler fails.
pub fn handler_error_reply(command: &str) -> String {
    format!("处理命令 {command} 时出错")
}

/// Splits `text` into the argument text for `command`.
///
/// `text` must already be trimmed. Returns `None` when `command` does not
/// match.
pub fn match_command<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(command)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix(' ').map(str::trim_start)
}

enum Invocation {
    Command,
    Session,
}

impl Dispatcher {
    pub fn new(registry: PluginRegistry) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher resolves against.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Dispatches one message; returns the reply to send, if any.
    pub async fn dispatch(&self, text: &str, event: &ChatEvent) -> Option<String> {
        let text = text.trim();
        // Snapshot, so toggles during a slow handler do not block on us.
        let handlers = self.registry.enabled_handlers();

        if let Some((handler, args)) = handlers
            .iter()
            .find_map(|h| match_command(text, h.command()).map(|args| (h, args)))
        {
            debug!(command = handler.command(), user_id = event.user_id, "Command matched");
            // Empty text still ends dispatch, just without a reply.
            return match invoke(handler, args, event, Invocation::Command).await {
                Ok(reply) => reply.filter(|r| !r.is_empty()),
                Err(reply) => Some(reply),
            };
        }

        for handler in handlers.iter().filter(|h| h.is_engaged(event.user_id)) {
            match invoke(handler, text, event, Invocation::Session).await {
                Ok(Some(reply)) if !reply.is_empty() => return Some(reply),
                Ok(_) => continue,
                Err(reply) => return Some(reply),
            }
        }

        None
    }

    /// All commands with their descriptions and state.
    pub fn list_commands(&self) -> Vec<CommandInfo> {
        self.registry.list_commands()
    }
}

/// Runs a handler; an `Err` carries the error reply.
async fn invoke(
    handler: &BoxedHandler,
    args: &str,
    event: &ChatEvent,
    kind: Invocation,
) -> Result<Option<String>, String> {
    let span = info_span!(
        "command",
        command = handler.command(),
        user_id = event.user_id,
        session = matches!(kind, Invocation::Session)
    );
    handler.handle(args, event).instrument(span).await.map_err(|e| {
        error!(command = handler.command(), user_id = event.user_id, error = ?e, "Handler failed");
        handler_error_reply(handler.command())
    })
}
