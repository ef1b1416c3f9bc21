//! Test doubles shared by the core's unit tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::broker::CorrelationBroker;
use crate::control::ProcessControl;
use crate::event::ChatEvent;
use crate::handler::{Handler, PluginEnv};
use crate::registry::PluginRegistry;
use crate::session::SessionTable;
use crate::transport::ConnectionSlot;

enum Behaviour {
    Reply(String),
    Echo,
    Silent,
    Fail,
}

/// A handler with scripted behaviour that records its arguments.
pub(crate) struct StaticHandler {
    command: String,
    description: String,
    behaviour: Behaviour,
    engaged: Mutex<HashSet<i64>>,
    calls: Mutex<Vec<String>>,
}

impl StaticHandler {
    fn build(command: &str, description: String, behaviour: Behaviour) -> Self {
        Self {
            command: command.to_string(),
            description,
            behaviour,
            engaged: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    /// Always replies `reply`.
    pub(crate) fn new(command: &str, reply: &str) -> Self {
        Self::build(
            command,
            format!("{command}: {reply}"),
            Behaviour::Reply(reply.to_string()),
        )
    }

    pub(crate) fn with_description(command: &str, description: &str) -> Self {
        Self::build(command, description.to_string(), Behaviour::Silent)
    }

    /// Replies with its argument text.
    pub(crate) fn echoing(command: &str) -> Self {
        Self::build(command, format!("{command} echoes"), Behaviour::Echo)
    }

    /// Never replies.
    pub(crate) fn silent(command: &str) -> Self {
        Self::build(command, format!("{command} stays quiet"), Behaviour::Silent)
    }

    /// Always errors.
    pub(crate) fn failing(command: &str) -> Self {
        Self::build(command, format!("{command} fails"), Behaviour::Fail)
    }

    pub(crate) fn engage(&self, user_id: i64) {
        self.engaged.lock().insert(user_id);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Handler for StaticHandler {
    fn command(&self) -> &str {
        &self.command
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_engaged(&self, user_id: i64) -> bool {
        self.engaged.lock().contains(&user_id)
    }

    async fn handle(&self, args: &str, _event: &ChatEvent) -> anyhow::Result<Option<String>> {
        self.calls.lock().push(args.to_string());
        match &self.behaviour {
            Behaviour::Reply(reply) => Ok(Some(reply.clone())),
            Behaviour::Echo => Ok(Some(args.to_string())),
            Behaviour::Silent => Ok(None),
            Behaviour::Fail => anyhow::bail!("scripted failure"),
        }
    }
}

/// An environment over a disconnected broker.
pub(crate) fn test_env(registry: &PluginRegistry) -> PluginEnv {
    PluginEnv::new(
        Arc::new(CorrelationBroker::new(Arc::new(ConnectionSlot::new()))),
        SessionTable::new(),
        ProcessControl::new(),
        registry.catalog(),
    )
}
