//! `复读`: a conversation session.
//!
//! `复读` engages the sender; every later message from them is repeated until
//! they send `结束复读`. `复读 <text>` repeats once without engaging.

use std::sync::Arc;

use async_trait::async_trait;
use linbot_core::{
    BoxedHandler, ChatEvent, Handler, PluginDescriptor, PluginEnv, PluginGroup, SessionHandle,
};

const COMMAND: &str = "复读";
const STOP: &str = "结束复读";

pub struct Echo {
    session: SessionHandle,
}

impl Echo {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Handler for Echo {
    fn command(&self) -> &str {
        COMMAND
    }

    fn description(&self) -> &str {
        "复读你说的话，发送「结束复读」退出"
    }

    fn is_engaged(&self, user_id: i64) -> bool {
        self.session.contains(user_id)
    }

    async fn handle(&self, args: &str, event: &ChatEvent) -> anyhow::Result<Option<String>> {
        let user_id = event.user_id;

        if self.session.contains(user_id) && args == STOP {
            self.session.release(user_id);
            return Ok(Some("已结束复读".into()));
        }

        if !args.is_empty() {
            return Ok(Some(args.to_string()));
        }

        if self.session.contains(user_id) {
            return Ok(Some(format!("正在复读中，发送「{STOP}」退出")));
        }

        Ok(Some(match self.session.engage(user_id) {
            Ok(()) => format!("开始复读，发送「{STOP}」退出"),
            Err(conflict) => format!("你正在使用「{}」，请先结束当前会话", conflict.owner),
        }))
    }
}

fn build(env: &PluginEnv) -> anyhow::Result<BoxedHandler> {
    Ok(Arc::new(Echo::new(env.session(COMMAND))))
}

pub static ECHO: PluginDescriptor = PluginDescriptor {
    name: "echo",
    build,
};

pub static GROUP: PluginGroup = PluginGroup {
    name: "echo",
    plugins: &[&ECHO],
};

#[cfg(test)]
mod tests {
    use linbot_core::{Dispatcher, MemoryStore, PluginRegistry, SessionTable};

    use super::*;
    use crate::testing::env_for;

    fn dispatcher() -> Dispatcher {
        let registry = PluginRegistry::new(Arc::new(MemoryStore::new()));
        let env = env_for(&registry);
        registry.load(&[&GROUP], &env);
        Dispatcher::new(registry)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let dispatcher = dispatcher();
        let alice = ChatEvent::private(1, "");
        let bob = ChatEvent::private(2, "");

        let reply = dispatcher.dispatch("复读", &alice).await.unwrap();
        assert!(reply.starts_with("开始复读"));

        assert_eq!(dispatcher.dispatch("你好", &alice).await.as_deref(), Some("你好"));
        assert!(dispatcher.dispatch("你好", &bob).await.is_none());

        assert_eq!(dispatcher.dispatch("结束复读", &alice).await.as_deref(), Some("已结束复读"));
        assert!(dispatcher.dispatch("你好", &alice).await.is_none());
    }

    #[tokio::test]
    async fn test_one_shot_echo_does_not_engage() {
        let dispatcher = dispatcher();
        let alice = ChatEvent::private(1, "");

        assert_eq!(dispatcher.dispatch("复读 一次", &alice).await.as_deref(), Some("一次"));
        assert!(dispatcher.dispatch("一次", &alice).await.is_none());
    }

    #[tokio::test]
    async fn test_conflicting_session_is_refused() {
        let sessions = SessionTable::new();
        sessions.handle("答题").engage(1).unwrap();
        let echo = Echo::new(sessions.handle(COMMAND));

        let reply = echo
            .handle("", &ChatEvent::private(1, "复读"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "你正在使用「答题」，请先结束当前会话");
        assert!(!echo.is_engaged(1));
    }
}
