//! `关机` and `重启`: admin-only process control.
//!
//! Both reply first and exit after a short delay. Shutdown exits with 1 so a
//! supervisor leaves the bot stopped; restart exits with 0 so it is brought
//! back up.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linbot_core::{
    BoxedHandler, ChatEvent, Handler, PluginDescriptor, PluginEnv, PluginGroup, ProcessControl,
};
use serde::Deserialize;
use tracing::{info, warn};

/// Exit code asking the supervisor to keep the bot stopped.
pub const SHUTDOWN_EXIT_CODE: i32 = 1;
/// Exit code asking the supervisor to start the bot again.
pub const RESTART_EXIT_CODE: i32 = 0;

/// `[plugins.system]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// User ids allowed to run these commands.
    pub admins: Vec<i64>,
    /// Delay between the reply and the exit.
    pub exit_delay_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            exit_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Shutdown,
    Restart,
}

pub struct SystemCommand {
    action: Action,
    admins: Arc<HashSet<i64>>,
    control: ProcessControl,
    delay: Duration,
}

impl SystemCommand {
    fn new(action: Action, config: &SystemConfig, control: ProcessControl) -> Self {
        Self {
            action,
            admins: Arc::new(config.admins.iter().copied().collect()),
            control,
            delay: Duration::from_millis(config.exit_delay_ms),
        }
    }

    /// `关机`
    pub fn shutdown(config: &SystemConfig, control: ProcessControl) -> Self {
        Self::new(Action::Shutdown, config, control)
    }

    /// `重启`
    pub fn restart(config: &SystemConfig, control: ProcessControl) -> Self {
        Self::new(Action::Restart, config, control)
    }
}

#[async_trait]
impl Handler for SystemCommand {
    fn command(&self) -> &str {
        match self.action {
            Action::Shutdown => "关机",
            Action::Restart => "重启",
        }
    }

    fn description(&self) -> &str {
        match self.action {
            Action::Shutdown => "关闭机器人（仅管理员可用）",
            Action::Restart => "重启机器人（仅管理员可用）",
        }
    }

    async fn handle(&self, args: &str, event: &ChatEvent) -> anyhow::Result<Option<String>> {
        // Only the bare command acts.
        if !args.is_empty() {
            return Ok(None);
        }

        let is_admin = self.admins.contains(&event.user_id);
        let reply = match (self.action, is_admin) {
            (Action::Shutdown, false) => "抱歉，只有管理员才能关闭机器人哦~",
            (Action::Restart, false) => "抱歉呢，你不是我的主人呢~ (*/ω＼*)",
            (Action::Shutdown, true) => {
                info!(user_id = event.user_id, "Shutdown requested");
                self.control.request_exit(SHUTDOWN_EXIT_CODE, self.delay);
                "正在关闭机器人...\n如需重新启动，请手动启动进程"
            }
            (Action::Restart, true) => {
                info!(user_id = event.user_id, "Restart requested");
                self.control.request_exit(RESTART_EXIT_CODE, self.delay);
                "好的主人，我去重启一下，马上就回来找你~"
            }
        };
        Ok(Some(reply.to_string()))
    }
}

fn load_config(env: &PluginEnv) -> anyhow::Result<SystemConfig> {
    let config: SystemConfig = env.config_for("system")?;
    if config.admins.is_empty() {
        warn!("No admins configured in [plugins.system]; system commands are refused for everyone");
    }
    Ok(config)
}

fn build_shutdown(env: &PluginEnv) -> anyhow::Result<BoxedHandler> {
    let config = load_config(env)?;
    Ok(Arc::new(SystemCommand::shutdown(&config, env.control.clone())))
}

fn build_restart(env: &PluginEnv) -> anyhow::Result<BoxedHandler> {
    let config = load_config(env)?;
    Ok(Arc::new(SystemCommand::restart(&config, env.control.clone())))
}

pub static SHUTDOWN: PluginDescriptor = PluginDescriptor {
    name: "shutdown",
    build: build_shutdown,
};

pub static RESTART: PluginDescriptor = PluginDescriptor {
    name: "restart",
    build: build_restart,
};

pub static GROUP: PluginGroup = PluginGroup {
    name: "system",
    plugins: &[&SHUTDOWN, &RESTART],
};

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SystemConfig {
        SystemConfig {
            admins: vec![1],
            exit_delay_ms: 1000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_by_admin_exits_with_one() {
        let control = ProcessControl::new();
        let shutdown = SystemCommand::shutdown(&config(), control.clone());

        let reply = shutdown
            .handle("", &ChatEvent::private(1, "关机"))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.starts_with("正在关闭机器人"));
        assert!(!control.is_exit_requested());

        tokio::time::advance(Duration::from_millis(1100)).await;
        control.cancelled().await;
        assert_eq!(control.exit_code(), SHUTDOWN_EXIT_CODE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_by_admin_exits_with_zero() {
        let control = ProcessControl::new();
        let restart = SystemCommand::restart(&config(), control.clone());

        restart.handle("", &ChatEvent::group(5, 1, "重启")).await.unwrap();
        tokio::time::advance(Duration::from_millis(1100)).await;
        control.cancelled().await;
        assert_eq!(control.exit_code(), RESTART_EXIT_CODE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_admin_is_refused() {
        let control = ProcessControl::new();
        let shutdown = SystemCommand::shutdown(&config(), control.clone());

        let reply = shutdown
            .handle("", &ChatEvent::private(2, "关机"))
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("抱歉，只有管理员才能关闭机器人哦~"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!control.is_exit_requested());
    }

    #[tokio::test]
    async fn test_arguments_are_ignored() {
        let control = ProcessControl::new();
        let shutdown = SystemCommand::shutdown(&config(), control.clone());
        assert!(
            shutdown
                .handle("now", &ChatEvent::private(1, "关机 now"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(!control.is_exit_requested());
    }
}
