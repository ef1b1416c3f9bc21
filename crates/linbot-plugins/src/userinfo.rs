//! `个人信息`: the sender's profile.
//!
//! Always queries `get_stranger_info`; in groups also
//! `get_group_member_info`. Any failed lookup turns into a single apology
//! instead of a partial profile.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linbot_core::{
    ApiResult, BoxedHandler, ChatEvent, CorrelationBroker, GroupMemberInfo, Handler,
    PluginDescriptor, PluginEnv, PluginGroup, StrangerInfo,
};
use serde::Deserialize;
use serde_json::json;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::warn;

const LOOKUP_FAILED: &str = "获取用户信息失败，请稍后再试";

/// `[plugins.userinfo]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserInfoConfig {
    /// Offset applied when rendering timestamps.
    pub utc_offset_hours: i8,
}

impl Default for UserInfoConfig {
    fn default() -> Self {
        Self { utc_offset_hours: 8 }
    }
}

pub struct UserInfo {
    broker: Arc<CorrelationBroker>,
    timeout: Duration,
    offset: UtcOffset,
}

impl UserInfo {
    pub fn new(broker: Arc<CorrelationBroker>, timeout: Duration, offset: UtcOffset) -> Self {
        Self {
            broker,
            timeout,
            offset,
        }
    }

    async fn member_info(&self, group_id: i64, user_id: i64) -> ApiResult<GroupMemberInfo> {
        self.broker
            .call(
                "get_group_member_info",
                json!({ "group_id": group_id, "user_id": user_id, "no_cache": true }),
                self.timeout,
            )
            .await
    }

    async fn stranger_info(&self, user_id: i64) -> ApiResult<StrangerInfo> {
        self.broker
            .call(
                "get_stranger_info",
                json!({ "user_id": user_id, "no_cache": true }),
                self.timeout,
            )
            .await
    }

    async fn render(&self, event: &ChatEvent) -> ApiResult<String> {
        let mut lines = vec![
            "=== 个人信息 ===".to_string(),
            format!("名称：{}", event.sender.nickname.as_deref().unwrap_or("未知")),
            format!("QQ号：{}", event.user_id),
        ];

        if let Some(group_id) = event.room_id() {
            let member = self.member_info(group_id, event.user_id).await?;
            lines.push(format!("群名片：{}", non_empty_or(&member.card, "无")));
            lines.push(format!("群身份：{}", role_text(&member.role)));
            lines.push(format!("群等级：{}", non_empty_or(&member.level, "0")));
            lines.push(format!("入群时间：{}", format_time(member.join_time, self.offset)));
        }

        let profile = self.stranger_info(event.user_id).await?;
        lines.push(format!(
            "聊天气泡：{}",
            profile.qid.as_deref().filter(|q| !q.is_empty()).unwrap_or("未设置")
        ));
        lines.push(format!(
            "注册时间：{}",
            format_time(profile.reg_time.unwrap_or(0), self.offset)
        ));

        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Handler for UserInfo {
    fn command(&self) -> &str {
        "个人信息"
    }

    fn description(&self) -> &str {
        "查看个人信息"
    }

    async fn handle(&self, _args: &str, event: &ChatEvent) -> anyhow::Result<Option<String>> {
        match self.render(event).await {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                warn!(user_id = event.user_id, error = %e, "User info lookup failed");
                Ok(Some(LOOKUP_FAILED.to_string()))
            }
        }
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

fn role_text(role: &str) -> &'static str {
    match role {
        "owner" => "群主",
        "admin" => "管理员",
        "member" => "群员",
        _ => "未知",
    }
}

/// Renders unix seconds as `YYYY/MM/DD HH:MM`; zero or out of range is `未知`.
fn format_time(timestamp: i64, offset: UtcOffset) -> String {
    if timestamp <= 0 {
        return "未知".into();
    }
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|t| {
            t.to_offset(offset)
                .format(format_description!("[year]/[month]/[day] [hour]:[minute]"))
                .ok()
        })
        .unwrap_or_else(|| "未知".into())
}

fn build(env: &PluginEnv) -> anyhow::Result<BoxedHandler> {
    let config: UserInfoConfig = env.config_for("userinfo")?;
    let offset = UtcOffset::from_hms(config.utc_offset_hours, 0, 0)?;
    Ok(Arc::new(UserInfo::new(
        Arc::clone(&env.broker),
        env.timeouts.lookup,
        offset,
    )))
}

pub static USERINFO: PluginDescriptor = PluginDescriptor {
    name: "userinfo",
    build,
};

pub static GROUP: PluginGroup = PluginGroup {
    name: "userinfo",
    plugins: &[&USERINFO],
};
