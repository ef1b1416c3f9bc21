//! OneBot v11 API request envelope and the response payloads the built-in
//! plugins consume.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An outbound API request (`{"action": ..., "params": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Protocol action name, e.g. `send_private_msg`.
    pub action: String,
    /// Action parameters.
    #[serde(default)]
    pub params: Value,
}

impl ApiRequest {
    /// Creates a request with an empty parameter object.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Value::Object(Map::new()),
        }
    }

    /// Creates a request with the given parameters.
    pub fn with_params(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }

    /// Serializes the request, tagging it with `echo` when given.
    pub fn to_frame(&self, echo: Option<&str>) -> serde_json::Result<Vec<u8>> {
        let mut frame = Map::new();
        frame.insert("action".into(), Value::String(self.action.clone()));
        frame.insert("params".into(), self.params.clone());
        if let Some(echo) = echo {
            frame.insert("echo".into(), Value::String(echo.to_string()));
        }
        serde_json::to_vec(&Value::Object(frame))
    }

    /// `send_private_msg` with a plain-text message.
    pub fn send_private_msg(user_id: i64, message: &str) -> Self {
        Self::with_params(
            "send_private_msg",
            serde_json::json!({ "user_id": user_id, "message": message }),
        )
    }

    /// `send_group_msg` with a plain-text message.
    pub fn send_group_msg(group_id: i64, message: &str) -> Self {
        Self::with_params(
            "send_group_msg",
            serde_json::json!({ "group_id": group_id, "message": message }),
        )
    }
}

/// Entry of `get_friend_list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FriendInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub remark: String,
}

/// Entry of `get_group_list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub member_count: i32,
}

/// Response of `get_group_member_info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMemberInfo {
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    /// Group card; empty when unset.
    #[serde(default)]
    pub card: String,
    /// "owner", "admin" or "member".
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub level: String,
    /// Unix seconds.
    #[serde(default)]
    pub join_time: i64,
}

/// Response of `get_stranger_info`.
///
/// `qid` and `reg_time` are gateway extensions and may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrangerInfo {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub qid: Option<String>,
    /// Unix seconds.
    #[serde(default, alias = "join_time")]
    pub reg_time: Option<i64>,
}
