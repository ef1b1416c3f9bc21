//! Inbound OneBot v11 event model, reduced to what dispatch needs.
//!
//! ```text
//! InboundFrame
//! ├── Message(ChatEvent)      post_type = "message"
//! ├── Other { post_type }     meta_event / notice / request
//! └── Unknown                 no post_type (and no matching echo)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Shared Types
// ============================================================================

/// Message sender information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    /// Group card (group nickname).
    #[serde(default)]
    pub card: Option<String>,
    /// Group role ("owner", "admin", "member").
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
}

/// Whether a message arrived in a private chat or a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Private,
    Group,
}

// ============================================================================
// ChatEvent
// ============================================================================

/// A chat message event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub message_id: i64,
    pub user_id: i64,
    /// Present for group messages.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Message content (segment array, or a plain string on some gateways).
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub sender: Sender,
    #[serde(default)]
    pub self_id: i64,
    #[serde(default)]
    pub time: i64,
}

impl ChatEvent {
    /// Builds a private message event with plain text content.
    pub fn private(user_id: i64, text: &str) -> Self {
        Self {
            message_type: MessageType::Private,
            user_id,
            message: text_message(text),
            raw_message: text.to_string(),
            sender: Sender {
                user_id: Some(user_id),
                ..Sender::default()
            },
            ..Self::default()
        }
    }

    /// Builds a group message event with plain text content.
    pub fn group(group_id: i64, user_id: i64, text: &str) -> Self {
        Self {
            message_type: MessageType::Group,
            group_id: Some(group_id),
            ..Self::private(user_id, text)
        }
    }

    /// Returns whether the event came from a group chat.
    pub fn is_group(&self) -> bool {
        self.message_type == MessageType::Group
    }

    /// The room that gates this event, if it is a group message.
    pub fn room_id(&self) -> Option<i64> {
        if self.is_group() { self.group_id } else { None }
    }

    /// Text used for command matching.
    ///
    /// Segment arrays yield the concatenation of their `text` segments;
    /// anything else falls back to `raw_message`.
    pub fn plain_text(&self) -> String {
        match &self.message {
            Value::Array(_) => extract_plain_text(&self.message),
            Value::String(s) => s.clone(),
            _ => self.raw_message.clone(),
        }
    }

    /// Display name of the sender: group card, then nickname.
    pub fn sender_name(&self) -> &str {
        self.sender
            .card
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.sender.nickname.as_deref())
            .unwrap_or("")
    }
}

// ============================================================================
// Frame classification
// ============================================================================

/// Classification of an inbound frame that was not an API reply.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A chat message.
    Message(Box<ChatEvent>),
    /// Any other event kind; carries its `post_type`.
    Other { post_type: String },
    /// Not an event.
    Unknown,
}

impl InboundFrame {
    /// Classifies a parsed frame by its `post_type`.
    ///
    /// A message frame that does not deserialize into [`ChatEvent`] is
    /// reported as [`InboundFrame::Unknown`].
    pub fn classify(frame: &Value) -> Self {
        match frame.get("post_type").and_then(Value::as_str) {
            Some("message") => match serde_json::from_value::<ChatEvent>(frame.clone()) {
                Ok(event) => Self::Message(Box::new(event)),
                Err(e) => {
                    tracing::debug!(error = %e, "Malformed message event");
                    Self::Unknown
                }
            },
            Some(other) => Self::Other {
                post_type: other.to_string(),
            },
            None => Self::Unknown,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Extracts plain text from message segments.
pub fn extract_plain_text(message: &Value) -> String {
    if let Value::Array(segments) = message {
        segments
            .iter()
            .filter_map(|seg| {
                if seg.get("type")?.as_str()? == "text" {
                    seg.get("data")?.get("text")?.as_str().map(String::from)
                } else {
                    None
                }
            })
            .collect::<String>()
    } else {
        String::new()
    }
}

/// A single-text-segment message array.
pub fn text_message(text: &str) -> Value {
    serde_json::json!([{ "type": "text", "data": { "text": text } }])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_plain_text_concatenates_text_segments() {
        let frame = json!({
            "post_type": "message",
            "message_type": "group",
            "user_id": 10,
            "group_id": 20,
            "message": [
                {"type": "at", "data": {"qq": "1"}},
                {"type": "text", "data": {"text": " 帮助"}},
                {"type": "face", "data": {"id": "1"}},
                {"type": "text", "data": {"text": " more"}}
            ],
            "raw_message": "[CQ:at,qq=1] 帮助[CQ:face,id=1] more",
            "sender": {"nickname": "alice", "card": ""}
        });

        let InboundFrame::Message(event) = InboundFrame::classify(&frame) else {
            panic!("expected message");
        };
        assert_eq!(event.plain_text(), " 帮助 more");
        assert_eq!(event.room_id(), Some(20));
        assert_eq!(event.sender_name(), "alice");
    }

    #[test]
    fn test_string_message_and_raw_fallback() {
        let mut event: ChatEvent = serde_json::from_value(json!({
            "message_type": "private",
            "user_id": 1,
            "message": "复读",
            "raw_message": "复读"
        }))
        .unwrap();
        assert_eq!(event.plain_text(), "复读");
        assert_eq!(event.room_id(), None);

        event.message = Value::Null;
        assert_eq!(event.plain_text(), "复读");
    }

    #[test]
    fn test_classify_other_frames() {
        assert!(matches!(
            InboundFrame::classify(&json!({"post_type": "meta_event"})),
            InboundFrame::Other { post_type } if post_type == "meta_event"
        ));
        assert!(matches!(
            InboundFrame::classify(&json!({"status": "ok"})),
            InboundFrame::Unknown
        ));
        assert!(matches!(
            InboundFrame::classify(&json!({"post_type": "message"})),
            InboundFrame::Unknown
        ));
    }
}
