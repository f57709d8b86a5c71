//! 频道事件
//!
//! `ChatEvent` 是排序与持久化的最小单位。事件种类用枚举表达，每个变体只携带自己需要的字段；
//! 在队列与存储边界上统一编码为扁平 JSON：
//! `{id, action, username, channel, time, sequence_number, message}`。

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChannelName, EventId, Timestamp, Username};

/// 事件种类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEventKind {
    /// 聊天消息
    Message { username: Username, text: String },
    /// 用户建立连接
    Connect { username: Username },
    /// 用户断开连接（包括被踢出）
    Disconnect { username: Username },
    /// 被管理员邀请
    Invited { username: Username },
    /// 被管理员封禁
    Blocked { username: Username },
    /// 被管理员解封
    Unblocked { username: Username },
}

impl ChatEventKind {
    /// 队列消息里的 `action` 字段
    pub fn action(&self) -> &'static str {
        match self {
            ChatEventKind::Message { .. } => "message",
            ChatEventKind::Connect { .. } => "connect",
            ChatEventKind::Disconnect { .. } => "disconnect",
            ChatEventKind::Invited { .. } => "invite",
            ChatEventKind::Blocked { .. } => "block",
            ChatEventKind::Unblocked { .. } => "unblock",
        }
    }

    /// 发起者（消息、连接）或目标用户（管理动作）
    pub fn username(&self) -> &Username {
        match self {
            ChatEventKind::Message { username, .. }
            | ChatEventKind::Connect { username }
            | ChatEventKind::Disconnect { username }
            | ChatEventKind::Invited { username }
            | ChatEventKind::Blocked { username }
            | ChatEventKind::Unblocked { username } => username,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ChatEventKind::Message { text, .. } => Some(text),
            _ => None,
        }
    }

    fn from_parts(
        action: &str,
        username: Username,
        message: Option<String>,
    ) -> Result<Self, DomainError> {
        let kind = match action {
            "message" => ChatEventKind::Message {
                username,
                text: message.ok_or(DomainError::MissingField("message"))?,
            },
            "connect" => ChatEventKind::Connect { username },
            "disconnect" => ChatEventKind::Disconnect { username },
            "invite" => ChatEventKind::Invited { username },
            "block" => ChatEventKind::Blocked { username },
            "unblock" => ChatEventKind::Unblocked { username },
            other => return Err(DomainError::UnknownAction(other.to_string())),
        };
        Ok(kind)
    }
}

/// 已排序的频道事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct ChatEvent {
    pub id: EventId,
    pub channel: ChannelName,
    pub sequence_number: u64,
    pub time: Timestamp,
    pub kind: ChatEventKind,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ChatEvent {
    pub fn new(
        channel: ChannelName,
        sequence_number: u64,
        kind: ChatEventKind,
        time: Timestamp,
    ) -> Self {
        Self {
            id: EventId::generate(),
            channel,
            sequence_number,
            time,
            kind,
            created_at: time,
            updated_at: time,
        }
    }

    pub fn action(&self) -> &'static str {
        self.kind.action()
    }

    pub fn username(&self) -> &Username {
        self.kind.username()
    }

    pub fn text(&self) -> Option<&str> {
        self.kind.text()
    }

    /// 编码为队列消息体
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// 从队列消息体解码
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// 从存储行重建事件
    #[allow(clippy::too_many_arguments)]
    pub fn from_record(
        id: EventId,
        action: &str,
        username: &str,
        channel: &str,
        time: Timestamp,
        sequence_number: u64,
        message: Option<String>,
        created_at: Timestamp,
        updated_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let username = Username::parse(username)?;
        let channel = ChannelName::parse(channel)?;
        Ok(Self {
            id,
            channel,
            sequence_number,
            time,
            kind: ChatEventKind::from_parts(action, username, message)?,
            created_at,
            updated_at,
        })
    }
}

/// 队列与存储边界上的扁平结构
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEvent {
    id: EventId,
    action: String,
    username: String,
    channel: String,
    time: Timestamp,
    sequence_number: u64,
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<Timestamp>,
}

impl TryFrom<WireEvent> for ChatEvent {
    type Error = DomainError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let created_at = wire.created_at.unwrap_or_else(Utc::now);
        let updated_at = wire.updated_at.unwrap_or(created_at);
        ChatEvent::from_record(
            wire.id,
            &wire.action,
            &wire.username,
            &wire.channel,
            wire.time,
            wire.sequence_number,
            wire.message,
            created_at,
            updated_at,
        )
    }
}

impl From<ChatEvent> for WireEvent {
    fn from(event: ChatEvent) -> Self {
        let action = event.kind.action().to_string();
        let (username, message) = match event.kind {
            ChatEventKind::Message { username, text } => (username, Some(text)),
            ChatEventKind::Connect { username }
            | ChatEventKind::Disconnect { username }
            | ChatEventKind::Invited { username }
            | ChatEventKind::Blocked { username }
            | ChatEventKind::Unblocked { username } => (username, None),
        };
        WireEvent {
            id: event.id,
            action,
            username: username.into(),
            channel: event.channel.into(),
            time: event.time,
            sequence_number: event.sequence_number,
            message,
            created_at: Some(event.created_at),
            updated_at: Some(event.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn general() -> ChannelName {
        ChannelName::parse("general").unwrap()
    }

    fn alice() -> Username {
        Username::parse("alice").unwrap()
    }

    #[test]
    fn message_event_uses_flat_wire_fields() {
        let event = ChatEvent::new(
            general(),
            7,
            ChatEventKind::Message {
                username: alice(),
                text: "hello".to_string(),
            },
            Utc::now(),
        );

        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["action"], "message");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["channel"], "general");
        assert_eq!(value["sequence_number"], 7);
        assert_eq!(value["message"], "hello");
        assert_eq!(value["id"], json!(event.id.to_string()));
    }

    #[test]
    fn moderation_event_has_null_message() {
        let event = ChatEvent::new(
            general(),
            3,
            ChatEventKind::Blocked { username: alice() },
            Utc::now(),
        );

        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["action"], "block");
        assert!(value["message"].is_null());
    }

    #[test]
    fn decodes_payload_without_record_timestamps() {
        let payload = json!({
            "id": "3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            "action": "invite",
            "username": "bob",
            "channel": "general",
            "time": "2024-11-24T00:12:00Z",
            "sequence_number": 42,
            "message": null
        });

        let event = ChatEvent::from_payload(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.sequence_number, 42);
        assert_eq!(event.action(), "invite");
        assert_eq!(event.username().as_str(), "bob");
        assert_eq!(event.text(), None);
        assert_eq!(event.updated_at, event.created_at);
    }

    #[test]
    fn rejects_unknown_action_and_missing_text() {
        let unknown = json!({
            "id": "3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            "action": "shout",
            "username": "bob",
            "channel": "general",
            "time": "2024-11-24T00:12:00Z",
            "sequence_number": 1,
            "message": "hi"
        });
        assert!(ChatEvent::from_payload(unknown.to_string().as_bytes()).is_err());

        let missing_text = json!({
            "id": "3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            "action": "message",
            "username": "bob",
            "channel": "general",
            "time": "2024-11-24T00:12:00Z",
            "sequence_number": 1,
            "message": null
        });
        assert!(ChatEvent::from_payload(missing_text.to_string().as_bytes()).is_err());

        assert!(ChatEvent::from_payload(b"not json").is_err());
    }
}
