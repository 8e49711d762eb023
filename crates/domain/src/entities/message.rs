//! 消息实体

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::System => "system",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "file" => Ok(MessageKind::File),
            "system" => Ok(MessageKind::System),
            other => Err(DomainError::validation_error(
                "message_type",
                format!("unknown message type '{other}'"),
            )),
        }
    }
}

/// 发送消息的输入（内容已通过验证）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageKind,
    pub reply_to_id: Option<MessageId>,
}

/// 已持久化的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    pub reply_to_id: Option<MessageId>,
    pub created_at: Timestamp,
}

/// 已读回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReadRecord {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub read_at: Timestamp,
}
