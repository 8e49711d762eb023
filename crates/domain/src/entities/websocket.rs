//! WebSocket线协议
//!
//! 客户端与服务端之间的 JSON 帧形如 `{"event": "join-room", "data": {...}}`。
//! 字段名使用 camelCase。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entities::chatroom::RoomKind;
use crate::entities::message::MessageKind;
use crate::value_objects::{
    ConnectionId, MessageId, NotificationId, RoomId, Timestamp, UserId,
};

/// 客户端 → 服务端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// 加入房间的实时频道
    JoinRoom { room_id: RoomId },
    /// 离开房间的实时频道
    LeaveRoom { room_id: RoomId },
    /// 正在输入状态
    Typing { room_id: RoomId, is_typing: bool },
    /// 查询房间内当前在线的用户
    GetRoomUsers { room_id: RoomId },
}

/// 在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// 服务端 → 客户端推送
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerPush {
    /// 连接已建立
    Connected {
        connection_id: ConnectionId,
        user_id: UserId,
    },
    /// 新消息
    NewMessage {
        message_id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        content: String,
        message_type: MessageKind,
        created_at: Timestamp,
        reply_to_id: Option<MessageId>,
    },
    /// 消息已读
    MessageRead {
        message_id: MessageId,
        room_id: RoomId,
        user_id: UserId,
        read_at: Timestamp,
    },
    /// 用户加入房间
    UserJoinedRoom { room_id: RoomId, user_id: UserId },
    /// 用户离开房间
    UserLeftRoom { room_id: RoomId, user_id: UserId },
    /// 输入状态变化
    UserTyping {
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    },
    /// 用户上下线
    UserOnlineStatus {
        user_id: UserId,
        status: PresenceStatus,
        changed_at: Timestamp,
    },
    /// 房间已创建
    RoomCreated {
        room_id: RoomId,
        participants: Vec<UserId>,
        room_type: RoomKind,
        name: Option<String>,
    },
    /// 房间信息或参与者变化
    RoomUpdated {
        room_id: RoomId,
        name: Option<String>,
        participants: Option<Vec<UserId>>,
    },
    /// 通知
    Notification {
        id: NotificationId,
        notification_type: String,
        payload: JsonValue,
        created_at: Timestamp,
    },
    /// 通知状态更新（例如在另一台设备上已读）
    NotificationUpdated {
        id: NotificationId,
        read_at: Option<Timestamp>,
    },
    /// 重连回放结束
    NotificationsSyncComplete { count: usize },
    /// 重连同步失败，客户端可以重试
    NotificationsSyncError { reason: String },
    /// `get-room-users` 的回复
    RoomUsers { room_id: RoomId, users: Vec<UserId> },
    /// 错误消息
    Error { code: String, message: String },
}

impl ServerPush {
    /// 事件名（与线协议中的 `event` 字段一致）
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerPush::Connected { .. } => "connected",
            ServerPush::NewMessage { .. } => "new-message",
            ServerPush::MessageRead { .. } => "message-read",
            ServerPush::UserJoinedRoom { .. } => "user-joined-room",
            ServerPush::UserLeftRoom { .. } => "user-left-room",
            ServerPush::UserTyping { .. } => "user-typing",
            ServerPush::UserOnlineStatus { .. } => "user-online-status",
            ServerPush::RoomCreated { .. } => "room-created",
            ServerPush::RoomUpdated { .. } => "room-updated",
            ServerPush::Notification { .. } => "notification",
            ServerPush::NotificationUpdated { .. } => "notification-updated",
            ServerPush::NotificationsSyncComplete { .. } => "notifications-sync-complete",
            ServerPush::NotificationsSyncError { .. } => "notifications-sync-error",
            ServerPush::RoomUsers { .. } => "room-users",
            ServerPush::Error { .. } => "error",
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerPush::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 握手元数据（查询参数与请求头），交给身份解析器使用
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeMetadata {
    attributes: HashMap<String, String>,
}

impl HandshakeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// 取第一个非空的属性值
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.attributes.get(*key))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for HandshakeMetadata {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn client_command_uses_kebab_event_and_camel_fields() {
        let room_id = RoomId::from(Uuid::new_v4());
        let json = format!(r#"{{"event":"typing","data":{{"roomId":"{room_id}","isTyping":true}}}}"#);
        let parsed: ClientCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed,
            ClientCommand::Typing {
                room_id,
                is_typing: true
            }
        );
    }

    #[test]
    fn sync_complete_serializes_with_count() {
        let value = serde_json::to_value(ServerPush::NotificationsSyncComplete { count: 3 }).unwrap();
        assert_eq!(value["event"], "notifications-sync-complete");
        assert_eq!(value["data"]["count"], 3);
    }

    #[test]
    fn event_name_matches_serialized_tag() {
        let push = ServerPush::UserOnlineStatus {
            user_id: UserId::from(Uuid::new_v4()),
            status: PresenceStatus::Offline,
            changed_at: chrono::Utc::now(),
        };
        let value = serde_json::to_value(&push).unwrap();
        assert_eq!(value["event"], push.event_name());
        assert_eq!(value["data"]["status"], "offline");
    }

    #[test]
    fn handshake_first_of_skips_blank_values() {
        let meta = HandshakeMetadata::new()
            .with("userId", "  ")
            .with("user_id", "abc");
        assert_eq!(meta.first_of(&["userId", "user_id"]), Some("abc"));
        assert_eq!(meta.first_of(&["token"]), None);
    }
}
