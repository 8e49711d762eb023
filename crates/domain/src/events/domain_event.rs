//! 实时分发相关的领域事件
//!
//! 封闭的标签联合：新增事件种类时，路由器的 `match` 会在编译期提醒补全。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entities::chatroom::{RoomKind, RoomRoster};
use crate::entities::message::{MessageKind, MessageReadRecord, MessageRecord};
use crate::entities::notification::Notification;
use crate::value_objects::{MessageId, NotificationId, RoomId, Timestamp, UserId};

/// 领域事件。构造后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    /// 消息发送事件
    MessageSent {
        message_id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        content: String,
        message_type: MessageKind,
        created_at: Timestamp,
        reply_to_id: Option<MessageId>,
    },

    /// 消息已读事件
    MessageRead {
        message_id: MessageId,
        room_id: RoomId,
        user_id: UserId,
        read_at: Timestamp,
    },

    /// 房间创建事件
    RoomCreated {
        room_id: RoomId,
        participants: Vec<UserId>,
        room_type: RoomKind,
        name: Option<String>,
    },

    /// 房间信息更新事件
    RoomUpdated {
        room_id: RoomId,
        name: Option<String>,
        updated_at: Timestamp,
    },

    /// 新参与者加入房间（持久化层面的成员变化）
    ParticipantsJoined {
        room_id: RoomId,
        participants: Vec<UserId>,
    },

    /// 输入状态变化
    TypingChanged {
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    },

    /// 用户进入或离开房间的实时频道
    RoomPresenceChanged {
        room_id: RoomId,
        user_id: UserId,
        joined: bool,
    },

    /// 用户上线或下线，`rooms` 是需要通知的房间
    PresenceChanged {
        user_id: UserId,
        online: bool,
        rooms: Vec<RoomId>,
        changed_at: Timestamp,
    },

    /// 通知创建事件
    NotificationCreated {
        notification_id: NotificationId,
        user_id: UserId,
        notification_type: String,
        payload: JsonValue,
        created_at: Timestamp,
    },

    /// 通知状态更新事件
    NotificationUpdated {
        notification_id: NotificationId,
        user_id: UserId,
        read_at: Option<Timestamp>,
    },
}

/// 事件分区键：同一分区内的事件按发布顺序被消费
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    Room(RoomId),
    User(UserId),
}

impl DomainEvent {
    /// 从持久化的消息创建消息发送事件
    pub fn message_sent(message: &MessageRecord) -> Self {
        DomainEvent::MessageSent {
            message_id: message.id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            message_type: message.message_type,
            created_at: message.created_at,
            reply_to_id: message.reply_to_id,
        }
    }

    /// 从已读回执创建消息已读事件
    pub fn message_read(receipt: &MessageReadRecord) -> Self {
        DomainEvent::MessageRead {
            message_id: receipt.message_id,
            room_id: receipt.room_id,
            user_id: receipt.user_id,
            read_at: receipt.read_at,
        }
    }

    /// 从房间名单创建房间创建事件
    pub fn room_created(room: &RoomRoster) -> Self {
        DomainEvent::RoomCreated {
            room_id: room.room_id,
            participants: room.participants.clone(),
            room_type: room.room_type,
            name: room.name.clone(),
        }
    }

    /// 创建房间更新事件
    pub fn room_updated(room: &RoomRoster) -> Self {
        DomainEvent::RoomUpdated {
            room_id: room.room_id,
            name: room.name.clone(),
            updated_at: Utc::now(),
        }
    }

    /// 从通知记录创建通知事件
    pub fn notification_created(notification: &Notification) -> Self {
        DomainEvent::NotificationCreated {
            notification_id: notification.id,
            user_id: notification.user_id,
            notification_type: notification.notification_type.clone(),
            payload: notification.payload.clone(),
            created_at: notification.created_at,
        }
    }

    /// 从通知记录创建通知更新事件
    pub fn notification_updated(notification: &Notification) -> Self {
        DomainEvent::NotificationUpdated {
            notification_id: notification.id,
            user_id: notification.user_id,
            read_at: notification.read_at,
        }
    }

    /// 获取事件类型名称
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::MessageSent { .. } => "MessageSent",
            DomainEvent::MessageRead { .. } => "MessageRead",
            DomainEvent::RoomCreated { .. } => "RoomCreated",
            DomainEvent::RoomUpdated { .. } => "RoomUpdated",
            DomainEvent::ParticipantsJoined { .. } => "ParticipantsJoined",
            DomainEvent::TypingChanged { .. } => "TypingChanged",
            DomainEvent::RoomPresenceChanged { .. } => "RoomPresenceChanged",
            DomainEvent::PresenceChanged { .. } => "PresenceChanged",
            DomainEvent::NotificationCreated { .. } => "NotificationCreated",
            DomainEvent::NotificationUpdated { .. } => "NotificationUpdated",
        }
    }

    /// 获取事件中的房间ID（如果有）
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            DomainEvent::MessageSent { room_id, .. }
            | DomainEvent::MessageRead { room_id, .. }
            | DomainEvent::RoomCreated { room_id, .. }
            | DomainEvent::RoomUpdated { room_id, .. }
            | DomainEvent::ParticipantsJoined { room_id, .. }
            | DomainEvent::TypingChanged { room_id, .. }
            | DomainEvent::RoomPresenceChanged { room_id, .. } => Some(*room_id),
            DomainEvent::PresenceChanged { .. }
            | DomainEvent::NotificationCreated { .. }
            | DomainEvent::NotificationUpdated { .. } => None,
        }
    }

    /// 分区键：房间事件按房间分区，其余按用户分区
    pub fn partition_key(&self) -> PartitionKey {
        match self {
            DomainEvent::PresenceChanged { user_id, .. }
            | DomainEvent::NotificationCreated { user_id, .. }
            | DomainEvent::NotificationUpdated { user_id, .. } => PartitionKey::User(*user_id),
            DomainEvent::MessageSent { room_id, .. }
            | DomainEvent::MessageRead { room_id, .. }
            | DomainEvent::RoomCreated { room_id, .. }
            | DomainEvent::RoomUpdated { room_id, .. }
            | DomainEvent::ParticipantsJoined { room_id, .. }
            | DomainEvent::TypingChanged { room_id, .. }
            | DomainEvent::RoomPresenceChanged { room_id, .. } => PartitionKey::Room(*room_id),
        }
    }
}
