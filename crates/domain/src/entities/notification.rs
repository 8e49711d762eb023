//! 通知实体定义

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::value_objects::{NotificationId, Timestamp, UserId};

/// 通知实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// 通知ID
    pub id: NotificationId,
    /// 用户ID
    pub user_id: UserId,
    /// 通知类型
    pub notification_type: String,
    /// 载荷
    pub payload: JsonValue,
    /// 创建时间
    pub created_at: Timestamp,
    /// 阅读时间
    pub read_at: Option<Timestamp>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }

    /// 回放顺序：创建时间新的在前，时间相同时按ID降序。
    ///
    /// 这是一个全序，保证同一批未读通知每次回放的顺序一致。
    pub fn newest_first(a: &Notification, b: &Notification) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    }
}

/// 创建通知的输入
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub notification_type: String,
    pub payload: JsonValue,
}

/// 通知类型常量
pub mod notification_types {
    pub const MESSAGE_RECEIVED: &str = "message_received";
    pub const MENTION_RECEIVED: &str = "mention_received";
    pub const ROOM_INVITE: &str = "room_invite";
    pub const SYSTEM_NOTICE: &str = "system_notice";
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn notification(id: Uuid, created_at: Timestamp) -> Notification {
        Notification {
            id: NotificationId::from(id),
            user_id: UserId::from(Uuid::nil()),
            notification_type: notification_types::SYSTEM_NOTICE.into(),
            payload: JsonValue::Null,
            created_at,
            read_at: None,
        }
    }

    #[test]
    fn newest_first_orders_by_time_then_id() {
        let now = Utc::now();
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let mut list = vec![
            notification(Uuid::from_u128(9), now - Duration::seconds(10)),
            notification(low, now),
            notification(high, now),
        ];
        list.sort_by(Notification::newest_first);

        let ids: Vec<Uuid> = list.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![high, low, Uuid::from_u128(9)]);
    }
}
