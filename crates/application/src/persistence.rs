use async_trait::async_trait;
use domain::{
    MessageId, MessageReadRecord, MessageRecord, NewMessage, NewNotification, NewRoom,
    Notification, NotificationId, RoomId, RoomRoster, UserId,
};

use crate::error::PersistenceError;

/// 外部持久化协作方（系统的权威记录）
///
/// 所有调用都可能失败，并以类型化的错误返回。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// 用户当前所在的全部房间（权威名单）
    async fn find_rooms_for_user(&self, user_id: UserId)
        -> Result<Vec<RoomRoster>, PersistenceError>;

    /// 用户的未读通知，按创建时间新的在前，时间相同时按ID降序
    async fn find_unread_notifications(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Notification>, PersistenceError>;

    /// 标记通知已读并返回更新后的记录
    async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
    ) -> Result<Notification, PersistenceError>;

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, PersistenceError>;

    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, PersistenceError>;

    async fn mark_message_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<MessageReadRecord, PersistenceError>;

    async fn create_room(&self, room: NewRoom) -> Result<RoomRoster, PersistenceError>;

    async fn update_room(
        &self,
        room_id: RoomId,
        name: Option<String>,
    ) -> Result<RoomRoster, PersistenceError>;

    /// 添加参与者，返回实际新增的用户（已在房间中的会被忽略）
    async fn add_participants(
        &self,
        room_id: RoomId,
        participants: Vec<UserId>,
    ) -> Result<Vec<UserId>, PersistenceError>;
}

/// 内存实现的持久化协作方（用于开发和测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    #[derive(Default)]
    struct Store {
        rooms: HashMap<RoomId, RoomRoster>,
        messages: HashMap<MessageId, MessageRecord>,
        notifications: HashMap<NotificationId, Notification>,
    }

    #[derive(Default)]
    pub struct InMemoryPersistence {
        store: RwLock<Store>,
    }

    impl InMemoryPersistence {
        pub fn new() -> Self {
            Self::default()
        }

        /// 直接写入一个房间（测试数据准备）
        pub async fn insert_room(&self, room: RoomRoster) {
            self.store.write().await.rooms.insert(room.room_id, room);
        }

        /// 直接写入一条通知（测试数据准备）
        pub async fn insert_notification(&self, notification: Notification) {
            self.store
                .write()
                .await
                .notifications
                .insert(notification.id, notification);
        }
    }

    #[async_trait]
    impl PersistenceGateway for InMemoryPersistence {
        async fn find_rooms_for_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<RoomRoster>, PersistenceError> {
            let store = self.store.read().await;
            let mut rooms: Vec<RoomRoster> = store
                .rooms
                .values()
                .filter(|room| room.participants.contains(&user_id))
                .cloned()
                .collect();
            rooms.sort_by_key(|room| room.room_id);
            Ok(rooms)
        }

        async fn find_unread_notifications(
            &self,
            user_id: UserId,
        ) -> Result<Vec<Notification>, PersistenceError> {
            let store = self.store.read().await;
            let mut unread: Vec<Notification> = store
                .notifications
                .values()
                .filter(|n| n.user_id == user_id && n.is_unread())
                .cloned()
                .collect();
            unread.sort_by(Notification::newest_first);
            Ok(unread)
        }

        async fn mark_notification_read(
            &self,
            notification_id: NotificationId,
        ) -> Result<Notification, PersistenceError> {
            let mut store = self.store.write().await;
            let notification = store
                .notifications
                .get_mut(&notification_id)
                .ok_or_else(|| PersistenceError::not_found("notification", notification_id))?;
            if notification.read_at.is_none() {
                notification.read_at = Some(chrono::Utc::now());
            }
            Ok(notification.clone())
        }

        async fn create_notification(
            &self,
            notification: NewNotification,
        ) -> Result<Notification, PersistenceError> {
            let record = Notification {
                id: NotificationId::from(Uuid::new_v4()),
                user_id: notification.user_id,
                notification_type: notification.notification_type,
                payload: notification.payload,
                created_at: chrono::Utc::now(),
                read_at: None,
            };
            self.store
                .write()
                .await
                .notifications
                .insert(record.id, record.clone());
            Ok(record)
        }

        async fn create_message(
            &self,
            message: NewMessage,
        ) -> Result<MessageRecord, PersistenceError> {
            let mut store = self.store.write().await;
            if !store.rooms.contains_key(&message.room_id) {
                return Err(PersistenceError::not_found("room", message.room_id));
            }
            let record = MessageRecord {
                id: MessageId::from(Uuid::new_v4()),
                room_id: message.room_id,
                sender_id: message.sender_id,
                content: message.content.into_inner(),
                message_type: message.message_type,
                reply_to_id: message.reply_to_id,
                created_at: chrono::Utc::now(),
            };
            store.messages.insert(record.id, record.clone());
            Ok(record)
        }

        async fn mark_message_read(
            &self,
            message_id: MessageId,
            user_id: UserId,
        ) -> Result<MessageReadRecord, PersistenceError> {
            let store = self.store.read().await;
            let message = store
                .messages
                .get(&message_id)
                .ok_or_else(|| PersistenceError::not_found("message", message_id))?;
            Ok(MessageReadRecord {
                message_id,
                room_id: message.room_id,
                user_id,
                read_at: chrono::Utc::now(),
            })
        }

        async fn create_room(&self, room: NewRoom) -> Result<RoomRoster, PersistenceError> {
            let roster = RoomRoster {
                room_id: RoomId::from(Uuid::new_v4()),
                name: room.name.clone(),
                room_type: room.room_type,
                participants: room.normalized_participants(),
            };
            self.store
                .write()
                .await
                .rooms
                .insert(roster.room_id, roster.clone());
            Ok(roster)
        }

        async fn update_room(
            &self,
            room_id: RoomId,
            name: Option<String>,
        ) -> Result<RoomRoster, PersistenceError> {
            let mut store = self.store.write().await;
            let room = store
                .rooms
                .get_mut(&room_id)
                .ok_or_else(|| PersistenceError::not_found("room", room_id))?;
            room.name = name;
            Ok(room.clone())
        }

        async fn add_participants(
            &self,
            room_id: RoomId,
            participants: Vec<UserId>,
        ) -> Result<Vec<UserId>, PersistenceError> {
            let mut store = self.store.write().await;
            let room = store
                .rooms
                .get_mut(&room_id)
                .ok_or_else(|| PersistenceError::not_found("room", room_id))?;
            let mut added = Vec::new();
            for user_id in participants {
                if !room.participants.contains(&user_id) {
                    room.participants.push(user_id);
                    added.push(user_id);
                }
            }
            Ok(added)
        }
    }

}
