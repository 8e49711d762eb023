//! 聊天命令服务
//!
//! 每个命令先验证、再通过持久化协作方写入，成功后发布恰好一个领域事件。
//! 持久化失败时返回 `PersistenceUnavailable`，不会发布任何事件。

use std::sync::Arc;

use domain::{
    DomainEvent, MessageId, MessageReadRecord, MessageRecord, NewMessage, NewNotification,
    NewRoom, Notification, NotificationId, RoomId, RoomRoster, UserId,
};
use tracing::{debug, info};

use crate::bridge::EventBridge;
use crate::error::ApplicationError;
use crate::persistence::PersistenceGateway;

pub type ApplicationResult<T> = Result<T, ApplicationError>;

/// 写侧命令入口。由外部的命令层（HTTP/RPC）持有，必须与 `RealtimeHub` 共用同一个
/// `EventBridge`，事件才能推送到在线连接；本进程的二进制只装配实时侧。
pub struct ChatCommandService {
    persistence: Arc<dyn PersistenceGateway>,
    bridge: Arc<EventBridge>,
}

impl ChatCommandService {
    pub fn new(persistence: Arc<dyn PersistenceGateway>, bridge: Arc<EventBridge>) -> Self {
        Self {
            persistence,
            bridge,
        }
    }

    /// 发送消息
    pub async fn send_message(&self, message: NewMessage) -> ApplicationResult<MessageRecord> {
        let record = self.persistence.create_message(message).await?;
        debug!(message_id = %record.id, room_id = %record.room_id, "消息已保存");

        self.bridge.publish(DomainEvent::message_sent(&record)).await?;
        Ok(record)
    }

    /// 标记消息已读
    pub async fn mark_message_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> ApplicationResult<MessageReadRecord> {
        let receipt = self.persistence.mark_message_read(message_id, user_id).await?;
        self.bridge.publish(DomainEvent::message_read(&receipt)).await?;
        Ok(receipt)
    }

    /// 创建房间
    pub async fn create_room(&self, room: NewRoom) -> ApplicationResult<RoomRoster> {
        room.validate()?;
        let roster = self.persistence.create_room(room).await?;
        info!(
            room_id = %roster.room_id,
            participants = roster.participants.len(),
            "房间已创建"
        );

        self.bridge.publish(DomainEvent::room_created(&roster)).await?;
        Ok(roster)
    }

    /// 更新房间名称
    pub async fn update_room(
        &self,
        room_id: RoomId,
        name: Option<String>,
    ) -> ApplicationResult<RoomRoster> {
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let roster = self.persistence.update_room(room_id, name).await?;
        self.bridge.publish(DomainEvent::room_updated(&roster)).await?;
        Ok(roster)
    }

    /// 添加参与者。没有实际新增的用户时不发布事件。
    pub async fn add_participants(
        &self,
        room_id: RoomId,
        participants: Vec<UserId>,
    ) -> ApplicationResult<Vec<UserId>> {
        let added = self
            .persistence
            .add_participants(room_id, participants)
            .await?;
        if added.is_empty() {
            return Ok(added);
        }

        self.bridge
            .publish(DomainEvent::ParticipantsJoined {
                room_id,
                participants: added.clone(),
            })
            .await?;
        Ok(added)
    }

    /// 创建通知
    pub async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> ApplicationResult<Notification> {
        let record = self.persistence.create_notification(notification).await?;
        self.bridge
            .publish(DomainEvent::notification_created(&record))
            .await?;
        Ok(record)
    }

    /// 标记通知已读，并通知该用户的其他在线连接
    pub async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
    ) -> ApplicationResult<Notification> {
        let record = self
            .persistence
            .mark_notification_read(notification_id)
            .await?;
        self.bridge
            .publish(DomainEvent::notification_updated(&record))
            .await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeSettings, EventHandler};
    use crate::error::PersistenceError;
    use crate::persistence::MockPersistenceGateway;
    use async_trait::async_trait;
    use domain::{MessageContent, MessageKind, RoomKind};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Recorder(mpsc::UnboundedSender<Arc<DomainEvent>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Arc<DomainEvent>) {
            let _ = self.0.send(event);
        }
    }

    async fn service(
        persistence: MockPersistenceGateway,
    ) -> (ChatCommandService, mpsc::UnboundedReceiver<Arc<DomainEvent>>) {
        let bridge = EventBridge::start(BridgeSettings::default());
        let (sender, receiver) = mpsc::unbounded_channel();
        bridge.subscribe(Arc::new(Recorder(sender))).await;
        (
            ChatCommandService::new(Arc::new(persistence), bridge),
            receiver,
        )
    }

    fn new_message() -> NewMessage {
        NewMessage {
            room_id: RoomId::from(Uuid::new_v4()),
            sender_id: UserId::from(Uuid::new_v4()),
            content: MessageContent::new("hi").unwrap(),
            message_type: MessageKind::Text,
            reply_to_id: None,
        }
    }

    #[tokio::test]
    async fn persisted_message_is_published_once() {
        let mut persistence = MockPersistenceGateway::new();
        persistence.expect_create_message().times(1).returning(|m| {
            Ok(MessageRecord {
                id: MessageId::from(Uuid::new_v4()),
                room_id: m.room_id,
                sender_id: m.sender_id,
                content: m.content.into_inner(),
                message_type: m.message_type,
                reply_to_id: None,
                created_at: chrono::Utc::now(),
            })
        });
        let (service, mut events) = service(persistence).await;

        let record = service.send_message(new_message()).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.as_ref(), &DomainEvent::message_sent(&record));
    }

    #[tokio::test]
    async fn persistence_failure_publishes_nothing() {
        let mut persistence = MockPersistenceGateway::new();
        persistence
            .expect_create_message()
            .returning(|_| Err(PersistenceError::unavailable("pool timed out")));
        let (service, mut events) = service(persistence).await;

        let result = service.send_message(new_message()).await;

        assert!(matches!(
            result,
            Err(ApplicationError::PersistenceUnavailable(_))
        ));
        let nothing = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn invalid_room_never_reaches_persistence() {
        let mut persistence = MockPersistenceGateway::new();
        persistence.expect_create_room().never();
        let (service, _events) = service(persistence).await;

        let result = service
            .create_room(NewRoom {
                name: None,
                room_type: RoomKind::Group,
                created_by: UserId::from(Uuid::new_v4()),
                participants: Vec::new(),
            })
            .await;

        assert!(matches!(result, Err(ApplicationError::Domain(_))));
    }

    #[tokio::test]
    async fn adding_existing_participants_publishes_nothing() {
        let mut persistence = MockPersistenceGateway::new();
        persistence
            .expect_add_participants()
            .returning(|_, _| Ok(Vec::new()));
        let (service, mut events) = service(persistence).await;

        let added = service
            .add_participants(
                RoomId::from(Uuid::new_v4()),
                vec![UserId::from(Uuid::new_v4())],
            )
            .await
            .unwrap();

        assert!(added.is_empty());
        let nothing = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn reading_a_notification_republishes_it() {
        let user_id = UserId::from(Uuid::new_v4());
        let id = NotificationId::from(Uuid::new_v4());
        let mut persistence = MockPersistenceGateway::new();
        persistence
            .expect_mark_notification_read()
            .returning(move |id| {
                Ok(Notification {
                    id,
                    user_id,
                    notification_type: "room_invite".into(),
                    payload: serde_json::json!({}),
                    created_at: chrono::Utc::now(),
                    read_at: Some(chrono::Utc::now()),
                })
            });
        let (service, mut events) = service(persistence).await;

        service.mark_notification_read(id).await.unwrap();

        match events.recv().await.unwrap().as_ref() {
            DomainEvent::NotificationUpdated {
                notification_id,
                user_id: owner,
                read_at,
            } => {
                assert_eq!(*notification_id, id);
                assert_eq!(*owner, user_id);
                assert!(read_at.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
