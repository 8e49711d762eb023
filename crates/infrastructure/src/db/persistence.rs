//! PostgreSQL 持久化协作方

use std::collections::HashSet;

use application::{PersistenceError, PersistenceGateway};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    MessageId, MessageKind, MessageReadRecord, MessageRecord, NewMessage, NewNotification,
    NewRoom, Notification, NotificationId, RoomId, RoomKind, RoomRoster, UserId,
};
use sqlx::{query, query_as, FromRow};
use uuid::Uuid;

use crate::db::DbPool;

const FOREIGN_KEY_VIOLATION: &str = "23503";

const ROOM_COLUMNS: &str = r#"
    SELECT r.id, r.name, r.room_type,
           COALESCE(
               array_agg(p.user_id ORDER BY p.joined_at, p.user_id)
                   FILTER (WHERE p.user_id IS NOT NULL),
               '{}'::uuid[]
           ) AS participants
    FROM rooms r
    LEFT JOIN room_participants p ON p.room_id = r.id
"#;

const NOTIFICATION_COLUMNS: &str = "id, user_id, notification_type, payload, created_at, read_at";

/// 数据库房间模型（含参与者）
#[derive(Debug, Clone, FromRow)]
struct DbRoom {
    id: Uuid,
    name: Option<String>,
    room_type: String,
    participants: Vec<Uuid>,
}

impl DbRoom {
    fn into_roster(self) -> Result<RoomRoster, PersistenceError> {
        let room_type = RoomKind::parse(&self.room_type).map_err(corrupt_row)?;
        Ok(RoomRoster {
            room_id: RoomId::from(self.id),
            name: self.name,
            room_type,
            participants: self.participants.into_iter().map(UserId::from).collect(),
        })
    }
}

/// 数据库消息模型
#[derive(Debug, Clone, FromRow)]
struct DbMessage {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: String,
    reply_to_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl DbMessage {
    fn into_record(self) -> Result<MessageRecord, PersistenceError> {
        let message_type = MessageKind::parse(&self.message_type).map_err(corrupt_row)?;
        Ok(MessageRecord {
            id: MessageId::from(self.id),
            room_id: RoomId::from(self.room_id),
            sender_id: UserId::from(self.sender_id),
            content: self.content,
            message_type,
            reply_to_id: self.reply_to_id.map(MessageId::from),
            created_at: self.created_at,
        })
    }
}

/// 数据库通知模型
#[derive(Debug, Clone, FromRow)]
struct DbNotification {
    id: Uuid,
    user_id: Uuid,
    notification_type: String,
    payload: sqlx::types::Json<serde_json::Value>,
    created_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
}

impl From<DbNotification> for Notification {
    fn from(row: DbNotification) -> Self {
        Notification {
            id: NotificationId::from(row.id),
            user_id: UserId::from(row.user_id),
            notification_type: row.notification_type,
            payload: row.payload.0,
            created_at: row.created_at,
            read_at: row.read_at,
        }
    }
}

fn unavailable(err: sqlx::Error) -> PersistenceError {
    tracing::error!(error = %err, "数据库操作失败");
    PersistenceError::unavailable(err.to_string())
}

fn corrupt_row(err: domain::DomainError) -> PersistenceError {
    PersistenceError::unavailable(format!("invalid row: {err}"))
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION))
}

/// 基于 PostgreSQL 的持久化实现
#[derive(Clone)]
pub struct PgPersistence {
    pool: DbPool,
}

impl PgPersistence {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_room(&self, room_id: RoomId) -> Result<RoomRoster, PersistenceError> {
        let sql = format!("{ROOM_COLUMNS} WHERE r.id = $1 GROUP BY r.id, r.name, r.room_type");
        query_as::<_, DbRoom>(&sql)
            .bind(Uuid::from(room_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| PersistenceError::not_found("room", room_id))?
            .into_roster()
    }
}

#[async_trait]
impl PersistenceGateway for PgPersistence {
    async fn find_rooms_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<RoomRoster>, PersistenceError> {
        let sql = format!(
            "{ROOM_COLUMNS}
             WHERE EXISTS (
                 SELECT 1 FROM room_participants me
                 WHERE me.room_id = r.id AND me.user_id = $1
             )
             GROUP BY r.id, r.name, r.room_type
             ORDER BY r.id"
        );
        let rows = query_as::<_, DbRoom>(&sql)
            .bind(Uuid::from(user_id))
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        rows.into_iter().map(DbRoom::into_roster).collect()
    }

    async fn find_unread_notifications(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Notification>, PersistenceError> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = $1 AND read_at IS NULL
             ORDER BY created_at DESC, id DESC"
        );
        let rows = query_as::<_, DbNotification>(&sql)
            .bind(Uuid::from(user_id))
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(rows.into_iter().map(Notification::from).collect())
    }

    async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
    ) -> Result<Notification, PersistenceError> {
        let sql = format!(
            "UPDATE notifications SET read_at = COALESCE(read_at, NOW())
             WHERE id = $1
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        query_as::<_, DbNotification>(&sql)
            .bind(Uuid::from(notification_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?
            .map(Notification::from)
            .ok_or_else(|| PersistenceError::not_found("notification", notification_id))
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, PersistenceError> {
        let sql = format!(
            "INSERT INTO notifications (id, user_id, notification_type, payload)
             VALUES ($1, $2, $3, $4)
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = query_as::<_, DbNotification>(&sql)
            .bind(Uuid::new_v4())
            .bind(Uuid::from(notification.user_id))
            .bind(&notification.notification_type)
            .bind(sqlx::types::Json(&notification.payload))
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(row.into())
    }

    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, PersistenceError> {
        let room_id = message.room_id;
        let result = query_as::<_, DbMessage>(
            r#"
            INSERT INTO messages (id, room_id, sender_id, content, message_type, reply_to_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, room_id, sender_id, content, message_type, reply_to_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::from(message.room_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.message_type.as_str())
        .bind(message.reply_to_id.map(Uuid::from))
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.into_record(),
            Err(err) if is_foreign_key_violation(&err) => {
                Err(PersistenceError::not_found("room", room_id))
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn mark_message_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<MessageReadRecord, PersistenceError> {
        let room_id: Uuid = query_as::<_, (Uuid,)>("SELECT room_id FROM messages WHERE id = $1")
            .bind(Uuid::from(message_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| PersistenceError::not_found("message", message_id))?
            .0;

        // 重复标记保留第一次的已读时间
        let (read_at,): (DateTime<Utc>,) = query_as(
            r#"
            INSERT INTO message_reads (message_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (message_id, user_id) DO UPDATE SET read_at = message_reads.read_at
            RETURNING read_at
            "#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(MessageReadRecord {
            message_id,
            room_id: RoomId::from(room_id),
            user_id,
            read_at,
        })
    }

    async fn create_room(&self, room: NewRoom) -> Result<RoomRoster, PersistenceError> {
        let room_id = RoomId::from(Uuid::new_v4());
        let participants = room.normalized_participants();
        let participant_ids: Vec<Uuid> = participants.iter().map(|u| Uuid::from(*u)).collect();

        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        query("INSERT INTO rooms (id, name, room_type, created_by) VALUES ($1, $2, $3, $4)")
            .bind(Uuid::from(room_id))
            .bind(&room.name)
            .bind(room.room_type.as_str())
            .bind(Uuid::from(room.created_by))
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        query("INSERT INTO room_participants (room_id, user_id) SELECT $1, unnest($2::uuid[])")
            .bind(Uuid::from(room_id))
            .bind(participant_ids.as_slice())
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        tx.commit().await.map_err(unavailable)?;

        tracing::debug!(room_id = %room_id, participants = participants.len(), "房间已写入");
        Ok(RoomRoster {
            room_id,
            name: room.name,
            room_type: room.room_type,
            participants,
        })
    }

    async fn update_room(
        &self,
        room_id: RoomId,
        name: Option<String>,
    ) -> Result<RoomRoster, PersistenceError> {
        let updated = query("UPDATE rooms SET name = $2, updated_at = NOW() WHERE id = $1")
            .bind(Uuid::from(room_id))
            .bind(&name)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        if updated.rows_affected() == 0 {
            return Err(PersistenceError::not_found("room", room_id));
        }
        self.load_room(room_id).await
    }

    async fn add_participants(
        &self,
        room_id: RoomId,
        participants: Vec<UserId>,
    ) -> Result<Vec<UserId>, PersistenceError> {
        let ids: Vec<Uuid> = participants.iter().map(|u| Uuid::from(*u)).collect();
        let result = query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO room_participants (room_id, user_id)
            SELECT $1, unnest($2::uuid[])
            ON CONFLICT (room_id, user_id) DO NOTHING
            RETURNING user_id
            "#,
        )
        .bind(Uuid::from(room_id))
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await;

        let inserted: HashSet<Uuid> = match result {
            Ok(rows) => rows.into_iter().map(|(id,)| id).collect(),
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(PersistenceError::not_found("room", room_id))
            }
            Err(err) => return Err(unavailable(err)),
        };

        // 按调用方给出的顺序返回，重复项只保留一次
        let mut seen = HashSet::new();
        Ok(participants
            .into_iter()
            .filter(|u| inserted.contains(&Uuid::from(*u)) && seen.insert(*u))
            .collect())
    }
}
