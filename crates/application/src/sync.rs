//! 重连同步
//!
//! 新连接认证后，从持久化存储重建用户的房间在线状态，并向该连接回放未读通知。
//! 同步失败只会向该连接发送错误信号，连接保持可用。

use std::sync::Arc;

use domain::{ConnectionId, Notification, RoomId, ServerPush, UserId};

use crate::error::{ApplicationError, DeliveryError};
use crate::membership::RoomMembership;
use crate::persistence::PersistenceGateway;
use crate::registry::ConnectionRegistry;
use crate::router::BroadcastRouter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Complete,
    Failed { reason: String },
    /// 同步途中连接已关闭
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    /// 本次同步加入的房间（包括此前已在索引中的）
    pub rooms_joined: Vec<RoomId>,
    /// 成功回放的未读通知数量
    pub replayed: usize,
    pub status: SyncStatus,
}

impl SyncResult {
    pub fn is_complete(&self) -> bool {
        self.status == SyncStatus::Complete
    }
}

pub struct ReconnectSynchronizer {
    persistence: Arc<dyn PersistenceGateway>,
    registry: Arc<ConnectionRegistry>,
    membership: Arc<RoomMembership>,
    router: Arc<BroadcastRouter>,
}

impl ReconnectSynchronizer {
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        registry: Arc<ConnectionRegistry>,
        membership: Arc<RoomMembership>,
        router: Arc<BroadcastRouter>,
    ) -> Self {
        Self {
            persistence,
            registry,
            membership,
            router,
        }
    }

    /// 对一个已认证的连接执行同步：恢复房间、回放未读通知、发送完成信号
    pub async fn on_authenticated(&self, user_id: UserId, connection_id: ConnectionId) -> SyncResult {
        let rooms = match self.persistence.find_rooms_for_user(user_id).await {
            Ok(rooms) => rooms,
            Err(err) => {
                let err = ApplicationError::sync_failed(format!("room roster: {err}"));
                return self
                    .fail(user_id, connection_id, Vec::new(), 0, err)
                    .await;
            }
        };

        let rooms_joined: Vec<RoomId> = rooms
            .iter()
            .map(|room| {
                self.membership.join(user_id, room.room_id);
                room.room_id
            })
            .collect();

        // 查询期间连接可能已经关闭。断开流程先注销再 leave_all，
        // 所以加入之后若用户已离线，说明那次 leave_all 没有覆盖这里的加入，需要撤销。
        if self.registry.handle(connection_id).is_none() {
            if !self.registry.is_online(user_id) {
                let left = self.membership.leave_all(user_id);
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    rooms = left.len(),
                    "同步期间连接已关闭，撤销房间加入"
                );
            }
            return aborted(Vec::new(), 0);
        }

        let mut unread = match self.persistence.find_unread_notifications(user_id).await {
            Ok(unread) => unread,
            Err(err) => {
                let err = ApplicationError::sync_failed(format!("unread notifications: {err}"));
                return self
                    .fail(user_id, connection_id, rooms_joined, 0, err)
                    .await;
            }
        };
        unread.sort_by(Notification::newest_first);

        let mut replayed = 0;
        for notification in unread {
            let push = ServerPush::Notification {
                id: notification.id,
                notification_type: notification.notification_type,
                payload: notification.payload,
                created_at: notification.created_at,
            };
            match self.router.deliver_to_connection(connection_id, push).await {
                Ok(()) => replayed += 1,
                Err(DeliveryError::Timeout(_)) => {}
                Err(_) => return aborted(rooms_joined, replayed),
            }
        }

        if self
            .router
            .deliver_to_connection(
                connection_id,
                ServerPush::NotificationsSyncComplete { count: replayed },
            )
            .await
            .is_err()
        {
            return aborted(rooms_joined, replayed);
        }

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            rooms = rooms_joined.len(),
            replayed,
            "重连同步完成"
        );
        SyncResult {
            rooms_joined,
            replayed,
            status: SyncStatus::Complete,
        }
    }

    async fn fail(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        rooms_joined: Vec<RoomId>,
        replayed: usize,
        err: ApplicationError,
    ) -> SyncResult {
        tracing::warn!(
            user_id = %user_id,
            connection_id = %connection_id,
            error = %err,
            "重连同步失败"
        );
        let reason = err.to_string();
        // 错误信号送达失败只说明连接已关闭，无需处理
        let _ = self
            .router
            .deliver_to_connection(
                connection_id,
                ServerPush::NotificationsSyncError {
                    reason: reason.clone(),
                },
            )
            .await;

        SyncResult {
            rooms_joined,
            replayed,
            status: SyncStatus::Failed { reason },
        }
    }
}

fn aborted(rooms_joined: Vec<RoomId>, replayed: usize) -> SyncResult {
    SyncResult {
        rooms_joined,
        replayed,
        status: SyncStatus::Aborted,
    }
}
