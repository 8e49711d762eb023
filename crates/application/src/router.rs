//! 广播路由器
//!
//! 将领域事件解析为目标连接集合并逐个推送。单个连接的失败只记录日志，
//! 不会影响其他连接，也不会让 `route` 失败。推送时不持有任何注册表或成员索引的锁。
//!
//! 广播只做不等待的入队：发送队列已满的连接记为 `QueueFull` 并跳过，
//! 事件桥的分区工作者因此不会被某个缓慢的连接拖住。
//! 定向推送（重连回放、命令回复）会在 `delivery_timeout` 内等待队列腾出空间。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{ConnectionId, DomainEvent, PresenceStatus, RoomId, ServerPush, UserId};

use crate::bridge::EventHandler;
use crate::error::DeliveryError;
use crate::membership::RoomMembership;
use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// 路由参数
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// 定向推送等待发送队列的超时
    pub delivery_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

/// 单个连接的投递结果
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub result: Result<(), DeliveryError>,
}

/// 一次路由的投递报告
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub event_type: &'static str,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    /// 成功收到推送的用户
    pub fn reached_users(&self) -> HashSet<UserId> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.user_id)
            .collect()
    }

    /// 被尝试投递的连接
    pub fn attempted_connections(&self) -> HashSet<ConnectionId> {
        self.outcomes.iter().map(|o| o.connection_id).collect()
    }
}

pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    membership: Arc<RoomMembership>,
    settings: RouterSettings,
}

impl BroadcastRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        membership: Arc<RoomMembership>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry,
            membership,
            settings,
        }
    }

    /// 解析目标并投递事件
    pub async fn route(&self, event: &DomainEvent) -> DeliveryReport {
        let recipients = self.resolve_recipients(event);
        let targets: Vec<ConnectionHandle> = recipients
            .into_iter()
            .flat_map(|user_id| self.registry.handles_for(user_id))
            .collect();

        let push = Arc::new(push_for(event));
        let outcomes = self.enqueue_all(targets, push);
        let report = DeliveryReport {
            event_type: event.event_type(),
            outcomes,
        };

        tracing::debug!(
            event_type = report.event_type,
            attempted = report.attempted(),
            failed = report.failed(),
            "事件路由完成"
        );
        report
    }

    /// 向单个连接推送（重连回放、命令回复使用）
    pub async fn deliver_to_connection(
        &self,
        connection_id: ConnectionId,
        push: ServerPush,
    ) -> Result<(), DeliveryError> {
        let handle = self
            .registry
            .handle(connection_id)
            .ok_or(DeliveryError::UnknownConnection(connection_id))?;
        let result = self.deliver(&handle, Arc::new(push)).await;
        if let Err(err) = &result {
            tracing::warn!(
                connection_id = %connection_id,
                user_id = %handle.user_id,
                error = %err,
                "推送失败"
            );
        }
        result
    }

    /// 事件的目标用户。房间创建和新增参与者事件同时把在线参与者加入房间索引。
    fn resolve_recipients(&self, event: &DomainEvent) -> HashSet<UserId> {
        match event {
            DomainEvent::MessageSent { room_id, .. }
            | DomainEvent::MessageRead { room_id, .. }
            | DomainEvent::RoomUpdated { room_id, .. } => self.membership.users_in(*room_id),

            DomainEvent::RoomCreated {
                room_id,
                participants,
                ..
            } => self.join_online(*room_id, participants),

            // 新参与者之外，房间里已在线的成员也需要看到名单变化
            DomainEvent::ParticipantsJoined {
                room_id,
                participants,
            } => {
                let mut users = self.membership.users_in(*room_id);
                users.extend(self.join_online(*room_id, participants));
                users
            }

            DomainEvent::TypingChanged {
                room_id, user_id, ..
            }
            | DomainEvent::RoomPresenceChanged {
                room_id, user_id, ..
            } => {
                let mut users = self.membership.users_in(*room_id);
                users.remove(user_id);
                users
            }

            DomainEvent::PresenceChanged { user_id, rooms, .. } => {
                let mut users: HashSet<UserId> = rooms
                    .iter()
                    .flat_map(|room_id| self.membership.users_in(*room_id))
                    .collect();
                users.remove(user_id);
                users
            }

            DomainEvent::NotificationCreated { user_id, .. }
            | DomainEvent::NotificationUpdated { user_id, .. } => HashSet::from([*user_id]),
        }
    }

    /// 把在线的参与者加入房间索引，返回全部参与者。
    ///
    /// 加入后再确认一次在线：若最后一个连接恰好在两次检查之间断开，
    /// 它的 `leave_all` 已经执行过，这里负责撤销刚才的加入。
    fn join_online(&self, room_id: RoomId, participants: &[UserId]) -> HashSet<UserId> {
        for user_id in participants {
            if self.registry.is_online(*user_id)
                && self.membership.join(*user_id, room_id)
                && !self.registry.is_online(*user_id)
            {
                self.membership.leave(*user_id, room_id);
            }
        }
        participants.iter().copied().collect()
    }

    fn enqueue_all(
        &self,
        targets: Vec<ConnectionHandle>,
        push: Arc<ServerPush>,
    ) -> Vec<DeliveryOutcome> {
        targets
            .into_iter()
            .map(|handle| {
                let result = handle.sink.try_push(Arc::clone(&push));
                if let Err(err) = &result {
                    tracing::warn!(
                        connection_id = %handle.connection_id,
                        user_id = %handle.user_id,
                        error = %err,
                        "推送失败"
                    );
                }
                DeliveryOutcome {
                    connection_id: handle.connection_id,
                    user_id: handle.user_id,
                    result,
                }
            })
            .collect()
    }

    async fn deliver(
        &self,
        handle: &ConnectionHandle,
        push: Arc<ServerPush>,
    ) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.settings.delivery_timeout, handle.sink.push(push)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(handle.connection_id)),
        }
    }
}

#[async_trait]
impl EventHandler for BroadcastRouter {
    async fn handle(&self, event: Arc<DomainEvent>) {
        self.route(&event).await;
    }
}

/// 领域事件对应的客户端推送
pub fn push_for(event: &DomainEvent) -> ServerPush {
    match event.clone() {
        DomainEvent::MessageSent {
            message_id,
            room_id,
            sender_id,
            content,
            message_type,
            created_at,
            reply_to_id,
        } => ServerPush::NewMessage {
            message_id,
            room_id,
            sender_id,
            content,
            message_type,
            created_at,
            reply_to_id,
        },
        DomainEvent::MessageRead {
            message_id,
            room_id,
            user_id,
            read_at,
        } => ServerPush::MessageRead {
            message_id,
            room_id,
            user_id,
            read_at,
        },
        DomainEvent::RoomCreated {
            room_id,
            participants,
            room_type,
            name,
        } => ServerPush::RoomCreated {
            room_id,
            participants,
            room_type,
            name,
        },
        DomainEvent::RoomUpdated { room_id, name, .. } => ServerPush::RoomUpdated {
            room_id,
            name,
            participants: None,
        },
        DomainEvent::ParticipantsJoined {
            room_id,
            participants,
        } => ServerPush::RoomUpdated {
            room_id,
            name: None,
            participants: Some(participants),
        },
        DomainEvent::TypingChanged {
            room_id,
            user_id,
            is_typing,
        } => ServerPush::UserTyping {
            room_id,
            user_id,
            is_typing,
        },
        DomainEvent::RoomPresenceChanged {
            room_id,
            user_id,
            joined: true,
        } => ServerPush::UserJoinedRoom { room_id, user_id },
        DomainEvent::RoomPresenceChanged {
            room_id,
            user_id,
            joined: false,
        } => ServerPush::UserLeftRoom { room_id, user_id },
        DomainEvent::PresenceChanged {
            user_id,
            online,
            changed_at,
            ..
        } => ServerPush::UserOnlineStatus {
            user_id,
            status: if online {
                PresenceStatus::Online
            } else {
                PresenceStatus::Offline
            },
            changed_at,
        },
        DomainEvent::NotificationCreated {
            notification_id,
            notification_type,
            payload,
            created_at,
            ..
        } => ServerPush::Notification {
            id: notification_id,
            notification_type,
            payload,
            created_at,
        },
        DomainEvent::NotificationUpdated {
            notification_id,
            read_at,
            ..
        } => ServerPush::NotificationUpdated {
            id: notification_id,
            read_at,
        },
    }
}
