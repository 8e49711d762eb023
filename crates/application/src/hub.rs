//! 实时中心
//!
//! 每个传输连接的生命周期入口：连接 → 注册 → 上线 → 重连同步，客户端命令，
//! 断开时对称清理。传输层只需要持有 `RealtimeHub` 和自己的推送接收端。

use std::sync::Arc;

use domain::{ClientCommand, ConnectionId, DomainEvent, HandshakeMetadata, RoomId, ServerPush, UserId};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::bridge::{BridgeSettings, EventBridge, SubscriptionHandle};
use crate::error::ApplicationError;
use crate::identity::IdentityResolver;
use crate::membership::RoomMembership;
use crate::persistence::PersistenceGateway;
use crate::presence::PresenceTracker;
use crate::push::PushSink;
use crate::registry::ConnectionRegistry;
use crate::router::{BroadcastRouter, RouterSettings};
use crate::sync::{ReconnectSynchronizer, SyncResult};

/// 连接成功后的结果
pub struct Connected {
    pub user_id: UserId,
    /// 后台运行的重连同步任务
    pub sync: JoinHandle<SyncResult>,
}

/// 运行时统计（健康检查使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connections: usize,
    pub online_users: usize,
    pub active_rooms: usize,
}

pub struct RealtimeHub {
    registry: Arc<ConnectionRegistry>,
    membership: Arc<RoomMembership>,
    presence: Arc<PresenceTracker>,
    router: Arc<BroadcastRouter>,
    synchronizer: Arc<ReconnectSynchronizer>,
    bridge: Arc<EventBridge>,
    _routing: SubscriptionHandle,
}

impl RealtimeHub {
    /// 组装核心组件，启动事件桥并把路由器注册为订阅者
    pub async fn start(
        resolver: Arc<dyn IdentityResolver>,
        persistence: Arc<dyn PersistenceGateway>,
        router_settings: RouterSettings,
        bridge_settings: BridgeSettings,
    ) -> Arc<Self> {
        let bridge = EventBridge::start(bridge_settings);
        Self::with_bridge(resolver, persistence, router_settings, bridge).await
    }

    /// 使用已有的事件桥组装（命令服务与中心共享同一个事件桥）
    pub async fn with_bridge(
        resolver: Arc<dyn IdentityResolver>,
        persistence: Arc<dyn PersistenceGateway>,
        router_settings: RouterSettings,
        bridge: Arc<EventBridge>,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new(resolver));
        let membership = Arc::new(RoomMembership::new());
        let presence = Arc::new(PresenceTracker::new());
        let router = Arc::new(BroadcastRouter::new(
            Arc::clone(&registry),
            Arc::clone(&membership),
            router_settings,
        ));
        let synchronizer = Arc::new(ReconnectSynchronizer::new(
            persistence,
            Arc::clone(&registry),
            Arc::clone(&membership),
            Arc::clone(&router),
        ));
        let routing = bridge.subscribe(router.clone()).await;

        Arc::new(Self {
            registry,
            membership,
            presence,
            router,
            synchronizer,
            bridge,
            _routing: routing,
        })
    }

    /// 新连接：解析身份、注册、标记上线、确认连接，并在后台启动重连同步。
    ///
    /// 身份无法解析时返回 `IdentityUnresolved`，调用方必须关闭传输。
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        handshake: &HandshakeMetadata,
        sink: Arc<dyn PushSink>,
    ) -> Result<Connected, ApplicationError> {
        let user_id = self.registry.register(connection_id, handshake, sink).await?;
        let went_online = self.presence.on_connect(user_id).is_some();

        // 确认失败说明连接已关闭，传输层会随后调用 disconnect
        let _ = self
            .router
            .deliver_to_connection(
                connection_id,
                ServerPush::Connected {
                    connection_id,
                    user_id,
                },
            )
            .await;

        let synchronizer = Arc::clone(&self.synchronizer);
        let presence = Arc::clone(&self.presence);
        let membership = Arc::clone(&self.membership);
        let bridge = Arc::clone(&self.bridge);
        let sync = tokio::spawn(async move {
            let result = synchronizer.on_authenticated(user_id, connection_id).await;
            if went_online && presence.is_online(user_id) {
                let event = DomainEvent::PresenceChanged {
                    user_id,
                    online: true,
                    rooms: membership.rooms_of(user_id).into_iter().collect(),
                    changed_at: presence.online_since(user_id).unwrap_or_else(chrono::Utc::now),
                };
                if let Err(err) = bridge.publish(event).await {
                    tracing::warn!(user_id = %user_id, error = %err, "上线事件发布失败");
                }
            }
            result
        });

        Ok(Connected { user_id, sync })
    }

    /// 传输关闭：注销连接；最后一个连接关闭时离开全部房间、清除输入状态并广播下线
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(user_id) = self.registry.unregister(connection_id) else {
            return;
        };
        let Some(change) = self.presence.on_disconnect(user_id) else {
            return;
        };

        let rooms = self.membership.leave_all(user_id);
        for room_id in self.presence.clear_typing(user_id, &rooms) {
            self.publish(DomainEvent::TypingChanged {
                room_id,
                user_id,
                is_typing: false,
            })
            .await;
        }

        self.publish(DomainEvent::PresenceChanged {
            user_id,
            online: false,
            rooms: rooms.into_iter().collect(),
            changed_at: change.changed_at,
        })
        .await;
    }

    /// 处理客户端命令
    pub async fn handle_command(
        &self,
        connection_id: ConnectionId,
        command: ClientCommand,
    ) -> Result<(), ApplicationError> {
        let user_id = self
            .registry
            .user_of(connection_id)
            .ok_or(ApplicationError::IdentityUnresolved)?;

        match command {
            ClientCommand::JoinRoom { room_id } => {
                if self.membership.join(user_id, room_id) {
                    self.bridge
                        .publish(DomainEvent::RoomPresenceChanged {
                            room_id,
                            user_id,
                            joined: true,
                        })
                        .await?;
                }
            }
            ClientCommand::LeaveRoom { room_id } => {
                if self.membership.leave(user_id, room_id) {
                    self.stop_typing(user_id, room_id).await?;
                    self.bridge
                        .publish(DomainEvent::RoomPresenceChanged {
                            room_id,
                            user_id,
                            joined: false,
                        })
                        .await?;
                }
            }
            ClientCommand::Typing { room_id, is_typing } => {
                let event = self.presence.set_typing(room_id, user_id, is_typing);
                self.bridge.publish(event).await?;
            }
            ClientCommand::GetRoomUsers { room_id } => {
                let mut users: Vec<UserId> = self.membership.users_in(room_id).into_iter().collect();
                users.sort();
                let _ = self
                    .router
                    .deliver_to_connection(connection_id, ServerPush::RoomUsers { room_id, users })
                    .await;
            }
        }
        Ok(())
    }

    async fn stop_typing(&self, user_id: UserId, room_id: RoomId) -> Result<(), ApplicationError> {
        if !self.presence.clear_typing(user_id, [&room_id]).is_empty() {
            self.bridge
                .publish(DomainEvent::TypingChanged {
                    room_id,
                    user_id,
                    is_typing: false,
                })
                .await?;
        }
        Ok(())
    }

    async fn publish(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(err) = self.bridge.publish(event).await {
            tracing::warn!(event_type, error = %err, "事件发布失败");
        }
    }

    /// 向单个连接推送（例如传输层回复格式错误的帧）
    pub async fn reply(&self, connection_id: ConnectionId, push: ServerPush) {
        let _ = self.router.deliver_to_connection(connection_id, push).await;
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.connection_count(),
            online_users: self.presence.online_user_count(),
            active_rooms: self.membership.active_room_count(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn membership(&self) -> &Arc<RoomMembership> {
        &self.membership
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }
}
