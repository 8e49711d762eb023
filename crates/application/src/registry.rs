//! 连接注册表
//!
//! 维护 用户 → 在线连接集合 以及 连接 → 用户 的双向索引。
//! 一个用户可以同时有多个连接（多标签页、多设备）。

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domain::{ConnectionId, HandshakeMetadata, Timestamp, UserId};

use crate::error::ApplicationError;
use crate::identity::IdentityResolver;
use crate::push::PushSink;

/// 已注册连接的句柄
#[derive(Clone)]
pub struct ConnectionHandle {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub connected_at: Timestamp,
    pub sink: Arc<dyn PushSink>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection_id", &self.connection_id)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

pub struct ConnectionRegistry {
    resolver: Arc<dyn IdentityResolver>,
    /// 连接 → 句柄
    connections: DashMap<ConnectionId, ConnectionHandle>,
    /// 用户 → 连接集合；集合为空时条目被移除
    user_connections: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            resolver,
            connections: DashMap::new(),
            user_connections: DashMap::new(),
        }
    }

    /// 解析握手身份并绑定连接。
    ///
    /// 身份无法解析时返回 `IdentityUnresolved`，不会创建任何状态，调用方必须关闭传输。
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        handshake: &HandshakeMetadata,
        sink: Arc<dyn PushSink>,
    ) -> Result<UserId, ApplicationError> {
        let user_id = self
            .resolver
            .resolve(handshake)
            .await
            .ok_or(ApplicationError::IdentityUnresolved)?;

        self.bind(connection_id, user_id, sink);
        Ok(user_id)
    }

    /// 绑定一个身份已知的连接
    pub fn bind(&self, connection_id: ConnectionId, user_id: UserId, sink: Arc<dyn PushSink>) {
        let handle = ConnectionHandle {
            connection_id,
            user_id,
            connected_at: chrono::Utc::now(),
            sink,
        };

        if let Some(previous) = self.connections.insert(connection_id, handle) {
            if previous.user_id != user_id {
                self.detach(previous.user_id, connection_id);
            }
        }

        self.user_connections
            .entry(user_id)
            .or_default()
            .insert(connection_id);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            "连接已注册"
        );
    }

    /// 解除绑定，返回连接所属的用户（如果存在）
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<UserId> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        self.detach(handle.user_id, connection_id);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %handle.user_id,
            "连接已注销"
        );
        Some(handle.user_id)
    }

    fn detach(&self, user_id: UserId, connection_id: ConnectionId) {
        if let Entry::Occupied(mut entry) = self.user_connections.entry(user_id) {
            entry.get_mut().remove(&connection_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// 用户的所有在线连接；离线或未知用户返回空集合
    pub fn connections_for(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.user_connections
            .get(&user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// 用户的所有在线连接句柄
    pub fn handles_for(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        self.connections_for(user_id)
            .into_iter()
            .filter_map(|connection_id| self.handle(connection_id))
            .collect()
    }

    pub fn handle(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections
            .get(&connection_id)
            .map(|handle| handle.clone())
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.connections
            .get(&connection_id)
            .map(|handle| handle.user_id)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.user_connections
            .get(&user_id)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn online_user_count(&self) -> usize {
        self.user_connections.len()
    }
}
