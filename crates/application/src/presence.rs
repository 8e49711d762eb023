//! 在线状态跟踪
//!
//! 只在 0→1 和 1→0 的连接数边沿产生上下线事件；同一用户的后续连接不会重复通知。
//! 计数在用户条目锁内更新，因此同一用户的上下线转换是线性一致的。

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domain::{DomainEvent, PresenceStatus, RoomId, Timestamp, UserId};

/// 上下线转换
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub changed_at: Timestamp,
}

#[derive(Debug)]
struct PresenceEntry {
    connections: usize,
    online_since: Timestamp,
}

#[derive(Default)]
pub struct PresenceTracker {
    sessions: DashMap<UserId, PresenceEntry>,
    /// 房间 → 正在输入的用户
    typing: DashMap<RoomId, HashSet<UserId>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用户新增一个连接。仅在第一个连接时返回上线事件。
    pub fn on_connect(&self, user_id: UserId) -> Option<PresenceChange> {
        let now = chrono::Utc::now();
        let mut entry = self.sessions.entry(user_id).or_insert(PresenceEntry {
            connections: 0,
            online_since: now,
        });
        entry.connections += 1;
        if entry.connections != 1 {
            return None;
        }
        entry.online_since = now;
        drop(entry);

        tracing::info!(user_id = %user_id, "用户上线");
        Some(PresenceChange {
            user_id,
            status: PresenceStatus::Online,
            changed_at: now,
        })
    }

    /// 用户关闭一个连接。仅在最后一个连接关闭时返回下线事件。
    pub fn on_disconnect(&self, user_id: UserId) -> Option<PresenceChange> {
        let Entry::Occupied(mut entry) = self.sessions.entry(user_id) else {
            return None;
        };
        let remaining = entry.get().connections.saturating_sub(1);
        if remaining > 0 {
            entry.get_mut().connections = remaining;
            return None;
        }
        let (_, session) = entry.remove_entry();
        let now = chrono::Utc::now();

        tracing::info!(
            user_id = %user_id,
            online_seconds = (now - session.online_since).num_seconds(),
            "用户下线"
        );
        Some(PresenceChange {
            user_id,
            status: PresenceStatus::Offline,
            changed_at: now,
        })
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.sessions.contains_key(&user_id)
    }

    pub fn online_since(&self, user_id: UserId) -> Option<Timestamp> {
        self.sessions.get(&user_id).map(|entry| entry.online_since)
    }

    /// 切换输入状态。无论状态是否变化都会产生事件，界面意图每次都需要重新广播。
    pub fn set_typing(&self, room_id: RoomId, user_id: UserId, is_typing: bool) -> DomainEvent {
        if is_typing {
            self.typing.entry(room_id).or_default().insert(user_id);
        } else if let Entry::Occupied(mut users) = self.typing.entry(room_id) {
            users.get_mut().remove(&user_id);
            if users.get().is_empty() {
                users.remove();
            }
        }

        DomainEvent::TypingChanged {
            room_id,
            user_id,
            is_typing,
        }
    }

    pub fn typing_users(&self, room_id: RoomId) -> HashSet<UserId> {
        self.typing
            .get(&room_id)
            .map(|users| users.clone())
            .unwrap_or_default()
    }

    /// 清除用户在给定房间中的输入标记，返回确实被清除的房间
    pub fn clear_typing<'a>(
        &self,
        user_id: UserId,
        rooms: impl IntoIterator<Item = &'a RoomId>,
    ) -> Vec<RoomId> {
        let mut cleared = Vec::new();
        for room_id in rooms {
            if let Entry::Occupied(mut users) = self.typing.entry(*room_id) {
                if users.get_mut().remove(&user_id) {
                    cleared.push(*room_id);
                }
                if users.get().is_empty() {
                    users.remove();
                }
            }
        }
        cleared
    }

    pub fn online_user_count(&self) -> usize {
        self.sessions.len()
    }
}
