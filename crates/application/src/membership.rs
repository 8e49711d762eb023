//! 房间实时成员索引
//!
//! 维护 用户 → 已加入房间 与 房间 → 在线用户 的双向索引，用于房间范围的广播。
//! 这是在线状态的缓存，不是权威的房间成员名单：不在索引中只表示“当前不可达”，
//! 不表示“已被移出房间”。权威名单在重连同步时从持久化存储重建。
//!
//! 加锁顺序固定为先用户条目、后房间条目，同一用户的并发操作在用户条目上串行化，
//! 保证“用户在房间 R 的在线集合中 ⇔ R 在该用户的房间集合中”。

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domain::{RoomId, UserId};

#[derive(Default)]
pub struct RoomMembership {
    user_rooms: DashMap<UserId, HashSet<RoomId>>,
    room_users: DashMap<RoomId, HashSet<UserId>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入房间，幂等。返回是否为新加入。
    pub fn join(&self, user_id: UserId, room_id: RoomId) -> bool {
        let mut rooms = self.user_rooms.entry(user_id).or_default();
        let newly_joined = rooms.insert(room_id);
        self.room_users.entry(room_id).or_default().insert(user_id);
        drop(rooms);

        if newly_joined {
            tracing::debug!(room_id = %room_id, user_id = %user_id, "用户加入房间");
        }
        newly_joined
    }

    /// 离开房间，幂等。房间在线集合为空时条目被回收。返回是否确实离开。
    pub fn leave(&self, user_id: UserId, room_id: RoomId) -> bool {
        let left = match self.user_rooms.entry(user_id) {
            Entry::Occupied(mut rooms) => {
                let left = rooms.get_mut().remove(&room_id);
                self.remove_from_room(room_id, user_id);
                if rooms.get().is_empty() {
                    rooms.remove();
                }
                left
            }
            Entry::Vacant(_) => false,
        };

        if left {
            tracing::debug!(room_id = %room_id, user_id = %user_id, "用户离开房间");
        }
        left
    }

    /// 完全断开时调用：离开所有房间并返回这些房间
    pub fn leave_all(&self, user_id: UserId) -> HashSet<RoomId> {
        match self.user_rooms.entry(user_id) {
            Entry::Occupied(rooms) => {
                for room_id in rooms.get() {
                    self.remove_from_room(*room_id, user_id);
                }
                let (_, rooms) = rooms.remove_entry();
                tracing::debug!(user_id = %user_id, rooms = rooms.len(), "清理用户房间在线状态");
                rooms
            }
            Entry::Vacant(_) => HashSet::new(),
        }
    }

    fn remove_from_room(&self, room_id: RoomId, user_id: UserId) {
        if let Entry::Occupied(mut users) = self.room_users.entry(room_id) {
            users.get_mut().remove(&user_id);
            if users.get().is_empty() {
                users.remove();
            }
        }
    }

    /// 房间内当前在线的用户；没有在线用户的房间返回空集合
    pub fn users_in(&self, room_id: RoomId) -> HashSet<UserId> {
        self.room_users
            .get(&room_id)
            .map(|users| users.clone())
            .unwrap_or_default()
    }

    /// 用户当前加入的房间
    pub fn rooms_of(&self, user_id: UserId) -> HashSet<RoomId> {
        self.user_rooms
            .get(&user_id)
            .map(|rooms| rooms.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, user_id: UserId, room_id: RoomId) -> bool {
        self.room_users
            .get(&room_id)
            .map(|users| users.contains(&user_id))
            .unwrap_or(false)
    }

    /// 有在线用户的房间数量
    pub fn active_room_count(&self) -> usize {
        self.room_users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    fn room() -> RoomId {
        RoomId::from(Uuid::new_v4())
    }

    #[test]
    fn repeated_joins_collapse() {
        let membership = RoomMembership::new();
        let (u, r) = (user(), room());

        assert!(membership.join(u, r));
        assert!(!membership.join(u, r));
        assert_eq!(membership.users_in(r), HashSet::from([u]));

        // 一次 leave 即可抵消多次 join
        assert!(membership.leave(u, r));
        assert!(membership.users_in(r).is_empty());
        assert!(!membership.leave(u, r));
    }

    #[test]
    fn empty_rooms_are_pruned() {
        let membership = RoomMembership::new();
        let (a, b, r) = (user(), user(), room());
        membership.join(a, r);
        membership.join(b, r);
        assert_eq!(membership.active_room_count(), 1);

        membership.leave(a, r);
        assert_eq!(membership.active_room_count(), 1);
        membership.leave(b, r);
        assert_eq!(membership.active_room_count(), 0);
    }

    #[test]
    fn leave_all_returns_exactly_the_rooms_left() {
        let membership = RoomMembership::new();
        let (u, other) = (user(), user());
        let rooms: Vec<RoomId> = (0..3).map(|_| room()).collect();
        for r in &rooms {
            membership.join(u, *r);
            membership.join(other, *r);
        }
        membership.leave(u, rooms[2]);

        let left = membership.leave_all(u);
        assert_eq!(left, HashSet::from([rooms[0], rooms[1]]));
        for r in &rooms {
            assert!(!membership.users_in(*r).contains(&u));
            assert!(membership.users_in(*r).contains(&other));
        }
        assert!(membership.rooms_of(u).is_empty());
        assert!(membership.leave_all(u).is_empty());
    }

    #[test]
    fn index_is_bidirectional() {
        let membership = RoomMembership::new();
        let (u, r1, r2) = (user(), room(), room());
        membership.join(u, r1);
        membership.join(u, r2);

        assert_eq!(membership.rooms_of(u), HashSet::from([r1, r2]));
        for r in membership.rooms_of(u) {
            assert!(membership.is_member(u, r));
        }
    }

    #[test]
    fn random_join_leave_sequence_matches_model() {
        let membership = RoomMembership::new();
        let users: Vec<UserId> = (0..4).map(|_| user()).collect();
        let r = room();
        let mut model: HashSet<UserId> = HashSet::new();

        // 固定的伪随机序列，覆盖重复 join、重复 leave 的组合
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..200 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let u = users[(seed % users.len() as u64) as usize];
            if seed & 0b1000 == 0 {
                membership.join(u, r);
                model.insert(u);
            } else {
                membership.leave(u, r);
                model.remove(&u);
            }
            assert_eq!(membership.users_in(r), model);
        }
    }
}
