//! 聊天室实体
//!
//! 权威的房间成员名单保存在外部持久化存储中，这里只描述它的形状。

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{RoomId, UserId};

/// 房间类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// 一对一私聊
    Direct,
    /// 群聊
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Direct => "direct",
            RoomKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "direct" => Ok(RoomKind::Direct),
            "group" => Ok(RoomKind::Group),
            other => Err(DomainError::validation_error(
                "room_type",
                format!("unknown room type '{other}'"),
            )),
        }
    }
}

/// 房间名单快照（来自持久化存储）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRoster {
    pub room_id: RoomId,
    pub name: Option<String>,
    pub room_type: RoomKind,
    pub participants: Vec<UserId>,
}

/// 创建房间的输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub name: Option<String>,
    pub room_type: RoomKind,
    pub created_by: UserId,
    pub participants: Vec<UserId>,
}

impl NewRoom {
    /// 规范化参与者列表：创建者总是参与者，重复项被移除，保持首次出现的顺序。
    pub fn normalized_participants(&self) -> Vec<UserId> {
        let mut participants = Vec::with_capacity(self.participants.len() + 1);
        for user_id in std::iter::once(self.created_by).chain(self.participants.iter().copied()) {
            if !participants.contains(&user_id) {
                participants.push(user_id);
            }
        }
        participants
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let participants = self.normalized_participants();
        if participants.len() < 2 {
            return Err(DomainError::validation_error(
                "participants",
                "a room needs at least one participant besides its creator",
            ));
        }
        if self.room_type == RoomKind::Direct && participants.len() != 2 {
            return Err(DomainError::validation_error(
                "participants",
                "direct rooms have exactly two participants",
            ));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation_error("name", "cannot be blank"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    #[test]
    fn creator_is_always_a_participant() {
        let creator = user();
        let other = user();
        let room = NewRoom {
            name: None,
            room_type: RoomKind::Direct,
            created_by: creator,
            participants: vec![other, creator, other],
        };
        assert_eq!(room.normalized_participants(), vec![creator, other]);
        assert!(room.validate().is_ok());
    }

    #[test]
    fn direct_room_with_three_people_is_rejected() {
        let room = NewRoom {
            name: None,
            room_type: RoomKind::Direct,
            created_by: user(),
            participants: vec![user(), user()],
        };
        assert!(room.validate().is_err());
    }

    #[test]
    fn solo_room_is_rejected() {
        let creator = user();
        let room = NewRoom {
            name: Some("me".into()),
            room_type: RoomKind::Group,
            created_by: creator,
            participants: vec![creator],
        };
        assert!(room.validate().is_err());
    }
}
