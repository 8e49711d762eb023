//! 领域实体定义
//!
//! 持久化协作方返回的记录形状，以及 WebSocket 线协议。

pub mod chatroom;
pub mod message;
pub mod notification;
pub mod websocket;

// 重新导出核心实体
pub use chatroom::{NewRoom, RoomKind, RoomRoster};
pub use message::{MessageKind, MessageReadRecord, MessageRecord, NewMessage};
pub use notification::{notification_types, NewNotification, Notification};
pub use websocket::{ClientCommand, HandshakeMetadata, PresenceStatus, ServerPush};
