//! 实时分发核心。
//!
//! 跟踪在线连接、房间在线成员与输入状态，把领域事件扇出到正确的在线连接，
//! 并在重连时从持久化存储恢复房间与未读通知。

pub mod bridge;
pub mod commands;
pub mod error;
pub mod hub;
pub mod identity;
pub mod membership;
pub mod persistence;
pub mod presence;
pub mod push;
pub mod registry;
pub mod router;
pub mod sync;

pub use bridge::{BridgeSettings, EventBridge, EventHandler, SubscriptionHandle};
pub use commands::{ApplicationResult, ChatCommandService};
pub use error::{ApplicationError, DeliveryError, PersistenceError};
pub use hub::{Connected, HubStats, RealtimeHub};
pub use identity::{HandshakeUserIdResolver, IdentityResolver};
pub use membership::RoomMembership;
pub use persistence::{memory::InMemoryPersistence, PersistenceGateway};
pub use presence::{PresenceChange, PresenceTracker};
pub use push::{ChannelSink, PushSink};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use router::{push_for, BroadcastRouter, DeliveryOutcome, DeliveryReport, RouterSettings};
pub use sync::{ReconnectSynchronizer, SyncResult, SyncStatus};
