//! 实时在线状态与消息分发核心的领域模型
//!
//! 包含标识符、持久化记录的形状、领域事件以及客户端线协议。
//! 这里不做任何 I/O。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
