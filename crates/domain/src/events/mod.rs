//! 领域事件定义
//!
//! 命令侧在持久化成功之后发布事件，实时核心消费事件并推送给在线连接。

pub mod domain_event;

// 重新导出事件类型
pub use domain_event::*;
