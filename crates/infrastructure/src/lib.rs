//! 基础设施层实现。
//!
//! 提供 PostgreSQL 上的持久化协作方，实现应用层定义的 `PersistenceGateway`。

pub mod db;

pub use db::persistence::PgPersistence;
pub use db::{Db, DbPool, MIGRATOR};
