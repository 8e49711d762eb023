//! 数据库连接池与迁移

use sqlx::migrate::Migrator;
use sqlx::{Pool, Postgres};

pub mod persistence;

pub type DbPool = Pool<Postgres>;

/// 内嵌的数据库迁移
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub struct Db;

impl Db {
    pub async fn create_pool(database_url: &str, max_size: u32) -> Result<DbPool, sqlx::Error> {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_size)
            .connect(database_url)
            .await
    }

    pub async fn migrate(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(pool).await
    }
}
