//! 主应用程序入口
//!
//! 加载配置，组装实时核心并启动 Axum 服务。

use std::sync::Arc;

use application::{
    BridgeSettings, EventBridge, HandshakeUserIdResolver, InMemoryPersistence,
    PersistenceGateway, RealtimeHub, RouterSettings,
};
use config::AppConfig;
use infrastructure::{Db, PgPersistence};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let persistence = build_persistence(&config).await?;

    let realtime = &config.realtime;
    let router_settings = RouterSettings {
        delivery_timeout: realtime.delivery_timeout(),
    };
    let bridge = EventBridge::start(BridgeSettings {
        partitions: realtime.bridge_partitions,
        queue_capacity: realtime.bridge_queue_capacity,
    });
    let hub = RealtimeHub::with_bridge(
        Arc::new(HandshakeUserIdResolver),
        persistence,
        router_settings,
        bridge,
    )
    .await;

    let state = AppState::new(hub, realtime.outbound_buffer);
    let app = router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("实时服务启动在 http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

/// 配置了数据库时使用 PostgreSQL，否则退回内存持久化
async fn build_persistence(config: &AppConfig) -> anyhow::Result<Arc<dyn PersistenceGateway>> {
    let Some(url) = config.database.url.as_deref() else {
        tracing::warn!("未配置数据库，使用内存持久化（数据不会保存）");
        return Ok(Arc::new(InMemoryPersistence::new()));
    };

    let pool = Db::create_pool(url, config.database.max_connections).await?;
    if config.database.run_migrations {
        Db::migrate(&pool).await?;
        tracing::info!("数据库迁移完成");
    }
    Ok(Arc::new(PgPersistence::new(pool)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
