//! Web API 层。
//!
//! 提供 Axum 路由：`/ws` 把 WebSocket 连接接入实时中心，`/health` 返回运行状态。

mod routes;
mod state;
mod ws_connection;

pub use routes::router;
pub use state::AppState;
