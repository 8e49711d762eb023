use std::collections::HashMap;

use application::HubStats;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Json, Router,
};
use domain::HandshakeMetadata;
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    stats: HubStats,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stats: state.hub.stats(),
    })
}

/// WebSocket 握手：查询参数作为身份元数据交给身份解析器
async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let handshake: HandshakeMetadata = params.into_iter().collect();
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state, handshake).run())
}
