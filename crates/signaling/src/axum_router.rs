//! Axum Router 集成
//!
//! 提供 SignalingServer 的 Axum Router 适配器

use crate::server::{SignalingServer, handle_websocket_connection};
use anyhow::{Result, ensure};
use axum::{
    Json, Router,
    extract::{ConnectInfo, State, ws::WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Signaling Server 状态（用于 Axum State）
#[derive(Clone)]
pub struct SignalingState {
    pub server: Arc<SignalingServer>,
}

/// 创建 Signaling Axum Router
///
/// `ws_path` 上处理 WebSocket 升级，`/health` 返回存活状态。
pub fn create_signaling_router(server: Arc<SignalingServer>, ws_path: &str) -> Result<Router> {
    ensure!(
        ws_path.starts_with('/') && ws_path != "/health",
        "invalid WebSocket path '{ws_path}'"
    );
    info!("Creating Signaling Axum router on {}", ws_path);

    let state = SignalingState { server };
    let router = Router::new()
        .route(ws_path, get(websocket_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    info!("Signaling Axum router created successfully");
    Ok(router)
}

/// WebSocket 升级处理器
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<SignalingState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let client_ip = addr.ip();
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, state.server, Some(client_ip)))
}

async fn health_handler(State(state): State<SignalingState>) -> impl IntoResponse {
    let registry = state.server.registry();
    Json(json!({
        "status": "ok",
        "sessions": registry.session_count(),
        "online": registry.roster().len(),
    }))
}
