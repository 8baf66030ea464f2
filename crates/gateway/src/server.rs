use std::net::SocketAddr;

use axum::{
    Router,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::info;

use crate::{http::enqueue_chat, state::AppState, ws::handle_connection};

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_connection(socket, state.gateway, addr, query.token)
    })
}

/// Build the gateway's axum router: health check, the configured streaming
/// WebSocket path, and the HTTP enqueue endpoint (`SPEC_FULL.md` §4.E/§6).
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let stream_path = state.gateway.stream_path.clone();

    Router::new()
        .route("/health", get(health_handler))
        .route(&stream_path, get(ws_upgrade_handler))
        .route("/chat", post(enqueue_chat))
        .with_state(state)
}

/// Bind and serve the gateway until the process is terminated.
pub async fn serve(state: AppState, bind: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;

    info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
