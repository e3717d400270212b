//! HTTP route definitions: health, WebSocket upgrade, and the long-poll
//! fallback transport for clients that cannot hold a socket open

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::SessionCommand;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Support multiple origins, comma-separated in CLIENT_ORIGIN
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/fallback/join", post(fallback_join_handler))
        .route("/fallback/:conn_id/send", post(fallback_send_handler))
        .route("/fallback/:conn_id/recv", get(fallback_recv_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    participants: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        participants: state.connections.count(),
    })
}

// ============================================================================
// Fallback transport (HTTP long-poll)
//
// Same wire messages as the socket, degraded delivery: outbound traffic
// accumulates in the participant's backlog and is drained on each poll.
// ============================================================================

async fn fallback_join_handler(
    State(state): State<AppState>,
    Json(msg): Json<ClientMsg>,
) -> Result<Json<ServerMsg>, StatusCode> {
    let ClientMsg::Join {
        rejoin_id,
        display_name,
    } = msg
    else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let outcome = state.connections.join(rejoin_id, display_name);
    let conn_id = outcome.rejoin_id;
    let display_name = state
        .connections
        .display_name(conn_id)
        .unwrap_or_else(|| format!("player_{}", &conn_id.to_string()[..8]));
    info!(conn = %conn_id, rejoined = outcome.rejoined, "fallback join");

    state
        .session
        .send(SessionCommand::Joined {
            conn_id,
            display_name,
        })
        .await;

    Ok(Json(ServerMsg::JoinAck { rejoin_id: conn_id }))
}

async fn fallback_send_handler(
    State(state): State<AppState>,
    Path(conn_id): Path<Uuid>,
    Json(msg): Json<ClientMsg>,
) -> Result<StatusCode, StatusCode> {
    if !state.connections.contains(conn_id) {
        return Err(StatusCode::NOT_FOUND);
    }
    // Same per-participant input budget as the socket path
    let allowed = state
        .fallback_limiters
        .entry(conn_id)
        .or_insert_with(ConnectionRateLimiter::new)
        .check_input();
    if !allowed {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    crate::ws::handler::dispatch_client_msg(conn_id, msg, &state).await;
    Ok(StatusCode::ACCEPTED)
}

async fn fallback_recv_handler(
    State(state): State<AppState>,
    Path(conn_id): Path<Uuid>,
) -> Result<Json<Vec<ServerMsg>>, StatusCode> {
    match state.connections.drain_backlog(conn_id) {
        Some(messages) => Ok(Json(messages)),
        None => Err(StatusCode::NOT_FOUND),
    }
}
