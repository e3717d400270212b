//! WebSocket upgrade handler and per-connection session plumbing

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::SessionCommand;
use crate::net::PING_INTERVAL_SECS;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection. The first message must be a
/// `join`; everything before it is discarded.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (conn_id, display_name) = loop {
        let Some(result) = ws_stream.next().await else {
            debug!("socket closed before join");
            return;
        };
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => continue,
        };
        match serde_json::from_str::<ClientMsg>(&text) {
            Ok(ClientMsg::Join {
                rejoin_id,
                display_name,
            }) => {
                let outcome = state.connections.join(rejoin_id, display_name);
                let name = state
                    .connections
                    .display_name(outcome.rejoin_id)
                    .unwrap_or_else(|| format!("player_{}", &outcome.rejoin_id.to_string()[..8]));
                if outcome.rejoined {
                    info!(conn = %outcome.rejoin_id, "participant rejoined");
                } else {
                    info!(conn = %outcome.rejoin_id, player = %name, "participant joined");
                }
                break (outcome.rejoin_id, name);
            }
            Ok(other) => {
                debug!(msg = ?other, "message before join, discarding");
            }
            Err(e) => {
                warn!(error = %e, "unparseable message before join");
            }
        }
    };

    let ack = ServerMsg::JoinAck {
        rejoin_id: conn_id,
    };
    if let Err(e) = send_msg(&mut ws_sink, &ack).await {
        error!(conn = %conn_id, error = %e, "failed to send join ack");
        return;
    }

    // Attach flushes any backlog queued while the participant was away
    let (tx, rx) = mpsc::unbounded_channel();
    state.connections.attach(conn_id, tx);
    state
        .session
        .send(SessionCommand::Joined {
            conn_id,
            display_name: display_name.clone(),
        })
        .await;

    run_connection(conn_id, ws_sink, ws_stream, rx, &state).await;

    // Transport drop; the participant keeps its rejoin window until the
    // reconnection budget runs out or it leaves explicitly
    state.connections.detach(conn_id);
    info!(conn = %conn_id, "socket closed");
}

/// Pump messages both ways until either side drops.
async fn run_connection(
    conn_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerMsg>,
    state: &AppState,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: registry outbox -> socket, plus periodic latency pings
    let connections = state.connections.clone();
    let writer_handle = tokio::spawn(async move {
        let mut ping_timer = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(conn = %conn_id, error = %e, "socket send failed");
                        break;
                    }
                }
                _ = ping_timer.tick() => {
                    let Some(sent_at) = connections.record_ping_sent(conn_id) else { break };
                    let ping = ServerMsg::Ping { sent_at };
                    if let Err(e) = send_msg(&mut ws_sink, &ping).await {
                        debug!(conn = %conn_id, error = %e, "ping send failed");
                        break;
                    }
                }
            }
        }
    });

    // Reader loop: socket -> session commands
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(conn = %conn_id, "rate limited input message");
                    continue;
                }
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if !dispatch_client_msg(conn_id, msg, state).await {
                            break;
                        }
                    }
                    // Malformed payloads are dropped, the connection stays up
                    Err(e) => {
                        warn!(conn = %conn_id, error = %e, "failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn = %conn_id, "binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(conn = %conn_id, "client initiated close");
                break;
            }
            Err(e) => {
                debug!(conn = %conn_id, error = %e, "socket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Route one parsed client message. Returns false when the connection
/// should wind down.
pub async fn dispatch_client_msg(conn_id: Uuid, msg: ClientMsg, state: &AppState) -> bool {
    match msg {
        ClientMsg::Join { .. } => {
            debug!(conn = %conn_id, "duplicate join, ignoring");
        }
        ClientMsg::Ping { sent_at } => {
            // Echo the client's timestamp when it carries one; receipt
            // time is a foreign clock from the client's point of view
            let sent_at = sent_at.unwrap_or_else(unix_millis);
            state.connections.send(conn_id, ServerMsg::Pong { sent_at });
        }
        ClientMsg::Pong { sent_at } => {
            if let Some(rtt) = state.connections.record_pong(conn_id, sent_at) {
                debug!(conn = %conn_id, rtt_ms = rtt, "pong");
            }
        }
        ClientMsg::ClientInput { fields, look_dir } => {
            state
                .session
                .send(SessionCommand::Input {
                    conn_id,
                    fields,
                    look_dir,
                })
                .await;
        }
        ClientMsg::Leave {} => {
            state
                .session
                .send(SessionCommand::Leave { conn_id })
                .await;
            return false;
        }
        ClientMsg::DebugSkipStage {} => {
            state
                .session
                .send(SessionCommand::SkipStage { conn_id })
                .await;
        }
    }
    true
}

async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
