use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use chatty_auth::AuthError;
use chatty_types::events::{GatewayCommand, GatewayEvent};

use crate::GatewayState;
use crate::handlers::handle_command;
use crate::registry::SessionUser;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn encode(event: &GatewayEvent) -> Message {
    Message::Text(serde_json::to_string(event).unwrap().into())
}

/// Byte-bounded prefix for logging raw client frames. Never splits a
/// multibyte character.
fn log_prefix(text: &str, max_bytes: usize) -> &str {
    let mut end = text.len().min(max_bytes);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Handle a WebSocket connection from upgrade to close. Credentials
/// arrive as upgrade query parameters; a failed handshake gets an
/// `error` event and an immediate close, it never reaches the loop.
pub async fn handle_connection(
    socket: WebSocket,
    state: GatewayState,
    token: Option<String>,
    refresh_token: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    let token = match token {
        Some(token) if !token.is_empty() => token,
        _ => {
            let _ = sender
                .send(encode(&GatewayEvent::Error {
                    message: "Authentication token missing".into(),
                }))
                .await;
            let _ = sender.close().await;
            return;
        }
    };

    let (claims, new_access) = match state
        .authority
        .authenticate_or_refresh(&token, refresh_token.as_deref())
    {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("WebSocket handshake rejected: {}", err);
            let message = match err {
                AuthError::ForcedLogout => "Session revoked, please sign in again".to_string(),
                AuthError::ExpiredToken => "Authentication token expired".to_string(),
                _ => "Authentication failed".to_string(),
            };
            let _ = sender.send(encode(&GatewayEvent::Error { message })).await;
            let _ = sender.close().await;
            return;
        }
    };

    // Silent refresh happened during the handshake: hand the client its
    // new access token before anything else.
    if let Some(access) = new_access {
        if sender
            .send(encode(&GatewayEvent::TokenRefreshed { token: access }))
            .await
            .is_err()
        {
            return;
        }
    }

    let user = SessionUser {
        id: claims.id.clone(),
        username: claims.username.clone(),
        role: claims.role,
    };
    info!("{} ({}) connected to gateway", user.username, user.id);

    if sender
        .send(encode(&GatewayEvent::Ready {
            user_id: user.id.clone(),
            username: user.username.clone(),
        }))
        .await
        .is_err()
    {
        return;
    }

    let (conn_id, mut user_rx) = state.registry.register(user.clone()).await;
    let mut broadcast_rx = state.registry.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts (room-filtered) + targeted events to the
    // client, with heartbeat.
    let registry_send = state.registry.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !registry_send.should_deliver(conn_id, &event).await {
                        continue;
                    }
                    if sender.send(encode(&event)).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if sender.send(encode(&event)).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client. Commands are awaited in arrival
    // order so a connection's own operations never race each other.
    let state_recv = state.clone();
    let user_recv = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&state_recv, conn_id, &user_recv, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            user_recv.username,
                            user_recv.id,
                            e,
                            log_prefix(&text, 200)
                        );
                        state_recv
                            .registry
                            .send_to_conn(
                                conn_id,
                                GatewayEvent::ErrorMessage {
                                    error: format!("Unrecognized command: {}", e),
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", user.username, user.id);
}
