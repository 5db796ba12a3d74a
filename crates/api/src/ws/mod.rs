use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tandem_core::groups;
use tandem_core::protocol::{
    error_frame, success_frame, ServerEvent, CLOSE_CONNECTION_EXPIRED, ERR_CODE_PROTOCOL,
    ERR_CODE_RATE_LIMITED,
};
use tandem_realtime::ws::parse_client_frame;
use uuid::Uuid;

use crate::ApiState;

/// Maximum duration of a WebSocket connection.
const WS_MAX_LIFETIME: Duration = Duration::from_secs(60 * 60); // 1 hour
/// Interval between keepalive pings.
const WS_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Maximum size of a single inbound WebSocket message (64 KiB; the
/// largest legal action is a 1000-character message body).
const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024;

mod actions;
mod error;
mod presence;
mod realtime;

pub use presence::PresenceRegistry;

use error::ActionError;
use realtime::{ChatSession, CloseDirective, OutboundFrame};

pub(crate) async fn websocket_upgrade(
    State(state): State<ApiState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_frame_size(WS_MAX_MESSAGE_SIZE)
        .max_message_size(WS_MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve_websocket(socket, state))
}

async fn serve_websocket(socket: WebSocket, state: ApiState) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let (outbound, mut outbound_rx) = realtime::outbound_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let writer_closed = Arc::clone(&closed);

    let writer = tokio::spawn(async move {
        let mut keepalive = tokio::time::interval(WS_KEEPALIVE_INTERVAL);
        keepalive.tick().await; // first tick fires immediately, skip it
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    match frame {
                        OutboundFrame::Text(payload) => {
                            if socket_sender
                                .send(Message::Text(payload.to_string().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        OutboundFrame::Close(close) => {
                            let frame = CloseFrame {
                                code: close.code,
                                reason: close.reason.into(),
                            };
                            let _ = socket_sender.send(Message::Close(Some(frame))).await;
                            break;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if socket_sender
                        .send(Message::Ping(Vec::new().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
        writer_closed.store(true, Ordering::Relaxed);
    });

    let connection_id = Uuid::new_v4().to_string();
    let connection_rate_key = format!("conn:{connection_id}");
    let ctx = actions::ActionContext {
        storage: Arc::clone(&state.storage),
        broker: Arc::clone(&state.broker),
        presence: Arc::clone(&state.presence),
        outbound: outbound.clone(),
        connection_id: connection_id.clone(),
        closed: Arc::clone(&closed),
    };
    let mut session: Option<ChatSession> = None;

    let lifetime = jittered_lifetime(WS_MAX_LIFETIME);
    let deadline = tokio::time::sleep(lifetime);
    tokio::pin!(deadline);

    loop {
        let message = tokio::select! {
            msg = socket_receiver.next() => {
                match msg {
                    Some(Ok(message)) => message,
                    Some(Err(_)) | None => break,
                }
            }
            _ = &mut deadline => {
                realtime::send_close(
                    &outbound,
                    CloseDirective {
                        code: CLOSE_CONNECTION_EXPIRED,
                        reason: "connection timeout",
                    },
                )
                .await;
                break;
            }
        };

        match message {
            Message::Text(text) => {
                // One admission check per inbound action, keyed by
                // identity once authenticated, by connection before.
                let rate_key = session
                    .as_ref()
                    .map(ChatSession::identity_key)
                    .unwrap_or_else(|| connection_rate_key.clone());
                if !state.limiter.check(&rate_key).await {
                    realtime::send_text(
                        &outbound,
                        error_frame(ERR_CODE_RATE_LIMITED, "rate limit exceeded"),
                    )
                    .await;
                    continue;
                }

                let action = match parse_client_frame(text.as_str()) {
                    Ok(action) => action,
                    Err(parse_error) => {
                        realtime::send_text(
                            &outbound,
                            error_frame(ERR_CODE_PROTOCOL, &parse_error.to_string()),
                        )
                        .await;
                        continue;
                    }
                };

                match actions::dispatch(&ctx, &mut session, action).await {
                    Ok(()) => {}
                    Err(ActionError::ConnectionLimit) => {
                        realtime::send_close(
                            &outbound,
                            CloseDirective {
                                code: tandem_core::protocol::CLOSE_TOO_MANY_CONNECTIONS,
                                reason: "too many connections",
                            },
                        )
                        .await;
                        break;
                    }
                    Err(action_error) => {
                        if let ActionError::Internal(detail) = &action_error {
                            tracing::error!(%detail, "action failed");
                        }
                        realtime::send_text(&outbound, action_error.to_frame()).await;
                    }
                }
            }
            Message::Binary(_) => {
                realtime::send_text(
                    &outbound,
                    error_frame(ERR_CODE_PROTOCOL, "expected a text frame"),
                )
                .await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Teardown runs unconditionally, whatever ended the loop.
    if let Some(session) = session.take() {
        let principal = session.principal.clone();
        if state.presence.deregister(principal.kind, principal.id).await {
            let frame = success_frame(&ServerEvent::PresenceOffline {
                principal_type: principal.kind,
                principal_id: principal.id,
                last_seen: Utc::now(),
            });
            session
                .broadcast_others(&groups::presence(principal.kind, principal.id), &frame)
                .await;
        }
        session.unregister().await;
        state
            .limiter
            .forget(&groups::identity_key(principal.kind, principal.id))
            .await;
        tracing::debug!(
            principal = %groups::identity_key(principal.kind, principal.id),
            "connection closed"
        );
    }
    state.limiter.forget(&connection_rate_key).await;
    closed.store(true, Ordering::Relaxed);
    drop(outbound);
    drop(ctx);
    let _ = writer.await;
}

/// Returns base ± 10% to prevent thundering herd on reconnect.
fn jittered_lifetime(base: Duration) -> Duration {
    use rand_core::{OsRng, RngCore};
    // ±10%: multiply base by [0.9, 1.1)
    let random = (OsRng.next_u32() as f64) / (u32::MAX as f64); // [0, 1)
    let jitter = 0.9 + random * 0.2;
    Duration::from_secs_f64(base.as_secs_f64() * jitter)
}
