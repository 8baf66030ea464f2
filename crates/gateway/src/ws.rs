use std::{net::SocketAddr, sync::Arc};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, stream::StreamExt};
use relaygate_auth::Identity;
use relaygate_dispatcher::{ChatRequest, ChunkPayload};
use relaygate_protocol::{ErrorFrame, InboundChatFrame, MAX_INBOUND_FRAME_BYTES};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::GatewayState;

/// Handle a single WebSocket connection through its full lifecycle: auth on
/// upgrade, read loop, per-frame dispatch, keepalive, close (`SPEC_FULL.md`
/// §4.E). Grounded on the teacher's `handle_connection` (split socket, a
/// serialized write-loop task fed by an unbounded channel, a message loop).
pub async fn handle_connection(
    mut socket: WebSocket,
    state: Arc<GatewayState>,
    remote_addr: SocketAddr,
    query_token: Option<String>,
) {
    let identity = match state.auth.verify_ws(query_token.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!(%remote_addr, %err, "ws: authentication failed");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: 1008,
                    reason: "unauthenticated".into(),
                })))
                .await;
            return;
        },
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, subject = %identity.subject, %remote_addr, "ws: connection authenticated");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(text) = write_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    let mut active: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    let mut keepalive = tokio::time::interval(state.ws_keepalive);
    keepalive.tick().await;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if write_tx.send(String::new()).is_err() {
                    break;
                }
            }
            message = ws_rx.next() => {
                let Some(message) = message else { break };
                let text = match message {
                    Ok(Message::Text(t)) => t.to_string(),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        debug!(conn_id = %conn_id, %err, "ws: read error");
                        break;
                    },
                };

                if text.is_empty() {
                    continue;
                }
                if text.len() > MAX_INBOUND_FRAME_BYTES {
                    let _ = write_tx.send(
                        serde_json::to_string(&ErrorFrame::new("frame too large")).unwrap_or_default(),
                    );
                    continue;
                }

                let frame: InboundChatFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(conn_id = %conn_id, %err, "ws: malformed frame");
                        let _ = write_tx.send(
                            serde_json::to_string(&ErrorFrame::new("malformed frame")).unwrap_or_default(),
                        );
                        continue;
                    },
                };

                if frame.msg.is_empty() {
                    let _ = write_tx.send(
                        serde_json::to_string(&ErrorFrame::new("empty message")).unwrap_or_default(),
                    );
                    continue;
                }

                active.retain(|handle| !handle.is_finished());
                active.push(spawn_request(
                    Arc::clone(&state),
                    identity.clone(),
                    frame,
                    write_tx.clone(),
                ));
            }
        }
    }

    for handle in active {
        handle.abort();
    }
    drop(write_tx);
    let _ = write_handle.await;

    info!(conn_id = %conn_id, "ws: connection closed");
}

/// Run one chat request to completion, forwarding every chunk to the
/// connection's write loop. Spawned as its own task so the read loop stays
/// responsive; aborting this task drops `receiver`, which the Dispatcher
/// observes as `sink.closed()` and treats as cancellation.
fn spawn_request(
    state: Arc<GatewayState>,
    identity: Identity,
    frame: InboundChatFrame,
    write_tx: mpsc::UnboundedSender<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let request = ChatRequest {
            conversation_id: frame.room_id,
            text: frame.msg,
            model_id: frame.model,
        };

        let (sink, mut receiver) = relaygate_dispatcher::channel(32);
        let dispatcher = Arc::clone(&state.dispatcher);
        let relay = tokio::spawn(async move { dispatcher.dispatch(&identity, request, sink).await });

        while let Some(chunk) = receiver.recv().await {
            let text = match chunk.payload {
                ChunkPayload::Frame(frame) => serde_json::to_string(&frame),
                ChunkPayload::Error(reason) => serde_json::to_string(&ErrorFrame::new(reason)),
            };
            match text {
                Ok(text) => {
                    if write_tx.send(text).is_err() {
                        break;
                    }
                },
                Err(err) => {
                    warn!(%err, "failed to serialize outbound chunk");
                    break;
                },
            }
        }

        match relay.await {
            Ok(Ok(_outcome)) => {},
            Ok(Err(err)) => {
                let _ = write_tx.send(serde_json::to_string(&ErrorFrame::new(err.token().to_string())).unwrap_or_default());
            },
            Err(err) => {
                warn!(%err, "dispatch task panicked");
            },
        }
    })
}
