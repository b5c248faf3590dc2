//! WebSocket lifecycle driver.
//!
//! Accepts the upgrade, registers the socket with the connection registry
//! and feeds connect / message / disconnect events to the coordinator. The
//! first text frame starts the relay; the coordinator closes the
//! connection when it ends.

use crate::models::RelayOutcome;
use crate::startup::AppState;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap},
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

pub async fn relay_socket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let credential = credential_from(&headers);

    // Browsers refuse the handshake unless one offered subprotocol is selected.
    let ws = match &credential {
        Some(credential) => ws.protocols([credential.clone()]),
        None => ws,
    };

    ws.on_upgrade(move |socket| serve_connection(socket, state, credential))
}

/// First value of `Sec-WebSocket-Protocol`.
fn credential_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SEC_WEBSOCKET_PROTOCOL)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

async fn serve_connection(socket: WebSocket, state: AppState, credential: Option<String>) {
    let connection_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("connection", connection_id = %connection_id);

    async move {
        let outbound = state.registry.register(&connection_id);
        let (sink, mut inbound) = socket.split();
        let mut writer = tokio::spawn(write_frames(sink, outbound).in_current_span());

        if state
            .coordinator
            .on_connect(&connection_id, credential.as_deref())
            .await
            .is_err()
        {
            let _ = writer.await;
            return;
        }

        let mut relay: Option<JoinHandle<RelayOutcome>> = None;

        loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if relay.is_some() {
                            tracing::debug!("Ignoring frame received while a relay is running");
                            continue;
                        }
                        let coordinator = state.coordinator.clone();
                        let id = connection_id.clone();
                        relay = Some(tokio::spawn(
                            async move { coordinator.on_message(&id, &text).await }
                                .in_current_span(),
                        ));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket read failed");
                        break;
                    }
                },
                // The writer ends once the coordinator has closed the connection.
                _ = &mut writer => break,
            }
        }

        state.coordinator.on_disconnect(&connection_id).await;

        if let Some(relay) = relay {
            if let Err(e) = relay.await {
                tracing::error!(error = %e, "Relay task failed");
            }
        }
        if !writer.is_finished() {
            let _ = writer.await;
        }
    }
    .instrument(span)
    .await
}

/// Drain the connection's outbound queue into the socket, then send a
/// close frame once the queue's sender is dropped.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(payload) = outbound.recv().await {
        let message = match String::from_utf8(payload) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };

        if let Err(e) = sink.send(message).await {
            tracing::debug!(error = %e, "WebSocket write failed");
            return;
        }
    }

    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::from("relay finished"),
        })))
        .await;
}
