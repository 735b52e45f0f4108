use crate::{hub::ConnectionHub, server::SharedState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

pub async fn ws_handler(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Drives one client connection until it closes.
///
/// Outbound events are written by a dedicated task so that inference results
/// never wait on the inbound read loop.
pub async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut events) = hub.connect();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(%session, "Failed to serialize event: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                tracing::debug!(%session, "WebSocket send error: {}", e);
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => hub.handle_text(session, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%session, "WebSocket receive error: {}", e);
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }

    hub.disconnect(session);
    send_task.abort();
}
