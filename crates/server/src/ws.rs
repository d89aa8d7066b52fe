use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use shared::{domain::ClientId, protocol::ClientMessage};
use tokio::sync::watch;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use crate::app_state::{AppState, Published};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, ClientId(client_id)))
}

/// One socket = one subscription slot. Only the client's own notifications
/// tagged with the currently subscribed path are forwarded; before the first
/// `subscribe` nothing is. A socket that falls behind the broadcast is
/// closed so its client reconnects and re-fetches.
async fn ws_connection(state: Arc<AppState>, socket: WebSocket, client_id: ClientId) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.events.subscribe());
    let (path_tx, path_rx) = watch::channel::<Option<String>>(None);
    info!(%client_id, "ws: client connected");

    let send_client_id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let Published {
                owner,
                notification,
            } = match event {
                Ok(published) => published,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(client_id = %send_client_id, skipped, "ws: subscriber lagged, closing socket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if owner != send_client_id || path_rx.borrow().as_deref() != Some(notification.path()) {
                continue;
            }
            let text = match notification.to_frame() {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "ws: failed to encode notification");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_client_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { path }) => {
                        info!(client_id = %recv_client_id, %path, "ws: subscription updated");
                        path_tx.send_replace(Some(path));
                    }
                    Err(err) => {
                        warn!(client_id = %recv_client_id, %err, "ws: ignoring unparseable client frame");
                    }
                },
                Message::Close(_) => break,
                _ => debug!(client_id = %recv_client_id, "ws: ignoring non-text frame"),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!(%client_id, "ws: client disconnected");
}
