//! Observer WebSocket handler.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::http::responses::{ClientMessage, PongMessage};
use crate::hub::{BroadcastHub, HubFrame, ObserverId};
use crate::state::AppState;

/// Upgrade to an observer connection.
pub async fn observer_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer(socket, state.hub.clone()))
}

async fn handle_observer(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut frames) = hub.register().await;

    // Writer: drains the hub queue. Ends when the hub drops the observer.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let msg = match frame {
                HubFrame::Text(text) => Message::Text(text.to_string()),
                HubFrame::Ping => Message::Ping(Vec::new()),
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        sender.close().await.ok();
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_client_message(&hub, id, &text).await,
            Ok(Message::Pong(_)) => hub.record_pong(id).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(observer_id = id, error = %e, "Observer socket error");
                break;
            }
        }
    }

    hub.unregister(id).await;
    send_task.abort();
}

/// Apply one message from an observer.
pub(crate) async fn handle_client_message(hub: &BroadcastHub, id: ObserverId, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(observer_id = id, error = %e, "Ignoring unrecognized observer message");
            return;
        }
    };

    match message {
        ClientMessage::SubscribeTask { task_id } => {
            hub.subscribe(id, task_id).await;
        }
        ClientMessage::UnsubscribeTask { task_id } => {
            hub.unsubscribe(id, &task_id).await;
        }
        ClientMessage::Ping => {
            hub.record_pong(id).await;
            match serde_json::to_string(&PongMessage::now()) {
                Ok(pong) => {
                    hub.send_to(id, HubFrame::Text(pong.into())).await;
                }
                Err(e) => warn!(error = %e, "Failed to serialize pong"),
            }
        }
    }
}
