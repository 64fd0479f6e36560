use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::broker::BrokerInstance;
use crate::connection::ConnectionId;
use crate::handlers::InstanceState;

/// Upgrade handler for `GET /ws`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<InstanceState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broker))
}

/// Runs the broker's disconnect cleanup when the connection task ends,
/// however it ends.
struct ConnectionGuard {
    broker: Arc<BrokerInstance>,
    connection_id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.broker.disconnect(self.connection_id);
    }
}

async fn handle_socket(socket: WebSocket, broker: Arc<BrokerInstance>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (connection_id, mut rx) = broker.connect();
    let guard = ConnectionGuard {
        broker: broker.clone(),
        connection_id,
    };

    info!(
        instance = %broker.name(),
        connection_id = %connection_id,
        "websocket connected"
    );

    // The queue closes once the registry drops this connection's sender.
    let writer_instance = broker.name().to_string();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to encode outbound message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
        debug!(
            instance = %writer_instance,
            connection_id = %connection_id,
            "writer task finished"
        );
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => broker.handle_frame(connection_id, &text),
            Ok(Message::Binary(bytes)) => {
                broker.handle_frame(connection_id, &String::from_utf8_lossy(&bytes))
            }
            Ok(Message::Close(frame)) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    drop(guard);
    let _ = writer.await;
    info!(
        instance = %broker.name(),
        connection_id = %connection_id,
        "websocket disconnected"
    );
}
