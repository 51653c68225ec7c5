use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::broadcaster::{BroadcastEvent, ChannelBroadcaster};

/// Relays broadcast events to connected WebSocket clients.
/// This is purely a transport concern - no session logic here
#[derive(Clone)]
pub struct WebSocketService {
    broadcaster: Arc<ChannelBroadcaster>,
    // Track active connections
    active_connections: Arc<RwLock<HashSet<String>>>,
}

impl WebSocketService {
    pub fn new(broadcaster: Arc<ChannelBroadcaster>) -> Self {
        Self {
            broadcaster,
            active_connections: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Handle a new WebSocket connection until either side goes away
    pub async fn handle_connection(&self, socket: WebSocket) {
        let connection_id = format!("conn_{}", uuid::Uuid::new_v4());
        log::info!("🔌 WebSocket connected: {}", connection_id);

        self.add_connection(&connection_id).await;

        // Split socket for concurrent read/write
        let (mut sender, mut receiver) = socket.split();

        // Subscribe before greeting so nothing broadcast afterwards is missed
        let mut updates = BroadcastStream::new(self.broadcaster.subscribe());

        let greeting = BroadcastEvent {
            event: "greeting".to_string(),
            payload: json!({
                "message": "Connected to casino game server",
                "connection": connection_id,
            }),
        };

        if let Err(e) = Self::send_event(&mut sender, &greeting).await {
            log::error!("❌ Failed to send greeting to {}: {}", connection_id, e);
            self.remove_connection(&connection_id).await;
            return;
        }

        // Task to forward broadcast events to this client
        let connection_id_for_updates = connection_id.clone();
        let mut update_task = tokio::spawn(async move {
            while let Some(item) = updates.next().await {
                match item {
                    Ok(event) => {
                        if let Err(e) = Self::send_event(&mut sender, &event).await {
                            log::debug!(
                                "Failed to send '{}' to connection {}: {}",
                                event.event,
                                connection_id_for_updates,
                                e
                            );
                            break; // Client disconnected
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        log::warn!(
                            "Connection {} fell behind, skipped {} events",
                            connection_id_for_updates,
                            skipped
                        );
                    }
                }
            }
        });

        // Task to drain incoming frames; clients talk to us over HTTP
        let connection_id_for_messages = connection_id.clone();
        let mut message_task = tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                match message {
                    Message::Text(text) => {
                        log::debug!(
                            "Ignoring text frame from {}: {}",
                            connection_id_for_messages,
                            text.as_str()
                        );
                    }
                    Message::Close(_) => {
                        log::info!("WebSocket connection {} closed", connection_id_for_messages);
                        break;
                    }
                    _ => {
                        // Ping/pong are answered by axum
                    }
                }
            }
        });

        // Wait for either task to complete (client disconnect or error)
        tokio::select! {
            _ = &mut update_task => {
                message_task.abort();
            }
            _ = &mut message_task => {
                update_task.abort();
            }
        }

        self.remove_connection(&connection_id).await;
        log::info!("WebSocket connection {} terminated", connection_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.active_connections.read().await.len()
    }

    async fn add_connection(&self, connection_id: &str) {
        let mut connections = self.active_connections.write().await;
        connections.insert(connection_id.to_string());
    }

    async fn remove_connection(&self, connection_id: &str) {
        let mut connections = self.active_connections.write().await;
        connections.remove(connection_id);
        log::debug!("{} WebSocket connections remain", connections.len());
    }

    async fn send_event(
        sender: &mut SplitSink<WebSocket, Message>,
        event: &BroadcastEvent,
    ) -> Result<(), axum::Error> {
        let json = serde_json::to_string(event).map_err(axum::Error::new)?;

        sender.send(Message::Text(json.into())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_tracking() {
        let service = WebSocketService::new(Arc::new(ChannelBroadcaster::new(8)));
        assert_eq!(service.connection_count().await, 0);

        service.add_connection("conn_a").await;
        service.add_connection("conn_b").await;
        assert_eq!(service.connection_count().await, 2);

        service.remove_connection("conn_a").await;
        service.remove_connection("conn_missing").await;
        assert_eq!(service.connection_count().await, 1);
    }
}
