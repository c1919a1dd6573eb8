//! WebSocket transport for live subscribers.
//!
//! Each socket is split into a writer task that drains a bounded outbound
//! channel and a reader loop that feeds inbound frames to the hub. The
//! registry holds the only [`WsSubscriber`], so once the hub drops it the
//! channel closes and the writer closes the socket.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use tilecast_core::DeliveryError;
use tilecast_live::{Subscriber, SubscriberId};

use crate::state::AppState;

/// Subscriber handle for one WebSocket connection.
pub struct WsSubscriber {
    id: SubscriberId,
    outbound: mpsc::Sender<String>,
}

impl WsSubscriber {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
        }
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits while the outbound buffer is full; the hub's send timeout
    /// bounds that wait.
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        self.outbound
            .send(text.to_string())
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.config.live.outbound_buffer.max(1));

    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let subscriber = Arc::new(WsSubscriber::new(tx));
    let id = subscriber.id();
    if let Err(e) = state.hub.connect(subscriber).await {
        debug!(subscriber = %id, error = %e, "initial snapshot failed");
        writer.abort();
        return;
    }

    let hub = state.hub.clone();
    let reader = async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => hub.handle_inbound(id, text.as_str()).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(subscriber = %id, error = %e, "websocket read failed");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }

    state.hub.disconnect(id);
    writer.abort();
    info!(subscriber = %id, "websocket closed");
}
