use std::sync::Arc;

use tokio::sync::broadcast;

use cascade_core::events::SequenceEvent;

use crate::client::ClientRegistry;

/// Subscribes to the sequencer's event broadcast and forwards each
/// event to the WebSocket clients bound to its session.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn start(&self, mut rx: broadcast::Receiver<SequenceEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let session_id = event.session_id().clone();
                        match serde_json::to_string(&event) {
                            Ok(json) => registry.broadcast_to_session(&session_id, &json),
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize event")
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create an event bridge wired to a broadcast channel.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<SequenceEvent>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}
