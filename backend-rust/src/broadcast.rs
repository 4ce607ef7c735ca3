//! # broadcast
//!
//! Subscriber registry for result envelopes. Each WebSocket client owns
//! one unbounded channel; a broadcast serializes the payload once,
//! iterates a snapshot of the senders, and prunes whichever ones failed
//! afterwards. Per-subscriber ordering is FIFO by construction.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::debug;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; returns its id and the receiving end.
    pub async fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.push(Subscriber { id, tx });
        debug!("broadcast: subscriber {id} connected");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.retain(|s| s.id != id);
        debug!("broadcast: subscriber {id} disconnected");
    }

    pub async fn count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Send one payload to every subscriber. Dead subscribers are
    /// collected during the send pass and removed afterwards.
    pub async fn broadcast(&self, payload: &serde_json::Value) {
        let text = payload.to_string();
        let failed: Vec<u64> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .filter(|s| s.tx.send(text.clone()).is_err())
                .map(|s| s.id)
                .collect()
        };
        if !failed.is_empty() {
            debug!("broadcast: removing {} dead subscriber(s)", failed.len());
            self.subscribers
                .write()
                .await
                .retain(|s| !failed.contains(&s.id));
        }
    }
}
