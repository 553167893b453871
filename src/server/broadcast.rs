//! Broadcast fabric — per-task fan-out of SSE payloads.
//!
//! Each in-flight streaming task gets one [`Broadcaster`]; late joiners
//! (`tasks/subscribe`) attach to it and receive the events still being
//! produced. Delivery is best-effort: every subscriber has a bounded
//! channel and a full channel loses the payload for that subscriber only,
//! so no client can stall the producer. The direct response writer of the
//! originating request does not go through the broadcaster and keeps the
//! authoritative copy of the stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::StreamPayload;

/// Buffered-channel capacity for each subscriber.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// A subscription to a broadcaster.
///
/// Dropping the receiver does not unsubscribe; callers should pair the
/// `id` with [`Broadcaster::unsubscribe`] when done.
pub struct Subscription {
    /// Identifier for [`Broadcaster::unsubscribe`].
    pub id: u64,

    /// The payload channel. Closed when the broadcaster closes.
    pub rx: mpsc::Receiver<StreamPayload>,
}

struct BroadcasterInner {
    subscribers: Vec<(u64, mpsc::Sender<StreamPayload>)>,
    next_id: u64,
    closed: bool,
}

/// Per-task fan-out of [`StreamPayload`]s to any number of subscribers.
pub struct Broadcaster {
    inner: Mutex<BroadcasterInner>,
}

impl Broadcaster {
    /// Create an open broadcaster with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BroadcasterInner {
                subscribers: Vec::new(),
                next_id: 0,
                closed: false,
            }),
        }
    }

    /// Register a new subscriber.
    ///
    /// If the broadcaster is already closed, the returned channel is
    /// already closed too: the subscriber sees end-of-stream immediately.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");

        let id = inner.next_id;
        inner.next_id += 1;

        if inner.closed {
            // Drop tx so rx reports closed on first recv.
            debug!(subscriber = id, "Subscribe on closed broadcaster");
            return Subscription { id, rx };
        }

        inner.subscribers.push((id, tx));
        debug!(subscriber = id, total = inner.subscribers.len(), "Subscriber added");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Idempotent; unknown IDs are ignored.
    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver a payload to every subscriber without blocking.
    ///
    /// Subscribers whose channel is full lose this payload. Publishing on
    /// a closed broadcaster is a no-op.
    pub fn publish(&self, payload: StreamPayload) {
        let inner = self.inner.lock().expect("broadcaster lock poisoned");
        if inner.closed {
            warn!("Publish on closed broadcaster dropped");
            return;
        }

        for (id, tx) in &inner.subscribers {
            match tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = *id, "Slow subscriber, payload dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = *id, "Subscriber receiver gone");
                }
            }
        }
    }

    /// Close the broadcaster: every subscriber channel is closed exactly
    /// once and the subscriber list is cleared. Idempotent; later
    /// publishes are no-ops.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        if inner.closed {
            return;
        }
        inner.closed = true;
        // Dropping the senders closes each subscriber channel.
        let dropped = inner.subscribers.len();
        inner.subscribers.clear();
        debug!(subscribers = dropped, "Broadcaster closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("broadcaster lock poisoned").closed
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("broadcaster lock poisoned")
            .subscribers
            .len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of broadcasters, keyed by task ID.
pub struct BroadcastRegistry {
    inner: Mutex<HashMap<String, Arc<Broadcaster>>>,
}

impl BroadcastRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Get the broadcaster for a task, creating it if absent.
    pub fn get_or_create(&self, task_id: &str) -> Arc<Broadcaster> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        Arc::clone(
            inner
                .entry(task_id.to_string())
                .or_insert_with(|| Arc::new(Broadcaster::new())),
        )
    }

    /// Get the broadcaster for a task, if one exists.
    pub fn get(&self, task_id: &str) -> Option<Arc<Broadcaster>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.get(task_id).cloned()
    }

    /// Remove a task's broadcaster from the registry. The broadcaster
    /// itself is untouched; live subscriptions keep working until close.
    pub fn remove(&self, task_id: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.remove(task_id);
    }

    /// Drop every entry whose broadcaster is already closed. Called by the
    /// eviction loop.
    pub fn evict_closed(&self) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let before = inner.len();
        inner.retain(|_, b| !b.is_closed());
        before - inner.len()
    }

    /// Close every broadcaster and clear the registry.
    pub fn close_all(&self) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        for broadcaster in inner.values() {
            broadcaster.close();
        }
        inner.clear();
    }

    /// Number of registered broadcasters.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}
