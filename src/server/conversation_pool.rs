//! Conversation pool — live conversations keyed by context ID.
//!
//! The pool owns conversation lifecycles: it opens one via the injected
//! [`ConversationOpener`] the first time a context ID is seen, hands out
//! shared references after that, and closes conversations when they idle
//! out or the server shuts down. Every acquisition refreshes the entry's
//! last-use time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::conversation::{Conversation, ConversationOpener};
use crate::error::{A2AError, A2AResult};

struct PoolEntry {
    conversation: Arc<dyn Conversation>,
    last_use: DateTime<Utc>,
}

/// Pool of live conversations, keyed by context ID.
pub struct ConversationPool {
    opener: Arc<dyn ConversationOpener>,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl ConversationPool {
    /// Create a pool that opens conversations with `opener`.
    pub fn new(opener: Arc<dyn ConversationOpener>) -> Self {
        Self {
            opener,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the conversation for `context_id`, opening one if absent.
    ///
    /// The pool lock is held across the opener call, so concurrent
    /// acquisitions of the same key open at most one conversation. Both
    /// hits and misses refresh the entry's last-use time.
    pub async fn acquire(&self, context_id: &str) -> A2AResult<Arc<dyn Conversation>> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(context_id) {
            entry.last_use = Utc::now();
            debug!(context_id = %context_id, "Conversation reused");
            return Ok(Arc::clone(&entry.conversation));
        }

        let conversation = self.opener.open(context_id).await?;
        entries.insert(
            context_id.to_string(),
            PoolEntry {
                conversation: Arc::clone(&conversation),
                last_use: Utc::now(),
            },
        );

        debug!(context_id = %context_id, "Conversation opened");
        Ok(conversation)
    }

    /// Close and remove every conversation whose last use is older than
    /// `cutoff`.
    pub async fn evict_idle(&self, cutoff: DateTime<Utc>) {
        let idle: Vec<(String, Arc<dyn Conversation>)> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.last_use < cutoff)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    entries
                        .remove(&key)
                        .map(|entry| (key, entry.conversation))
                })
                .collect()
        };

        // Close outside the lock; close may take arbitrarily long.
        for (context_id, conversation) in idle {
            if let Err(e) = conversation.close().await {
                warn!(context_id = %context_id, error = %e, "Failed to close idle conversation");
            } else {
                debug!(context_id = %context_id, "Idle conversation closed");
            }
        }
    }

    /// Close every conversation and clear the pool. Returns the first
    /// close error encountered, if any.
    pub async fn close_all(&self) -> A2AResult<()> {
        let drained: Vec<(String, Arc<dyn Conversation>)> = {
            let mut entries = self.entries.lock().await;
            entries
                .drain()
                .map(|(key, entry)| (key, entry.conversation))
                .collect()
        };

        let mut first_error: Option<A2AError> = None;
        for (context_id, conversation) in drained {
            if let Err(e) = conversation.close().await {
                warn!(context_id = %context_id, error = %e, "Failed to close conversation");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of live conversations.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the pool has no live conversations.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The last-use time recorded for a context, if it is pooled.
    pub async fn last_use(&self, context_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .await
            .get(context_id)
            .map(|entry| entry.last_use)
    }
}
