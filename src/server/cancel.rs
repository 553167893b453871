//! Cancel registry — cancellation handles for in-flight runners.
//!
//! Each runner registers a [`CancellationToken`] under its task ID when it
//! starts and removes it when it finishes. `tasks/cancel` and shutdown
//! fire the token, which aborts the conversation turn and unwinds the
//! runner.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Map from task ID to the running task's cancellation token.
pub struct CancelRegistry {
    inner: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a task's cancellation token.
    pub fn register(&self, task_id: &str, token: CancellationToken) {
        let mut inner = self.inner.lock().expect("cancel registry lock poisoned");
        inner.insert(task_id.to_string(), token);
    }

    /// Remove a task's token without firing it. Idempotent.
    pub fn remove(&self, task_id: &str) {
        let mut inner = self.inner.lock().expect("cancel registry lock poisoned");
        inner.remove(task_id);
    }

    /// Fire and remove the token for a task. Returns whether a token was
    /// registered.
    pub fn cancel(&self, task_id: &str) -> bool {
        let token = {
            let mut inner = self.inner.lock().expect("cancel registry lock poisoned");
            inner.remove(task_id)
        };
        match token {
            Some(token) => {
                token.cancel();
                debug!(task_id = %task_id, "Runner cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Fire every registered token and clear the registry. Used at
    /// shutdown.
    pub fn cancel_all(&self) {
        let tokens: Vec<CancellationToken> = {
            let mut inner = self.inner.lock().expect("cancel registry lock poisoned");
            inner.drain().map(|(_, token)| token).collect()
        };
        let count = tokens.len();
        for token in tokens {
            token.cancel();
        }
        if count > 0 {
            debug!(count, "All in-flight runners cancelled");
        }
    }

    /// Number of registered tokens.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("cancel registry lock poisoned")
            .len()
    }

    /// Whether no tokens are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
