//! Server runtime — configuration, the eviction loop, and shutdown.
//!
//! [`A2AServer`] ties the five core components together behind a builder
//! carrying every recognized knob. A single background loop ticks once a
//! minute and sweeps all three stateful components (expired terminal
//! tasks, closed broadcasters, idle conversations); one shared
//! cancellation token stops the acceptor and the loop together.
//!
//! Shutdown ordering: stop accepting work and stop the eviction loop,
//! drain the HTTP server, close every broadcaster (subscribers exit),
//! cancel every in-flight runner, close every conversation. The first
//! conversation close error is returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::conversation::ConversationOpener;
use crate::error::{A2AError, A2AResult};

use super::axum_integration::{
    a2a_router, AppState, Authenticator, CardProvider, IdGenerator, RandomIdGenerator, StaticCard,
};
use super::broadcast::BroadcastRegistry;
use super::cancel::CancelRegistry;
use super::conversation_pool::ConversationPool;
use super::runner::TaskRunner;
use super::task_store::{InMemoryTaskStore, TaskStore};

/// Interval between eviction sweeps.
pub const EVICTION_TICK: Duration = Duration::from_secs(60);

/// Default listen port.
pub const DEFAULT_PORT: u16 = 7420;

/// Default request read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default response write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default keep-alive idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default request body limit: 10 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Default TTL for terminal tasks and idle conversations.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Builder for [`A2AServer`]. Every knob has a default; only the
/// conversation opener is required.
pub struct ServerBuilder {
    opener: Arc<dyn ConversationOpener>,
    card: Option<Arc<dyn CardProvider>>,
    task_store: Option<Arc<dyn TaskStore>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
    port: u16,
    read_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
    max_body_size: usize,
    task_ttl: Duration,
    conversation_ttl: Duration,
}

impl ServerBuilder {
    /// Start a builder around the given conversation opener.
    pub fn new(opener: Arc<dyn ConversationOpener>) -> Self {
        Self {
            opener,
            card: None,
            task_store: None,
            authenticator: None,
            id_generator: None,
            port: DEFAULT_PORT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            task_ttl: DEFAULT_TTL,
            conversation_ttl: DEFAULT_TTL,
        }
    }

    /// Serve a static agent card.
    pub fn card(mut self, card: serde_json::Value) -> Self {
        self.card = Some(Arc::new(StaticCard(card)));
        self
    }

    /// Serve a dynamic agent card.
    pub fn card_provider(mut self, provider: Arc<dyn CardProvider>) -> Self {
        self.card = Some(provider);
        self
    }

    /// Override the task store.
    pub fn task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.task_store = Some(store);
        self
    }

    /// Install a pre-decode authenticator.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Override the task/context ID generator.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(ids);
        self
    }

    /// Listen port for [`A2AServer::serve`].
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bound on reading a request body.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Bound on each streaming write to an SSE client.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Keep-alive idle bound; SSE pings are paced off this.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Request body byte limit.
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// TTL for terminal tasks. Zero disables eviction.
    pub fn task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl = ttl;
        self
    }

    /// TTL for idle conversations. Zero disables eviction.
    pub fn conversation_ttl(mut self, ttl: Duration) -> Self {
        self.conversation_ttl = ttl;
        self
    }

    /// Assemble the server.
    pub fn build(self) -> A2AServer {
        let store = self
            .task_store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let broadcasts = Arc::new(BroadcastRegistry::new());
        let cancels = Arc::new(CancelRegistry::new());
        let pool = Arc::new(ConversationPool::new(self.opener));
        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&store),
            Arc::clone(&broadcasts),
            Arc::clone(&cancels),
            self.write_timeout,
        ));

        let state = Arc::new(AppState {
            store,
            pool,
            broadcasts,
            cancels,
            runner,
            card: self.card,
            authenticator: self.authenticator,
            ids: self
                .id_generator
                .unwrap_or_else(|| Arc::new(RandomIdGenerator)),
            max_body_size: self.max_body_size,
            read_timeout: self.read_timeout,
            // Ping quiet SSE streams well inside the idle window so
            // intermediaries don't reap them.
            sse_keep_alive: self.idle_timeout / 8,
        });

        A2AServer {
            state,
            port: self.port,
            task_ttl: self.task_ttl,
            conversation_ttl: self.conversation_ttl,
            shutdown: CancellationToken::new(),
        }
    }
}

/// The A2A host server.
pub struct A2AServer {
    state: Arc<AppState>,
    port: u16,
    task_ttl: Duration,
    conversation_ttl: Duration,
    shutdown: CancellationToken,
}

impl A2AServer {
    /// Start a [`ServerBuilder`] around the given opener.
    pub fn builder(opener: Arc<dyn ConversationOpener>) -> ServerBuilder {
        ServerBuilder::new(opener)
    }

    /// The axum router, for embedding in an existing application. The
    /// embedder is then responsible for calling [`close`](Self::close) at
    /// shutdown; the eviction loop must be started with
    /// [`spawn_eviction_loop`](Self::spawn_eviction_loop) if wanted.
    pub fn router(&self) -> axum::Router {
        a2a_router(Arc::clone(&self.state))
    }

    /// Shared access to the server components, mainly for tests.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Bind the bundled listener and serve until [`shutdown`](Self::shutdown)
    /// is called, then drain and tear everything down.
    pub async fn serve(&self) -> A2AResult<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| A2AError::server(format!("Failed to bind port {}: {}", self.port, e)))?;
        info!(port = self.port, "A2A server listening");

        let eviction = self.spawn_eviction_loop();
        let drained = self.shutdown.clone();

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { drained.cancelled().await })
            .await;

        eviction.abort();
        let closed = self.close().await;

        served.map_err(|e| A2AError::server(format!("Server error: {}", e)))?;
        closed
    }

    /// Signal the server to stop accepting work. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Tear down the components: close every broadcaster so subscribers
    /// exit, cancel every in-flight runner, close every conversation.
    /// Returns the first conversation close error.
    pub async fn close(&self) -> A2AResult<()> {
        self.shutdown.cancel();
        self.state.broadcasts.close_all();
        self.state.cancels.cancel_all();
        self.state.pool.close_all().await
    }

    /// Start the background sweep of tasks, broadcasters, and
    /// conversations. The loop stops when the server shuts down.
    pub fn spawn_eviction_loop(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.state.store);
        let broadcasts = Arc::clone(&self.state.broadcasts);
        let pool = Arc::clone(&self.state.pool);
        let task_ttl = self.task_ttl;
        let conversation_ttl = self.conversation_ttl;
        let stop = self.shutdown.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(EVICTION_TICK);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tick.tick() => {
                        let now = Utc::now();

                        if let Some(ttl) = nonzero_chrono(task_ttl) {
                            match store.evict_terminal(now - ttl).await {
                                Ok(evicted) if !evicted.is_empty() => {
                                    debug!(count = evicted.len(), "Task eviction sweep");
                                }
                                Ok(_) => {}
                                Err(e) => debug!(error = %e, "Task eviction sweep failed"),
                            }
                        }

                        let removed = broadcasts.evict_closed();
                        if removed > 0 {
                            debug!(count = removed, "Broadcaster eviction sweep");
                        }

                        if let Some(ttl) = nonzero_chrono(conversation_ttl) {
                            pool.evict_idle(now - ttl).await;
                        }
                    }
                }
            }
        })
    }
}

/// A TTL as a chrono duration, or `None` when zero (eviction disabled).
fn nonzero_chrono(ttl: Duration) -> Option<chrono::Duration> {
    if ttl.is_zero() {
        return None;
    }
    chrono::Duration::from_std(ttl).ok()
}
