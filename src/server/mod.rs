//! A2A server core — the components behind the JSON-RPC endpoint.
//!
//! - [`TaskStore`] trait + [`InMemoryTaskStore`] — task records with an
//!   enforced state machine and TTL eviction
//! - [`Broadcaster`] + [`BroadcastRegistry`] — per-task SSE fan-out
//! - [`ConversationPool`] — live conversations keyed by context ID
//! - [`CancelRegistry`] — cancellation handles for in-flight runners
//! - [`TaskRunner`] — drives one conversation turn per task
//! - [`a2a_router`] — axum routes and JSON-RPC dispatch
//! - [`A2AServer`] + [`ServerBuilder`] — configuration, eviction loop,
//!   graceful shutdown
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use a2a_host::server::A2AServer;
//!
//! let server = A2AServer::builder(opener)
//!     .card(serde_json::json!({"name": "My Agent"}))
//!     .port(7420)
//!     .build();
//!
//! // Runs until server.shutdown() is called from elsewhere.
//! server.serve().await?;
//! ```

pub mod axum_integration;
pub mod broadcast;
pub mod cancel;
pub mod conversation_pool;
pub mod runner;
pub mod runtime;
pub mod task_store;

pub use axum_integration::{
    a2a_router, AppState, Authenticator, CardProvider, IdGenerator, RandomIdGenerator, StaticCard,
    SETTLE_WAIT,
};
pub use broadcast::{BroadcastRegistry, Broadcaster, Subscription, SUBSCRIBER_BUFFER};
pub use cancel::CancelRegistry;
pub use conversation_pool::ConversationPool;
pub use runner::TaskRunner;
pub use runtime::{A2AServer, ServerBuilder, DEFAULT_MAX_BODY_SIZE, DEFAULT_TTL, EVICTION_TICK};
pub use task_store::{InMemoryTaskStore, TaskStore, DEFAULT_LIST_LIMIT};
