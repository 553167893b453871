//! # a2a-host — serve a conversational agent over the A2A protocol
//!
//! This crate hosts an opaque conversational agent behind a JSON-RPC 2.0
//! HTTP endpoint with Server-Sent-Events streaming. You supply the agent
//! through two narrow traits; the host supplies everything around it:
//! task lifecycle tracking, cancellation, streaming fan-out to late
//! subscribers, and time-based garbage collection of idle state.
//!
//! ## What the host provides
//!
//! - `POST /a2a` — `message/send`, `message/stream`, `tasks/get`,
//!   `tasks/list`, `tasks/cancel`, `tasks/subscribe`
//! - `GET /.well-known/agent.json` — agent card discovery
//! - A task state machine (`submitted → working → terminal`) with enforced
//!   transitions and monotone status timestamps
//! - Per-task broadcast of streaming events, so `tasks/subscribe` can
//!   attach to a turn that is already in flight
//! - Cancellation wiring from `tasks/cancel` down to the conversation
//! - A background eviction loop for expired tasks, closed broadcasters,
//!   and idle conversations
//! - Graceful shutdown that drains HTTP, cancels in-flight work, and
//!   closes every conversation
//!
//! ## What you provide
//!
//! Implement [`conversation::Conversation`] (and optionally
//! [`conversation::StreamingConversation`]) plus a
//! [`conversation::ConversationOpener`] that creates one per context ID:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use a2a_host::conversation::{
//!     Conversation, ConversationOpener, SendOutcome,
//! };
//! use a2a_host::content::ContentPart;
//! use a2a_host::error::A2AResult;
//! use a2a_host::server::A2AServer;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct EchoConversation;
//!
//! #[async_trait]
//! impl Conversation for EchoConversation {
//!     async fn send(
//!         &self,
//!         _cancel: CancellationToken,
//!         parts: Vec<ContentPart>,
//!     ) -> A2AResult<SendOutcome> {
//!         let text = parts
//!             .iter()
//!             .filter_map(|p| match p {
//!                 ContentPart::Text { text } => Some(text.as_str()),
//!                 _ => None,
//!             })
//!             .collect::<Vec<_>>()
//!             .join("\n");
//!         Ok(SendOutcome {
//!             has_pending_tools: false,
//!             parts: vec![ContentPart::text(format!("Echo: {}", text))],
//!             text: String::new(),
//!         })
//!     }
//!
//!     async fn close(&self) -> A2AResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! struct EchoOpener;
//!
//! #[async_trait]
//! impl ConversationOpener for EchoOpener {
//!     async fn open(&self, _context_id: &str) -> A2AResult<Arc<dyn Conversation>> {
//!         Ok(Arc::new(EchoConversation))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> A2AResult<()> {
//!     let server = A2AServer::builder(Arc::new(EchoOpener))
//!         .card(serde_json::json!({"name": "Echo Agent"}))
//!         .build();
//!     server.serve().await
//! }
//! ```
//!
//! ## Architecture
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Task store | [`server::task_store`] | Lifecycle state machine + eviction |
//! | Broadcast registry | [`server::broadcast`] | Per-task SSE fan-out |
//! | Conversation pool | [`server::conversation_pool`] | Context → conversation, idle close |
//! | Task runner | [`server::runner`] | Drives one turn, translates events |
//! | Dispatcher | [`server::axum_integration`] | JSON-RPC routing + SSE shaping |
//! | Runtime | [`server::runtime`] | Config, eviction loop, shutdown |
//!
//! The wire model lives in [`types`]; the internal content model and the
//! codec between the two live in [`content`].

pub mod content;
pub mod conversation;
pub mod error;
pub mod server;
pub mod types;

/// Re-exports of the types most integrations need.
pub mod prelude {
    pub use crate::content::{ContentPart, ContentType, MediaContent, MediaSource};
    pub use crate::conversation::{
        Conversation, ConversationEvent, ConversationOpener, SendOutcome, StreamingConversation,
    };
    pub use crate::error::{A2AError, A2AResult};
    pub use crate::server::{A2AServer, InMemoryTaskStore, ServerBuilder, TaskStore};
    pub use crate::types::{
        Artifact, Message, Part, Role, StreamPayload, Task, TaskArtifactUpdateEvent, TaskState,
        TaskStatus, TaskStatusUpdateEvent,
    };
}

pub use error::{A2AError, A2AResult};
