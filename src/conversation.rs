//! The conversation seam — the host's view of the agent engine.
//!
//! The host never talks to a model directly. It drives an opaque
//! [`Conversation`] handle: `send` for request/response turns, and the
//! optional [`StreamingConversation`] extension for incremental output.
//! Implementations are supplied through a [`ConversationOpener`], invoked
//! by the conversation pool the first time a context ID is seen.
//!
//! Cancellation crosses this boundary as a [`CancellationToken`]: the host
//! cancels the token when the task is canceled or the server shuts down,
//! and implementations are expected to honor it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::content::{ContentPart, MediaContent};
use crate::error::A2AResult;

/// The result of a non-streaming conversation turn.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    /// The turn stopped because the agent wants tool results or other
    /// caller input before it can finish.
    pub has_pending_tools: bool,

    /// Structured output parts.
    pub parts: Vec<ContentPart>,

    /// Plain-text rendering of the output. Used as a fallback when `parts`
    /// yields no wire artifact.
    pub text: String,
}

/// One event in a streaming conversation turn.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// A chunk of text output.
    Text(String),

    /// The agent invoked a tool. Opaque; the host suppresses it.
    ToolCall,

    /// A media payload. `None` payloads are skipped.
    Media(Option<MediaContent>),

    /// The turn finished successfully.
    Done,

    /// The turn failed; the string is the error's rendering.
    Error(String),
}

/// An opaque conversation handle.
///
/// The host calls exactly two operations on it: [`send`](Conversation::send)
/// to run a turn, and [`close`](Conversation::close) when the pool evicts
/// the conversation or the server shuts down.
#[async_trait]
pub trait Conversation: Send + Sync {
    /// Run one turn. `cancel` is triggered on task cancellation and
    /// shutdown; implementations should abort promptly when it fires.
    async fn send(
        &self,
        cancel: CancellationToken,
        parts: Vec<ContentPart>,
    ) -> A2AResult<SendOutcome>;

    /// Release any resources held by this conversation.
    async fn close(&self) -> A2AResult<()>;

    /// Capability probe for streaming. Implementations that support
    /// [`StreamingConversation`] return `Some(self)`.
    fn streaming(&self) -> Option<&dyn StreamingConversation> {
        None
    }
}

/// Streaming extension of [`Conversation`].
#[async_trait]
pub trait StreamingConversation: Conversation {
    /// Run one turn, yielding events as they are produced. The returned
    /// channel terminates with [`ConversationEvent::Done`] or
    /// [`ConversationEvent::Error`], or by closing.
    async fn stream(
        &self,
        cancel: CancellationToken,
        parts: Vec<ContentPart>,
    ) -> A2AResult<mpsc::Receiver<ConversationEvent>>;
}

/// Factory for conversations, keyed by context ID.
///
/// The pool calls [`open`](ConversationOpener::open) at most once per live
/// entry; the result is shared by every task in that context until the
/// entry is evicted or the server shuts down.
#[async_trait]
pub trait ConversationOpener: Send + Sync {
    /// Open a conversation for the given context.
    async fn open(&self, context_id: &str) -> A2AResult<Arc<dyn Conversation>>;
}
