//! Shared test utilities: mock conversations, openers, a server harness,
//! and SSE parsing helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use a2a_host::content::{ContentPart, MediaContent};
use a2a_host::conversation::{
    Conversation, ConversationEvent, ConversationOpener, SendOutcome, StreamingConversation,
};
use a2a_host::error::{A2AError, A2AResult};
use a2a_host::server::A2AServer;

/// Extract the joined text content of a turn's parts.
pub fn text_of(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---- Mock conversations ----

/// Replies `Echo: <text>` as a single text part.
pub struct EchoConversation;

#[async_trait]
impl Conversation for EchoConversation {
    async fn send(
        &self,
        _cancel: CancellationToken,
        parts: Vec<ContentPart>,
    ) -> A2AResult<SendOutcome> {
        Ok(SendOutcome {
            has_pending_tools: false,
            parts: vec![ContentPart::text(format!("Echo: {}", text_of(&parts)))],
            text: String::new(),
        })
    }

    async fn close(&self) -> A2AResult<()> {
        Ok(())
    }
}

/// Sleeps before answering, to exercise the non-blocking settle window.
pub struct SlowConversation {
    pub delay: Duration,
}

#[async_trait]
impl Conversation for SlowConversation {
    async fn send(
        &self,
        _cancel: CancellationToken,
        _parts: Vec<ContentPart>,
    ) -> A2AResult<SendOutcome> {
        tokio::time::sleep(self.delay).await;
        Ok(SendOutcome {
            has_pending_tools: false,
            parts: vec![ContentPart::text("late reply")],
            text: String::new(),
        })
    }

    async fn close(&self) -> A2AResult<()> {
        Ok(())
    }
}

/// Blocks until its cancellation token fires, then reports failure.
pub struct HangingConversation;

#[async_trait]
impl Conversation for HangingConversation {
    async fn send(
        &self,
        cancel: CancellationToken,
        _parts: Vec<ContentPart>,
    ) -> A2AResult<SendOutcome> {
        cancel.cancelled().await;
        Err(A2AError::Conversation("turn aborted".to_string()))
    }

    async fn close(&self) -> A2AResult<()> {
        Ok(())
    }
}

/// Always fails.
pub struct FailingConversation;

#[async_trait]
impl Conversation for FailingConversation {
    async fn send(
        &self,
        _cancel: CancellationToken,
        _parts: Vec<ContentPart>,
    ) -> A2AResult<SendOutcome> {
        Err(A2AError::Conversation("model unavailable".to_string()))
    }

    async fn close(&self) -> A2AResult<()> {
        Ok(())
    }
}

/// Reports pending tool calls, with no output parts.
pub struct PendingToolsConversation;

#[async_trait]
impl Conversation for PendingToolsConversation {
    async fn send(
        &self,
        _cancel: CancellationToken,
        _parts: Vec<ContentPart>,
    ) -> A2AResult<SendOutcome> {
        Ok(SendOutcome {
            has_pending_tools: true,
            parts: Vec::new(),
            text: String::new(),
        })
    }

    async fn close(&self) -> A2AResult<()> {
        Ok(())
    }
}

/// Returns no parts but a plain-text fallback.
pub struct TextFallbackConversation {
    pub text: String,
}

#[async_trait]
impl Conversation for TextFallbackConversation {
    async fn send(
        &self,
        _cancel: CancellationToken,
        _parts: Vec<ContentPart>,
    ) -> A2AResult<SendOutcome> {
        Ok(SendOutcome {
            has_pending_tools: false,
            parts: Vec::new(),
            text: self.text.clone(),
        })
    }

    async fn close(&self) -> A2AResult<()> {
        Ok(())
    }
}

/// A streaming conversation that plays back a fixed event script.
///
/// When `hold_open` is set, the event channel is kept open after the
/// script (no `Done`, no close) until the turn's cancellation token fires.
pub struct ScriptedConversation {
    pub script: Vec<ConversationEvent>,
    pub hold_open: bool,
}

impl ScriptedConversation {
    pub fn new(script: Vec<ConversationEvent>) -> Self {
        Self {
            script,
            hold_open: false,
        }
    }

    pub fn holding_open(script: Vec<ConversationEvent>) -> Self {
        Self {
            script,
            hold_open: true,
        }
    }
}

#[async_trait]
impl Conversation for ScriptedConversation {
    async fn send(
        &self,
        _cancel: CancellationToken,
        _parts: Vec<ContentPart>,
    ) -> A2AResult<SendOutcome> {
        Ok(SendOutcome::default())
    }

    async fn close(&self) -> A2AResult<()> {
        Ok(())
    }

    fn streaming(&self) -> Option<&dyn StreamingConversation> {
        Some(self)
    }
}

#[async_trait]
impl StreamingConversation for ScriptedConversation {
    async fn stream(
        &self,
        cancel: CancellationToken,
        _parts: Vec<ContentPart>,
    ) -> A2AResult<mpsc::Receiver<ConversationEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let script = self.script.clone();
        let hold_open = self.hold_open;
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if hold_open {
                // Keep the channel open until the turn is cancelled.
                cancel.cancelled().await;
            }
        });
        Ok(rx)
    }
}

// ---- Openers ----

/// Opener that builds a conversation per context from a factory closure
/// and counts how many times it ran.
pub struct TestOpener {
    factory: Box<dyn Fn(&str) -> Arc<dyn Conversation> + Send + Sync>,
    opens: AtomicUsize,
}

impl TestOpener {
    pub fn new<F>(factory: F) -> Arc<Self>
    where
        F: Fn(&str) -> Arc<dyn Conversation> + Send + Sync + 'static,
    {
        Arc::new(Self {
            factory: Box::new(factory),
            opens: AtomicUsize::new(0),
        })
    }

    /// An opener that shares one conversation across all contexts.
    pub fn fixed(conversation: Arc<dyn Conversation>) -> Arc<Self> {
        Self::new(move |_| Arc::clone(&conversation))
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationOpener for TestOpener {
    async fn open(&self, context_id: &str) -> A2AResult<Arc<dyn Conversation>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok((self.factory)(context_id))
    }
}

/// Opener that always fails.
pub struct FailingOpener;

#[async_trait]
impl ConversationOpener for FailingOpener {
    async fn open(&self, _context_id: &str) -> A2AResult<Arc<dyn Conversation>> {
        Err(A2AError::Conversation("backend offline".to_string()))
    }
}

// ---- Server harness ----

/// Serve a built server on an ephemeral port. Returns the base URL.
pub async fn serve(server: A2AServer) -> (String, Arc<A2AServer>) {
    let server = Arc::new(server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server.router();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Brief wait for the acceptor to come up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{}", addr), server)
}

/// Build and serve a default server around the given opener.
pub async fn serve_with_opener(opener: Arc<dyn ConversationOpener>) -> (String, Arc<A2AServer>) {
    let server = A2AServer::builder(opener)
        .card(serde_json::json!({"name": "Test Agent", "version": "0.1.0"}))
        .build();
    serve(server).await
}

// ---- JSON-RPC helpers ----

pub fn jsonrpc_request(
    id: serde_json::Value,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub fn message_send_request(id: i64, text: &str) -> serde_json::Value {
    send_request_with(id, "message/send", text, None, true)
}

/// Build a `message/send` or `message/stream` request.
pub fn send_request_with(
    id: i64,
    method: &str,
    text: &str,
    context_id: Option<&str>,
    blocking: bool,
) -> serde_json::Value {
    let mut message = serde_json::json!({
        "messageId": format!("test-msg-{}", id),
        "role": "user",
        "parts": [{"text": text}]
    });
    if let Some(ctx) = context_id {
        message["contextId"] = serde_json::json!(ctx);
    }
    jsonrpc_request(
        serde_json::json!(id),
        method,
        serde_json::json!({
            "message": message,
            "configuration": {"blocking": blocking}
        }),
    )
}

pub async fn post_rpc(base_url: &str, body: &serde_json::Value) -> serde_json::Value {
    let client = reqwest::Client::new();
    client
        .post(format!("{}/a2a", base_url))
        .json(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

// ---- SSE helpers ----

/// Parse the `data:` payloads out of a raw SSE body, skipping keep-alive
/// comment lines.
pub fn parse_sse_data(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        // A trailing partial line (mid-chunk) parses on a later pass.
        .filter_map(|data| serde_json::from_str(data.trim()).ok())
        .collect()
}

/// The `result` objects of each SSE JSON-RPC envelope.
pub fn sse_results(body: &str) -> Vec<serde_json::Value> {
    parse_sse_data(body)
        .into_iter()
        .map(|envelope| {
            assert_eq!(envelope["jsonrpc"], "2.0");
            envelope["result"].clone()
        })
        .collect()
}

/// Media content wrapping inline base64 data.
pub fn inline_media(bytes: &[u8], mime_type: &str) -> MediaContent {
    use base64::Engine as _;
    MediaContent {
        data: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
        url: None,
        mime_type: Some(mime_type.to_string()),
        filename: None,
    }
}
