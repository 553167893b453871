//! Axum integration — the JSON-RPC dispatch layer.
//!
//! Provides [`a2a_router`], an axum `Router` exposing:
//! - `POST /a2a` — JSON-RPC 2.0 dispatch for all methods
//! - `GET /.well-known/agent.json` — agent card discovery
//!
//! # Supported JSON-RPC methods
//!
//! | Method | Description |
//! |--------|-------------|
//! | `message/send` | Run a turn, return the task snapshot |
//! | `message/stream` | Run a turn with SSE streaming |
//! | `tasks/get` | Retrieve a task by ID |
//! | `tasks/list` | List tasks with pagination |
//! | `tasks/cancel` | Cancel a running task |
//! | `tasks/subscribe` | Attach to an in-flight task's event stream |
//!
//! Request handling order is fixed: authenticate, read the size-limited
//! body, parse the envelope, then dispatch. Runners spawned here outlive
//! the request; they carry the request's tracing span but never its
//! cancellation, so a non-blocking response cannot kill background work.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::request::Parts as RequestParts;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn, Instrument, Span};
use uuid::Uuid;

use crate::content::{self, ContentPart};
use crate::conversation::Conversation;
use crate::error::{self, A2AError, A2AResult};
use crate::types::{
    CancelTaskParams, GetTaskParams, JsonRpcRequest, JsonRpcResponse, ListTasksParams,
    ListTasksResponse, SendMessageParams, StreamPayload, SubscribeTaskParams,
    TaskStatusUpdateEvent,
};

use super::broadcast::{BroadcastRegistry, Broadcaster, SUBSCRIBER_BUFFER};
use super::cancel::CancelRegistry;
use super::conversation_pool::ConversationPool;
use super::runner::TaskRunner;
use super::task_store::TaskStore;

/// How long a non-blocking `message/send` waits for the runner before
/// answering with an in-progress snapshot.
pub const SETTLE_WAIT: Duration = Duration::from_millis(5);

/// Provider of the agent card document. Invoked per request, so the card
/// may be dynamic.
#[async_trait]
pub trait CardProvider: Send + Sync {
    /// The current agent card.
    async fn card(&self) -> Value;
}

/// A fixed agent card.
pub struct StaticCard(pub Value);

#[async_trait]
impl CardProvider for StaticCard {
    async fn card(&self) -> Value {
        self.0.clone()
    }
}

/// Pre-decode request validator. A rejection aborts the request with a
/// `-32000 Authentication failed` envelope.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate the request head. The body has not been read yet.
    async fn authenticate(&self, request: &RequestParts) -> A2AResult<()>;
}

/// Generator for task and context IDs. Injectable so tests can pin IDs;
/// the contract is unique-per-process, nothing stronger.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh ID.
    fn generate(&self) -> String;
}

/// Default generator: 16 random bytes as 32 lowercase hex characters.
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Shared state behind the router: every core component plus the dispatch
/// knobs.
pub struct AppState {
    /// Task persistence.
    pub store: Arc<dyn TaskStore>,
    /// Live conversations keyed by context ID.
    pub pool: Arc<ConversationPool>,
    /// Per-task broadcasters.
    pub broadcasts: Arc<BroadcastRegistry>,
    /// Cancellation handles for in-flight runners.
    pub cancels: Arc<CancelRegistry>,
    /// Turn driver.
    pub runner: Arc<TaskRunner>,
    /// Agent card provider; `None` serves `{}`.
    pub card: Option<Arc<dyn CardProvider>>,
    /// Optional pre-decode authenticator.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Task/context ID generator.
    pub ids: Arc<dyn IdGenerator>,
    /// Request body byte limit.
    pub max_body_size: usize,
    /// Bound on reading the request body.
    pub read_timeout: Duration,
    /// Interval between SSE keep-alive comments on quiet streams.
    pub sse_keep_alive: Duration,
}

/// Create the A2A router over the given state.
pub fn a2a_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/.well-known/agent.json", get(handle_agent_card))
        .route("/a2a", post(handle_jsonrpc))
        .with_state(state)
}

/// Serve the agent card at the well-known path.
async fn handle_agent_card(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let card = match &state.card {
        Some(provider) => provider.card().await,
        None => Value::Object(serde_json::Map::new()),
    };
    Json(card)
}

/// Main JSON-RPC entry point: authenticate, bound and read the body,
/// parse, dispatch.
async fn handle_jsonrpc(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (head, body) = request.into_parts();

    if let Some(authenticator) = &state.authenticator {
        if let Err(e) = authenticator.authenticate(&head).await {
            warn!(error = %e, "Request rejected by authenticator");
            return Json(JsonRpcResponse::error(
                None,
                error::SERVER_ERROR,
                format!("Authentication failed: {}", e),
            ))
            .into_response();
        }
    }

    let bytes = match tokio::time::timeout(
        state.read_timeout,
        axum::body::to_bytes(body, state.max_body_size),
    )
    .await
    {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            return Json(JsonRpcResponse::error(
                None,
                error::PARSE_ERROR,
                format!("Parse error: {}", e),
            ))
            .into_response();
        }
        Err(_) => {
            return Json(JsonRpcResponse::error(
                None,
                error::PARSE_ERROR,
                "Parse error: timed out reading request body",
            ))
            .into_response();
        }
    };

    let request: JsonRpcRequest = match serde_json::from_slice(&bytes) {
        Ok(req) => req,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                None,
                error::PARSE_ERROR,
                format!("Parse error: {}", e),
            ))
            .into_response();
        }
    };

    if request.jsonrpc != "2.0" {
        return Json(JsonRpcResponse::error(
            request.id,
            error::INVALID_REQUEST,
            "Invalid request: jsonrpc version must be \"2.0\"",
        ))
        .into_response();
    }

    debug!(method = %request.method, "JSON-RPC request received");

    match request.method.as_str() {
        "message/send" => handle_message_send(state, request).await,
        "message/stream" => handle_message_stream(state, request).await,
        "tasks/get" => handle_tasks_get(state, request).await,
        "tasks/list" => handle_tasks_list(state, request).await,
        "tasks/cancel" => handle_tasks_cancel(state, request).await,
        "tasks/subscribe" => handle_tasks_subscribe(state, request).await,
        method => {
            warn!(method = %method, "Unknown JSON-RPC method");
            Json(JsonRpcResponse::error(
                request.id,
                error::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ))
            .into_response()
        }
    }
}

/// A prepared send/stream turn.
struct Turn {
    task_id: String,
    context_id: String,
    conversation: Arc<dyn Conversation>,
    parts: Vec<ContentPart>,
}

/// Shared preprocessing for `message/send` and `message/stream`: resolve
/// the context ID, acquire the conversation, probe streaming capability,
/// convert the message, and create the task.
async fn prepare_turn(
    state: &AppState,
    params: &SendMessageParams,
    streaming: bool,
) -> A2AResult<Turn> {
    let context_id = params
        .message
        .context_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| state.ids.generate());

    let conversation = state
        .pool
        .acquire(&context_id)
        .await
        .map_err(|e| A2AError::server(format!("Failed to open conversation: {}", e)))?;

    if streaming && conversation.streaming().is_none() {
        return Err(A2AError::method_not_found(
            "Streaming not supported by this agent",
        ));
    }

    let parts = content::message_to_content(&params.message)
        .map_err(|e| A2AError::invalid_params(format!("Invalid message: {}", e)))?;

    let task_id = state.ids.generate();
    state
        .store
        .create(&task_id, &context_id)
        .await
        .map_err(|_| A2AError::server("Failed to create task"))?;

    let mut inbound = params.message.clone();
    inbound.context_id = Some(context_id.clone());
    inbound.task_id = Some(task_id.clone());
    if let Err(e) = state.store.append_history(&task_id, inbound).await {
        debug!(task_id = %task_id, error = %e, "Inbound message not recorded");
    }

    Ok(Turn {
        task_id,
        context_id,
        conversation,
        parts,
    })
}

/// Handle `message/send`.
///
/// Blocking requests wait for the runner; non-blocking requests sample it
/// for [`SETTLE_WAIT`] so trivial turns still answer with their final
/// state.
async fn handle_message_send(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params: SendMessageParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                request.id,
                error::INVALID_PARAMS,
                format!("Invalid params: {}", e),
            ))
            .into_response();
        }
    };

    let turn = match prepare_turn(&state, &params, false).await {
        Ok(turn) => turn,
        Err(e) => return Json(JsonRpcResponse::from_a2a_error(request.id, e)).into_response(),
    };

    let blocking = params
        .configuration
        .as_ref()
        .and_then(|c| c.blocking)
        .unwrap_or(false);

    let runner = Arc::clone(&state.runner);
    let task_id = turn.task_id.clone();
    let handle = tokio::spawn(
        async move {
            runner
                .run_send(turn.task_id, turn.context_id, turn.conversation, turn.parts)
                .await;
        }
        .instrument(Span::current()),
    );

    if blocking {
        let _ = handle.await;
    } else {
        // Sample the runner briefly; on timeout the handle is dropped and
        // the runner keeps going in the background.
        let _ = tokio::time::timeout(SETTLE_WAIT, handle).await;
    }

    match state.store.get(&task_id).await {
        Ok(task) => match serde_json::to_value(&task) {
            Ok(v) => Json(JsonRpcResponse::success(request.id, v)).into_response(),
            Err(e) => Json(JsonRpcResponse::error(
                request.id,
                error::INTERNAL_ERROR,
                format!("Internal error: {}", e),
            ))
            .into_response(),
        },
        Err(e) => Json(JsonRpcResponse::from_a2a_error(request.id, e)).into_response(),
    }
}

/// Handle `message/stream` — SSE response fed by the direct writer
/// channel.
async fn handle_message_stream(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params: SendMessageParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                request.id,
                error::INVALID_PARAMS,
                format!("Invalid params: {}", e),
            ))
            .into_response();
        }
    };

    let turn = match prepare_turn(&state, &params, true).await {
        Ok(turn) => turn,
        Err(e) => return Json(JsonRpcResponse::from_a2a_error(request.id, e)).into_response(),
    };

    // Register the broadcaster before responding so subscribers can find
    // the task as soon as the client sees the task ID.
    state.broadcasts.get_or_create(&turn.task_id);

    let (tx, rx) = mpsc::channel::<StreamPayload>(SUBSCRIBER_BUFFER);
    let runner = Arc::clone(&state.runner);
    tokio::spawn(
        async move {
            runner
                .run_stream(
                    turn.task_id,
                    turn.context_id,
                    turn.conversation,
                    turn.parts,
                    tx,
                )
                .await;
        }
        .instrument(Span::current()),
    );

    Sse::new(direct_sse_stream(request.id, rx))
        .keep_alive(KeepAlive::new().interval(state.sse_keep_alive))
        .into_response()
}

/// Handle `tasks/get`. `historyLength` is accepted and ignored.
async fn handle_tasks_get(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params: GetTaskParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                request.id,
                error::INVALID_PARAMS,
                format!("Invalid params: {}", e),
            ))
            .into_response();
        }
    };

    match state.store.get(&params.id).await {
        Ok(task) => match serde_json::to_value(&task) {
            Ok(v) => Json(JsonRpcResponse::success(request.id, v)).into_response(),
            Err(e) => Json(JsonRpcResponse::error(
                request.id,
                error::INTERNAL_ERROR,
                format!("Internal error: {}", e),
            ))
            .into_response(),
        },
        Err(e) => Json(JsonRpcResponse::from_a2a_error(request.id, e)).into_response(),
    }
}

/// Handle `tasks/list`. The `status` filter is parsed but not applied.
async fn handle_tasks_list(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params: ListTasksParams = if request.params.is_null() {
        ListTasksParams::default()
    } else {
        match serde_json::from_value(request.params.clone()) {
            Ok(p) => p,
            Err(e) => {
                return Json(JsonRpcResponse::error(
                    request.id,
                    error::INVALID_PARAMS,
                    format!("Invalid params: {}", e),
                ))
                .into_response();
            }
        }
    };

    let context_id = params.context_id.unwrap_or_default();
    let limit = params.page_size.unwrap_or(0);
    let offset = params.page_offset.unwrap_or(0);

    match state.store.list(&context_id, limit, offset).await {
        Ok(tasks) => {
            let response = ListTasksResponse {
                page_size: tasks.len() as i64,
                tasks,
            };
            match serde_json::to_value(&response) {
                Ok(v) => Json(JsonRpcResponse::success(request.id, v)).into_response(),
                Err(e) => Json(JsonRpcResponse::error(
                    request.id,
                    error::INTERNAL_ERROR,
                    format!("Internal error: {}", e),
                ))
                .into_response(),
            }
        }
        Err(e) => Json(JsonRpcResponse::from_a2a_error(request.id, e)).into_response(),
    }
}

/// Handle `tasks/cancel`: fire the runner's cancellation handle, then
/// record the cancel in the store, then return the updated snapshot.
async fn handle_tasks_cancel(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params: CancelTaskParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                request.id,
                error::INVALID_PARAMS,
                format!("Invalid params: {}", e),
            ))
            .into_response();
        }
    };

    state.cancels.cancel(&params.id);

    if let Err(e) = state.store.cancel(&params.id).await {
        return Json(JsonRpcResponse::from_a2a_error(request.id, e)).into_response();
    }

    match state.store.get(&params.id).await {
        Ok(task) => match serde_json::to_value(&task) {
            Ok(v) => Json(JsonRpcResponse::success(request.id, v)).into_response(),
            Err(e) => Json(JsonRpcResponse::error(
                request.id,
                error::INTERNAL_ERROR,
                format!("Internal error: {}", e),
            ))
            .into_response(),
        },
        Err(e) => Json(JsonRpcResponse::from_a2a_error(request.id, e)).into_response(),
    }
}

/// Handle `tasks/subscribe`.
///
/// A live broadcaster gets a relay; a known task without one gets a single
/// status event reflecting its (presumably terminal) state; an unknown
/// task gets `-32001`.
async fn handle_tasks_subscribe(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params: SubscribeTaskParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                request.id,
                error::INVALID_PARAMS,
                format!("Invalid params: {}", e),
            ))
            .into_response();
        }
    };

    if let Some(broadcaster) = state
        .broadcasts
        .get(&params.id)
        .filter(|b| !b.is_closed())
    {
        return Sse::new(subscriber_sse_stream(request.id, broadcaster))
            .keep_alive(KeepAlive::new().interval(state.sse_keep_alive))
            .into_response();
    }

    match state.store.get(&params.id).await {
        Ok(task) => {
            let payload = StreamPayload::StatusUpdate(TaskStatusUpdateEvent {
                task_id: task.id.clone(),
                context_id: task.context_id.clone(),
                kind: "status-update".to_string(),
                r#final: task.status.state.is_terminal(),
                status: task.status,
                metadata: None,
            });
            Sse::new(single_event_stream(request.id, payload))
                .keep_alive(KeepAlive::new().interval(state.sse_keep_alive))
                .into_response()
        }
        Err(e) => Json(JsonRpcResponse::from_a2a_error(request.id, e)).into_response(),
    }
}

// ---- SSE shaping ----

/// Wrap a payload in a JSON-RPC success envelope and render it as one SSE
/// event (`data:` line + blank line).
fn sse_event(request_id: &Option<Value>, payload: &StreamPayload) -> Option<Event> {
    match serde_json::to_value(payload) {
        Ok(result) => {
            let envelope = JsonRpcResponse::success(request_id.clone(), result);
            match serde_json::to_string(&envelope) {
                Ok(json) => Some(Event::default().data(json)),
                Err(e) => {
                    warn!(error = %e, "SSE envelope serialization failed");
                    None
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "SSE payload serialization failed");
            None
        }
    }
}

/// The originating client's stream: relays the direct writer channel until
/// the final payload or runner teardown.
fn direct_sse_stream(
    request_id: Option<Value>,
    mut rx: mpsc::Receiver<StreamPayload>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(payload) = rx.recv().await {
            let is_final = payload.is_final();
            if let Some(event) = sse_event(&request_id, &payload) {
                yield Ok(event);
            }
            if is_final {
                break;
            }
        }
    }
}

/// A late subscriber's stream: relays broadcaster payloads until the
/// broadcaster closes or the client goes away.
fn subscriber_sse_stream(
    request_id: Option<Value>,
    broadcaster: Arc<Broadcaster>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    /// Unsubscribes when the stream is dropped, including on client
    /// disconnect.
    struct Unsubscribe {
        broadcaster: Arc<Broadcaster>,
        id: u64,
    }

    impl Drop for Unsubscribe {
        fn drop(&mut self) {
            self.broadcaster.unsubscribe(self.id);
        }
    }

    let mut subscription = broadcaster.subscribe();
    let guard = Unsubscribe {
        broadcaster,
        id: subscription.id,
    };

    async_stream::stream! {
        let _guard = guard;
        while let Some(payload) = subscription.rx.recv().await {
            if let Some(event) = sse_event(&request_id, &payload) {
                yield Ok(event);
            }
        }
    }
}

/// A stream of exactly one event. Used for subscriptions to settled tasks.
fn single_event_stream(
    request_id: Option<Value>,
    payload: StreamPayload,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        if let Some(event) = sse_event(&request_id, &payload) {
            yield Ok(event);
        }
    }
}
