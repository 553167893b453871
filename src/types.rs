//! Wire-protocol types for the A2A host.
//!
//! Everything in this module is shaped for JSON-RPC 2.0 transport: camelCase
//! field names, optional fields elided from output, and flat `kind`
//! discriminators on streaming events so consumers can route them without a
//! wrapper object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Task lifecycle
// ============================================================================

/// The lifecycle state of a task.
///
/// Serialized as kebab-case strings (`"input-required"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Task has been received but not yet started.
    Submitted,
    /// Task is actively being processed.
    Working,
    /// Task is waiting for additional input from the caller.
    InputRequired,
    /// Task is waiting for authentication.
    AuthRequired,
    /// Task completed successfully.
    Completed,
    /// Task failed.
    Failed,
    /// Task was canceled.
    Canceled,
    /// Task was rejected by the agent.
    Rejected,
}

impl TaskState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::AuthRequired => "auth-required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the user / client.
    User,
    /// Message from the agent / server.
    Agent,
}

/// Current status of a task: state, optional message, and the time the
/// state was entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// The current state.
    pub state: TaskState,

    /// Optional message associated with this status (e.g. failure text).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    /// When this status was set (RFC 3339 on the wire).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TaskStatus {
    /// A status in the given state, stamped now.
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Some(Utc::now()),
        }
    }
}

/// A task — one turn of agent work, with lifecycle state and accumulated
/// artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: String,

    /// Context identifier grouping related tasks into one conversation.
    pub context_id: String,

    /// Discriminator field — always "task".
    #[serde(default = "kind_task")]
    pub kind: String,

    /// Current task status.
    pub status: TaskStatus,

    /// Artifacts produced by the task, in production order. Append-only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    /// Message history for this task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ============================================================================
// Messages, parts, artifacts
// ============================================================================

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier.
    #[serde(default)]
    pub message_id: String,

    /// Who sent this message.
    pub role: Role,

    /// Discriminator field — always "message".
    #[serde(default = "kind_message")]
    pub kind: String,

    /// Content parts of the message.
    pub parts: Vec<Part>,

    /// Context this message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// Task this message is associated with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Build an agent message with the given parts.
    pub fn agent(parts: Vec<Part>, context_id: &str, task_id: &str) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            role: Role::Agent,
            kind: "message".to_string(),
            parts,
            context_id: Some(context_id.to_string()),
            task_id: Some(task_id.to_string()),
            metadata: None,
        }
    }

    /// Build an agent message with a single text part.
    pub fn agent_text(text: impl Into<String>, context_id: &str, task_id: &str) -> Self {
        Self::agent(vec![Part::text(text)], context_id, task_id)
    }
}

/// A content part on the wire.
///
/// Exactly one of `text`, `raw`, `url`, or `data` must be set. `raw` carries
/// binary content, base64-encoded in JSON. A part with `data` set (an inline
/// structured object) is rejected by the server, as is a part with none of
/// the four set — validation happens in [`crate::content`], not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Plain text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Binary content, base64-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,

    /// External URL reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Inline structured data. Known to the codec layer only as a rejection
    /// case.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// MIME type of the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Optional file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Part {
    /// A text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// A binary part; `bytes` are base64-encoded for the wire.
    pub fn raw(bytes: &[u8], media_type: impl Into<String>) -> Self {
        use base64::Engine as _;
        Self {
            raw: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            media_type: Some(media_type.into()),
            ..Self::default()
        }
    }

    /// A URL-reference part.
    pub fn url(url: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            media_type: Some(media_type.into()),
            ..Self::default()
        }
    }
}

/// An artifact produced by a task: ordered content parts plus optional
/// descriptive fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Artifact identifier, unique within the task.
    pub artifact_id: String,

    /// Human-readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Description of the artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Content parts of the artifact.
    pub parts: Vec<Part>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Artifact {
    /// An artifact with the given id and parts, no descriptive fields.
    pub fn new(artifact_id: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            name: None,
            description: None,
            parts,
            metadata: None,
        }
    }
}

// ============================================================================
// Streaming events
// ============================================================================

/// Notification that a task's status changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    /// ID of the task whose status changed.
    pub task_id: String,

    /// Context this task belongs to.
    pub context_id: String,

    /// Discriminator field — always "status-update".
    #[serde(default = "kind_status_update")]
    pub kind: String,

    /// The new status.
    pub status: TaskStatus,

    /// Whether this is the final status update for this task.
    #[serde(rename = "final")]
    pub r#final: bool,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Notification that an artifact chunk was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdateEvent {
    /// ID of the task that produced the artifact.
    pub task_id: String,

    /// Context this task belongs to.
    pub context_id: String,

    /// Discriminator field — always "artifact-update".
    #[serde(default = "kind_artifact_update")]
    pub kind: String,

    /// The artifact chunk.
    pub artifact: Artifact,

    /// Whether this chunk appends to the task's artifact sequence.
    /// Streaming runners always set `true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,

    /// Whether this is the last chunk of the artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_chunk: Option<bool>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

fn kind_task() -> String {
    "task".to_string()
}

fn kind_message() -> String {
    "message".to_string()
}

fn kind_status_update() -> String {
    "status-update".to_string()
}

fn kind_artifact_update() -> String {
    "artifact-update".to_string()
}

/// A streaming payload — what goes over SSE and through the broadcaster.
///
/// Serializes FLAT (no wrapper key); the inner `kind` field is the
/// discriminator.
#[derive(Debug, Clone)]
pub enum StreamPayload {
    /// A task status update event.
    StatusUpdate(TaskStatusUpdateEvent),

    /// An artifact update event.
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl StreamPayload {
    /// Whether this payload ends the stream.
    pub fn is_final(&self) -> bool {
        match self {
            StreamPayload::StatusUpdate(update) => update.r#final,
            StreamPayload::ArtifactUpdate(_) => false,
        }
    }
}

impl Serialize for StreamPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StreamPayload::StatusUpdate(inner) => inner.serialize(serializer),
            StreamPayload::ArtifactUpdate(inner) => inner.serialize(serializer),
        }
    }
}

// ============================================================================
// JSON-RPC envelopes
// ============================================================================

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version — must be "2.0".
    pub jsonrpc: String,

    /// Request identifier, echoed in the response.
    pub id: Option<serde_json::Value>,

    /// Method name.
    pub method: String,

    /// Method parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version — always "2.0".
    pub jsonrpc: String,

    /// Request identifier this responds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,

    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A success envelope.
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error envelope with an explicit code and message.
    pub fn error(id: Option<serde_json::Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// An error envelope derived from an [`crate::error::A2AError`].
    pub fn from_a2a_error(id: Option<serde_json::Value>, err: crate::error::A2AError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(err.into()),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,

    /// Human-readable message.
    pub message: String,

    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ============================================================================
// Method parameters & results
// ============================================================================

/// Parameters for `message/send` and `message/stream`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    /// The message to deliver to the agent.
    pub message: Message,

    /// Optional send configuration.
    #[serde(default)]
    pub configuration: Option<SendMessageConfiguration>,

    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Configuration options for `message/send`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageConfiguration {
    /// If `true`, block until the task reaches its final state.
    #[serde(default)]
    pub blocking: Option<bool>,

    /// Output MIME types the caller accepts. Advisory.
    #[serde(default)]
    pub accepted_output_modes: Option<Vec<String>>,

    /// History-trimming hint. Accepted and currently ignored.
    #[serde(default)]
    pub history_length: Option<i64>,
}

/// Parameters for `tasks/get`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTaskParams {
    /// The task ID to retrieve.
    pub id: String,

    /// Accepted for forward compatibility; currently ignored.
    #[serde(default)]
    pub history_length: Option<i64>,
}

/// Parameters for `tasks/cancel`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTaskParams {
    /// The task ID to cancel.
    pub id: String,
}

/// Parameters for `tasks/subscribe`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeTaskParams {
    /// The task ID to subscribe to.
    pub id: String,
}

/// Parameters for `tasks/list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksParams {
    /// Filter tasks by context ID. Empty or absent means all.
    #[serde(default)]
    pub context_id: Option<String>,

    /// Maximum number of tasks per page. Values ≤ 0 fall back to 100.
    #[serde(default)]
    pub page_size: Option<i64>,

    /// Offset into the stable task ordering.
    #[serde(default)]
    pub page_offset: Option<i64>,

    /// State filter. Parsed but not applied.
    #[serde(default)]
    pub status: Option<TaskState>,
}

/// Result for `tasks/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResponse {
    /// The tasks on this page.
    pub tasks: Vec<Task>,

    /// Number of tasks returned.
    pub page_size: i64,
}
