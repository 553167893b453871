//! Error types — JSON-RPC error codes plus host-internal error kinds.
//!
//! Two families live in one enum: protocol errors that cross the wire as
//! JSON-RPC error envelopes, and store/runner errors (`TaskExists`,
//! `InvalidTransition`, `TerminalTask`) that normally stay internal. The one
//! internal kind with a wire mapping is `TerminalTask`, which `tasks/cancel`
//! surfaces as `-32001`.

use crate::types::{JsonRpcError, TaskState};

// ---------------------------------------------------------------------------
// JSON-RPC error codes
// ---------------------------------------------------------------------------

/// Invalid JSON was received, or the body exceeded the size limit.
pub const PARSE_ERROR: i64 = -32700;

/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i64 = -32600;

/// The method does not exist, or a required capability is missing.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Invalid method parameter(s), including invalid message content.
pub const INVALID_PARAMS: i64 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Generic server error: opener failure, task-creation failure,
/// authentication failure.
pub const SERVER_ERROR: i64 = -32000;

/// The requested task was not found, or cannot be canceled.
pub const TASK_NOT_FOUND: i64 = -32001;

// ---------------------------------------------------------------------------
// A2AError
// ---------------------------------------------------------------------------

/// Unified error type for the A2A host.
#[derive(Debug, Clone, thiserror::Error)]
pub enum A2AError {
    /// Invalid JSON payload or oversize body (code -32700).
    #[error("Parse error: {message}")]
    ParseError {
        /// Human-readable error message.
        message: String,
    },

    /// Malformed JSON-RPC envelope (code -32600).
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Human-readable error message.
        message: String,
    },

    /// Unknown method or missing capability (code -32601).
    #[error("{message}")]
    MethodNotFound {
        /// Human-readable error message.
        message: String,
    },

    /// Invalid parameters or invalid message content (code -32602).
    /// Messages carry their own context prefix (`Invalid params: ...`,
    /// `Invalid message: ...`).
    #[error("{message}")]
    InvalidParams {
        /// Human-readable error message.
        message: String,
    },

    /// Internal error (code -32603).
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
    },

    /// Generic server-side failure (code -32000).
    #[error("{message}")]
    Server {
        /// Human-readable error message.
        message: String,
    },

    /// Task not found (code -32001).
    #[error("Task not found: {id}")]
    TaskNotFound {
        /// The task ID that was requested.
        id: String,
    },

    /// A task with this ID already exists. Store-internal.
    #[error("Task already exists: {id}")]
    TaskExists {
        /// The conflicting task ID.
        id: String,
    },

    /// The requested state change is not in the transition table.
    /// Store-internal; legal callers never trigger it.
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition {
        /// The task's current state.
        from: TaskState,
        /// The state that was requested.
        to: TaskState,
    },

    /// The task is in a terminal state and cannot change (code -32001 when
    /// surfaced through `tasks/cancel`).
    #[error("Task {id} is in a terminal state")]
    TerminalTask {
        /// The task ID.
        id: String,
    },

    /// A conversation operation (open/send/stream/close) failed.
    #[error("{0}")]
    Conversation(String),
}

/// Convenience result type for host operations.
pub type A2AResult<T> = Result<T, A2AError>;

impl A2AError {
    /// Create a `ParseError`.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
        }
    }

    /// Create a `MethodNotFound`.
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::MethodNotFound {
            message: message.into(),
        }
    }

    /// Create an `InvalidParams`.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Create a `Server` error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Create an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a `TaskNotFound`.
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    /// Returns the JSON-RPC error code for this error.
    ///
    /// Store-internal kinds that should never cross the wire map to
    /// `-32603`, except `TerminalTask` which shares the not-found /
    /// not-permitted code.
    pub fn code(&self) -> i64 {
        match self {
            A2AError::ParseError { .. } => PARSE_ERROR,
            A2AError::InvalidRequest { .. } => INVALID_REQUEST,
            A2AError::MethodNotFound { .. } => METHOD_NOT_FOUND,
            A2AError::InvalidParams { .. } => INVALID_PARAMS,
            A2AError::Internal { .. } => INTERNAL_ERROR,
            A2AError::Server { .. } | A2AError::Conversation(_) => SERVER_ERROR,
            A2AError::TaskNotFound { .. } | A2AError::TerminalTask { .. } => TASK_NOT_FOUND,
            A2AError::TaskExists { .. } | A2AError::InvalidTransition { .. } => INTERNAL_ERROR,
        }
    }
}

impl From<A2AError> for JsonRpcError {
    fn from(err: A2AError) -> Self {
        JsonRpcError {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}

impl From<serde_json::Error> for A2AError {
    fn from(err: serde_json::Error) -> Self {
        A2AError::ParseError {
            message: err.to_string(),
        }
    }
}
