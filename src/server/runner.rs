//! Task runner — drives one conversation turn for one task.
//!
//! A runner is spawned per send/stream request and owns the task's
//! lifecycle from `working` to its terminal state: it registers a
//! cancellation handle, invokes the conversation, converts output into
//! wire artifacts, and records the outcome in the task store. The
//! streaming variant additionally translates conversation events into SSE
//! payloads for the direct response writer and the task's broadcaster.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::content::{self, ContentPart};
use crate::conversation::{Conversation, ConversationEvent};
use crate::types::{
    Artifact, Message, Part, StreamPayload, TaskArtifactUpdateEvent, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};

use super::broadcast::{BroadcastRegistry, Broadcaster};
use super::cancel::CancelRegistry;
use super::task_store::TaskStore;

/// Drives conversation turns against the task store, broadcaster registry,
/// and cancel registry. One instance is shared by all requests.
pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    broadcasts: Arc<BroadcastRegistry>,
    cancels: Arc<CancelRegistry>,
    /// Bound on each direct SSE write; an unresponsive client is treated
    /// as disconnected.
    write_timeout: Duration,
}

impl TaskRunner {
    /// Create a runner over the given components.
    pub fn new(
        store: Arc<dyn TaskStore>,
        broadcasts: Arc<BroadcastRegistry>,
        cancels: Arc<CancelRegistry>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            broadcasts,
            cancels,
            write_timeout,
        }
    }

    /// Run a non-streaming turn to completion.
    ///
    /// Outcome mapping:
    /// - conversation error, not cancelled → `failed` with the error text
    /// - conversation error, cancelled → state untouched (the cancel
    ///   handler already recorded `canceled`)
    /// - pending tools → `input-required`
    /// - success → artifacts appended (or the text fallback), `completed`
    pub async fn run_send(
        &self,
        task_id: String,
        context_id: String,
        conversation: Arc<dyn Conversation>,
        parts: Vec<ContentPart>,
    ) {
        let token = CancellationToken::new();
        self.cancels.register(&task_id, token.clone());

        if let Err(e) = self
            .store
            .set_state(&task_id, TaskState::Working, None)
            .await
        {
            // A cancel can land between task creation and runner start.
            debug!(task_id = %task_id, error = %e, "Task not startable, runner exiting");
            self.cancels.remove(&task_id);
            return;
        }

        let result = conversation.send(token.clone(), parts).await;

        match result {
            Err(_) if token.is_cancelled() => {
                debug!(task_id = %task_id, "Turn aborted by cancellation");
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Conversation turn failed");
                let message = Message::agent_text(e.to_string(), &context_id, &task_id);
                if let Err(err) = self
                    .store
                    .set_state(&task_id, TaskState::Failed, Some(message))
                    .await
                {
                    debug!(task_id = %task_id, error = %err, "Failure not recorded");
                }
            }
            Ok(outcome) if outcome.has_pending_tools => {
                if let Err(err) = self
                    .store
                    .set_state(&task_id, TaskState::InputRequired, None)
                    .await
                {
                    debug!(task_id = %task_id, error = %err, "input-required not recorded");
                }
            }
            Ok(outcome) => {
                let mut artifacts =
                    content::parts_to_artifacts(&outcome.parts).unwrap_or_default();
                if artifacts.is_empty() && !outcome.text.is_empty() {
                    artifacts = vec![Artifact::new(
                        "artifact-1",
                        vec![Part::text(outcome.text.clone())],
                    )];
                }

                if !artifacts.is_empty() {
                    if let Err(err) = self.store.add_artifacts(&task_id, artifacts).await {
                        warn!(task_id = %task_id, error = %err, "Artifacts not appended");
                    }
                }

                if let Err(err) = self
                    .store
                    .set_state(&task_id, TaskState::Completed, None)
                    .await
                {
                    // Lost a race with cancellation; leave the store as-is.
                    debug!(task_id = %task_id, error = %err, "Completion not recorded");
                }
            }
        }

        self.cancels.remove(&task_id);
        token.cancel();
    }

    /// Run a streaming turn, emitting each event to the direct writer and
    /// the task's broadcaster.
    ///
    /// The loop exits on a terminal conversation event, on the event
    /// channel closing (treated as success), on task cancellation, or on
    /// client disconnect — the latter two leave task state untouched.
    pub async fn run_stream(
        &self,
        task_id: String,
        context_id: String,
        conversation: Arc<dyn Conversation>,
        parts: Vec<ContentPart>,
        direct: mpsc::Sender<StreamPayload>,
    ) {
        let token = CancellationToken::new();
        self.cancels.register(&task_id, token.clone());
        let broadcaster = self.broadcasts.get_or_create(&task_id);

        if let Err(e) = self
            .store
            .set_state(&task_id, TaskState::Working, None)
            .await
        {
            debug!(task_id = %task_id, error = %e, "Task not startable, stream runner exiting");
            self.teardown(&task_id, &broadcaster, &token);
            return;
        }

        let working = self.status_event(&task_id, &context_id, TaskState::Working, false).await;
        if !self.emit(&direct, &broadcaster, working).await {
            self.teardown(&task_id, &broadcaster, &token);
            return;
        }

        let mut events = {
            let Some(streaming) = conversation.streaming() else {
                // The dispatcher probes before spawning; this is a backstop.
                self.record_failure(&task_id, &context_id, "streaming not supported")
                    .await;
                let failed = self
                    .status_event(&task_id, &context_id, TaskState::Failed, true)
                    .await;
                self.emit(&direct, &broadcaster, failed).await;
                self.teardown(&task_id, &broadcaster, &token);
                return;
            };
            match streaming.stream(token.clone(), parts).await {
                Ok(rx) => rx,
                Err(e) => {
                    self.record_failure(&task_id, &context_id, &e.to_string()).await;
                    let failed = self
                        .status_event(&task_id, &context_id, TaskState::Failed, true)
                        .await;
                    self.emit(&direct, &broadcaster, failed).await;
                    self.teardown(&task_id, &broadcaster, &token);
                    return;
                }
            }
        };

        let mut artifact_index: u64 = 0;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    // tasks/cancel or shutdown; state is recorded elsewhere.
                    debug!(task_id = %task_id, "Stream runner cancelled");
                    break;
                }
                _ = direct.closed() => {
                    debug!(task_id = %task_id, "Client disconnected mid-stream");
                    break;
                }
                event = events.recv() => match event {
                    Some(ConversationEvent::Text(text)) => {
                        let payload = self.artifact_event(
                            &task_id,
                            &context_id,
                            artifact_index,
                            Part::text(text),
                        );
                        artifact_index += 1;
                        if !self.emit(&direct, &broadcaster, payload).await {
                            break;
                        }
                    }
                    Some(ConversationEvent::Media(None)) => {
                        debug!(task_id = %task_id, "Null media event skipped");
                    }
                    Some(ConversationEvent::Media(Some(media))) => {
                        match content::media_to_part(&media).and_then(|p| content::part_to_wire(&p)) {
                            Ok(wire) => {
                                let payload = self.artifact_event(
                                    &task_id,
                                    &context_id,
                                    artifact_index,
                                    wire,
                                );
                                artifact_index += 1;
                                if !self.emit(&direct, &broadcaster, payload).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(task_id = %task_id, error = %e, "Media event skipped");
                            }
                        }
                    }
                    Some(ConversationEvent::ToolCall) => {
                        // Agent internals stay opaque; no event, state stays working.
                    }
                    Some(ConversationEvent::Error(text)) => {
                        self.record_failure(&task_id, &context_id, &text).await;
                        let failed = self
                            .status_event(&task_id, &context_id, TaskState::Failed, true)
                            .await;
                        self.emit(&direct, &broadcaster, failed).await;
                        break;
                    }
                    Some(ConversationEvent::Done) | None => {
                        // A channel that closes without `done` still counts
                        // as a successful turn.
                        if let Err(e) = self
                            .store
                            .set_state(&task_id, TaskState::Completed, None)
                            .await
                        {
                            debug!(task_id = %task_id, error = %e, "Completion not recorded");
                        }
                        let completed = self
                            .status_event(&task_id, &context_id, TaskState::Completed, true)
                            .await;
                        self.emit(&direct, &broadcaster, completed).await;
                        break;
                    }
                }
            }
        }

        self.teardown(&task_id, &broadcaster, &token);
    }

    /// Record a `failed` state with the given text as the status message.
    async fn record_failure(&self, task_id: &str, context_id: &str, text: &str) {
        let message = Message::agent_text(text, context_id, task_id);
        if let Err(e) = self
            .store
            .set_state(task_id, TaskState::Failed, Some(message))
            .await
        {
            debug!(task_id = %task_id, error = %e, "Failure not recorded");
        }
    }

    /// Build a status event from the store's current view of the task,
    /// falling back to a synthetic status if the task is gone.
    async fn status_event(
        &self,
        task_id: &str,
        context_id: &str,
        fallback_state: TaskState,
        r#final: bool,
    ) -> StreamPayload {
        let status = match self.store.get(task_id).await {
            Ok(task) => task.status,
            Err(_) => TaskStatus::new(fallback_state),
        };
        StreamPayload::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            kind: "status-update".to_string(),
            status,
            r#final,
            metadata: None,
        })
    }

    /// Build an artifact event for one streamed chunk.
    fn artifact_event(
        &self,
        task_id: &str,
        context_id: &str,
        index: u64,
        part: Part,
    ) -> StreamPayload {
        StreamPayload::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            kind: "artifact-update".to_string(),
            artifact: Artifact::new(format!("artifact-{}", index), vec![part]),
            append: Some(true),
            last_chunk: None,
            metadata: None,
        })
    }

    /// Record artifact events into the store and deliver the payload to
    /// the broadcaster and the direct writer.
    ///
    /// Returns `false` when the direct client is gone or unresponsive past
    /// the write timeout; the caller should stop the stream.
    async fn emit(
        &self,
        direct: &mpsc::Sender<StreamPayload>,
        broadcaster: &Broadcaster,
        payload: StreamPayload,
    ) -> bool {
        if let StreamPayload::ArtifactUpdate(ref update) = payload {
            if let Err(e) = self
                .store
                .add_artifacts(&update.task_id, vec![update.artifact.clone()])
                .await
            {
                warn!(task_id = %update.task_id, error = %e, "Streamed artifact not appended");
            }
        }

        broadcaster.publish(payload.clone());

        match tokio::time::timeout(self.write_timeout, direct.send(payload)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                debug!("Direct writer closed");
                false
            }
            Err(_) => {
                warn!("Direct writer stalled past write timeout");
                false
            }
        }
    }

    /// Close out a streaming task: broadcaster closed and unregistered,
    /// cancel handle released, child token cancelled.
    fn teardown(&self, task_id: &str, broadcaster: &Broadcaster, token: &CancellationToken) {
        broadcaster.close();
        self.broadcasts.remove(task_id);
        self.cancels.remove(task_id);
        token.cancel();
    }
}
