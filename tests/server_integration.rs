//! End-to-end tests over real HTTP: JSON-RPC dispatch, streaming SSE,
//! subscriptions, error codes, body limiting, and authentication.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::request::Parts as RequestParts;
use futures::StreamExt;

use a2a_host::error::{A2AError, A2AResult};
use a2a_host::server::{A2AServer, Authenticator};

use common::{
    jsonrpc_request, message_send_request, post_rpc, send_request_with, serve, serve_with_opener,
    sse_results, EchoConversation, FailingOpener, HangingConversation, ScriptedConversation,
    SlowConversation, TestOpener,
};

use a2a_host::conversation::{Conversation, ConversationEvent};

// ---- message/send ----

#[tokio::test]
async fn blocking_send_returns_completed_task() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let response = post_rpc(&base_url, &message_send_request(1, "hello")).await;

    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);
    let task = &response["result"];
    assert_eq!(task["kind"], "task");
    assert_eq!(task["status"]["state"], "completed");

    // Generated IDs are 16 random bytes as lowercase hex.
    let id = task["id"].as_str().unwrap();
    let context_id = task["contextId"].as_str().unwrap();
    for generated in [id, context_id] {
        assert_eq!(generated.len(), 32);
        assert!(generated.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    let artifacts = task["artifacts"].as_array().unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0]["artifactId"], "artifact-1");
    assert_eq!(artifacts[0]["parts"][0]["text"], "Echo: hello");
}

#[tokio::test]
async fn nonblocking_send_settles_late() {
    let (base_url, _server) = serve_with_opener(TestOpener::new(|_| {
        Arc::new(SlowConversation {
            delay: Duration::from_millis(100),
        }) as Arc<dyn Conversation>
    }))
    .await;

    let request = send_request_with(1, "message/send", "take your time", None, false);
    let response = post_rpc(&base_url, &request).await;

    let state = response["result"]["status"]["state"].as_str().unwrap();
    assert!(
        state == "submitted" || state == "working",
        "non-blocking send answered with {state}"
    );
    let task_id = response["result"]["id"].as_str().unwrap().to_string();

    // After the conversation finishes, the snapshot is terminal.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let get = post_rpc(
        &base_url,
        &jsonrpc_request(serde_json::json!(2), "tasks/get", serde_json::json!({"id": task_id})),
    )
    .await;
    assert_eq!(get["result"]["status"]["state"], "completed");
}

#[tokio::test]
async fn context_id_is_reused_across_sends() {
    let opener = TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>);
    let (base_url, _server) = serve_with_opener(opener.clone()).await;

    let first = send_request_with(1, "message/send", "one", Some("ctx-fixed"), true);
    let second = send_request_with(2, "message/send", "two", Some("ctx-fixed"), true);
    let r1 = post_rpc(&base_url, &first).await;
    let r2 = post_rpc(&base_url, &second).await;

    assert_eq!(r1["result"]["contextId"], "ctx-fixed");
    assert_eq!(r2["result"]["contextId"], "ctx-fixed");
    // Same context, one conversation.
    assert_eq!(opener.open_count(), 1);
}

#[tokio::test]
async fn opener_failure_maps_to_server_error() {
    let (base_url, _server) = serve_with_opener(Arc::new(FailingOpener)).await;

    let response = post_rpc(&base_url, &message_send_request(1, "hi")).await;
    let error = &response["error"];
    assert_eq!(error["code"], -32000);
    assert!(error["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to open conversation"));
}

#[tokio::test]
async fn data_part_is_rejected() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let request = jsonrpc_request(
        serde_json::json!(1),
        "message/send",
        serde_json::json!({
            "message": {
                "messageId": "m1",
                "role": "user",
                "parts": [{"data": {"structured": true}}]
            }
        }),
    );
    let response = post_rpc(&base_url, &request).await;
    let error = &response["error"];
    assert_eq!(error["code"], -32602);
    assert!(error["message"].as_str().unwrap().starts_with("Invalid message"));
}

// ---- Envelope & protocol errors ----

#[tokio::test]
async fn malformed_json_yields_parse_error() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let client = reqwest::Client::new();
    let response: serde_json::Value = client
        .post(format!("{}/a2a", base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response["error"]["code"], -32700);
}

#[tokio::test]
async fn wrong_jsonrpc_version_is_invalid_request() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let client = reqwest::Client::new();
    let response: serde_json::Value = client
        .post(format!("{}/a2a", base_url))
        .json(&serde_json::json!({"jsonrpc": "1.0", "id": 1, "method": "tasks/list"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_method_yields_method_not_found() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let response = post_rpc(
        &base_url,
        &jsonrpc_request(serde_json::json!(7), "tasks/frobnicate", serde_json::json!({})),
    )
    .await;
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["id"], 7);
}

#[tokio::test]
async fn missing_message_param_is_invalid_params() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let response = post_rpc(
        &base_url,
        &jsonrpc_request(serde_json::json!(1), "message/send", serde_json::json!({})),
    )
    .await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn body_size_limit_is_exact() {
    const LIMIT: usize = 2048;
    let server = A2AServer::builder(TestOpener::new(|_| {
        Arc::new(EchoConversation) as Arc<dyn Conversation>
    }))
    .max_body_size(LIMIT)
    .build();
    let (base_url, _server) = serve(server).await;

    // A valid request padded with trailing whitespace to exactly the limit
    // parses fine (the -32001 answer proves dispatch ran).
    let request = jsonrpc_request(
        serde_json::json!(1),
        "tasks/get",
        serde_json::json!({"id": "missing"}),
    );
    let mut body = serde_json::to_string(&request).unwrap();
    assert!(body.len() < LIMIT);
    body.push_str(&" ".repeat(LIMIT - body.len()));
    assert_eq!(body.len(), LIMIT);

    let client = reqwest::Client::new();
    let at_limit: serde_json::Value = client
        .post(format!("{}/a2a", base_url))
        .header("content-type", "application/json")
        .body(body.clone())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(at_limit["error"]["code"], -32001);

    // One byte more is a parse error.
    body.push(' ');
    let over_limit: serde_json::Value = client
        .post(format!("{}/a2a", base_url))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(over_limit["error"]["code"], -32700);
}

// ---- Authentication ----

struct ApiKeyAuthenticator;

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &RequestParts) -> A2AResult<()> {
        match request.headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
            Some("secret") => Ok(()),
            _ => Err(A2AError::Conversation("missing or bad api key".to_string())),
        }
    }
}

#[tokio::test]
async fn authenticator_gates_all_rpc_calls() {
    let server = A2AServer::builder(TestOpener::new(|_| {
        Arc::new(EchoConversation) as Arc<dyn Conversation>
    }))
    .authenticator(Arc::new(ApiKeyAuthenticator))
    .build();
    let (base_url, _server) = serve(server).await;

    let client = reqwest::Client::new();
    let denied: serde_json::Value = client
        .post(format!("{}/a2a", base_url))
        .json(&message_send_request(1, "hi"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(denied["error"]["code"], -32000);
    assert!(denied["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Authentication failed:"));

    let allowed: serde_json::Value = client
        .post(format!("{}/a2a", base_url))
        .header("x-api-key", "secret")
        .json(&message_send_request(2, "hi"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(allowed["result"]["status"]["state"], "completed");
}

// ---- Agent card ----

#[tokio::test]
async fn agent_card_served_at_well_known_path() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let card: serde_json::Value = reqwest::get(format!("{}/.well-known/agent.json", base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(card["name"], "Test Agent");
}

#[tokio::test]
async fn missing_card_provider_serves_empty_object() {
    let server = A2AServer::builder(TestOpener::new(|_| {
        Arc::new(EchoConversation) as Arc<dyn Conversation>
    }))
    .build();
    let (base_url, _server) = serve(server).await;

    let card: serde_json::Value = reqwest::get(format!("{}/.well-known/agent.json", base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(card, serde_json::json!({}));
}

// ---- tasks/get, tasks/cancel, tasks/list ----

#[tokio::test]
async fn tasks_get_unknown_id_is_not_found() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let response = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(1),
            "tasks/get",
            serde_json::json!({"id": "nope", "historyLength": 5}),
        ),
    )
    .await;
    assert_eq!(response["error"]["code"], -32001);
}

#[tokio::test]
async fn cancel_mid_send_lands_on_canceled() {
    let (base_url, _server) = serve_with_opener(TestOpener::new(|_| {
        Arc::new(HangingConversation) as Arc<dyn Conversation>
    }))
    .await;

    // Non-blocking send against a conversation that never returns.
    let send = send_request_with(1, "message/send", "hang", None, false);
    let response = post_rpc(&base_url, &send).await;
    let task_id = response["result"]["id"].as_str().unwrap().to_string();
    assert_ne!(response["result"]["status"]["state"], "completed");

    let cancel = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(2),
            "tasks/cancel",
            serde_json::json!({"id": task_id}),
        ),
    )
    .await;
    assert_eq!(cancel["result"]["status"]["state"], "canceled");

    // The runner exits without flipping the task to failed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let get = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(3),
            "tasks/get",
            serde_json::json!({"id": task_id}),
        ),
    )
    .await;
    assert_eq!(get["result"]["status"]["state"], "canceled");

    // Cancel is idempotent at the task level: the second call errors but
    // the state stays canceled.
    let again = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(4),
            "tasks/cancel",
            serde_json::json!({"id": task_id}),
        ),
    )
    .await;
    assert_eq!(again["error"]["code"], -32001);
}

#[tokio::test]
async fn tasks_list_paginates_and_filters() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    for i in 0..3 {
        let ctx = if i < 2 { "ctx-a" } else { "ctx-b" };
        post_rpc(
            &base_url,
            &send_request_with(i, "message/send", "task", Some(ctx), true),
        )
        .await;
    }

    // pageSize 0 falls back to the 100 default; all three tasks fit.
    let all = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(10),
            "tasks/list",
            serde_json::json!({"pageSize": 0}),
        ),
    )
    .await;
    assert_eq!(all["result"]["tasks"].as_array().unwrap().len(), 3);
    assert_eq!(all["result"]["pageSize"], 3);

    let filtered = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(11),
            "tasks/list",
            serde_json::json!({"contextId": "ctx-a"}),
        ),
    )
    .await;
    assert_eq!(filtered["result"]["tasks"].as_array().unwrap().len(), 2);

    // The status filter is accepted but not applied.
    let status_filtered = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(12),
            "tasks/list",
            serde_json::json!({"status": "failed"}),
        ),
    )
    .await;
    assert_eq!(status_filtered["result"]["tasks"].as_array().unwrap().len(), 3);

    let paged = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(13),
            "tasks/list",
            serde_json::json!({"pageSize": 2, "pageOffset": 2}),
        ),
    )
    .await;
    assert_eq!(paged["result"]["tasks"].as_array().unwrap().len(), 1);
}

// ---- message/stream ----

fn image_stream_opener() -> Arc<TestOpener> {
    TestOpener::new(|_| {
        Arc::new(ScriptedConversation::new(vec![
            ConversationEvent::Text("Here:".to_string()),
            ConversationEvent::Media(Some(common::inline_media(&[0xFF, 0xD8], "image/jpeg"))),
            ConversationEvent::Done,
        ])) as Arc<dyn Conversation>
    })
}

#[tokio::test]
async fn stream_delivers_sse_event_sequence() {
    let (base_url, _server) = serve_with_opener(image_stream_opener()).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/a2a", base_url))
        .json(&send_request_with(1, "message/stream", "go", None, false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/event-stream"));

    let body = response.text().await.unwrap();
    let results = sse_results(&body);
    assert_eq!(results.len(), 4);

    assert_eq!(results[0]["kind"], "status-update");
    assert_eq!(results[0]["status"]["state"], "working");

    assert_eq!(results[1]["kind"], "artifact-update");
    assert_eq!(results[1]["artifact"]["artifactId"], "artifact-0");
    assert_eq!(results[1]["artifact"]["parts"][0]["text"], "Here:");
    assert_eq!(results[1]["append"], true);

    assert_eq!(results[2]["artifact"]["artifactId"], "artifact-1");
    assert_eq!(results[2]["artifact"]["parts"][0]["raw"], "/9g=");
    assert_eq!(results[2]["artifact"]["parts"][0]["mediaType"], "image/jpeg");

    assert_eq!(results[3]["kind"], "status-update");
    assert_eq!(results[3]["status"]["state"], "completed");
    assert_eq!(results[3]["final"], true);
}

#[tokio::test]
async fn stream_snapshot_matches_emitted_artifacts() {
    let (base_url, _server) = serve_with_opener(image_stream_opener()).await;

    let client = reqwest::Client::new();
    let body = client
        .post(format!("{}/a2a", base_url))
        .json(&send_request_with(1, "message/stream", "go", None, false))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let results = sse_results(&body);
    let task_id = results[0]["taskId"].as_str().unwrap().to_string();
    let streamed: Vec<serde_json::Value> = results
        .iter()
        .filter(|r| r["kind"] == "artifact-update")
        .map(|r| r["artifact"].clone())
        .collect();

    let get = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(2),
            "tasks/get",
            serde_json::json!({"id": task_id}),
        ),
    )
    .await;
    let stored = get["result"]["artifacts"].as_array().unwrap();
    assert_eq!(stored, &streamed);
}

#[tokio::test]
async fn stream_against_nonstreaming_agent_is_rejected() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let response = post_rpc(
        &base_url,
        &send_request_with(1, "message/stream", "go", None, false),
    )
    .await;
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(
        response["error"]["message"],
        "Streaming not supported by this agent"
    );
}

#[tokio::test]
async fn stream_error_event_surfaces_failed_status() {
    let (base_url, _server) = serve_with_opener(TestOpener::new(|_| {
        Arc::new(ScriptedConversation::new(vec![ConversationEvent::Error(
            "overloaded".to_string(),
        )])) as Arc<dyn Conversation>
    }))
    .await;

    let client = reqwest::Client::new();
    let body = client
        .post(format!("{}/a2a", base_url))
        .json(&send_request_with(1, "message/stream", "go", None, false))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let results = sse_results(&body);
    let last = results.last().unwrap();
    assert_eq!(last["status"]["state"], "failed");
    assert_eq!(last["final"], true);
    assert_eq!(last["status"]["message"]["parts"][0]["text"], "overloaded");
}

// ---- tasks/subscribe ----

#[tokio::test]
async fn late_subscribe_to_completed_task_gets_single_status_event() {
    let (base_url, _server) = serve_with_opener(image_stream_opener()).await;

    // Run a stream to completion.
    let client = reqwest::Client::new();
    let body = client
        .post(format!("{}/a2a", base_url))
        .json(&send_request_with(1, "message/stream", "go", None, false))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let task_id = sse_results(&body)[0]["taskId"].as_str().unwrap().to_string();

    // Subscribing afterwards yields exactly one terminal status event.
    let subscribe_body = client
        .post(format!("{}/a2a", base_url))
        .json(&jsonrpc_request(
            serde_json::json!(2),
            "tasks/subscribe",
            serde_json::json!({"id": task_id}),
        ))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let results = sse_results(&subscribe_body);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["kind"], "status-update");
    assert_eq!(results[0]["status"]["state"], "completed");
    assert_eq!(results[0]["final"], true);
}

#[tokio::test]
async fn subscribe_to_unknown_task_is_not_found() {
    let (base_url, _server) =
        serve_with_opener(TestOpener::new(|_| Arc::new(EchoConversation) as Arc<dyn Conversation>))
            .await;

    let response = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(1),
            "tasks/subscribe",
            serde_json::json!({"id": "ghost"}),
        ),
    )
    .await;
    assert_eq!(response["error"]["code"], -32001);
}

// ---- Disconnect behavior ----

#[tokio::test]
async fn client_disconnect_tears_down_stream_resources() {
    // Stream that emits one status and then never produces or closes.
    let (base_url, server) = serve_with_opener(TestOpener::new(|_| {
        Arc::new(ScriptedConversation::holding_open(vec![])) as Arc<dyn Conversation>
    }))
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/a2a", base_url))
        .json(&send_request_with(1, "message/stream", "go", None, false))
        .send()
        .await
        .unwrap();

    // Read the first event (working status) to learn the task id.
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let task_id = loop {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("first SSE event arrives")
            .expect("stream not closed")
            .unwrap();
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        let results = sse_results(&buffer);
        if let Some(first) = results.first() {
            break first["taskId"].as_str().unwrap().to_string();
        }
    };

    // Disconnect.
    drop(stream);

    // Within bounded time the broadcaster and cancel handle are gone.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let gone = server.state().broadcasts.get(&task_id).is_none()
            && server.state().cancels.is_empty();
        if gone {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "stream resources survived disconnect"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // The task was not force-canceled by the disconnect.
    let get = post_rpc(
        &base_url,
        &jsonrpc_request(
            serde_json::json!(2),
            "tasks/get",
            serde_json::json!({"id": task_id}),
        ),
    )
    .await;
    assert_eq!(get["result"]["status"]["state"], "working");
}

// ---- Shutdown ----

#[tokio::test]
async fn close_tears_down_conversations_and_runners() {
    let (base_url, server) = serve_with_opener(TestOpener::new(|_| {
        Arc::new(HangingConversation) as Arc<dyn Conversation>
    }))
    .await;

    // Park a runner in a hanging conversation.
    let response = post_rpc(
        &base_url,
        &send_request_with(1, "message/send", "hang", None, false),
    )
    .await;
    assert!(response["result"]["id"].is_string());

    server.close().await.unwrap();

    // Every cancel handle was fired and released.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !server.state().cancels.is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "cancel registry not drained by close"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(server.state().broadcasts.is_empty());
    assert_eq!(server.state().pool.len().await, 0);
}
