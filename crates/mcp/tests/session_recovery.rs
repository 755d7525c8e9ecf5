//! Streamable HTTP session handling against the in-process mock backend.

use std::sync::Arc;

use beacon_mcp::testing::{MockBehavior, MockMcpServer};
use beacon_mcp::{
    CallContext, CanonicalCode, JsonMap, McpClient, McpClientOptions, McpError, TransportKind, canonical_code_from_error,
    hint_for_error,
};
use serde_json::json;

fn client_for(url: &str) -> McpClient {
    let options = McpClientOptions {
        auth_token: None,
        ..Default::default()
    };
    McpClient::with_options(url, TransportKind::StreamableHttp, options).unwrap()
}

fn args(value: serde_json::Value) -> JsonMap {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn initialize_acquires_session_and_lists_tools() {
    let server = MockMcpServer::default().start().await.unwrap();
    let client = client_for(&server.url());
    let ctx = CallContext::background();

    client.initialize(&ctx).await.unwrap();
    assert_eq!(client.session_id().as_deref(), Some("session-1"));
    assert_eq!(server.counters().notifications(), 1);

    let tools = client.list_tools(&ctx).await.unwrap();
    let names: Vec<_> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, ["search", "list_files"]);

    let result = client.call_tool(&ctx, "search", args(json!({"query": "rust"}))).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.text(), "called search");
    assert_eq!(result.structured_content["arguments"]["query"], json!("rust"));
    assert_eq!(result.http_status, 200);
    assert_eq!(result.headers.get("content-type").map(String::as_str), Some("application/json"));

    server.shutdown().await;
}

#[tokio::test]
async fn expired_session_is_recovered_and_call_replayed_once() {
    let server = MockMcpServer::new(MockBehavior {
        expire_tool_calls: 1,
        ..Default::default()
    })
    .start()
    .await
    .unwrap();
    let client = client_for(&server.url());
    let ctx = CallContext::background();
    client.initialize(&ctx).await.unwrap();

    let result = client.call_tool(&ctx, "search", JsonMap::new()).await.unwrap();
    assert_eq!(result.text(), "called search");
    assert_eq!(client.session_id().as_deref(), Some("session-2"));
    assert_eq!(server.counters().initialize(), 2);
    assert_eq!(server.counters().tools_call(), 2);
    assert_eq!(
        server.seen_sessions(),
        vec![Some("session-1".to_string()), Some("session-2".to_string())]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn second_expiry_in_same_call_is_terminal() {
    let server = MockMcpServer::new(MockBehavior {
        expire_tool_calls: 2,
        ..Default::default()
    })
    .start()
    .await
    .unwrap();
    let client = client_for(&server.url());
    let ctx = CallContext::background();
    client.initialize(&ctx).await.unwrap();

    let error = client.call_tool(&ctx, "search", JsonMap::new()).await.unwrap_err();
    assert!(matches!(error, McpError::Rpc(_)));
    assert_eq!(canonical_code_from_error(&error), Some(CanonicalCode::SessionNotFound));
    assert_eq!(
        hint_for_error(&error),
        "The MCP session was not found. Reconnect to the server and retry your command."
    );
    assert_eq!(server.counters().initialize(), 2);
    assert_eq!(server.counters().tools_call(), 2);

    server.shutdown().await;
}

#[tokio::test]
async fn failed_recovery_restores_previous_session() {
    let server = MockMcpServer::new(MockBehavior {
        expire_tool_calls: 1,
        fail_reinitialize: true,
        ..Default::default()
    })
    .start()
    .await
    .unwrap();
    let client = client_for(&server.url());
    let ctx = CallContext::background();
    client.initialize(&ctx).await.unwrap();

    let error = client.call_tool(&ctx, "search", JsonMap::new()).await.unwrap_err();
    let McpError::SessionRecovery { original, recovery } = &error else {
        panic!("expected recovery failure, got {error:?}");
    };
    assert_eq!(canonical_code_from_error(original), Some(CanonicalCode::SessionNotFound));
    assert!(recovery.to_string().contains("initialize refused"));
    assert_eq!(canonical_code_from_error(&error), Some(CanonicalCode::SessionNotFound));
    assert_eq!(client.session_id().as_deref(), Some("session-1"));
    assert_eq!(server.counters().tools_call(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn recovery_applies_to_tool_listing() {
    let server = MockMcpServer::default().start().await.unwrap();
    let client = client_for(&server.url());
    let ctx = CallContext::background();
    client.initialize(&ctx).await.unwrap();

    server.expire_session();
    let tools = client.list_tools(&ctx).await.unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(server.counters().initialize(), 2);
    assert_eq!(server.counters().tools_list(), 2);

    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_callers_share_a_single_recovery() {
    let server = MockMcpServer::default().start().await.unwrap();
    let client = Arc::new(client_for(&server.url()));
    let ctx = CallContext::background();
    client.initialize(&ctx).await.unwrap();

    server.expire_session();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client.list_tools(&CallContext::background()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 2);
    }
    assert_eq!(server.counters().initialize(), 2);
    assert_eq!(client.session_id().as_deref(), Some("session-2"));

    server.shutdown().await;
}

#[tokio::test]
async fn uninitialized_client_does_not_attempt_recovery() {
    let server = MockMcpServer::default().start().await.unwrap();
    let client = client_for(&server.url());

    let error = client.list_tools(&CallContext::background()).await.unwrap_err();
    assert_eq!(canonical_code_from_error(&error), Some(CanonicalCode::SessionNotFound));
    assert_eq!(server.counters().initialize(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn missing_session_header_fails_initialize() {
    let server = MockMcpServer::new(MockBehavior {
        omit_session_header: true,
        ..Default::default()
    })
    .start()
    .await
    .unwrap();
    let client = client_for(&server.url());

    let error = client.initialize(&CallContext::background()).await.unwrap_err();
    assert_eq!(error.to_string(), "initialize response missing MCP-Session-Id");
    assert!(client.session_id().is_none());
    assert_eq!(server.counters().notifications(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn event_stream_responses_are_decoded() {
    let server = MockMcpServer::new(MockBehavior {
        event_stream: true,
        ..Default::default()
    })
    .start()
    .await
    .unwrap();
    let client = client_for(&server.url());
    let ctx = CallContext::background();
    client.initialize(&ctx).await.unwrap();

    let result = client.call_tool(&ctx, "list_files", JsonMap::new()).await.unwrap();
    assert_eq!(result.text(), "called list_files");

    server.shutdown().await;
}

#[tokio::test]
async fn bearer_token_is_sent_and_rejection_is_classified() {
    let server = MockMcpServer::new(MockBehavior {
        required_token: Some("s3cret".into()),
        ..Default::default()
    })
    .start()
    .await
    .unwrap();
    let ctx = CallContext::background();

    let authorized = McpClient::with_options(
        &server.url(),
        TransportKind::StreamableHttp,
        McpClientOptions {
            auth_token: Some("s3cret".into()),
            ..Default::default()
        },
    )
    .unwrap();
    authorized.initialize(&ctx).await.unwrap();

    let anonymous = client_for(&server.url());
    let error = anonymous.initialize(&ctx).await.unwrap_err();
    assert_eq!(canonical_code_from_error(&error), Some(CanonicalCode::Unauthorized));
    let rpc = error.rpc_error().unwrap();
    assert_eq!(rpc.http_status, Some(401));

    server.shutdown().await;
}

#[tokio::test]
async fn deadline_bounds_slow_http_calls() {
    let server = MockMcpServer::new(MockBehavior {
        tool_delay: Some(std::time::Duration::from_secs(3)),
        ..Default::default()
    })
    .start()
    .await
    .unwrap();
    let client = client_for(&server.url());
    client.initialize(&CallContext::background()).await.unwrap();

    let ctx = CallContext::with_timeout(std::time::Duration::from_millis(200));
    let error = client.call_tool(&ctx, "search", JsonMap::new()).await.unwrap_err();
    assert!(error.is_context(), "unexpected error: {error:?}");

    server.shutdown().await;
}
