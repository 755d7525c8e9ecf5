//! In-process mock capability backend for integration tests.
//!
//! Speaks the streamable HTTP dialect closely enough to exercise the client:
//! session issuance, expiry, payment challenges, SSE framing and slow tools.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    METHOD_INITIALIZE, METHOD_NOTIFICATIONS_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PAYMENT_REQUIRED_HEADER,
    PROTOCOL_VERSION, SESSION_HEADER,
};

/// How the mock backend should misbehave.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub path: String,
    pub tools: Vec<Value>,
    /// Number of `tools/call` requests answered with SESSION_NOT_FOUND before succeeding.
    pub expire_tool_calls: usize,
    /// Refuse every `initialize` after the first.
    pub fail_reinitialize: bool,
    /// When set, `tools/call` answers 402 with this `PAYMENT-REQUIRED` header value.
    pub payment_required: Option<String>,
    pub event_stream: bool,
    pub omit_session_header: bool,
    /// Bearer token every request must present.
    pub required_token: Option<String>,
    pub tool_delay: Option<Duration>,
    /// Answer every `tools/list` with an internal error.
    pub fail_tools_list: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            path: "/mcp".to_string(),
            tools: vec![
                json!({"name": "search", "description": "Semantic search", "inputSchema": {"type": "object"}}),
                json!({"name": "list_files", "description": "List indexed files"}),
            ],
            expire_tool_calls: 0,
            fail_reinitialize: false,
            payment_required: None,
            event_stream: false,
            omit_session_header: false,
            required_token: None,
            tool_delay: None,
            fail_tools_list: false,
        }
    }
}

/// Request counters observed by the mock.
#[derive(Debug, Default)]
pub struct MockCounters {
    initialize: AtomicUsize,
    notifications: AtomicUsize,
    tools_list: AtomicUsize,
    tools_call: AtomicUsize,
}

impl MockCounters {
    pub fn initialize(&self) -> usize {
        self.initialize.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }

    pub fn tools_list(&self) -> usize {
        self.tools_list.load(Ordering::SeqCst)
    }

    pub fn tools_call(&self) -> usize {
        self.tools_call.load(Ordering::SeqCst)
    }
}

struct MockState {
    behavior: MockBehavior,
    counters: Arc<MockCounters>,
    remaining_expiries: AtomicUsize,
    session: Mutex<Option<String>>,
    seen_sessions: Mutex<Vec<Option<String>>>,
}

impl MockState {
    fn current_session(&self) -> Option<String> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_session(&self, session: Option<String>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

/// Builder for the mock server.
#[derive(Debug, Clone, Default)]
pub struct MockMcpServer {
    behavior: MockBehavior,
}

impl MockMcpServer {
    pub fn new(behavior: MockBehavior) -> Self {
        Self { behavior }
    }

    /// Bind to an ephemeral localhost port and start serving.
    pub async fn start(self) -> std::io::Result<RunningMockServer> {
        let counters = Arc::new(MockCounters::default());
        let path = self.behavior.path.clone();
        let state = Arc::new(MockState {
            remaining_expiries: AtomicUsize::new(self.behavior.expire_tool_calls),
            behavior: self.behavior,
            counters: Arc::clone(&counters),
            session: Mutex::new(None),
            seen_sessions: Mutex::new(Vec::new()),
        });

        let router = Router::new().route(&path, post(handle_rpc)).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let cancellation_token = CancellationToken::new();

        let server_handle = tokio::spawn({
            let shutdown = cancellation_token.child_token();
            async move {
                let _ = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown.cancelled().await;
                    })
                    .await;
            }
        });

        Ok(RunningMockServer {
            address,
            path,
            counters,
            state,
            cancellation_token,
            server_handle,
        })
    }
}

/// Handle to a running mock server.
pub struct RunningMockServer {
    address: SocketAddr,
    path: String,
    counters: Arc<MockCounters>,
    state: Arc<MockState>,
    cancellation_token: CancellationToken,
    server_handle: JoinHandle<()>,
}

impl RunningMockServer {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Full MCP endpoint URL.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.address, self.path)
    }

    pub fn counters(&self) -> &MockCounters {
        &self.counters
    }

    /// Session ids presented on each `tools/call`, in arrival order.
    pub fn seen_sessions(&self) -> Vec<Option<String>> {
        self.state.seen_sessions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Forget the current session so the next request is rejected as expired.
    pub fn expire_session(&self) {
        self.state.set_session(None);
    }

    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        let _ = self.server_handle.await;
    }
}

async fn handle_rpc(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    let Ok(request) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

    if let Some(token) = &state.behavior.required_token {
        let expected = format!("Bearer {token}");
        let presented = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_str()) {
            return rpc_error(&state, StatusCode::UNAUTHORIZED, id, -32001, "UNAUTHORIZED: missing or invalid bearer token");
        }
    }

    let presented_session = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match method {
        METHOD_INITIALIZE => {
            let count = state.counters.initialize.fetch_add(1, Ordering::SeqCst) + 1;
            if count > 1 && state.behavior.fail_reinitialize {
                return rpc_error(&state, StatusCode::INTERNAL_SERVER_ERROR, id, -32603, "initialize refused");
            }
            let session = format!("session-{count}");
            state.set_session(Some(session.clone()));
            let mut response = rpc_result(
                &state,
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mock", "version": "0.0.0"},
                }),
            );
            if !state.behavior.omit_session_header
                && let Ok(value) = HeaderValue::from_str(&session)
            {
                response.headers_mut().insert(HeaderName::from_static("mcp-session-id"), value);
            }
            response
        }
        METHOD_NOTIFICATIONS_INITIALIZED => {
            state.counters.notifications.fetch_add(1, Ordering::SeqCst);
            StatusCode::ACCEPTED.into_response()
        }
        METHOD_TOOLS_LIST => {
            state.counters.tools_list.fetch_add(1, Ordering::SeqCst);
            if !session_valid(&state, presented_session.as_deref()) {
                return session_not_found(&state, id);
            }
            if state.behavior.fail_tools_list {
                return rpc_error(&state, StatusCode::INTERNAL_SERVER_ERROR, id, -32603, "tool registry unavailable");
            }
            rpc_result(&state, id, json!({"tools": state.behavior.tools}))
        }
        METHOD_TOOLS_CALL => {
            state.counters.tools_call.fetch_add(1, Ordering::SeqCst);
            state
                .seen_sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(presented_session.clone());

            if let Some(challenge) = &state.behavior.payment_required {
                return payment_required(&state, id, challenge);
            }
            let expire = state
                .remaining_expiries
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if expire {
                state.set_session(None);
            }
            if expire || !session_valid(&state, presented_session.as_deref()) {
                return session_not_found(&state, id);
            }
            if let Some(delay) = state.behavior.tool_delay {
                tokio::time::sleep(delay).await;
            }

            let name = request.pointer("/params/name").cloned().unwrap_or(Value::Null);
            let arguments = request.pointer("/params/arguments").cloned().unwrap_or_else(|| json!({}));
            let text = format!("called {}", name.as_str().unwrap_or_default());
            rpc_result(
                &state,
                id,
                json!({
                    "content": [{"type": "text", "text": text}],
                    "structuredContent": {"tool": name, "arguments": arguments},
                    "isError": false,
                }),
            )
        }
        _ => rpc_error(&state, StatusCode::BAD_REQUEST, id, -32601, "method not found"),
    }
}

fn session_valid(state: &MockState, presented: Option<&str>) -> bool {
    match (state.current_session(), presented) {
        (Some(current), Some(presented)) => current == presented,
        _ => false,
    }
}

fn session_not_found(state: &MockState, id: Value) -> Response {
    rpc_error(state, StatusCode::NOT_FOUND, id, -32001, "session not found")
}

fn payment_required(state: &MockState, id: Value, challenge: &str) -> Response {
    let mut response = rpc_error(state, StatusCode::PAYMENT_REQUIRED, id, -32000, "request blocked");
    if let Ok(value) = HeaderValue::from_str(challenge)
        && let Ok(name) = HeaderName::from_bytes(PAYMENT_REQUIRED_HEADER.as_bytes())
    {
        response.headers_mut().insert(name, value);
    }
    response
}

fn rpc_result(state: &MockState, id: Value, result: Value) -> Response {
    envelope_response(state, StatusCode::OK, json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

fn rpc_error(state: &MockState, status: StatusCode, id: Value, code: i64, message: &str) -> Response {
    envelope_response(
        state,
        status,
        json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}),
    )
}

fn envelope_response(state: &MockState, status: StatusCode, envelope: Value) -> Response {
    if state.behavior.event_stream {
        let body = format!("event: message\ndata: {envelope}\n\n");
        (status, [(CONTENT_TYPE, "text/event-stream")], body).into_response()
    } else {
        (status, [(CONTENT_TYPE, "application/json")], envelope.to_string()).into_response()
    }
}
