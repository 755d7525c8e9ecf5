//! McpClient: session lifecycle, request ids and single-shot session recovery.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use beacon_util::{sanitize_endpoint, sanitize_target};

use super::envelope::{self, JsonMap};
use super::http::{DEFAULT_REQUEST_TIMEOUT, HttpTransport, flatten_headers, header_value};
use super::stdio::StdioTransport;
use super::tools::{Tool, ToolCallResult, parse_tool_call, parse_tool_list};
use super::transport::{Exchange, OutboundCall, Transport, TransportKind};
use crate::canonical::{CanonicalCode, canonical_code_from_error};
use crate::context::CallContext;
use crate::errors::McpError;
use crate::protocol::{
    AUTH_TOKEN_ENV, CLIENT_NAME, CLIENT_VERSION, METHOD_INITIALIZE, METHOD_NOTIFICATIONS_INITIALIZED,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PROTOCOL_VERSION, SESSION_HEADER, STDIO_SESSION_ID,
};

/// Construction options for [`McpClient`].
#[derive(Debug, Clone)]
pub struct McpClientOptions {
    /// Bearer token for HTTP; defaults to `DIR2MCP_AUTH_TOKEN`.
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    /// Log protocol traffic at info level instead of debug.
    pub verbose: bool,
}

impl Default for McpClientOptions {
    fn default() -> Self {
        Self {
            auth_token: std::env::var(AUTH_TOKEN_ENV)
                .ok()
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            verbose: false,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    session_id: Option<String>,
    next_id: u64,
}

/// One logical connection to a capability backend.
///
/// Session id and request counter live behind a single mutex. The recovery gate is
/// held shared by ordinary calls and exclusively while a handshake runs, so no call
/// ever goes out with a half-recovered session.
pub struct McpClient {
    endpoint: String,
    transport: Transport,
    verbose: bool,
    state: Mutex<SessionState>,
    recovery: RwLock<()>,
}

impl McpClient {
    pub fn new(endpoint: &str, kind: TransportKind, verbose: bool) -> Result<Self, McpError> {
        Self::with_options(
            endpoint,
            kind,
            McpClientOptions {
                verbose,
                ..Default::default()
            },
        )
    }

    pub fn with_options(endpoint: &str, kind: TransportKind, options: McpClientOptions) -> Result<Self, McpError> {
        let endpoint = endpoint.trim().to_string();
        let transport = match kind {
            TransportKind::StreamableHttp => Transport::Http(HttpTransport::new(
                &endpoint,
                options.auth_token,
                options.request_timeout,
            )?),
            TransportKind::Stdio => Transport::Stdio(StdioTransport::new(&endpoint)),
        };
        Ok(Self {
            endpoint,
            transport,
            verbose: options.verbose,
            state: Mutex::new(SessionState {
                session_id: None,
                next_id: 1,
            }),
            recovery: RwLock::new(()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Endpoint safe for logs and manifests.
    pub fn display_endpoint(&self) -> String {
        match self.transport.kind() {
            TransportKind::StreamableHttp => sanitize_endpoint(&self.endpoint),
            TransportKind::Stdio => sanitize_target(&self.endpoint),
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Current session id, `None` until initialized.
    pub fn session_id(&self) -> Option<String> {
        self.state().session_id.clone()
    }

    /// Perform the handshake and acquire a session.
    pub async fn initialize(&self, ctx: &CallContext) -> Result<(), McpError> {
        let _gate = self.recovery.write().await;
        self.handshake(ctx).await
    }

    pub async fn list_tools(&self, ctx: &CallContext) -> Result<Vec<Tool>, McpError> {
        let exchange = self.request(ctx, METHOD_TOOLS_LIST, JsonMap::new()).await?;
        parse_tool_list(&exchange.body)
    }

    pub async fn call_tool(&self, ctx: &CallContext, name: &str, arguments: JsonMap) -> Result<ToolCallResult, McpError> {
        let mut params = JsonMap::new();
        params.insert("name".into(), Value::String(name.to_string()));
        params.insert("arguments".into(), Value::Object(arguments));

        let started = Instant::now();
        let exchange = self.request(ctx, METHOD_TOOLS_CALL, params).await?;
        let mut result = parse_tool_call(exchange.body)?;
        result.elapsed = started.elapsed();
        result.http_status = exchange.status;
        result.headers = flatten_headers(&exchange.headers);
        Ok(result)
    }

    /// Terminate any owned subprocess and forget the session.
    pub async fn close(&self) -> Result<(), McpError> {
        let _gate = self.recovery.write().await;
        self.state().session_id = None;
        self.transport.close().await
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller must hold the recovery gate exclusively.
    async fn handshake(&self, ctx: &CallContext) -> Result<(), McpError> {
        self.transport.prepare().await?;

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION},
        });
        let params = params.as_object().cloned().unwrap_or_default();
        let exchange = self.dispatch(ctx, METHOD_INITIALIZE, params, true).await?;
        if !is_success(exchange.status) {
            return Err(McpError::handshake(format!(
                "initialize failed with http status {}",
                exchange.status
            )));
        }

        let session_id = match self.transport.kind() {
            TransportKind::StreamableHttp => header_value(&exchange.headers, SESSION_HEADER)
                .ok_or_else(|| McpError::handshake(format!("initialize response missing {SESSION_HEADER}")))?,
            TransportKind::Stdio => STDIO_SESSION_ID.to_string(),
        };
        self.state().session_id = Some(session_id);

        let notified = self
            .dispatch(ctx, METHOD_NOTIFICATIONS_INITIALIZED, JsonMap::new(), false)
            .await
            .map_err(|error| McpError::handshake(format!("{METHOD_NOTIFICATIONS_INITIALIZED} failed: {error}")))
            .and_then(|exchange| {
                if exchange.status == 202 || is_success(exchange.status) {
                    Ok(())
                } else {
                    Err(McpError::handshake(format!(
                        "{METHOD_NOTIFICATIONS_INITIALIZED} returned status {}",
                        exchange.status
                    )))
                }
            });
        if let Err(error) = notified {
            self.state().session_id = None;
            return Err(error);
        }

        self.log(format_args!(
            "initialized {} session against {}",
            self.transport.kind(),
            self.display_endpoint()
        ));
        Ok(())
    }

    /// Send a request, recovering the session once if the backend reports it expired.
    async fn request(&self, ctx: &CallContext, method: &str, params: JsonMap) -> Result<Exchange, McpError> {
        let (used_session, outcome) = {
            let _gate = self.recovery.read().await;
            let used_session = self.session_id();
            let outcome = self.dispatch(ctx, method, params.clone(), true).await;
            (used_session, outcome)
        };

        let error = match outcome {
            Ok(exchange) => return Ok(exchange),
            Err(error) => error,
        };
        let Some(used_session) = used_session else {
            return Err(error);
        };
        if canonical_code_from_error(&error) != Some(CanonicalCode::SessionNotFound) {
            return Err(error);
        }

        self.log(format_args!(
            "{} received; recovering session and retrying {method} once",
            CanonicalCode::SessionNotFound
        ));
        self.recover_session(ctx, &used_session, error).await?;

        let _gate = self.recovery.read().await;
        let retried = self.dispatch(ctx, method, params, true).await;
        if let Err(error) = &retried {
            self.log(format_args!("{method} retry failed: {error}"));
        }
        retried
    }

    async fn recover_session(&self, ctx: &CallContext, expired: &str, original: McpError) -> Result<(), McpError> {
        let _gate = self.recovery.write().await;
        let previous = {
            let mut state = self.state();
            match state.session_id.clone() {
                Some(current) if current == expired => state.session_id.take(),
                Some(_) => {
                    debug!("session already replaced by a concurrent recovery");
                    return Ok(());
                }
                None => return Err(original),
            }
        };

        match self.handshake(ctx).await {
            Ok(()) => {
                self.log(format_args!("session recovery succeeded"));
                Ok(())
            }
            Err(recovery) => {
                warn!(error = %recovery, "session recovery failed");
                self.state().session_id = previous;
                Err(McpError::session_recovery(original, recovery))
            }
        }
    }

    /// Allocate an id (when a reply is expected), attach the session and hand off to the transport.
    async fn dispatch(
        &self,
        ctx: &CallContext,
        method: &str,
        params: JsonMap,
        expects_reply: bool,
    ) -> Result<Exchange, McpError> {
        let (id, session_id) = {
            let mut state = self.state();
            let id = expects_reply.then(|| {
                let id = state.next_id;
                state.next_id += 1;
                id
            });
            (id, state.session_id.clone())
        };
        let payload = envelope::encode_request(id, method, &params)?;

        self.log(format_args!("-> {method}"));
        let outcome = self
            .transport
            .call(
                ctx,
                OutboundCall {
                    id,
                    method,
                    payload,
                    session_id: session_id.as_deref(),
                },
            )
            .await;
        match &outcome {
            Ok(exchange) => self.log(format_args!("<- {method} ({})", exchange.status)),
            Err(error) => debug!(method, error = %error, "mcp call failed"),
        }
        outcome
    }

    fn log(&self, message: std::fmt::Arguments<'_>) {
        if self.verbose {
            info!(target: "beacon::mcp", "{message}");
        } else {
            debug!(target: "beacon::mcp", "{message}");
        }
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
