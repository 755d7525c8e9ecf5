//! Streamable HTTP transport: one POST per JSON-RPC message.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use serde_json::Value;

use super::envelope::{self, JsonMap};
use super::transport::{Exchange, OutboundCall};
use crate::context::CallContext;
use crate::errors::{McpError, RpcError};
use crate::payment::PaymentChallenge;
use crate::protocol::{
    PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER, SESSION_HEADER,
};

/// Default per-request timeout for the HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

const PAYMENT_REQUIRED_CODE: i64 = -32000;

pub(crate) struct HttpTransport {
    endpoint: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self, McpError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.trim().to_string(),
            auth_token: auth_token.filter(|token| !token.trim().is_empty()),
            http,
        })
    }

    pub async fn call(&self, ctx: &CallContext, call: OutboundCall<'_>) -> Result<Exchange, McpError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(ACCEPT, "application/json, text/event-stream")
            .body(call.payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(session_id) = call.session_id.filter(|id| !id.is_empty()) {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = ctx.run(request.send()).await??;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = ctx.run(response.bytes()).await??;

        let body = decode_response(status, &headers, &bytes)?;
        Ok(Exchange {
            body,
            status: status.as_u16(),
            headers,
        })
    }
}

/// Turn a raw HTTP response into an envelope map or a structured error.
pub(crate) fn decode_response(status: StatusCode, headers: &HeaderMap, bytes: &[u8]) -> Result<JsonMap, McpError> {
    let payment_header = header_value(headers, PAYMENT_REQUIRED_HEADER);
    let payment_required = payment_header.as_deref().and_then(PaymentChallenge::parse);
    let structured = |code: i64, message: String| RpcError {
        code,
        message,
        http_status: Some(status.as_u16()),
        headers: flatten_headers(headers),
        payment_required: payment_required.clone(),
        payment_required_present: payment_header.is_some(),
        payment_response: header_value(headers, PAYMENT_RESPONSE_HEADER),
    };

    if status == StatusCode::PAYMENT_REQUIRED {
        return Err(structured(PAYMENT_REQUIRED_CODE, "payment required".to_string()).into());
    }

    let text = String::from_utf8_lossy(bytes);
    let payload = if is_event_stream(headers) {
        last_event_data(&text).unwrap_or_default()
    } else {
        text.into_owned()
    };
    if payload.trim().is_empty() {
        return Ok(JsonMap::new());
    }

    let parsed = match serde_json::from_str::<Value>(&payload) {
        Ok(Value::Object(body)) => Ok(body),
        Ok(_) => Err(McpError::invalid_response("response is not a JSON object")),
        Err(error) => Err(McpError::Json(error)),
    };
    let body = match parsed {
        Ok(body) => body,
        Err(_) if !status.is_success() => {
            let trimmed = payload.trim();
            let detail = if trimmed.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                trimmed.to_string()
            };
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                body: detail,
            });
        }
        Err(error) => return Err(error),
    };

    if let Some(error) = envelope::rpc_error(&body) {
        return Err(structured(error.code, error.message).into());
    }
    Ok(body)
}

/// Trimmed header value, `None` when absent or blank. Lookup is case-insensitive.
pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let joined = headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Flatten headers to one comma-joined value per lowercase name.
pub(crate) fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flattened = BTreeMap::new();
    for name in headers.keys() {
        if let Some(value) = header_value(headers, name.as_str()) {
            flattened.insert(name.as_str().to_string(), value);
        }
    }
    flattened
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().to_ascii_lowercase().starts_with("text/event-stream"))
}

/// Payload of the last non-empty SSE event; multi-line `data:` fields are joined with newlines.
fn last_event_data(stream: &str) -> Option<String> {
    let mut last = None;
    let mut current: Vec<&str> = Vec::new();
    for line in stream.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                last = Some(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    last
}
