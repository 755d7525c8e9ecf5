//! Transport selection and the call-shaped contract shared by both strategies.

use std::fmt;
use std::str::FromStr;

use reqwest::header::HeaderMap;

use super::envelope::JsonMap;
use super::http::HttpTransport;
use super::stdio::StdioTransport;
use crate::context::CallContext;
use crate::errors::McpError;

/// Which wire strategy a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    StreamableHttp,
    Stdio,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::StreamableHttp => "streamable-http",
            TransportKind::Stdio => "stdio",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = McpError;

    /// Case-insensitive; empty input selects streamable HTTP.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "streamable-http" => Ok(TransportKind::StreamableHttp),
            "stdio" => Ok(TransportKind::Stdio),
            other => Err(McpError::UnsupportedTransport {
                transport: other.to_string(),
            }),
        }
    }
}

/// Result of one request/response cycle.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub body: JsonMap,
    pub status: u16,
    pub headers: HeaderMap,
}

/// A serialized envelope ready for the wire.
pub(crate) struct OutboundCall<'a> {
    pub id: Option<u64>,
    pub method: &'a str,
    pub payload: Vec<u8>,
    pub session_id: Option<&'a str>,
}

pub(crate) enum Transport {
    Http(HttpTransport),
    Stdio(StdioTransport),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Http(_) => TransportKind::StreamableHttp,
            Transport::Stdio(_) => TransportKind::Stdio,
        }
    }

    /// Make sure the transport can carry a handshake; spawns the stdio child if needed.
    pub async fn prepare(&self) -> Result<(), McpError> {
        match self {
            Transport::Http(_) => Ok(()),
            Transport::Stdio(stdio) => stdio.ensure_started().await,
        }
    }

    pub async fn call(&self, ctx: &CallContext, call: OutboundCall<'_>) -> Result<Exchange, McpError> {
        match self {
            Transport::Http(http) => http.call(ctx, call).await,
            Transport::Stdio(stdio) => stdio.call(ctx, call).await,
        }
    }

    pub async fn close(&self) -> Result<(), McpError> {
        match self {
            Transport::Http(_) => Ok(()),
            Transport::Stdio(stdio) => stdio.close().await,
        }
    }
}
