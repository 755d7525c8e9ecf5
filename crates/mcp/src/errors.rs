//! Error types for the MCP client.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::context::ContextError;
use crate::payment::PaymentChallenge;

const HTTP_PAYMENT_REQUIRED: u16 = 402;

/// Structured JSON-RPC error returned by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    /// HTTP status of the response that carried the error; `None` over stdio.
    pub http_status: Option<u16>,
    /// Response headers, one comma-joined value per lowercase name.
    pub headers: BTreeMap<String, String>,
    pub payment_required: Option<PaymentChallenge>,
    pub payment_required_present: bool,
    pub payment_response: Option<String>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ..Default::default()
        }
    }

    /// True only for HTTP 402 responses that carry payment metadata.
    pub fn is_payment_required(&self) -> bool {
        if self.http_status != Some(HTTP_PAYMENT_REQUIRED) {
            return false;
        }
        self.payment_required_present
            || self.payment_required.is_some()
            || self.payment_response.as_deref().is_some_and(|value| !value.trim().is_empty())
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.http_status {
            Some(status) if status > 0 => {
                write!(f, "json-rpc error {}: {} (http {status})", self.code, self.message)
            }
            _ => write!(f, "json-rpc error {}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for RpcError {}

/// Main error type for MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stdio framing error: {message}")]
    Framing { message: String },

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("{message}")]
    Handshake { message: String },

    #[error("{message}")]
    InvalidResponse { message: String },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{original} (session recovery failed: {recovery})")]
    SessionRecovery {
        #[source]
        original: Box<McpError>,
        recovery: Box<McpError>,
    },

    #[error("unsupported transport {transport:?}")]
    UnsupportedTransport { transport: String },

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl McpError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing { message: message.into() }
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake { message: message.into() }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse { message: message.into() }
    }

    pub fn session_recovery(original: McpError, recovery: McpError) -> Self {
        Self::SessionRecovery {
            original: Box::new(original),
            recovery: Box::new(recovery),
        }
    }

    /// The structured RPC error behind this error, looking through recovery wrappers.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(rpc) => Some(rpc),
            Self::SessionRecovery { original, .. } => original.rpc_error(),
            _ => None,
        }
    }

    /// True when the operation stopped because its context was cancelled or expired.
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Context(_))
    }
}
