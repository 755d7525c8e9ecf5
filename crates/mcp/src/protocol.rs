//! Wire constants for the capability server dialect.

/// Protocol revision announced during `initialize` and on every HTTP request.
pub const PROTOCOL_VERSION: &str = "2025-11-25";

/// Header carrying the negotiated session id.
pub const SESSION_HEADER: &str = "MCP-Session-Id";

/// Header carrying the protocol revision.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Payment challenge header attached to HTTP 402 responses.
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// Payment settlement echo header.
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";

/// Environment variable holding the bearer token for the backend.
pub const AUTH_TOKEN_ENV: &str = "DIR2MCP_AUTH_TOKEN";

/// Session id used for the stdio transport, where the subprocess is the session.
pub const STDIO_SESSION_ID: &str = "stdio";

/// Backend binary launched when a stdio command line is empty.
pub const DEFAULT_BACKEND_BINARY: &str = "dir2mcp";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_NOTIFICATIONS_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Client identity reported in `initialize`.
pub const CLIENT_NAME: &str = "beacon";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
