//! MCP client subsystem: transports, call engine and session management.

mod client;
mod envelope;
mod http;
mod stdio;
mod tools;
mod transport;

pub use client::{McpClient, McpClientOptions};
pub use envelope::JsonMap;
pub use http::DEFAULT_REQUEST_TIMEOUT;
pub use tools::{ContentItem, Tool, ToolCallResult};
pub use transport::{Exchange, TransportKind};
