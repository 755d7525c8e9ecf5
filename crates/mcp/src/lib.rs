//! JSON-RPC capability (MCP) client for the beacon CLI.
//!
//! This crate provides the protocol client (stdio and streamable HTTP transports,
//! session handling with bounded recovery), backend error canonicalization,
//! capability manifests and the CLI configuration layer.

pub mod canonical;
pub mod client;
pub mod config;
pub mod context;
pub mod errors;
pub mod manifest;
pub mod payment;
pub mod protocol;
#[cfg(feature = "testing")]
pub mod testing;

pub use canonical::{
    CanonicalCode, actionable_message_for_code, canonical_code_from_error, canonical_code_from_text, hint_for_error,
};
pub use client::{ContentItem, Exchange, JsonMap, McpClient, McpClientOptions, Tool, ToolCallResult, TransportKind};
pub use config::{BeaconConfig, ConfigError};
pub use context::{CallContext, ContextError};
pub use errors::{McpError, RpcError};
pub use manifest::{CapabilityManifest, build_capability_manifest, render_manifest_human, render_manifest_json};
pub use payment::{PaymentChallenge, PaymentRequirement};
