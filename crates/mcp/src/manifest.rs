//! Capability manifest: a sorted snapshot of what a connected backend offers.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use beacon_util::or_unknown;

use crate::client::McpClient;
use crate::context::CallContext;
use crate::errors::McpError;
use crate::protocol::PROTOCOL_VERSION;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub has_schema: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointManifest {
    pub endpoint: String,
    pub transport: String,
    pub protocol_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    pub generated_at: DateTime<Utc>,
    pub endpoint: EndpointManifest,
    pub tools: Vec<ToolManifest>,
}

/// List the client's tools and describe the connection they came from.
pub async fn build_capability_manifest(ctx: &CallContext, client: &McpClient) -> Result<CapabilityManifest, McpError> {
    let mut tools: Vec<ToolManifest> = client
        .list_tools(ctx)
        .await?
        .into_iter()
        .map(|tool| ToolManifest {
            name: tool.name,
            description: tool.description.trim().to_string(),
            has_schema: !tool.input_schema.is_empty(),
        })
        .collect();
    tools.sort_by(|left, right| left.name.cmp(&right.name));

    Ok(CapabilityManifest {
        generated_at: Utc::now(),
        endpoint: EndpointManifest {
            endpoint: client.display_endpoint(),
            transport: client.transport_kind().to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            session_id: client.session_id().unwrap_or_default(),
        },
        tools,
    })
}

pub fn render_manifest_human(manifest: &CapabilityManifest) -> String {
    let mut out = String::new();
    let endpoint = &manifest.endpoint;
    let _ = writeln!(out, "Generated: {}", manifest.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true));
    let _ = writeln!(out, "Endpoint: {}", or_unknown(&endpoint.endpoint));
    let _ = writeln!(out, "Transport: {}", or_unknown(&endpoint.transport));
    let _ = writeln!(out, "Protocol: {}", or_unknown(&endpoint.protocol_version));
    let _ = writeln!(out, "Session: {}", or_unknown(&endpoint.session_id));
    let _ = writeln!(out, "Tools ({}):", manifest.tools.len());
    for tool in &manifest.tools {
        let description = match tool.description.trim() {
            "" => "(no description)",
            text => text,
        };
        let schema = if tool.has_schema { "yes" } else { "no" };
        let _ = writeln!(out, "- {}\n  schema: {schema}\n  description: {description}", tool.name);
    }
    out.trim().to_string()
}

pub fn render_manifest_json(manifest: &CapabilityManifest) -> Result<String, McpError> {
    Ok(serde_json::to_string_pretty(manifest)?)
}
