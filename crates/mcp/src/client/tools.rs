//! Tool listing and tool-call result types.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::{self, JsonMap};
use crate::errors::McpError;
use crate::protocol::{METHOD_TOOLS_CALL, METHOD_TOOLS_LIST};

/// A tool advertised by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

/// Outcome of `tools/call`, plus transport metadata for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ContentItem>,
    pub structured_content: JsonMap,
    pub is_error: bool,
    #[serde(skip)]
    pub raw: JsonMap,
    #[serde(skip)]
    pub elapsed: Duration,
    #[serde(skip)]
    pub http_status: u16,
    #[serde(skip)]
    pub headers: BTreeMap<String, String>,
}

impl ToolCallResult {
    /// Concatenated text content items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|item| item.kind == "text")
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub(crate) fn parse_tool_list(body: &JsonMap) -> Result<Vec<Tool>, McpError> {
    let result = envelope::result_object(body, METHOD_TOOLS_LIST)?;
    let items = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| McpError::invalid_response(format!("invalid {METHOD_TOOLS_LIST} payload")))?;

    Ok(items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| Tool {
            name: envelope::str_field(item, "name").to_string(),
            description: envelope::str_field(item, "description").to_string(),
            input_schema: envelope::object_field(item, "inputSchema"),
        })
        .collect())
}

pub(crate) fn parse_tool_call(body: JsonMap) -> Result<ToolCallResult, McpError> {
    let result = envelope::result_object(&body, METHOD_TOOLS_CALL)?;
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|item| ContentItem {
                    kind: envelope::str_field(item, "type").to_string(),
                    text: envelope::str_field(item, "text").to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    let structured_content = envelope::object_field(result, "structuredContent");
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);

    Ok(ToolCallResult {
        content,
        structured_content,
        is_error,
        raw: body,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn tool_list_skips_non_object_items() {
        let body = map(json!({"result": {"tools": [
            {"name": "search", "description": "find", "inputSchema": {"type": "object"}},
            "junk",
            {"name": "stats"}
        ]}}));
        let tools = parse_tool_list(&body).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].input_schema["type"], json!("object"));
        assert_eq!(tools[1].description, "");
    }

    #[test]
    fn tool_list_requires_array() {
        let body = map(json!({"result": {"tools": {}}}));
        assert_eq!(parse_tool_list(&body).unwrap_err().to_string(), "invalid tools/list payload");
        let body = map(json!({"result": 1}));
        assert_eq!(parse_tool_list(&body).unwrap_err().to_string(), "invalid tools/list result");
    }

    #[test]
    fn tool_call_extracts_content_and_flags() {
        let body = map(json!({"result": {
            "content": [{"type": "text", "text": "hello"}, {"type": "image"}],
            "structuredContent": {"hits": 3},
            "isError": true
        }}));
        let result = parse_tool_call(body).unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "hello");
        assert_eq!(result.structured_content["hits"], json!(3));
        assert!(result.raw.contains_key("result"));
    }
}
