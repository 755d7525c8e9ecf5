//! JSON-RPC 2.0 request encoding and response envelope inspection.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{McpError, RpcError};

/// A JSON object as returned by the backend.
pub type JsonMap = Map<String, Value>;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "params_empty")]
    params: &'a JsonMap,
}

fn params_empty(params: &&JsonMap) -> bool {
    params.is_empty()
}

/// Serialize a request; notifications pass `id = None`.
pub(crate) fn encode_request(id: Option<u64>, method: &str, params: &JsonMap) -> Result<Vec<u8>, McpError> {
    let request = RpcRequest {
        jsonrpc: "2.0",
        id,
        method,
        params,
    };
    Ok(serde_json::to_vec(&request)?)
}

pub(crate) fn matches_id(body: &JsonMap, id: u64) -> bool {
    body.get("id").and_then(Value::as_u64) == Some(id)
}

/// Extract the top-level `error` member, if the envelope carries one.
pub(crate) fn rpc_error(body: &JsonMap) -> Option<RpcError> {
    let error = body.get("error")?.as_object()?;
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
    Some(RpcError::new(code, message))
}

/// The `result` object of a successful envelope.
pub(crate) fn result_object<'a>(body: &'a JsonMap, method: &str) -> Result<&'a JsonMap, McpError> {
    body.get("result")
        .and_then(Value::as_object)
        .ok_or_else(|| McpError::invalid_response(format!("invalid {method} result")))
}

pub(crate) fn str_field<'a>(object: &'a JsonMap, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or_default()
}

pub(crate) fn object_field(object: &JsonMap, key: &str) -> JsonMap {
    object.get(key).and_then(Value::as_object).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notifications_omit_id_and_empty_params() {
        let bytes = encode_request(None, "notifications/initialized", &JsonMap::new()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    }

    #[test]
    fn requests_carry_id_and_params() {
        let params = json!({"name": "search"}).as_object().cloned().unwrap();
        let bytes = encode_request(Some(3), "tools/call", &params).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], json!(3));
        assert_eq!(value["params"]["name"], json!("search"));
    }

    #[test]
    fn error_member_becomes_rpc_error() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no such method"}});
        let error = rpc_error(body.as_object().unwrap()).unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "no such method");

        let ok = json!({"jsonrpc": "2.0", "id": 1, "error": null, "result": {}});
        assert!(rpc_error(ok.as_object().unwrap()).is_none());
    }

    #[test]
    fn id_matching_ignores_server_messages() {
        let body = json!({"jsonrpc": "2.0", "method": "notifications/progress"});
        assert!(!matches_id(body.as_object().unwrap(), 1));
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        assert!(matches_id(body.as_object().unwrap(), 1));
    }
}
