//! JSON-RPC 2.0 handling for one authenticated MCP connection.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use spacebridge_core::Session;
use spacebridge_core::auth::token_fingerprint;

use crate::jira::JiraClient;
use crate::tools::{self, ToolCallResult};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const MCP_SERVER_NAME: &str = "multi-space-jira";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

/// Answers MCP requests on behalf of a single session. Cloned into every
/// per-message task.
#[derive(Debug, Clone)]
pub struct McpDispatcher {
    session: Arc<Session>,
    jira: JiraClient,
}

impl McpDispatcher {
    pub fn new(session: Arc<Session>, jira: JiraClient) -> Self {
        Self { session, jira }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Handle one inbound payload, single message or batch. Returns the
    /// responses to push back; notifications contribute nothing.
    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        // Client responses carry no method; this server never issues requests.
        let method = obj.get("method").and_then(Value::as_str)?;

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let id = obj.get("id").cloned()?;
        Some(match self.handle_request(method, params).await {
            Ok(payload) => success_response(id, payload),
            Err(err) => error_response(id, err),
        })
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let started = std::time::Instant::now();
        let result = match tools::call_tool(&self.jira, &self.session, name, &args).await {
            Ok(result) => {
                tracing::info!(
                    event = "tool_call",
                    tool = name,
                    session = %token_fingerprint(&self.session.session_token),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call completed"
                );
                result
            }
            Err(err) => {
                tracing::warn!(
                    event = "tool_call_failed",
                    tool = name,
                    session = %token_fingerprint(&self.session.session_token),
                    code = err.code(),
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call failed"
                );
                ToolCallResult::from_error(&err)
            }
        };
        Ok(result.to_value())
    }
}

pub fn initialize_payload() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

pub fn tools_list_payload() -> Value {
    json!({ "tools": tools::tool_descriptors() })
}
