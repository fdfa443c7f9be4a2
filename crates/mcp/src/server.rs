use serde_json::{json, Value};
use std::sync::Arc;

use crate::tools::{tool_definitions, Dispatcher};
use crate::transport::{
    JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};

const SERVER_NAME: &str = "gsuite-tools-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    initialized: bool,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Handles one line of input. Notifications produce no output.
    pub fn handle_request(&mut self, input: &str) -> Option<String> {
        let request: JsonRpcRequest = match serde_json::from_str(input) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request");
                return encode(&JsonRpcResponse::error(None, PARSE_ERROR, "Parse error"));
            }
        };

        if request.jsonrpc.as_deref().is_some_and(|v| v != "2.0") {
            return encode(&JsonRpcResponse::error(
                request.id,
                INVALID_REQUEST,
                "Unsupported jsonrpc version",
            ));
        }

        tracing::debug!(method = %request.method, "request");
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(&request),
            "initialized" | "notifications/initialized" => {
                self.initialized = true;
                return None;
            }
            _ if request.is_notification() => return None,
            "tools/list" => {
                JsonRpcResponse::success(request.id.clone(), json!({ "tools": tool_definitions() }))
            }
            "tools/call" => self.handle_tools_call(&request),
            "ping" => JsonRpcResponse::success(request.id.clone(), json!({})),
            _ => JsonRpcResponse::error(
                request.id.clone(),
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };

        encode(&response)
    }

    fn handle_initialize(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(
            request.id.clone(),
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION
                }
            }),
        )
    }

    fn handle_tools_call(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let params = match &request.params {
            Some(p) => p,
            None => {
                return JsonRpcResponse::error(request.id.clone(), INVALID_PARAMS, "Missing params")
            }
        };

        let name = match params.get("name").and_then(Value::as_str) {
            Some(name) => name,
            None => {
                return JsonRpcResponse::error(
                    request.id.clone(),
                    INVALID_PARAMS,
                    "Missing tool name",
                )
            }
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let result = self.dispatcher.call_tool(name, arguments);
        JsonRpcResponse::success(request.id.clone(), result.into_content())
    }
}

fn encode(response: &JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!(error = %e, "cannot encode response");
            None
        }
    }
}
