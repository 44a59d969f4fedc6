//! MCP Protocol Handler
//!
//! JSON-RPC 2.0 over stdio. Exposes the seven registry operations as MCP
//! tools; the handlers here only parse parameters and serialize responses,
//! all behavior lives in [`crate::registry`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::models::{ForkRequest, ToolSubmission, UsageReport};
use crate::registry::Registry;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const TOOL_EXECUTION_ERROR: i32 = -32001;
}

/// MCP server exposing the registry over stdio.
pub struct RpcServer {
    registry: Arc<Registry>,
}

impl RpcServer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Read newline-delimited requests from stdin until EOF.
    pub async fn run(&self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        info!("rpc server ready, waiting for requests");

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                info!("client disconnected (EOF)");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!("← {}", trimmed);

            let response = match serde_json::from_str::<RpcRequest>(trimmed) {
                Ok(request) => {
                    if request.id.is_none() && request.method.starts_with("notifications/") {
                        continue;
                    }
                    self.handle_request(request).await
                }
                Err(e) => {
                    error!("parse error: {}", e);
                    RpcResponse::error(None, error_codes::PARSE_ERROR, format!("Parse error: {e}"))
                }
            };

            let response_json = serde_json::to_string(&response)?;
            debug!("→ {}", response_json);
            stdout.write_all(response_json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }

    async fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        match request.method.as_str() {
            "initialize" => handle_initialize(request.id),
            "shutdown" => {
                info!("shutdown requested");
                RpcResponse::success(request.id, serde_json::json!({}))
            }
            "ping" => RpcResponse::success(request.id, serde_json::json!({})),
            "tools/list" => {
                RpcResponse::success(request.id, serde_json::json!({ "tools": tool_definitions() }))
            }
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            method => {
                warn!("unknown method: {}", method);
                RpcResponse::error(
                    request.id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                )
            }
        }
    }

    async fn handle_tools_call(
        &self,
        id: Option<serde_json::Value>,
        params: serde_json::Value,
    ) -> RpcResponse {
        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return RpcResponse::error(id, error_codes::INVALID_PARAMS, "Missing 'name' parameter");
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::json!({}));

        match self.dispatch(name, arguments).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result)
                    .unwrap_or_else(|_| result.to_string());
                RpcResponse::success(
                    id,
                    serde_json::json!({
                        "content": [{ "type": "text", "text": text }]
                    }),
                )
            }
            Err(e) => RpcResponse::error(
                id,
                error_codes::TOOL_EXECUTION_ERROR,
                format!("Tool '{name}' failed: {e}"),
            ),
        }
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        match name {
            "submit_tool" => {
                let submission: ToolSubmission = serde_json::from_value(arguments)?;
                self.registry.submit_tool(submission).await
            }
            "fork_tool" => {
                let request: ForkRequest = serde_json::from_value(arguments)?;
                self.registry.fork_tool(request).await
            }
            "discover_tool" => {
                let query = arguments
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("missing 'query'"))?;
                let max_results = arguments
                    .get("max_results")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(5) as usize;
                self.registry.discover_tool(query, max_results).await
            }
            "get_tool" => {
                let tool_id = arguments
                    .get("tool_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("missing 'tool_id'"))?;
                self.registry.get_tool(tool_id).await
            }
            "list_available_tools" => {
                let limit = arguments
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(20) as usize;
                self.registry.list_available_tools(limit).await
            }
            "report_usage" => {
                let report: UsageReport = serde_json::from_value(arguments)?;
                self.registry.report_usage(report).await
            }
            "get_recipe" => {
                let limit = arguments
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(10) as usize;
                self.registry.get_recipe(limit).await
            }
            _ => Err(anyhow::anyhow!("unknown tool: {name}")),
        }
    }
}

fn handle_initialize(id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": "agentforge",
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
    )
}

/// The MCP tool surface. Input schemas mirror the submission and report
/// model types.
fn tool_definitions() -> serde_json::Value {
    serde_json::json!([
        {
            "name": "submit_tool",
            "description": "Submit a new tool. It is verified in a sandbox before becoming available to other agents.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Source code of the tool function" },
                    "description": { "type": "string", "description": "What this tool does" },
                    "test_case": { "type": "string", "description": "Code that tests the tool (use assert)" },
                    "dependencies": { "type": "array", "items": { "type": "string" }, "default": [] },
                    "tags": { "type": "array", "items": { "type": "string" }, "default": [] },
                    "author_agent_id": { "type": "string", "default": "anonymous" }
                },
                "required": ["code", "description", "test_case"]
            }
        },
        {
            "name": "fork_tool",
            "description": "Fork an existing tool into an improved version with provenance back to the original.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "parent_tool_id": { "type": "string" },
                    "code": { "type": "string" },
                    "description": { "type": "string" },
                    "test_case": { "type": "string" },
                    "reason": { "type": "string", "default": "" },
                    "author_agent_id": { "type": "string", "default": "anonymous" }
                },
                "required": ["parent_tool_id", "code", "description", "test_case"]
            }
        },
        {
            "name": "discover_tool",
            "description": "Search for tools by describing what you need in natural language.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "max_results": { "type": "integer", "default": 5 }
                },
                "required": ["query"]
            }
        },
        {
            "name": "get_tool",
            "description": "Get full details of a specific tool by id, including its provenance chain.",
            "inputSchema": {
                "type": "object",
                "properties": { "tool_id": { "type": "string" } },
                "required": ["tool_id"]
            }
        },
        {
            "name": "list_available_tools",
            "description": "List active tools ordered by fitness score.",
            "inputSchema": {
                "type": "object",
                "properties": { "limit": { "type": "integer", "default": 20 } }
            }
        },
        {
            "name": "report_usage",
            "description": "Report the outcome of using a tool. Feeds fitness scoring and trust promotion.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string" },
                    "success": { "type": "boolean" },
                    "execution_time_ms": { "type": "number", "default": 0 },
                    "error_message": { "type": "string", "default": "" },
                    "feedback": { "type": "string", "default": "" },
                    "agent_id": { "type": "string", "default": "anonymous" }
                },
                "required": ["tool_id", "success"]
            }
        },
        {
            "name": "get_recipe",
            "description": "List pre-verified tool chains (recipes) for multi-step tasks.",
            "inputSchema": {
                "type": "object",
                "properties": { "limit": { "type": "integer", "default": 10 } }
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;

    fn server() -> RpcServer {
        RpcServer::new(Arc::new(Registry::in_memory(RegistryConfig::default()).unwrap()))
    }

    fn request(method: &str, params: serde_json::Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(serde_json::json!(1)),
        }
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let response = server()
            .handle_request(request("initialize", serde_json::json!({})))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "agentforge");
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn tools_list_exposes_all_seven_operations() {
        let response = server()
            .handle_request(request("tools/list", serde_json::json!({})))
            .await;
        let tools = response.result.unwrap()["tools"].clone();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "submit_tool",
                "fork_tool",
                "discover_tool",
                "get_tool",
                "list_available_tools",
                "report_usage",
                "get_recipe"
            ]
        );
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let response = server()
            .handle_request(request("no/such", serde_json::json!({})))
            .await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn tools_call_requires_name() {
        let response = server()
            .handle_request(request("tools/call", serde_json::json!({})))
            .await;
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_tool_is_execution_error() {
        let response = server()
            .handle_request(request(
                "tools/call",
                serde_json::json!({ "name": "frobnicate", "arguments": {} }),
            ))
            .await;
        assert_eq!(
            response.error.unwrap().code,
            error_codes::TOOL_EXECUTION_ERROR
        );
    }

    #[tokio::test]
    async fn list_available_tools_round_trips_through_rpc() {
        let response = server()
            .handle_request(request(
                "tools/call",
                serde_json::json!({ "name": "list_available_tools", "arguments": {} }),
            ))
            .await;
        let result = response.result.unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        let body: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn submit_rejection_flows_through_rpc_as_success_payload() {
        let response = server()
            .handle_request(request(
                "tools/call",
                serde_json::json!({
                    "name": "submit_tool",
                    "arguments": {
                        "code": "import socket\ndef f(): pass",
                        "description": "d",
                        "test_case": "f()"
                    }
                }),
            ))
            .await;
        let result = response.result.unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        let body: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["reason"], "security_scan_failed");
    }
}
