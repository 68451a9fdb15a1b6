//! MCP server implementation for the customer tool registry.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::protocol::{
    McpRequest, McpResponse, Method, ServerCapabilities, ServerInfo, ToolCallParams,
    ToolCapabilities, PROTOCOL_VERSION,
};
use crate::store::Datastore;
use crate::tools::ToolRegistry;

/// MCP server exposing the tool registry over JSON-RPC.
pub struct McpServer {
    /// Tool registry.
    registry: Arc<ToolRegistry>,
    /// Server info.
    server_info: ServerInfo,
}

impl McpServer {
    /// Create a new MCP server.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            server_info: ServerInfo::default(),
        }
    }

    /// Create a server with every tool registered against `store`.
    pub fn with_store(store: Arc<dyn Datastore>) -> Self {
        Self::new(Arc::new(ToolRegistry::new(store)))
    }

    /// Tool registry served by this server.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Liveness payload. Touches nothing.
    pub fn health(&self) -> Value {
        json!({ "ok": true })
    }

    /// Run the server on stdio, one JSON-RPC message per line.
    pub async fn run_stdio(&self) -> Result<()> {
        info!("Starting MCP server on stdio");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            let Some(response) = self.handle_message(&line).await else {
                continue;
            };
            let response_json = serde_json::to_string(&response)?;

            debug!("Sending: {}", response_json);

            stdout.write_all(response_json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }

    /// Handle a raw message. Returns `None` for notifications.
    pub async fn handle_message(&self, message: &str) -> Option<McpResponse> {
        match serde_json::from_str::<Value>(message) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                Some(McpResponse::from_error(None, &Error::Parse(e.to_string())))
            }
        }
    }

    /// Handle an already-parsed JSON value. Returns `None` for notifications.
    pub async fn handle_value(&self, value: Value) -> Option<McpResponse> {
        let request = match McpRequest::from_value(value) {
            Ok(req) => req,
            Err((id, e)) => {
                error!("Rejected envelope: {}", e);
                return Some(McpResponse::from_error(id, &e));
            }
        };

        if request.is_notification() {
            debug!(method = ?request.method, "notification");
            return None;
        }

        let id = Some(request.id.clone());
        let outcome = match request.method {
            Method::Initialize => Ok(self.handle_initialize()),
            Method::Initialized | Method::Notification => Ok(json!({ "ok": true })),
            Method::Ping => Ok(json!({})),
            Method::ToolsList => Ok(self.handle_tools_list()),
            Method::ToolsCall => self.handle_tools_call(&request).await,
        };

        Some(match outcome {
            Ok(result) => McpResponse::success(id, result),
            Err(e) => {
                error!("Request failed: {}", e);
                McpResponse::from_error(id, &e)
            }
        })
    }

    /// Handle initialize request.
    fn handle_initialize(&self) -> Value {
        info!("Initializing MCP server");

        let capabilities = ServerCapabilities {
            tools: Some(ToolCapabilities { list_changed: false }),
        };

        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": capabilities,
            "serverInfo": self.server_info
        })
    }

    /// Handle tools/list request.
    fn handle_tools_list(&self) -> Value {
        json!({ "tools": self.registry.definitions() })
    }

    /// Handle tools/call request.
    async fn handle_tools_call(&self, request: &McpRequest) -> Result<Value> {
        let params = ToolCallParams::from_params(&request.params)?;
        info!("Calling tool: {}", params.tool);
        self.registry.call(&params.tool, params.arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error_codes;
    use crate::store::MemoryStore;

    fn server() -> McpServer {
        McpServer::with_store(Arc::new(MemoryStore::seeded()))
    }

    #[tokio::test]
    async fn test_tools_list_returns_all_tools() {
        let resp = server()
            .handle_value(json!({ "jsonrpc": "2.0", "id": "1", "method": "tools/list" }))
            .await
            .unwrap();
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 5);
        assert_eq!(tools[0]["name"], "get_customer");
        assert!(tools[0]["inputSchema"]["properties"]["customer_id"].is_object());
    }

    #[tokio::test]
    async fn test_tools_call_returns_handler_result() {
        let resp = server()
            .handle_value(json!({
                "jsonrpc": "2.0",
                "id": 9,
                "method": "tools/call",
                "params": { "tool": "get_customer", "arguments": { "customer_id": 1 } }
            }))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(json!(9)));
        assert_eq!(resp.result.unwrap()["customer"]["name"], "John Doe");
    }

    #[tokio::test]
    async fn test_validation_error_surfaces_as_invalid_params() {
        let resp = server()
            .handle_value(json!({
                "jsonrpc": "2.0",
                "id": "v",
                "method": "tools/call",
                "params": { "tool": "get_customer", "arguments": {} }
            }))
            .await
            .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
        assert_eq!(err.data.unwrap()["field"], "customer_id");
    }

    #[tokio::test]
    async fn test_envelope_checked_before_tool_logic() {
        let server = server();
        let before = server.registry().context().store.customer_history(1).await.unwrap();

        // Well-formed tool call, but no version tag: nothing may run.
        let resp = server
            .handle_value(json!({
                "id": "x",
                "method": "tools/call",
                "params": {
                    "tool": "create_ticket",
                    "arguments": { "customer_id": 1, "issue": "x" }
                }
            }))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_REQUEST);

        let after = server.registry().context().store.customer_history(1).await.unwrap();
        assert_eq!(before.tickets.len(), after.tickets.len());
    }

    #[tokio::test]
    async fn test_unparseable_message_is_parse_error() {
        let resp = server().handle_message("{not json").await.unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);
        assert!(resp.id.is_none());
    }

    #[tokio::test]
    async fn test_initialize_reports_protocol_version() {
        let resp = server()
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "agent-mesh-mcp");
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let server = server();
        let reply = server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(reply.is_none());

        // A request without an id is still rejected.
        let reply = server
            .handle_message(r#"{"jsonrpc":"2.0","method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(reply.error.unwrap().code, error_codes::INVALID_REQUEST);
    }
}
