//! MCP Protocol definitions.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// JSON-RPC version tag every envelope must carry.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: Value,
    /// Method name.
    pub method: Method,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl McpRequest {
    /// Build a `tools/call` request.
    pub fn tools_call(id: impl Into<Value>, tool: &str, arguments: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            method: Method::ToolsCall,
            params: json!({ "tool": tool, "arguments": arguments }),
        }
    }

    /// True when the envelope has no id and expects no reply.
    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }

    /// Validate a raw envelope before any method logic runs.
    ///
    /// Checks run in order: object shape, version tag, request id, method.
    pub fn from_value(raw: Value) -> std::result::Result<Self, (Option<Value>, Error)> {
        let Value::Object(mut map) = raw else {
            return Err((None, Error::Protocol("request must be a JSON object".into())));
        };

        let id = match map.remove("id") {
            Some(id @ (Value::String(_) | Value::Number(_))) => Some(id),
            _ => None,
        };
        let fail = |msg: &str| Err((id.clone(), Error::Protocol(msg.to_string())));

        match map.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(_) => return fail("unsupported jsonrpc version, expected \"2.0\""),
            None => return fail("missing jsonrpc version tag"),
        }

        let method_name = map.get("method").and_then(Value::as_str).map(str::to_owned);

        // Notifications carry no id and are never answered.
        let request_id = match id.clone() {
            Some(id) => id,
            None if method_name.as_deref().is_some_and(Method::is_notification_name) => Value::Null,
            None => return fail("missing request id"),
        };

        let method = match method_name {
            Some(name) => name.parse::<Method>().map_err(|e| (id.clone(), e))?,
            None => return fail("missing method"),
        };

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: request_id,
            method,
            params: map.remove("params").unwrap_or(Value::Null),
        })
    }
}

/// Methods understood by the protocol server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Handshake.
    #[serde(rename = "initialize")]
    Initialize,
    /// Handshake acknowledgement.
    #[serde(rename = "notifications/initialized")]
    Initialized,
    /// Liveness over JSON-RPC.
    #[serde(rename = "ping")]
    Ping,
    /// List registered tools.
    #[serde(rename = "tools/list")]
    ToolsList,
    /// Invoke a tool.
    #[serde(rename = "tools/call")]
    ToolsCall,
    /// Any other `notifications/*` message. Accepted and ignored.
    #[serde(skip)]
    Notification,
}

impl Method {
    /// Whether `name` is in the JSON-RPC notification namespace.
    pub fn is_notification_name(name: &str) -> bool {
        name.starts_with("notifications/")
    }
}

impl std::str::FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "initialize" => Ok(Self::Initialize),
            "notifications/initialized" | "initialized" => Ok(Self::Initialized),
            "ping" => Ok(Self::Ping),
            "tools/list" => Ok(Self::ToolsList),
            "tools/call" => Ok(Self::ToolsCall),
            other if Self::is_notification_name(other) => Ok(Self::Notification),
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone)]
pub struct ToolCallParams {
    /// Tool name.
    pub tool: String,
    /// Tool arguments.
    pub arguments: Value,
}

impl ToolCallParams {
    /// Extract call parameters, accepting `tool` or the MCP-standard `name`.
    pub fn from_params(params: &Value) -> Result<Self> {
        let tool = params
            .get("tool")
            .or_else(|| params.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::validation("tool", "tool name not provided"))?;

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args) => args.clone(),
        };

        Ok(Self {
            tool: tool.to_string(),
            arguments,
        })
    }
}

/// MCP JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID (matches request).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Result (on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Create an error response from a crate error, keeping its structured data.
    pub fn from_error(id: Option<Value>, err: &Error) -> Self {
        let mut response = Self::error(id, err.rpc_code(), err.to_string());
        if let Some(error) = response.error.as_mut() {
            error.data = Some(err.data());
        }
        response
    }

    /// Convert into the call outcome the response describes.
    pub fn into_result(self, agent: &str) -> Result<Value> {
        match (self.result, self.error) {
            (_, Some(err)) => {
                let kind = err
                    .data
                    .as_ref()
                    .and_then(|d| d.get("kind"))
                    .and_then(Value::as_str)
                    .unwrap_or("InternalError")
                    .to_string();
                Err(Error::from_remote(agent, &kind, err.message))
            }
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::Protocol("response has neither result nor error".into())),
        }
    }
}

/// MCP error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server-defined: the tool ran and failed.
    pub const TOOL_EXECUTION_ERROR: i32 = -32001;
}

/// Tool definition for MCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Server capabilities for initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

/// Tool-related capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCapabilities {
    /// Whether list_changed notifications are supported.
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// Server information for initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "agent-mesh-mcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}
