//! HTTP clients for the protocol server and worker agents.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::agent::{A2aCall, AgentKind};
use crate::card::AgentCard;
use crate::error::{Error, ErrorBody, Result};
use crate::orchestrator::AgentTransport;
use crate::protocol::{McpRequest, McpResponse, Method, ToolDefinition, JSONRPC_VERSION};
use crate::tools::{ToolBackend, ToolName};

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("failed to build http client: {e}")))
}

fn transport_error(agent: &str, err: reqwest::Error) -> Error {
    if err.is_decode() {
        Error::Protocol(format!("{agent} sent an unreadable response: {err}"))
    } else if err.is_connect() {
        Error::unavailable(agent, err.to_string())
    } else {
        Error::unanswered(agent, err.to_string())
    }
}

/// JSON-RPC client for the protocol server.
#[derive(Clone)]
pub struct McpClient {
    endpoint: String,
    client: Client,
}

impl McpClient {
    /// Client for the server at `base_url` (without the `/mcp` suffix).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: format!("{}/mcp", base_url.trim_end_matches('/')),
            client: build_client(timeout)?,
        })
    }

    async fn send(&self, request: &McpRequest) -> Result<Value> {
        debug!(endpoint = %self.endpoint, method = ?request.method, "sending MCP request");
        let response: McpResponse = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("mcp", e))?
            .json()
            .await
            .map_err(|e| transport_error("mcp", e))?;
        response.into_result("mcp")
    }

    /// `tools/list`.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let request = McpRequest {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Value::String(Uuid::new_v4().to_string()),
            method: Method::ToolsList,
            params: Value::Null,
        };
        let result = self.send(&request).await?;
        Ok(serde_json::from_value(result["tools"].clone())?)
    }
}

#[async_trait::async_trait]
impl ToolBackend for McpClient {
    async fn call_tool(&self, tool: ToolName, arguments: Value) -> Result<Value> {
        let request = McpRequest::tools_call(Uuid::new_v4().to_string(), tool.as_str(), arguments);
        self.send(&request).await
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// A2A transport over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    data_url: String,
    support_url: String,
}

impl HttpTransport {
    /// Transport reaching the data and support agents at their base URLs.
    pub fn new(data_url: &str, support_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            data_url: data_url.trim_end_matches('/').to_string(),
            support_url: support_url.trim_end_matches('/').to_string(),
        })
    }

    fn base_url(&self, agent: AgentKind) -> Result<&str> {
        match agent {
            AgentKind::Data => Ok(&self.data_url),
            AgentKind::Support => Ok(&self.support_url),
            AgentKind::Router => Err(Error::Internal("router is not a worker agent".into())),
        }
    }

    /// Fetch an agent's card.
    pub async fn card(&self, agent: AgentKind) -> Result<AgentCard> {
        let url = format!("{}/card", self.base_url(agent)?);
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(agent.as_str(), e))?
            .json()
            .await
            .map_err(|e| transport_error(agent.as_str(), e))
    }
}

#[async_trait::async_trait]
impl AgentTransport for HttpTransport {
    async fn call(&self, agent: AgentKind, tool: &str, arguments: Value) -> Result<Value> {
        let url = format!("{}/a2a/call", self.base_url(agent)?);
        let body = A2aCall {
            tool: tool.to_string(),
            arguments,
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(agent.as_str(), e))?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| transport_error(agent.as_str(), e));
        }
        if status == StatusCode::GATEWAY_TIMEOUT {
            return Err(Error::unanswered(agent, format!("HTTP {status}")));
        }
        if matches!(status, StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE) {
            match response.json::<ErrorEnvelope>().await {
                Ok(envelope) => return Err(envelope.error.into_error(agent)),
                Err(_) => return Err(Error::unavailable(agent, format!("HTTP {status}"))),
            }
        }

        match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => Err(envelope.error.into_error(agent)),
            Err(_) => Err(Error::from_remote(agent, "InternalError", format!("HTTP {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_transient() {
        let url = closed_port_url().await;
        let transport = HttpTransport::new(&url, &url, Duration::from_millis(500)).unwrap();
        let err = transport
            .call(AgentKind::Support, "create_ticket", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DownstreamUnavailable");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_mcp_server_is_transient() {
        let client = McpClient::new(&closed_port_url().await, Duration::from_millis(500)).unwrap();
        let err = client
            .call_tool(ToolName::GetCustomer, json!({ "customer_id": 1 }))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_router_is_not_addressable() {
        let transport = HttpTransport::new("http://d", "http://s", Duration::from_secs(1)).unwrap();
        assert!(transport.base_url(AgentKind::Router).is_err());
        assert_eq!(transport.base_url(AgentKind::Data).unwrap(), "http://d");
    }
}
