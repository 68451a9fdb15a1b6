//! HTTP surface of the protocol server and the agents.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::{A2aRequest, AgentKind, AgentMessage, DataAgent, SupportAgent, WorkerAgent};
use crate::card::{AgentCard, Capabilities};
use crate::classifier::RuleClassifier;
use crate::client::{HttpTransport, McpClient};
use crate::error::{Error, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::protocol::McpResponse;
use crate::router::{RouteRequest, RouterAgent};
use crate::server::McpServer;
use crate::store::Datastore;

/// HTTP status for an error taxonomy name.
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "ProtocolError" | "ClassificationError" => StatusCode::BAD_REQUEST,
        "ToolNotFound" | "NotFound" => StatusCode::NOT_FOUND,
        "ValidationError" | "PlanTooLarge" | "TemplateError" | "BudgetExceeded" => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        "DownstreamUnavailable" => StatusCode::BAD_GATEWAY,
        "PartialFailure" => StatusCode::OK,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for_kind(self.kind());
        (status, Json(json!({ "error": self.body() }))).into_response()
    }
}

fn parse_body(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| Error::Parse(e.to_string()))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

// =============================================================================
// Protocol server
// =============================================================================

/// `POST /mcp`, `GET /healthz`.
pub fn mcp_app(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_call))
        .route("/healthz", get(mcp_health))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn mcp_call(State(server): State<Arc<McpServer>>, body: Bytes) -> Response {
    let response = match std::str::from_utf8(&body) {
        Ok(text) => server.handle_message(text).await,
        Err(e) => Some(McpResponse::from_error(None, &Error::Parse(e.to_string()))),
    };
    match response {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn mcp_health(State(server): State<Arc<McpServer>>) -> Json<Value> {
    Json(server.health())
}

// =============================================================================
// Worker agents
// =============================================================================

/// `GET /card`, `GET /healthz`, `GET /a2a/capabilities`, `POST /a2a/call`
/// and `POST /a2a/message` for a worker agent.
pub fn worker_app(agent: Arc<dyn WorkerAgent>) -> Router {
    Router::new()
        .route("/card", get(worker_card))
        .route("/healthz", get(healthz))
        .route("/a2a/capabilities", get(worker_capabilities))
        .route("/a2a/call", post(worker_call))
        .route("/a2a/message", post(worker_message))
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

async fn worker_card(State(agent): State<Arc<dyn WorkerAgent>>) -> Json<AgentCard> {
    Json(agent.card().clone())
}

async fn worker_capabilities(State(agent): State<Arc<dyn WorkerAgent>>) -> Json<Capabilities> {
    Json(Capabilities::for_agent(agent.kind()))
}

fn parse_message(body: &[u8]) -> Result<AgentMessage> {
    serde_json::from_value(parse_body(body)?)
        .map_err(|_| Error::Protocol("expected {role, content}".into()))
}

async fn worker_message(
    State(agent): State<Arc<dyn WorkerAgent>>,
    body: Bytes,
) -> Result<Json<Value>> {
    let message = parse_message(&body)?;
    info!(agent = %agent.kind(), role = %message.role, "message received");
    Ok(Json(agent.message(&message.content).await?))
}

async fn worker_call(
    State(agent): State<Arc<dyn WorkerAgent>>,
    body: Bytes,
) -> Result<Json<Value>> {
    match A2aRequest::from_value(parse_body(&body)?)? {
        A2aRequest::Call(call) => Ok(Json(agent.call(&call.tool, call.arguments).await?)),
        A2aRequest::Task(_) => Err(Error::Protocol(format!(
            "the {} agent accepts {{tool, arguments}} calls only",
            agent.kind()
        ))),
    }
}

// =============================================================================
// Router agent
// =============================================================================

/// Same surface as a worker; messages are routed as `route_task`.
pub fn router_app(router: Arc<RouterAgent>) -> Router {
    Router::new()
        .route("/card", get(router_card))
        .route("/healthz", get(healthz))
        .route("/a2a/capabilities", get(router_capabilities))
        .route("/a2a/call", post(router_call))
        .route("/a2a/message", post(router_message))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn router_card(State(router): State<Arc<RouterAgent>>) -> Json<AgentCard> {
    Json(router.card().clone())
}

async fn router_call(State(router): State<Arc<RouterAgent>>, body: Bytes) -> Result<Response> {
    let request = match A2aRequest::from_value(parse_body(&body)?)? {
        A2aRequest::Task(request) => request,
        A2aRequest::Call(call) => RouteRequest::from_call(call)?,
    };

    Ok(route_reply(&router, request).await)
}

async fn router_message(State(router): State<Arc<RouterAgent>>, body: Bytes) -> Result<Response> {
    let message = parse_message(&body)?;
    let mut request = RouteRequest::new(message.content, Map::new());
    request.task = "route_task".into();
    Ok(route_reply(&router, request).await)
}

async fn router_capabilities() -> Json<Capabilities> {
    Json(Capabilities::for_agent(AgentKind::Router))
}

async fn route_reply(router: &RouterAgent, request: RouteRequest) -> Response {
    let response = router.route(request).await;
    let status = match &response.error {
        Some(error) if response.is_failure() => status_for_kind(&error.kind),
        _ => StatusCode::OK,
    };
    (status, Json(response)).into_response()
}

// =============================================================================
// Wiring
// =============================================================================

/// Base URLs the services use to reach each other.
#[derive(Debug, Clone)]
pub struct MeshEndpoints {
    /// Protocol server, used by the data agent.
    pub mcp: String,
    /// Data agent, used by the router.
    pub data: String,
    /// Support agent, used by the router.
    pub support: String,
    /// Router, advertised on its card.
    pub router: String,
}

/// One router per service.
pub struct MeshApps {
    pub mcp: Router,
    pub data: Router,
    pub support: Router,
    pub router: Router,
}

/// Build all four services around one datastore.
///
/// Services talk to each other over HTTP at `endpoints`, each call bounded by
/// `http_timeout`.
pub fn build_mesh(
    store: Arc<dyn Datastore>,
    endpoints: &MeshEndpoints,
    config: OrchestratorConfig,
    http_timeout: Duration,
) -> Result<MeshApps> {
    let server = Arc::new(McpServer::with_store(store.clone()));

    let data = DataAgent::new(
        AgentCard::for_agent(AgentKind::Data, &endpoints.data),
        Arc::new(McpClient::new(&endpoints.mcp, http_timeout)?),
    );
    let support_card = AgentCard::for_agent(AgentKind::Support, &endpoints.support);
    let support = SupportAgent::new(support_card, store);
    let router = RouterAgent::new(
        AgentCard::for_agent(AgentKind::Router, &endpoints.router),
        Arc::new(RuleClassifier::new()),
        Arc::new(HttpTransport::new(&endpoints.data, &endpoints.support, http_timeout)?),
        config,
    );

    Ok(MeshApps {
        mcp: mcp_app(server),
        data: worker_app(Arc::new(data)),
        support: worker_app(Arc::new(support)),
        router: router_app(Arc::new(router)),
    })
}

/// Serve `app` on `listener` until the process stops.
pub async fn serve(name: &str, listener: TcpListener, app: Router) -> Result<()> {
    info!(service = name, addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::LocalTransport;
    use crate::store::MemoryStore;
    use crate::tools::ToolRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(if body.is_null() {
                Body::empty()
            } else {
                Body::from(body.to_string())
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::seeded())
    }

    fn data_app() -> Router {
        let store = store();
        worker_app(Arc::new(DataAgent::new(
            AgentCard::for_agent(AgentKind::Data, "http://d"),
            Arc::new(ToolRegistry::new(store)),
        )))
    }

    fn local_router_app() -> Router {
        let store = store();
        let registry = Arc::new(ToolRegistry::new(store.clone()));
        let transport = LocalTransport::new(
            Arc::new(DataAgent::new(AgentCard::for_agent(AgentKind::Data, "http://d"), registry)),
            Arc::new(SupportAgent::new(
                AgentCard::for_agent(AgentKind::Support, "http://s"),
                store,
            )),
        );
        router_app(Arc::new(RouterAgent::new(
            AgentCard::for_agent(AgentKind::Router, "http://r"),
            Arc::new(RuleClassifier::new()),
            Arc::new(transport),
            OrchestratorConfig::default(),
        )))
    }

    #[tokio::test]
    async fn test_mcp_endpoint_and_health() {
        let app = mcp_app(Arc::new(McpServer::with_store(store())));
        let (status, body) = send(
            app.clone(),
            "POST",
            "/mcp",
            json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 5);

        let (_, body) = send(app, "GET", "/healthz", Value::Null).await;
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_mcp_notification_is_accepted_without_body() {
        let app = mcp_app(Arc::new(McpServer::with_store(store())));
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_mcp_rejects_non_json_body() {
        let app = mcp_app(Arc::new(McpServer::with_store(store())));
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_worker_card_and_call() {
        let (status, card) = send(data_app(), "GET", "/card", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["id"], "data");

        let (status, body) = send(
            data_app(),
            "POST",
            "/a2a/call",
            json!({ "tool": "get_customer", "arguments": { "customer_id": 2 } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["customer"]["name"], "Jane Smith");
    }

    #[tokio::test]
    async fn test_worker_errors_carry_kind_and_status() {
        let (status, body) = send(
            data_app(),
            "POST",
            "/a2a/call",
            json!({ "tool": "get_customer", "arguments": {} }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["kind"], "ValidationError");
        assert_eq!(body["error"]["data"]["field"], "customer_id");

        let (status, body) =
            send(data_app(), "POST", "/a2a/call", json!({ "tool": "drop_tables" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "ToolNotFound");

        let (status, _) = send(data_app(), "POST", "/a2a/call", json!([1, 2])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_router_accepts_both_request_shapes() {
        let (status, body) = send(
            local_router_app(),
            "POST",
            "/a2a/call",
            json!({ "task": "route", "text": "get customer 5", "args": { "customer_id": 5 } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["route"], json!(["router", "data"]));

        let (status, body) = send(
            local_router_app(),
            "POST",
            "/a2a/call",
            json!({ "tool": "route_task", "arguments": { "text": "get customer 5" } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["customer"]["customer"]["id"], 5);
    }

    #[tokio::test]
    async fn test_router_message_is_routed() {
        let (status, body) = send(
            local_router_app(),
            "POST",
            "/a2a/message",
            json!({ "role": "user", "content": "get customer 5" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scenario"], "simple");
        assert_eq!(body["result"]["customer"]["customer"]["id"], 5);

        let (status, body) = send(
            local_router_app(),
            "POST",
            "/a2a/message",
            json!({ "role": "user" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "ProtocolError");
    }

    #[tokio::test]
    async fn test_support_message_and_capabilities() {
        let support = || {
            worker_app(Arc::new(SupportAgent::new(
                AgentCard::for_agent(AgentKind::Support, "http://s"),
                store(),
            )))
        };

        let (status, body) = send(
            support(),
            "POST",
            "/a2a/message",
            json!({ "role": "user", "content": "I was charged twice, I want a refund" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intent"], "billing");

        let (status, caps) = send(support(), "GET", "/a2a/capabilities", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(caps["a2a"], true);
        let escalate = caps["skills"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["name"] == "escalate")
            .unwrap();
        assert_eq!(escalate["inputSchema"]["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn test_router_failure_uses_error_status() {
        let (status, body) = send(
            local_router_app(),
            "POST",
            "/a2a/call",
            json!({
                "task": "route",
                "text": "update my record",
                "args": { "update": { "email": "x" }, "also": "history" }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["kind"], "ValidationError");
        assert_eq!(body["error"]["data"]["field"], "customer_id");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_kind("DownstreamUnavailable"), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for_kind("NotFound"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_kind("InternalError"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
