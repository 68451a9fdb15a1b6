//! Router agent: classifies a task, plans it and runs the plan.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::agent::A2aCall;
use crate::card::AgentCard;
use crate::classifier::{Classification, Classifier, Scenario};
use crate::error::{Error, ErrorBody, Result};
use crate::orchestrator::{AgentTransport, Orchestrator, OrchestratorConfig, OutcomeStatus, Trace};
use crate::plan::PlanBuilder;

/// Task names the router accepts.
pub const ROUTE_TASKS: [&str; 2] = ["route", "route_task"];

/// Routed task: `{task, text, args}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Must be `route` or `route_task`.
    pub task: String,
    /// Free-text request.
    #[serde(default)]
    pub text: String,
    /// Structured hints such as `customer_id`.
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl RouteRequest {
    /// Task for `text` with `args`.
    pub fn new(text: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            task: "route".into(),
            text: text.into(),
            args,
        }
    }

    /// Accept the tool-call form `{tool: "route", arguments: {text, ...}}`.
    ///
    /// Arguments other than `text` become `args` unless an explicit `args`
    /// object is given.
    pub fn from_call(call: A2aCall) -> Result<Self> {
        let Value::Object(mut arguments) = call.arguments else {
            return Err(Error::validation("arguments", "expected object"));
        };
        let text = match arguments.remove("text") {
            Some(Value::String(text)) => text,
            None => String::new(),
            Some(_) => return Err(Error::validation("text", "expected string")),
        };
        let args = match arguments.remove("args") {
            Some(Value::Object(args)) => args,
            Some(_) => return Err(Error::validation("args", "expected object")),
            None => arguments,
        };
        Ok(Self {
            task: call.tool,
            text,
            args,
        })
    }
}

/// Router reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    /// Scenario the task was handled as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<Scenario>,
    /// Agents involved, router first.
    pub route: Vec<String>,
    /// Ordered trace.
    pub logs: Vec<String>,
    /// Step outputs keyed by step name, plus `status`.
    pub result: Value,
    /// Set for failures, including partial ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl RouteResponse {
    /// Whether the task produced nothing usable.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() && self.result.get("status").and_then(Value::as_str) == Some("failed")
    }
}

/// Entry point for routed tasks.
pub struct RouterAgent {
    card: AgentCard,
    classifier: Arc<dyn Classifier>,
    planner: PlanBuilder,
    orchestrator: Orchestrator,
}

impl RouterAgent {
    /// Create a router with the given collaborators.
    pub fn new(
        card: AgentCard,
        classifier: Arc<dyn Classifier>,
        transport: Arc<dyn AgentTransport>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            card,
            classifier,
            planner: PlanBuilder::new(config.max_steps),
            orchestrator: Orchestrator::with_config(transport, config),
        }
    }

    /// Static card.
    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Classify, plan and execute one task.
    pub async fn route(&self, request: RouteRequest) -> RouteResponse {
        let mut trace = Trace::new();
        trace.push(format!("router received {}: {:?}", request.task, request.text));

        if !ROUTE_TASKS.contains(&request.task.as_str()) {
            return failed(None, trace, Error::ToolNotFound(request.task));
        }

        let classification = self.classify(&request, &mut trace).await;
        let plan = match self.planner.build(&classification) {
            Ok(plan) => plan,
            Err(err) => {
                trace.push(format!("planning failed: {}: {}", err.kind(), err));
                return failed(Some(classification.scenario), trace, err);
            }
        };
        let steps: Vec<String> = plan
            .steps
            .iter()
            .map(|s| format!("{}.{}", s.agent, s.tool))
            .collect();
        trace.push(format!(
            "plan {} ({} steps): {}",
            plan.id,
            plan.steps.len(),
            steps.join(" -> ")
        ));

        let outcome = self.orchestrator.execute(&plan, &mut trace).await;
        info!(scenario = plan.scenario.as_str(), status = ?outcome.status, "task routed");

        let error = match outcome.status {
            OutcomeStatus::Completed | OutcomeStatus::Fallback => None,
            OutcomeStatus::PartialFailure | OutcomeStatus::Failed => {
                outcome.error.as_ref().map(Error::body)
            }
        };
        RouteResponse {
            scenario: Some(plan.scenario),
            route: outcome.route_names(),
            result: outcome.result(),
            logs: trace.into_lines(),
            error,
        }
    }

    async fn classify(&self, request: &RouteRequest, trace: &mut Trace) -> Classification {
        let timeout = self.orchestrator.config().classify_timeout;
        let classify = self.classifier.classify(&request.text, &request.args);
        let result = tokio::time::timeout(timeout, classify)
            .await
            .unwrap_or_else(|_| {
                Err(Error::Classification(format!("no answer within {}ms", timeout.as_millis())))
            });

        match result {
            Ok(c) => {
                trace.push(format!("classified as {} ({:?})", c.scenario.as_str(), c.intent));
                c
            }
            Err(err) => {
                warn!(error = %err, "classification failed, falling back to simple");
                trace.push(format!("{}: {}; falling back to simple", err.kind(), err));
                Classification::fallback(&request.text, &request.args)
            }
        }
    }
}

fn failed(scenario: Option<Scenario>, trace: Trace, err: Error) -> RouteResponse {
    RouteResponse {
        scenario,
        route: vec!["router".into()],
        logs: trace.into_lines(),
        result: serde_json::json!({ "status": OutcomeStatus::Failed }),
        error: Some(err.body()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, DataAgent, SupportAgent};
    use crate::classifier::RuleClassifier;
    use crate::orchestrator::LocalTransport;
    use crate::store::MemoryStore;
    use crate::tools::ToolRegistry;
    use serde_json::json;
    use std::time::Duration;

    fn router_with(classifier: Arc<dyn Classifier>, config: OrchestratorConfig) -> RouterAgent {
        let store = Arc::new(MemoryStore::seeded());
        let registry = Arc::new(ToolRegistry::new(store.clone()));
        let transport = LocalTransport::new(
            Arc::new(DataAgent::new(AgentCard::for_agent(AgentKind::Data, "http://d"), registry)),
            Arc::new(SupportAgent::new(
                AgentCard::for_agent(AgentKind::Support, "http://s"),
                store,
            )),
        );
        RouterAgent::new(
            AgentCard::for_agent(AgentKind::Router, "http://r"),
            classifier,
            Arc::new(transport),
            config,
        )
    }

    fn router() -> RouterAgent {
        router_with(Arc::new(RuleClassifier::new()), OrchestratorConfig::default())
    }

    fn request(text: &str, args: Value) -> RouteRequest {
        RouteRequest::new(text, args.as_object().cloned().unwrap_or_default())
    }

    struct Stalled;

    #[async_trait::async_trait]
    impl Classifier for Stalled {
        async fn classify(
            &self,
            _text: &str,
            _args: &Map<String, Value>,
        ) -> Result<Classification> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(Error::Classification("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_simple_route() {
        let resp = router().route(request("get customer 5", json!({ "customer_id": 5 }))).await;
        assert_eq!(resp.scenario, Some(Scenario::Simple));
        assert_eq!(resp.route, ["router", "data"]);
        assert_eq!(resp.result["customer"]["customer"]["id"], 5);
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_escalation_skips_data_agent() {
        let resp = router()
            .route(request("This is urgent, I was charged twice! customer 5", json!({})))
            .await;
        assert_eq!(resp.scenario, Some(Scenario::Escalation));
        assert_eq!(resp.route, ["router", "support"]);
        assert_eq!(resp.result["escalation"]["escalated"], true);
    }

    #[tokio::test]
    async fn test_classifier_timeout_falls_back_to_simple() {
        let config = OrchestratorConfig {
            classify_timeout: Duration::from_millis(20),
            ..OrchestratorConfig::default()
        };
        let resp = router_with(Arc::new(Stalled), config)
            .route(request("anything", json!({ "customer_id": 2 })))
            .await;
        assert_eq!(resp.scenario, Some(Scenario::Simple));
        assert!(resp.logs.iter().any(|l| l.contains("falling back to simple")));
        assert_eq!(resp.result["customer"]["customer"]["name"], "Jane Smith");
    }

    #[tokio::test]
    async fn test_plan_too_large_is_reported_before_dispatch() {
        let config = OrchestratorConfig {
            max_steps: 1,
            ..OrchestratorConfig::default()
        };
        let resp = router_with(Arc::new(RuleClassifier::new()), config)
            .route(request("list active customers with open tickets", json!({})))
            .await;
        assert!(resp.is_failure());
        assert_eq!(resp.error.unwrap().kind, "PlanTooLarge");
        assert_eq!(resp.route, ["router"]);
        assert!(!resp.logs.iter().any(|l| l.contains("->")));
    }

    #[tokio::test]
    async fn test_unknown_task_is_rejected() {
        let mut req = request("get customer 1", json!({}));
        req.task = "delete_everything".into();
        let resp = router().route(req).await;
        assert_eq!(resp.error.unwrap().kind, "ToolNotFound");
    }

    #[test]
    fn test_route_request_from_tool_call() {
        let call = A2aCall {
            tool: "route_task".into(),
            arguments: json!({ "text": "get customer 3", "customer_id": 3 }),
        };
        let req = RouteRequest::from_call(call).unwrap();
        assert_eq!(req.text, "get customer 3");
        assert_eq!(req.args["customer_id"], 3);
    }
}
