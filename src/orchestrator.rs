//! Plan executor for routed tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::agent::{AgentKind, WorkerAgent};
use crate::error::{Error, Result};
use crate::plan::{self, ExecutionPlan, Step, StepId, DEFAULT_MAX_STEPS};

/// Retry behaviour for one step dispatch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per step, including the first.
    pub max_attempts: u32,
    /// Bound on each individual attempt.
    pub attempt_timeout: Duration,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Cap on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(retry as i32);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retry policy for every dispatch.
    pub retry: RetryPolicy,
    /// Static bound on plan length.
    pub max_steps: usize,
    /// Runtime bound on dispatches per routed task, retries included.
    pub step_budget: usize,
    /// Bound on classification before falling back.
    pub classify_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_steps: DEFAULT_MAX_STEPS,
            step_budget: 16,
            classify_timeout: Duration::from_millis(500),
        }
    }
}

/// How the router reaches worker agents.
#[async_trait::async_trait]
pub trait AgentTransport: Send + Sync {
    /// Invoke `tool` on `agent`.
    async fn call(&self, agent: AgentKind, tool: &str, arguments: Value) -> Result<Value>;
}

/// Transport calling agents that live in this process.
pub struct LocalTransport {
    data: Arc<dyn WorkerAgent>,
    support: Arc<dyn WorkerAgent>,
}

impl LocalTransport {
    /// Create a transport over in-process agents.
    pub fn new(data: Arc<dyn WorkerAgent>, support: Arc<dyn WorkerAgent>) -> Self {
        Self { data, support }
    }
}

#[async_trait::async_trait]
impl AgentTransport for LocalTransport {
    async fn call(&self, agent: AgentKind, tool: &str, arguments: Value) -> Result<Value> {
        match agent {
            AgentKind::Data => self.data.call(tool, arguments).await,
            AgentKind::Support => self.support.call(tool, arguments).await,
            AgentKind::Router => Err(Error::Internal("router is not a worker agent".into())),
        }
    }
}

/// Ordered log of what happened while serving one task.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    lines: Vec<String>,
}

impl Trace {
    /// Empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line.
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "agent_mesh::trace", "{}", line);
        self.lines.push(line);
    }

    /// Lines so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Finish the trace.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Counter charged once per dispatch attempt.
#[derive(Debug)]
pub struct StepBudget {
    limit: usize,
    used: AtomicUsize,
}

impl StepBudget {
    /// Budget of `limit` dispatches.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Take one unit, failing once the budget is spent.
    pub fn charge(&self) -> Result<()> {
        let used = self.used.fetch_add(1, Ordering::SeqCst);
        if used >= self.limit {
            Err(Error::BudgetExceeded { limit: self.limit })
        } else {
            Ok(())
        }
    }

    /// Units taken so far, including refused ones.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }
}

/// How plan execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every step completed.
    Completed,
    /// A step failed and the fallback answered instead.
    Fallback,
    /// A step failed after others completed.
    PartialFailure,
    /// Nothing usable was produced.
    Failed,
}

/// Result of executing a plan.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Overall status.
    pub status: OutcomeStatus,
    /// Step outputs keyed by step name, in completion order.
    pub outputs: Map<String, Value>,
    /// Agents involved, router first.
    pub route: Vec<AgentKind>,
    /// Failure, for every status except `Completed`.
    pub error: Option<Error>,
}

impl ExecutionOutcome {
    /// Final answer: outputs plus `status` and, on partial failure, the failed step.
    pub fn result(&self) -> Value {
        let mut result = self.outputs.clone();
        result.insert("status".into(), json!(self.status));
        if let (OutcomeStatus::PartialFailure, Some(Error::PartialFailure { step, reason })) =
            (self.status, &self.error)
        {
            result.insert("failed_step".into(), json!(step));
            result.insert("reason".into(), json!(reason));
        }
        Value::Object(result)
    }

    /// Route as wire names.
    pub fn route_names(&self) -> Vec<String> {
        self.route.iter().map(|a| a.as_str().to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    Pending,
    Done,
    Failed,
}

/// Executes validated plans against worker agents.
#[derive(Clone)]
pub struct Orchestrator {
    transport: Arc<dyn AgentTransport>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator with default configuration.
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self::with_config(transport, OrchestratorConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(transport: Arc<dyn AgentTransport>, config: OrchestratorConfig) -> Self {
        Self { transport, config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `plan` to completion, appending to `trace`.
    ///
    /// Steps whose dependencies have all completed are dispatched together;
    /// a failed step blocks its dependents but not unrelated steps.
    pub async fn execute(&self, plan: &ExecutionPlan, trace: &mut Trace) -> ExecutionOutcome {
        let budget = StepBudget::new(self.config.step_budget);
        let mut states = vec![StepState::Pending; plan.steps.len()];
        let mut outputs: Vec<Option<Value>> = vec![None; plan.steps.len()];
        let mut named = Map::new();
        let mut route = vec![AgentKind::Router];
        let mut first_failure: Option<(StepId, Error)> = None;
        let mut fallback_tried = false;

        info!(
            plan = %plan.id,
            scenario = plan.scenario.as_str(),
            steps = plan.steps.len(),
            "executing plan"
        );

        loop {
            let ready: Vec<&Step> = plan
                .steps
                .iter()
                .filter(|s| {
                    states[s.id] == StepState::Pending
                        && s.depends_on.iter().all(|d| states[*d] == StepState::Done)
                })
                .collect();
            if ready.is_empty() {
                break;
            }

            let runs = join_all(ready.iter().map(|step| {
                let args = step.resolve_arguments(&outputs);
                self.run_step(step, args, &budget)
            }))
            .await;

            for (step, run) in ready.iter().zip(runs) {
                if run.dispatched {
                    note_agent(&mut route, step.agent);
                }
                for line in run.lines {
                    trace.push(line);
                }
                match run.result {
                    Ok(output) => {
                        states[step.id] = StepState::Done;
                        named.insert(step.name.clone(), output.clone());
                        outputs[step.id] = Some(output);
                    }
                    Err(err @ Error::BudgetExceeded { .. }) => {
                        trace.push(format!("aborting plan {}: {}", plan.id, err));
                        return ExecutionOutcome {
                            status: OutcomeStatus::Failed,
                            outputs: named,
                            route,
                            error: Some(err),
                        };
                    }
                    Err(err) => {
                        states[step.id] = StepState::Failed;
                        if first_failure.is_none() {
                            first_failure = Some((step.id, err));
                        }
                    }
                }
            }

            if let (false, Some((failed, err))) = (fallback_tried, &first_failure) {
                fallback_tried = true;
                let failed = &plan.steps[*failed];
                if let Some(fallback) = plan.fallback.as_ref().filter(|f| f.agent != failed.agent) {
                    warn!(step = %failed.name, error = %err, "step failed, running fallback");
                    trace.push(format!(
                        "step `{}` failed ({}); falling back to {}.{}",
                        failed.name,
                        err.kind(),
                        fallback.agent,
                        fallback.tool
                    ));
                    let args = fallback.resolve_arguments(&[]);
                    let run = self.run_step(fallback, args, &budget).await;
                    if run.dispatched {
                        note_agent(&mut route, fallback.agent);
                    }
                    for line in run.lines {
                        trace.push(line);
                    }
                    if let Ok(output) = run.result {
                        trace_skipped(plan, &states, failed, trace);
                        named.insert(fallback.name.clone(), output);
                        return ExecutionOutcome {
                            status: OutcomeStatus::Fallback,
                            outputs: named,
                            route,
                            error: first_failure.map(|(_, e)| e),
                        };
                    }
                }
            }
        }

        let Some((failed, err)) = first_failure else {
            trace.push(format!("plan {} completed", plan.id));
            return ExecutionOutcome {
                status: OutcomeStatus::Completed,
                outputs: named,
                route,
                error: None,
            };
        };

        let failed = &plan.steps[failed];
        trace_skipped(plan, &states, failed, trace);

        if named.is_empty() {
            return ExecutionOutcome {
                status: OutcomeStatus::Failed,
                outputs: named,
                route,
                error: Some(err),
            };
        }

        trace.push(format!(
            "partial failure: {} of {} steps completed",
            named.len(),
            plan.steps.len()
        ));
        ExecutionOutcome {
            status: OutcomeStatus::PartialFailure,
            outputs: named,
            route,
            error: Some(Error::PartialFailure {
                step: failed.name.clone(),
                reason: format!("{}: {}", err.kind(), err),
            }),
        }
    }

    /// Dispatch one step with retries.
    async fn run_step(&self, step: &Step, args: Result<Value>, budget: &StepBudget) -> StepRun {
        let mut run = StepRun {
            result: Err(Error::Internal(format!("step `{}` never ran", step.name))),
            lines: Vec::new(),
            dispatched: false,
        };
        let args = match args {
            Ok(args) => args,
            Err(err) => {
                run.fail(step, err);
                return run;
            }
        };

        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Err(err) = budget.charge() {
                run.fail(step, err);
                return run;
            }
            run.dispatched = true;
            run.lines.push(format!(
                "{} -> {}.{} (step `{}`, attempt {attempt})",
                AgentKind::Router,
                step.agent,
                step.tool,
                step.name
            ));

            let attempt_call = self.dispatch(step, args.clone());
            let result = match tokio::time::timeout(retry.attempt_timeout, attempt_call).await {
                Ok(result) => result,
                Err(_) => Err(Error::unanswered(
                    step.agent,
                    format!("no response within {}ms", retry.attempt_timeout.as_millis()),
                )),
            };

            match result {
                Ok(output) => {
                    run.lines.push(format!("{}.{} ok", step.agent, step.tool));
                    run.result = Ok(output);
                    return run;
                }
                // A write that may have landed is never sent twice.
                Err(err) if step.is_write() && err.may_have_applied() => {
                    warn!(step = %step.name, attempt, error = %err, "write outcome unknown");
                    run.lines.push(format!(
                        "{}.{} attempt {attempt} outcome unknown; not retrying write",
                        step.agent, step.tool
                    ));
                    run.fail(step, err);
                    return run;
                }
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = retry.backoff(attempt - 1);
                    warn!(step = %step.name, attempt, error = %err, "transient failure, retrying");
                    run.lines.push(format!(
                        "{}.{} attempt {attempt} failed: {}: {}; retrying in {}ms",
                        step.agent,
                        step.tool,
                        err.kind(),
                        err,
                        delay.as_millis()
                    ));
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    run.fail(step, err);
                    return run;
                }
            }
        }
        run
    }

    async fn dispatch(&self, step: &Step, args: Value) -> Result<Value> {
        match step.agent {
            AgentKind::Router => match step.tool.as_str() {
                plan::MERGE_OPEN_TICKETS => plan::merge_open_tickets(&args),
                other => Err(Error::ToolNotFound(other.to_string())),
            },
            agent => self.transport.call(agent, &step.tool, args).await,
        }
    }
}

/// Outcome of one step dispatch, with its trace lines.
struct StepRun {
    result: Result<Value>,
    lines: Vec<String>,
    dispatched: bool,
}

impl StepRun {
    fn fail(&mut self, step: &Step, err: Error) {
        self.lines.push(format!("step `{}` failed: {}: {}", step.name, err.kind(), err));
        self.result = Err(err);
    }
}

fn trace_skipped(plan: &ExecutionPlan, states: &[StepState], failed: &Step, trace: &mut Trace) {
    for step in plan.steps.iter().filter(|s| states[s.id] == StepState::Pending) {
        trace.push(format!(
            "skipped step `{}`: upstream step `{}` failed",
            step.name, failed.name
        ));
    }
}

fn note_agent(route: &mut Vec<AgentKind>, agent: AgentKind) {
    if !route.contains(&agent) {
        route.push(agent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DataAgent, SupportAgent};
    use crate::card::AgentCard;
    use crate::classifier::{RuleClassifier, Scenario};
    use crate::plan::{ArgSource, PlanBuilder};
    use crate::store::{Datastore, MemoryStore};
    use crate::tools::ToolRegistry;
    use std::sync::Mutex;

    fn local(store: Arc<MemoryStore>) -> LocalTransport {
        let registry = Arc::new(ToolRegistry::new(store.clone()));
        LocalTransport::new(
            Arc::new(DataAgent::new(AgentCard::for_agent(AgentKind::Data, "http://d"), registry)),
            Arc::new(SupportAgent::new(
                AgentCard::for_agent(AgentKind::Support, "http://s"),
                store,
            )),
        )
    }

    /// Fails calls to chosen agents, recording every call.
    struct Faulty {
        inner: LocalTransport,
        down: Vec<AgentKind>,
        failures_left: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl Faulty {
        fn new(store: Arc<MemoryStore>, down: &[AgentKind], failures: usize) -> Self {
            Self {
                inner: local(store),
                down: down.to_vec(),
                failures_left: AtomicUsize::new(failures),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl AgentTransport for Faulty {
        async fn call(&self, agent: AgentKind, tool: &str, arguments: Value) -> Result<Value> {
            self.calls.lock().unwrap().push(format!("{agent}.{tool}"));
            if self.down.contains(&agent)
                && self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(Error::unavailable(agent, "connection refused"));
            }
            self.inner.call(agent, tool, arguments).await
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                attempt_timeout: Duration::from_millis(200),
                initial_backoff: Duration::from_millis(1),
                multiplier: 2.0,
                max_backoff: Duration::from_millis(5),
            },
            ..OrchestratorConfig::default()
        }
    }

    fn plan_for(text: &str, args: Value) -> ExecutionPlan {
        let c = RuleClassifier::new().classify_sync(text, args.as_object().unwrap()).unwrap();
        PlanBuilder::default().build(&c).unwrap()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(300),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(5), Duration::from_millis(300));
    }

    #[test]
    fn test_budget_refuses_past_limit() {
        let budget = StepBudget::new(2);
        budget.charge().unwrap();
        budget.charge().unwrap();
        assert!(matches!(budget.charge(), Err(Error::BudgetExceeded { limit: 2 })));
        assert_eq!(budget.used(), 3);
    }

    #[tokio::test]
    async fn test_multi_intent_history_sees_update() {
        let store = Arc::new(MemoryStore::seeded());
        let orchestrator = Orchestrator::new(Arc::new(local(store)));
        let plan = plan_for(
            "update",
            json!({
                "customer_id": 1,
                "update": { "email": "new@example.com" },
                "also": "history"
            }),
        );

        let mut trace = Trace::new();
        let outcome = orchestrator.execute(&plan, &mut trace).await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);

        let result = outcome.result();
        assert_eq!(result["update"]["customer"]["email"], "new@example.com");
        assert_eq!(result["history"]["updates"][0]["fields"]["email"], "new@example.com");
        assert_eq!(outcome.route_names(), ["router", "data"]);
    }

    #[tokio::test]
    async fn test_complex_plan_merges_report() {
        let store = Arc::new(MemoryStore::seeded());
        let orchestrator = Orchestrator::new(Arc::new(local(store)));
        let plan = plan_for("active customers with open tickets", json!({}));

        let outcome = orchestrator.execute(&plan, &mut Trace::new()).await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        let ids: Vec<i64> = outcome.result()["open_tickets"]["customers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["customer"]["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, [1, 4, 5, 8]);
        assert_eq!(outcome.route_names(), ["router", "data", "support"]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(MemoryStore::seeded());
        let transport = Arc::new(Faulty::new(store, &[AgentKind::Data], 2));
        let orchestrator = Orchestrator::with_config(transport.clone(), fast_config());
        let plan = plan_for("get customer 5", json!({ "customer_id": 5 }));

        let mut trace = Trace::new();
        let outcome = orchestrator.execute(&plan, &mut trace).await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(transport.calls().len(), 3);
        assert!(trace.lines().iter().any(|l| l.contains("retrying")));
    }

    #[tokio::test]
    async fn test_unreachable_support_is_partial_failure() {
        let store = Arc::new(MemoryStore::seeded());
        let transport = Arc::new(Faulty::new(store.clone(), &[AgentKind::Support], usize::MAX));
        let orchestrator = Orchestrator::with_config(transport, fast_config());
        let plan = plan_for("Create a ticket for customer 1, app crashes", json!({}));

        let mut trace = Trace::new();
        let outcome = orchestrator.execute(&plan, &mut trace).await;
        assert_eq!(outcome.status, OutcomeStatus::PartialFailure);
        assert_eq!(outcome.result()["customer"]["customer"]["id"], 1);
        assert_eq!(outcome.result()["failed_step"], "ticket");
        assert!(trace.lines().iter().any(|l| l.contains("DownstreamUnavailable")));
        assert_eq!(store.customer_history(1).await.unwrap().tickets.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_runs_when_data_agent_is_down() {
        let store = Arc::new(MemoryStore::seeded());
        let transport = Arc::new(Faulty::new(store, &[AgentKind::Data], usize::MAX));
        let orchestrator = Orchestrator::with_config(transport, fast_config());
        let plan = plan_for("get customer 5", json!({ "customer_id": 5 }));

        let outcome = orchestrator.execute(&plan, &mut Trace::new()).await;
        assert_eq!(outcome.status, OutcomeStatus::Fallback);
        assert!(outcome.result()["reply"]["text"].is_string());
        assert_eq!(outcome.route_names(), ["router", "data", "support"]);
    }

    #[tokio::test]
    async fn test_fallback_traces_skipped_steps() {
        let store = Arc::new(MemoryStore::seeded());
        let transport = Arc::new(Faulty::new(store.clone(), &[AgentKind::Data], usize::MAX));
        let orchestrator = Orchestrator::with_config(transport, fast_config());
        let plan = plan_for("Create a ticket for customer 1, app crashes", json!({}));

        let mut trace = Trace::new();
        let outcome = orchestrator.execute(&plan, &mut trace).await;
        assert_eq!(outcome.status, OutcomeStatus::Fallback);
        assert!(outcome.result().get("ticket").is_none());
        assert!(trace
            .lines()
            .iter()
            .any(|l| l.starts_with("skipped step `ticket`: upstream step `customer` failed")));
        assert_eq!(store.customer_history(1).await.unwrap().tickets.len(), 1);
    }

    /// Applies support calls, then answers too late.
    struct LateSupport {
        inner: LocalTransport,
        support_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AgentTransport for LateSupport {
        async fn call(&self, agent: AgentKind, tool: &str, arguments: Value) -> Result<Value> {
            let output = self.inner.call(agent, tool, arguments).await;
            if agent == AgentKind::Support {
                self.support_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            output
        }
    }

    #[tokio::test]
    async fn test_timed_out_write_is_not_resent() {
        let store = Arc::new(MemoryStore::seeded());
        let transport = Arc::new(LateSupport {
            inner: local(store.clone()),
            support_calls: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::with_config(transport.clone(), fast_config());
        let plan = plan_for("Create a ticket for customer 1, app crashes", json!({}));

        let mut trace = Trace::new();
        let outcome = orchestrator.execute(&plan, &mut trace).await;
        assert_eq!(outcome.status, OutcomeStatus::PartialFailure);
        assert_eq!(outcome.result()["failed_step"], "ticket");
        assert_eq!(transport.support_calls.load(Ordering::SeqCst), 1);
        assert!(trace.lines().iter().any(|l| l.contains("not retrying write")));

        // The first attempt landed; no duplicate was created.
        assert_eq!(store.customer_history(1).await.unwrap().tickets.len(), 2);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let store = Arc::new(MemoryStore::seeded());
        let transport = Arc::new(Faulty::new(store, &[], 0));
        let orchestrator = Orchestrator::with_config(transport.clone(), fast_config());

        let mut plan = ExecutionPlan::new(Scenario::Escalation);
        plan.add_step(
            "ticket",
            AgentKind::Support,
            "update_ticket",
            vec![("ticket_id", ArgSource::literal(999)), ("status", ArgSource::literal("closed"))],
            &[],
        );

        let outcome = orchestrator.execute(&plan, &mut Trace::new()).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.error.unwrap().kind(), "NotFound");
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_blocks_only_dependents() {
        let store = Arc::new(MemoryStore::seeded());
        let orchestrator = Orchestrator::new(Arc::new(local(store)));

        let mut plan = ExecutionPlan::new(Scenario::Complex);
        let close = plan.add_step(
            "close",
            AgentKind::Support,
            "update_ticket",
            vec![("ticket_id", ArgSource::literal(999)), ("status", ArgSource::literal("closed"))],
            &[],
        );
        plan.add_step(
            "customer",
            AgentKind::Data,
            "get_customer",
            vec![("customer_id", ArgSource::literal(3))],
            &[],
        );
        plan.add_step(
            "after_close",
            AgentKind::Data,
            "get_customer_history",
            vec![("customer_id", ArgSource::literal(3))],
            &[close],
        );

        let mut trace = Trace::new();
        let outcome = orchestrator.execute(&plan, &mut trace).await;
        assert_eq!(outcome.status, OutcomeStatus::PartialFailure);
        let result = outcome.result();
        assert_eq!(result["customer"]["customer"]["id"], 3);
        assert!(result.get("after_close").is_none());
        assert_eq!(result["failed_step"], "close");
        assert!(trace.lines().iter().any(|l| l.starts_with("skipped step `after_close`")));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_aborts() {
        let store = Arc::new(MemoryStore::seeded());
        let transport = Arc::new(Faulty::new(store, &[AgentKind::Data], usize::MAX));
        let config = OrchestratorConfig {
            step_budget: 2,
            ..fast_config()
        };
        let orchestrator = Orchestrator::with_config(transport, config);
        let plan = plan_for("get customer 5", json!({ "customer_id": 5 }));

        let outcome = orchestrator.execute(&plan, &mut Trace::new()).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(matches!(outcome.error, Some(Error::BudgetExceeded { limit: 2 })));
    }

    #[tokio::test]
    async fn test_missing_customer_fails_template_without_ticket() {
        let store = Arc::new(MemoryStore::seeded());
        let orchestrator = Orchestrator::new(Arc::new(local(store)));
        let plan = plan_for("Create a ticket for customer 42", json!({}));

        let mut trace = Trace::new();
        let outcome = orchestrator.execute(&plan, &mut trace).await;
        assert_eq!(outcome.status, OutcomeStatus::PartialFailure);
        assert!(trace.lines().iter().any(|l| l.contains("TemplateError")));
    }
}
