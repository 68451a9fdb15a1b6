//! Execution plans.
//!
//! A plan is an arena of [`Step`]s addressed by index. Dependencies and
//! argument templates refer to earlier steps by id, so the graph needs no
//! shared ownership and is checked once, before anything is dispatched.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::agent::{AgentKind, SupportTool};
use crate::classifier::{Classification, Intent, Scenario};
use crate::error::{Error, Result};
use crate::tools::ToolName;

/// Default static bound on plan length.
pub const DEFAULT_MAX_STEPS: usize = 8;

/// Router-local step joining the customer list with the tickets report.
pub const MERGE_OPEN_TICKETS: &str = "merge_open_tickets";

/// Index of a step within its plan.
pub type StepId = usize;

/// Where a step argument comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ArgSource {
    /// Fixed value.
    Literal { value: Value },
    /// JSON pointer into an earlier step's output.
    FromStep { step: StepId, pointer: String },
    /// `field` of every element of the array at `pointer`.
    Pluck {
        step: StepId,
        pointer: String,
        field: String,
    },
}

impl ArgSource {
    /// Fixed value.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal { value: value.into() }
    }

    /// Value at `pointer` in the output of `step`.
    pub fn from_step(step: StepId, pointer: &str) -> Self {
        Self::FromStep {
            step,
            pointer: pointer.into(),
        }
    }

    /// `field` of each element of the array at `pointer` in `step`'s output.
    pub fn pluck(step: StepId, pointer: &str, field: &str) -> Self {
        Self::Pluck {
            step,
            pointer: pointer.into(),
            field: field.into(),
        }
    }

    fn source_step(&self) -> Option<StepId> {
        match self {
            Self::Literal { .. } => None,
            Self::FromStep { step, .. } | Self::Pluck { step, .. } => Some(*step),
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    /// Position in the arena.
    pub id: StepId,
    /// Key of this step's output in the final answer.
    pub name: String,
    /// Agent that runs it.
    pub agent: AgentKind,
    /// Tool to invoke.
    pub tool: String,
    /// Arguments in declaration order.
    pub arguments: Vec<(String, ArgSource)>,
    /// Steps that must complete first.
    pub depends_on: Vec<StepId>,
}

impl Step {
    /// Materialize arguments from completed outputs.
    pub fn resolve_arguments(&self, outputs: &[Option<Value>]) -> Result<Value> {
        let mut args = Map::new();
        for (name, source) in &self.arguments {
            let value = match source {
                ArgSource::Literal { value } => value.clone(),
                ArgSource::FromStep { step, pointer } => self
                    .output_of(outputs, *step)?
                    .pointer(pointer)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        Error::Template(format!(
                            "`{}.{name}`: step {step} output has no value at {pointer}",
                            self.name
                        ))
                    })?,
                ArgSource::Pluck { step, pointer, field } => {
                    let items = self
                        .output_of(outputs, *step)?
                        .pointer(pointer)
                        .and_then(Value::as_array)
                        .ok_or_else(|| {
                            Error::Template(format!(
                                "`{}.{name}`: step {step} output has no array at {pointer}",
                                self.name
                            ))
                        })?;
                    Value::Array(items.iter().filter_map(|i| i.get(field).cloned()).collect())
                }
            };
            args.insert(name.clone(), value);
        }
        Ok(Value::Object(args))
    }

    fn output_of<'a>(&self, outputs: &'a [Option<Value>], step: StepId) -> Result<&'a Value> {
        outputs
            .get(step)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Template(format!("`{}`: step {step} has no output", self.name)))
    }

    /// Whether this step mutates customer or ticket state.
    pub fn is_write(&self) -> bool {
        match self.agent {
            AgentKind::Data => self.tool.parse::<ToolName>().is_ok_and(ToolName::is_write),
            AgentKind::Support => matches!(
                self.tool.parse::<SupportTool>(),
                Ok(SupportTool::CreateTicket | SupportTool::UpdateTicket | SupportTool::Escalate)
            ),
            AgentKind::Router => false,
        }
    }

    /// Customer a write step targets, `Some(None)` when templated.
    fn write_target(&self) -> Option<Option<i64>> {
        if !self.is_write() {
            return None;
        }
        self.arguments
            .iter()
            .find(|(name, _)| name == "customer_id")
            .map(|(_, source)| match source {
                ArgSource::Literal { value } => value.as_i64(),
                _ => None,
            })
    }
}

/// Dependency-ordered plan for one routed task.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    /// Plan id, used in trace lines.
    pub id: Uuid,
    /// Scenario the plan was built for.
    pub scenario: Scenario,
    /// Step arena.
    pub steps: Vec<Step>,
    /// Run instead of failing when a step on another agent fails.
    pub fallback: Option<Step>,
}

impl ExecutionPlan {
    /// Empty plan.
    pub fn new(scenario: Scenario) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario,
            steps: Vec::new(),
            fallback: None,
        }
    }

    /// Append a step and return its id.
    pub fn add_step(
        &mut self,
        name: &str,
        agent: AgentKind,
        tool: &str,
        arguments: Vec<(&str, ArgSource)>,
        depends_on: &[StepId],
    ) -> StepId {
        let id = self.steps.len();
        self.steps.push(Step {
            id,
            name: name.into(),
            agent,
            tool: tool.into(),
            arguments: arguments.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            depends_on: depends_on.to_vec(),
        });
        id
    }

    /// Set the fallback step. Its arguments must be literals.
    pub fn set_fallback(
        &mut self,
        name: &str,
        agent: AgentKind,
        tool: &str,
        arguments: Vec<(&str, ArgSource)>,
    ) {
        self.fallback = Some(Step {
            id: usize::MAX,
            name: name.into(),
            agent,
            tool: tool.into(),
            arguments: arguments.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            depends_on: Vec::new(),
        });
    }

    /// Agents the plan dispatches to, in first-use order.
    pub fn agents(&self) -> Vec<AgentKind> {
        let mut seen = Vec::new();
        for step in &self.steps {
            if !seen.contains(&step.agent) {
                seen.push(step.agent);
            }
        }
        seen
    }

    /// Check every structural invariant.
    pub fn validate(&self, max_steps: usize) -> Result<()> {
        if self.steps.len() > max_steps {
            return Err(Error::PlanTooLarge {
                steps: self.steps.len(),
                max: max_steps,
            });
        }
        if self.steps.is_empty() {
            return Err(Error::InvalidPlan("plan has no steps".into()));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.id != index {
                return Err(Error::InvalidPlan(format!(
                    "step `{}` has id {} at {index}",
                    step.name, step.id
                )));
            }
            for &dep in &step.depends_on {
                if dep >= self.steps.len() || dep == index {
                    return Err(Error::InvalidPlan(format!(
                        "step `{}` depends on unknown step {dep}",
                        step.name
                    )));
                }
            }
            for (arg, source) in &step.arguments {
                if let Some(src) = source.source_step() {
                    if !step.depends_on.contains(&src) {
                        return Err(Error::InvalidPlan(format!(
                            "`{}.{arg}` reads step {src} without depending on it",
                            step.name
                        )));
                    }
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            if fallback.arguments.iter().any(|(_, s)| s.source_step().is_some()) {
                return Err(Error::InvalidPlan("fallback arguments must be literals".into()));
            }
        }

        self.topological_order()?;
        self.check_write_ordering()
    }

    /// Kahn's algorithm. Fails on a cycle.
    pub fn topological_order(&self) -> Result<Vec<StepId>> {
        let mut in_degree: Vec<usize> = self.steps.iter().map(|s| s.depends_on.len()).collect();
        let mut queue: VecDeque<StepId> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for step in &self.steps {
                if step.depends_on.contains(&id) {
                    in_degree[step.id] -= 1;
                    if in_degree[step.id] == 0 {
                        queue.push_back(step.id);
                    }
                }
            }
        }

        if order.len() == self.steps.len() {
            Ok(order)
        } else {
            Err(Error::InvalidPlan("dependency cycle".into()))
        }
    }

    fn ancestors(&self, id: StepId) -> HashSet<StepId> {
        let mut seen = HashSet::new();
        let mut stack = self.steps[id].depends_on.clone();
        while let Some(dep) = stack.pop() {
            if seen.insert(dep) {
                stack.extend(&self.steps[dep].depends_on);
            }
        }
        seen
    }

    /// Two writes that may touch the same customer must be ordered.
    fn check_write_ordering(&self) -> Result<()> {
        let writes: Vec<(StepId, Option<i64>)> = self
            .steps
            .iter()
            .filter_map(|s| s.write_target().map(|target| (s.id, target)))
            .collect();

        for (i, &(a, target_a)) in writes.iter().enumerate() {
            for &(b, target_b) in &writes[i + 1..] {
                let may_overlap = match (target_a, target_b) {
                    (Some(x), Some(y)) => x == y,
                    _ => true,
                };
                let ordered = self.ancestors(b).contains(&a) || self.ancestors(a).contains(&b);
                if may_overlap && !ordered {
                    return Err(Error::InvalidPlan(format!(
                        "writes `{}` and `{}` on the same customer are unordered",
                        self.steps[a].name, self.steps[b].name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builds a validated plan for each scenario.
#[derive(Debug, Clone, Copy)]
pub struct PlanBuilder {
    max_steps: usize,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

impl PlanBuilder {
    /// Builder enforcing `max_steps`.
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }

    /// Build and validate the plan for `classification`.
    pub fn build(&self, classification: &Classification) -> Result<ExecutionPlan> {
        let c = classification;
        let mut plan = ExecutionPlan::new(c.scenario);

        match c.scenario {
            Scenario::Simple => {
                match (c.intent, c.customer_id) {
                    (Intent::ListCustomers, _) | (_, None) => {
                        let mut args = Vec::new();
                        if let Some(status) = c.args.get("status").filter(|v| v.is_string()) {
                            args.push(("status", ArgSource::literal(status.clone())));
                        }
                        if let Some(limit) = c.args.get("limit").filter(|v| v.is_i64()) {
                            args.push(("limit", ArgSource::literal(limit.clone())));
                        }
                        let tool = ToolName::ListCustomers.as_str();
                        plan.add_step("customers", AgentKind::Data, tool, args, &[]);
                    }
                    (_, Some(id)) => {
                        plan.add_step(
                            "customer",
                            AgentKind::Data,
                            ToolName::GetCustomer.as_str(),
                            vec![("customer_id", ArgSource::literal(id))],
                            &[],
                        );
                    }
                }
                set_reply_fallback(&mut plan, c);
            }
            Scenario::Coordinated => {
                let id = require_customer(c)?;
                let lookup = plan.add_step(
                    "customer",
                    AgentKind::Data,
                    ToolName::GetCustomer.as_str(),
                    vec![("customer_id", ArgSource::literal(id))],
                    &[],
                );
                if c.intent == Intent::AccountHelp {
                    plan.add_step(
                        "reply",
                        AgentKind::Support,
                        SupportTool::SimpleSupportReply.as_str(),
                        vec![
                            ("text", ArgSource::literal(c.text.clone())),
                            ("customer_id", ArgSource::from_step(lookup, "/customer/id")),
                        ],
                        &[lookup],
                    );
                } else {
                    let priority = c
                        .args
                        .get("priority")
                        .and_then(Value::as_str)
                        .unwrap_or("medium")
                        .to_string();
                    plan.add_step(
                        "ticket",
                        AgentKind::Support,
                        SupportTool::CreateTicket.as_str(),
                        vec![
                            ("customer_id", ArgSource::from_step(lookup, "/customer/id")),
                            ("issue", ArgSource::literal(c.text.clone())),
                            ("priority", ArgSource::literal(priority)),
                        ],
                        &[lookup],
                    );
                }
                set_reply_fallback(&mut plan, c);
            }
            Scenario::Complex => {
                let customers = plan.add_step(
                    "customers",
                    AgentKind::Data,
                    ToolName::ListCustomers.as_str(),
                    vec![
                        ("status", ArgSource::literal("active")),
                        ("limit", ArgSource::literal(200)),
                    ],
                    &[],
                );
                let report = plan.add_step(
                    "report",
                    AgentKind::Support,
                    SupportTool::TicketsReportForCustomers.as_str(),
                    vec![
                        ("customer_ids", ArgSource::pluck(customers, "/customers", "id")),
                        ("status", ArgSource::literal("open")),
                    ],
                    &[customers],
                );
                plan.add_step(
                    "open_tickets",
                    AgentKind::Router,
                    MERGE_OPEN_TICKETS,
                    vec![
                        ("customers", ArgSource::from_step(customers, "/customers")),
                        ("report", ArgSource::from_step(report, "/report")),
                    ],
                    &[customers, report],
                );
            }
            Scenario::Escalation => {
                let mut args = vec![("text", ArgSource::literal(c.text.clone()))];
                if let Some(id) = c.customer_id {
                    args.push(("customer_id", ArgSource::literal(id)));
                }
                let tool = SupportTool::Escalate.as_str();
                plan.add_step("escalation", AgentKind::Support, tool, args, &[]);
            }
            Scenario::MultiIntent => {
                let id = require_customer(c)?;
                let update = c
                    .args
                    .get("update")
                    .filter(|v| v.is_object())
                    .cloned()
                    .ok_or_else(|| Error::validation("update", "expected object"))?;
                let updated = plan.add_step(
                    "update",
                    AgentKind::Data,
                    ToolName::UpdateCustomer.as_str(),
                    vec![
                        ("customer_id", ArgSource::literal(id)),
                        ("data", ArgSource::literal(update)),
                    ],
                    &[],
                );
                plan.add_step(
                    "history",
                    AgentKind::Data,
                    ToolName::GetCustomerHistory.as_str(),
                    vec![("customer_id", ArgSource::literal(id))],
                    &[updated],
                );
            }
        }

        plan.validate(self.max_steps)?;
        Ok(plan)
    }
}

fn require_customer(c: &Classification) -> Result<i64> {
    c.customer_id.ok_or_else(|| {
        Error::validation(
            "customer_id",
            format!("required for {} tasks", c.scenario.as_str()),
        )
    })
}

fn set_reply_fallback(plan: &mut ExecutionPlan, c: &Classification) {
    let mut args = vec![("text", ArgSource::literal(c.text.clone()))];
    if let Some(id) = c.customer_id {
        args.push(("customer_id", ArgSource::literal(id)));
    }
    plan.set_fallback("reply", AgentKind::Support, SupportTool::SimpleSupportReply.as_str(), args);
}

/// Join the active-customer list with the tickets report, keeping customers
/// that have at least one ticket.
pub fn merge_open_tickets(arguments: &Value) -> Result<Value> {
    let customers = arguments["customers"]
        .as_array()
        .ok_or_else(|| Error::validation("customers", "expected array"))?;
    let report = arguments["report"]
        .as_array()
        .ok_or_else(|| Error::validation("report", "expected array"))?;

    let merged: Vec<Value> = customers
        .iter()
        .filter_map(|customer| {
            let id = customer.get("id").and_then(Value::as_i64)?;
            let tickets = report
                .iter()
                .find(|entry| entry["customer_id"].as_i64() == Some(id))
                .and_then(|entry| entry["tickets"].as_array())
                .filter(|tickets| !tickets.is_empty())?;
            Some(json!({ "customer": customer, "tickets": tickets }))
        })
        .collect();

    Ok(json!({ "customers": merged, "count": merged.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RuleClassifier;

    fn classify(text: &str, args: Value) -> Classification {
        RuleClassifier::new()
            .classify_sync(text, args.as_object().unwrap())
            .unwrap()
    }

    #[test]
    fn test_simple_plan_is_one_data_step() {
        let plan = PlanBuilder::default()
            .build(&classify("get customer 5", json!({ "customer_id": 5 })))
            .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool, "get_customer");
        assert_eq!(plan.agents(), [AgentKind::Data]);
        assert!(plan.fallback.is_some());
    }

    #[test]
    fn test_coordinated_plan_templates_customer_id() {
        let plan = PlanBuilder::default()
            .build(&classify("Create a ticket for customer 1: app crashes", json!({})))
            .unwrap();
        assert_eq!(plan.agents(), [AgentKind::Data, AgentKind::Support]);
        let ticket = &plan.steps[1];
        assert_eq!(ticket.depends_on, [0]);
        assert_eq!(ticket.arguments[0].1, ArgSource::from_step(0, "/customer/id"));
    }

    #[test]
    fn test_multi_intent_orders_history_after_update() {
        let plan = PlanBuilder::default()
            .build(&classify(
                "update",
                json!({ "customer_id": 1, "update": { "phone": "1" }, "also": "history" }),
            ))
            .unwrap();
        assert_eq!(plan.topological_order().unwrap(), [0, 1]);
        assert_eq!(plan.steps[1].depends_on, [0]);
    }

    #[test]
    fn test_plan_over_bound_is_rejected() {
        let err = PlanBuilder::new(2)
            .build(&classify("active customers with open tickets", json!({})))
            .unwrap_err();
        assert!(matches!(err, Error::PlanTooLarge { steps: 3, max: 2 }));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut plan = ExecutionPlan::new(Scenario::Complex);
        plan.add_step("a", AgentKind::Data, "get_customer", vec![], &[1]);
        plan.add_step("b", AgentKind::Data, "get_customer", vec![], &[0]);
        let err = plan.validate(8).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_template_without_dependency_is_rejected() {
        let mut plan = ExecutionPlan::new(Scenario::Coordinated);
        plan.add_step("a", AgentKind::Data, "get_customer", vec![], &[]);
        plan.add_step(
            "b",
            AgentKind::Support,
            "create_ticket",
            vec![("customer_id", ArgSource::from_step(0, "/customer/id"))],
            &[],
        );
        assert_eq!(plan.validate(8).unwrap_err().kind(), "InvalidPlan");
    }

    #[test]
    fn test_unordered_writes_on_same_customer_are_rejected() {
        let mut plan = ExecutionPlan::new(Scenario::MultiIntent);
        let data = json!({ "email": "a@b.c" });
        plan.add_step(
            "first",
            AgentKind::Data,
            "update_customer",
            vec![
                ("customer_id", ArgSource::literal(1)),
                ("data", ArgSource::literal(data.clone())),
            ],
            &[],
        );
        plan.add_step(
            "second",
            AgentKind::Support,
            "create_ticket",
            vec![("customer_id", ArgSource::literal(1)), ("issue", ArgSource::literal("x"))],
            &[],
        );
        assert!(plan.validate(8).is_err());

        plan.steps[1].depends_on.push(0);
        plan.validate(8).unwrap();
    }

    #[test]
    fn test_resolve_arguments() {
        let mut plan = ExecutionPlan::new(Scenario::Complex);
        plan.add_step("list", AgentKind::Data, "list_customers", vec![], &[]);
        plan.add_step(
            "report",
            AgentKind::Support,
            "tickets_report_for_customers",
            vec![("customer_ids", ArgSource::pluck(0, "/customers", "id"))],
            &[0],
        );
        let outputs = vec![Some(json!({ "customers": [{ "id": 1 }, { "id": 4 }] })), None];
        let args = plan.steps[1].resolve_arguments(&outputs).unwrap();
        assert_eq!(args, json!({ "customer_ids": [1, 4] }));

        let err = plan.steps[1].resolve_arguments(&[Some(json!({})), None]).unwrap_err();
        assert_eq!(err.kind(), "TemplateError");
    }

    #[test]
    fn test_null_template_value_is_an_error() {
        let mut plan = ExecutionPlan::new(Scenario::Coordinated);
        plan.add_step("customer", AgentKind::Data, "get_customer", vec![], &[]);
        plan.add_step(
            "ticket",
            AgentKind::Support,
            "create_ticket",
            vec![("customer_id", ArgSource::from_step(0, "/customer/id"))],
            &[0],
        );
        let err = plan.steps[1]
            .resolve_arguments(&[Some(json!({ "customer": null })), None])
            .unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn test_merge_keeps_customers_with_tickets() {
        let merged = merge_open_tickets(&json!({
            "customers": [{ "id": 1 }, { "id": 2 }],
            "report": [
                { "customer_id": 1, "tickets": [{ "id": 1 }] },
                { "customer_id": 2, "tickets": [] }
            ]
        }))
        .unwrap();
        assert_eq!(merged["count"], 1);
        assert_eq!(merged["customers"][0]["customer"]["id"], 1);
    }
}
