//! Worker agents reachable over A2A.
//!
//! Every agent answers `POST /a2a/call` with `{tool, arguments}` and replies
//! with the bare tool result, so the router can treat them uniformly.
//! `POST /a2a/message` takes free text and maps it onto a tool call.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::card::AgentCard;
use crate::error::{Error, Result};
use crate::router::RouteRequest;
use crate::store::{Datastore, TicketPatch};
use crate::tools::{
    self, parse_args, FieldSpec, FieldType, InputSchema, ToolBackend, ToolContext, ToolName,
};

/// Identity of an agent in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Classifies and orchestrates.
    Router,
    /// Customer records.
    Data,
    /// Tickets and replies.
    Support,
}

impl AgentKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Data => "data",
            Self::Support => "support",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "router" => Ok(Self::Router),
            "data" => Ok(Self::Data),
            "support" => Ok(Self::Support),
            other => Err(Error::Protocol(format!("unknown agent: {other}"))),
        }
    }
}

/// Direct tool invocation body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aCall {
    /// Tool name.
    pub tool: String,
    /// Tool arguments.
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    json!({})
}

/// Body accepted on `POST /a2a/call`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum A2aRequest {
    /// Router entry point: `{task, text, args}`.
    Task(RouteRequest),
    /// Direct invocation: `{tool, arguments}`.
    Call(A2aCall),
}

impl A2aRequest {
    /// Parse a request body, mapping shape errors to protocol errors.
    pub fn from_value(body: Value) -> Result<Self> {
        serde_json::from_value(body).map_err(|_| {
            Error::Protocol("expected {tool, arguments} or {task, text, args}".into())
        })
    }
}

/// Free-form A2A message, `{role, content}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Sender role.
    #[serde(default = "user_role")]
    pub role: String,
    /// Message text.
    pub content: String,
}

fn user_role() -> String {
    "user".into()
}

/// Reply for a message no auto rule picked up.
fn unmatched_message() -> Value {
    json!({ "ok": true, "note": "message received, no auto rule matched" })
}

/// An agent that executes tool calls.
#[async_trait::async_trait]
pub trait WorkerAgent: Send + Sync {
    /// Which agent this is.
    fn kind(&self) -> AgentKind;

    /// Static capability card.
    fn card(&self) -> &AgentCard;

    /// Validate and execute one tool call.
    async fn call(&self, tool: &str, arguments: Value) -> Result<Value>;

    /// Handle a free-form message by mapping it onto a tool call, if a rule
    /// matches.
    async fn message(&self, content: &str) -> Result<Value>;
}

// =============================================================================
// Data agent
// =============================================================================

/// Customer data agent: validates, then forwards to the tool registry.
pub struct DataAgent {
    card: AgentCard,
    backend: Arc<dyn ToolBackend>,
}

impl DataAgent {
    /// Create a data agent forwarding to `backend`.
    pub fn new(card: AgentCard, backend: Arc<dyn ToolBackend>) -> Self {
        Self { card, backend }
    }
}

#[async_trait::async_trait]
impl WorkerAgent for DataAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Data
    }

    fn card(&self) -> &AgentCard {
        &self.card
    }

    async fn call(&self, tool: &str, arguments: Value) -> Result<Value> {
        let tool: ToolName = tool.parse()?;
        let args = tool.schema().validate(&arguments)?;
        debug!(tool = %tool, "data agent forwarding to tool backend");
        self.backend.call_tool(tool, Value::Object(args)).await
    }

    /// Any number in the message is taken as a customer id.
    async fn message(&self, content: &str) -> Result<Value> {
        match first_number(content) {
            Some(customer_id) => {
                let arguments = json!({ "customer_id": customer_id });
                self.call(ToolName::GetCustomer.as_str(), arguments).await
            }
            None => Ok(unmatched_message()),
        }
    }
}

fn first_number(text: &str) -> Option<i64> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|digits| !digits.is_empty())
        .and_then(|digits| digits.parse().ok())
}

// =============================================================================
// Support agent
// =============================================================================

/// Tools executed locally by the support agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportTool {
    CreateTicket,
    UpdateTicket,
    Escalate,
    SimpleSupportReply,
    SuggestResolution,
    TicketsReportForCustomers,
}

const UPDATE_TICKET_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("ticket_id", FieldType::Integer, "Ticket ID"),
    FieldSpec::optional(
        "status",
        FieldType::String,
        "open, in_progress, resolved or closed",
    ),
    FieldSpec::optional("priority", FieldType::String, "low, medium or high"),
];

const TEXT_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("text", FieldType::String, "Customer message"),
    FieldSpec::optional("customer_id", FieldType::Integer, "Customer, when known"),
];

const REPORT_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("customer_ids", FieldType::IntegerList, "Customers to report on"),
    FieldSpec::optional("status", FieldType::String, "Only tickets with this status"),
    FieldSpec::optional("priority", FieldType::String, "Only tickets with this priority"),
];

const TICKET_STATUSES: [&str; 4] = ["open", "in_progress", "resolved", "closed"];

impl SupportTool {
    /// All support tools.
    pub const ALL: [SupportTool; 6] = [
        Self::CreateTicket,
        Self::UpdateTicket,
        Self::Escalate,
        Self::SimpleSupportReply,
        Self::SuggestResolution,
        Self::TicketsReportForCustomers,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTicket => "create_ticket",
            Self::UpdateTicket => "update_ticket",
            Self::Escalate => "escalate",
            Self::SimpleSupportReply => "simple_support_reply",
            Self::SuggestResolution => "suggest_resolution",
            Self::TicketsReportForCustomers => "tickets_report_for_customers",
        }
    }

    /// One-line description for capability listings.
    pub fn description(self) -> &'static str {
        match self {
            Self::CreateTicket => "Create a ticket for an existing customer",
            Self::UpdateTicket => "Change the status or priority of a ticket",
            Self::Escalate => "Open a high priority ticket and acknowledge the customer",
            Self::SimpleSupportReply => "Short reply based on the issue text",
            Self::SuggestResolution => "Draft a resolution with the customer's history as context",
            Self::TicketsReportForCustomers => "Tickets for a list of customers, with filters",
        }
    }

    /// Input schema.
    pub fn schema(self) -> InputSchema {
        match self {
            Self::CreateTicket => ToolName::CreateTicket.schema(),
            Self::UpdateTicket => InputSchema { fields: UPDATE_TICKET_FIELDS },
            Self::Escalate | Self::SimpleSupportReply | Self::SuggestResolution => {
                InputSchema { fields: TEXT_FIELDS }
            }
            Self::TicketsReportForCustomers => InputSchema { fields: REPORT_FIELDS },
        }
    }
}

impl FromStr for SupportTool {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::ToolNotFound(s.to_string()))
    }
}

/// Support agent: validates, then acts on the datastore directly.
pub struct SupportAgent {
    card: AgentCard,
    ctx: ToolContext,
}

impl SupportAgent {
    /// Create a support agent working against `store`.
    pub fn new(card: AgentCard, store: Arc<dyn Datastore>) -> Self {
        Self {
            card,
            ctx: ToolContext::new(store),
        }
    }
}

#[async_trait::async_trait]
impl WorkerAgent for SupportAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Support
    }

    fn card(&self) -> &AgentCard {
        &self.card
    }

    async fn call(&self, tool: &str, arguments: Value) -> Result<Value> {
        let tool: SupportTool = tool.parse()?;
        let args = tool.schema().validate(&arguments)?;
        info!(tool = tool.as_str(), "support agent handling call");

        match tool {
            SupportTool::CreateTicket => {
                tools::execute(&self.ctx, ToolName::CreateTicket, args).await
            }
            SupportTool::UpdateTicket => self.update_ticket(parse_args(args)?).await,
            SupportTool::Escalate => self.escalate(parse_args(args)?).await,
            SupportTool::SimpleSupportReply => {
                let resolution = self.suggest_resolution(parse_args(args)?).await?;
                Ok(json!({
                    "text": resolution["suggestion"],
                    "intent": resolution["intent"],
                    "context": resolution["context"],
                }))
            }
            SupportTool::SuggestResolution => self.suggest_resolution(parse_args(args)?).await,
            SupportTool::TicketsReportForCustomers => self.tickets_report(parse_args(args)?).await,
        }
    }

    /// Refund and double-charge complaints get a drafted resolution.
    async fn message(&self, content: &str) -> Result<Value> {
        let lower = content.to_lowercase();
        if lower.contains("refund") || lower.contains("charged twice") {
            let arguments = json!({ "text": content });
            return self.call(SupportTool::SuggestResolution.as_str(), arguments).await;
        }
        Ok(unmatched_message())
    }
}

#[derive(Debug, Deserialize)]
struct UpdateTicketArgs {
    ticket_id: i64,
    status: Option<String>,
    priority: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextArgs {
    text: String,
    customer_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ReportArgs {
    customer_ids: Vec<i64>,
    status: Option<String>,
    priority: Option<String>,
}

impl SupportAgent {
    async fn update_ticket(&self, args: UpdateTicketArgs) -> Result<Value> {
        if args.status.is_none() && args.priority.is_none() {
            return Err(Error::validation("status", "provide status or priority"));
        }
        if let Some(status) = &args.status {
            if !TICKET_STATUSES.contains(&status.as_str()) {
                return Err(Error::validation(
                    "status",
                    format!("expected one of {}", TICKET_STATUSES.join(", ")),
                ));
            }
        }

        let patch = TicketPatch {
            status: args.status,
            priority: args.priority,
        };
        let ticket = self
            .ctx
            .store
            .update_ticket(args.ticket_id, patch)
            .await?
            .ok_or_else(|| Error::NotFound(format!("ticket {}", args.ticket_id)))?;
        Ok(json!({ "updated": true, "ticket": ticket }))
    }

    async fn escalate(&self, args: TextArgs) -> Result<Value> {
        let intent = guess_intent(&args.text);
        let mut ticket_id = None;

        if let Some(customer_id) = args.customer_id {
            if self.ctx.store.get_customer(customer_id).await?.is_some() {
                let mut ticket = Map::new();
                ticket.insert("customer_id".into(), json!(customer_id));
                ticket.insert("issue".into(), json!(args.text));
                ticket.insert("priority".into(), json!("high"));
                let created = tools::execute(&self.ctx, ToolName::CreateTicket, ticket).await?;
                ticket_id = created["ticket_id"].as_i64();
            }
        }

        Ok(json!({
            "escalated": true,
            "priority": "high",
            "intent": intent,
            "ticket_id": ticket_id,
            "reply": format!(
                "Your request has been escalated to a senior support specialist. {}",
                suggestion_for(intent)
            ),
        }))
    }

    async fn suggest_resolution(&self, args: TextArgs) -> Result<Value> {
        let mut context = Map::new();
        if let Some(customer_id) = args.customer_id {
            let history = self.ctx.store.customer_history(customer_id).await?;
            context.insert("history".into(), serde_json::to_value(history)?);
        }

        let intent = guess_intent(&args.text);
        Ok(json!({
            "suggestion": suggestion_for(intent),
            "context": context,
            "intent": intent,
        }))
    }

    async fn tickets_report(&self, args: ReportArgs) -> Result<Value> {
        let mut report = Vec::with_capacity(args.customer_ids.len());
        for customer_id in args.customer_ids {
            let tickets: Vec<_> = self
                .ctx
                .store
                .customer_history(customer_id)
                .await?
                .tickets
                .into_iter()
                .filter(|t| {
                    args.status.as_ref().map_or(true, |s| t.status.eq_ignore_ascii_case(s))
                        && args
                            .priority
                            .as_ref()
                            .map_or(true, |p| t.priority.eq_ignore_ascii_case(p))
                })
                .collect();
            report.push(json!({ "customer_id": customer_id, "tickets": tickets }));
        }

        Ok(json!({
            "report": report,
            "filter_status": args.status,
            "filter_priority": args.priority,
        }))
    }
}

/// Coarse intent of a support message.
pub fn guess_intent(text: &str) -> &'static str {
    let t = text.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| t.contains(w));

    if any(&["refund", "charge", "billing", "invoice"]) {
        "billing"
    } else if any(&["delay", "delivery", "shipping", "package"]) {
        "shipping"
    } else if any(&["upgrade", "account", "password", "login"]) {
        "account"
    } else {
        "general"
    }
}

fn suggestion_for(intent: &str) -> &'static str {
    match intent {
        "billing" => {
            "We can start a refund and confirm the payment record once you share the transaction date and amount."
        }
        "shipping" => "We will open a tracking case with the carrier and update you as soon as we hear back.",
        "account" => {
            "Open the account dashboard, choose Plan & Billing, pick the tier you want and confirm the payment method."
        }
        _ => "Thanks for reaching out. We will investigate and follow up with step-by-step guidance.",
    }
}
