//! Tool definitions for agent-mesh.
//!
//! Tools form a closed set: every name the protocol server accepts maps to one
//! [`ToolName`] variant, which owns its input schema and its typed handler.
//! Unknown names are rejected at the boundary with [`Error::ToolNotFound`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::ToolDefinition;
use crate::store::{validate_customer_patch, Datastore, NewTicket};

/// JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Signed 64-bit integer.
    Integer,
    /// String.
    String,
    /// String or null.
    NullableString,
    /// JSON object.
    Object,
    /// Array of integers.
    IntegerList,
}

impl FieldType {
    fn json_schema(self) -> Value {
        match self {
            Self::Integer => json!({ "type": "integer" }),
            Self::String => json!({ "type": "string" }),
            Self::NullableString => json!({ "type": ["string", "null"] }),
            Self::Object => json!({ "type": "object" }),
            Self::IntegerList => json!({ "type": "array", "items": { "type": "integer" } }),
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Integer => value.as_i64().is_some(),
            Self::String => value.is_string(),
            Self::NullableString => value.is_string() || value.is_null(),
            Self::Object => value.is_object(),
            Self::IntegerList => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| v.as_i64().is_some())),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Self::Integer => "expected integer",
            Self::String => "expected string",
            Self::NullableString => "expected string or null",
            Self::Object => "expected object",
            Self::IntegerList => "expected array of integers",
        }
    }
}

/// One field of a tool input schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Argument name.
    pub name: &'static str,
    /// Expected type.
    pub ty: FieldType,
    /// Whether the argument must be present.
    pub required: bool,
    /// Human-readable description.
    pub description: &'static str,
}

impl FieldSpec {
    /// A required field.
    pub const fn required(name: &'static str, ty: FieldType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: true,
            description,
        }
    }

    /// An optional field.
    pub const fn optional(name: &'static str, ty: FieldType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: false,
            description,
        }
    }
}

/// Structural input schema of a tool.
#[derive(Debug, Clone, Copy)]
pub struct InputSchema {
    /// Fields in declaration order; validation reports the first failing one.
    pub fields: &'static [FieldSpec],
}

impl InputSchema {
    /// Render as a JSON Schema object for `tools/list`.
    pub fn to_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                let mut schema = f.ty.json_schema();
                schema["description"] = json!(f.description);
                (f.name.to_string(), schema)
            })
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }

    /// Check `arguments` against the schema.
    ///
    /// Unknown keys are ignored; absent optional fields are left absent.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>> {
        let Value::Object(args) = arguments else {
            return Err(Error::validation("arguments", "expected object"));
        };

        for field in self.fields {
            match args.get(field.name) {
                None if field.required => {
                    return Err(Error::validation(field.name, "missing required field"));
                }
                None => {}
                Some(value) if !field.ty.matches(value) => {
                    return Err(Error::validation(field.name, field.ty.expected()));
                }
                Some(_) => {}
            }
        }

        Ok(args.clone())
    }
}

/// Deserialize already-validated arguments into a handler's argument type.
pub fn parse_args<T: DeserializeOwned>(args: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| Error::validation("arguments", e.to_string()))
}

/// The tools exposed by the protocol server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetCustomer,
    ListCustomers,
    UpdateCustomer,
    GetCustomerHistory,
    CreateTicket,
}

const GET_CUSTOMER_FIELDS: &[FieldSpec] = &[FieldSpec::required(
    "customer_id",
    FieldType::Integer,
    "Customer ID",
)];

const LIST_CUSTOMERS_FIELDS: &[FieldSpec] = &[
    FieldSpec::optional(
        "status",
        FieldType::NullableString,
        "Only return customers with this status",
    ),
    FieldSpec::optional(
        "limit",
        FieldType::Integer,
        "Maximum customers to return (default: 100)",
    ),
];

const UPDATE_CUSTOMER_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("customer_id", FieldType::Integer, "Customer ID"),
    FieldSpec::required(
        "data",
        FieldType::Object,
        "Fields to change: name, email, phone, status",
    ),
];

const CREATE_TICKET_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("customer_id", FieldType::Integer, "Customer the ticket belongs to"),
    FieldSpec::required("issue", FieldType::String, "Issue description"),
    FieldSpec::optional(
        "priority",
        FieldType::String,
        "low, medium or high (default: medium)",
    ),
];

impl ToolName {
    /// All tools in registration order.
    pub const ALL: [ToolName; 5] = [
        Self::GetCustomer,
        Self::ListCustomers,
        Self::UpdateCustomer,
        Self::GetCustomerHistory,
        Self::CreateTicket,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetCustomer => "get_customer",
            Self::ListCustomers => "list_customers",
            Self::UpdateCustomer => "update_customer",
            Self::GetCustomerHistory => "get_customer_history",
            Self::CreateTicket => "create_ticket",
        }
    }

    /// One-line description for `tools/list`.
    pub fn description(self) -> &'static str {
        match self {
            Self::GetCustomer => "Get a single customer by ID",
            Self::ListCustomers => "List customers (optional status, limit)",
            Self::UpdateCustomer => "Update fields on a customer",
            Self::GetCustomerHistory => "List tickets and profile updates for a customer",
            Self::CreateTicket => "Create a support ticket",
        }
    }

    /// Input schema.
    pub fn schema(self) -> InputSchema {
        let fields = match self {
            Self::GetCustomer | Self::GetCustomerHistory => GET_CUSTOMER_FIELDS,
            Self::ListCustomers => LIST_CUSTOMERS_FIELDS,
            Self::UpdateCustomer => UPDATE_CUSTOMER_FIELDS,
            Self::CreateTicket => CREATE_TICKET_FIELDS,
        };
        InputSchema { fields }
    }

    /// Whether the tool mutates the datastore.
    pub fn is_write(self) -> bool {
        matches!(self, Self::UpdateCustomer | Self::CreateTicket)
    }

    /// Full MCP definition.
    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.as_str().into(),
            description: self.description().into(),
            input_schema: self.schema().to_json(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::ToolNotFound(s.to_string()))
    }
}

/// Context passed to tools during execution.
pub struct ToolContext {
    /// Datastore collaborator.
    pub store: Arc<dyn Datastore>,
}

impl ToolContext {
    /// Create a new tool context.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }
}

/// Anything that can run a validated tool call: the local registry or a
/// remote protocol server.
#[async_trait::async_trait]
pub trait ToolBackend: Send + Sync {
    /// Run `tool` with `arguments` and return its result payload.
    async fn call_tool(&self, tool: ToolName, arguments: Value) -> Result<Value>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: Vec<ToolName>,
    context: Arc<ToolContext>,
}

impl ToolRegistry {
    /// Create a registry with every tool registered.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self::with_context(ToolContext::new(store))
    }

    /// Create a registry with a custom context.
    pub fn with_context(context: ToolContext) -> Self {
        let mut registry = Self {
            tools: Vec::new(),
            context: Arc::new(context),
        };
        for tool in ToolName::ALL {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool. Registering twice keeps the first position.
    pub fn register(&mut self, tool: ToolName) {
        if !self.tools.contains(&tool) {
            self.tools.push(tool);
        }
    }

    /// Tool context shared by every handler.
    pub fn context(&self) -> &Arc<ToolContext> {
        &self.context
    }

    /// Get all tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Resolve a wire name to a registered tool.
    pub fn resolve(&self, name: &str) -> Result<ToolName> {
        let tool: ToolName = name.parse()?;
        if self.tools.contains(&tool) {
            Ok(tool)
        } else {
            Err(Error::ToolNotFound(name.to_string()))
        }
    }

    /// Execute a tool by name.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool = self.resolve(name)?;
        self.call_tool(tool, arguments).await
    }
}

#[async_trait::async_trait]
impl ToolBackend for ToolRegistry {
    async fn call_tool(&self, tool: ToolName, arguments: Value) -> Result<Value> {
        let args = tool.schema().validate(&arguments)?;
        debug!(tool = %tool, "executing tool");
        execute(&self.context, tool, args).await
    }
}

// =============================================================================
// Tool Implementations
// =============================================================================

#[derive(Debug, Deserialize)]
struct CustomerIdArgs {
    customer_id: i64,
}

#[derive(Debug, Deserialize)]
struct ListCustomersArgs {
    status: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UpdateCustomerArgs {
    customer_id: i64,
    data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CreateTicketArgs {
    customer_id: i64,
    issue: String,
    priority: Option<String>,
}

/// Run a tool whose arguments already passed schema validation.
pub async fn execute(ctx: &ToolContext, tool: ToolName, args: Map<String, Value>) -> Result<Value> {
    match tool {
        ToolName::GetCustomer => get_customer(ctx, parse_args(args)?).await,
        ToolName::ListCustomers => list_customers(ctx, parse_args(args)?).await,
        ToolName::UpdateCustomer => update_customer(ctx, parse_args(args)?).await,
        ToolName::GetCustomerHistory => get_customer_history(ctx, parse_args(args)?).await,
        ToolName::CreateTicket => create_ticket(ctx, parse_args(args)?).await,
    }
}

async fn get_customer(ctx: &ToolContext, args: CustomerIdArgs) -> Result<Value> {
    let customer = ctx.store.get_customer(args.customer_id).await?;
    Ok(json!({ "customer": customer }))
}

async fn list_customers(ctx: &ToolContext, args: ListCustomersArgs) -> Result<Value> {
    let limit = match args.limit {
        None => 100,
        Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
        Some(_) => return Err(Error::validation("limit", "must be positive")),
    };
    let customers = ctx.store.list_customers(args.status.as_deref(), limit).await?;
    Ok(json!({ "customers": customers }))
}

async fn update_customer(ctx: &ToolContext, args: UpdateCustomerArgs) -> Result<Value> {
    validate_customer_patch(&args.data)?;
    let customer = ctx.store.update_customer(args.customer_id, &args.data).await?;
    Ok(json!({ "updated": customer.is_some(), "customer": customer }))
}

async fn get_customer_history(ctx: &ToolContext, args: CustomerIdArgs) -> Result<Value> {
    let history = ctx.store.customer_history(args.customer_id).await?;
    Ok(serde_json::to_value(history)?)
}

async fn create_ticket(ctx: &ToolContext, args: CreateTicketArgs) -> Result<Value> {
    if args.issue.trim().is_empty() {
        return Err(Error::validation("issue", "must not be empty"));
    }
    let ticket = ctx
        .store
        .insert_ticket(NewTicket {
            customer_id: args.customer_id,
            issue: args.issue,
            priority: args.priority.unwrap_or_else(|| "medium".into()),
        })
        .await?;
    Ok(json!({ "ticket_id": ticket.id, "created": true }))
}
