//! Agent mesh for customer support.
//!
//! This crate provides an MCP tool server over a customer datastore and an
//! A2A router that coordinates two worker agents. It enables:
//!
//! - Typed tool calls over JSON-RPC 2.0, on HTTP or stdio
//! - Rule-based task classification behind a pluggable trait
//! - Validated, bounded execution plans across the data and support agents
//! - Retries, timeouts, fallbacks and partial results for routed tasks
//!
//! # Architecture
//!
//! ```text
//!                     caller
//!                       │ POST /a2a/call {task, text, args}
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                    Router agent                      │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │ Classifier │─▶│ Plan builder │─▶│ Orchestrator│  │
//! │  └────────────┘  └──────────────┘  └─────────────┘  │
//! └───────────────────────────┬─────────────────────────┘
//!                 A2A (HTTP)  │
//!            ┌────────────────┴────────────────┐
//!            ▼                                 ▼
//! ┌──────────────────┐               ┌──────────────────┐
//! │    Data agent    │               │  Support agent   │
//! └────────┬─────────┘               └────────┬─────────┘
//!          │ MCP (JSON-RPC)                   │
//!          ▼                                  │
//! ┌──────────────────┐                        │
//! │   MCP server     │                        │
//! └────────┬─────────┘                        │
//!          ▼                                  ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                     Datastore                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # MCP Tools
//!
//! | Tool | Description |
//! |------|-------------|
//! | `get_customer` | Get a single customer by ID |
//! | `list_customers` | List customers (optional status, limit) |
//! | `update_customer` | Update fields on a customer |
//! | `get_customer_history` | List tickets and profile updates for a customer |
//! | `create_ticket` | Create a support ticket |

pub mod agent;
pub mod api;
pub mod card;
pub mod classifier;
pub mod client;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod protocol;
pub mod router;
pub mod server;
pub mod store;
pub mod tools;

pub use agent::{AgentKind, DataAgent, SupportAgent, WorkerAgent};
pub use classifier::{Classification, Classifier, RuleClassifier, Scenario};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RetryPolicy};
pub use plan::{ExecutionPlan, PlanBuilder};
pub use protocol::{McpRequest, McpResponse};
pub use router::{RouteRequest, RouteResponse, RouterAgent};
pub use server::McpServer;
pub use store::{Datastore, MemoryStore};
pub use tools::{ToolName, ToolRegistry};
