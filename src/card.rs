//! Static agent capability cards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{AgentKind, SupportTool};
use crate::tools::{FieldSpec, FieldType, InputSchema, ToolName};

/// Capability descriptor served on `GET /card`.
///
/// Cards are documentation for operators and clients. Dispatch never consults
/// them, so a stale card cannot break routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    /// Agent ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// What the agent does.
    pub description: String,
    /// Tool names the agent executes.
    pub capabilities: Vec<String>,
    /// Call endpoint.
    pub endpoint: String,
}

impl AgentCard {
    /// Card for `kind`, advertising `base_url` as its endpoint root.
    pub fn for_agent(kind: AgentKind, base_url: &str) -> Self {
        let (name, description, capabilities): (&str, &str, Vec<String>) = match kind {
            AgentKind::Router => (
                "Router Agent",
                "Classifies tasks and coordinates the data and support agents.",
                vec!["route".into(), "route_task".into()],
            ),
            AgentKind::Data => (
                "Customer Data Agent",
                "Reads and updates customer records through the MCP tool server.",
                ToolName::ALL.iter().map(|t| t.as_str().to_string()).collect(),
            ),
            AgentKind::Support => (
                "Support Agent",
                "Creates and updates tickets and drafts support replies.",
                SupportTool::ALL.iter().map(|t| t.as_str().to_string()).collect(),
            ),
        };

        Self {
            id: kind.as_str().into(),
            name: name.into(),
            description: description.into(),
            capabilities,
            endpoint: format!("{}/a2a/call", base_url.trim_end_matches('/')),
        }
    }
}

/// One advertised skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Tool name.
    pub name: String,
    /// What it does.
    pub description: String,
    /// JSON Schema of the arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl Skill {
    fn new(name: &str, description: &str, schema: InputSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: schema.to_json(),
        }
    }
}

const ROUTE_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("text", FieldType::String, "Task in plain language"),
    FieldSpec::optional("args", FieldType::Object, "Structured hints such as customer_id"),
];

/// Detailed capability listing served on `GET /a2a/capabilities`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Speaks A2A.
    pub a2a: bool,
    /// Tool names, same as the card.
    pub tools: Vec<String>,
    /// Tools with their argument schemas.
    pub skills: Vec<Skill>,
}

impl Capabilities {
    /// Capabilities of `kind`, derived from the tool schemas it validates with.
    pub fn for_agent(kind: AgentKind) -> Self {
        let skills: Vec<Skill> = match kind {
            AgentKind::Router => {
                let schema = InputSchema { fields: ROUTE_FIELDS };
                let description = "Classify a task and run it on the agents";
                ["route", "route_task"]
                    .into_iter()
                    .map(|name| Skill::new(name, description, schema))
                    .collect()
            }
            AgentKind::Data => ToolName::ALL
                .into_iter()
                .map(|t| Skill::new(t.as_str(), t.description(), t.schema()))
                .collect(),
            AgentKind::Support => SupportTool::ALL
                .into_iter()
                .map(|t| Skill::new(t.as_str(), t.description(), t.schema()))
                .collect(),
        };

        Self {
            a2a: true,
            tools: skills.iter().map(|s| s.name.clone()).collect(),
            skills,
        }
    }
}
