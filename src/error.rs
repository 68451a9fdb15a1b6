//! Error types for agent-mesh.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::error_codes;

/// Result type for agent-mesh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for agent-mesh.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed JSON-RPC envelope or A2A request body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Body was not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// Envelope was valid but the method is not recognized.
    #[error("unknown method: {0}")]
    MethodNotFound(String),

    /// Tool arguments do not match the tool schema.
    #[error("invalid field `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// Tool name is not registered.
    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// Referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No scenario rule matched the task.
    #[error("classification failed: {0}")]
    Classification(String),

    /// Static plan bound exceeded.
    #[error("plan has {steps} steps, maximum is {max}")]
    PlanTooLarge { steps: usize, max: usize },

    /// Plan graph is malformed.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Templated step argument could not be resolved.
    #[error("template error: {0}")]
    Template(String),

    /// Downstream agent could not be reached or timed out.
    ///
    /// `delivered` is set when the request may have reached the agent, so a
    /// write could already have been applied.
    #[error("{agent} agent unavailable: {reason}")]
    DownstreamUnavailable {
        agent: String,
        reason: String,
        delivered: bool,
    },

    /// Runtime step-execution counter exceeded.
    #[error("step budget of {limit} executions exceeded")]
    BudgetExceeded { limit: usize },

    /// Plan finished with at least one failed step.
    #[error("partial failure: step `{step}` failed: {reason}")]
    PartialFailure { step: String, reason: String },

    /// Error reported by another agent.
    #[error("{agent} agent returned {kind}: {message}")]
    Remote {
        agent: String,
        kind: String,
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a validation error on `field`.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a downstream failure on `agent`.
    pub fn unavailable(agent: impl ToString, reason: impl Into<String>) -> Self {
        Self::DownstreamUnavailable {
            agent: agent.to_string(),
            reason: reason.into(),
            delivered: false,
        }
    }

    /// Downstream failure after the request was sent, e.g. a timeout.
    pub fn unanswered(agent: impl ToString, reason: impl Into<String>) -> Self {
        Self::DownstreamUnavailable {
            agent: agent.to_string(),
            reason: reason.into(),
            delivered: true,
        }
    }

    /// Stable taxonomy name, used in error bodies and trace lines.
    pub fn kind(&self) -> &str {
        match self {
            Self::Protocol(_) | Self::Parse(_) | Self::MethodNotFound(_) => "ProtocolError",
            Self::Validation { .. } => "ValidationError",
            Self::ToolNotFound(_) => "ToolNotFound",
            Self::NotFound(_) => "NotFound",
            Self::Classification(_) => "ClassificationError",
            Self::PlanTooLarge { .. } => "PlanTooLarge",
            Self::InvalidPlan(_) => "InvalidPlan",
            Self::Template(_) => "TemplateError",
            Self::DownstreamUnavailable { .. } => "DownstreamUnavailable",
            Self::BudgetExceeded { .. } => "BudgetExceeded",
            Self::PartialFailure { .. } => "PartialFailure",
            Self::Remote { kind, .. } => kind.as_str(),
            Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => "InternalError",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DownstreamUnavailable { .. })
    }

    /// Whether the failed call may still have taken effect downstream.
    pub fn may_have_applied(&self) -> bool {
        matches!(self, Self::DownstreamUnavailable { delivered: true, .. })
    }

    /// JSON-RPC error code for this error.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::Protocol(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) | Self::ToolNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::Validation { .. } => error_codes::INVALID_PARAMS,
            Self::NotFound(_) => error_codes::TOOL_EXECUTION_ERROR,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Structured detail attached to error bodies.
    pub fn data(&self) -> Value {
        match self {
            Self::Validation { field, .. } => json!({ "kind": self.kind(), "field": field }),
            Self::PlanTooLarge { max, .. } => json!({ "kind": self.kind(), "bound": max }),
            Self::BudgetExceeded { limit } => json!({ "kind": self.kind(), "bound": limit }),
            Self::DownstreamUnavailable { agent, delivered, .. } => {
                json!({ "kind": self.kind(), "agent": agent, "delivered": delivered })
            }
            Self::Remote { agent, .. } => json!({ "kind": self.kind(), "agent": agent }),
            _ => json!({ "kind": self.kind() }),
        }
    }

    /// Wire form used in HTTP error bodies.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.rpc_code(),
            kind: self.kind().to_string(),
            message: self.to_string(),
            data: self.data(),
        }
    }

    /// Rebuild an error from a remote error body.
    ///
    /// Transient kinds stay transient so the caller's retry policy still applies.
    pub fn from_remote(agent: impl ToString, kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            "DownstreamUnavailable" => Self::unavailable(agent, message),
            _ => Self::Remote {
                agent: agent.to_string(),
                kind: kind.to_string(),
                message,
            },
        }
    }
}

/// `{"error": {...}}` payload returned by agents and the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// JSON-RPC style code.
    pub code: i32,
    /// Taxonomy name.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Structured detail.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ErrorBody {
    /// Rebuild the error reported by `agent`.
    pub fn into_error(self, agent: impl ToString) -> Error {
        let delivered = self.data.get("delivered").and_then(Value::as_bool) == Some(true);
        match Error::from_remote(agent, &self.kind, self.message) {
            Error::DownstreamUnavailable { agent, reason, .. } => Error::DownstreamUnavailable {
                agent,
                reason,
                delivered,
            },
            other => other,
        }
    }
}
