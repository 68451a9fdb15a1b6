//! Task classification.
//!
//! A [`Classifier`] maps free text plus structured arguments onto one of five
//! scenarios. The router only depends on the trait, so a model-backed
//! classifier can replace [`RuleClassifier`] without touching plan building.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// How many agents and steps a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// One data lookup.
    Simple,
    /// Data lookup feeding a support action.
    Coordinated,
    /// Multi-step report across both agents.
    Complex,
    /// Straight to support.
    Escalation,
    /// Ordered write then read on the same customer.
    MultiIntent,
}

impl Scenario {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Coordinated => "coordinated",
            Self::Complex => "complex",
            Self::Escalation => "escalation",
            Self::MultiIntent => "multi_intent",
        }
    }
}

/// What the caller wants within a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CustomerLookup,
    ListCustomers,
    CreateTicket,
    AccountHelp,
    OpenTicketsReport,
    Escalate,
    UpdateAndHistory,
}

/// Output of a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Scenario category.
    pub scenario: Scenario,
    /// Intent within the scenario.
    pub intent: Intent,
    /// Classifier confidence, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Customer the task is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<i64>,
    /// Original text.
    pub text: String,
    /// Normalized arguments. Holds `update` for multi-intent tasks.
    pub args: Map<String, Value>,
}

impl Classification {
    /// Classification used when the classifier fails or times out.
    pub fn fallback(text: &str, args: &Map<String, Value>) -> Self {
        let customer_id = customer_id_from(text, args);
        Self {
            scenario: Scenario::Simple,
            intent: if customer_id.is_some() {
                Intent::CustomerLookup
            } else {
                Intent::ListCustomers
            },
            confidence: None,
            customer_id,
            text: text.to_string(),
            args: args.clone(),
        }
    }
}

/// Pluggable classification strategy.
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a task.
    async fn classify(&self, text: &str, args: &Map<String, Value>) -> Result<Classification>;
}

const ESCALATION_KEYWORDS: &[&str] = &[
    "escalate",
    "urgent",
    "immediately",
    "charged twice",
    "refund",
    "cancel",
    "complaint",
];

const UPDATE_VERBS: &[&str] = &["update", "change", "set"];

const COORDINATED_KEYWORDS: &[&str] = &["ticket", "upgrade", "help", "issue", "problem"];

const UPDATABLE_FIELDS: &[&str] = &["email", "phone", "name", "status"];

/// Deterministic keyword classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    /// Create a rule classifier.
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of [`Classifier::classify`].
    pub fn classify_sync(&self, text: &str, args: &Map<String, Value>) -> Result<Classification> {
        let lower = text.to_lowercase();
        let customer_id = customer_id_from(text, args);
        let mut normalized = args.clone();

        let classified = |scenario, intent, confidence, args| Classification {
            scenario,
            intent,
            confidence: Some(confidence),
            customer_id,
            text: text.to_string(),
            args,
        };

        // Structured multi-intent request.
        if let Some(Value::Object(_)) = args.get("update") {
            if args.get("also").and_then(Value::as_str) == Some("history") {
                return Ok(classified(
                    Scenario::MultiIntent,
                    Intent::UpdateAndHistory,
                    1.0,
                    normalized,
                ));
            }
        }

        // Free-text multi-intent request.
        if contains_any(&lower, UPDATE_VERBS) && lower.contains("history") {
            if let Some(update) = update_from_text(text) {
                normalized.insert("update".into(), Value::Object(update));
                return Ok(classified(
                    Scenario::MultiIntent,
                    Intent::UpdateAndHistory,
                    0.8,
                    normalized,
                ));
            }
        }

        if contains_any(&lower, ESCALATION_KEYWORDS) {
            return Ok(classified(Scenario::Escalation, Intent::Escalate, 0.9, normalized));
        }

        if lower.contains("active") && lower.contains("open") && lower.contains("ticket") {
            return Ok(classified(
                Scenario::Complex,
                Intent::OpenTicketsReport,
                0.8,
                normalized,
            ));
        }

        if customer_id.is_some() && contains_any(&lower, COORDINATED_KEYWORDS) {
            let intent = if lower.contains("ticket") {
                Intent::CreateTicket
            } else if lower.contains("upgrade") || lower.contains("account") {
                Intent::AccountHelp
            } else {
                Intent::CreateTicket
            };
            return Ok(classified(Scenario::Coordinated, intent, 0.8, normalized));
        }

        if customer_id.is_some() {
            return Ok(classified(Scenario::Simple, Intent::CustomerLookup, 0.9, normalized));
        }

        if lower.contains("customers") || lower.contains("list") {
            return Ok(classified(Scenario::Simple, Intent::ListCustomers, 0.7, normalized));
        }

        Err(Error::Classification(format!("no rule matched: {text:?}")))
    }
}

#[async_trait::async_trait]
impl Classifier for RuleClassifier {
    async fn classify(&self, text: &str, args: &Map<String, Value>) -> Result<Classification> {
        self.classify_sync(text, args)
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// `args.customer_id`, else `customer N` or `id N` in the text.
pub fn customer_id_from(text: &str, args: &Map<String, Value>) -> Option<i64> {
    if let Some(id) = args.get("customer_id").and_then(Value::as_i64) {
        return Some(id);
    }

    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_lowercase())
        .collect();
    words.windows(2).find_map(|pair| match pair[0].as_str() {
        "customer" | "id" => pair[1].parse().ok(),
        _ => None,
    })
}

/// Pull `<field> to <value>` out of text such as "update my email to a@b.com".
fn update_from_text(text: &str) -> Option<Map<String, Value>> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut update = Map::new();

    for (i, window) in words.windows(3).enumerate() {
        let field = window[0].trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_lowercase();
        if UPDATABLE_FIELDS.contains(&field.as_str()) && window[1].eq_ignore_ascii_case("to") {
            let value = words[i + 2].trim_end_matches([',', ';', '!', '?']);
            let value = value.strip_suffix('.').unwrap_or(value);
            if !value.is_empty() {
                update.insert(field, json!(value));
            }
        }
    }

    (!update.is_empty()).then_some(update)
}
