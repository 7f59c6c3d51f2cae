//! Policy domain types.
//!
//! A policy attaches one guardrail rule configuration to a customer, either
//! globally or scoped to a single agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// The kind of guardrail a policy configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    /// Regex/keyword detection of personally identifiable information.
    Pii,
    /// Category scores from the external content classifier.
    ContentSafety,
    /// Keyword and pattern detection of injection attempts.
    PromptInjection,
    /// Customer-defined condition list.
    Custom,
}

impl PolicyType {
    /// Fixed resolution priority. Lower runs earlier in the deterministic
    /// check order; creation time and policy id break ties.
    pub fn priority(&self) -> u8 {
        match self {
            PolicyType::Pii => 0,
            PolicyType::PromptInjection => 1,
            PolicyType::ContentSafety => 2,
            PolicyType::Custom => 3,
        }
    }

    /// Label reported in `checks_run` for this type. Custom policies embed
    /// the policy name instead.
    pub fn check_label(&self) -> &'static str {
        match self {
            PolicyType::Pii => "PII_Detection",
            PolicyType::ContentSafety => "Content_Safety",
            PolicyType::PromptInjection => "Prompt_Injection",
            PolicyType::Custom => "Custom",
        }
    }
}

impl std::fmt::Display for PolicyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyType::Pii => write!(f, "pii"),
            PolicyType::ContentSafety => write!(f, "content_safety"),
            PolicyType::PromptInjection => write!(f, "prompt_injection"),
            PolicyType::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for PolicyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pii" => Ok(PolicyType::Pii),
            "content_safety" => Ok(PolicyType::ContentSafety),
            "prompt_injection" => Ok(PolicyType::PromptInjection),
            "custom" => Ok(PolicyType::Custom),
            _ => Err(format!("Unknown policy type: {}", s)),
        }
    }
}

/// A stored guardrail policy.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Policy {
    /// Unique identifier.
    pub id: Uuid,

    /// Owning customer. The nil UUID is the shared single-tenant scope.
    pub customer_id: Uuid,

    /// Agent this policy is scoped to; `None` applies to every agent of the
    /// customer.
    pub agent_id: Option<Uuid>,

    /// Human-readable name.
    pub name: String,

    /// Optional free-text description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Which evaluator this policy configures.
    pub policy_type: PolicyType,

    /// Rule configuration, schema keyed by `policy_type`.
    pub rule_json: Option<serde_json::Value>,

    /// Disabled policies are never resolved or reported in `checks_run`.
    pub enabled: bool,

    /// When this policy was created.
    pub created_at: DateTime<Utc>,
}

impl Policy {
    /// Create a new enabled policy with a fresh id.
    pub fn new(
        customer_id: Uuid,
        agent_id: Option<Uuid>,
        name: impl Into<String>,
        policy_type: PolicyType,
        rule_json: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            agent_id,
            name: name.into(),
            description: None,
            policy_type,
            rule_json,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Whether this policy applies to the given agent.
    pub fn applies_to(&self, agent_id: Uuid) -> bool {
        match self.agent_id {
            None => true,
            Some(scoped) => scoped == agent_id,
        }
    }
}
