//! API request and response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{AuditLogEntry, EvaluationVerdict, PolicyType};

// ==================== Evaluate ====================

/// Request to evaluate input text through the guardrails pipeline.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EvaluateRequest {
    /// Agent the input is addressed to.
    pub agent_id: Uuid,
    /// Raw input text to evaluate.
    pub input_text: String,
    /// Free-form context available to custom policy conditions.
    #[serde(default)]
    pub context: serde_json::Value,
    /// Customer scope; omitted in single-tenant deployments.
    #[serde(default)]
    pub customer_id: Option<Uuid>,
}

/// Response from input evaluation.
#[derive(Debug, Serialize, ToSchema)]
pub struct EvaluateResponse {
    /// The aggregate verdict.
    #[serde(flatten)]
    pub verdict: EvaluationVerdict,
}

// ==================== Policies ====================

/// Request to create a policy.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePolicyRequest {
    /// Owning customer; omitted in single-tenant deployments.
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    /// Agent to scope the policy to; omitted to apply to every agent.
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    /// Human-readable name.
    pub name: String,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Which evaluator this policy configures.
    pub policy_type: PolicyType,
    /// Rule configuration; omitted to use the default template for the type.
    #[serde(default)]
    pub rule_json: Option<serde_json::Value>,
    /// Whether the policy starts enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Request to update a policy. Omitted fields are left unchanged.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePolicyRequest {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement rule configuration.
    #[serde(default)]
    pub rule_json: Option<serde_json::Value>,
    /// Enable or disable the policy.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Query parameters for listing policies.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListPoliciesQuery {
    /// Filter by owning customer.
    #[serde(default)]
    pub customer_id: Option<Uuid>,
}

// ==================== Audit Logs ====================

/// Query parameters for listing audit entries.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListAuditLogsQuery {
    /// Filter by agent.
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    /// Filter by final decision: ALLOWED, WARN or DENIED.
    #[serde(default)]
    pub decision: Option<String>,
    /// Maximum number of results.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Offset for pagination.
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// Response for listing audit entries.
#[derive(Debug, Serialize, ToSchema)]
pub struct ListAuditLogsResponse {
    /// Page of entries, newest first.
    pub logs: Vec<AuditLogEntry>,
    /// Total matching count (for pagination).
    pub total: i64,
    /// Limit used.
    pub limit: i64,
    /// Offset used.
    pub offset: i64,
}

// ==================== Health ====================

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Database connectivity.
    pub database: String,
    /// Timestamp.
    pub timestamp: String,
}
