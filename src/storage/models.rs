//! Database models for the guardrails engine.
//!
//! These are the row types returned by SQLx queries.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{AuditLogEntry, Policy};

/// Database row for the policies table.
#[derive(Debug, Clone, FromRow)]
pub struct PolicyRow {
    pub id: String,
    pub customer_id: String,
    pub agent_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub policy_type: String,
    pub rule_json: Option<String>,
    pub enabled: bool,
    pub created_at: String,
}

impl TryFrom<PolicyRow> for Policy {
    type Error = crate::error::GuardrailsError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        Ok(Policy {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| crate::error::GuardrailsError::Internal(e.to_string()))?,
            customer_id: Uuid::parse_str(&row.customer_id)
                .map_err(|e| crate::error::GuardrailsError::Internal(e.to_string()))?,
            agent_id: row
                .agent_id
                .map(|a| Uuid::parse_str(&a))
                .transpose()
                .map_err(|e| crate::error::GuardrailsError::Internal(e.to_string()))?,
            name: row.name,
            description: row.description,
            policy_type: serde_json::from_str(&format!("\"{}\"", row.policy_type))?,
            rule_json: row.rule_json.map(|r| serde_json::from_str(&r)).transpose()?,
            enabled: row.enabled,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map_err(|e| crate::error::GuardrailsError::Internal(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

/// Database row for the audit_logs table.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    pub id: i64,
    pub agent_id: String,
    pub policy_id: Option<String>,
    pub timestamp: String,
    pub input_hash: String,
    pub decision: String,
    pub latency_ms: i64,
}

impl TryFrom<AuditLogRow> for AuditLogEntry {
    type Error = crate::error::GuardrailsError;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        Ok(AuditLogEntry {
            id: row.id,
            agent_id: Uuid::parse_str(&row.agent_id)
                .map_err(|e| crate::error::GuardrailsError::Internal(e.to_string()))?,
            policy_id: row
                .policy_id
                .map(|p| Uuid::parse_str(&p))
                .transpose()
                .map_err(|e| crate::error::GuardrailsError::Internal(e.to_string()))?,
            timestamp: DateTime::parse_from_rfc3339(&row.timestamp)
                .map_err(|e| crate::error::GuardrailsError::Internal(e.to_string()))?
                .with_timezone(&Utc),
            input_hash: row.input_hash,
            decision: serde_json::from_str(&format!("\"{}\"", row.decision))?,
            latency_ms: row.latency_ms,
        })
    }
}
