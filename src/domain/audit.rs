//! Audit trail domain types.
//!
//! Every evaluation leaves one entry. Entries never carry the raw input,
//! only its salted hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Decision;

/// A stored audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLogEntry {
    /// Store-assigned row id.
    pub id: i64,

    /// Agent the evaluated input was addressed to.
    pub agent_id: Uuid,

    /// Policy that determined the final verdict; `None` when the input was
    /// allowed with nothing triggered.
    pub policy_id: Option<Uuid>,

    /// When the evaluation completed.
    pub timestamp: DateTime<Utc>,

    /// Salted SHA-256 of the input text, hex-encoded.
    pub input_hash: String,

    /// Final decision of the evaluation.
    pub decision: Decision,

    /// Evaluation latency.
    pub latency_ms: i64,
}

/// An audit entry queued for persistence, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub agent_id: Uuid,
    pub policy_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub input_hash: String,
    pub decision: Decision,
    pub latency_ms: i64,
}

impl NewAuditEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        agent_id: Uuid,
        policy_id: Option<Uuid>,
        input_hash: String,
        decision: Decision,
        latency_ms: i64,
    ) -> Self {
        Self {
            agent_id,
            policy_id,
            timestamp: Utc::now(),
            input_hash,
            decision,
            latency_ms,
        }
    }
}
