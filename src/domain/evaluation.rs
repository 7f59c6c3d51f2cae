//! Evaluation domain types.
//!
//! Represents one guardrail evaluation: the request, the per-check results,
//! and the aggregate verdict returned to the caller.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Reason reported when an individual check could not run to completion.
pub const UNAVAILABLE_REASON: &str = "check unavailable";

/// Reason reported when nothing triggered.
pub const NO_ISSUES_REASON: &str = "No issues detected.";

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Nothing triggered.
    None,
    /// Flag but do not block.
    Warn,
    /// Block the input.
    Deny,
}

impl Verdict {
    /// Precedence for candidate selection; higher wins.
    pub fn precedence(&self) -> u8 {
        match self {
            Verdict::None => 0,
            Verdict::Warn => 1,
            Verdict::Deny => 2,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::None => write!(f, "NONE"),
            Verdict::Warn => write!(f, "WARN"),
            Verdict::Deny => write!(f, "DENY"),
        }
    }
}

/// Aggregate decision for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// All checks passed.
    Allowed,
    /// At least one check warned; nothing denied.
    Warn,
    /// At least one check denied.
    Denied,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allowed => write!(f, "ALLOWED"),
            Decision::Warn => write!(f, "WARN"),
            Decision::Denied => write!(f, "DENIED"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ALLOWED" => Ok(Decision::Allowed),
            "WARN" => Ok(Decision::Warn),
            "DENIED" => Ok(Decision::Denied),
            _ => Err(format!("Unknown decision: {}", s)),
        }
    }
}

/// One input to evaluate, already resolved to a customer scope.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    /// Customer whose policies apply; nil for single-tenant deployments.
    pub customer_id: Uuid,
    /// Agent the input was sent to. Unknown ids are served with the
    /// customer's global policies.
    pub agent_id: Uuid,
    /// Raw input text.
    pub input_text: String,
    /// Free-form request context available to custom conditions.
    pub context: serde_json::Value,
}

/// Result of running one compiled check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub verdict: Verdict,
    pub reason: String,
    /// Policy the check was compiled from.
    pub policy_id: Uuid,
    /// Set when the check timed out or its dependency failed.
    pub unavailable: bool,
}

impl CheckResult {
    /// A clean pass.
    pub fn none(policy_id: Uuid) -> Self {
        Self {
            verdict: Verdict::None,
            reason: String::new(),
            policy_id,
            unavailable: false,
        }
    }

    /// A triggered check with its reason.
    pub fn triggered(policy_id: Uuid, verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
            policy_id,
            unavailable: false,
        }
    }

    /// The conservative fallback for a check that could not run: WARN,
    /// flagged unavailable.
    pub fn unavailable(policy_id: Uuid) -> Self {
        Self {
            verdict: Verdict::Warn,
            reason: UNAVAILABLE_REASON.to_string(),
            policy_id,
            unavailable: true,
        }
    }
}

/// Aggregate verdict returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EvaluationVerdict {
    /// Final decision.
    pub decision: Decision,

    /// Reason of the first triggering check in resolution order, or
    /// `No issues detected.`.
    pub reason: String,

    /// Labels of every check that was resolved for this request, in
    /// resolution order, regardless of outcome.
    pub checks_run: Vec<String>,

    /// Wall-clock evaluation time.
    pub latency_ms: i64,
}

impl EvaluationVerdict {
    /// A clean pass over the given checks.
    pub fn allowed(checks_run: Vec<String>, latency_ms: i64) -> Self {
        Self {
            decision: Decision::Allowed,
            reason: NO_ISSUES_REASON.to_string(),
            checks_run,
            latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_decision_serialization() {
        let json = serde_json::to_string(&Decision::Denied).unwrap();
        assert_eq!(json, "\"DENIED\"");
        assert_eq!(serde_json::to_string(&Verdict::Warn).unwrap(), "\"WARN\"");
    }

    #[test]
    fn test_decision_from_str_case_insensitive() {
        assert_eq!(Decision::from_str("allowed").unwrap(), Decision::Allowed);
        assert_eq!(Decision::from_str("DENIED").unwrap(), Decision::Denied);
        assert!(Decision::from_str("maybe").is_err());
    }

    #[test]
    fn test_verdict_precedence() {
        assert!(Verdict::Deny.precedence() > Verdict::Warn.precedence());
        assert!(Verdict::Warn.precedence() > Verdict::None.precedence());
    }

    #[test]
    fn test_unavailable_check_warns() {
        let result = CheckResult::unavailable(Uuid::new_v4());
        assert_eq!(result.verdict, Verdict::Warn);
        assert!(result.unavailable);
        assert_eq!(result.reason, UNAVAILABLE_REASON);
    }
}
