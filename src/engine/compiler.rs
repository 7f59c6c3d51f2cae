//! Rule compiler.
//!
//! Validates a stored policy's `rule_json` against the schema for its
//! policy type and produces an immutable [`CompiledCheck`] with every regex
//! pre-compiled, thresholds range-checked, and keywords lowercased. Pure:
//! no I/O, no clock. Any invalid piece fails the whole policy.
//!
//! Rule schemas by policy type:
//!
//! | type | shape |
//! |------|-------|
//! | `pii` | `{action?, patterns: [{name, pattern, severity?, literal?}]}` |
//! | `content_safety` | `{categories: [{name, threshold, action}]}` |
//! | `prompt_injection` | `{action?, keywords?: [..], patterns?: [..]}` |
//! | `custom` | `{conditions: [{kind, ..., action}]}` |

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Policy, PolicyType, Verdict};

/// Why a policy failed to compile.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("missing rule configuration")]
    MissingConfig,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("threshold {value} for category '{category}' is outside [0, 1]")]
    InvalidThreshold { category: String, value: f64 },

    #[error("unknown action '{0}' (expected DENY or WARN)")]
    UnknownAction(String),

    #[error("unknown condition kind '{0}'")]
    UnknownCondition(String),
}

/// Diagnostic severity attached to a PII pattern. Never changes the action;
/// it only appears in the reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// One pre-compiled PII pattern.
#[derive(Debug)]
pub struct PiiPattern {
    pub name: String,
    pub regex: Regex,
    pub severity: Severity,
}

/// One content-safety category with its trigger threshold.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub name: String,
    pub threshold: f64,
    pub action: Verdict,
}

/// One condition of a custom policy, in declared order.
#[derive(Debug)]
pub enum CustomCondition {
    DenyKeywords { keywords: Vec<String>, action: Verdict },
    Pattern { regex: Regex, action: Verdict },
    MaxLength { max_chars: usize, action: Verdict },
    ContextEquals { key: String, value: String, action: Verdict },
}

impl CustomCondition {
    pub fn action(&self) -> Verdict {
        match self {
            CustomCondition::DenyKeywords { action, .. } => *action,
            CustomCondition::Pattern { action, .. } => *action,
            CustomCondition::MaxLength { action, .. } => *action,
            CustomCondition::ContextEquals { action, .. } => *action,
        }
    }
}

/// The validated rule, tagged by policy type.
#[derive(Debug)]
pub enum CompiledRule {
    Pii {
        action: Verdict,
        patterns: Vec<PiiPattern>,
    },
    ContentSafety {
        categories: Vec<CategoryRule>,
    },
    PromptInjection {
        action: Verdict,
        keywords: Vec<String>,
        patterns: Vec<Regex>,
    },
    Custom {
        conditions: Vec<CustomCondition>,
    },
}

/// An immutable, validated check ready for evaluation. Rebuilt, never
/// mutated, whenever the rule configuration's content hash changes.
#[derive(Debug)]
pub struct CompiledCheck {
    pub policy_id: Uuid,
    pub policy_name: String,
    pub policy_type: PolicyType,
    /// Agent scope carried over from the policy; `None` is customer-global.
    pub agent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Label reported in `checks_run`.
    pub label: String,
    /// SHA-256 of the canonical rule JSON.
    pub config_hash: String,
    pub rule: CompiledRule,
}

impl CompiledCheck {
    /// Deterministic resolution order: type priority, then creation time,
    /// then policy id.
    pub fn sort_key(&self) -> (u8, DateTime<Utc>, Uuid) {
        (self.policy_type.priority(), self.created_at, self.policy_id)
    }

    /// Whether this check applies to the given agent.
    pub fn applies_to(&self, agent_id: Uuid) -> bool {
        match self.agent_id {
            None => true,
            Some(scoped) => scoped == agent_id,
        }
    }
}

/// Compile a policy into a check, validating the whole rule configuration.
pub fn compile(policy: &Policy) -> Result<CompiledCheck, CompileError> {
    let config = policy.rule_json.as_ref().ok_or(CompileError::MissingConfig)?;

    let rule = match policy.policy_type {
        PolicyType::Pii => compile_pii(config)?,
        PolicyType::ContentSafety => compile_content_safety(config)?,
        PolicyType::PromptInjection => compile_prompt_injection(config)?,
        PolicyType::Custom => compile_custom(config)?,
    };

    let label = match policy.policy_type {
        PolicyType::Custom => format!("Custom_{}", policy.name),
        other => other.check_label().to_string(),
    };

    Ok(CompiledCheck {
        policy_id: policy.id,
        policy_name: policy.name.clone(),
        policy_type: policy.policy_type,
        agent_id: policy.agent_id,
        created_at: policy.created_at,
        label,
        config_hash: config_hash(config),
        rule,
    })
}

/// Content hash of a rule configuration. serde_json maps serialize with
/// sorted keys, so the same configuration always hashes the same.
pub fn config_hash(config: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn compile_pii(config: &Value) -> Result<CompiledRule, CompileError> {
    let action = optional_action(config, Verdict::Deny)?;
    let entries = non_empty_array(config, "patterns")?;

    let mut patterns = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = require_str(entry, "name")?;
        let raw = require_str(entry, "pattern")?;
        let literal = entry.get("literal").and_then(Value::as_bool).unwrap_or(false);

        let regex = if literal {
            compile_pattern(&format!("(?i){}", regex::escape(raw)))?
        } else {
            compile_pattern(raw)?
        };

        patterns.push(PiiPattern {
            name: name.to_string(),
            regex,
            severity: parse_severity(entry)?,
        });
    }

    Ok(CompiledRule::Pii { action, patterns })
}

fn compile_content_safety(config: &Value) -> Result<CompiledRule, CompileError> {
    let entries = non_empty_array(config, "categories")?;

    let mut categories: Vec<CategoryRule> = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = require_str(entry, "name")?;
        if name.is_empty() {
            return Err(CompileError::InvalidField {
                field: "categories",
                reason: "category name must not be empty".to_string(),
            });
        }
        if categories.iter().any(|c| c.name == name) {
            return Err(CompileError::InvalidField {
                field: "categories",
                reason: format!("duplicate category '{}'", name),
            });
        }

        let threshold = entry
            .get("threshold")
            .and_then(Value::as_f64)
            .ok_or(CompileError::MissingField("threshold"))?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CompileError::InvalidThreshold {
                category: name.to_string(),
                value: threshold,
            });
        }

        categories.push(CategoryRule {
            name: name.to_string(),
            threshold,
            action: required_action(entry)?,
        });
    }

    Ok(CompiledRule::ContentSafety { categories })
}

fn compile_prompt_injection(config: &Value) -> Result<CompiledRule, CompileError> {
    let action = optional_action(config, Verdict::Warn)?;
    let keywords = optional_string_array(config, "keywords")?
        .into_iter()
        .map(|k| k.to_lowercase())
        .collect::<Vec<_>>();
    let raw_patterns = optional_string_array(config, "patterns")?;

    if keywords.is_empty() && raw_patterns.is_empty() {
        return Err(CompileError::InvalidField {
            field: "keywords",
            reason: "at least one keyword or pattern is required".to_string(),
        });
    }

    let mut patterns = Vec::with_capacity(raw_patterns.len());
    for raw in raw_patterns {
        patterns.push(compile_pattern(&raw)?);
    }

    Ok(CompiledRule::PromptInjection {
        action,
        keywords,
        patterns,
    })
}

fn compile_custom(config: &Value) -> Result<CompiledRule, CompileError> {
    // Accept the legacy shorthand {"deny_keywords": [...]} as a single
    // DENY condition.
    if let Some(keywords) = config.get("deny_keywords") {
        let keywords = string_array(keywords, "deny_keywords")?;
        if keywords.is_empty() {
            return Err(CompileError::InvalidField {
                field: "deny_keywords",
                reason: "must not be empty".to_string(),
            });
        }
        return Ok(CompiledRule::Custom {
            conditions: vec![CustomCondition::DenyKeywords {
                keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
                action: Verdict::Deny,
            }],
        });
    }

    let entries = non_empty_array(config, "conditions")?;

    let mut conditions = Vec::with_capacity(entries.len());
    for entry in entries {
        let kind = require_str(entry, "kind")?;
        let condition = match kind {
            "deny_keywords" => {
                let keywords = entry
                    .get("keywords")
                    .map(|v| string_array(v, "keywords"))
                    .transpose()?
                    .unwrap_or_default();
                if keywords.is_empty() {
                    return Err(CompileError::InvalidField {
                        field: "keywords",
                        reason: "must not be empty".to_string(),
                    });
                }
                CustomCondition::DenyKeywords {
                    keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
                    action: optional_action(entry, Verdict::Deny)?,
                }
            }
            "regex" => CustomCondition::Pattern {
                regex: compile_pattern(require_str(entry, "pattern")?)?,
                action: required_action(entry)?,
            },
            "max_length" => {
                let max_chars = entry
                    .get("max_chars")
                    .and_then(Value::as_u64)
                    .ok_or(CompileError::MissingField("max_chars"))?;
                if max_chars == 0 {
                    return Err(CompileError::InvalidField {
                        field: "max_chars",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                CustomCondition::MaxLength {
                    max_chars: max_chars as usize,
                    action: required_action(entry)?,
                }
            }
            "context_equals" => CustomCondition::ContextEquals {
                key: require_str(entry, "key")?.to_string(),
                value: require_str(entry, "value")?.to_string(),
                action: required_action(entry)?,
            },
            other => return Err(CompileError::UnknownCondition(other.to_string())),
        };
        conditions.push(condition);
    }

    Ok(CompiledRule::Custom { conditions })
}

// ==================== Parsing helpers ====================

fn compile_pattern(raw: &str) -> Result<Regex, CompileError> {
    Regex::new(raw).map_err(|e| CompileError::InvalidPattern {
        pattern: raw.to_string(),
        source: e,
    })
}

fn action_from_str(s: &str) -> Result<Verdict, CompileError> {
    match s.to_uppercase().as_str() {
        "DENY" => Ok(Verdict::Deny),
        "WARN" => Ok(Verdict::Warn),
        _ => Err(CompileError::UnknownAction(s.to_string())),
    }
}

fn optional_action(entry: &Value, default: Verdict) -> Result<Verdict, CompileError> {
    match entry.get("action") {
        None => Ok(default),
        Some(Value::String(s)) => action_from_str(s),
        Some(other) => Err(CompileError::InvalidField {
            field: "action",
            reason: format!("expected string, got {}", other),
        }),
    }
}

fn required_action(entry: &Value) -> Result<Verdict, CompileError> {
    match entry.get("action") {
        None => Err(CompileError::MissingField("action")),
        Some(Value::String(s)) => action_from_str(s),
        Some(other) => Err(CompileError::InvalidField {
            field: "action",
            reason: format!("expected string, got {}", other),
        }),
    }
}

fn require_str<'a>(entry: &'a Value, field: &'static str) -> Result<&'a str, CompileError> {
    match entry.get(field) {
        None => Err(CompileError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(CompileError::InvalidField {
            field,
            reason: format!("expected string, got {}", other),
        }),
    }
}

fn non_empty_array<'a>(
    config: &'a Value,
    field: &'static str,
) -> Result<&'a [Value], CompileError> {
    let entries = config
        .get(field)
        .and_then(Value::as_array)
        .ok_or(CompileError::MissingField(field))?;
    if entries.is_empty() {
        return Err(CompileError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(entries)
}

fn string_array(value: &Value, field: &'static str) -> Result<Vec<String>, CompileError> {
    let entries = value.as_array().ok_or(CompileError::InvalidField {
        field,
        reason: "expected an array of strings".to_string(),
    })?;
    entries
        .iter()
        .map(|v| {
            v.as_str().map(str::to_string).ok_or(CompileError::InvalidField {
                field,
                reason: format!("expected string, got {}", v),
            })
        })
        .collect()
}

fn optional_string_array(config: &Value, field: &'static str) -> Result<Vec<String>, CompileError> {
    match config.get(field) {
        None => Ok(Vec::new()),
        Some(value) => string_array(value, field),
    }
}

fn parse_severity(entry: &Value) -> Result<Severity, CompileError> {
    match entry.get("severity") {
        None => Ok(Severity::Medium),
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(CompileError::InvalidField {
                field: "severity",
                reason: format!("unknown severity '{}'", other),
            }),
        },
        Some(other) => Err(CompileError::InvalidField {
            field: "severity",
            reason: format!("expected string, got {}", other),
        }),
    }
}
