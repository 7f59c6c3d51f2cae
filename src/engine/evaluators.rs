//! Per-type check evaluation.
//!
//! Each compiled check evaluates one input to a [`CheckResult`]. Evaluation
//! is stateless and safe to run concurrently; the orchestrator wraps every
//! call in the per-check timeout.

use serde_json::Value;

use crate::domain::{CheckResult, Verdict};

use super::classifier::ContentClassifier;
use super::compiler::{CategoryRule, CompiledCheck, CompiledRule, CustomCondition, PiiPattern};

impl CompiledCheck {
    /// Evaluate this check against one input.
    ///
    /// The classifier is consulted only by content-safety rules, at most
    /// once per call; its failure degrades to an unavailable result instead
    /// of an error.
    pub async fn evaluate(
        &self,
        text: &str,
        context: &Value,
        classifier: &dyn ContentClassifier,
    ) -> CheckResult {
        match &self.rule {
            CompiledRule::Pii { action, patterns } => self.scan_pii(*action, patterns, text),
            CompiledRule::PromptInjection {
                action,
                keywords,
                patterns,
            } => self.scan_injection(*action, keywords, patterns, text),
            CompiledRule::ContentSafety { categories } => {
                self.score_content(categories, text, classifier).await
            }
            CompiledRule::Custom { conditions } => self.walk_conditions(conditions, text, context),
        }
    }

    /// First matching pattern wins; severity is reported, never escalated.
    fn scan_pii(&self, action: Verdict, patterns: &[PiiPattern], text: &str) -> CheckResult {
        for pattern in patterns {
            if pattern.regex.is_match(text) {
                return CheckResult::triggered(
                    self.policy_id,
                    action,
                    format!(
                        "PII detected in prompt: pattern '{}' matched (severity {}).",
                        pattern.name, pattern.severity
                    ),
                );
            }
        }
        CheckResult::none(self.policy_id)
    }

    fn scan_injection(
        &self,
        action: Verdict,
        keywords: &[String],
        patterns: &[regex::Regex],
        text: &str,
    ) -> CheckResult {
        let lowered = text.to_lowercase();

        for keyword in keywords {
            if lowered.contains(keyword) {
                return CheckResult::triggered(
                    self.policy_id,
                    action,
                    format!(
                        "Potential prompt injection detected: matched keyword '{}'.",
                        keyword
                    ),
                );
            }
        }

        for pattern in patterns {
            if pattern.is_match(text) {
                return CheckResult::triggered(
                    self.policy_id,
                    action,
                    format!(
                        "Potential prompt injection detected: matched pattern '{}'.",
                        pattern.as_str()
                    ),
                );
            }
        }

        CheckResult::none(self.policy_id)
    }

    /// Every category at or above its threshold is a candidate; the highest
    /// precedence wins, declared order breaking ties.
    async fn score_content(
        &self,
        categories: &[CategoryRule],
        text: &str,
        classifier: &dyn ContentClassifier,
    ) -> CheckResult {
        let names: Vec<String> = categories.iter().map(|c| c.name.clone()).collect();

        let scores = match classifier.score(text, &names).await {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(
                    policy_id = %self.policy_id,
                    error = %e,
                    "Content classifier failed, marking check unavailable"
                );
                return CheckResult::unavailable(self.policy_id);
            }
        };

        let mut winner: Option<(&CategoryRule, f64)> = None;
        for category in categories {
            let Some(score) = scores.get(&category.name).copied() else {
                continue;
            };
            if score < category.threshold {
                continue;
            }
            let beats_current = match winner {
                None => true,
                Some((current, _)) => {
                    category.action.precedence() > current.action.precedence()
                }
            };
            if beats_current {
                winner = Some((category, score));
            }
        }

        match winner {
            Some((category, score)) => CheckResult::triggered(
                self.policy_id,
                category.action,
                format!(
                    "Content safety violation in category '{}' (score {:.2}, threshold {:.2}).",
                    category.name, score, category.threshold
                ),
            ),
            None => CheckResult::none(self.policy_id),
        }
    }

    /// Walks conditions in declared order; the highest-precedence trigger
    /// wins and the first condition at that precedence supplies the reason.
    fn walk_conditions(
        &self,
        conditions: &[CustomCondition],
        text: &str,
        context: &Value,
    ) -> CheckResult {
        let lowered = text.to_lowercase();

        let mut winner: Option<(Verdict, String)> = None;
        for condition in conditions {
            let Some(reason) = self.condition_trigger(condition, text, &lowered, context) else {
                continue;
            };
            let action = condition.action();
            let beats_current = match &winner {
                None => true,
                Some((current, _)) => action.precedence() > current.precedence(),
            };
            if beats_current {
                winner = Some((action, reason));
            }
        }

        match winner {
            Some((action, reason)) => CheckResult::triggered(self.policy_id, action, reason),
            None => CheckResult::none(self.policy_id),
        }
    }

    /// The reason string when `condition` triggers on this input.
    fn condition_trigger(
        &self,
        condition: &CustomCondition,
        text: &str,
        lowered: &str,
        context: &Value,
    ) -> Option<String> {
        match condition {
            CustomCondition::DenyKeywords { keywords, .. } => keywords
                .iter()
                .find(|kw| lowered.contains(kw.as_str()))
                .map(|kw| {
                    format!(
                        "Custom policy '{}' triggered by keyword '{}'.",
                        self.policy_name, kw
                    )
                }),
            CustomCondition::Pattern { regex, .. } => regex.is_match(text).then(|| {
                format!(
                    "Custom policy '{}' triggered by pattern '{}'.",
                    self.policy_name,
                    regex.as_str()
                )
            }),
            CustomCondition::MaxLength { max_chars, .. } => {
                let length = text.chars().count();
                (length > *max_chars).then(|| {
                    format!(
                        "Custom policy '{}' triggered: input length {} exceeds {}.",
                        self.policy_name, length, max_chars
                    )
                })
            }
            CustomCondition::ContextEquals { key, value, .. } => context
                .get(key)
                .and_then(Value::as_str)
                .filter(|v| *v == value.as_str())
                .map(|_| {
                    format!(
                        "Custom policy '{}' triggered by context '{}'.",
                        self.policy_name, key
                    )
                }),
        }
    }
}
