//! Evaluation engine for the guardrails service.
//!
//! This module contains the evaluation pipeline:
//! - Rule Compiler: Validates stored policies into immutable compiled checks
//! - Evaluators: Per-type check logic (PII, injection, content safety, custom)
//! - Content Classifier: Bounded HTTP client for category scores
//! - Policy Cache: Snapshot-swapped compiled checks per customer
//! - Evaluation Orchestrator: Concurrent fan-out, deadlines, aggregation
//! - Audit Emitter: Fire-and-forget audit trail queue

mod cache;
mod classifier;
mod compiler;
mod emitter;
mod evaluators;
mod orchestrator;

pub use cache::*;
pub use classifier::*;
pub use compiler::*;
pub use emitter::*;
pub use orchestrator::*;
