//! HTTP API layer for the guardrails engine.
//!
//! Provides REST endpoints for input evaluation, policy management and the
//! audit trail.

pub mod handlers;
mod routes;
mod types;

pub use routes::build_router;
