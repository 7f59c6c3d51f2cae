//! Storage layer for the guardrails engine.
//!
//! Provides database access via SQLx with SQLite.

mod models;
mod repository;

pub use repository::GuardrailsRepository;
