//! Domain types for the guardrails engine.
//!
//! This module contains the core business entities and value objects.

mod audit;
mod evaluation;
mod policy;
pub mod templates;

pub use audit::*;
pub use evaluation::*;
pub use policy::*;
