//! Route handlers, one module per resource.
//!
//! Handlers stay thin: parse, call the orchestrator, map the error.

pub mod health;
pub mod orders;
pub mod sales;
pub mod terminal;
