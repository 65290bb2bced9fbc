//! Ledger use-case services.
//!
//! # Responsibility
//! - Orchestrate evaluator, clock, and repositories into sweep and
//!   completion entry points.
//! - Keep schedulers and callers decoupled from storage details.

pub mod ledger_service;
pub mod sweep_runner;
