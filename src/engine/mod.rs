//! The assignment engine.
//!
//! This module contains:
//! - assign: rule evaluation, idempotent dedup, load-balance fallback
//! - report: batch outcome with processed/duplicate/rejected accounting
//!
//! The engine is pure computation over pre-fetched data: collaborators are
//! injected as traits and it performs no I/O of its own.

pub mod assign;
pub mod report;

// Re-export commonly used types
pub use assign::{AssignError, AssignmentEngine, KeyIndex, LoadTracker, RuleSource};
pub use report::{BatchOutcome, RejectReason, RejectedRow};
