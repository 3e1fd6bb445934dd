//! Downstream publishers for newly created assignments.
//!
//! Publishers are the outbound edge of the pipeline. They only ever see
//! assignments the ledger actually inserted, never duplicates that were
//! skipped, never rows a concurrent run bound first.

pub mod digest;
pub mod sync;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Assignment, Researcher};

// Re-export the publishers
pub use digest::DigestWriter;
pub use sync::SharedFolderSync;

/// Trait for assignment consumers
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Human-readable publisher name
    fn name(&self) -> &str;

    /// Publish one batch of newly created assignments
    async fn publish(&self, assignments: &[Assignment], roster: &[Researcher]) -> Result<()>;
}
