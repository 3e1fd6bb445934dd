//! Batch outcome accounting.
//!
//! A batch never reports a bare success/failure. Callers get row counts:
//! processed, newly assigned (per researcher), skipped as duplicate, and
//! rejected as invalid.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Assignment;

/// Why a row was rejected before rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Empty/blank measurement item
    BlankItem,

    /// Empty/blank sample number
    BlankSampleNo,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlankItem => write!(f, "blank item"),
            Self::BlankSampleNo => write!(f, "blank sample_no"),
        }
    }
}

/// A row the engine refused, kept for the batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub sample_no: String,
    pub item: String,
    pub reason: RejectReason,
}

/// Result of one `assign` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Identifier for this batch, threaded through logs and manifests
    pub batch_id: Uuid,

    /// Newly decided assignments, in input order. Not yet persisted.
    pub assignments: Vec<Assignment>,

    /// Rows skipped because their key was already bound (in the ledger or
    /// earlier in this batch)
    pub duplicates: usize,

    /// Rows rejected as invalid
    pub rejected: Vec<RejectedRow>,
}

impl BatchOutcome {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            assignments: Vec::new(),
            duplicates: 0,
            rejected: Vec::new(),
        }
    }

    /// Total rows the engine looked at.
    pub fn processed(&self) -> usize {
        self.assignments.len() + self.duplicates + self.rejected.len()
    }

    /// New-assignment counts per researcher, in stable name order.
    pub fn per_researcher(&self) -> BTreeMap<&str, usize> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for a in &self.assignments {
            *counts.entry(a.researcher.as_str()).or_default() += 1;
        }
        counts
    }

    /// One-line human summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} processed: {} assigned, {} duplicate, {} rejected",
            self.processed(),
            self.assignments.len(),
            self.duplicates,
            self.rejected.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AssignMethod;
    use chrono::Local;

    fn assignment(researcher: &str) -> Assignment {
        Assignment {
            sample_no: "S1".into(),
            item: "총질소".into(),
            researcher: researcher.into(),
            assigned_at: Local::now(),
            method: AssignMethod::RuleOnly,
        }
    }

    #[test]
    fn test_counts() {
        let mut outcome = BatchOutcome::new(Uuid::new_v4());
        outcome.assignments.push(assignment("김"));
        outcome.assignments.push(assignment("김"));
        outcome.assignments.push(assignment("이"));
        outcome.duplicates = 2;
        outcome.rejected.push(RejectedRow {
            sample_no: "S9".into(),
            item: "".into(),
            reason: RejectReason::BlankItem,
        });

        assert_eq!(outcome.processed(), 6);
        let per = outcome.per_researcher();
        assert_eq!(per.get("김"), Some(&2));
        assert_eq!(per.get("이"), Some(&1));
        assert_eq!(outcome.summary(), "6 processed: 3 assigned, 2 duplicate, 1 rejected");
    }
}
