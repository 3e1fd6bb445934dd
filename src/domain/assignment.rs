//! Assignments: the persisted binding of a sample/item pair to a researcher.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::row::SampleKey;

/// How an assignment was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignMethod {
    /// A routing rule matched and its preferred researcher was active
    #[serde(rename = "rule_only")]
    RuleOnly,

    /// No rule applied; the load-balancing fallback picked the researcher
    #[serde(rename = "rule+roundrobin")]
    RuleRoundRobin,
}

impl AssignMethod {
    /// Stable string form used in the assignments table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleOnly => "rule_only",
            Self::RuleRoundRobin => "rule+roundrobin",
        }
    }

    /// Parse the stored string form back
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rule_only" => Some(Self::RuleOnly),
            "rule+roundrobin" => Some(Self::RuleRoundRobin),
            _ => None,
        }
    }
}

/// One ledger row. Created by the engine, never mutated by it; a separate
/// completion workflow may later attach a completion timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub sample_no: String,
    pub item: String,
    pub researcher: String,
    pub assigned_at: DateTime<Local>,
    pub method: AssignMethod,
}

impl Assignment {
    pub fn key(&self) -> SampleKey {
        SampleKey::new(self.sample_no.clone(), self.item.clone())
    }

    /// Timestamp form stored in the ledger; leads with the local calendar
    /// date so SQLite's `date()` can group by day.
    pub fn assigned_at_str(&self) -> String {
        self.assigned_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
