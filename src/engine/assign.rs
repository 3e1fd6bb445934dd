//! Core assignment algorithm: layered rules first, load-balancing fallback
//! second, with idempotent skipping of anything already in the ledger.
//!
//! Overlapping batches are expected (re-downloaded exports, manual re-runs
//! racing the scheduled job). The engine's dedup check makes the common case
//! cheap; the ledger's uniqueness constraint remains the final arbiter.

use std::collections::{HashMap, HashSet};

use chrono::Local;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{AssignMethod, Assignment, Researcher, Rule, SampleKey, SampleRow};
use crate::store::ledger::LedgerError;
use crate::store::rules::ConfigError;

use super::report::{BatchOutcome, RejectReason, RejectedRow};

/// Source of routing rules and the active roster.
///
/// Implementations are pure reads; the engine calls each method once per
/// batch. `load_roster` returns active researchers only, in a fixed order;
/// that order is the fallback tie-breaker.
pub trait RuleSource {
    fn load_rules(&self) -> Result<Vec<Rule>, ConfigError>;
    fn load_roster(&self) -> Result<Vec<Researcher>, ConfigError>;
}

/// Reports how many assignments each researcher already received today
/// (local calendar day). Researchers absent from the map count as zero.
pub trait LoadTracker {
    fn today_loads(&self) -> Result<HashMap<String, u64>, LedgerError>;
}

/// Read view of the ledger's bound keys, snapshot at batch start.
pub trait KeyIndex {
    fn assigned_keys(&self) -> Result<HashSet<SampleKey>, LedgerError>;
}

/// Errors that abort a batch before any assignment is produced.
#[derive(Debug, Error)]
pub enum AssignError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no active researchers in roster")]
    NoActiveResearcher,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// The assignment engine. Holds its collaborators by reference; all state is
/// local to one `assign` call, so concurrent invocations (separate engines
/// over separate snapshots) never share the running load counter.
pub struct AssignmentEngine<'a> {
    rules: &'a dyn RuleSource,
    loads: &'a dyn LoadTracker,
    keys: &'a dyn KeyIndex,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(
        rules: &'a dyn RuleSource,
        loads: &'a dyn LoadTracker,
        keys: &'a dyn KeyIndex,
    ) -> Self {
        Self { rules, loads, keys }
    }

    /// Assign a batch of rows, in input order.
    ///
    /// Rows need not be deduplicated, internally or against history. Keys
    /// already bound are skipped silently; rows with a blank natural key are
    /// rejected individually without aborting the batch.
    pub fn assign(&self, rows: &[SampleRow]) -> Result<BatchOutcome, AssignError> {
        let mut rules = self.rules.load_rules()?;
        // Stable sort: equal priorities keep the rule file's order.
        rules.sort_by_key(|r| r.priority);

        let roster = self.rules.load_roster()?;
        if roster.is_empty() {
            return Err(AssignError::NoActiveResearcher);
        }
        let active: HashSet<&str> = roster.iter().map(|r| r.name.as_str()).collect();

        let existing = self.keys.assigned_keys()?;
        let today = self.loads.today_loads()?;

        // Running load per roster slot, roster order. Every assignment made
        // in this batch bumps it, so later fallback rows observe earlier
        // decisions (greedy round-robin by running minimum).
        let mut running: Vec<(String, u64)> = roster
            .iter()
            .map(|r| (r.name.clone(), today.get(&r.name).copied().unwrap_or(0)))
            .collect();

        let mut outcome = BatchOutcome::new(Uuid::new_v4());
        let mut seen: HashSet<SampleKey> = HashSet::new();

        for row in rows {
            if let Some(reason) = validate(row) {
                warn!(sample_no = %row.sample_no, item = %row.item, %reason, "Rejecting row");
                outcome.rejected.push(RejectedRow {
                    sample_no: row.sample_no.clone(),
                    item: row.item.clone(),
                    reason,
                });
                continue;
            }

            let key = row.key();
            if existing.contains(&key) || !seen.insert(key.clone()) {
                debug!(%key, "Already assigned, skipping");
                outcome.duplicates += 1;
                continue;
            }

            let (researcher, method) = match match_rule(&rules, &active, &row.item) {
                Some(name) => (name.to_string(), AssignMethod::RuleOnly),
                None => (pick_least_loaded(&running), AssignMethod::RuleRoundRobin),
            };

            if let Some(slot) = running.iter_mut().find(|(name, _)| *name == researcher) {
                slot.1 += 1;
            }

            outcome.assignments.push(Assignment {
                sample_no: row.sample_no.clone(),
                item: row.item.clone(),
                researcher,
                assigned_at: Local::now(),
                method,
            });
        }

        Ok(outcome)
    }
}

/// Defensive re-validation of the normalizer's contract.
fn validate(row: &SampleRow) -> Option<RejectReason> {
    if row.item.trim().is_empty() {
        Some(RejectReason::BlankItem)
    } else if row.sample_no.trim().is_empty() {
        Some(RejectReason::BlankSampleNo)
    } else {
        None
    }
}

/// First match wins: by ascending rule priority, then by alternative order
/// within the rule. A rule whose preferred researcher is not active is
/// treated as non-matching.
fn match_rule<'r>(rules: &'r [Rule], active: &HashSet<&str>, item: &str) -> Option<&'r str> {
    rules
        .iter()
        .filter(|rule| active.contains(rule.preferred.as_str()))
        .find(|rule| rule.matches(item))
        .map(|rule| rule.preferred.as_str())
}

/// Lowest running load wins; ties go to the earlier roster slot. Never
/// depends on map iteration order.
fn pick_least_loaded(running: &[(String, u64)]) -> String {
    let mut best = 0;
    for (idx, (_, count)) in running.iter().enumerate().skip(1) {
        if *count < running[best].1 {
            best = idx;
        }
    }
    running[best].0.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRules {
        rules: Vec<Rule>,
        roster: Vec<Researcher>,
    }

    impl FakeRules {
        fn new(rules: Vec<(i64, &str, &str)>, roster: &[&str]) -> Self {
            Self {
                rules: rules
                    .into_iter()
                    .map(|(priority, pattern, preferred)| Rule {
                        priority,
                        item_pattern: pattern.to_string(),
                        preferred: preferred.to_string(),
                    })
                    .collect(),
                roster: roster
                    .iter()
                    .map(|name| Researcher {
                        name: name.to_string(),
                        email: format!("{}@lab.example", name),
                        active: true,
                    })
                    .collect(),
            }
        }
    }

    impl RuleSource for FakeRules {
        fn load_rules(&self) -> Result<Vec<Rule>, ConfigError> {
            Ok(self.rules.clone())
        }

        fn load_roster(&self) -> Result<Vec<Researcher>, ConfigError> {
            Ok(self.roster.clone())
        }
    }

    #[derive(Default)]
    struct FakeLoads(HashMap<String, u64>);

    impl FakeLoads {
        fn with(loads: &[(&str, u64)]) -> Self {
            Self(
                loads
                    .iter()
                    .map(|(n, c)| (n.to_string(), *c))
                    .collect(),
            )
        }
    }

    impl LoadTracker for FakeLoads {
        fn today_loads(&self) -> Result<HashMap<String, u64>, LedgerError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct FakeKeys(HashSet<SampleKey>);

    impl KeyIndex for FakeKeys {
        fn assigned_keys(&self) -> Result<HashSet<SampleKey>, LedgerError> {
            Ok(self.0.clone())
        }
    }

    fn rows(specs: &[(&str, &str)]) -> Vec<SampleRow> {
        specs
            .iter()
            .map(|(sample_no, item)| SampleRow::new(*sample_no, *item))
            .collect()
    }

    fn names(outcome: &BatchOutcome) -> Vec<&str> {
        outcome
            .assignments
            .iter()
            .map(|a| a.researcher.as_str())
            .collect()
    }

    #[test]
    fn test_rule_precedence_lower_priority_wins() {
        let rules = FakeRules::new(vec![(1, "총질소", "A"), (2, "총", "B")], &["A", "B"]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine.assign(&rows(&[("S1", "총질소")])).unwrap();
        assert_eq!(names(&outcome), vec!["A"]);
        assert_eq!(outcome.assignments[0].method, AssignMethod::RuleOnly);
    }

    #[test]
    fn test_priority_ties_keep_file_order() {
        let rules = FakeRules::new(vec![(1, "질소", "A"), (1, "질소", "B")], &["A", "B"]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine.assign(&rows(&[("S1", "총질소")])).unwrap();
        assert_eq!(names(&outcome), vec!["A"]);
    }

    #[test]
    fn test_inactive_preferred_falls_through() {
        // "C" is not on the roster: the first rule must be treated as
        // non-matching, the second rule takes the row.
        let rules = FakeRules::new(vec![(1, "질소", "C"), (2, "질소", "B")], &["A", "B"]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine.assign(&rows(&[("S1", "총질소")])).unwrap();
        assert_eq!(names(&outcome), vec!["B"]);
        assert_eq!(outcome.assignments[0].method, AssignMethod::RuleOnly);
    }

    #[test]
    fn test_inactive_preferred_then_fallback() {
        let rules = FakeRules::new(vec![(1, "질소", "C")], &["A", "B"]);
        let loads = FakeLoads::with(&[("A", 1)]);
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine.assign(&rows(&[("S1", "총질소")])).unwrap();
        assert_eq!(names(&outcome), vec!["B"]);
        assert_eq!(outcome.assignments[0].method, AssignMethod::RuleRoundRobin);
    }

    #[test]
    fn test_fallback_fairness_with_prior_loads() {
        let rules = FakeRules::new(vec![], &["B", "A"]);
        let loads = FakeLoads::with(&[("B", 2)]);
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine
            .assign(&rows(&[("S1", "부유물질"), ("S2", "총인"), ("S3", "페놀")]))
            .unwrap();

        // A starts at 0, B at 2: greedy running minimum gives A, A, then the
        // tie at 2 goes to the earlier roster slot, B.
        assert_eq!(names(&outcome), vec!["A", "A", "B"]);

        // Final totals (A: 0+2, B: 2+1) stay within a spread of 1.
        let mut totals: HashMap<&str, u64> = HashMap::from([("A", 0), ("B", 2)]);
        for a in &outcome.assignments {
            *totals.get_mut(a.researcher.as_str()).unwrap() += 1;
        }
        let max = totals.values().max().unwrap();
        let min = totals.values().min().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_fallback_tie_break_is_roster_order() {
        let rules = FakeRules::new(vec![], &["B", "A"]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine
            .assign(&rows(&[("S1", "총인"), ("S2", "총인2"), ("S3", "총인3"), ("S4", "총인4")]))
            .unwrap();
        // Roster lists B first, so ties alternate starting from B.
        assert_eq!(names(&outcome), vec!["B", "A", "B", "A"]);
    }

    #[test]
    fn test_scenario_rule_then_balanced_fallback() {
        let rules = FakeRules::new(vec![(1, "총질소|TN", "김")], &["김", "이"]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine
            .assign(&rows(&[("S1", "총질소"), ("S2", "TN 측정"), ("S3", "부유물질")]))
            .unwrap();

        assert_eq!(names(&outcome), vec!["김", "김", "이"]);
        assert_eq!(outcome.assignments[0].method, AssignMethod::RuleOnly);
        assert_eq!(outcome.assignments[1].method, AssignMethod::RuleOnly);
        // 김 already carries 2 from this batch, so the fallback row goes to 이.
        assert_eq!(outcome.assignments[2].method, AssignMethod::RuleRoundRobin);
    }

    #[test]
    fn test_existing_keys_are_skipped() {
        let rules = FakeRules::new(vec![], &["A"]);
        let loads = FakeLoads::default();
        let mut bound = HashSet::new();
        bound.insert(SampleKey::new("S1", "총질소"));
        let keys = FakeKeys(bound);
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine
            .assign(&rows(&[("S1", "총질소"), ("S2", "총질소")]))
            .unwrap();
        assert_eq!(outcome.assignments.len(), 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.assignments[0].sample_no, "S2");
    }

    #[test]
    fn test_in_batch_duplicates_collapse() {
        let rules = FakeRules::new(vec![], &["A"]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine
            .assign(&rows(&[("S1", "총인"), ("S1", "총인"), ("S1", "총질소")]))
            .unwrap();
        assert_eq!(outcome.assignments.len(), 2);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn test_invalid_row_isolation() {
        let rules = FakeRules::new(vec![], &["A"]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine
            .assign(&rows(&[
                ("S1", "총인"),
                ("S2", "총질소"),
                ("S3", ""),
                ("S4", "부유물질"),
                ("S5", "페놀"),
            ]))
            .unwrap();

        assert_eq!(outcome.assignments.len(), 4);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].sample_no, "S3");
        assert_eq!(outcome.rejected[0].reason, RejectReason::BlankItem);
        assert_eq!(outcome.processed(), 5);
    }

    #[test]
    fn test_blank_sample_no_rejected() {
        let rules = FakeRules::new(vec![], &["A"]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine.assign(&rows(&[("  ", "총인")])).unwrap();
        assert!(outcome.assignments.is_empty());
        assert_eq!(outcome.rejected[0].reason, RejectReason::BlankSampleNo);
    }

    #[test]
    fn test_empty_roster_is_fatal() {
        let rules = FakeRules::new(vec![(1, "총질소", "A")], &[]);
        let loads = FakeLoads::default();
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let err = engine.assign(&rows(&[("S1", "총질소")])).unwrap_err();
        assert!(matches!(err, AssignError::NoActiveResearcher));
    }

    #[test]
    fn test_empty_pattern_rule_never_matches() {
        let rules = FakeRules::new(vec![(1, "", "A")], &["A", "B"]);
        let loads = FakeLoads::with(&[("A", 5)]);
        let keys = FakeKeys::default();
        let engine = AssignmentEngine::new(&rules, &loads, &keys);

        let outcome = engine.assign(&rows(&[("S1", "총질소")])).unwrap();
        // The empty rule must not fire; B has the lower load.
        assert_eq!(names(&outcome), vec!["B"]);
        assert_eq!(outcome.assignments[0].method, AssignMethod::RuleRoundRobin);
    }
}
