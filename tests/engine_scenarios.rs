//! Engine Scenario Tests
//!
//! Rule precedence and load balancing exercised against a real SQLite
//! ledger, including loads carried over from earlier batches the same day.

use std::path::Path;

use labflow::domain::{AssignMethod, SampleRow};
use labflow::engine::AssignmentEngine;
use labflow::store::{CsvRuleStore, SqliteLedger};
use tempfile::TempDir;

fn seed_store(dir: &Path, rules: &str, roster: &str) -> CsvRuleStore {
    let rules_path = dir.join("item_rules.csv");
    let roster_path = dir.join("researchers.csv");
    std::fs::write(&rules_path, rules).unwrap();
    std::fs::write(&roster_path, roster).unwrap();
    CsvRuleStore::new(rules_path, roster_path)
}

fn open_ledger(dir: &Path) -> SqliteLedger {
    SqliteLedger::open(&dir.join("lab.db")).unwrap()
}

fn rows(specs: &[(&str, &str)]) -> Vec<SampleRow> {
    specs
        .iter()
        .map(|(s, i)| SampleRow::new(*s, *i))
        .collect()
}

#[test]
fn test_reference_scenario() {
    let temp = TempDir::new().unwrap();
    let store = seed_store(
        temp.path(),
        "priority,item_pattern,preferred\n1,총질소|TN,김\n",
        "name,email,active\n김,kim@lab.example,1\n이,lee@lab.example,1\n",
    );
    let mut ledger = open_ledger(temp.path());

    let outcome = AssignmentEngine::new(&store, &ledger, &ledger)
        .assign(&rows(&[
            ("S1", "총질소"),
            ("S2", "TN 측정"),
            ("S3", "부유물질"),
        ]))
        .unwrap();

    let picks: Vec<(&str, &str, AssignMethod)> = outcome
        .assignments
        .iter()
        .map(|a| (a.sample_no.as_str(), a.researcher.as_str(), a.method))
        .collect();

    assert_eq!(
        picks,
        vec![
            ("S1", "김", AssignMethod::RuleOnly),
            ("S2", "김", AssignMethod::RuleOnly),
            // 김 carries 2 from this batch, so the unmatched row goes to 이.
            ("S3", "이", AssignMethod::RuleRoundRobin),
        ]
    );

    ledger.save(&outcome.assignments).unwrap();
    let loads = ledger.today_loads().unwrap();
    assert_eq!(loads.get("김"), Some(&2));
    assert_eq!(loads.get("이"), Some(&1));
}

#[test]
fn test_fallback_sees_loads_from_earlier_batches() {
    let temp = TempDir::new().unwrap();
    let store = seed_store(
        temp.path(),
        "priority,item_pattern,preferred\n",
        "name,email,active\n김,kim@lab.example,1\n이,lee@lab.example,1\n",
    );
    let mut ledger = open_ledger(temp.path());

    // Morning batch: two rows, balanced 김/이.
    let morning = AssignmentEngine::new(&store, &ledger, &ledger)
        .assign(&rows(&[("A1", "총인"), ("A2", "페놀")]))
        .unwrap();
    ledger.save(&morning.assignments).unwrap();

    // Afternoon batch: loads are level again, so the next row goes to the
    // first roster slot and the one after balances back.
    let afternoon = AssignmentEngine::new(&store, &ledger, &ledger)
        .assign(&rows(&[("B1", "크롬"), ("B2", "구리")]))
        .unwrap();
    ledger.save(&afternoon.assignments).unwrap();

    let loads = ledger.today_loads().unwrap();
    assert_eq!(loads.get("김"), Some(&2));
    assert_eq!(loads.get("이"), Some(&2));
}

#[test]
fn test_rule_priority_and_inactive_preferred_against_roster_file() {
    let temp = TempDir::new().unwrap();
    // 박 is on the rule table but inactive on the roster: the priority-1
    // rule must be skipped entirely.
    let store = seed_store(
        temp.path(),
        "priority,item_pattern,preferred\n1,질소,박\n2,질소,김\n",
        "name,email,active\n김,kim@lab.example,1\n이,lee@lab.example,1\n박,park@lab.example,0\n",
    );
    let ledger = open_ledger(temp.path());

    let outcome = AssignmentEngine::new(&store, &ledger, &ledger)
        .assign(&rows(&[("S1", "총질소")]))
        .unwrap();

    assert_eq!(outcome.assignments[0].researcher, "김");
    assert_eq!(outcome.assignments[0].method, AssignMethod::RuleOnly);
}

#[test]
fn test_cross_batch_uniqueness() {
    let temp = TempDir::new().unwrap();
    let store = seed_store(
        temp.path(),
        "priority,item_pattern,preferred\n",
        "name,email,active\n김,kim@lab.example,1\n",
    );
    let mut ledger = open_ledger(temp.path());

    for batch in [
        rows(&[("S1", "총질소"), ("S2", "총인")]),
        rows(&[("S2", "총인"), ("S3", "페놀")]),
        rows(&[("S1", "총질소"), ("S3", "페놀"), ("S4", "크롬")]),
    ] {
        let outcome = AssignmentEngine::new(&store, &ledger, &ledger)
            .assign(&batch)
            .unwrap();
        ledger.save(&outcome.assignments).unwrap();
    }

    // Four distinct keys ever seen, four ledger rows.
    assert_eq!(ledger.assigned_keys().unwrap().len(), 4);
    assert_eq!(ledger.today_assignments().unwrap().len(), 4);
}

#[test]
fn test_invalid_rows_do_not_block_a_batch() {
    let temp = TempDir::new().unwrap();
    let store = seed_store(
        temp.path(),
        "priority,item_pattern,preferred\n",
        "name,email,active\n김,kim@lab.example,1\n",
    );
    let mut ledger = open_ledger(temp.path());

    let outcome = AssignmentEngine::new(&store, &ledger, &ledger)
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

    let saved = ledger.save(&outcome.assignments).unwrap();
    assert_eq!(saved.inserted.len(), 4);
}
