//! CSV-backed rule and roster store.
//!
//! Two small configuration tables drive routing: `item_rules.csv`
//! (`priority,item_pattern,preferred`) and `researchers.csv`
//! (`name,email,active`). Extra columns are ignored. Both files are read
//! fresh once per batch; a missing or malformed file aborts the batch.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::csv::Table;
use crate::domain::{Researcher, Rule};
use crate::engine::RuleSource;

/// Rule/roster source failures. Always fatal for the batch: assignment
/// cannot proceed without a roster.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Starter rule table written by `labflow init`.
pub const RULES_TEMPLATE: &str = "priority,item_pattern,preferred\n";

/// Starter roster written by `labflow init`.
pub const ROSTER_TEMPLATE: &str = "name,email,active\n";

/// CSV rule store. Paths come from configuration; contents are re-read on
/// every load so edits take effect on the next batch.
pub struct CsvRuleStore {
    rules_path: PathBuf,
    roster_path: PathBuf,
}

impl CsvRuleStore {
    pub fn new(rules_path: impl Into<PathBuf>, roster_path: impl Into<PathBuf>) -> Self {
        Self {
            rules_path: rules_path.into(),
            roster_path: roster_path.into(),
        }
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    pub fn roster_path(&self) -> &Path {
        &self.roster_path
    }

    fn read(path: &Path) -> Result<String, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn table(path: &Path) -> Result<Table, ConfigError> {
        let text = Self::read(path)?;
        Table::from_text(&text).ok_or_else(|| ConfigError::Malformed {
            path: path.to_path_buf(),
            line: 1,
            reason: "file is empty (expected a header row)".to_string(),
        })
    }
}

impl RuleSource for CsvRuleStore {
    fn load_rules(&self) -> Result<Vec<Rule>, ConfigError> {
        let table = Self::table(&self.rules_path)?;
        for col in ["item_pattern", "preferred"] {
            if !table.has_column(col) {
                return Err(ConfigError::Malformed {
                    path: self.rules_path.clone(),
                    line: 1,
                    reason: format!("missing column '{}'", col),
                });
            }
        }

        let mut rules = Vec::with_capacity(table.rows.len());
        for (i, row) in table.rows.iter().enumerate() {
            let line = i + 2; // 1-based, after the header
            let priority = match table.get(row, "priority") {
                // Blank priority keeps the historical default.
                None | Some("") => 1,
                Some(raw) => raw.parse::<i64>().map_err(|_| ConfigError::Malformed {
                    path: self.rules_path.clone(),
                    line,
                    reason: format!("priority '{}' is not an integer", raw),
                })?,
            };
            rules.push(Rule {
                priority,
                item_pattern: table.get(row, "item_pattern").unwrap_or("").to_string(),
                preferred: table.get(row, "preferred").unwrap_or("").to_string(),
            });
        }
        Ok(rules)
    }

    fn load_roster(&self) -> Result<Vec<Researcher>, ConfigError> {
        let table = Self::table(&self.roster_path)?;
        for col in ["name", "email"] {
            if !table.has_column(col) {
                return Err(ConfigError::Malformed {
                    path: self.roster_path.clone(),
                    line: 1,
                    reason: format!("missing column '{}'", col),
                });
            }
        }

        let mut roster = Vec::new();
        for (i, row) in table.rows.iter().enumerate() {
            let line = i + 2;
            let name = table.get(row, "name").unwrap_or("");
            if name.is_empty() {
                continue;
            }
            // Rows without an active column count as active, as the
            // original roster files did.
            let active = match table.get(row, "active") {
                None | Some("") => true,
                Some(raw) => parse_active(raw).ok_or_else(|| ConfigError::Malformed {
                    path: self.roster_path.clone(),
                    line,
                    reason: format!("active flag '{}' is not 1/0 or true/false", raw),
                })?,
            };
            if !active {
                continue;
            }
            roster.push(Researcher {
                name: name.to_string(),
                email: table.get(row, "email").unwrap_or("").to_string(),
                active,
            });
        }
        Ok(roster)
    }
}

fn parse_active(raw: &str) -> Option<bool> {
    match raw {
        "1" => Some(true),
        "0" => Some(false),
        _ => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
    }
}
