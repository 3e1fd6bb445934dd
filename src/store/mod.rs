//! Persistent and configuration stores.
//!
//! - rules: CSV-backed routing rules and researcher roster
//! - ledger: the SQLite assignment ledger (uniqueness lives here)
//! - backup: database snapshots and retention housekeeping

pub mod backup;
pub mod ledger;
pub mod rules;

// Re-export commonly used types
pub use backup::{BackupError, BackupInfo, BackupManager};
pub use ledger::{LedgerError, SaveReport, SqliteLedger};
pub use rules::{ConfigError, CsvRuleStore};
