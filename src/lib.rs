//! labflow - lab sample-assignment automation
//!
//! Takes a portal's exported spreadsheet, normalizes it, assigns each
//! (sample, measurement-item) pair to exactly one researcher, and publishes
//! per-researcher task folders and notification digests.
//!
//! # Architecture
//!
//! The system is built around an idempotent ledger:
//! - Every (sample, item) pair is bound to exactly one researcher, once
//! - Re-downloaded or overlapping exports are skipped, never re-assigned
//! - The SQLite uniqueness constraint is the final arbiter under
//!   concurrent runs; the engine's in-memory check is only a fast path
//!
//! # Modules
//!
//! - `engine`: rule evaluation, dedup, and the load-balancing fallback
//! - `store`: rule/roster CSVs, the SQLite ledger, database backups
//! - `ingest`: export normalization and the inbox watcher
//! - `publish`: digest and shared-folder publishers
//! - `pipeline`: one export run, end to end
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process one export end to end
//! labflow run inbox/export_20250301.csv
//!
//! # Assign only, nothing published
//! labflow assign inbox/export_20250301.csv
//!
//! # Watch the inbox and process exports as they arrive
//! labflow watch
//!
//! # Today's per-researcher counts
//! labflow status
//! ```

pub mod cli;
pub mod config;
pub mod csv;
pub mod domain;
pub mod engine;
pub mod ingest;
pub mod pipeline;
pub mod publish;
pub mod store;

// Re-export main types at crate root for convenience
pub use domain::{AssignMethod, Assignment, Researcher, Rule, SampleKey, SampleRow};
pub use engine::{AssignError, AssignmentEngine, BatchOutcome, KeyIndex, LoadTracker, RuleSource};
pub use pipeline::{IngestPipeline, RunSummary};
pub use store::{BackupManager, ConfigError, CsvRuleStore, LedgerError, SaveReport, SqliteLedger};

// Export ingestion
pub use ingest::{ExportEvent, ExportWatcher, NormalizeError, WatcherConfig};

// Publishers
pub use publish::{DigestWriter, Publisher, SharedFolderSync};
