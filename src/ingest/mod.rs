//! Export ingestion.
//!
//! This module turns portal exports into canonical rows:
//!
//! 1. **Normalizer**: maps heterogeneous spreadsheet headers onto the
//!    canonical row shape and trims every field
//! 2. **Watcher**: monitors an inbox directory for newly dropped export
//!    files and emits them once their size is stable
//!
//! ```text
//! portal export (.csv) → Watcher → Normalizer → engine
//! ```
//!
//! Re-delivered exports are harmless: content fingerprints land in the
//! ledger's ingest log and the engine skips already-bound keys anyway.

pub mod normalize;
pub mod watcher;

// Re-export key types
pub use normalize::{normalize_csv, NormalizeError};
pub use watcher::{ExportEvent, ExportWatcher, WatcherConfig, WatcherError};
