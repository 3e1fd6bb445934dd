//! Batch ingestion pipeline.
//!
//! Wires the stages for one export: normalize → upsert samples → assign →
//! persist → publish. Each stage logs its own step; assignment and
//! persistence failures are fatal for the batch, publish failures are not
//! (the assignments are already durable by then).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::engine::{AssignmentEngine, BatchOutcome, RuleSource};
use crate::ingest::normalize_csv;
use crate::ingest::watcher::fingerprint_bytes;
use crate::publish::Publisher;
use crate::store::{CsvRuleStore, SaveReport, SqliteLedger};

/// One export run, end to end.
pub struct IngestPipeline {
    rule_store: CsvRuleStore,
    db_path: PathBuf,
    publishers: Vec<Box<dyn Publisher>>,
}

impl IngestPipeline {
    pub fn new(rule_store: CsvRuleStore, db_path: impl Into<PathBuf>) -> Self {
        Self {
            rule_store,
            db_path: db_path.into(),
            publishers: Vec::new(),
        }
    }

    /// Attach a downstream publisher.
    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Process an export file. With `skip_seen`, a file whose content
    /// fingerprint is already in the ingest log is skipped (watch mode);
    /// otherwise it is processed anyway; the ledger makes that harmless.
    #[instrument(skip(self), fields(export = %path.display()))]
    pub async fn run_file(&self, path: &Path, skip_seen: bool) -> Result<Option<RunSummary>> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read export: {}", path.display()))?;

        let mut ledger = SqliteLedger::open(&self.db_path)?;
        let fingerprint = fingerprint_bytes(text.as_bytes());
        let source = path.display().to_string();

        let fresh = ledger.record_ingest(&fingerprint, &source)?;
        if !fresh && skip_seen {
            info!(%fingerprint, "Export content already ingested, skipping");
            return Ok(None);
        }

        self.execute(&text, &source, ledger).await.map(Some)
    }

    /// Process export text from an arbitrary source (stdin, tests).
    pub async fn run_text(&self, text: &str, source: &str) -> Result<RunSummary> {
        let ledger = SqliteLedger::open(&self.db_path)?;
        self.execute(text, source, ledger).await
    }

    async fn execute(
        &self,
        text: &str,
        source: &str,
        mut ledger: SqliteLedger,
    ) -> Result<RunSummary> {
        info!(source, "Batch started");

        let rows = normalize_csv(text).context("Failed to normalize export")?;
        info!(rows = rows.len(), "Export normalized");

        let samples_upserted = ledger
            .upsert_samples(&rows, source)
            .context("Failed to store sample metadata")?;

        let outcome = {
            let engine = AssignmentEngine::new(&self.rule_store, &ledger, &ledger);
            engine.assign(&rows).context("Assignment failed")?
        };
        info!(batch_id = %outcome.batch_id, "{}", outcome.summary());

        let saved = ledger
            .save(&outcome.assignments)
            .context("Failed to persist assignments")?;
        if saved.conflicts > 0 {
            info!(conflicts = saved.conflicts, "Keys bound by a concurrent run");
        }

        // Publishers only ever see what this run actually inserted.
        if !self.publishers.is_empty() {
            let roster = self.rule_store.load_roster()?;
            for publisher in &self.publishers {
                if let Err(e) = publisher.publish(&saved.inserted, &roster).await {
                    warn!(publisher = publisher.name(), error = %e, "Publish failed, batch still succeeds");
                }
            }
        }

        let summary = RunSummary {
            outcome,
            saved,
            samples_upserted,
        };

        // The journal is observability, not state; a write failure is not a
        // batch failure.
        if let Err(e) = self.append_journal(source, &summary).await {
            warn!(error = %e, "Failed to append batch journal");
        }

        info!(batch_id = %summary.outcome.batch_id, "Batch finished");
        Ok(summary)
    }

    /// Append one JSON line per batch to storage/batches.jsonl, next to the
    /// database.
    async fn append_journal(&self, source: &str, summary: &RunSummary) -> Result<()> {
        let journal_path = self
            .db_path
            .parent()
            .map(|dir| dir.join("batches.jsonl"))
            .context("ledger path has no parent directory")?;

        let record = BatchRecord {
            batch_id: summary.outcome.batch_id,
            finished_at: Utc::now(),
            source,
            processed: summary.outcome.processed(),
            inserted: summary.saved.inserted.len(),
            duplicates: summary.duplicates(),
            rejected: summary.outcome.rejected.len(),
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .await
            .with_context(|| format!("Failed to open journal: {}", journal_path.display()))?;

        let json = serde_json::to_string(&record).context("Failed to serialize batch record")?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

/// One line of the batch journal.
#[derive(Debug, Serialize)]
struct BatchRecord<'a> {
    batch_id: Uuid,
    finished_at: DateTime<Utc>,
    source: &'a str,
    processed: usize,
    inserted: usize,
    duplicates: usize,
    rejected: usize,
}

/// What one pipeline run did, for the CLI report.
pub struct RunSummary {
    pub outcome: BatchOutcome,
    pub saved: SaveReport,
    pub samples_upserted: usize,
}

impl RunSummary {
    /// Duplicates seen by the engine plus keys a concurrent writer bound
    /// between our snapshot and our save.
    pub fn duplicates(&self) -> usize {
        self.outcome.duplicates + self.saved.conflicts
    }

    /// Multi-line, human-readable batch report.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("rows processed:  {}\n", self.outcome.processed()));
        out.push_str(&format!("newly assigned:  {}\n", self.saved.inserted.len()));

        let mut per: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
        for a in &self.saved.inserted {
            *per.entry(a.researcher.as_str()).or_default() += 1;
        }
        for (name, count) in per {
            out.push_str(&format!("    {}: {}\n", name, count));
        }

        out.push_str(&format!("duplicates:      {}\n", self.duplicates()));
        out.push_str(&format!("rejected:        {}\n", self.outcome.rejected.len()));
        for r in &self.outcome.rejected {
            out.push_str(&format!("    {} / {}: {}\n", r.sample_no, r.item, r.reason));
        }
        out
    }
}
