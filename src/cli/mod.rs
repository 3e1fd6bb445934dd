//! Command-line interface for labflow.
//!
//! Provides commands for running the ingest pipeline, assigning from a
//! file, watching the export inbox, inspecting today's loads, and database
//! housekeeping (reset, backup, restore).

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config;
use crate::domain::SampleKey;
use crate::engine::AssignmentEngine;
use crate::ingest::normalize_csv;
use crate::ingest::{ExportWatcher, WatcherConfig};
use crate::pipeline::IngestPipeline;
use crate::publish::{DigestWriter, SharedFolderSync};
use crate::store::rules::{ROSTER_TEMPLATE, RULES_TEMPLATE};
use crate::store::{BackupManager, CsvRuleStore, SqliteLedger};

/// labflow - lab sample-assignment automation
#[derive(Parser, Debug)]
#[command(name = "labflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline on an export file (assign + publish)
    Run {
        /// Portal export (.csv)
        export: PathBuf,
    },

    /// Assign from an export without publishing
    Assign {
        /// Portal export (.csv); reads stdin if omitted
        export: Option<PathBuf>,

        /// Compute and print assignments without persisting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Watch the inbox directory and process new exports as they arrive
    Watch,

    /// Show today's per-researcher assignment counts
    Status,

    /// Mark one assignment as completed
    Complete {
        /// Sample number
        sample_no: String,

        /// Measurement item
        item: String,
    },

    /// Delete all assignments (re-seeding/reprocessing only)
    Reset {
        /// Required confirmation flag
        #[arg(long)]
        yes: bool,
    },

    /// Database backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Show resolved configuration
    Config,

    /// Create the directory skeleton, database, and starter rule files
    Init,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Write a new timestamped backup
    Create,

    /// List existing backups, newest first
    List,

    /// Delete backups older than the retention window
    Cleanup {
        /// Retention in days (defaults to the configured value)
        #[arg(long)]
        days: Option<u64>,
    },

    /// Restore a named backup (snapshots the current database first)
    Restore {
        /// Backup file name, e.g. lab_backup_20250301_090000.db
        name: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { export } => run_export(&export).await,
            Commands::Assign { export, dry_run } => assign(export, dry_run).await,
            Commands::Watch => watch().await,
            Commands::Status => status().await,
            Commands::Complete { sample_no, item } => complete(&sample_no, &item).await,
            Commands::Reset { yes } => reset(yes).await,
            Commands::Backup { command } => backup(command).await,
            Commands::Config => show_config(),
            Commands::Init => init().await,
        }
    }
}

fn rule_store() -> Result<CsvRuleStore> {
    let cfg = config::config()?;
    Ok(CsvRuleStore::new(&cfg.rules, &cfg.roster))
}

fn full_pipeline() -> Result<IngestPipeline> {
    let cfg = config::config()?;
    Ok(IngestPipeline::new(rule_store()?, cfg.db_path())
        .with_publisher(Box::new(DigestWriter::new(&cfg.outbox)))
        .with_publisher(Box::new(SharedFolderSync::new(&cfg.shared))))
}

/// Run the full pipeline on one export file
async fn run_export(export: &Path) -> Result<()> {
    let pipeline = full_pipeline()?;
    let summary = pipeline
        .run_file(export, false)
        .await?
        .context("pipeline returned no summary for a forced run")?;

    print!("{}", summary.report());
    Ok(())
}

/// Assign without publishing; optionally without persisting
async fn assign(export: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let cfg = config::config()?;

    let text = if let Some(path) = export {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read export: {}", path.display()))?
    } else {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    };

    if dry_run {
        let rows = normalize_csv(&text).context("Failed to normalize export")?;
        let store = rule_store()?;
        let ledger = SqliteLedger::open(&cfg.db_path())?;
        let engine = AssignmentEngine::new(&store, &ledger, &ledger);
        let outcome = engine.assign(&rows)?;

        println!("{} (dry run, nothing persisted)", outcome.summary());
        for a in &outcome.assignments {
            println!("  {} / {} -> {} [{}]", a.sample_no, a.item, a.researcher, a.method.as_str());
        }
        return Ok(());
    }

    let pipeline = IngestPipeline::new(rule_store()?, cfg.db_path());
    let summary = pipeline.run_text(&text, "(manual)").await?;
    print!("{}", summary.report());
    Ok(())
}

/// Watch the inbox, processing each stable export once
async fn watch() -> Result<()> {
    let cfg = config::config()?;
    tokio::fs::create_dir_all(&cfg.inbox).await?;

    let pipeline = full_pipeline()?;
    let watcher = ExportWatcher::new(WatcherConfig {
        watch_path: cfg.inbox.clone(),
        stability_delay_secs: cfg.watcher.stability_delay_secs,
        extensions: cfg.watcher.extensions.clone(),
    });

    // Drain anything dropped while we were down, then watch.
    for event in watcher.scan_once().await? {
        match pipeline.run_file(&event.path, true).await {
            Ok(Some(summary)) => {
                info!(export = %event.path.display(), "Startup catch-up processed");
                print!("{}", summary.report());
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(export = %event.path.display(), error = %e, "Export processing failed");
            }
        }
    }

    let (mut events, _handle) = watcher.watch().await?;
    println!("Watching {} (ctrl-c to stop)", cfg.inbox.display());

    while let Some(event) = events.recv().await {
        match pipeline.run_file(&event.path, true).await {
            Ok(Some(summary)) => print!("{}", summary.report()),
            Ok(None) => {}
            Err(e) => {
                // One bad export must not take the watcher down.
                tracing::error!(export = %event.path.display(), error = %e, "Export processing failed");
            }
        }
    }

    Ok(())
}

/// Show today's loads
async fn status() -> Result<()> {
    let cfg = config::config()?;
    let ledger = SqliteLedger::open(&cfg.db_path())?;

    let today = ledger.today_assignments()?;
    if today.is_empty() {
        println!("No assignments today");
        return Ok(());
    }

    let loads = ledger.today_loads()?;
    let mut names: Vec<&String> = loads.keys().collect();
    names.sort();

    println!("{:<20} {:<10}", "RESEARCHER", "TODAY");
    println!("{}", "-".repeat(30));
    for name in names {
        println!("{:<20} {:<10}", name, loads[name]);
    }
    println!("{}", "-".repeat(30));
    println!("{:<20} {:<10}", "total", today.len());

    Ok(())
}

/// Attach a completion timestamp to one assignment
async fn complete(sample_no: &str, item: &str) -> Result<()> {
    let cfg = config::config()?;
    let mut ledger = SqliteLedger::open(&cfg.db_path())?;

    let key = SampleKey::new(sample_no, item);
    if ledger.mark_completed(&key)? {
        println!("Completed {}", key);
    } else {
        println!("Nothing to complete for {} (unknown or already completed)", key);
    }
    Ok(())
}

/// Clear the assignment ledger
async fn reset(yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("reset deletes every assignment; re-run with --yes to confirm");
    }

    let cfg = config::config()?;
    let mut ledger = SqliteLedger::open(&cfg.db_path())?;

    let loads = ledger.today_loads()?;
    if !loads.is_empty() {
        println!("Removing today's assignments:");
        let mut names: Vec<&String> = loads.keys().collect();
        names.sort();
        for name in names {
            println!("  {}: {}", name, loads[name]);
        }
    }

    let removed = ledger.reset_assignments()?;
    println!("Removed {} assignments", removed);
    Ok(())
}

/// Backup subcommands
async fn backup(command: BackupCommands) -> Result<()> {
    let cfg = config::config()?;
    let manager = BackupManager::new(cfg.db_path(), cfg.backups_dir());

    match command {
        BackupCommands::Create => {
            let path = manager.create()?;
            println!("Backup written: {}", path.display());
        }
        BackupCommands::List => {
            let backups = manager.list()?;
            if backups.is_empty() {
                println!("No backups found");
                return Ok(());
            }
            println!("{:<40} {:>12}", "BACKUP", "BYTES");
            println!("{}", "-".repeat(53));
            for b in backups {
                let name = b
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                println!("{:<40} {:>12}", name, b.size);
            }
        }
        BackupCommands::Cleanup { days } => {
            let days = days.unwrap_or(cfg.retention.backup_days);
            let removed = manager.cleanup(days)?;
            println!("Removed {} backups older than {} days", removed, days);
        }
        BackupCommands::Restore { name } => {
            let snapshot = manager.restore(&name)?;
            println!("Restored {} (pre-restore snapshot: {})", name, snapshot.display());
        }
    }
    Ok(())
}

/// Print the resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("home:    {}", cfg.home.display());
    println!("db:      {}", cfg.db_path().display());
    println!("rules:   {}", cfg.rules.display());
    println!("roster:  {}", cfg.roster.display());
    println!("inbox:   {}", cfg.inbox.display());
    println!("outbox:  {}", cfg.outbox.display());
    println!("shared:  {}", cfg.shared.display());
    println!("backups: {}", cfg.backups_dir().display());
    match &cfg.config_file {
        Some(path) => println!("config:  {}", path.display()),
        None => println!("config:  (defaults)"),
    }
    Ok(())
}

/// Create directories, the database schema, and starter rule files
async fn init() -> Result<()> {
    let cfg = config::config()?;

    for dir in [&cfg.inbox, &cfg.outbox, &cfg.shared] {
        tokio::fs::create_dir_all(dir).await?;
    }

    // Opening the ledger bootstraps the schema.
    SqliteLedger::open(&cfg.db_path())?;

    for (path, template) in [(&cfg.rules, RULES_TEMPLATE), (&cfg.roster, ROSTER_TEMPLATE)] {
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, template).await?;
        println!("Wrote template: {}", path.display());
    }

    println!("Initialized {}", cfg.home.display());
    Ok(())
}
