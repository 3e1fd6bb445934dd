//! Inbox watcher for portal export files.
//!
//! Watches a drop directory for new .csv exports and emits them once they
//! are stable (the portal download / network copy has finished growing).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory the portal exports are dropped into
    pub watch_path: PathBuf,

    /// How long a file's size must hold still before it is emitted (seconds)
    pub stability_delay_secs: u64,

    /// File extensions to accept
    pub extensions: Vec<String>,
}

impl WatcherConfig {
    pub fn new(watch_path: impl Into<PathBuf>) -> Self {
        Self {
            watch_path: watch_path.into(),
            stability_delay_secs: 5,
            extensions: vec!["csv".to_string()],
        }
    }

    /// Check that the watch path exists
    pub fn validate(&self) -> Result<(), WatcherError> {
        if !self.watch_path.exists() {
            return Err(WatcherError::DirectoryNotFound(self.watch_path.clone()));
        }
        Ok(())
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Event emitted when an export file is detected and stable
#[derive(Debug, Clone)]
pub struct ExportEvent {
    /// Path to the export file
    pub path: PathBuf,

    /// Content fingerprint (SHA-256, first 16 hex chars)
    pub fingerprint: String,

    /// File size in bytes
    pub size: u64,

    /// When the file was detected
    pub detected_at: DateTime<Utc>,
}

/// Export inbox watcher with stability checking
pub struct ExportWatcher {
    config: WatcherConfig,
}

impl ExportWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Scan the inbox once and return every matching file, without waiting
    /// for stability. Used at startup to drain files dropped while the
    /// watcher was down; the ingest log keeps re-delivery harmless.
    pub async fn scan_once(&self) -> Result<Vec<ExportEvent>> {
        self.config.validate()?;

        let mut events = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.watch_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !self.config.accepts(&path) {
                continue;
            }
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }
            match fingerprint_file(&path).await {
                Ok(fingerprint) => events.push(ExportEvent {
                    path,
                    fingerprint,
                    size: metadata.len(),
                    detected_at: Utc::now(),
                }),
                Err(e) => {
                    tracing::warn!("Failed to fingerprint {}: {}", path.display(), e);
                }
            }
        }

        // Oldest name first keeps replay order deterministic.
        events.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(events)
    }

    /// Watch the inbox and emit events for new stable files until the
    /// returned handle is stopped.
    pub async fn watch(&self) -> Result<(mpsc::Receiver<ExportEvent>, WatchHandle)> {
        self.config.validate()?;

        let (event_tx, event_rx) = mpsc::channel::<ExportEvent>(100);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let config = self.config.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = run_watcher(config, event_tx, &mut stop_rx).await {
                tracing::error!("Watcher error: {}", e);
            }
        });

        Ok((event_rx, WatchHandle { stop_tx, task }))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Internal watcher loop
async fn run_watcher(
    config: WatcherConfig,
    event_tx: mpsc::Sender<ExportEvent>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    // Files waiting to stabilize: path -> (size, last size change)
    let mut pending: HashMap<PathBuf, (u64, Instant)> = HashMap::new();

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_secs(2), tx)?;
    debouncer
        .watcher()
        .watch(&config.watch_path, RecursiveMode::NonRecursive)?;

    let stability_delay = Duration::from_secs(config.stability_delay_secs);

    tracing::info!("Watching {} for exports", config.watch_path.display());

    loop {
        if stop_rx.try_recv().is_ok() {
            tracing::info!("Watcher stopping");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                for event in events {
                    let path = event.path;
                    if !config.accepts(&path) {
                        continue;
                    }
                    if let Ok(metadata) = std::fs::metadata(&path) {
                        if metadata.is_file() {
                            pending.insert(path, (metadata.len(), Instant::now()));
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Expected; fall through to the stability check.
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Watcher channel disconnected");
                break;
            }
        }

        // Promote files whose size held still for the full delay; restart
        // the clock for anything still growing.
        let now = Instant::now();
        let mut stable = Vec::new();
        let mut still_growing = Vec::new();

        for (path, (last_size, last_seen)) in pending.iter() {
            if now.duration_since(*last_seen) < stability_delay {
                continue;
            }
            match std::fs::metadata(path) {
                Ok(metadata) if metadata.len() == *last_size && metadata.len() > 0 => {
                    stable.push((path.clone(), metadata.len()));
                }
                Ok(metadata) => {
                    still_growing.push((path.clone(), metadata.len()));
                }
                Err(_) => {
                    // Deleted out from under us; forget it.
                    still_growing.push((path.clone(), 0));
                }
            }
        }
        for (path, size) in still_growing {
            if size == 0 {
                pending.remove(&path);
            } else {
                pending.insert(path, (size, Instant::now()));
            }
        }

        for (path, size) in stable {
            pending.remove(&path);
            match fingerprint_file(&path).await {
                Ok(fingerprint) => {
                    tracing::info!(export = %path.display(), %fingerprint, "New export detected");
                    let _ = event_tx
                        .send(ExportEvent {
                            path,
                            fingerprint,
                            size,
                            detected_at: Utc::now(),
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!("Failed to fingerprint {}: {}", path.display(), e);
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

/// SHA-256 content fingerprint, first 16 hex chars.
pub async fn fingerprint_file(path: &Path) -> Result<String, std::io::Error> {
    let content = tokio::fs::read(path).await?;
    Ok(fingerprint_bytes(&content))
}

/// Fingerprint already-loaded export content.
pub fn fingerprint_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
