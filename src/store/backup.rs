//! Database snapshots and retention housekeeping.
//!
//! Backups are plain timestamped copies of the SQLite file. Restore always
//! snapshots the current database first, then stages the incoming copy and
//! renames it into place.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use glob::Pattern;
use thiserror::Error;
use tracing::info;

/// Filename shape for backups; the pattern drives listing and cleanup.
const BACKUP_GLOB: &str = "lab_backup_*.db";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("database file not found: {0}")]
    MissingDatabase(PathBuf),

    #[error("backup file not found: {0}")]
    MissingBackup(PathBuf),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One entry from the backups directory.
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Manages the backups directory next to the ledger database.
pub struct BackupManager {
    db_path: PathBuf,
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    fn io_err(path: &Path, source: std::io::Error) -> BackupError {
        BackupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Copy the database into the backups directory under a timestamped name.
    pub fn create(&self) -> Result<PathBuf, BackupError> {
        if !self.db_path.exists() {
            return Err(BackupError::MissingDatabase(self.db_path.clone()));
        }
        std::fs::create_dir_all(&self.backup_dir)
            .map_err(|e| Self::io_err(&self.backup_dir, e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut target = self.backup_dir.join(format!("lab_backup_{}.db", stamp));
        // Two snapshots inside one second must not clobber each other.
        let mut n = 1;
        while target.exists() {
            target = self
                .backup_dir
                .join(format!("lab_backup_{}_{}.db", stamp, n));
            n += 1;
        }
        std::fs::copy(&self.db_path, &target).map_err(|e| Self::io_err(&target, e))?;

        info!(backup = %target.display(), "Database backup written");
        Ok(target)
    }

    /// All backups, newest first.
    pub fn list(&self) -> Result<Vec<BackupInfo>, BackupError> {
        let mut backups = Vec::new();
        if !self.backup_dir.exists() {
            return Ok(backups);
        }

        let Ok(pattern) = Pattern::new(BACKUP_GLOB) else {
            return Ok(backups);
        };
        let entries = std::fs::read_dir(&self.backup_dir)
            .map_err(|e| Self::io_err(&self.backup_dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| Self::io_err(&self.backup_dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !pattern.matches(name) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| Self::io_err(&entry.path(), e))?;
            backups.push(BackupInfo {
                path: entry.path(),
                size: meta.len(),
                modified: meta.modified().map_err(|e| Self::io_err(&entry.path(), e))?,
            });
        }

        backups.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(backups)
    }

    /// Delete backups older than `retention_days`. Returns how many were
    /// removed.
    pub fn cleanup(&self, retention_days: u64) -> Result<usize, BackupError> {
        let cutoff = SystemTime::now() - Duration::from_secs(retention_days * 86_400);
        let mut removed = 0;
        for backup in self.list()? {
            if backup.modified < cutoff {
                std::fs::remove_file(&backup.path)
                    .map_err(|e| Self::io_err(&backup.path, e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Old backups removed");
        }
        Ok(removed)
    }

    /// Replace the database with a named backup. The current database is
    /// snapshotted first; the incoming copy is staged in the database
    /// directory and renamed into place.
    pub fn restore(&self, backup_name: &str) -> Result<PathBuf, BackupError> {
        let source = self.backup_dir.join(backup_name);
        if !source.exists() {
            return Err(BackupError::MissingBackup(source));
        }

        let pre_restore = self.create()?;

        let db_dir = self.db_path.parent().unwrap_or(Path::new("."));
        let staged = tempfile::NamedTempFile::new_in(db_dir)
            .map_err(|e| Self::io_err(db_dir, e))?;
        std::fs::copy(&source, staged.path()).map_err(|e| Self::io_err(&source, e))?;
        staged
            .persist(&self.db_path)
            .map_err(|e| Self::io_err(&self.db_path, e.error))?;

        info!(from = %source.display(), "Database restored");
        Ok(pre_restore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> BackupManager {
        let db = dir.path().join("lab.db");
        std::fs::write(&db, b"dbdata").unwrap();
        BackupManager::new(db, dir.path().join("backups"))
    }

    #[test]
    fn test_create_and_list() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let path = mgr.create().unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("lab_backup_"));

        let listed = mgr.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 6);
    }

    #[test]
    fn test_missing_database() {
        let dir = TempDir::new().unwrap();
        let mgr = BackupManager::new(dir.path().join("absent.db"), dir.path().join("backups"));
        assert!(matches!(mgr.create(), Err(BackupError::MissingDatabase(_))));
    }

    #[test]
    fn test_cleanup_removes_only_old_backups() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let old = mgr.create().unwrap();
        // A second backup needs a distinct name; write it directly.
        let fresh = dir.path().join("backups").join("lab_backup_99990101_000000.db");
        std::fs::write(&fresh, b"dbdata").unwrap();

        // Backdate the first backup past the retention window.
        let forty_days_ago = FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(40 * 86_400),
        );
        set_file_mtime(&old, forty_days_ago).unwrap();

        let removed = mgr.cleanup(30).unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_restore_snapshots_current_first() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("lab.db");
        std::fs::write(&db, b"current").unwrap();
        let mgr = BackupManager::new(&db, dir.path().join("backups"));

        let backup = mgr.create().unwrap();
        std::fs::write(&db, b"newer-state").unwrap();

        let pre = mgr
            .restore(backup.file_name().unwrap().to_str().unwrap())
            .unwrap();
        assert_eq!(std::fs::read(&db).unwrap(), b"current");
        assert_eq!(std::fs::read(&pre).unwrap(), b"newer-state");
    }
}
