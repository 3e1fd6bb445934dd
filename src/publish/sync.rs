//! Shared-folder publisher.
//!
//! Maintains one task folder per researcher on the shared drive and drops a
//! dated CSV manifest plus a plain-text summary for each batch. An advisory
//! file lock on the shared root keeps overlapping runs from interleaving
//! their writes; assignment correctness never depends on it.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use fs2::FileExt;
use tracing::{debug, info};

use crate::csv;
use crate::domain::{Assignment, Researcher};

use super::Publisher;

const LOCK_FILE: &str = ".labflow.lock";
const SUBFOLDERS: &[&str] = &["today", "pending", "completed", "reports"];

/// Publishes per-researcher task folders and manifests.
pub struct SharedFolderSync {
    shared_root: PathBuf,
}

impl SharedFolderSync {
    pub fn new(shared_root: impl Into<PathBuf>) -> Self {
        Self {
            shared_root: shared_root.into(),
        }
    }

    /// Take the advisory lock; blocks until any overlapping publish is done.
    fn lock(&self) -> Result<std::fs::File> {
        let path = self.shared_root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock shared folder: {}", path.display()))?;
        Ok(file)
    }

    /// Ensure the folder skeleton for one researcher exists.
    async fn ensure_folders(&self, name: &str) -> Result<PathBuf> {
        let root = self.shared_root.join(name);
        for sub in SUBFOLDERS {
            tokio::fs::create_dir_all(root.join(sub))
                .await
                .with_context(|| format!("Failed to create folder for {}", name))?;
        }

        let readme = root.join("README.md");
        if !tokio::fs::try_exists(&readme).await.unwrap_or(false) {
            tokio::fs::write(&readme, readme_body(name)).await?;
        }
        Ok(root)
    }

    fn manifest_rows(rows: &[&Assignment]) -> (Vec<String>, Vec<Vec<String>>) {
        let header = ["sample_no", "item", "researcher", "assigned_at", "method"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let body = rows
            .iter()
            .map(|a| {
                vec![
                    a.sample_no.clone(),
                    a.item.clone(),
                    a.researcher.clone(),
                    a.assigned_at_str(),
                    a.method.as_str().to_string(),
                ]
            })
            .collect();
        (header, body)
    }

    fn summary_body(name: &str, rows: &[&Assignment]) -> String {
        let mut per_item: BTreeMap<&str, usize> = BTreeMap::new();
        for a in rows {
            *per_item.entry(a.item.as_str()).or_default() += 1;
        }

        let mut out = String::new();
        out.push_str(&format!("=== {} 담당 작업 요약 ===\n", name));
        out.push_str(&format!("배정일: {}\n", Local::now().format("%Y-%m-%d")));
        out.push_str(&format!("총 작업 수: {}건\n\n", rows.len()));
        out.push_str("측정항목별 작업 수:\n");
        for (item, count) in &per_item {
            out.push_str(&format!("  - {}: {}건\n", item, count));
        }
        out.push_str("\n상세 작업 목록:\n");
        for a in rows {
            out.push_str(&format!("  - {}: {}\n", a.sample_no, a.item));
        }
        out
    }
}

#[async_trait]
impl Publisher for SharedFolderSync {
    fn name(&self) -> &str {
        "shared-folder"
    }

    async fn publish(&self, assignments: &[Assignment], roster: &[Researcher]) -> Result<()> {
        tokio::fs::create_dir_all(&self.shared_root)
            .await
            .with_context(|| {
                format!("Failed to create shared root: {}", self.shared_root.display())
            })?;

        let lock = self.lock()?;

        // Folder skeletons exist for the whole roster, not only for
        // researchers in this batch.
        for r in roster {
            self.ensure_folders(&r.name).await?;
        }

        if assignments.is_empty() {
            debug!("No new assignments, folders refreshed only");
            let _ = lock.unlock();
            return Ok(());
        }

        let mut by_researcher: BTreeMap<&str, Vec<&Assignment>> = BTreeMap::new();
        for a in assignments {
            by_researcher.entry(a.researcher.as_str()).or_default().push(a);
        }

        let date = Local::now().format("%Y%m%d").to_string();
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        for (name, rows) in by_researcher {
            let root = self.ensure_folders(name).await?;
            let day_dir = root.join("today").join(&date);
            tokio::fs::create_dir_all(&day_dir).await?;

            let (header, body) = Self::manifest_rows(&rows);
            let manifest = day_dir.join(format!("assignments_{}.csv", stamp));
            tokio::fs::write(&manifest, csv::to_csv_string(&header, &body)).await?;

            let summary = day_dir.join(format!("summary_{}.txt", stamp));
            tokio::fs::write(&summary, Self::summary_body(name, &rows)).await?;

            info!(researcher = name, count = rows.len(), manifest = %manifest.display(), "Task folder updated");
        }

        let _ = lock.unlock();
        Ok(())
    }
}

fn readme_body(name: &str) -> String {
    format!(
        "# {} 담당 작업 폴더\n\n\
         ## 폴더 구조\n\
         - **today/**: 오늘 배정된 작업\n\
         - **pending/**: 대기 중인 작업\n\
         - **completed/**: 완료된 작업\n\
         - **reports/**: 분석 보고서\n\n\
         ## 사용 방법\n\
         1. `today/` 폴더에서 오늘 배정된 작업 확인\n\
         2. 분석 작업 수행 후 보고서를 `completed/`에 저장\n\
         3. 완료 처리는 관리자가 `labflow complete`로 반영\n",
        name
    )
}
