//! Per-researcher notification digests.
//!
//! Groups a batch by researcher and renders one email-ready HTML file per
//! researcher into the outbox directory. Actual mail transport is a
//! collaborator concern; the digest file is the boundary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, info};

use crate::domain::{Assignment, Researcher};

use super::Publisher;

/// Writes notification digests into an outbox directory.
pub struct DigestWriter {
    outbox: PathBuf,
}

impl DigestWriter {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }

    /// Render the digest body for one researcher's task list.
    fn render(to: &str, rows: &[&Assignment]) -> String {
        let mut items = String::new();
        for a in rows {
            items.push_str(&format!("  <li>{} - {}</li>\n", a.sample_no, a.item));
        }
        format!(
            "<!-- To: {to} -->\n<!-- Subject: [배정] 금일 할당 건 -->\n<h3>{count}건</h3>\n<ul>\n{items}</ul>\n",
            to = to,
            count = rows.len(),
            items = items,
        )
    }
}

#[async_trait]
impl Publisher for DigestWriter {
    fn name(&self) -> &str {
        "digest"
    }

    async fn publish(&self, assignments: &[Assignment], roster: &[Researcher]) -> Result<()> {
        if assignments.is_empty() {
            debug!("No new assignments, skipping digests");
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.outbox)
            .await
            .with_context(|| format!("Failed to create outbox: {}", self.outbox.display()))?;

        let mut by_researcher: BTreeMap<&str, Vec<&Assignment>> = BTreeMap::new();
        for a in assignments {
            by_researcher.entry(a.researcher.as_str()).or_default().push(a);
        }

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        for (name, rows) in by_researcher {
            // No address on the roster means nobody to notify.
            let Some(email) = roster
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.email.as_str())
                .filter(|e| !e.is_empty())
            else {
                debug!(researcher = name, "No email on roster, skipping digest");
                continue;
            };

            let body = Self::render(email, &rows);
            let path = self.outbox.join(format!("digest_{}_{}.html", stamp, name));
            tokio::fs::write(&path, body)
                .await
                .with_context(|| format!("Failed to write digest: {}", path.display()))?;

            info!(researcher = name, count = rows.len(), digest = %path.display(), "Digest written");
        }

        Ok(())
    }
}
