//! Spreadsheet normalization.
//!
//! Portal exports arrive with Korean column headers; older exports and test
//! fixtures use the canonical English names directly. Both map onto
//! [`SampleRow`]. Row-level validity (blank item, blank sample number) is
//! deliberately left to the engine, which rejects per row without aborting
//! the batch; the normalizer only fails when the export as a whole is
//! unusable.

use thiserror::Error;

use crate::csv::Table;
use crate::domain::SampleRow;

/// Header synonyms, portal name → canonical name. Canonical names also map
/// to themselves.
const COLUMN_SYNONYMS: &[(&str, &str)] = &[
    ("시료번호", "sample_no"),
    ("현장명", "site_name"),
    ("채취일시", "collected_at"),
    ("종류", "kind"),
    ("측정항목", "item"),
    ("상태", "status"),
];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("export is empty")]
    EmptyExport,

    #[error("export is missing required column '{0}' (or a known synonym)")]
    MissingColumn(&'static str),
}

/// Resolve a canonical column to whichever header the export actually used.
fn resolve<'t>(table: &'t Table, canonical: &str) -> Option<String> {
    if table.has_column(canonical) {
        return Some(canonical.to_string());
    }
    COLUMN_SYNONYMS
        .iter()
        .find(|(portal, canon)| *canon == canonical && table.has_column(portal))
        .map(|(portal, _)| portal.to_string())
}

/// Normalize CSV export text into canonical rows.
///
/// Fails only for structurally unusable exports: no rows at all, or no
/// `sample_no`/`item` column under any known header.
pub fn normalize_csv(text: &str) -> Result<Vec<SampleRow>, NormalizeError> {
    let table = Table::from_text(text).ok_or(NormalizeError::EmptyExport)?;

    let sample_no_col =
        resolve(&table, "sample_no").ok_or(NormalizeError::MissingColumn("sample_no"))?;
    let item_col = resolve(&table, "item").ok_or(NormalizeError::MissingColumn("item"))?;
    let site_col = resolve(&table, "site_name");
    let collected_col = resolve(&table, "collected_at");
    let kind_col = resolve(&table, "kind");
    let status_col = resolve(&table, "status");

    let optional = |row: &[String], col: &Option<String>| -> Option<String> {
        col.as_deref()
            .and_then(|c| table.get(row, c))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let rows = table
        .rows
        .iter()
        .map(|row| SampleRow {
            sample_no: table.get(row, &sample_no_col).unwrap_or("").to_string(),
            item: table.get(row, &item_col).unwrap_or("").to_string(),
            site_name: optional(row, &site_col),
            collected_at: optional(row, &collected_col),
            kind: optional(row, &kind_col),
            status: optional(row, &status_col),
        })
        .collect();

    Ok(rows)
}
