//! Canonical sample rows and their natural key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The natural key of a unit of work: one measurement item requested on one
/// physical sample. One sample may request several items; each is assigned
/// independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleKey {
    pub sample_no: String,
    pub item: String,
}

impl SampleKey {
    pub fn new(sample_no: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            sample_no: sample_no.into(),
            item: item.into(),
        }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sample_no, self.item)
    }
}

/// A normalized row from a portal export.
///
/// `sample_no` and `item` form the natural key; the remaining columns are
/// metadata carried through to the samples table and the published manifests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    /// Sample identifier as printed on the physical specimen
    pub sample_no: String,

    /// Requested measurement/analyte (e.g. "총질소")
    pub item: String,

    /// Collection site, if the export carried it
    pub site_name: Option<String>,

    /// Collection timestamp, verbatim from the export
    pub collected_at: Option<String>,

    /// Sample kind/category
    pub kind: Option<String>,

    /// Portal-side status column
    pub status: Option<String>,
}

impl SampleRow {
    /// Minimal constructor used throughout tests and the engine
    pub fn new(sample_no: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            sample_no: sample_no.into(),
            item: item.into(),
            ..Default::default()
        }
    }

    /// The row's natural key
    pub fn key(&self) -> SampleKey {
        SampleKey::new(self.sample_no.clone(), self.item.clone())
    }

    /// Upsert key for the samples table: "{sample_no}_{item}"
    pub fn uniq_key(&self) -> String {
        format!("{}_{}", self.sample_no, self.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_identity() {
        let a = SampleRow::new("S1", "총질소");
        let b = SampleRow::new("S1", "총질소");
        assert_eq!(a.key(), b.key());

        let c = SampleRow::new("S1", "총인");
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_uniq_key_format() {
        let row = SampleRow::new("S001", "부유물질");
        assert_eq!(row.uniq_key(), "S001_부유물질");
    }
}
