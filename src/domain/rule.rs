//! Routing rules and the researcher roster.

use serde::{Deserialize, Serialize};

/// A priority-ordered routing preference: rows whose `item` contains one of
/// the pattern's alternatives go to `preferred`.
///
/// Matching is unanchored, case-sensitive substring containment: a short
/// pattern like "질소" deliberately routes an entire analyte family. This is
/// the documented behavior of the rule table, not exact matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Lower number = consulted first. Ties keep the rule file's order.
    pub priority: i64,

    /// "|"-delimited alternative substrings. An empty pattern never matches.
    pub item_pattern: String,

    /// Researcher name this rule routes to. Honored only while that
    /// researcher is on the active roster.
    pub preferred: String,
}

impl Rule {
    /// Non-blank alternatives, trimmed of surrounding whitespace.
    ///
    /// Blank alternatives are dropped: `contains("")` is vacuously true and
    /// would turn "a||b" into a match-everything rule.
    pub fn alternatives(&self) -> impl Iterator<Item = &str> {
        self.item_pattern
            .split('|')
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
    }

    /// True if any alternative is contained in `item`.
    pub fn matches(&self, item: &str) -> bool {
        self.alternatives().any(|alt| item.contains(alt))
    }
}

/// A member of the lab roster. Only active researchers participate in
/// assignment; the roster is the authoritative name-space for rule targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Researcher {
    /// Unique display name (also the assignment table's researcher column)
    pub name: String,

    /// Notification address, consumed by the digest publisher
    pub email: String,

    /// Inactive researchers are invisible to the engine
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> Rule {
        Rule {
            priority: 1,
            item_pattern: pattern.to_string(),
            preferred: "김".to_string(),
        }
    }

    #[test]
    fn test_substring_containment_not_equality() {
        assert!(rule("질소").matches("총질소"));
        assert!(rule("질소").matches("암모니아성질소"));
        assert!(!rule("총질소").matches("질소"));
    }

    #[test]
    fn test_alternatives_split_and_trim() {
        let r = rule("총질소 | TN");
        assert_eq!(r.alternatives().collect::<Vec<_>>(), vec!["총질소", "TN"]);
        assert!(r.matches("TN 측정"));
        assert!(r.matches("총질소"));
        assert!(!r.matches("tn"));
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        assert!(!rule("").matches("총질소"));
        assert!(!rule("   ").matches("총질소"));
    }

    #[test]
    fn test_blank_alternatives_are_skipped() {
        let r = rule("a||b");
        assert_eq!(r.alternatives().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!r.matches("c"));
    }
}
