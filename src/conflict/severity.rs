//! Conflict severity ranking.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How dangerous it is to merge two divergent versions.
///
/// Totally ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    /// Display-only drift
    Low,
    /// Someone joined or left the bill
    Medium,
    /// Payer or line items changed
    High,
    /// Money moved
    Critical,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        assert!(ConflictSeverity::Low < ConflictSeverity::Medium);
        assert!(ConflictSeverity::Medium < ConflictSeverity::High);
        assert!(ConflictSeverity::High < ConflictSeverity::Critical);
        assert_eq!(
            [ConflictSeverity::Medium, ConflictSeverity::Critical, ConflictSeverity::Low]
                .into_iter()
                .max(),
            Some(ConflictSeverity::Critical)
        );
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ConflictSeverity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
