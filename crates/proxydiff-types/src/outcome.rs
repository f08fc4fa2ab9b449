//! Call-outcome comparison record.

use serde::{Deserialize, Serialize};

/// Result of comparing one call's outcome before and after the upgrade.
///
/// An outcome is the string rendering of either the call's return value or a
/// captured revert reason (`revert: ...`); a revert is a legitimate,
/// comparable outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    /// Outcome on the deployed logic.
    pub value_before: String,
    /// Outcome on the upgraded logic.
    pub value_after: String,
    /// Whether the normalized outcomes are equal.
    pub is_equal: bool,
}

impl OutcomeRecord {
    /// Whether this record reports a divergence.
    pub fn has_changed(&self) -> bool {
        !self.is_equal
    }
}
