//! Replay status code taxonomy.
//!
//! The numeric codes are a stable external contract consumed by downstream
//! reports; they must never be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one replay testing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayStatus {
    /// Code 0: outcomes equal, session passed.
    Passed,
    /// Code 1: outcomes differ, session failed.
    Failed,
    /// Code 2: non-revert execution error on the deployed logic.
    ErrorOnDeployed,
    /// Code 3: non-revert execution error on the upgraded logic.
    ErrorOnUpgraded,
    /// Code 4: a capture (outcome or layout) is missing on either side.
    MissingOutcome,
    /// Code 10: never executed (uncompilable mutant).
    NotExecuted,
    /// Any other code reported by a session.
    Unknown(i32),
}

impl ReplayStatus {
    /// The stable numeric code.
    pub fn code(&self) -> i32 {
        match self {
            ReplayStatus::Passed => 0,
            ReplayStatus::Failed => 1,
            ReplayStatus::ErrorOnDeployed => 2,
            ReplayStatus::ErrorOnUpgraded => 3,
            ReplayStatus::MissingOutcome => 4,
            ReplayStatus::NotExecuted => 10,
            ReplayStatus::Unknown(code) => *code,
        }
    }

    /// Map a recorded code back to a status. `None` means the session never
    /// ran, which reads the same as an uncompilable mutant.
    pub fn from_code(code: Option<i32>) -> ReplayStatus {
        match code {
            Some(0) => ReplayStatus::Passed,
            Some(1) => ReplayStatus::Failed,
            Some(2) => ReplayStatus::ErrorOnDeployed,
            Some(3) => ReplayStatus::ErrorOnUpgraded,
            Some(4) => ReplayStatus::MissingOutcome,
            Some(10) | None => ReplayStatus::NotExecuted,
            Some(other) => ReplayStatus::Unknown(other),
        }
    }

    /// Stable textual description of the code.
    pub fn description(&self) -> &'static str {
        match self {
            ReplayStatus::Passed => "success-passed",
            ReplayStatus::Failed => "success-failed",
            ReplayStatus::ErrorOnDeployed => "error-timeout-on-deployed",
            ReplayStatus::ErrorOnUpgraded => "error-timeout-on-upgraded",
            ReplayStatus::MissingOutcome => "error-missing-outcome",
            ReplayStatus::NotExecuted => "not-executed",
            ReplayStatus::Unknown(_) => "error-unknown",
        }
    }

    /// Whether the session ran to a verdict (passed or failed).
    pub fn is_verdict(&self) -> bool {
        matches!(self, ReplayStatus::Passed | ReplayStatus::Failed)
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Describe what a replay detected, for report rows.
pub fn changes_description(
    has_outcome_changed: bool,
    has_storage_changed: bool,
    status: ReplayStatus,
) -> &'static str {
    if !status.is_verdict() {
        "unknown"
    } else if has_outcome_changed && has_storage_changed {
        "outcome-storage-changed"
    } else if has_outcome_changed {
        "outcome-changed"
    } else if has_storage_changed {
        "storage-changed"
    } else {
        "none-changed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ReplayStatus::Passed.code(), 0);
        assert_eq!(ReplayStatus::Failed.code(), 1);
        assert_eq!(ReplayStatus::ErrorOnDeployed.code(), 2);
        assert_eq!(ReplayStatus::ErrorOnUpgraded.code(), 3);
        assert_eq!(ReplayStatus::MissingOutcome.code(), 4);
        assert_eq!(ReplayStatus::NotExecuted.code(), 10);
    }

    #[test]
    fn test_from_code_round_trip() {
        for code in [0, 1, 2, 3, 4, 10] {
            assert_eq!(ReplayStatus::from_code(Some(code)).code(), code);
        }
        assert_eq!(ReplayStatus::from_code(None), ReplayStatus::NotExecuted);
        assert_eq!(
            ReplayStatus::from_code(Some(77)).description(),
            "error-unknown"
        );
    }

    #[test]
    fn test_changes_description() {
        assert_eq!(
            changes_description(true, true, ReplayStatus::Failed),
            "outcome-storage-changed"
        );
        assert_eq!(
            changes_description(true, false, ReplayStatus::Failed),
            "outcome-changed"
        );
        assert_eq!(
            changes_description(false, true, ReplayStatus::Passed),
            "storage-changed"
        );
        assert_eq!(
            changes_description(false, false, ReplayStatus::Passed),
            "none-changed"
        );
        assert_eq!(
            changes_description(true, true, ReplayStatus::ErrorOnDeployed),
            "unknown"
        );
    }
}
