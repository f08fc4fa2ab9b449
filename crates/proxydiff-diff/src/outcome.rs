//! Call outcome comparison.

use proxydiff_types::outcome::OutcomeRecord;

/// Compare the call outcomes observed on the deployed and upgraded sides.
///
/// Outcomes are opaque strings: an ABI-encoded return value, a decoded
/// representation, or a `revert: <reason>` marker. A revert on both sides
/// with the same reason is an equal outcome; a divergence in reason is not.
pub fn compare_outcomes(before: &str, after: &str) -> OutcomeRecord {
    let is_equal = before.trim() == after.trim();
    OutcomeRecord {
        value_before: before.to_string(),
        value_after: after.to_string(),
        is_equal,
    }
}
