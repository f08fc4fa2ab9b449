//! Source-level mutants and their testing state.
//!
//! Mutant metadata comes from the mutation tool's `mutations.json` (keyed by
//! contract name); the replay-testing fields are written exclusively by the
//! mutation orchestrator during a testing pass and persist until the next
//! pass overwrites them.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::diff::StorageDiffEntry;
use crate::outcome::OutcomeRecord;

/// Lifecycle status of one mutant for one replayed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutantStatus {
    /// No transaction detected the mutation.
    #[serde(rename = "live")]
    Live,
    /// The call outcome changed.
    #[serde(rename = "killed(o)")]
    KilledOutcome,
    /// The persistent storage changed.
    #[serde(rename = "killed(s)")]
    KilledStorage,
    /// Both outcome and storage changed.
    #[serde(rename = "killed(os)")]
    KilledOutcomeStorage,
    /// The mutated source failed to compile (stillborn).
    #[serde(rename = "uncompilable")]
    Uncompilable,
    /// The replay session errored.
    #[serde(rename = "error")]
    Error,
    /// Never tested.
    #[serde(rename = "not-tested")]
    NotTested,
}

impl MutantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutantStatus::Live => "live",
            MutantStatus::KilledOutcome => "killed(o)",
            MutantStatus::KilledStorage => "killed(s)",
            MutantStatus::KilledOutcomeStorage => "killed(os)",
            MutantStatus::Uncompilable => "uncompilable",
            MutantStatus::Error => "error",
            MutantStatus::NotTested => "not-tested",
        }
    }
}

/// One mutant of a contract and its replay-testing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutant {
    /// Mutant identifier (hash assigned by the mutation tool).
    pub id: String,
    /// Contract the mutant belongs to.
    #[serde(default)]
    pub contract: String,
    /// Mutated source file.
    #[serde(default)]
    pub file: String,
    /// Mutated function, when the tool records one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Mutation operator.
    #[serde(default)]
    pub operator: String,
    /// First mutated line.
    #[serde(default)]
    pub start_line: u64,
    /// Last mutated line.
    #[serde(default)]
    pub end_line: u64,
    /// Original source snippet.
    #[serde(default)]
    pub original: String,
    /// Replacement snippet.
    #[serde(default, alias = "replace")]
    pub replacement: String,

    // Replay-testing fields, reset per (mutant, transaction) pair.
    #[serde(default = "default_status")]
    pub status: MutantStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_status_code: Option<i32>,
    #[serde(default)]
    pub has_outcome_changed: bool,
    #[serde(default)]
    pub has_storage_changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_changes: Option<OutcomeRecord>,
    #[serde(default)]
    pub storage_changes: Vec<StorageDiffEntry>,
    /// Replay testing time for the last transaction, in seconds.
    #[serde(default)]
    pub testing_time: f64,
}

fn default_status() -> MutantStatus {
    MutantStatus::NotTested
}

impl Mutant {
    /// Reset the per-replay fields before testing against a transaction.
    pub fn reset_for_replay(&mut self) {
        self.status = MutantStatus::Live;
        self.replay_status_code = None;
        self.has_outcome_changed = false;
        self.has_storage_changed = false;
        self.outcome_changes = None;
        self.storage_changes.clear();
        self.testing_time = 0.0;
    }
}

/// Contents of `mutations.json`: mutants grouped by contract name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationsFile {
    pub contracts: BTreeMap<String, Vec<Mutant>>,
}

impl MutationsFile {
    /// Load the mutation metadata file.
    pub fn load(path: impl AsRef<Path>) -> Result<MutationsFile> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read mutations file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed mutations file {}", path.display()))
    }

    /// Find a mutant of a contract by id.
    pub fn find(&self, contract: &str, id: &str) -> Option<&Mutant> {
        self.contracts
            .get(contract)
            .and_then(|mutants| mutants.iter().find(|m| m.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(MutantStatus::KilledOutcome.as_str(), "killed(o)");
        assert_eq!(MutantStatus::KilledOutcomeStorage.as_str(), "killed(os)");
        let json = serde_json::to_string(&MutantStatus::KilledStorage).unwrap();
        assert_eq!(json, "\"killed(s)\"");
    }

    #[test]
    fn test_mutations_file_parsing() {
        let json = r#"{
            "Token": [
                {
                    "id": "m1a2b3",
                    "file": "contracts/Token.sol",
                    "operator": "BOR",
                    "startLine": 41,
                    "endLine": 41,
                    "original": "a + b",
                    "replace": "a - b",
                    "status": "live"
                }
            ]
        }"#;
        let mutations: MutationsFile = serde_json::from_str(json).expect("parse");
        let mutant = mutations.find("Token", "m1a2b3").expect("find");
        assert_eq!(mutant.replacement, "a - b");
        assert_eq!(mutant.status, MutantStatus::Live);
        assert!(mutations.find("Token", "nope").is_none());
    }

    #[test]
    fn test_reset_for_replay() {
        let mut mutant = Mutant {
            id: "x".into(),
            contract: "Token".into(),
            file: "contracts/Token.sol".into(),
            function_name: None,
            operator: "AOR".into(),
            start_line: 1,
            end_line: 1,
            original: "+".into(),
            replacement: "-".into(),
            status: MutantStatus::KilledOutcome,
            replay_status_code: Some(1),
            has_outcome_changed: true,
            has_storage_changed: true,
            outcome_changes: None,
            storage_changes: Vec::new(),
            testing_time: 4.2,
        };
        mutant.reset_for_replay();
        assert_eq!(mutant.status, MutantStatus::Live);
        assert_eq!(mutant.replay_status_code, None);
        assert!(!mutant.has_outcome_changed);
        assert_eq!(mutant.testing_time, 0.0);
    }
}
