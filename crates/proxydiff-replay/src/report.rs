//! Run reports.
//!
//! One report row per replayed transaction, keyed by transaction hash,
//! persisted as pretty-printed JSON under the configured reports directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use proxydiff_types::diff::StorageDiffEntry;
use proxydiff_types::outcome::OutcomeRecord;
use proxydiff_types::status::ReplayStatus;
use proxydiff_types::transaction::TransactionRecord;

use crate::session::SessionVerdict;

/// One report row: what replaying one transaction detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRecord {
    pub function_name: String,
    /// Decoded arguments carried over from the recorded transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_input: Option<serde_json::Value>,
    /// Stable numeric status code.
    pub status: i32,
    pub status_description: String,
    /// What changed (`"outcome-changed"`, `"storage-changed"`, ...).
    pub changes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_changes: Option<OutcomeRecord>,
    pub storage_changes: Vec<StorageDiffEntry>,
    /// Wall-clock session duration rendered as `"<h>h.<m>m.<s>s"`.
    pub testing_time: String,
}

impl ReplayRecord {
    pub fn from_verdict(
        tx: &TransactionRecord,
        verdict: &SessionVerdict,
        elapsed: Duration,
    ) -> ReplayRecord {
        ReplayRecord {
            function_name: tx.function_name.clone(),
            decoded_input: tx.decoded_input.clone(),
            status: verdict.status.code(),
            status_description: verdict.status.description().to_string(),
            changes: verdict.changes().to_string(),
            outcome_changes: verdict.outcome.clone(),
            storage_changes: verdict.storage_diff.clone(),
            testing_time: format_duration(elapsed),
        }
    }
}

/// Aggregated outcome counts over one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

/// Report for one full run, one row per transaction hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunReport {
    rows: BTreeMap<String, ReplayRecord>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, hash: &str, row: ReplayRecord) {
        self.rows.insert(hash.to_string(), row);
    }

    pub fn get(&self, hash: &str) -> Option<&ReplayRecord> {
        self.rows.get(hash)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.rows.len(),
            ..Default::default()
        };
        for row in self.rows.values() {
            match ReplayStatus::from_code(Some(row.status)) {
                ReplayStatus::Passed => summary.passed += 1,
                ReplayStatus::Failed => summary.failed += 1,
                _ => summary.errored += 1,
            }
        }
        summary
    }

    /// Persist the report as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.rows)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!(path = %path.display(), rows = self.rows.len(), "report saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<RunReport> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading report {}", path.display()))?;
        let rows = serde_json::from_str(&raw)
            .with_context(|| format!("parsing report {}", path.display()))?;
        Ok(RunReport { rows })
    }
}

/// Render a duration as `"<h>h.<m>m.<s>s"`.
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours}h.{minutes}m.{seconds}s")
}
