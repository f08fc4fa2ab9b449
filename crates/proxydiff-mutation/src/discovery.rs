//! Mutant source discovery.
//!
//! A mutation tool drops one complete mutated source per mutant into the
//! mutants directory, named `<Contract>-<id>.sol`. Discovery pairs those
//! files with the metadata in `mutations.json`; a source file without
//! metadata is skipped with a warning, never an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// One discovered mutant source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutantSource {
    pub contract: String,
    pub id: String,
    pub path: PathBuf,
}

/// Parse a `<Contract>-<id>.sol` file name. The id never contains `-`, so
/// the split happens at the last dash.
pub fn parse_mutant_file_name(name: &str) -> Option<(String, String)> {
    let stem = name.strip_suffix(".sol")?;
    let (contract, id) = stem.rsplit_once('-')?;
    if contract.is_empty() || id.is_empty() {
        return None;
    }
    Some((contract.to_string(), id.to_string()))
}

/// List the mutant sources under `dir`, sorted by contract then id.
pub fn discover_mutants(dir: &Path) -> Result<Vec<MutantSource>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("could not read mutants directory {}", dir.display()))?;

    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match parse_mutant_file_name(&name) {
            Some((contract, id)) => sources.push(MutantSource {
                contract,
                id,
                path: entry.path(),
            }),
            None => warn!(file = %name, "ignoring file that does not look like a mutant source"),
        }
    }
    sources.sort_by(|a, b| (&a.contract, &a.id).cmp(&(&b.contract, &b.id)));
    Ok(sources)
}
