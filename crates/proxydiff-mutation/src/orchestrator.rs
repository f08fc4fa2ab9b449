//! Mutation testing orchestration.
//!
//! For every discovered mutant: apply it over the upgraded logic source,
//! compile, replay the recorded transactions, classify, restore. The
//! pristine source is restored no matter how the attempt ends.
//!
//! Every transaction is replayed and reported per mutant; the first one
//! that observes a divergence decides the kill classification. Outcome and
//! storage divergences kill independently: a storage-only divergence kills
//! the mutant even when the replay session itself passes.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use proxydiff_layout::StateDiffRecord;
use proxydiff_replay::{ChainClient, ReplayRecord, ReplaySession, RunReport};
use proxydiff_types::config::ProxydiffConfig;
use proxydiff_types::layout::LayoutDeclaration;
use proxydiff_types::mutant::{Mutant, MutantStatus, MutationsFile};
use proxydiff_types::status::ReplayStatus;
use proxydiff_types::transaction::TransactionRecord;

use crate::compiler::{CompileError, Compiler};
use crate::discovery::discover_mutants;
use crate::workspace::AppliedMutant;

/// Everything one mutation testing pass produced: the tested mutants in
/// discovery order plus one report row per (mutant, transaction) replay,
/// keyed `<Contract>-<id>/<tx hash>`.
#[derive(Debug, Clone, Default)]
pub struct MutationRun {
    pub mutants: Vec<Mutant>,
    pub report: RunReport,
}

/// Aggregate counts over one mutation testing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSummary {
    pub total: usize,
    pub live: usize,
    pub killed: usize,
    pub uncompilable: usize,
    pub errored: usize,
}

/// Count statuses over a set of tested mutants.
pub fn summarize(mutants: &[Mutant]) -> MutationSummary {
    let mut summary = MutationSummary {
        total: mutants.len(),
        ..Default::default()
    };
    for mutant in mutants {
        match mutant.status {
            MutantStatus::Live => summary.live += 1,
            MutantStatus::KilledOutcome
            | MutantStatus::KilledStorage
            | MutantStatus::KilledOutcomeStorage => summary.killed += 1,
            MutantStatus::Uncompilable => summary.uncompilable += 1,
            MutantStatus::Error | MutantStatus::NotTested => summary.errored += 1,
        }
    }
    summary
}

/// Persist tested mutants back to a mutations file, grouped by contract.
pub fn save_results(path: &Path, mutants: &[Mutant]) -> Result<()> {
    let mut grouped: BTreeMap<String, Vec<Mutant>> = BTreeMap::new();
    for mutant in mutants {
        grouped
            .entry(mutant.contract.clone())
            .or_default()
            .push(mutant.clone());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating results directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&grouped)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing mutation results {}", path.display()))?;
    Ok(())
}

/// Drives mutation testing over replay sessions.
pub struct MutationOrchestrator<'a> {
    chain: &'a dyn ChainClient,
    compiler: &'a dyn Compiler,
    config: &'a ProxydiffConfig,
    deployed_declaration: &'a LayoutDeclaration,
    upgraded_declaration: &'a LayoutDeclaration,
    mapping_seeds: &'a [StateDiffRecord],
    call_timeout: Option<Duration>,
}

impl<'a> MutationOrchestrator<'a> {
    pub fn new(
        chain: &'a dyn ChainClient,
        compiler: &'a dyn Compiler,
        config: &'a ProxydiffConfig,
        deployed_declaration: &'a LayoutDeclaration,
        upgraded_declaration: &'a LayoutDeclaration,
    ) -> Self {
        Self {
            chain,
            compiler,
            config,
            deployed_declaration,
            upgraded_declaration,
            mapping_seeds: &[],
            call_timeout: None,
        }
    }

    pub fn with_mapping_seeds(mut self, seeds: &'a [StateDiffRecord]) -> Self {
        self.mapping_seeds = seeds;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Test every discovered mutant (or only `selected`, when given) against
    /// the recorded transactions.
    pub async fn run(
        &self,
        transactions: &[TransactionRecord],
        selected: Option<&str>,
    ) -> Result<MutationRun> {
        let mutations = MutationsFile::load(&self.config.mutations_path)?;
        let sources = discover_mutants(Path::new(&self.config.mutants_dir))?;
        info!(mutants = sources.len(), "starting mutation testing run");

        let mut run = MutationRun::default();
        let mut selection_matched = false;
        for source in sources {
            if let Some(wanted) = selected {
                if source.id != wanted {
                    continue;
                }
                selection_matched = true;
            }
            let Some(meta) = mutations.find(&source.contract, &source.id) else {
                warn!(
                    contract = %source.contract,
                    id = %source.id,
                    "mutant source has no metadata, skipping"
                );
                continue;
            };

            let mut mutant = meta.clone();
            if mutant.contract.is_empty() {
                mutant.contract = source.contract.clone();
            }
            mutant.reset_for_replay();

            let started = Instant::now();
            self.test_one(&source.path, &mut mutant, transactions, &mut run.report)
                .await
                .with_context(|| format!("testing mutant {}-{}", source.contract, source.id))?;
            mutant.testing_time = started.elapsed().as_secs_f64();

            info!(
                contract = %mutant.contract,
                id = %mutant.id,
                status = mutant.status.as_str(),
                "mutant tested"
            );
            run.mutants.push(mutant);
        }

        if selected.is_some() && !selection_matched {
            warn!(id = selected.unwrap_or(""), "selected mutant not found");
        }
        Ok(run)
    }

    async fn test_one(
        &self,
        mutant_source: &Path,
        mutant: &mut Mutant,
        transactions: &[TransactionRecord],
        report: &mut RunReport,
    ) -> Result<()> {
        let target = Path::new(&self.config.upgraded_logic_path);
        let applied = AppliedMutant::apply(mutant_source, target)?;

        let compiled = match self.compiler.compile().await {
            Ok(output) => output,
            Err(CompileError::Rejected { .. }) => {
                debug!(id = %mutant.id, "mutant does not compile");
                mutant.status = MutantStatus::Uncompilable;
                mutant.replay_status_code = Some(ReplayStatus::NotExecuted.code());
                applied.restore()?;
                return Ok(());
            }
            Err(error) => {
                applied.restore()?;
                return Err(error.into());
            }
        };

        let replay_result = self
            .replay_transactions(&compiled.runtime_bytecode, mutant, transactions, report)
            .await;
        applied.restore()?;
        replay_result
    }

    /// Replay every transaction against the mutated logic, one report row
    /// per transaction. The first kill fixes the mutant's classification;
    /// later transactions still run and get reported.
    async fn replay_transactions(
        &self,
        runtime_bytecode: &str,
        mutant: &mut Mutant,
        transactions: &[TransactionRecord],
        report: &mut RunReport,
    ) -> Result<()> {
        let mut session = ReplaySession::new(
            self.chain,
            self.config,
            self.deployed_declaration,
            self.upgraded_declaration,
            runtime_bytecode,
        )
        .with_mapping_seeds(self.mapping_seeds);
        if let Some(timeout) = self.call_timeout {
            session = session.with_call_timeout(timeout);
        }

        let mut first_kill = None;
        for tx in transactions {
            let tx_started = Instant::now();
            let verdict = session.replay(tx).await?;
            report.record(
                &format!("{}-{}/{}", mutant.contract, mutant.id, tx.hash),
                ReplayRecord::from_verdict(tx, &verdict, tx_started.elapsed()),
            );

            if !verdict.status.is_verdict() {
                mutant.status = MutantStatus::Error;
                mutant.replay_status_code = Some(verdict.status.code());
                return Ok(());
            }
            if first_kill.is_some() {
                continue;
            }
            mutant.replay_status_code = Some(verdict.status.code());

            let outcome_changed = verdict.has_outcome_changed();
            let storage_changed = verdict.has_storage_changed();
            let killed = match (outcome_changed, storage_changed) {
                (true, true) => Some(MutantStatus::KilledOutcomeStorage),
                (true, false) => Some(MutantStatus::KilledOutcome),
                (false, true) => Some(MutantStatus::KilledStorage),
                (false, false) => None,
            };
            if let Some(status) = killed {
                mutant.has_outcome_changed = outcome_changed;
                mutant.has_storage_changed = storage_changed;
                mutant.outcome_changes =
                    verdict.outcome.filter(|record| record.has_changed());
                mutant.storage_changes = verdict.storage_diff;
                first_kill = Some(status);
            }
        }
        mutant.status = first_kill.unwrap_or(MutantStatus::Live);
        Ok(())
    }
}
