//! Replay Session.
//!
//! One session replays one recorded transaction twice from the same fork
//! point: once against the logic that was deployed when the transaction
//! originally ran, once against the upgraded logic swapped in with an
//! in-place code replacement. Both sides capture the call outcome and a
//! fully resolved storage layout of the proxy; the verdict comes from
//! comparing the two captures.
//!
//! A divergent outcome always fails the session. A storage-only divergence
//! passes by default and is reported; `fail_on_storage_divergence` makes it
//! fail instead.

use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use proxydiff_diff::{compare_outcomes, StorageComparator};
use proxydiff_layout::{custom_mapping_variable, LayoutResolver, StateDiffRecord, ValueDecoder};
use proxydiff_types::config::ProxydiffConfig;
use proxydiff_types::diff::StorageDiffEntry;
use proxydiff_types::layout::{LayoutDeclaration, ResolvedLayout};
use proxydiff_types::outcome::OutcomeRecord;
use proxydiff_types::status::{changes_description, ReplayStatus};
use proxydiff_types::transaction::TransactionRecord;

use crate::chain::{CallOutcome, CallRequest, ChainClient, ChainSlotReader};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of one replay session.
#[derive(Debug, Clone)]
pub struct SessionVerdict {
    pub status: ReplayStatus,
    /// Present only when both sides produced an outcome.
    pub outcome: Option<OutcomeRecord>,
    pub storage_diff: Vec<StorageDiffEntry>,
}

impl SessionVerdict {
    fn errored(status: ReplayStatus) -> Self {
        Self {
            status,
            outcome: None,
            storage_diff: Vec::new(),
        }
    }

    pub fn has_outcome_changed(&self) -> bool {
        self.outcome.as_ref().is_some_and(OutcomeRecord::has_changed)
    }

    pub fn has_storage_changed(&self) -> bool {
        !self.storage_diff.is_empty()
    }

    /// Report rendering of what the session detected.
    pub fn changes(&self) -> &'static str {
        changes_description(
            self.has_outcome_changed(),
            self.has_storage_changed(),
            self.status,
        )
    }
}

struct SideCapture {
    outcome: Option<CallOutcome>,
    layout: ResolvedLayout,
}

/// Replays recorded transactions against both sides of an upgrade.
pub struct ReplaySession<'a> {
    chain: &'a dyn ChainClient,
    config: &'a ProxydiffConfig,
    deployed_declaration: &'a LayoutDeclaration,
    upgraded_declaration: &'a LayoutDeclaration,
    upgraded_bytecode: &'a str,
    mapping_seeds: &'a [StateDiffRecord],
    call_timeout: Duration,
}

impl<'a> ReplaySession<'a> {
    pub fn new(
        chain: &'a dyn ChainClient,
        config: &'a ProxydiffConfig,
        deployed_declaration: &'a LayoutDeclaration,
        upgraded_declaration: &'a LayoutDeclaration,
        upgraded_bytecode: &'a str,
    ) -> Self {
        Self {
            chain,
            config,
            deployed_declaration,
            upgraded_declaration,
            upgraded_bytecode,
            mapping_seeds: &[],
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Externally-discovered mapping element slots to capture on both sides.
    pub fn with_mapping_seeds(mut self, seeds: &'a [StateDiffRecord]) -> Self {
        self.mapping_seeds = seeds;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Replay one transaction and produce the verdict.
    ///
    /// Timeouts and execution errors on either side are verdicts (codes 2
    /// and 3), as is a missing outcome capture (code 4); only a malformed
    /// transaction record or an ambiguous storage diff is a hard error.
    pub async fn replay(&self, tx: &TransactionRecord) -> Result<SessionVerdict> {
        if tx.block_number == 0 {
            bail!("transaction {} has no usable fork point", tx.hash);
        }
        let fork_block = tx.block_number - 1;
        let proxy: Address = self
            .config
            .deployed_proxy_addr
            .parse()
            .context("invalid proxy address in configuration")?;
        let logic: Address = self
            .config
            .deployed_logic_addr
            .parse()
            .context("invalid logic address in configuration")?;
        let sender: Address = tx
            .from
            .parse()
            .with_context(|| format!("invalid sender on transaction {}", tx.hash))?;

        let request = CallRequest {
            from: sender,
            to: proxy,
            input: tx.input.clone(),
            value: tx.value.clone(),
            gas_limit: self.config.gas_limit,
        };

        info!(hash = %tx.hash, function = %tx.function_name, fork_block, "replaying transaction");

        let deployed = match self
            .run_side(fork_block, sender, None, &request, proxy, self.deployed_declaration)
            .await
        {
            Ok(capture) => capture,
            Err(error) => {
                warn!(hash = %tx.hash, error = %format!("{error:#}"), "deployed side failed");
                return Ok(SessionVerdict::errored(ReplayStatus::ErrorOnDeployed));
            }
        };

        let upgraded = match self
            .run_side(fork_block, sender, Some(logic), &request, proxy, self.upgraded_declaration)
            .await
        {
            Ok(capture) => capture,
            Err(error) => {
                warn!(hash = %tx.hash, error = %format!("{error:#}"), "upgraded side failed");
                return Ok(SessionVerdict::errored(ReplayStatus::ErrorOnUpgraded));
            }
        };

        let (Some(outcome_deployed), Some(outcome_upgraded)) =
            (deployed.outcome, upgraded.outcome)
        else {
            warn!(hash = %tx.hash, "no call outcome captured");
            return Ok(SessionVerdict::errored(ReplayStatus::MissingOutcome));
        };

        let outcome = compare_outcomes(&outcome_deployed.render(), &outcome_upgraded.render());
        let storage_diff = StorageComparator::new()
            .with_source_roots(
                self.config.deployed_sources_dir.as_str(),
                self.config.upgraded_sources_dir.as_str(),
            )
            .compare(&deployed.layout, &upgraded.layout)
            .with_context(|| format!("diffing storage for transaction {}", tx.hash))?;

        let status = if outcome.has_changed() {
            ReplayStatus::Failed
        } else if !storage_diff.is_empty() && self.config.fail_on_storage_divergence {
            ReplayStatus::Failed
        } else {
            ReplayStatus::Passed
        };
        debug!(
            hash = %tx.hash,
            status = %status,
            storage_entries = storage_diff.len(),
            "session verdict"
        );

        Ok(SessionVerdict {
            status,
            outcome: Some(outcome),
            storage_diff,
        })
    }

    /// One full phase: fresh fork, optional code swap, timeout-bounded call
    /// and layout capture. Any failure in here belongs to this side's error
    /// status, not to the whole run.
    async fn run_side(
        &self,
        fork_block: u64,
        sender: Address,
        swap_at: Option<Address>,
        request: &CallRequest,
        proxy: Address,
        declaration: &LayoutDeclaration,
    ) -> Result<SideCapture> {
        self.prepare_fork(fork_block, sender).await?;
        if let Some(logic) = swap_at {
            self.chain
                .set_code(logic, self.upgraded_bytecode)
                .await
                .context("swapping in the upgraded logic bytecode")?;
        }
        match tokio::time::timeout(
            self.call_timeout,
            self.execute_side(request, proxy, declaration),
        )
        .await
        {
            Ok(capture) => capture,
            Err(_) => bail!("call timed out after {:?}", self.call_timeout),
        }
    }

    async fn prepare_fork(&self, fork_block: u64, sender: Address) -> Result<()> {
        self.chain
            .fork_at(fork_block)
            .await
            .with_context(|| format!("resetting fork to block {fork_block}"))?;
        let landed = self.chain.block_number().await?;
        if landed != fork_block {
            bail!("fork landed on block {landed}, expected {fork_block}");
        }
        self.chain
            .fund(sender, &self.config.sender_funding_wei)
            .await?;
        self.chain.impersonate(sender).await?;
        Ok(())
    }

    /// Execute the call on the current fork and capture outcome plus a fully
    /// resolved, decoded storage layout.
    async fn execute_side(
        &self,
        request: &CallRequest,
        proxy: Address,
        declaration: &LayoutDeclaration,
    ) -> Result<SideCapture> {
        let outcome = self.chain.static_call(request).await?;
        self.chain.send_transaction(request).await?;

        let reader = ChainSlotReader::new(self.chain);
        let resolver =
            LayoutResolver::new(&reader).with_blacklist(&self.config.state_vars_blacklist);
        let mut layout = resolver.resolve(declaration, proxy).await?;

        for seed in self.mapping_seeds {
            if !seed.address.eq_ignore_ascii_case(&self.config.deployed_proxy_addr) {
                continue;
            }
            let name = seed
                .name
                .clone()
                .unwrap_or_else(|| format!("mapping-elements-{}", seed.address));
            let mut variable =
                custom_mapping_variable(&name, &seed.address, "", &seed.changed_slots);
            resolver
                .resolve_variable(declaration, proxy, &mut variable)
                .await
                .with_context(|| format!("resolving seeded mapping {name}"))?;
            layout.push(variable);
        }

        ValueDecoder::new(declaration).decode_layout(&mut layout)?;
        Ok(SideCapture { outcome, layout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use alloy::primitives::B256;
    use proxydiff_types::layout::{StorageSlotDecl, TypeInfo};

    const PROXY: &str = "0x1111111111111111111111111111111111111111";
    const LOGIC: &str = "0x2222222222222222222222222222222222222222";

    fn config() -> ProxydiffConfig {
        let mut config = ProxydiffConfig::default();
        config.deployed_proxy_addr = PROXY.to_string();
        config.deployed_logic_addr = LOGIC.to_string();
        config.deployed_sources_dir = "deployed/".to_string();
        config.upgraded_sources_dir = "upgraded/".to_string();
        config
    }

    fn declaration(source: &str) -> LayoutDeclaration {
        let mut declaration = LayoutDeclaration::default();
        declaration.storage.push(StorageSlotDecl {
            label: "totalSupply".into(),
            slot: "0".into(),
            offset: 0,
            type_id: "t_uint256".into(),
            contract: "Token".into(),
            source: source.into(),
        });
        declaration.types.insert(
            "t_uint256".into(),
            TypeInfo {
                label: "uint256".into(),
                number_of_bytes: "32".into(),
                encoding: Some("inplace".into()),
                ..Default::default()
            },
        );
        declaration
    }

    fn transaction() -> TransactionRecord {
        TransactionRecord {
            hash: "0xabc".into(),
            from: "0x3333333333333333333333333333333333333333".into(),
            block_number: 100,
            function_name: "transfer".into(),
            input: "0xa9059cbb".into(),
            decoded_input: None,
            value: "0x0".into(),
        }
    }

    fn proxy_addr() -> Address {
        PROXY.parse().expect("proxy address")
    }

    #[tokio::test]
    async fn test_identical_sides_pass() {
        let mock = MockChainClient::new();
        mock.script_deployed("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.script_upgraded("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.seed_deployed_storage(proxy_addr(), B256::ZERO, B256::repeat_byte(0x05));
        mock.seed_upgraded_storage(proxy_addr(), B256::ZERO, B256::repeat_byte(0x05));

        let config = config();
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001");

        let verdict = session.replay(&transaction()).await.expect("replay");
        assert_eq!(verdict.status, ReplayStatus::Passed);
        assert_eq!(verdict.changes(), "none-changed");
        assert_eq!(mock.sent_count(), 2);
        assert_eq!(mock.code_swaps().len(), 1);
        assert_eq!(mock.code_swaps()[0].0, LOGIC.parse::<Address>().unwrap());
    }

    #[tokio::test]
    async fn test_diverging_outcome_fails() {
        let mock = MockChainClient::new();
        mock.script_deployed("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.script_upgraded(
            "0xa9059cbb",
            Some(CallOutcome::Revert("paused".into())),
        );

        let config = config();
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001");

        let verdict = session.replay(&transaction()).await.expect("replay");
        assert_eq!(verdict.status, ReplayStatus::Failed);
        assert_eq!(verdict.changes(), "outcome-changed");
        let outcome = verdict.outcome.expect("outcome record");
        assert_eq!(outcome.value_after, "revert: paused");
    }

    #[tokio::test]
    async fn test_storage_only_divergence_passes_by_default() {
        let mock = MockChainClient::new();
        mock.script_deployed("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.script_upgraded("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.seed_deployed_storage(proxy_addr(), B256::ZERO, B256::repeat_byte(0x05));
        mock.seed_upgraded_storage(proxy_addr(), B256::ZERO, B256::repeat_byte(0x06));

        let config = config();
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001");

        let verdict = session.replay(&transaction()).await.expect("replay");
        assert_eq!(verdict.status, ReplayStatus::Passed);
        assert!(verdict.has_storage_changed());
        assert_eq!(verdict.changes(), "storage-changed");
        assert_eq!(verdict.storage_diff[0].name, "totalSupply");
    }

    #[tokio::test]
    async fn test_storage_divergence_fails_when_strict() {
        let mock = MockChainClient::new();
        mock.script_deployed("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.script_upgraded("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.seed_upgraded_storage(proxy_addr(), B256::ZERO, B256::repeat_byte(0x06));

        let mut config = config();
        config.fail_on_storage_divergence = true;
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001");

        let verdict = session.replay(&transaction()).await.expect("replay");
        assert_eq!(verdict.status, ReplayStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_outcome_is_code_four() {
        let mock = MockChainClient::new();
        mock.script_deployed("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.script_upgraded("0xa9059cbb", None);

        let config = config();
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001");

        let verdict = session.replay(&transaction()).await.expect("replay");
        assert_eq!(verdict.status, ReplayStatus::MissingOutcome);
        assert_eq!(verdict.status.code(), 4);
        assert!(verdict.outcome.is_none());
    }

    #[tokio::test]
    async fn test_timeout_on_upgraded_side() {
        let mock = MockChainClient::new();
        mock.script_deployed("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        mock.hang_side(true);

        let config = config();
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001")
            .with_call_timeout(Duration::from_millis(50));

        let verdict = session.replay(&transaction()).await.expect("replay");
        assert_eq!(verdict.status, ReplayStatus::ErrorOnUpgraded);
        assert_eq!(verdict.status.code(), 3);
    }

    #[tokio::test]
    async fn test_execution_error_on_deployed_is_code_two() {
        // Nothing scripted: the very first call errors out.
        let mock = MockChainClient::new();

        let config = config();
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001");

        let verdict = session.replay(&transaction()).await.expect("replay");
        assert_eq!(verdict.status, ReplayStatus::ErrorOnDeployed);
        assert_eq!(verdict.status.code(), 2);
        assert!(verdict.outcome.is_none());
    }

    #[tokio::test]
    async fn test_execution_error_on_upgraded_is_code_three() {
        let mock = MockChainClient::new();
        mock.script_deployed("0xa9059cbb", Some(CallOutcome::Value("0x01".into())));
        // Upgraded side left unscripted: the swapped-in logic errors out.

        let config = config();
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001");

        let verdict = session.replay(&transaction()).await.expect("replay");
        assert_eq!(verdict.status, ReplayStatus::ErrorOnUpgraded);
        assert_eq!(verdict.status.code(), 3);
    }

    #[tokio::test]
    async fn test_genesis_transaction_is_rejected() {
        let mock = MockChainClient::new();
        let config = config();
        let deployed = declaration("deployed/contracts/Token.sol");
        let upgraded = declaration("upgraded/contracts/Token.sol");
        let session = ReplaySession::new(&mock, &config, &deployed, &upgraded, "0x6001");

        let mut tx = transaction();
        tx.block_number = 0;
        assert!(session.replay(&tx).await.is_err());
    }
}
