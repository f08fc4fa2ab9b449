//! Chain client abstraction.
//!
//! A [`ChainClient`] fronts a forkable development node (anvil, hardhat):
//! reset the fork to a historical block, fund and impersonate the original
//! sender, execute calls, and swap runtime bytecode in place. The replay
//! session only ever talks to this trait, so tests script a
//! [`MockChainClient`] instead of spawning a node.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use alloy::primitives::{Address, B256};
use anyhow::{bail, Result};
use async_trait::async_trait;

use proxydiff_layout::SlotReader;

/// One call to execute on a fork, derived from a recorded transaction.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    /// 0x-prefixed calldata.
    pub input: String,
    /// 0x-prefixed wei amount attached to the call.
    pub value: String,
    pub gas_limit: u64,
}

/// What a call produced: a return value or a caught revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// 0x-prefixed return data (or a decoded rendering of it).
    Value(String),
    /// Revert reason, without the `revert: ` prefix.
    Revert(String),
}

impl CallOutcome {
    /// Canonical rendering used for cross-side comparison and reports.
    pub fn render(&self) -> String {
        match self {
            CallOutcome::Value(v) => v.clone(),
            CallOutcome::Revert(reason) => format!("revert: {reason}"),
        }
    }
}

/// Operations a forkable node must provide for replay sessions.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Reset the fork to the given historical block.
    async fn fork_at(&self, block_number: u64) -> Result<()>;

    /// Current block number of the fork.
    async fn block_number(&self) -> Result<u64>;

    /// Credit an account so the replayed sender can pay for gas.
    async fn fund(&self, address: Address, wei: &str) -> Result<()>;

    /// Allow sending transactions from an account without its key.
    async fn impersonate(&self, address: Address) -> Result<()>;

    /// Execute the call without mutating state. Reverts are captured as
    /// [`CallOutcome::Revert`]; `None` means the node yielded no outcome.
    async fn static_call(&self, request: &CallRequest) -> Result<Option<CallOutcome>>;

    /// Execute the call and commit its state changes.
    async fn send_transaction(&self, request: &CallRequest) -> Result<()>;

    /// Replace the runtime bytecode at an address in place.
    async fn set_code(&self, address: Address, runtime_bytecode: &str) -> Result<()>;

    /// Raw storage word at a slot.
    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256>;
}

/// Adapter exposing a chain client as a layout [`SlotReader`].
pub struct ChainSlotReader<'a> {
    client: &'a dyn ChainClient,
}

impl<'a> ChainSlotReader<'a> {
    pub fn new(client: &'a dyn ChainClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SlotReader for ChainSlotReader<'_> {
    async fn read_slot(&self, address: Address, slot: B256) -> Result<B256> {
        self.client.storage_at(address, slot).await
    }
}

// =============================================================================
// Scriptable mock
// =============================================================================

/// In-memory chain client for tests: outcomes are scripted per calldata and
/// per side, storage reads come from one of two fixed state maps, and
/// `set_code` flips which side is live. `fork_at` rewinds to the deployed
/// side, mirroring how a fork reset discards an in-place code swap.
#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    block: u64,
    upgraded: bool,
    deployed_outcomes: HashMap<String, Option<CallOutcome>>,
    upgraded_outcomes: HashMap<String, Option<CallOutcome>>,
    deployed_storage: BTreeMap<(Address, B256), B256>,
    upgraded_storage: BTreeMap<(Address, B256), B256>,
    hang_on_upgraded: bool,
    hang_on_deployed: bool,
    sent: Vec<CallRequest>,
    code_swaps: Vec<(Address, String)>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of a calldata on the deployed side.
    pub fn script_deployed(&self, input: &str, outcome: Option<CallOutcome>) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.deployed_outcomes.insert(input.to_string(), outcome);
    }

    /// Script the outcome of a calldata on the upgraded side.
    pub fn script_upgraded(&self, input: &str, outcome: Option<CallOutcome>) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.upgraded_outcomes.insert(input.to_string(), outcome);
    }

    /// Seed a storage word visible on the deployed side.
    pub fn seed_deployed_storage(&self, address: Address, slot: B256, word: B256) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.deployed_storage.insert((address, slot), word);
    }

    /// Seed a storage word visible on the upgraded side.
    pub fn seed_upgraded_storage(&self, address: Address, slot: B256, word: B256) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.upgraded_storage.insert((address, slot), word);
    }

    /// Make calls on the chosen side never return, to exercise timeouts.
    pub fn hang_side(&self, upgraded: bool) {
        let mut state = self.state.lock().expect("mock state poisoned");
        if upgraded {
            state.hang_on_upgraded = true;
        } else {
            state.hang_on_deployed = true;
        }
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").sent.len()
    }

    pub fn code_swaps(&self) -> Vec<(Address, String)> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .code_swaps
            .clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn fork_at(&self, block_number: u64) -> Result<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.block = block_number;
        state.upgraded = false;
        Ok(())
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state.lock().expect("mock state poisoned").block)
    }

    async fn fund(&self, _address: Address, _wei: &str) -> Result<()> {
        Ok(())
    }

    async fn impersonate(&self, _address: Address) -> Result<()> {
        Ok(())
    }

    async fn static_call(&self, request: &CallRequest) -> Result<Option<CallOutcome>> {
        let (hang, outcome) = {
            let state = self.state.lock().expect("mock state poisoned");
            let hang = if state.upgraded {
                state.hang_on_upgraded
            } else {
                state.hang_on_deployed
            };
            let table = if state.upgraded {
                &state.upgraded_outcomes
            } else {
                &state.deployed_outcomes
            };
            (hang, table.get(&request.input).cloned())
        };
        if hang {
            futures_never().await;
        }
        match outcome {
            Some(outcome) => Ok(outcome),
            None => bail!("unscripted call: {}", request.input),
        }
    }

    async fn send_transaction(&self, request: &CallRequest) -> Result<()> {
        let hang = {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.sent.push(request.clone());
            if state.upgraded {
                state.hang_on_upgraded
            } else {
                state.hang_on_deployed
            }
        };
        if hang {
            futures_never().await;
        }
        Ok(())
    }

    async fn set_code(&self, address: Address, runtime_bytecode: &str) -> Result<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.code_swaps.push((address, runtime_bytecode.to_string()));
        state.upgraded = true;
        Ok(())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        let state = self.state.lock().expect("mock state poisoned");
        let table = if state.upgraded {
            &state.upgraded_storage
        } else {
            &state.deployed_storage
        };
        Ok(table.get(&(address, slot)).copied().unwrap_or(B256::ZERO))
    }
}

async fn futures_never() {
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_sides_switch_on_set_code() {
        let mock = MockChainClient::new();
        let addr = Address::repeat_byte(0x11);
        let slot = B256::ZERO;
        mock.seed_deployed_storage(addr, slot, B256::repeat_byte(0x01));
        mock.seed_upgraded_storage(addr, slot, B256::repeat_byte(0x02));

        mock.fork_at(100).await.expect("fork");
        assert_eq!(
            mock.storage_at(addr, slot).await.expect("read"),
            B256::repeat_byte(0x01)
        );

        mock.set_code(addr, "0x6001").await.expect("set code");
        assert_eq!(
            mock.storage_at(addr, slot).await.expect("read"),
            B256::repeat_byte(0x02)
        );

        // A fork reset discards the swap.
        mock.fork_at(100).await.expect("fork");
        assert_eq!(
            mock.storage_at(addr, slot).await.expect("read"),
            B256::repeat_byte(0x01)
        );
    }

    #[tokio::test]
    async fn test_unscripted_call_is_an_error() {
        let mock = MockChainClient::new();
        let request = CallRequest {
            from: Address::ZERO,
            to: Address::ZERO,
            input: "0xdeadbeef".into(),
            value: "0x0".into(),
            gas_limit: 2_100_000,
        };
        assert!(mock.static_call(&request).await.is_err());
    }

    #[test]
    fn test_outcome_rendering() {
        assert_eq!(CallOutcome::Value("0x01".into()).render(), "0x01");
        assert_eq!(
            CallOutcome::Revert("paused".into()).render(),
            "revert: paused"
        );
    }
}
