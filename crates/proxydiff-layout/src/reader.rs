//! Slot Reader abstraction.
//!
//! The single chain-facing interface of the layout crate: read the 32-byte
//! word at a storage slot of a contract on the current fork. Implementations
//! live with the chain client; an in-memory implementation is provided for
//! tests and offline decoding.
//!
//! Slot arguments are already-derived 32-byte keys: callers go through
//! [`crate::slot_math::parse_slot`] so both decimal indices and precomputed
//! keccak-derived keys are accepted at the string boundary.

use std::collections::BTreeMap;
use std::sync::Mutex;

use alloy::primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;

/// Reads raw storage words from the current chain fork.
#[async_trait]
pub trait SlotReader: Send + Sync {
    /// Read the 32-byte word stored at `slot` of `address`.
    ///
    /// Unset slots read as zero, matching chain semantics.
    async fn read_slot(&self, address: Address, slot: B256) -> Result<B256>;
}

/// In-memory slot store for tests and offline decoding.
#[derive(Default)]
pub struct MemorySlotReader {
    slots: Mutex<BTreeMap<(Address, B256), B256>>,
}

impl MemorySlotReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the word stored at a slot.
    pub fn insert(&self, address: Address, slot: B256, word: B256) {
        self.slots
            .lock()
            .expect("slot store poisoned")
            .insert((address, slot), word);
    }
}

#[async_trait]
impl SlotReader for MemorySlotReader {
    async fn read_slot(&self, address: Address, slot: B256) -> Result<B256> {
        Ok(self
            .slots
            .lock()
            .expect("slot store poisoned")
            .get(&(address, slot))
            .copied()
            .unwrap_or(B256::ZERO))
    }
}
