//! Layout Resolver.
//!
//! Walks a compiler-emitted layout declaration and turns it into a
//! [`ResolvedLayout`]: for every declared variable, compute the full set of
//! slots it occupies and read their raw words through the [`SlotReader`].
//!
//! The resolver never interprets bytes; every composite case degrades to a
//! slot-keyed map of raw words and decoding is left to the
//! [`decoder`](crate::decoder). An unsupported type identifier aborts the
//! resolution: a layout with unknown encodings must never be silently
//! narrowed.
//!
//! Slot key convention: slots addressed relative to a declaration base keep
//! their decimal rendering; keccak-derived slots (dynamic array data, long
//! bytes/strings, externally-discovered mapping elements) are full-width hex
//! keys. [`slot_math::parse_slot`] accepts both.

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, B256, U256};
use anyhow::{bail, Context, Result};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use proxydiff_types::layout::{
    LayoutDeclaration, ResolvedLayout, SlotValue, StorageVariable, TypeTag,
    CUSTOM_MAPPING_TYPE_ID,
};

use crate::reader::SlotReader;
use crate::slot_math;

/// One scraped account entry from an external state-diff source, used to seed
/// mapping element variables when direct key enumeration is impossible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDiffRecord {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "ChangedSlots", default)]
    pub changed_slots: Vec<String>,
}

/// Load a scraped state-diff file: a JSON array of account entries with
/// their changed slot keys.
pub fn load_state_diff_records(path: impl AsRef<std::path::Path>) -> Result<Vec<StateDiffRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read state diff file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("malformed state diff file {}", path.display()))
}

/// Build a `t_custom_mapping_elements` variable carrying externally
/// discovered slot keys; the resolver fills in the words at those keys.
pub fn custom_mapping_variable(
    name: &str,
    contract: &str,
    parent_source: &str,
    slot_keys: &[String],
) -> StorageVariable {
    let placeholder = slot_math::format_word(&B256::ZERO);
    let slots: BTreeMap<String, SlotValue> = slot_keys
        .iter()
        .map(|key| (key.clone(), SlotValue::Scalar(placeholder.clone())))
        .collect();
    StorageVariable {
        name: name.to_string(),
        contract: contract.to_string(),
        parent_source: parent_source.to_string(),
        type_id: CUSTOM_MAPPING_TYPE_ID.to_string(),
        slot: slot_keys.first().cloned().unwrap_or_else(|| "0".to_string()),
        offset: 0,
        number_of_bytes: 32,
        number_of_elements: Some(slot_keys.len() as u64),
        value: SlotValue::Slots(slots),
        decoded_value: None,
    }
}

/// Resolves storage layouts against a chain fork through a [`SlotReader`].
pub struct LayoutResolver<'a> {
    reader: &'a dyn SlotReader,
    blacklist: &'a [String],
}

impl<'a> LayoutResolver<'a> {
    pub fn new(reader: &'a dyn SlotReader) -> Self {
        Self {
            reader,
            blacklist: &[],
        }
    }

    /// Skip the given variable names during resolution (reserved storage
    /// gaps like `__gap`).
    pub fn with_blacklist(mut self, blacklist: &'a [String]) -> Self {
        self.blacklist = blacklist;
        self
    }

    /// Resolve every declared variable of `declaration` against the storage
    /// of `address`, in declaration order.
    pub async fn resolve(
        &self,
        declaration: &LayoutDeclaration,
        address: Address,
    ) -> Result<ResolvedLayout> {
        let mut layout = ResolvedLayout::default();
        for decl in &declaration.storage {
            if self.blacklist.iter().any(|b| b == &decl.label) {
                debug!(variable = %decl.label, "skipping blacklisted state variable");
                continue;
            }
            let type_info = declaration.type_info(&decl.type_id)?;
            let mut variable = StorageVariable {
                name: decl.label.clone(),
                contract: decl.contract.clone(),
                parent_source: decl.source.clone(),
                type_id: decl.type_id.clone(),
                slot: decl.slot.clone(),
                offset: decl.offset,
                number_of_bytes: type_info.byte_width()?,
                number_of_elements: None,
                value: SlotValue::Scalar(String::new()),
                decoded_value: None,
            };
            self.resolve_variable(declaration, address, &mut variable)
                .await
                .with_context(|| format!("resolving variable {}", decl.label))?;
            layout.push(variable);
        }
        debug!(
            variables = layout.len(),
            %address,
            "storage layout resolved"
        );
        Ok(layout)
    }

    /// Resolve (or re-resolve) a single variable in place. Used both during
    /// full layout resolution and to refresh externally-seeded mapping
    /// element variables on the upgraded side.
    pub async fn resolve_variable(
        &self,
        declaration: &LayoutDeclaration,
        address: Address,
        variable: &mut StorageVariable,
    ) -> Result<()> {
        let tag = variable.type_tag()?;
        let base = slot_math::parse_slot(&variable.slot)?;

        let value = match &tag {
            TypeTag::Elementary(_) | TypeTag::Mapping => {
                let word = self.read(address, base).await?;
                SlotValue::Scalar(slot_math::format_word(&word))
            }
            TypeTag::CustomMappingElements => {
                let keys: Vec<String> = match variable.value.as_slots() {
                    Some(slots) => slots.keys().cloned().collect(),
                    None => bail!(
                        "custom mapping variable {} has no seeded slot keys",
                        variable.name
                    ),
                };
                variable.number_of_elements = Some(keys.len() as u64);
                let mut resolved = BTreeMap::new();
                let words = self.read_keys(address, &keys).await?;
                for (key, word) in keys.into_iter().zip(words) {
                    resolved.insert(key, SlotValue::Scalar(slot_math::format_word(&word)));
                }
                SlotValue::Slots(resolved)
            }
            TypeTag::Struct { type_id } => self
                .resolve_struct(declaration, address, type_id, base)
                .await?,
            TypeTag::FixedArray { .. } | TypeTag::DynamicArray { .. } => {
                let (value, len) = self
                    .resolve_array(declaration, address, &tag, base)
                    .await?;
                variable.number_of_elements = Some(len);
                value
            }
            TypeTag::Bytes | TypeTag::String => self.resolve_bytes(address, base).await?,
        };
        variable.value = value;
        Ok(())
    }

    async fn resolve_struct(
        &self,
        declaration: &LayoutDeclaration,
        address: Address,
        type_id: &str,
        base: U256,
    ) -> Result<SlotValue> {
        let info = declaration.type_info(type_id)?;
        let members = info
            .members
            .as_ref()
            .with_context(|| format!("struct type {type_id} has no member declarations"))?;
        // Members packed into the same slot collapse to one read.
        let mut slots = BTreeSet::new();
        for member in members {
            let relative = slot_math::parse_slot(&member.slot)?;
            let member_width = declaration.type_info(&member.type_id)?.byte_width()?;
            let span = member_width.div_ceil(32).max(1);
            for extra in 0..span {
                slots.insert(base + relative + U256::from(extra));
            }
        }
        let slots: Vec<U256> = slots.into_iter().collect();
        self.read_region(address, &slots, false).await
    }

    fn resolve_array<'b>(
        &'b self,
        declaration: &'b LayoutDeclaration,
        address: Address,
        tag: &'b TypeTag,
        base: U256,
    ) -> BoxFuture<'b, Result<(SlotValue, u64)>> {
        async move {
            let (elem, elem_id, len, data_base, derived) = match tag {
                TypeTag::FixedArray { elem, elem_id, len } => {
                    (elem.as_ref(), elem_id.as_str(), *len, base, false)
                }
                TypeTag::DynamicArray { elem, elem_id } => {
                    let length_word = self.read(address, base).await?;
                    let len = U256::from_be_bytes(length_word.0).saturating_to::<u64>();
                    (
                        elem.as_ref(),
                        elem_id.as_str(),
                        len,
                        slot_math::data_base_slot(base),
                        true,
                    )
                }
                _ => bail!("resolve_array called on a non-array tag"),
            };

            let elem_width = declaration.type_info(elem_id)?.byte_width()?;

            // Nested arrays: one resolution level per nesting depth, each
            // element gets a sub-layout keyed by its own base slot.
            if elem.is_array() {
                let slots_per_elem = elem_width.div_ceil(32).max(1);
                let mut nested = BTreeMap::new();
                for index in 0..len {
                    let elem_base = data_base + U256::from(index * slots_per_elem);
                    let (sub, _) = self
                        .resolve_array(declaration, address, elem, elem_base)
                        .await?;
                    nested.insert(format_region_slot(elem_base, derived), sub);
                }
                return Ok((SlotValue::Slots(nested), len));
            }

            let count = slot_math::slots_for_elements(len, elem_width)?;
            let slots = slot_math::contiguous_slots(data_base, count);
            let value = self.read_region(address, &slots, derived).await?;
            Ok((value, len))
        }
        .boxed()
    }

    async fn resolve_bytes(&self, address: Address, base: U256) -> Result<SlotValue> {
        let word = self.read(address, base).await?;
        let (is_long, len) = slot_math::bytes_encoding(&word);

        let mut value = BTreeMap::new();
        value.insert(
            base.to_string(),
            SlotValue::Scalar(slot_math::format_word(&word)),
        );
        if is_long {
            let data_base = slot_math::data_base_slot(base);
            let slots = slot_math::contiguous_slots(data_base, len.div_ceil(32));
            if let SlotValue::Slots(data) = self.read_region(address, &slots, true).await? {
                value.extend(data);
            }
        }
        Ok(SlotValue::Slots(value))
    }

    /// Read a set of sibling slots concurrently and key them per the slot key
    /// convention.
    async fn read_region(
        &self,
        address: Address,
        slots: &[U256],
        derived: bool,
    ) -> Result<SlotValue> {
        let reads = slots
            .iter()
            .map(|slot| async move {
                let word = self.read(address, *slot).await?;
                Ok::<_, anyhow::Error>((format_region_slot(*slot, derived), word))
            })
            .collect::<Vec<_>>();
        let mut value = BTreeMap::new();
        for (key, word) in try_join_all(reads).await? {
            value.insert(key, SlotValue::Scalar(slot_math::format_word(&word)));
        }
        Ok(SlotValue::Slots(value))
    }

    async fn read_keys(&self, address: Address, keys: &[String]) -> Result<Vec<B256>> {
        let reads = keys
            .iter()
            .map(|key| async move {
                let slot = slot_math::parse_slot(key)?;
                self.read(address, slot).await
            })
            .collect::<Vec<_>>();
        try_join_all(reads).await
    }

    async fn read(&self, address: Address, slot: U256) -> Result<B256> {
        self.reader
            .read_slot(address, slot_math::slot_key(slot))
            .await
    }
}

fn format_region_slot(slot: U256, derived: bool) -> String {
    if derived {
        slot_math::format_slot_hex(slot)
    } else {
        slot.to_string()
    }
}
