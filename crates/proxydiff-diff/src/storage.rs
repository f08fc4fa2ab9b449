//! Storage layout diff engine.
//!
//! Variables are matched across the two layouts by their identity triple
//! (name, contract, declaring source). Slot numbers and values are never
//! part of identity: a variable that moved slots is the same variable, and
//! reporting the move is exactly the point.
//!
//! Classification, in order, per matched pair:
//!   - both sides present, base slot differs    -> slot-changed
//!   - both sides present, raw value differs    -> value-changed
//!   - only the before side present             -> variable-deleted
//!   - only the after side present              -> variable-added
//! Slot and value changes can combine on one entry.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use tracing::debug;

use proxydiff_types::diff::{ChangeKind, StorageDiffEntry};
use proxydiff_types::layout::{hex_eq, ResolvedLayout, SlotValue, StorageVariable, TypeTag};

/// Compares two resolved layouts of the same proxy taken before and after an
/// upgrade.
pub struct StorageComparator {
    deployed_root: Option<String>,
    upgraded_root: Option<String>,
}

impl StorageComparator {
    pub fn new() -> Self {
        Self {
            deployed_root: None,
            upgraded_root: None,
        }
    }

    /// Normalize declaring-source paths before matching: the two sides are
    /// compiled from different source trees, so a path rooted in the deployed
    /// tree is rewritten to the upgraded tree's root.
    pub fn with_source_roots(mut self, deployed: impl Into<String>, upgraded: impl Into<String>) -> Self {
        self.deployed_root = Some(deployed.into());
        self.upgraded_root = Some(upgraded.into());
        self
    }

    fn normalize_source(&self, source: &str) -> String {
        match (&self.deployed_root, &self.upgraded_root) {
            (Some(deployed), Some(upgraded)) => match source.strip_prefix(deployed.as_str()) {
                Some(rest) => format!("{upgraded}{rest}"),
                None => source.to_string(),
            },
            _ => source.to_string(),
        }
    }

    /// Produce the classified differences between the two layouts.
    ///
    /// A variable whose identity matches more than one declaration on the
    /// other side is a fatal error: the pairing would be arbitrary and every
    /// entry derived from it meaningless.
    pub fn compare(
        &self,
        before: &ResolvedLayout,
        after: &ResolvedLayout,
    ) -> Result<Vec<StorageDiffEntry>> {
        let mut entries = Vec::new();

        for variable in before.iter() {
            let normalized = self.normalize_source(&variable.parent_source);
            let matches: Vec<&StorageVariable> = after
                .iter()
                .filter(|candidate| {
                    candidate.name == variable.name
                        && candidate.contract == variable.contract
                        && candidate.parent_source == normalized
                })
                .collect();

            match matches.as_slice() {
                [] => {
                    debug!(name = %variable.name, contract = %variable.contract, "variable deleted");
                    entries.push(StorageDiffEntry::deleted(variable));
                }
                [matched] => {
                    if let Some(entry) = self.classify_pair(variable, matched, after)? {
                        entries.push(entry);
                    }
                }
                many => bail!(
                    "variable {} of {} ({}) matches {} declarations in the upgraded layout",
                    variable.name,
                    variable.contract,
                    variable.parent_source,
                    many.len()
                ),
            }
        }

        for variable in after.iter() {
            let known = before.iter().any(|candidate| {
                candidate.name == variable.name
                    && candidate.contract == variable.contract
                    && self.normalize_source(&candidate.parent_source) == variable.parent_source
            });
            if !known {
                debug!(name = %variable.name, contract = %variable.contract, "variable added");
                entries.push(StorageDiffEntry::added(variable));
            }
        }

        Ok(entries)
    }

    fn classify_pair(
        &self,
        before: &StorageVariable,
        after: &StorageVariable,
        after_layout: &ResolvedLayout,
    ) -> Result<Option<StorageDiffEntry>> {
        let mut changes = Vec::new();
        if !before.same_slot(after) {
            changes.push(ChangeKind::SlotChanged);
        }

        let tag = before.type_tag()?;
        if tag == TypeTag::CustomMappingElements {
            if let Some((narrow_before, narrow_after)) = narrow_mapping(before, after) {
                changes.push(ChangeKind::ValueChanged);
                return Ok(Some(StorageDiffEntry::changed(
                    &narrow_before,
                    &narrow_after,
                    &changes,
                )));
            }
        } else if value_changed(before, after, &tag, after_layout)? {
            changes.push(ChangeKind::ValueChanged);
        }

        if changes.is_empty() {
            return Ok(None);
        }
        debug!(
            name = %before.name,
            contract = %before.contract,
            change = %proxydiff_types::diff::describe_changes(&changes),
            "storage divergence"
        );
        Ok(Some(StorageDiffEntry::changed(before, after, &changes)))
    }
}

impl Default for StorageComparator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the pair's raw values genuinely differ.
///
/// When several packed variables share the after-side base slot, comparing
/// whole words blames every co-tenant for one neighbour's write. In that case
/// only the variable's own byte span within the word is compared.
fn value_changed(
    before: &StorageVariable,
    after: &StorageVariable,
    tag: &TypeTag,
    after_layout: &ResolvedLayout,
) -> Result<bool> {
    if before.same_value(after) {
        return Ok(false);
    }

    let packed_neighbours = !tag.is_array()
        && after_layout
            .iter()
            .any(|other| other.slot == after.slot && other.identity() != after.identity());
    if !packed_neighbours {
        return Ok(true);
    }

    match (before.value.as_scalar(), after.value.as_scalar()) {
        (Some(raw_before), Some(raw_after)) => {
            let span_before = byte_span(raw_before, before.offset, before.number_of_bytes)?;
            let span_after = byte_span(raw_after, after.offset, after.number_of_bytes)?;
            Ok(!hex_eq(&span_before, &span_after))
        }
        // Composite values never pack with neighbours.
        _ => Ok(true),
    }
}

/// Extract the hex digits a variable occupies within its slot word.
///
/// Offsets count bytes from the low end of the word, so the span sits at
/// `[len - (offset + width) * 2, len - offset * 2)` of the padded hex string.
fn byte_span(raw: &str, offset: u32, width: u64) -> Result<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let padded = if digits.len() < 64 {
        format!("{}{digits}", "0".repeat(64 - digits.len()))
    } else {
        digits.to_string()
    };

    let end = padded
        .len()
        .checked_sub(offset as usize * 2)
        .filter(|end| (width as usize * 2) <= *end)
        .ok_or_else(|| {
            anyhow::anyhow!("value {raw} too short for offset {offset} width {width}")
        })?;
    let start = end - width as usize * 2;
    Ok(padded[start..end].to_ascii_lowercase())
}

/// Narrow a pair of externally-seeded mapping values to the keys whose words
/// differ. Returns `None` when every shared key holds the same word.
fn narrow_mapping(
    before: &StorageVariable,
    after: &StorageVariable,
) -> Option<(StorageVariable, StorageVariable)> {
    let empty = BTreeMap::new();
    let before_slots = before.value.as_slots().unwrap_or(&empty);
    let after_slots = after.value.as_slots().unwrap_or(&empty);

    let mut narrowed_before = BTreeMap::new();
    let mut narrowed_after = BTreeMap::new();
    for (key, value_before) in before_slots {
        match after_slots.get(key) {
            Some(value_after) if value_before.deep_eq(value_after) => {}
            Some(value_after) => {
                narrowed_before.insert(key.clone(), value_before.clone());
                narrowed_after.insert(key.clone(), value_after.clone());
            }
            None => {
                narrowed_before.insert(key.clone(), value_before.clone());
            }
        }
    }
    for (key, value_after) in after_slots {
        if !before_slots.contains_key(key) {
            narrowed_after.insert(key.clone(), value_after.clone());
        }
    }

    if narrowed_before.is_empty() && narrowed_after.is_empty() {
        return None;
    }

    let mut before = before.clone();
    let mut after = after.clone();
    before.number_of_elements = Some(narrowed_before.len() as u64);
    after.number_of_elements = Some(narrowed_after.len() as u64);
    before.value = SlotValue::Slots(narrowed_before);
    after.value = SlotValue::Slots(narrowed_after);
    Some((before, after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxydiff_types::layout::CUSTOM_MAPPING_TYPE_ID;

    fn variable(name: &str, slot: &str, value: &str) -> StorageVariable {
        StorageVariable {
            name: name.to_string(),
            contract: "Token".to_string(),
            parent_source: "deployed/contracts/Token.sol".to_string(),
            type_id: "t_uint256".to_string(),
            slot: slot.to_string(),
            offset: 0,
            number_of_bytes: 32,
            number_of_elements: None,
            value: SlotValue::Scalar(value.to_string()),
            decoded_value: None,
        }
    }

    fn upgraded(mut v: StorageVariable) -> StorageVariable {
        v.parent_source = v.parent_source.replace("deployed/", "upgraded/");
        v
    }

    fn comparator() -> StorageComparator {
        StorageComparator::new().with_source_roots("deployed/", "upgraded/")
    }

    #[test]
    fn test_identical_layouts_produce_no_entries() {
        let before = ResolvedLayout::new(vec![variable("total", "0", "0x01")]);
        let after = ResolvedLayout::new(vec![upgraded(variable("total", "0", "0x01"))]);
        let entries = comparator().compare(&before, &after).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_slot_and_value_change_combine() {
        let before = ResolvedLayout::new(vec![variable("total", "0", "0x01")]);
        let after = ResolvedLayout::new(vec![upgraded(variable("total", "2", "0x05"))]);
        let entries = comparator().compare(&before, &after).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change, "slot-changed, value-changed");
        assert_eq!(entries[0].slot_before, "0");
        assert_eq!(entries[0].slot_after, "2");
    }

    #[test]
    fn test_deleted_and_added() {
        let before = ResolvedLayout::new(vec![variable("old", "0", "0x01")]);
        let after = ResolvedLayout::new(vec![upgraded(variable("fresh", "0", "0x02"))]);
        let entries = comparator().compare(&before, &after).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].change, "variable-deleted");
        assert_eq!(entries[1].change, "variable-added");
    }

    #[test]
    fn test_ambiguous_identity_is_fatal() {
        let before = ResolvedLayout::new(vec![variable("total", "0", "0x01")]);
        let after = ResolvedLayout::new(vec![
            upgraded(variable("total", "0", "0x01")),
            upgraded(variable("total", "3", "0x02")),
        ]);
        assert!(comparator().compare(&before, &after).is_err());
    }

    #[test]
    fn test_case_insensitive_value_comparison() {
        let before = ResolvedLayout::new(vec![variable("total", "0", "0xABCD")]);
        let after = ResolvedLayout::new(vec![upgraded(variable("total", "0", "0xabcd"))]);
        let entries = comparator().compare(&before, &after).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_shared_slot_blames_only_the_written_span() {
        // Two uint128 halves packed in slot 0; only the high half changed.
        let word_before = format!("0x{}{}", "00".repeat(15).to_string() + "07", "00".repeat(15).to_string() + "03");
        let word_after = format!("0x{}{}", "00".repeat(15).to_string() + "09", "00".repeat(15).to_string() + "03");

        let mut low_before = variable("low", "0", &word_before);
        low_before.number_of_bytes = 16;
        low_before.type_id = "t_uint128".into();
        let mut high_before = variable("high", "0", &word_before);
        high_before.number_of_bytes = 16;
        high_before.offset = 16;
        high_before.type_id = "t_uint128".into();

        let mut low_after = upgraded(low_before.clone());
        low_after.value = SlotValue::Scalar(word_after.clone());
        let mut high_after = upgraded(high_before.clone());
        high_after.value = SlotValue::Scalar(word_after);

        let before = ResolvedLayout::new(vec![low_before, high_before]);
        let after = ResolvedLayout::new(vec![low_after, high_after]);
        let entries = comparator().compare(&before, &after).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "high");
        assert_eq!(entries[0].change, "value-changed");
    }

    #[test]
    fn test_custom_mapping_narrowed_to_changed_keys() {
        let mut slots_before = BTreeMap::new();
        slots_before.insert("0x0a".to_string(), SlotValue::Scalar("0x01".into()));
        slots_before.insert("0x0b".to_string(), SlotValue::Scalar("0x02".into()));
        let mut slots_after = slots_before.clone();
        slots_after.insert("0x0b".to_string(), SlotValue::Scalar("0x05".into()));

        let mut before_var = variable("balances", "0x0a", "");
        before_var.type_id = CUSTOM_MAPPING_TYPE_ID.to_string();
        before_var.number_of_elements = Some(2);
        before_var.value = SlotValue::Slots(slots_before);
        let mut after_var = upgraded(before_var.clone());
        after_var.value = SlotValue::Slots(slots_after);

        let before = ResolvedLayout::new(vec![before_var]);
        let after = ResolvedLayout::new(vec![after_var]);
        let entries = comparator().compare(&before, &after).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change, "value-changed");
        assert_eq!(entries[0].number_of_elements, Some(1));
        let narrowed = entries[0].value_before.as_slots().unwrap();
        assert_eq!(narrowed.len(), 1);
        assert!(narrowed.contains_key("0x0b"));
    }

    #[test]
    fn test_custom_mapping_with_equal_keys_is_silent() {
        let mut slots = BTreeMap::new();
        slots.insert("0x0a".to_string(), SlotValue::Scalar("0x01".into()));

        let mut before_var = variable("balances", "0x0a", "");
        before_var.type_id = CUSTOM_MAPPING_TYPE_ID.to_string();
        before_var.value = SlotValue::Slots(slots);
        let after_var = upgraded(before_var.clone());

        let before = ResolvedLayout::new(vec![before_var]);
        let after = ResolvedLayout::new(vec![after_var]);
        assert!(comparator().compare(&before, &after).unwrap().is_empty());
    }
}
