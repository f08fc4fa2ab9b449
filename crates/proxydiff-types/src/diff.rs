//! Classified storage differences.

use serde::{Deserialize, Serialize};

use crate::layout::{DecodedValue, SlotValue, StorageVariable};

/// One kind of storage change. Slot and value changes can occur together on
/// the same variable; additions and deletions stand alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "slot-changed")]
    SlotChanged,
    #[serde(rename = "value-changed")]
    ValueChanged,
    #[serde(rename = "variable-deleted")]
    VariableDeleted,
    #[serde(rename = "variable-added")]
    VariableAdded,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::SlotChanged => "slot-changed",
            ChangeKind::ValueChanged => "value-changed",
            ChangeKind::VariableDeleted => "variable-deleted",
            ChangeKind::VariableAdded => "variable-added",
        }
    }
}

/// Render a combination of change kinds the way reports expect
/// (`"slot-changed, value-changed"`).
pub fn describe_changes(changes: &[ChangeKind]) -> String {
    changes
        .iter()
        .map(ChangeKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One classified difference between the before and after layouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDiffEntry {
    /// Variable name (identity).
    pub name: String,
    /// Owning contract (identity).
    pub contract: String,
    /// Declaring source file (identity).
    pub parent_source: String,
    /// Storage type identifier.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Byte offset within the slot.
    pub offset: u32,
    /// Byte width of the variable.
    pub number_of_bytes: u64,
    /// Element count, when the variable is an array or a narrowed mapping set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_elements: Option<u64>,
    /// Change description (`"slot-changed, value-changed"`, `"variable-added"`, ...).
    pub change: String,
    pub slot_before: String,
    pub slot_after: String,
    pub value_before: SlotValue,
    pub value_after: SlotValue,
    pub decoded_value_before: DecodedValue,
    pub decoded_value_after: DecodedValue,
}

impl StorageDiffEntry {
    /// Entry for a variable present on both sides whose slot and/or value
    /// changed.
    pub fn changed(
        before: &StorageVariable,
        after: &StorageVariable,
        changes: &[ChangeKind],
    ) -> StorageDiffEntry {
        StorageDiffEntry {
            name: before.name.clone(),
            contract: before.contract.clone(),
            parent_source: before.parent_source.clone(),
            type_id: before.type_id.clone(),
            offset: before.offset,
            number_of_bytes: before.number_of_bytes,
            number_of_elements: before.number_of_elements,
            change: describe_changes(changes),
            slot_before: before.slot.clone(),
            slot_after: after.slot.clone(),
            value_before: before.value.clone(),
            value_after: after.value.clone(),
            decoded_value_before: decoded_or_marker(before, "none"),
            decoded_value_after: decoded_or_marker(after, "none"),
        }
    }

    /// Entry for a variable that no longer exists after the upgrade.
    pub fn deleted(before: &StorageVariable) -> StorageDiffEntry {
        StorageDiffEntry {
            name: before.name.clone(),
            contract: before.contract.clone(),
            parent_source: before.parent_source.clone(),
            type_id: before.type_id.clone(),
            offset: before.offset,
            number_of_bytes: before.number_of_bytes,
            number_of_elements: before.number_of_elements,
            change: ChangeKind::VariableDeleted.as_str().to_string(),
            slot_before: before.slot.clone(),
            slot_after: "deleted".to_string(),
            value_before: before.value.clone(),
            value_after: SlotValue::marker("deleted"),
            decoded_value_before: decoded_or_marker(before, "none"),
            decoded_value_after: DecodedValue::marker("deleted"),
        }
    }

    /// Entry for a variable introduced by the upgrade.
    pub fn added(after: &StorageVariable) -> StorageDiffEntry {
        StorageDiffEntry {
            name: after.name.clone(),
            contract: after.contract.clone(),
            parent_source: after.parent_source.clone(),
            type_id: after.type_id.clone(),
            offset: after.offset,
            number_of_bytes: after.number_of_bytes,
            number_of_elements: after.number_of_elements,
            change: ChangeKind::VariableAdded.as_str().to_string(),
            slot_before: "none".to_string(),
            slot_after: after.slot.clone(),
            value_before: SlotValue::marker("none"),
            value_after: after.value.clone(),
            decoded_value_before: DecodedValue::marker("none"),
            decoded_value_after: decoded_or_marker(after, "none"),
        }
    }
}

fn decoded_or_marker(variable: &StorageVariable, marker: &str) -> DecodedValue {
    variable
        .decoded_value
        .clone()
        .unwrap_or_else(|| DecodedValue::marker(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(name: &str, slot: &str, value: &str) -> StorageVariable {
        StorageVariable {
            name: name.to_string(),
            contract: "Token".to_string(),
            parent_source: "contracts/Token.sol".to_string(),
            type_id: "t_uint256".to_string(),
            slot: slot.to_string(),
            offset: 0,
            number_of_bytes: 32,
            number_of_elements: None,
            value: SlotValue::Scalar(value.to_string()),
            decoded_value: None,
        }
    }

    #[test]
    fn test_describe_changes() {
        assert_eq!(
            describe_changes(&[ChangeKind::SlotChanged, ChangeKind::ValueChanged]),
            "slot-changed, value-changed"
        );
        assert_eq!(describe_changes(&[ChangeKind::ValueChanged]), "value-changed");
    }

    #[test]
    fn test_deleted_entry_markers() {
        let entry = StorageDiffEntry::deleted(&variable("total", "1", "0x01"));
        assert_eq!(entry.change, "variable-deleted");
        assert_eq!(entry.slot_after, "deleted");
        assert_eq!(entry.value_after, SlotValue::marker("deleted"));
    }

    #[test]
    fn test_added_entry_markers() {
        let entry = StorageDiffEntry::added(&variable("cap", "7", "0x02"));
        assert_eq!(entry.change, "variable-added");
        assert_eq!(entry.slot_before, "none");
        assert_eq!(entry.slot_after, "7");
        assert_eq!(entry.value_before, SlotValue::marker("none"));
    }
}
