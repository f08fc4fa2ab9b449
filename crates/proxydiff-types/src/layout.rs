//! Storage layout data model.
//!
//! The layout declaration mirrors the flat storage layout a Solidity compiler
//! emits for a contract: an ordered list of state variable declarations plus a
//! table describing every storage type by its `t_*` identifier. The resolver
//! turns a declaration into a [`ResolvedLayout`] by computing every slot a
//! variable occupies and reading the raw 32-byte words found there.
//!
//! Type identifiers are parsed into [`TypeTag`], a closed enumeration, so that
//! every consumer dispatches over an exhaustive `match` instead of substring
//! tests. An identifier that does not parse is a hard error: a layout with an
//! unknown encoding must never be silently skipped.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Layout declaration (compiler output)
// =============================================================================

/// Flat storage layout for one contract, as emitted by the compiler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutDeclaration {
    /// Ordered state variable declarations.
    pub storage: Vec<StorageSlotDecl>,
    /// Type table keyed by `t_*` identifier.
    #[serde(default)]
    pub types: BTreeMap<String, TypeInfo>,
}

impl LayoutDeclaration {
    /// Look up a type in the table, failing loudly when the declaration is
    /// incomplete.
    pub fn type_info(&self, type_id: &str) -> Result<&TypeInfo> {
        self.types
            .get(type_id)
            .with_context(|| format!("type {type_id} missing from layout type table"))
    }
}

/// One entry of the `storage` array (also used for struct members).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSlotDecl {
    /// Declared variable (or member) name.
    pub label: String,
    /// Base slot, as a decimal string.
    pub slot: String,
    /// Byte offset within the base slot.
    pub offset: u32,
    /// Storage type identifier (`t_uint256`, `t_array(...)dyn_storage`, ...).
    #[serde(rename = "type")]
    pub type_id: String,
    /// Owning contract name.
    #[serde(default)]
    pub contract: String,
    /// Source file the variable was declared in.
    #[serde(default)]
    pub source: String,
}

/// Per-type metadata from the layout type table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeInfo {
    /// Human-readable type label (e.g. `uint256`).
    #[serde(default)]
    pub label: String,
    /// Total byte width of one value of this type, as a decimal string.
    #[serde(rename = "numberOfBytes")]
    pub number_of_bytes: String,
    /// Storage encoding (`inplace`, `mapping`, `dynamic_array`, `bytes`).
    #[serde(default)]
    pub encoding: Option<String>,
    /// Element type identifier for arrays.
    #[serde(default)]
    pub base: Option<String>,
    /// Key type identifier for mappings.
    #[serde(default)]
    pub key: Option<String>,
    /// Value type identifier for mappings.
    #[serde(default)]
    pub value: Option<String>,
    /// Member declarations for structs, slots relative to the struct base.
    #[serde(default)]
    pub members: Option<Vec<StorageSlotDecl>>,
}

impl TypeInfo {
    /// Byte width of one value of this type.
    pub fn byte_width(&self) -> Result<u64> {
        self.number_of_bytes
            .parse::<u64>()
            .with_context(|| format!("invalid numberOfBytes {:?}", self.number_of_bytes))
    }
}

// =============================================================================
// Type tags
// =============================================================================

/// Closed enumeration of storage type encodings.
///
/// Parsed from the compiler's `t_*` identifiers so that resolution and
/// decoding dispatch exhaustively; adding a new kind forces every `match`
/// over this enum to handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    /// Single-word value types (ints, address, bool, fixed bytes, enum).
    Elementary(ElementaryType),
    /// Mapping: only the base slot is observable without the keys.
    Mapping,
    /// Fixed-size array, elements packed contiguously from the base slot.
    FixedArray {
        elem: Box<TypeTag>,
        elem_id: String,
        len: u64,
    },
    /// Dynamic array, length at the base slot, data at `keccak256(slot)`.
    DynamicArray { elem: Box<TypeTag>, elem_id: String },
    /// Struct; member layout comes from the declaration's type table.
    Struct { type_id: String },
    /// Dynamically-sized byte string (short/long storage encoding).
    Bytes,
    /// UTF-8 string, stored exactly like `Bytes`.
    String,
    /// Mapping elements whose slots were discovered externally (state-diff
    /// scrape); the variable carries the slot keys to read directly.
    CustomMappingElements,
}

/// Identifier used for externally-seeded mapping element variables.
pub const CUSTOM_MAPPING_TYPE_ID: &str = "t_custom_mapping_elements";

impl TypeTag {
    /// Parse a compiler type identifier into a tag.
    ///
    /// Fails on identifiers this system does not know how to resolve; an
    /// unknown encoding aborts the replay session rather than silently
    /// dropping the variable.
    ///
    /// # Examples
    ///
    /// ```
    /// use proxydiff_types::layout::TypeTag;
    ///
    /// assert!(matches!(TypeTag::parse("t_uint256").unwrap(), TypeTag::Elementary(_)));
    /// assert!(matches!(TypeTag::parse("t_string_storage").unwrap(), TypeTag::String));
    /// assert!(TypeTag::parse("t_function_internal").is_err());
    /// ```
    pub fn parse(type_id: &str) -> Result<TypeTag> {
        let id = type_id.trim();

        if id == CUSTOM_MAPPING_TYPE_ID {
            return Ok(TypeTag::CustomMappingElements);
        }
        if id.starts_with("t_mapping(") {
            return Ok(TypeTag::Mapping);
        }
        if id.starts_with("t_struct(") {
            return Ok(TypeTag::Struct {
                type_id: id.to_string(),
            });
        }
        if id == "t_bytes_storage" || id.starts_with("t_bytes_storage_ptr") {
            return Ok(TypeTag::Bytes);
        }
        if id == "t_string_storage" || id.starts_with("t_string_storage_ptr") {
            return Ok(TypeTag::String);
        }
        if let Some(rest) = id.strip_prefix("t_array(") {
            let (inner, suffix) = split_balanced(rest)
                .with_context(|| format!("malformed array type identifier {id}"))?;
            let elem = TypeTag::parse(inner)?;
            let suffix = suffix.trim_end_matches("_storage").trim_end_matches("_ptr");
            let suffix = suffix.trim_end_matches("_storage");
            if suffix == "dyn" {
                return Ok(TypeTag::DynamicArray {
                    elem: Box::new(elem),
                    elem_id: inner.to_string(),
                });
            }
            let len: u64 = suffix
                .parse()
                .with_context(|| format!("invalid array length in {id}"))?;
            return Ok(TypeTag::FixedArray {
                elem: Box::new(elem),
                elem_id: inner.to_string(),
                len,
            });
        }

        Ok(TypeTag::Elementary(ElementaryType::parse(id)?))
    }

    /// Whether the tag is any array kind (used by shared-slot disambiguation,
    /// which only applies to non-array variables).
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            TypeTag::FixedArray { .. } | TypeTag::DynamicArray { .. }
        )
    }
}

/// Split `"inner)suffix"` at the parenthesis matching an already-consumed `(`.
fn split_balanced(rest: &str) -> Result<(&str, &str)> {
    let mut depth = 1usize;
    for (i, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&rest[..i], &rest[i + 1..]));
                }
            }
            _ => {}
        }
    }
    bail!("unbalanced parentheses");
}

/// Single-word value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementaryType {
    /// Unsigned integer with the given bit width.
    Uint(u16),
    /// Signed integer with the given bit width.
    Int(u16),
    /// 20-byte account address.
    Address,
    /// Boolean, lowest bit of its byte.
    Bool,
    /// Fixed-size byte array, left-aligned in its slot.
    FixedBytes(u8),
    /// Enum, stored as its unsigned discriminant.
    Enum,
    /// Contract reference, stored as an address.
    Contract,
}

impl ElementaryType {
    /// Parse an elementary `t_*` identifier.
    pub fn parse(type_id: &str) -> Result<ElementaryType> {
        let id = type_id.trim();
        if id == "t_address" || id == "t_address_payable" {
            return Ok(ElementaryType::Address);
        }
        if id == "t_bool" {
            return Ok(ElementaryType::Bool);
        }
        if id.starts_with("t_enum(") {
            return Ok(ElementaryType::Enum);
        }
        if id.starts_with("t_contract(") {
            return Ok(ElementaryType::Contract);
        }
        if let Some(bits) = id.strip_prefix("t_uint") {
            let bits: u16 = bits
                .parse()
                .with_context(|| format!("invalid uint width in {id}"))?;
            return Ok(ElementaryType::Uint(bits));
        }
        if let Some(bits) = id.strip_prefix("t_int") {
            let bits: u16 = bits
                .parse()
                .with_context(|| format!("invalid int width in {id}"))?;
            return Ok(ElementaryType::Int(bits));
        }
        if let Some(n) = id.strip_prefix("t_bytes") {
            let n: u8 = n
                .parse()
                .with_context(|| format!("invalid bytes width in {id}"))?;
            if n == 0 || n > 32 {
                bail!("bytes width out of range in {id}");
            }
            return Ok(ElementaryType::FixedBytes(n));
        }
        bail!("unsupported storage type identifier: {id}");
    }
}

// =============================================================================
// Raw and decoded values
// =============================================================================

/// Raw storage content of one variable.
///
/// Single-slot variables hold one 32-byte hex word; composite variables hold
/// an ordered slot-keyed map (nested one level per array nesting depth).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotValue {
    /// One raw 32-byte hex word, or a `none`/`deleted` marker in diff records.
    Scalar(String),
    /// slot key -> raw value, for variables spanning multiple slots.
    Slots(BTreeMap<String, SlotValue>),
}

impl SlotValue {
    /// Marker used on the missing side of an added/deleted diff entry.
    pub fn marker(text: &str) -> SlotValue {
        SlotValue::Scalar(text.to_string())
    }

    /// The scalar content, if this is a single-slot value.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            SlotValue::Scalar(s) => Some(s),
            SlotValue::Slots(_) => None,
        }
    }

    /// The slot-keyed map, if this is a composite value.
    pub fn as_slots(&self) -> Option<&BTreeMap<String, SlotValue>> {
        match self {
            SlotValue::Scalar(_) => None,
            SlotValue::Slots(m) => Some(m),
        }
    }

    /// Deep equality with trimmed, case-insensitive hex comparison.
    ///
    /// Composite values are equal when they have the same key set and every
    /// key compares equal; a scalar never equals a composite.
    pub fn deep_eq(&self, other: &SlotValue) -> bool {
        match (self, other) {
            (SlotValue::Scalar(a), SlotValue::Scalar(b)) => hex_eq(a, b),
            (SlotValue::Slots(a), SlotValue::Slots(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                a.iter().all(|(slot, va)| match b.get(slot) {
                    Some(vb) => va.deep_eq(vb),
                    None => false,
                })
            }
            _ => false,
        }
    }
}

/// Trimmed, case-insensitive comparison of two hex strings.
pub fn hex_eq(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Semantic decoded form of a variable, mirroring the shape of its raw value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// Decoded scalar rendering (`"42"`, `"0xdead..beef"`, `"true"`, ...).
    Scalar(String),
    /// slot key -> decoded value.
    Slots(BTreeMap<String, DecodedValue>),
}

impl DecodedValue {
    /// Marker used on the missing side of an added/deleted diff entry.
    pub fn marker(text: &str) -> DecodedValue {
        DecodedValue::Scalar(text.to_string())
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Scalar(s) => write!(f, "{s}"),
            DecodedValue::Slots(m) => {
                write!(f, "{{")?;
                for (i, (slot, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{slot}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

// =============================================================================
// Resolved variables
// =============================================================================

/// One declared state variable with its resolved storage content.
///
/// The identity triple (`name`, `contract`, `parent_source`) is what matches
/// a variable across two independently-compiled layouts; slot, offset and
/// values are facts about one specific replay, never part of identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageVariable {
    /// Declared variable name.
    pub name: String,
    /// Owning contract name.
    pub contract: String,
    /// Source file the variable was declared in.
    #[serde(rename = "parentSource")]
    pub parent_source: String,
    /// Storage type identifier.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Base slot (decimal string, or a 0x-prefixed derived key).
    pub slot: String,
    /// Byte offset within the base slot.
    pub offset: u32,
    /// Byte width of the variable inside its slot(s).
    #[serde(rename = "numberOfBytes")]
    pub number_of_bytes: u64,
    /// Element count for arrays and narrowed mapping sets.
    #[serde(rename = "numberOfElements", skip_serializing_if = "Option::is_none")]
    pub number_of_elements: Option<u64>,
    /// Raw storage content.
    pub value: SlotValue,
    /// Semantic decoded content, filled by the value decoder.
    #[serde(rename = "decodedValue", skip_serializing_if = "Option::is_none")]
    pub decoded_value: Option<DecodedValue>,
}

impl StorageVariable {
    /// Parse this variable's type identifier.
    pub fn type_tag(&self) -> Result<TypeTag> {
        TypeTag::parse(&self.type_id)
            .with_context(|| format!("variable {} has unsupported type", self.name))
    }

    /// The cross-layout identity triple.
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.name, &self.contract, &self.parent_source)
    }

    /// Whether both variables start at the same base slot.
    pub fn same_slot(&self, other: &StorageVariable) -> bool {
        self.slot == other.slot
    }

    /// Deep raw-value equality.
    pub fn same_value(&self, other: &StorageVariable) -> bool {
        self.value.deep_eq(&other.value)
    }
}

/// Ordered collection of resolved variables for one contract at one point in
/// chain history. Produced fresh per replay side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedLayout {
    pub variables: Vec<StorageVariable>,
}

impl ResolvedLayout {
    pub fn new(variables: Vec<StorageVariable>) -> Self {
        Self { variables }
    }

    pub fn push(&mut self, variable: StorageVariable) {
        self.variables.push(variable);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StorageVariable> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_elementary_tags() {
        assert_eq!(
            TypeTag::parse("t_uint256").unwrap(),
            TypeTag::Elementary(ElementaryType::Uint(256))
        );
        assert_eq!(
            TypeTag::parse("t_int128").unwrap(),
            TypeTag::Elementary(ElementaryType::Int(128))
        );
        assert_eq!(
            TypeTag::parse("t_address").unwrap(),
            TypeTag::Elementary(ElementaryType::Address)
        );
        assert_eq!(
            TypeTag::parse("t_bool").unwrap(),
            TypeTag::Elementary(ElementaryType::Bool)
        );
        assert_eq!(
            TypeTag::parse("t_bytes32").unwrap(),
            TypeTag::Elementary(ElementaryType::FixedBytes(32))
        );
        assert!(matches!(
            TypeTag::parse("t_enum(Status)42").unwrap(),
            TypeTag::Elementary(ElementaryType::Enum)
        ));
        assert!(matches!(
            TypeTag::parse("t_contract(IERC20)99").unwrap(),
            TypeTag::Elementary(ElementaryType::Contract)
        ));
    }

    #[test]
    fn test_parse_composite_tags() {
        assert_eq!(TypeTag::parse("t_bytes_storage").unwrap(), TypeTag::Bytes);
        assert_eq!(TypeTag::parse("t_string_storage").unwrap(), TypeTag::String);
        assert_eq!(
            TypeTag::parse("t_mapping(t_address,t_uint256)").unwrap(),
            TypeTag::Mapping
        );
        assert_eq!(
            TypeTag::parse("t_custom_mapping_elements").unwrap(),
            TypeTag::CustomMappingElements
        );
        assert!(matches!(
            TypeTag::parse("t_struct(Checkpoint)123_storage").unwrap(),
            TypeTag::Struct { .. }
        ));
    }

    #[test]
    fn test_parse_array_tags() {
        match TypeTag::parse("t_array(t_uint256)dyn_storage").unwrap() {
            TypeTag::DynamicArray { elem, elem_id } => {
                assert_eq!(*elem, TypeTag::Elementary(ElementaryType::Uint(256)));
                assert_eq!(elem_id, "t_uint256");
            }
            other => panic!("unexpected tag {other:?}"),
        }
        match TypeTag::parse("t_array(t_uint128)5_storage").unwrap() {
            TypeTag::FixedArray { elem, len, .. } => {
                assert_eq!(*elem, TypeTag::Elementary(ElementaryType::Uint(128)));
                assert_eq!(len, 5);
            }
            other => panic!("unexpected tag {other:?}"),
        }
    }

    #[test]
    fn test_parse_nested_array_tag() {
        match TypeTag::parse("t_array(t_array(t_uint256)dyn_storage)dyn_storage").unwrap() {
            TypeTag::DynamicArray { elem, elem_id } => {
                assert_eq!(elem_id, "t_array(t_uint256)dyn_storage");
                assert!(matches!(*elem, TypeTag::DynamicArray { .. }));
            }
            other => panic!("unexpected tag {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        assert!(TypeTag::parse("t_function_internal_pure").is_err());
        assert!(TypeTag::parse("t_bytes33").is_err());
        assert!(TypeTag::parse("t_array(t_uint256").is_err());
    }

    #[test]
    fn test_slot_value_deep_eq() {
        let a = SlotValue::Scalar("0xABCD".into());
        let b = SlotValue::Scalar(" 0xabcd ".into());
        assert!(a.deep_eq(&b));

        let mut m1 = BTreeMap::new();
        m1.insert("3".to_string(), SlotValue::Scalar("0x01".into()));
        let mut m2 = BTreeMap::new();
        m2.insert("3".to_string(), SlotValue::Scalar("0x01".into()));
        assert!(SlotValue::Slots(m1.clone()).deep_eq(&SlotValue::Slots(m2.clone())));

        m2.insert("4".to_string(), SlotValue::Scalar("0x02".into()));
        assert!(!SlotValue::Slots(m1).deep_eq(&SlotValue::Slots(m2)));

        assert!(!a.deep_eq(&SlotValue::Slots(BTreeMap::new())));
    }

    #[test]
    fn test_layout_declaration_json_round_trip() {
        let json = r#"{
            "storage": [
                {
                    "label": "totalSupply",
                    "slot": "0",
                    "offset": 0,
                    "type": "t_uint256",
                    "contract": "Token",
                    "source": "contracts/Token.sol"
                }
            ],
            "types": {
                "t_uint256": { "label": "uint256", "numberOfBytes": "32", "encoding": "inplace" }
            }
        }"#;
        let decl: LayoutDeclaration = serde_json::from_str(json).expect("parse");
        assert_eq!(decl.storage.len(), 1);
        assert_eq!(decl.storage[0].type_id, "t_uint256");
        assert_eq!(decl.type_info("t_uint256").unwrap().byte_width().unwrap(), 32);
        assert!(decl.type_info("t_uint8").is_err());
    }
}
