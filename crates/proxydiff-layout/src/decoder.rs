//! Value Decoder.
//!
//! Pure interpretation of raw slot words: no chain access, just type tag +
//! bytes + offset/width. The decoder needs the layout declaration's type
//! table to know element widths and struct members, but nothing else.
//!
//! Scalar decoding is invertible: [`DecodedScalar::encode`] restores the raw
//! bytes a value occupied in its slot, which pins the bit-level layout rules
//! under test without a chain in sight.

use std::collections::BTreeMap;

use alloy::primitives::{Address, I256, U256};
use anyhow::{bail, Context, Result};

use proxydiff_types::layout::{
    DecodedValue, ElementaryType, LayoutDeclaration, ResolvedLayout, SlotValue, StorageVariable,
    TypeTag,
};

use crate::slot_math;

/// A decoded single-slot value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedScalar {
    Uint(U256),
    Int(I256),
    Address(Address),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl DecodedScalar {
    /// Human-readable rendering used in decoded layouts and diff records.
    pub fn render(&self) -> String {
        match self {
            DecodedScalar::Uint(v) => v.to_string(),
            DecodedScalar::Int(v) => v.to_string(),
            DecodedScalar::Address(a) => format!("0x{}", hex::encode(a.as_slice())),
            DecodedScalar::Bool(b) => b.to_string(),
            DecodedScalar::Bytes(b) => format!("0x{}", hex::encode(b)),
        }
    }

    /// Re-encode the value into the `width` bytes it occupies in its slot.
    pub fn encode(&self, width: usize) -> Vec<u8> {
        match self {
            DecodedScalar::Uint(v) => v.to_be_bytes::<32>()[32 - width..].to_vec(),
            DecodedScalar::Int(v) => v.into_raw().to_be_bytes::<32>()[32 - width..].to_vec(),
            DecodedScalar::Address(a) => {
                let mut out = vec![0u8; width];
                let bytes = a.as_slice();
                let copy = bytes.len().min(width);
                out[width - copy..].copy_from_slice(&bytes[bytes.len() - copy..]);
                out
            }
            DecodedScalar::Bool(b) => {
                let mut out = vec![0u8; width];
                out[width - 1] = *b as u8;
                out
            }
            DecodedScalar::Bytes(b) => b.clone(),
        }
    }
}

/// Decode the `width` bytes at `offset` within a 32-byte slot word.
pub fn decode_scalar(
    word: &[u8; 32],
    ty: ElementaryType,
    offset: usize,
    width: usize,
) -> Result<DecodedScalar> {
    if width == 0 || offset + width > 32 {
        bail!("value of {width} bytes at offset {offset} does not fit a slot");
    }
    // Values are right-aligned within their slot: offset counts bytes from
    // the low end of the word.
    let end = 32 - offset;
    let slice = &word[end - width..end];

    Ok(match ty {
        ElementaryType::Uint(_) | ElementaryType::Enum => {
            DecodedScalar::Uint(U256::from_be_slice(slice))
        }
        ElementaryType::Int(_) => {
            let mut extended = if slice[0] & 0x80 != 0 {
                [0xffu8; 32]
            } else {
                [0u8; 32]
            };
            extended[32 - width..].copy_from_slice(slice);
            DecodedScalar::Int(I256::from_raw(U256::from_be_bytes(extended)))
        }
        ElementaryType::Address | ElementaryType::Contract => {
            if width < 20 {
                bail!("address value narrower than 20 bytes");
            }
            DecodedScalar::Address(Address::from_slice(&slice[width - 20..]))
        }
        ElementaryType::Bool => DecodedScalar::Bool(slice[width - 1] & 1 == 1),
        // Fixed bytes are left-aligned within their own width; the packed
        // area is the value.
        ElementaryType::FixedBytes(_) => DecodedScalar::Bytes(slice.to_vec()),
    })
}

/// Decodes resolved variables against a layout declaration's type table.
pub struct ValueDecoder<'a> {
    declaration: &'a LayoutDeclaration,
}

impl<'a> ValueDecoder<'a> {
    pub fn new(declaration: &'a LayoutDeclaration) -> Self {
        Self { declaration }
    }

    /// Fill `decoded_value` for every variable of a resolved layout.
    pub fn decode_layout(&self, layout: &mut ResolvedLayout) -> Result<()> {
        for variable in &mut layout.variables {
            let decoded = self
                .decode(variable)
                .with_context(|| format!("decoding variable {}", variable.name))?;
            variable.decoded_value = Some(decoded);
        }
        Ok(())
    }

    /// Decode one resolved variable into its semantic form, preserving the
    /// slot-keyed shape of composite values.
    pub fn decode(&self, variable: &StorageVariable) -> Result<DecodedValue> {
        let tag = variable.type_tag()?;
        match &tag {
            TypeTag::Elementary(elem) => {
                let raw = variable
                    .value
                    .as_scalar()
                    .context("elementary variable without a scalar value")?;
                let word = parse_word(raw)?;
                let scalar = decode_scalar(
                    &word,
                    *elem,
                    variable.offset as usize,
                    variable.number_of_bytes as usize,
                )?;
                Ok(DecodedValue::Scalar(scalar.render()))
            }
            // Without the keys, mapping words stay opaque.
            TypeTag::Mapping => Ok(raw_passthrough(&variable.value)),
            TypeTag::CustomMappingElements => Ok(raw_passthrough(&variable.value)),
            TypeTag::Bytes => self.decode_byte_string(variable, false),
            TypeTag::String => self.decode_byte_string(variable, true),
            TypeTag::FixedArray { elem, elem_id, .. }
            | TypeTag::DynamicArray { elem, elem_id } => {
                let count = variable.number_of_elements.unwrap_or(0);
                self.decode_array_region(&variable.value, elem, elem_id, count)
            }
            TypeTag::Struct { type_id } => self.decode_struct(variable, type_id),
        }
    }

    fn decode_array_region(
        &self,
        value: &SlotValue,
        elem: &TypeTag,
        elem_id: &str,
        count: u64,
    ) -> Result<DecodedValue> {
        let slots = value
            .as_slots()
            .context("array variable without a slot map")?;

        // Nested arrays: recurse into each element's own region.
        if elem.is_array() {
            let (inner_elem, inner_id) = match elem {
                TypeTag::FixedArray { elem, elem_id, .. }
                | TypeTag::DynamicArray { elem, elem_id } => (elem.as_ref(), elem_id.as_str()),
                _ => unreachable!(),
            };
            let mut decoded = BTreeMap::new();
            for (slot, sub) in slots {
                let inner_count = match sub.as_slots() {
                    Some(m) => m.len() as u64,
                    None => 0,
                };
                decoded.insert(
                    slot.clone(),
                    self.decode_array_region(sub, inner_elem, inner_id, inner_count)?,
                );
            }
            return Ok(DecodedValue::Slots(decoded));
        }

        let elem_ty = match elem {
            TypeTag::Elementary(e) => Some(*e),
            _ => None,
        };
        let elem_width = self.declaration.type_info(elem_id)?.byte_width()? as usize;
        let per_slot = slot_math::elements_per_slot(elem_width as u64)? as usize;

        let mut remaining = count as usize;
        let mut decoded = BTreeMap::new();
        for (slot, raw) in sorted_numeric(slots)? {
            let rendered = match (elem_ty, raw.as_scalar()) {
                (Some(ty), Some(scalar)) if elem_width <= 32 => {
                    let word = parse_word(scalar)?;
                    let in_slot = per_slot.min(remaining.max(1));
                    let mut parts = Vec::with_capacity(in_slot);
                    for index in 0..in_slot {
                        let offset = index * elem_width;
                        parts.push(decode_scalar(&word, ty, offset, elem_width)?.render());
                    }
                    remaining = remaining.saturating_sub(in_slot);
                    if per_slot == 1 {
                        parts.remove(0)
                    } else {
                        format!("[{}]", parts.join(", "))
                    }
                }
                // Struct elements and over-wide values stay raw per slot.
                _ => raw
                    .as_scalar()
                    .context("array slot without a scalar word")?
                    .to_string(),
            };
            decoded.insert(slot.to_string(), DecodedValue::Scalar(rendered));
        }
        Ok(DecodedValue::Slots(decoded))
    }

    fn decode_byte_string(&self, variable: &StorageVariable, as_utf8: bool) -> Result<DecodedValue> {
        let slots = variable
            .value
            .as_slots()
            .context("bytes variable without a slot map")?;
        let base_raw = slots
            .get(&variable.slot)
            .and_then(|v| v.as_scalar())
            .with_context(|| format!("bytes variable {} missing its base word", variable.name))?;
        let base_word = parse_word(base_raw)?;
        let (is_long, len) = slot_math::bytes_encoding(&alloy::primitives::B256::from(base_word));

        let mut payload = Vec::with_capacity(len as usize);
        if is_long {
            for (slot, raw) in sorted_numeric(slots)? {
                if *slot == variable.slot {
                    continue;
                }
                let word = parse_word(raw.as_scalar().context("bytes data slot not scalar")?)?;
                payload.extend_from_slice(&word);
            }
        } else {
            payload.extend_from_slice(&base_word);
        }
        payload.truncate(len as usize);

        let rendered = if as_utf8 {
            String::from_utf8_lossy(&payload).into_owned()
        } else {
            format!("0x{}", hex::encode(&payload))
        };
        Ok(DecodedValue::Scalar(rendered))
    }

    fn decode_struct(&self, variable: &StorageVariable, type_id: &str) -> Result<DecodedValue> {
        let info = self.declaration.type_info(type_id)?;
        let members = info
            .members
            .as_ref()
            .with_context(|| format!("struct type {type_id} has no member declarations"))?;
        let base = slot_math::parse_slot(&variable.slot)?;
        let slots = variable
            .value
            .as_slots()
            .context("struct variable without a slot map")?;

        let mut decoded = BTreeMap::new();
        for (slot, raw) in slots {
            let absolute = slot_math::parse_slot(slot)?;
            let word = parse_word(raw.as_scalar().context("struct slot not scalar")?)?;

            let mut parts = Vec::new();
            for member in members {
                let member_slot = base + slot_math::parse_slot(&member.slot)?;
                if member_slot != absolute {
                    continue;
                }
                let member_info = self.declaration.type_info(&member.type_id)?;
                let width = member_info.byte_width()? as usize;
                let rendered = match TypeTag::parse(&member.type_id)? {
                    TypeTag::Elementary(ty) if width <= 32 => {
                        decode_scalar(&word, ty, member.offset as usize, width)?.render()
                    }
                    // Composite members keep their raw word here; their own
                    // region is not part of this variable's slot map.
                    _ => format!("0x{}", hex::encode(word)),
                };
                parts.push(format!("{}: {}", member.label, rendered));
            }
            let rendered = if parts.is_empty() {
                format!("0x{}", hex::encode(word))
            } else {
                parts.join(", ")
            };
            decoded.insert(slot.clone(), DecodedValue::Scalar(rendered));
        }
        Ok(DecodedValue::Slots(decoded))
    }
}

fn raw_passthrough(value: &SlotValue) -> DecodedValue {
    match value {
        SlotValue::Scalar(s) => DecodedValue::Scalar(s.clone()),
        SlotValue::Slots(m) => {
            DecodedValue::Slots(m.iter().map(|(k, v)| (k.clone(), raw_passthrough(v))).collect())
        }
    }
}

fn parse_word(raw: &str) -> Result<[u8; 32]> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_part).with_context(|| format!("invalid slot word {raw}"))?;
    if bytes.len() > 32 {
        bail!("slot word longer than 32 bytes: {raw}");
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}

/// Slot-keyed maps sort lexicographically; decoding needs numeric order.
fn sorted_numeric<'m>(
    slots: &'m BTreeMap<String, SlotValue>,
) -> Result<Vec<(&'m String, &'m SlotValue)>> {
    let mut entries: Vec<(U256, (&'m String, &'m SlotValue))> = slots
        .iter()
        .map(|(k, v)| Ok((slot_math::parse_slot(k)?, (k, v))))
        .collect::<Result<_>>()?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries.into_iter().map(|(_, kv)| kv).collect())
}
