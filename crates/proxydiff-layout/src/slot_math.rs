//! Slot arithmetic for Solidity's flat storage layout.
//!
//! All the addressing rules live here: packed elements per slot, contiguous
//! element regions, keccak-derived data regions for dynamic arrays and long
//! bytes/strings, and the short/long encoding flag carried in the lowest byte
//! of a bytes/string base word.

use alloy::primitives::{keccak256, B256, U256};
use anyhow::{bail, Context, Result};

/// Parse a slot given either as a decimal index (`"3"`) or as a precomputed
/// 32-byte key (`"0xabc..."`).
pub fn parse_slot(slot: &str) -> Result<U256> {
    let slot = slot.trim();
    if let Some(hex) = slot.strip_prefix("0x").or_else(|| slot.strip_prefix("0X")) {
        U256::from_str_radix(hex, 16).with_context(|| format!("invalid hex slot {slot}"))
    } else {
        U256::from_str_radix(slot, 10).with_context(|| format!("invalid decimal slot {slot}"))
    }
}

/// 32-byte big-endian key for a slot index.
pub fn slot_key(slot: U256) -> B256 {
    B256::from(slot)
}

/// Render a 32-byte word as lowercase 0x-prefixed hex.
pub fn format_word(word: &B256) -> String {
    format!("0x{}", hex::encode(word.as_slice()))
}

/// Render a keccak-derived slot as a full-width hex key.
pub fn format_slot_hex(slot: U256) -> String {
    format!("0x{}", hex::encode(slot.to_be_bytes::<32>()))
}

/// Base of the data region for a dynamic array or long bytes/string value:
/// `keccak256(uint256(slot))`.
pub fn data_base_slot(slot: U256) -> U256 {
    U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0)
}

/// How many elements of the given byte width share one slot.
///
/// Elements never straddle a slot boundary; values wider than a slot get
/// their own slot span.
pub fn elements_per_slot(elem_width: u64) -> Result<u64> {
    if elem_width == 0 {
        bail!("element width of zero bytes");
    }
    if elem_width >= 32 {
        Ok(1)
    } else {
        Ok(32 / elem_width)
    }
}

/// Number of slots occupied by `len` contiguous elements of `elem_width`
/// bytes, per the packing rule.
pub fn slots_for_elements(len: u64, elem_width: u64) -> Result<u64> {
    if elem_width > 32 {
        // Each element spans whole slots on its own.
        Ok(len * elem_width.div_ceil(32))
    } else {
        let per_slot = elements_per_slot(elem_width)?;
        Ok(len.div_ceil(per_slot))
    }
}

/// The `count` slots from `base` upwards.
pub fn contiguous_slots(base: U256, count: u64) -> Vec<U256> {
    (0..count).map(|i| base + U256::from(i)).collect()
}

/// Interpret the base word of a bytes/string variable.
///
/// Returns `(is_long, byte_length)`: an even lowest byte marks the short
/// form (payload in place, length in the lowest byte / 2); an odd lowest
/// byte marks the long form (length = (word - 1) / 2, payload at
/// `keccak256(slot)`).
pub fn bytes_encoding(word: &B256) -> (bool, u64) {
    let lowest = word.as_slice()[31];
    if lowest % 2 == 0 {
        (false, (lowest / 2) as u64)
    } else {
        let len = (U256::from_be_bytes(word.0) - U256::from(1u64)) / U256::from(2u64);
        (true, len.saturating_to::<u64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slot_accepts_both_forms() {
        assert_eq!(parse_slot("7").unwrap(), U256::from(7u64));
        assert_eq!(parse_slot(" 12 ").unwrap(), U256::from(12u64));
        let key = "0x000000000000000000000000000000000000000000000000000000000000000a";
        assert_eq!(parse_slot(key).unwrap(), U256::from(10u64));
        assert!(parse_slot("not-a-slot").is_err());
    }

    #[test]
    fn test_data_base_slot_matches_keccak_of_padded_index() {
        // keccak256(bytes32(2)) is the well-known data base for slot 2.
        let base = data_base_slot(U256::from(2u64));
        assert_eq!(
            format_slot_hex(base),
            "0x405787fa12a823e0f2b7631cc41b3ba8828b3321ca811111fa75cd3aa3bb5ace"
        );
    }

    #[test]
    fn test_packing_arithmetic() {
        assert_eq!(elements_per_slot(32).unwrap(), 1);
        assert_eq!(elements_per_slot(16).unwrap(), 2);
        assert_eq!(elements_per_slot(1).unwrap(), 32);
        // 20-byte elements do not divide evenly: one per slot.
        assert_eq!(elements_per_slot(20).unwrap(), 1);
        assert!(elements_per_slot(0).is_err());

        assert_eq!(slots_for_elements(5, 32).unwrap(), 5);
        assert_eq!(slots_for_elements(5, 16).unwrap(), 3);
        assert_eq!(slots_for_elements(64, 1).unwrap(), 2);
        // 64-byte struct elements: two slots each.
        assert_eq!(slots_for_elements(3, 64).unwrap(), 6);
    }

    #[test]
    fn test_bytes_encoding_flag() {
        // Short form: "abc" stored in place, lowest byte = 2 * len = 6.
        let mut short = [0u8; 32];
        short[0] = b'a';
        short[1] = b'b';
        short[2] = b'c';
        short[31] = 6;
        let (is_long, len) = bytes_encoding(&B256::from(short));
        assert!(!is_long);
        assert_eq!(len, 3);

        // Long form: length 50 stored as 2 * 50 + 1.
        let word = B256::from(U256::from(101u64));
        let (is_long, len) = bytes_encoding(&word);
        assert!(is_long);
        assert_eq!(len, 50);
    }
}
