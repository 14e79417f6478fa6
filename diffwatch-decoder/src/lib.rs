// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Interprets a raw 32-byte storage word according to a [`ValueMetadata`]
//! descriptor.
//!
//! Non-packed integer types always consume the full 32 bytes as a
//! big-endian unsigned integer, regardless of their declared width; the
//! width tag carries documentary meaning only. This matches the behavior of
//! the system this was modeled on and is preserved here rather than
//! "fixed": slot values are always right-aligned, so truncating to the
//! declared width would silently drop real on-chain data for any slot
//! whose value happens to exceed it.

use std::collections::BTreeMap;

use alloy_primitives::B256;
use diffwatch_types::{Decoded, ValueMetadata, ValueType};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown value type")]
    UnknownType,
    #[error("packed slot widths sum to {total} bytes, exceeding the 32-byte word")]
    WidthOverflow { total: usize },
    #[error("packed slot metadata lists no fields")]
    EmptyPackedList,
}

/// Decodes a raw 32-byte storage word per `metadata.value_type`.
pub fn decode(value: B256, metadata: &ValueMetadata) -> Result<Decoded, DecodeError> {
    decode_value_type(value, &metadata.value_type)
}

fn decode_value_type(value: B256, value_type: &ValueType) -> Result<Decoded, DecodeError> {
    match value_type {
        ValueType::Uint256 | ValueType::Uint128 | ValueType::Uint48 | ValueType::Uint32 => {
            Ok(Decoded::Single(decode_uint(value.as_slice())))
        }
        ValueType::Address => Ok(Decoded::Single(decode_address(value.as_slice()))),
        ValueType::Bytes32 => Ok(Decoded::Single(format!("0x{}", hex::encode(value)))),
        ValueType::PackedSlot(fields) => decode_packed(value, fields),
    }
}

/// Renders the full word as an unbounded-precision decimal string, leading
/// zeros stripped.
fn decode_uint(bytes: &[u8]) -> String {
    alloy_primitives::U256::from_be_slice(bytes).to_string()
}

/// Takes the low-order 20 bytes as a `0x`-prefixed lowercase hex address.
fn decode_address(bytes: &[u8]) -> String {
    let low20 = &bytes[bytes.len() - 20..];
    format!("0x{}", hex::encode(low20))
}

fn decode_packed(
    value: B256,
    fields: &BTreeMap<u32, ValueType>,
) -> Result<Decoded, DecodeError> {
    if fields.is_empty() {
        return Err(DecodeError::EmptyPackedList);
    }

    let word = value.as_slice();
    let mut out = BTreeMap::new();
    let mut consumed = 0usize;

    // `BTreeMap` iterates in ascending key order, i.e. ascending position.
    for (&position, field_type) in fields {
        if field_type.is_packed() {
            return Err(DecodeError::UnknownType);
        }
        let width = field_type
            .byte_width()
            .ok_or(DecodeError::UnknownType)?;
        consumed += width;
        if consumed > 32 {
            return Err(DecodeError::WidthOverflow { total: consumed });
        }

        // Field 0 occupies the lowest (rightmost) bytes of the word; later
        // positions sit progressively higher.
        let start = 32 - consumed;
        let end = 32 - (consumed - width);
        let slice = &word[start..end];

        let mut promoted = [0u8; 32];
        promoted[32 - width..].copy_from_slice(slice);
        let decoded = decode_value_type(B256::from(promoted), field_type)?;
        match decoded {
            Decoded::Single(s) => {
                out.insert(position, s);
            }
            Decoded::Multi(_) => return Err(DecodeError::UnknownType),
        }
    }

    Ok(Decoded::Multi(out))
}
