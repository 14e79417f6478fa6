// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Domain types shared by every stage of the storage-diff pipeline: the raw
//! diff as observed on the wire, the persisted diff once the store has
//! assigned it an id, the value-type descriptors that drive decoding, and
//! the decoded output shape.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// 20-byte contract address, as seen by the EVM.
pub type ContractAddress = Address;

/// 32-byte block hash.
pub type BlockHash = B256;

/// 32-byte slot identifier, in either its plain or keccak-hashed form (see
/// [`ValueMetadata`] and the key-lookup cache for the closure between the
/// two).
pub type SlotHash = B256;

/// A single observed storage mutation, immutable after capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiff {
    pub contract_address: ContractAddress,
    pub block_height: u64,
    pub block_hash: BlockHash,
    pub storage_key: SlotHash,
    pub storage_value: B256,
}

/// A [`RawDiff`] that has been assigned a durable, monotonic id by the
/// persistence layer. Every `RawDiff` becomes a `PersistedDiff` before a
/// [`Transformer`](https://docs.rs/diffwatch-transformer) sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDiff {
    pub id: u64,
    pub diff: RawDiff,
}

impl PersistedDiff {
    pub fn contract_address(&self) -> ContractAddress {
        self.diff.contract_address
    }
}

/// The closed set of value shapes a storage slot can decode to.
///
/// A `PackedSlot` carries an ordered mapping from position-index to the
/// (non-packed) type describing each sub-field, low-to-high within the
/// 32-byte word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Uint256,
    Uint128,
    Uint48,
    Uint32,
    Address,
    Bytes32,
    PackedSlot(BTreeMap<u32, ValueType>),
}

impl ValueType {
    /// Byte width of a non-packed type, used both to size a packed field's
    /// slice and as documentary metadata for standalone slots (see the
    /// decoder's width-fidelity note: standalone slots always decode the
    /// full word regardless of this width).
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            ValueType::Uint256 => Some(32),
            ValueType::Uint128 => Some(16),
            ValueType::Uint48 => Some(6),
            ValueType::Uint32 => Some(4),
            ValueType::Address => Some(20),
            ValueType::Bytes32 => Some(32),
            ValueType::PackedSlot(_) => None,
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, ValueType::PackedSlot(_))
    }
}

/// A concrete key-value binding for a mapping-backed slot, e.g. `{"owner":
/// "0xabc..."}` for `balances[owner]`.
pub type KeyBindings = BTreeMap<String, String>;

/// The semantic meaning of one slot: what to call it in the output row,
/// which mapping keys (if any) produced it, how to decode its bytes, and —
/// for a `PackedSlot` — what to call each of its sub-fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMetadata {
    pub name: String,
    pub keys: KeyBindings,
    pub value_type: ValueType,
    /// Position → field name, present iff `value_type` is `PackedSlot`.
    /// Empty otherwise. Lets a transformer turn the decoder's
    /// position-indexed [`Decoded::Multi`] output into the name→scalar
    /// bindings a packed slot's output row actually needs, one per
    /// sub-field.
    pub packed_names: BTreeMap<u32, String>,
}

impl ValueMetadata {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            keys: KeyBindings::new(),
            value_type,
            packed_names: BTreeMap::new(),
        }
    }

    pub fn with_keys(mut self, keys: KeyBindings) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_packed_names(mut self, packed_names: BTreeMap<u32, String>) -> Self {
        self.packed_names = packed_names;
        self
    }
}

/// Mapping from slot hash to its semantic metadata. Closed under the
/// hashed-key operation: every key present implies its keccak256 is also
/// present, bound to the same metadata (see `diffwatch-keys`).
pub type KeysMap = BTreeMap<SlotHash, ValueMetadata>;

/// The decoder's output: either a single scalar (non-packed slots) or a
/// position-indexed set of scalars (packed slots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decoded {
    Single(String),
    Multi(BTreeMap<u32, String>),
}

/// A decoded slot, ready to be written as a structured row: which block it
/// came from, what it's called, which mapping keys (if any) selected it, and
/// its decoded value(s).
///
/// For a packed slot, `decoded` is a [`Decoded::Multi`] keyed by position;
/// `field_names` carries the same positions' names (copied from the
/// originating [`ValueMetadata::packed_names`]) so a writer can produce one
/// name→scalar binding per position instead of a bare index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub block_height: u64,
    pub block_hash: BlockHash,
    pub name: String,
    pub keys: KeyBindings,
    pub decoded: Decoded,
    pub field_names: BTreeMap<u32, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_diff_exposes_contract_address() {
        let diff = RawDiff {
            contract_address: Address::repeat_byte(0x11),
            block_height: 1,
            block_hash: B256::ZERO,
            storage_key: B256::ZERO,
            storage_value: B256::ZERO,
        };
        let persisted = PersistedDiff { id: 7, diff };
        assert_eq!(persisted.contract_address(), Address::repeat_byte(0x11));
    }

    #[test]
    fn byte_width_matches_declared_type() {
        assert_eq!(ValueType::Uint256.byte_width(), Some(32));
        assert_eq!(ValueType::Uint128.byte_width(), Some(16));
        assert_eq!(ValueType::Uint48.byte_width(), Some(6));
        assert_eq!(ValueType::Uint32.byte_width(), Some(4));
        assert_eq!(ValueType::Address.byte_width(), Some(20));
        assert_eq!(ValueType::Bytes32.byte_width(), Some(32));
        assert_eq!(ValueType::PackedSlot(BTreeMap::new()).byte_width(), None);
    }

    #[test]
    fn raw_diff_round_trips_through_json() {
        let diff = RawDiff {
            contract_address: Address::repeat_byte(0x42),
            block_height: 19_000_000,
            block_hash: B256::repeat_byte(0x01),
            storage_key: B256::repeat_byte(0x02),
            storage_value: B256::repeat_byte(0x03),
        };
        let json = serde_json::to_string(&diff).unwrap();
        let round_tripped: RawDiff = serde_json::from_str(&json).unwrap();
        assert_eq!(diff, round_tripped);
    }

    #[test]
    fn value_metadata_round_trips_through_json() {
        let mut fields = BTreeMap::new();
        fields.insert(0, ValueType::Uint48);
        fields.insert(1, ValueType::Address);
        let mut keys = KeyBindings::new();
        keys.insert("owner".to_string(), "0xabc".to_string());
        let mut packed_names = BTreeMap::new();
        packed_names.insert(0, "expiry".to_string());
        packed_names.insert(1, "owner".to_string());
        let metadata = ValueMetadata::new("balances", ValueType::PackedSlot(fields))
            .with_keys(keys)
            .with_packed_names(packed_names);

        let json = serde_json::to_string(&metadata).unwrap();
        let round_tripped: ValueMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata, round_tripped);
    }
}
