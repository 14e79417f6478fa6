// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Slot-hash derivation helpers: mapping-entry slot hashes (`keccak256(key
//! ++ slot)`, iterated for nested mappings) and the hashed-key closure the
//! keys lookup cache maintains over its map, following the same
//! concat-then-keccak construction this codebase already uses to derive
//! `StorageMap` entry slots from a root slot and a key.

use alloy_primitives::{keccak256, B256};
use diffwatch_types::KeysMap;

/// Computes the slot hash for one level of mapping indirection:
/// `keccak256(concat(padded_key, padded_slot_index))`. Call iteratively,
/// feeding each result back in as `slot_index`, to resolve nested mappings.
pub fn mapping_slot_hash(padded_key: B256, slot_index: B256) -> B256 {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(padded_key.as_slice());
    preimage[32..].copy_from_slice(slot_index.as_slice());
    keccak256(preimage)
}

/// Returns `map` augmented with, for every `(hash, metadata)` pair, an
/// additional `(keccak256(hash), metadata)` pair — the closure some diff
/// sources require because they observe slots by their hashed identity.
/// Idempotent: hashing an already-hashed key a second time simply adds a
/// third binding nothing will ever look up, so re-running this over its own
/// output is harmless.
pub fn add_hashed_keys(map: KeysMap) -> KeysMap {
    let mut out = map.clone();
    for (hash, metadata) in map {
        out.entry(keccak256(hash)).or_insert(metadata);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use diffwatch_types::{ValueMetadata, ValueType};

    #[test]
    fn add_hashed_keys_is_closed_under_keccak() {
        let hash = B256::repeat_byte(7);
        let mut map = KeysMap::new();
        map.insert(hash, ValueMetadata::new("n", ValueType::Uint256));

        let closed = add_hashed_keys(map);
        assert!(closed.contains_key(&hash));
        assert!(closed.contains_key(&keccak256(hash)));
        assert_eq!(closed.get(&hash), closed.get(&keccak256(hash)));
    }

    #[test]
    fn mapping_slot_hash_matches_manual_concat() {
        let key = B256::repeat_byte(1);
        let slot = B256::repeat_byte(2);
        let mut preimage = Vec::with_capacity(64);
        preimage.extend_from_slice(key.as_slice());
        preimage.extend_from_slice(slot.as_slice());
        assert_eq!(mapping_slot_hash(key, slot), keccak256(preimage));
    }
}
