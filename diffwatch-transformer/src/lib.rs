// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Per-contract transformer: resolves a diff's storage key to its metadata,
//! decodes its value, and persists the resulting row.
//!
//! Transitions per diff: `received -> resolved -> decoded -> persisted`, or
//! on failure a transition to `failed-recoverable` (key not yet known,
//! persistence hiccup — the watcher will retry) or `failed-fatal` (a
//! decode error, which indicates a metadata bug and is never retried).

use async_trait::async_trait;
use diffwatch_decoder::{decode, DecodeError};
use diffwatch_keys::{KeyNotFound, KeysLoader, KeysLookup, LookupError};
use diffwatch_persistence::{PersistenceError, PersistenceHandle};
use diffwatch_types::{ContractAddress, DecodedRecord, PersistedDiff};
use std::sync::Arc;

/// A recoverable failure: the watcher should enqueue the diff for a later
/// retry.
#[derive(Debug, thiserror::Error)]
pub enum RecoverableTransformError {
    #[error("storage key not yet resolvable: {0}")]
    KeyNotFound(#[from] KeyNotFound),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// A fatal failure: a metadata bug. The watcher logs and discards; retrying
/// would never succeed.
#[derive(Debug, thiserror::Error)]
pub enum FatalTransformError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Recoverable(#[from] RecoverableTransformError),
    #[error(transparent)]
    Fatal(#[from] FatalTransformError),
}

impl TransformError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransformError::Recoverable(_))
    }
}

impl From<LookupError> for TransformError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound(key_not_found) => {
                TransformError::Recoverable(RecoverableTransformError::KeyNotFound(key_not_found))
            }
            LookupError::Load(load_err) => TransformError::Recoverable(
                RecoverableTransformError::Persistence(PersistenceError::TransactionFailed(
                    load_err.to_string(),
                )),
            ),
        }
    }
}

/// One transformer instance per watched contract address. `Sync` is
/// required so the registry that holds these (the watcher) can itself be
/// `Sync` and run its loop from behind an `Arc`, even though in practice a
/// given transformer is only ever driven by one task at a time.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn contract_address(&self) -> ContractAddress;

    async fn execute(&self, diff: PersistedDiff) -> Result<(), TransformError>;
}

/// Reusable transformer: wires a [`KeysLookup`], the slot decoder, and a
/// [`PersistenceHandle`] write exactly per the execute algorithm, so each
/// watched contract need only supply its loader and output table name.
pub struct GenericTransformer<L: KeysLoader> {
    contract_address: ContractAddress,
    table: String,
    lookup: KeysLookup<L>,
    store: Arc<dyn PersistenceHandle>,
}

impl<L: KeysLoader> GenericTransformer<L> {
    pub fn new(
        contract_address: ContractAddress,
        table: impl Into<String>,
        loader: L,
        store: Arc<dyn PersistenceHandle>,
    ) -> Self {
        Self {
            contract_address,
            table: table.into(),
            lookup: KeysLookup::new(loader),
            store,
        }
    }
}

#[async_trait]
impl<L: KeysLoader> Transformer for GenericTransformer<L> {
    fn contract_address(&self) -> ContractAddress {
        self.contract_address
    }

    async fn execute(&self, diff: PersistedDiff) -> Result<(), TransformError> {
        let metadata = self.lookup.lookup(diff.diff.storage_key).await?;

        let decoded = decode(diff.diff.storage_value, &metadata)
            .map_err(FatalTransformError::from)?;

        let record = DecodedRecord {
            block_height: diff.diff.block_height,
            block_hash: diff.diff.block_hash,
            name: metadata.name.clone(),
            keys: metadata.keys.clone(),
            decoded,
            field_names: metadata.packed_names.clone(),
        };

        self.store
            .insert_decoded_row(&self.table, diff.id, record)
            .await
            .map_err(RecoverableTransformError::from)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};
    use async_trait::async_trait;
    use diffwatch_keys::StaticKeysLoader;
    use diffwatch_types::{KeysMap, RawDiff, ValueMetadata, ValueType};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        rows: Mutex<Vec<(String, u64, DecodedRecord)>>,
    }

    #[async_trait]
    impl PersistenceHandle for RecordingStore {
        async fn insert_raw_diff(
            &self,
            diff: diffwatch_types::RawDiff,
        ) -> Result<PersistedDiff, PersistenceError> {
            Ok(PersistedDiff { id: 1, diff })
        }

        async fn insert_decoded_row(
            &self,
            table: &str,
            diff_id: u64,
            record: DecodedRecord,
        ) -> Result<(), PersistenceError> {
            self.rows
                .lock()
                .unwrap()
                .push((table.to_string(), diff_id, record));
            Ok(())
        }
    }

    fn diff_with_key(key: B256, value: B256) -> PersistedDiff {
        PersistedDiff {
            id: 9,
            diff: RawDiff {
                contract_address: Address::repeat_byte(1),
                block_height: 100,
                block_hash: B256::repeat_byte(2),
                storage_key: key,
                storage_value: value,
            },
        }
    }

    #[tokio::test]
    async fn unknown_key_is_recoverable() {
        let store = Arc::new(RecordingStore::default());
        let loader = StaticKeysLoader::new(KeysMap::new());
        let transformer = GenericTransformer::new(Address::repeat_byte(1), "rows", loader, store);

        let err = transformer
            .execute(diff_with_key(B256::repeat_byte(9), B256::ZERO))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn known_key_decodes_and_persists() {
        let key = B256::repeat_byte(5);
        let mut keys = KeysMap::new();
        keys.insert(key, ValueMetadata::new("balance", ValueType::Uint256));
        let store = Arc::new(RecordingStore::default());
        let loader = StaticKeysLoader::new(keys);
        let transformer = GenericTransformer::new(Address::repeat_byte(1), "rows", loader, store.clone());

        transformer
            .execute(diff_with_key(key, B256::from(alloy_primitives::U256::from(7))))
            .await
            .unwrap();

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "rows");
        assert_eq!(rows[0].1, 9);
    }

    #[tokio::test]
    async fn packed_slot_carries_field_names_into_the_record() {
        let key = B256::repeat_byte(5);
        let mut fields = std::collections::BTreeMap::new();
        fields.insert(0, ValueType::Uint48);
        fields.insert(1, ValueType::Uint48);
        let mut packed_names = std::collections::BTreeMap::new();
        packed_names.insert(0, "cooldown".to_string());
        packed_names.insert(1, "balance".to_string());

        let mut keys = KeysMap::new();
        keys.insert(
            key,
            ValueMetadata::new("packed", ValueType::PackedSlot(fields)).with_packed_names(packed_names.clone()),
        );
        let store = Arc::new(RecordingStore::default());
        let loader = StaticKeysLoader::new(keys);
        let transformer = GenericTransformer::new(Address::repeat_byte(1), "rows", loader, store.clone());

        transformer
            .execute(diff_with_key(key, B256::ZERO))
            .await
            .unwrap();

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows[0].2.field_names, packed_names);
    }

    #[tokio::test]
    async fn decode_error_is_fatal_not_recoverable() {
        let key = B256::repeat_byte(5);
        let mut keys = KeysMap::new();
        keys.insert(
            key,
            ValueMetadata::new("packed", ValueType::PackedSlot(Default::default())),
        );
        let store = Arc::new(RecordingStore::default());
        let loader = StaticKeysLoader::new(keys);
        let transformer = GenericTransformer::new(Address::repeat_byte(1), "rows", loader, store);

        let err = transformer
            .execute(diff_with_key(key, B256::ZERO))
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }
}
