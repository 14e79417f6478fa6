// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Resolves a raw slot hash to its [`ValueMetadata`], including the
//! dynamically computed mapping keys a [`KeysLoader`] enumerates, and
//! memoizes that resolution behind a refresh-once-then-retry cache.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use diffwatch_persistence::{PersistenceError, PersistenceHandle};
use diffwatch_types::{ContractAddress, KeysMap, SlotHash, ValueMetadata};

mod hashing;
pub use hashing::{add_hashed_keys, mapping_slot_hash};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("persistence error while loading keys: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("loader produced malformed metadata: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("key not found: {key}")]
pub struct KeyNotFound {
    pub key: SlotHash,
}

/// Enumerates all currently known slot-hash → metadata bindings for one
/// contract. Expected to be idempotent and complete as of call time: two
/// calls in quick succession yield the same map modulo new on-chain
/// activity.
#[async_trait]
pub trait KeysLoader: Send + Sync {
    async fn load(&self) -> Result<KeysMap, LoadError>;

    /// Retargets the loader at a new persistence handle.
    fn bind_store(&mut self, store: Arc<dyn PersistenceHandle>);
}

/// A loader over a fixed, precomputed [`KeysMap`]. Useful for contracts
/// whose metadata is wholly static, and in tests.
#[derive(Clone)]
pub struct StaticKeysLoader {
    keys: KeysMap,
}

impl StaticKeysLoader {
    pub fn new(keys: KeysMap) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeysLoader for StaticKeysLoader {
    async fn load(&self) -> Result<KeysMap, LoadError> {
        Ok(self.keys.clone())
    }

    fn bind_store(&mut self, _store: Arc<dyn PersistenceHandle>) {}
}

/// The production loader shape: queries the bound persistence handle for
/// one contract's previously-seen keys on every refresh, the way the
/// original watcher's per-contract loader queried its own backing table.
/// Must be bound with [`KeysLoader::bind_store`] before its first `load`.
pub struct PersistenceBackedKeysLoader {
    contract: ContractAddress,
    store: Option<Arc<dyn PersistenceHandle>>,
}

impl PersistenceBackedKeysLoader {
    pub fn new(contract: ContractAddress) -> Self {
        Self {
            contract,
            store: None,
        }
    }
}

#[async_trait]
impl KeysLoader for PersistenceBackedKeysLoader {
    async fn load(&self) -> Result<KeysMap, LoadError> {
        let store = self.store.as_ref().ok_or_else(|| {
            LoadError::Malformed("loader used before a persistence handle was bound".into())
        })?;
        Ok(store.load_keys_map(self.contract).await?)
    }

    fn bind_store(&mut self, store: Arc<dyn PersistenceHandle>) {
        self.store = Some(store);
    }
}

/// Memoizes [`KeysLoader`] output. On a miss, refreshes once (replacing the
/// cached map wholesale, augmented by its hashed-key closure) and retries
/// the lookup; a second consecutive miss surfaces [`KeyNotFound`] without a
/// second refresh.
///
/// The cache is guarded by a `Mutex` rather than a `RefCell`: a transformer
/// is driven by a single task at a time, but the `Watcher` that holds it
/// needs to be `Sync` to run its own loop from behind an `Arc` (e.g. spawned
/// onto its own task), and a `RefCell` would make the whole registry
/// `!Sync`. The critical sections here are a plain map lookup/replace, never
/// held across an `.await`, so the lock never contends with the loader call
/// itself.
pub struct KeysLookup<L: KeysLoader> {
    loader: L,
    mappings: Mutex<Option<KeysMap>>,
}

impl<L: KeysLoader> KeysLookup<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            mappings: Mutex::new(None),
        }
    }

    pub async fn lookup(&self, key: SlotHash) -> Result<ValueMetadata, LookupError> {
        if let Some(metadata) = self.cached(key) {
            return Ok(metadata);
        }
        self.refresh().await?;
        self.cached(key).ok_or(LookupError::NotFound(KeyNotFound { key }))
    }

    fn cached(&self, key: SlotHash) -> Option<ValueMetadata> {
        let guard = self.mappings.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_ref()?.get(&key).cloned()
    }

    async fn refresh(&self) -> Result<(), LoadError> {
        let loaded = self.loader.load().await?;
        let mut guard = self.mappings.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(add_hashed_keys(loaded));
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    NotFound(#[from] KeyNotFound),
}

impl LookupError {
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use diffwatch_types::ValueType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: AtomicUsize,
        keys: KeysMap,
    }

    #[async_trait]
    impl KeysLoader for CountingLoader {
        async fn load(&self) -> Result<KeysMap, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.keys.clone())
        }

        fn bind_store(&mut self, _store: Arc<dyn PersistenceHandle>) {}
    }

    fn sample_keys() -> (SlotHash, KeysMap) {
        let hash = B256::repeat_byte(0x42);
        let mut keys = KeysMap::new();
        keys.insert(hash, ValueMetadata::new("balance", ValueType::Uint256));
        (hash, keys)
    }

    #[tokio::test]
    async fn miss_then_hit_refreshes_exactly_once() {
        let (hash, keys) = sample_keys();
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            keys,
        };
        let lookup = KeysLookup::new(loader);

        assert!(lookup.lookup(hash).await.is_ok());
        assert!(lookup.lookup(hash).await.is_ok());
        assert_eq!(lookup.loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn two_consecutive_misses_refresh_only_once() {
        let (_hash, keys) = sample_keys();
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            keys,
        };
        let lookup = KeysLookup::new(loader);

        let missing = B256::repeat_byte(0x99);
        let err = lookup.lookup(missing).await.unwrap_err();
        assert!(err.is_key_not_found());
        assert_eq!(lookup.loader.calls.load(Ordering::SeqCst), 1);
    }

    // Property 4: lookup by the plain hash or its keccak256 resolves to the
    // same metadata.
    #[tokio::test]
    async fn hashed_form_resolves_to_same_metadata() {
        let (hash, keys) = sample_keys();
        let loader = StaticKeysLoader::new(keys);
        let lookup = KeysLookup::new(loader);

        let by_plain = lookup.lookup(hash).await.unwrap();
        let hashed = alloy_primitives::keccak256(hash);
        let by_hashed = lookup.lookup(hashed).await.unwrap();
        assert_eq!(by_plain, by_hashed);
    }

    struct StubStore {
        keys: KeysMap,
    }

    #[async_trait]
    impl PersistenceHandle for StubStore {
        async fn insert_raw_diff(
            &self,
            diff: diffwatch_types::RawDiff,
        ) -> Result<diffwatch_types::PersistedDiff, PersistenceError> {
            Ok(diffwatch_types::PersistedDiff { id: 1, diff })
        }

        async fn insert_decoded_row(
            &self,
            _table: &str,
            _diff_id: u64,
            _record: diffwatch_types::DecodedRecord,
        ) -> Result<(), PersistenceError> {
            Ok(())
        }

        async fn load_keys_map(
            &self,
            _contract: ContractAddress,
        ) -> Result<KeysMap, PersistenceError> {
            Ok(self.keys.clone())
        }
    }

    #[tokio::test]
    async fn persistence_backed_loader_requires_bind_before_use() {
        let loader = PersistenceBackedKeysLoader::new(ContractAddress::repeat_byte(1));
        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, LoadError::Malformed(_)));
    }

    #[tokio::test]
    async fn persistence_backed_loader_queries_bound_store() {
        let (hash, keys) = sample_keys();
        let mut loader = PersistenceBackedKeysLoader::new(ContractAddress::repeat_byte(1));
        loader.bind_store(Arc::new(StubStore { keys }));

        let loaded = loader.load().await.unwrap();
        assert!(loaded.contains_key(&hash));
    }
}
