// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Abstract persistence surface the core depends on. No SQL, no schema, no
//! connection pool lives here — only the transactional operations the
//! watcher, the transformers, and the keys loaders need. A concrete
//! realization (a relational store, in the expected deployment) lives
//! outside this crate and implements [`PersistenceHandle`] and
//! [`RetryQueue`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use diffwatch_types::{ContractAddress, DecodedRecord, KeysMap, PersistedDiff, RawDiff};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("backing store is unavailable: {0}")]
    Unavailable(String),
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
}

/// Abstract transactional store for diffs and decoded rows.
///
/// Each method corresponds to one of the core's required operations:
/// assigning an id to a raw diff, writing a decoded row into a
/// transformer-declared table, and the retry-queue CRUD exposed separately
/// by [`RetryQueue`].
#[async_trait]
pub trait PersistenceHandle: Send + Sync {
    /// Persists a [`RawDiff`], returning the durable id assigned to it.
    async fn insert_raw_diff(&self, diff: RawDiff) -> Result<PersistedDiff, PersistenceError>;

    /// Persists a decoded row into the named, transformer-declared table.
    /// Must be idempotent on `(diff_id, record.name)`.
    async fn insert_decoded_row(
        &self,
        table: &str,
        diff_id: u64,
        record: DecodedRecord,
    ) -> Result<(), PersistenceError>;

    /// Enumerates the currently known slot-hash → metadata bindings for a
    /// contract, the generalization of the per-contract metadata query
    /// (e.g. a "cup"/"vault" table scan) a [`diffwatch_keys::KeysLoader`]
    /// backed by a real store performs. Defaults to an empty map so test
    /// doubles that only exercise diff/row persistence need not implement
    /// it.
    async fn load_keys_map(&self, _contract: ContractAddress) -> Result<KeysMap, PersistenceError> {
        Ok(KeysMap::new())
    }
}

/// Durable set of diffs whose transformation previously failed
/// recoverably. Capacity is unbounded by design; a backing implementation
/// may impose backpressure but must preserve existing entries.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Stores `diff`. Idempotent on `diff.id`.
    async fn add(&self, diff: PersistedDiff) -> Result<(), PersistenceError>;

    /// Enumerates all queued diffs, in unspecified order.
    async fn get_all(&self) -> Result<Vec<PersistedDiff>, PersistenceError>;

    /// Removes the entry with the given id. A no-op if absent.
    async fn delete(&self, id: u64) -> Result<(), PersistenceError>;
}

/// Reference, in-process [`RetryQueue`] implementation. Used by the
/// watcher's own test suite and as a drop-in for callers with no durable
/// backing store of their own.
#[derive(Debug, Default)]
pub struct InMemoryRetryQueue {
    entries: Mutex<BTreeMap<u64, PersistedDiff>>,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn add(&self, diff: PersistedDiff) -> Result<(), PersistenceError> {
        self.entries
            .lock()
            .map_err(|_| PersistenceError::Unavailable("retry queue lock poisoned".into()))?
            .insert(diff.id, diff);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<PersistedDiff>, PersistenceError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| PersistenceError::Unavailable("retry queue lock poisoned".into()))?
            .values()
            .copied()
            .collect())
    }

    async fn delete(&self, id: u64) -> Result<(), PersistenceError> {
        self.entries
            .lock()
            .map_err(|_| PersistenceError::Unavailable("retry queue lock poisoned".into()))?
            .remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};

    fn sample_diff(id: u64) -> PersistedDiff {
        PersistedDiff {
            id,
            diff: RawDiff {
                contract_address: Address::ZERO,
                block_height: 1,
                block_hash: B256::ZERO,
                storage_key: B256::ZERO,
                storage_value: B256::ZERO,
            },
        }
    }

    #[tokio::test]
    async fn add_then_delete_round_trips() {
        let queue = InMemoryRetryQueue::new();
        queue.add(sample_diff(1)).await.unwrap();
        assert_eq!(queue.get_all().await.unwrap().len(), 1);
        queue.delete(1).await.unwrap();
        assert!(queue.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_is_idempotent_on_id() {
        let queue = InMemoryRetryQueue::new();
        queue.add(sample_diff(1)).await.unwrap();
        queue.add(sample_diff(1)).await.unwrap();
        assert_eq!(queue.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_of_missing_id_is_a_no_op() {
        let queue = InMemoryRetryQueue::new();
        queue.delete(42).await.unwrap();
        assert!(queue.get_all().await.unwrap().is_empty());
    }
}
