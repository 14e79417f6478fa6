// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! A logging stand-in for the persistence interface. The core leaves the
//! backing store unspecified (a relational database is the expected
//! realization); this binary ships none, so rows are reported through
//! `log` instead of written anywhere durable.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use diffwatch_persistence::{PersistenceError, PersistenceHandle};
use diffwatch_types::{DecodedRecord, PersistedDiff, RawDiff};

pub struct LoggingPersistenceHandle {
    next_id: AtomicU64,
}

impl LoggingPersistenceHandle {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for LoggingPersistenceHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceHandle for LoggingPersistenceHandle {
    async fn insert_raw_diff(&self, diff: RawDiff) -> Result<PersistedDiff, PersistenceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(PersistedDiff { id, diff })
    }

    async fn insert_decoded_row(
        &self,
        table: &str,
        diff_id: u64,
        record: DecodedRecord,
    ) -> Result<(), PersistenceError> {
        log::info!(
            "{table}: diff {diff_id} -> {} {:?} at block {} ({:#x})",
            record.name,
            record.decoded,
            record.block_height,
            record.block_hash
        );
        Ok(())
    }
}
