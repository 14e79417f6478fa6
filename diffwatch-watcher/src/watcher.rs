// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! The central loop: ingest diffs, route to a transformer, enqueue on
//! failure, re-drain the retry queue on a timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use diffwatch_persistence::{PersistenceHandle, RetryQueue};
use diffwatch_transformer::Transformer;
use diffwatch_types::{ContractAddress, PersistedDiff};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ingest::IngestError;

/// Constructs a concrete [`Transformer`] from the watcher's persistence
/// handle. Registered via [`Watcher::add_transformers`], the way each
/// watched contract's transformer is built from its own loader and table
/// name but shares the one store the watcher was given.
pub type TransformerInitializer =
    Box<dyn FnOnce(Arc<dyn PersistenceHandle>) -> Box<dyn Transformer> + Send>;

/// Owns the persistence handle, the transformer registry, and the
/// retry-queue handle. Constructed once per process; `execute` runs the
/// main loop to completion or cancellation.
pub struct Watcher {
    store: Arc<dyn PersistenceHandle>,
    transformers: HashMap<ContractAddress, Box<dyn Transformer>>,
    queue: Arc<dyn RetryQueue>,
}

impl Watcher {
    pub fn new(store: Arc<dyn PersistenceHandle>, queue: Arc<dyn RetryQueue>) -> Self {
        Self {
            store,
            transformers: HashMap::new(),
            queue,
        }
    }

    /// Invokes each initializer with the watcher's persistence handle and
    /// registers the resulting transformer by its declared contract
    /// address, replacing any existing registration for the same address.
    pub fn add_transformers(&mut self, initializers: Vec<TransformerInitializer>) {
        for initializer in initializers {
            let transformer = initializer(self.store.clone());
            self.transformers
                .insert(transformer.contract_address(), transformer);
        }
    }

    /// Multiplexes three event sources until `shutdown` fires, or until the
    /// diff channel has closed and a subsequent retry-queue drain finds the
    /// queue empty.
    pub async fn execute(
        &self,
        mut diffs: mpsc::Receiver<PersistedDiff>,
        mut errs: mpsc::Receiver<IngestError>,
        retry_interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut diffs_closed = false;
        let mut errs_closed = false;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("watcher received shutdown signal");
                    return;
                }
                diff = diffs.recv(), if !diffs_closed => {
                    match diff {
                        Some(diff) => self.process_diff(diff).await,
                        None => diffs_closed = true,
                    }
                }
                err = errs.recv(), if !errs_closed => {
                    match err {
                        Some(err) => tracing::warn!(%err, "error fetching storage diffs"),
                        None => errs_closed = true,
                    }
                }
                _ = ticker.tick() => {
                    let remaining = self.process_queue().await;
                    if diffs_closed && remaining == 0 {
                        tracing::debug!("diff channel closed and retry queue drained, exiting");
                        return;
                    }
                }
            }
        }
    }

    async fn process_diff(&self, diff: PersistedDiff) {
        let address = diff.contract_address();
        let Some(transformer) = self.transformers.get(&address) else {
            tracing::debug!(%address, "ignoring a diff from an unwatched contract");
            return;
        };

        if let Err(err) = transformer.execute(diff).await {
            tracing::warn!(%address, %err, "error executing storage transformer");
            if err.is_recoverable() {
                if let Err(queue_err) = self.queue.add(diff).await {
                    tracing::warn!(%address, error = %queue_err, "error queueing storage diff");
                }
            }
        }
    }

    /// Drains the retry queue once, re-routing every entry to its
    /// transformer. Returns the number of entries still queued afterward.
    async fn process_queue(&self) -> usize {
        let queued = match self.queue.get_all().await {
            Ok(queued) => queued,
            Err(err) => {
                tracing::warn!(%err, "error getting queued storage");
                return usize::MAX;
            }
        };

        let mut remaining = queued.len();
        for diff in queued {
            let id = diff.id;
            let address = diff.contract_address();

            let Some(transformer) = self.transformers.get(&address) else {
                if let Err(err) = self.queue.delete(id).await {
                    tracing::warn!(%err, diff_id = id, "error deleting persisted diff from queue");
                } else {
                    remaining -= 1;
                }
                continue;
            };

            match transformer.execute(diff).await {
                Ok(()) => {
                    if let Err(err) = self.queue.delete(id).await {
                        tracing::warn!(%err, diff_id = id, "error deleting persisted diff from queue");
                    } else {
                        remaining -= 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(%address, %err, "error executing storage transformer");
                }
            }
        }
        remaining
    }
}
