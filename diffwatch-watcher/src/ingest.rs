// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Bridges a [`DiffSource`] into the watcher's main channel, persisting each
//! `RawDiff` into a `PersistedDiff` before handing it off — the boundary at
//! which the shared persistence handle is first touched.

use std::sync::Arc;

use diffwatch_persistence::{PersistenceError, PersistenceHandle};
use diffwatch_types::PersistedDiff;
use tokio::sync::mpsc;

use crate::source::{DiffSource, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Spawns `source` on its own task, plus a second task that persists each
/// `RawDiff` it produces and forwards the resulting `PersistedDiff` onward.
/// Returns immediately; the caller drives `diffs_out`/`errs_out`'s
/// receiving ends (typically [`crate::Watcher::execute`]).
pub fn spawn_diff_source<S: DiffSource + 'static>(
    source: S,
    store: Arc<dyn PersistenceHandle>,
    diffs_out: mpsc::Sender<PersistedDiff>,
    errs_out: mpsc::Sender<IngestError>,
) {
    let (raw_tx, mut raw_rx) = mpsc::channel(256);
    let (err_tx, mut err_rx) = mpsc::channel(256);

    tokio::spawn(async move {
        source.fetch(raw_tx, err_tx).await;
    });

    tokio::spawn(async move {
        let mut raw_closed = false;
        let mut err_closed = false;
        loop {
            if raw_closed && err_closed {
                return;
            }
            tokio::select! {
                raw = raw_rx.recv(), if !raw_closed => {
                    match raw {
                        Some(raw_diff) => match store.insert_raw_diff(raw_diff).await {
                            Ok(persisted) => {
                                if diffs_out.send(persisted).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                if errs_out.send(IngestError::Persistence(err)).await.is_err() {
                                    return;
                                }
                            }
                        },
                        None => raw_closed = true,
                    }
                }
                err = err_rx.recv(), if !err_closed => {
                    match err {
                        Some(err) => {
                            if errs_out.send(IngestError::Source(err)).await.is_err() {
                                return;
                            }
                        }
                        None => err_closed = true,
                    }
                }
            }
        }
    });
}
