// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Ingests raw storage diffs from a tail-file or node subscription, routes
//! each to its per-contract transformer, and re-drains the retry queue on a
//! timer. See [`Watcher`] for the main loop.

mod ingest;
mod source;
mod watcher;

pub use ingest::{spawn_diff_source, IngestError};
pub use source::{parse_csv_line, DiffSource, NodeSubscriptionDiffSource, SourceError, StateDiffFeed, TailFileDiffSource};
pub use watcher::{TransformerInitializer, Watcher};
