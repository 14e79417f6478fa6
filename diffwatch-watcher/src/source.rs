// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! Raw-diff ingestion: a tail-file source that parses the CSV diff format,
//! and a node-subscription source over an injected [`StateDiffFeed`].

use std::path::PathBuf;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use diffwatch_types::RawDiff;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// How long to sleep after hitting EOF before polling the tailed file again.
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("could not open diff file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed diff record: {0}")]
    Parse(String),
}

/// A lazy producer of raw diffs. `fetch` runs for as long as the source has
/// data, pushing onto `out` and reporting per-record failures on `errs`
/// without terminating the stream.
#[async_trait]
pub trait DiffSource: Send {
    async fn fetch(&self, out: mpsc::Sender<RawDiff>, errs: mpsc::Sender<SourceError>);
}

fn strip_0x(field: &str) -> &str {
    field.strip_prefix("0x").unwrap_or(field)
}

fn parse_hex_exact(field: &str, width: usize, what: &str) -> Result<Vec<u8>, SourceError> {
    let bytes = hex::decode(strip_0x(field))
        .map_err(|e| SourceError::Parse(format!("{what} is not valid hex: {e}")))?;
    if bytes.len() != width {
        return Err(SourceError::Parse(format!(
            "{what} must be {width} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn parse_address(field: &str) -> Result<Address, SourceError> {
    let bytes = parse_hex_exact(field, 20, "contract address")?;
    Ok(Address::from_slice(&bytes))
}

fn parse_word(field: &str, what: &str) -> Result<B256, SourceError> {
    let bytes = parse_hex_exact(field, 32, what)?;
    Ok(B256::from_slice(&bytes))
}

fn parse_block_height(field: &str) -> Result<u64, SourceError> {
    if let Some(hex_digits) = field.strip_prefix("0x") {
        u64::from_str_radix(hex_digits, 16)
            .map_err(|e| SourceError::Parse(format!("block height is not valid hex: {e}")))
    } else {
        field
            .parse()
            .map_err(|e| SourceError::Parse(format!("block height is not a valid integer: {e}")))
    }
}

/// Parses one CSV record: `blockHeight,blockHash,contractAddress,storageKey,storageValue`.
pub fn parse_csv_line(line: &str) -> Result<RawDiff, SourceError> {
    let fields: Vec<&str> = line.split(',').collect();
    let [block_height, block_hash, contract_address, storage_key, storage_value] =
        <[&str; 5]>::try_from(fields).map_err(|fields| {
            SourceError::Parse(format!("expected 5 fields, got {}", fields.len()))
        })?;

    Ok(RawDiff {
        contract_address: parse_address(contract_address)?,
        block_height: parse_block_height(block_height)?,
        block_hash: parse_word(block_hash, "block hash")?,
        storage_key: parse_word(storage_key, "storage key")?,
        storage_value: parse_word(storage_value, "storage value")?,
    })
}

/// Tails a growing CSV file, the Rust-native equivalent of a line-oriented
/// file tailer: polls for new lines and parses each as a [`RawDiff`].
/// Malformed lines are reported on the error channel and skipped; they
/// never terminate the tail. This source never terminates on its own while
/// the feed is open: reaching the current end of file parks on a short
/// poll interval rather than returning, so lines appended after this call
/// started are still picked up.
pub struct TailFileDiffSource {
    path: PathBuf,
    poll_interval: Duration,
}

impl TailFileDiffSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: TAIL_POLL_INTERVAL,
        }
    }

    /// Overrides the default EOF poll interval (tests only need this to
    /// avoid a half-second wait per assertion).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl DiffSource for TailFileDiffSource {
    async fn fetch(&self, out: mpsc::Sender<RawDiff>, errs: mpsc::Sender<SourceError>) {
        tracing::debug!(path = %self.path.display(), "fetching storage diffs");
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(err) => {
                let _ = errs.send(SourceError::Io(err)).await;
                return;
            }
        };
        let mut lines = BufReader::new(file).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_csv_line(&line) {
                        Ok(diff) => {
                            if out.send(diff).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            if errs.send(err).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Ok(None) => {
                    // Current end of file: the feed stays open for more
                    // lines to be appended, so park and poll again.
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(err) => {
                    let _ = errs.send(SourceError::Io(err)).await;
                    return;
                }
            }
        }
    }
}

/// What an archival node's subscription exposes: the tuple the core cares
/// about, everything else ignored at the boundary.
#[async_trait]
pub trait StateDiffFeed: Send {
    /// Returns the next notification, or `None` once the subscription ends.
    async fn next(&mut self) -> Option<Result<RawDiff, SourceError>>;
}

/// Adapts a [`StateDiffFeed`] (the archival-node JSON-RPC client, out of
/// scope here) into a [`DiffSource`].
pub struct NodeSubscriptionDiffSource<F> {
    feed: tokio::sync::Mutex<F>,
}

impl<F: StateDiffFeed> NodeSubscriptionDiffSource<F> {
    pub fn new(feed: F) -> Self {
        Self {
            feed: tokio::sync::Mutex::new(feed),
        }
    }
}

#[async_trait]
impl<F: StateDiffFeed> DiffSource for NodeSubscriptionDiffSource<F> {
    async fn fetch(&self, out: mpsc::Sender<RawDiff>, errs: mpsc::Sender<SourceError>) {
        let mut feed = self.feed.lock().await;
        while let Some(next) = feed.next().await {
            match next {
                Ok(diff) => {
                    if out.send(diff).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    if errs.send(err).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
