// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! CLI for the storage diff watcher: loads a `WatcherConfig`, wires a diff
//! source, per-contract transformers, and an in-process persistence
//! stand-in, then runs the watcher loop until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use diffwatch_keys::{KeysLoader, PersistenceBackedKeysLoader};
use diffwatch_persistence::{InMemoryRetryQueue, PersistenceHandle};
use diffwatch_transformer::{GenericTransformer, Transformer};
use diffwatch_watcher::{
    spawn_diff_source, IngestError, TailFileDiffSource, TransformerInitializer, Watcher,
};
use tokio_util::sync::CancellationToken;

mod config;
mod error;
mod store;

use config::WatcherConfig;
use error::{CliError, CliResult};
use store::LoggingPersistenceHandle;

#[derive(Debug, Parser)]
#[command(name = "diffwatch")]
#[command(author = "The Storage Diff Watcher Authors")]
#[command(about = "Watches an Ethereum archival node for contract storage diffs", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the watcher's TOML configuration file.
    #[arg(long, default_value = "diffwatch.toml")]
    config: PathBuf,

    /// Whether to print debug-level logs.
    #[arg(long, global = true)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    // Bridges `tracing` events emitted by the library crates into the same
    // `log`-based output this binary initializes below.
    tracing_log::LogTracer::init().expect("installing tracing-to-log bridge");
    simple_logger::init_with_level(log_level).expect("setting up logger");

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Into::into)
        .and_then(|rt| rt.block_on(run(args)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            err.exit_code()
        }
    }
}

async fn run(args: Args) -> CliResult {
    let config = config::load(&args.config)?;
    let store: Arc<dyn PersistenceHandle> = Arc::new(LoggingPersistenceHandle::new());
    let queue = Arc::new(InMemoryRetryQueue::new());

    let mut watcher = Watcher::new(store.clone(), queue.clone());
    watcher.add_transformers(build_transformer_initializers(&config)?);

    let Some(diff_file) = config.node.diff_file.clone() else {
        return Err(CliError::from(eyre::eyre!(
            "no diff source configured: set [node] diff_file (node-subscription sources are out of scope for this core)"
        )));
    };

    let (diffs_tx, diffs_rx) = tokio::sync::mpsc::channel(256);
    let (errs_tx, errs_rx) = tokio::sync::mpsc::channel::<IngestError>(256);

    spawn_diff_source(
        TailFileDiffSource::new(diff_file),
        store.clone(),
        diffs_tx,
        errs_tx,
    );

    let shutdown = CancellationToken::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received interrupt, shutting down");
            ctrl_c_shutdown.cancel();
        }
    });

    let retry_interval = Duration::from_secs(config.node.retry_interval_secs);
    watcher.execute(diffs_rx, errs_rx, retry_interval, shutdown).await;
    Ok(())
}

/// Builds one [`TransformerInitializer`] per configured contract. Each
/// initializer is invoked by the [`Watcher`] with its own persistence
/// handle, the point at which the concrete transformer and its keys loader
/// are actually constructed.
fn build_transformer_initializers(
    config: &WatcherConfig,
) -> Result<Vec<TransformerInitializer>, CliError> {
    let mut initializers = Vec::with_capacity(config.contract.len());
    for (name, contract) in &config.contract {
        let address = contract.parsed_address(name)?;
        let table = contract.table.clone().unwrap_or_else(|| name.clone());

        initializers.push(Box::new(move |store: Arc<dyn PersistenceHandle>| {
            let mut loader = PersistenceBackedKeysLoader::new(address);
            loader.bind_store(store.clone());
            Box::new(GenericTransformer::new(address, table, loader, store)) as Box<dyn Transformer>
        }) as TransformerInitializer);
    }
    Ok(initializers)
}
