//! Record command implementation.
//!
//! Captures a live session to a file: the metadata header once, then
//! every record byte-for-byte, replayable through the codec.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use humboldt_lib::prelude::*;
use tracing::info;

use crate::commands::build_client;

/// Subscribe and write the raw record stream to `output`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn record(
    dataset_id: &str,
    symbols: Vec<String>,
    schema_str: &str,
    output: Option<PathBuf>,
    gateway: Option<String>,
    port: u16,
    reconnect: bool,
    key: Option<&str>,
) -> Result<()> {
    let dataset: Dataset = dataset_id
        .parse()
        .with_context(|| format!("invalid dataset: {dataset_id}"))?;
    let schema: Schema = schema_str
        .parse()
        .with_context(|| format!("invalid schema: {schema_str}"))?;
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{dataset}.hmb")));

    let client = build_client(key, gateway, port, reconnect)?;
    client
        .add_stream_path(&output, None)
        .with_context(|| format!("cannot create {}", output.display()))?;
    let written = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&written);
    client.add_callback(
        move |_record| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
        None,
    );

    client.subscribe(Subscription::new(dataset, schema, symbols))?;
    client.start()?;
    info!(path = %output.display(), "recording");

    tokio::select! {
        () = client.wait_for_close() => {
            if client.state() == SessionState::Errored {
                // Surface the parked session error.
                if let Err(error) = client.next_record() {
                    client.stop().ok();
                    return Err(error).context("session failed");
                }
            }
        }
        _ = tokio::signal::ctrl_c() => info!("interrupted; flushing output"),
    }

    client.stop().context("close failed")?;
    println!(
        "{} records -> {}",
        written.load(Ordering::Relaxed),
        output.display()
    );
    Ok(())
}
