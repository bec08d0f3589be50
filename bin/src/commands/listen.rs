//! Listen command implementation.
//!
//! Streams live records to stdout until interrupted or a record limit
//! is reached.

use anyhow::{Context, Result};
use humboldt_lib::prelude::*;
use tracing::info;

use crate::commands::build_client;
use crate::display::{self, Format};

/// Subscribe and print records as they arrive.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn listen(
    dataset_id: &str,
    symbols: Vec<String>,
    schema_str: &str,
    format: Format,
    gateway: Option<String>,
    port: u16,
    start: Option<i64>,
    reconnect: bool,
    limit: Option<u64>,
    key: Option<&str>,
) -> Result<()> {
    let dataset: Dataset = dataset_id
        .parse()
        .with_context(|| format!("invalid dataset: {dataset_id}"))?;
    let schema: Schema = schema_str
        .parse()
        .with_context(|| format!("invalid schema: {schema_str}"))?;

    let client = build_client(key, gateway, port, reconnect)?;
    let mut sub = Subscription::new(dataset, schema, symbols);
    sub.start = start.map(chrono::DateTime::from_timestamp_nanos);
    client.subscribe(sub).context("subscription rejected")?;
    info!("session connected");

    let mut symbology = client.symbology_map();
    let mut seen = 0u64;
    loop {
        let record = tokio::select! {
            record = client.next_record_async() => record?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        };
        let Some(record) = record else {
            break;
        };
        if record.rtype() == RType::SymbolMapping {
            symbology = client.symbology_map();
        }
        if let Some(line) = display::render(&record, format, &symbology) {
            println!("{line}");
        }
        seen += 1;
        if limit.is_some_and(|limit| seen >= limit) {
            break;
        }
    }

    client.stop().context("close failed")?;
    Ok(())
}
