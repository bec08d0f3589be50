//! Record rendering for the humboldt CLI.

use chrono::{DateTime, SecondsFormat};
use clap::ValueEnum;
use humboldt_lib::prelude::*;
use std::collections::HashMap;

/// Output format for streamed records.
#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum Format {
    Text,
    Json,
}

/// Renders one record as a stdout line.
pub(crate) fn render(
    record: &Record,
    format: Format,
    symbology: &HashMap<u32, String>,
) -> Option<String> {
    match format {
        Format::Text => render_text(record, symbology),
        Format::Json => render_json(record),
    }
}

fn render_json(record: &Record) -> Option<String> {
    let json = match record.rtype() {
        RType::Trade => serde_json::to_string(&record.as_trade()?),
        RType::Ohlcv => serde_json::to_string(&record.as_ohlcv()?),
        RType::Status => serde_json::to_string(&record.as_status()?),
        RType::SymbolMapping => serde_json::to_string(&record.as_symbol_mapping()?),
        RType::Error => serde_json::to_string(&record.as_error()?),
        RType::System => serde_json::to_string(&record.as_system()?),
    };
    json.ok()
}

fn render_text(record: &Record, symbology: &HashMap<u32, String>) -> Option<String> {
    let header = record.header();
    let ts = timestamp(header.ts_event);
    let symbol = symbology
        .get(&header.instrument_id)
        .cloned()
        .unwrap_or_else(|| header.instrument_id.to_string());
    match record.rtype() {
        RType::Trade => {
            let trade = record.as_trade()?;
            Some(format!(
                "{ts} {symbol} trade {} {} @ {:.9}",
                trade.side as char,
                trade.size,
                trade.price_f64(),
            ))
        }
        RType::Ohlcv => {
            let bar = record.as_ohlcv()?;
            Some(format!(
                "{ts} {symbol} ohlcv o={:.9} h={:.9} l={:.9} c={:.9} v={}",
                bar.open as f64 / 1e9,
                bar.high as f64 / 1e9,
                bar.low as f64 / 1e9,
                bar.close as f64 / 1e9,
                bar.volume,
            ))
        }
        RType::Status => {
            let status = record.as_status()?;
            Some(format!(
                "{ts} {symbol} status action={} reason={} trading={}",
                status.action, status.reason, status.is_trading as char,
            ))
        }
        RType::SymbolMapping => {
            let mapping = record.as_symbol_mapping()?;
            Some(format!(
                "{ts} mapping {} -> {}",
                header.instrument_id, mapping.stype_out_symbol,
            ))
        }
        RType::Error => {
            let error = record.as_error()?;
            Some(format!("{ts} gateway-error {}", error.err))
        }
        RType::System => {
            let system = record.as_system()?;
            Some(format!("{ts} system {}", system.msg))
        }
    }
}

fn timestamp(ts_event: u64) -> String {
    DateTime::from_timestamp_nanos(ts_event as i64).to_rfc3339_opts(SecondsFormat::Nanos, true)
}
