//! Benchmark utilities for humboldt.

use humboldt_codec::{Metadata, RType, Record, RecordHeader, TradeMsg};
use humboldt_types::Schema;

/// Builds a deterministic trade with plausible field values.
#[must_use]
pub fn sample_trade(sequence: u32) -> TradeMsg {
    TradeMsg {
        header: RecordHeader::new(
            RType::Trade,
            1,
            1_000 + sequence % 16,
            1_700_000_000_000_000_000 + u64::from(sequence),
        ),
        price: 172_350_000_000 + i64::from(sequence % 100),
        size: 100 + sequence % 400,
        action: b'T',
        side: if sequence % 2 == 0 { b'A' } else { b'B' },
        flags: 0,
        depth: 0,
        ts_recv: 1_700_000_000_000_001_000 + u64::from(sequence),
        ts_in_delta: 500,
        sequence,
    }
}

/// Encodes `count` trades behind a canonical metadata header, shaped
/// like a live session's byte stream.
#[must_use]
pub fn sample_stream(count: u32) -> Vec<u8> {
    let mut bytes = Metadata::new("XNAS.BASIC", Some(Schema::Trades), 0).encode();
    for sequence in 0..count {
        bytes.extend_from_slice(sample_trade(sequence).to_record().as_bytes());
    }
    bytes
}

/// Builds `count` canonical trade records.
#[must_use]
pub fn sample_records(count: u32) -> Vec<Record> {
    (0..count)
        .map(|sequence| sample_trade(sequence).to_record())
        .collect()
}
