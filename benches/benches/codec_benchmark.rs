//! Codec benchmarks: streaming decode and record encode throughput.
//!
//! Run with: `cargo bench --package humboldt-bench`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use humboldt_bench::{sample_stream, sample_trade};
use humboldt_codec::StreamDecoder;
use std::hint::black_box;

fn decode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decode");
    for count in [1_000u32, 100_000] {
        let bytes = sample_stream(count);
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &bytes, |b, bytes| {
            b.iter(|| {
                let mut decoder = StreamDecoder::new();
                decoder.write(bytes);
                let mut records = 0u32;
                while let Some(record) = decoder.next_record().unwrap() {
                    black_box(&record);
                    records += 1;
                }
                black_box(records)
            });
        });
    }
    group.finish();
}

fn encode_benchmark(c: &mut Criterion) {
    let trades: Vec<_> = (0..1_000).map(sample_trade).collect();
    let mut group = c.benchmark_group("record_encode");
    group.throughput(Throughput::Elements(trades.len() as u64));
    group.bench_function("trades", |b| {
        b.iter(|| {
            for trade in &trades {
                black_box(trade.to_record());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, decode_benchmark, encode_benchmark);
criterion_main!(benches);
