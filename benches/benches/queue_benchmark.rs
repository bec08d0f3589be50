//! Queue benchmarks: intake and cross-thread handoff throughput.
//!
//! Run with: `cargo bench --package humboldt-bench`

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use humboldt_bench::sample_records;
use humboldt_live::RecordQueue;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

fn queue_benchmark(c: &mut Criterion) {
    let records = sample_records(1_024);
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(records.len() as u64));

    group.bench_function("put_get_same_thread", |b| {
        let queue = RecordQueue::new(2_048);
        queue.enable();
        b.iter(|| {
            for record in &records {
                queue.put_nowait(record.clone()).unwrap();
            }
            for _ in 0..records.len() {
                black_box(queue.get());
            }
        });
    });

    group.bench_function("handoff_across_threads", |b| {
        b.iter(|| {
            // Small capacity so the producer actually blocks on the
            // consumer.
            let queue = Arc::new(RecordQueue::new(256));
            queue.enable();
            let producer = Arc::clone(&queue);
            let batch = records.clone();
            let handle = thread::spawn(move || {
                for record in batch {
                    producer.put(record).unwrap();
                }
                producer.close();
            });
            let mut drained = 0u64;
            while let Some(record) = queue.get() {
                black_box(&record);
                drained += 1;
            }
            handle.join().unwrap();
            black_box(drained)
        });
    });

    group.finish();
}

criterion_group!(benches, queue_benchmark);
criterion_main!(benches);
