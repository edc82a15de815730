//! Throughput Benchmark for TideKV
//!
//! Measures the hot paths every connection touches: queuing a log line and
//! bracketing an operation with a drain counter.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use tidekv::logger::{Level, Logger};
use tidekv::sync::{AtomicFlag, DrainWait};

/// Benchmark queuing log lines
fn bench_logger(c: &mut Criterion) {
    let logger = Logger::with_writer(std::io::sink()).expect("logger");

    let mut group = c.benchmark_group("logger");
    group.throughput(Throughput::Elements(1));

    group.bench_function("info_with_caller", |b| {
        let mut i = 0u64;
        b.iter(|| {
            logger.info(format_args!("accept link #{}", black_box(i)));
            i += 1;
        });
    });

    group.bench_function("output_without_caller", |b| {
        b.iter(|| {
            logger.output(Level::Debug, None, black_box("connection close"));
        });
    });

    group.finish();
    logger.flush();
}

/// Benchmark concurrent producers sharing one pipeline
fn bench_logger_contention(c: &mut Criterion) {
    let logger = Logger::with_writer(std::io::sink()).expect("logger");

    let mut group = c.benchmark_group("logger_contention");
    group.throughput(Throughput::Elements(4 * 1000));

    group.bench_function("4_producers", |b| {
        b.iter(|| {
            let producers: Vec<_> = (0..4)
                .map(|id| {
                    let logger = logger.clone();
                    thread::spawn(move || {
                        for seq in 0..1000 {
                            logger.output(Level::Info, None, format_args!("p{} {}", id, seq));
                        }
                    })
                })
                .collect();
            for producer in producers {
                producer.join().unwrap();
            }
        });
    });

    group.finish();
    logger.flush();
}

/// Benchmark drain counter bookkeeping
fn bench_drain_wait(c: &mut Criterion) {
    let wait = Arc::new(DrainWait::new());
    let flag = AtomicFlag::new(false);

    let mut group = c.benchmark_group("sync");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add_done", |b| {
        b.iter(|| {
            wait.add(black_box(1));
            wait.done();
        });
    });

    group.bench_function("flag_get", |b| {
        b.iter(|| black_box(flag.get()));
    });

    group.finish();
}

criterion_group!(benches, bench_logger, bench_logger_contention, bench_drain_wait);
criterion_main!(benches);
