//! Benchmarks for log record rendering and queue encoding.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use applog::logging::{Level, LogRecord, ProcessIdentity, QueueMessage};

/// Create a record with `fields` structured fields and an optional trace.
fn create_record(fields: usize, trace: bool) -> LogRecord {
    let fields = (0..fields)
        .map(|i| (format!("field{}", i), format!("value{}", i)))
        .collect();
    let record = LogRecord::new(
        Level::Info,
        "applog::worker::channel",
        "sending work to worker",
        ProcessIdentity::current("worker-1"),
    )
    .with_fields(fields);

    if trace {
        record.with_trace("computing item 0\n  caused by: division by zero")
    } else {
        record
    }
}

fn bench_format_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_line");

    for fields in [0, 4, 16].iter() {
        let record = create_record(*fields, false);
        group.bench_with_input(BenchmarkId::new("fields", fields), fields, |b, _| {
            b.iter(|| black_box(record.format_line()));
        });
    }

    let record = create_record(4, true);
    group.bench_function("with_trace", |b| {
        b.iter(|| black_box(record.format_line()));
    });

    group.finish();
}

fn bench_datagram(c: &mut Criterion) {
    let mut group = c.benchmark_group("datagram");

    for fields in [0, 4, 16].iter() {
        let message = QueueMessage::Record(create_record(*fields, true));
        let bytes = message.to_datagram().unwrap();

        group.bench_with_input(BenchmarkId::new("encode", fields), fields, |b, _| {
            b.iter(|| black_box(message.to_datagram().unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", fields), fields, |b, _| {
            b.iter(|| black_box(QueueMessage::from_datagram(black_box(&bytes)).unwrap()));
        });
    }

    // Oversized records are truncated before encoding
    let mut huge = create_record(0, false);
    huge.message = "x".repeat(256 * 1024);
    let message = QueueMessage::Record(huge);
    group.bench_function("encode_oversized", |b| {
        b.iter(|| black_box(message.to_datagram().unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_format_line, bench_datagram);
criterion_main!(benches);
