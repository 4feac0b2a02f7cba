use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::{Duration, Instant};
use strand_perf::MappedRing;
use strand_ringbuffer::HEADER_LENGTH;

const CAPACITY: usize = 1 << 20;
const MSG_TYPE_ID: i32 = 1;

fn drain(mapped: &mut MappedRing) {
    mapped.ring.read(
        |_, payload| {
            black_box(payload);
            Ok(())
        },
        usize::MAX,
    );
}

fn bench_write(c: &mut Criterion) {
    let mut mapped = MappedRing::create("crit_write", CAPACITY).expect("failed to create ring");
    let payload = [0x5Au8; 32];
    let per_lap = CAPACITY / (payload.len() + HEADER_LENGTH);

    let mut group = c.benchmark_group("ring_buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("write", |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            let mut remaining = iters as usize;
            while remaining > 0 {
                let batch = remaining.min(per_lap);
                let start = Instant::now();
                for _ in 0..batch {
                    black_box(mapped.ring.write(MSG_TYPE_ID, black_box(&payload)).unwrap());
                }
                elapsed += start.elapsed();
                drain(&mut mapped);
                remaining -= batch;
            }
            elapsed
        });
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut mapped = MappedRing::create("crit_read", CAPACITY).expect("failed to create ring");
    let payload = [0x5Au8; 32];
    let per_lap = CAPACITY / (payload.len() + HEADER_LENGTH);

    let mut group = c.benchmark_group("ring_buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read", |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            let mut remaining = iters as usize;
            while remaining > 0 {
                let batch = remaining.min(per_lap);
                for _ in 0..batch {
                    mapped.ring.write(MSG_TYPE_ID, &payload).unwrap();
                }
                let start = Instant::now();
                drain(&mut mapped);
                elapsed += start.elapsed();
                remaining -= batch;
            }
            elapsed
        });
    });

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let mut mapped = MappedRing::create("crit_rt", CAPACITY).expect("failed to create ring");

    let mut group = c.benchmark_group("ring_buffer_round_trip");
    for size in [8usize, 64, 512] {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                mapped.ring.write(MSG_TYPE_ID, black_box(payload)).unwrap();
                mapped.ring.read(
                    |_, p| {
                        black_box(p);
                        Ok(())
                    },
                    1,
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write, bench_read, bench_round_trip);
criterion_main!(benches);
