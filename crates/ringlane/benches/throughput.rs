use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringlane::{Channel, Config};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const MSG_PER_PRODUCER: u64 = 1_000_000;

fn bench_offer_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("offer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("offer_then_drain", |b| {
        let channel = Channel::<u64>::new(Config::new(1, 1024, false)).unwrap();
        let mut consumer = channel.consumer().unwrap();
        let mut i = 0u64;
        b.iter(|| {
            if !channel.offer(black_box(i)) {
                consumer.drain_into(1024, |item| {
                    black_box(item);
                });
            }
            i += 1;
        });
    });

    group.finish();
}

fn bench_mpsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc");

    for producers in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements(MSG_PER_PRODUCER * producers as u64));
        group.bench_with_input(
            BenchmarkId::new("producers", producers),
            &producers,
            |b, &producers| {
                b.iter(|| {
                    let channel =
                        Arc::new(Channel::<u64>::new(Config::new(producers, 4096, false)).unwrap());
                    let mut consumer = channel.consumer().unwrap();
                    let done = Arc::new(AtomicBool::new(false));

                    let handles: Vec<_> = (0..producers)
                        .map(|p| {
                            let ch = Arc::clone(&channel);
                            thread::spawn(move || {
                                for i in 0..MSG_PER_PRODUCER {
                                    // Drops are part of what is being measured.
                                    black_box(ch.offer_to(p, i));
                                }
                            })
                        })
                        .collect();

                    let stop = Arc::clone(&done);
                    let joiner = thread::spawn(move || {
                        for h in handles {
                            h.join().unwrap();
                        }
                        stop.store(true, Ordering::Release);
                    });

                    let mut received = 0u64;
                    while !done.load(Ordering::Acquire) {
                        received += consumer.drain_into(4096, |item| {
                            black_box(item);
                        }) as u64;
                    }
                    received += consumer.drain_into(usize::MAX, |item| {
                        black_box(item);
                    }) as u64;

                    joiner.join().unwrap();
                    black_box(received + channel.dropped_count());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_offer_uncontended, bench_mpsc);
criterion_main!(benches);
