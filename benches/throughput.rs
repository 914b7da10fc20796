use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use nonzero_ext::nonzero;
use tollgate::{RateLimit, RateLimiter};

fn bench_try_acquire(c: &mut Criterion) {
    let limit = RateLimit::per_second(nonzero!(10_000u32));
    let mut group = c.benchmark_group("try_acquire");
    group
        .throughput(Throughput::Elements(1))
        .sample_size(100)
        .bench_function("uncontended", |b| {
            let limiter = RateLimiter::with_limit(limit);
            b.iter(|| {
                let _x = std::hint::black_box(limiter.try_acquire());
            });
        })
        .bench_function("exhausted", |b| {
            let limiter = RateLimiter::with_limit(RateLimit::per_second(nonzero!(1u32)));
            let _ = limiter.try_acquire();
            b.iter(|| {
                let _x = std::hint::black_box(limiter.try_acquire());
            });
        });
    group.finish();
}

const THREADS: u32 = 24;

fn multi_threaded(c: &mut Criterion) {
    let limit = RateLimit::per_second(nonzero!(10_000u32));
    let mut group = c.benchmark_group("multi_threaded");
    group
        .throughput(Throughput::Elements(1))
        .bench_function("try_acquire", |b| {
            let limiter = Arc::new(RateLimiter::with_limit(limit));
            b.iter_custom(|iters| {
                let mut children = vec![];
                let start = std::time::Instant::now();
                for _i in 0..THREADS {
                    let limiter = Arc::clone(&limiter);
                    children.push(std::thread::spawn(move || {
                        for _i in 0..iters {
                            let _x = std::hint::black_box(limiter.try_acquire());
                        }
                    }));
                }
                for child in children {
                    child.join().unwrap()
                }
                start.elapsed()
            })
        });
    group.finish();
}

criterion_group!(benches, bench_try_acquire, multi_threaded);
criterion_main!(benches);
