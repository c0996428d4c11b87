use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use circuit_guard::{BreakerConfig, CircuitBreaker};
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn config() -> BreakerConfig {
    BreakerConfig::default()
        .with_failure_threshold(10)
        .with_success_threshold(3)
        .with_reset_timeout(Duration::from_secs(60))
        .with_open_duration(Duration::from_millis(100))
}

pub fn execute_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("breaker_execute");

    let breaker = CircuitBreaker::new(config());
    group.bench_function("success", |b| {
        b.iter(|| black_box(breaker.execute(|| Ok::<(), ()>(()))))
    });

    let breaker = CircuitBreaker::new(config());
    group.bench_function("failure", |b| {
        b.iter(|| black_box(breaker.execute(|| Err::<(), ()>(()))))
    });

    // Mixed outcomes from several threads hitting one breaker
    for threads in [2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::new("contended", threads), threads, |b, &threads| {
            let breaker = Arc::new(CircuitBreaker::new(config()));
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let breaker = Arc::clone(&breaker);
                        thread::spawn(move || {
                            let mut rng = rand::thread_rng();
                            for _ in 0..250 {
                                let fail = rng.gen_bool(0.2);
                                let _ = breaker.execute(|| if fail { Err(()) } else { Ok(()) });
                            }
                        })
                    })
                    .collect();

                for handle in handles {
                    handle.join().unwrap();
                }

                black_box(breaker.snapshot())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, execute_benchmark);
criterion_main!(benches);
