//! Benchmark: batch dispatch throughput and single-task latency.
//!
//! Measures the cost of a full execute_and_wait round trip (enqueue,
//! barrier publication, dispatch, drain) at different batch sizes.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use ember_gc::{GcTask, GcTaskManager, GcTaskManagerConfig, GcTaskQueue};

struct SpinTask {
    iters: u64,
}

impl GcTask for SpinTask {
    fn do_it(&self, _manager: &GcTaskManager, _which: u32) {
        let mut acc = 0u64;
        for i in 0..self.iters {
            acc = acc.wrapping_add(black_box(i));
        }
        black_box(acc);
    }
}

fn bench_single_task_round_trip(c: &mut Criterion) {
    let manager = GcTaskManager::new(GcTaskManagerConfig {
        workers: 2,
        ..Default::default()
    });
    c.bench_function("execute_and_wait_single", |b| {
        b.iter(|| {
            let mut batch = GcTaskQueue::new();
            batch.enqueue(Arc::new(SpinTask { iters: 0 }));
            manager.execute_and_wait(batch);
        });
    });
    manager.shutdown();
}

fn bench_batch_dispatch(c: &mut Criterion) {
    let manager = GcTaskManager::new(GcTaskManagerConfig {
        workers: 4,
        ..Default::default()
    });
    for batch_size in [8, 64] {
        c.bench_function(&format!("execute_and_wait_batch_{batch_size}"), |b| {
            b.iter(|| {
                let mut batch = GcTaskQueue::new();
                for _ in 0..batch_size {
                    batch.enqueue(Arc::new(SpinTask { iters: 1_000 }));
                }
                manager.execute_and_wait(batch);
            });
        });
    }
    manager.shutdown();
}

criterion_group!(benches, bench_single_task_round_trip, bench_batch_dispatch);
criterion_main!(benches);
