//! Criterion benchmarks for the atomic cell: the cell must cost the same as
//! the std atomic it delegates to, so the std type is benchmarked alongside
//! as the baseline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use galena_atomic::IpcAtomic;
use std::sync::atomic::{AtomicU64, Ordering};

fn bench_atomic(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic");

    // 1. fetch_add, cell vs std baseline
    {
        let cell = IpcAtomic::new(0u64);
        group.bench_function("ipc_fetch_add", |b| {
            b.iter(|| black_box(cell.fetch_add(1, Ordering::SeqCst)));
        });

        let std_cell = AtomicU64::new(0);
        group.bench_function("std_fetch_add", |b| {
            b.iter(|| black_box(std_cell.fetch_add(1, Ordering::SeqCst)));
        });
    }

    // 2. load / store round trip
    {
        let cell = IpcAtomic::new(7u64);
        group.bench_function("ipc_load_store", |b| {
            b.iter(|| {
                let v = cell.load(Ordering::Acquire);
                cell.store(black_box(v + 1), Ordering::Release);
            });
        });
    }

    // 3. uncontended CAS-loop increment
    {
        let cell = IpcAtomic::new(0u64);
        group.bench_function("ipc_cas_increment", |b| {
            b.iter(|| {
                let mut observed = cell.load(Ordering::Relaxed);
                loop {
                    match cell.compare_exchange_weak(
                        observed,
                        observed + 1,
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    ) {
                        Ok(prev) => break black_box(prev),
                        Err(actual) => observed = actual,
                    }
                }
            });
        });
    }

    // 4. float add (CAS-loop emulation)
    {
        let cell = IpcAtomic::new(0.0f64);
        group.bench_function("ipc_float_fetch_add", |b| {
            b.iter(|| black_box(cell.fetch_add(1.0, Ordering::SeqCst)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_atomic);
criterion_main!(benches);
