//! Shared helpers for the galena benchmarks.

use galena_lock::ProcessIdLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs `bench` while `contenders` background threads hammer the same lock,
/// so the measured path includes real CAS traffic.
pub fn with_lock_contention<R>(
    lock: &ProcessIdLock,
    contenders: usize,
    bench: impl FnOnce() -> R,
) -> R {
    let stop = AtomicBool::new(false);
    std::thread::scope(|scope| {
        for _ in 0..contenders {
            scope.spawn(|| {
                while !stop.load(Ordering::Relaxed) {
                    if lock.try_lock() {
                        lock.unlock();
                    }
                    std::hint::spin_loop();
                }
            });
        }
        let result = bench();
        stop.store(true, Ordering::Relaxed);
        result
    })
}
