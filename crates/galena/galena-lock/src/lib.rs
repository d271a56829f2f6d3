//! `galena-lock`: a robust process-level mutex over shared memory.
//!
//! The lock is one atomic [`ProcessId`] cell: whoever's identifier is stored
//! there owns the lock, all-zero bytes mean unlocked. That single invariant
//! buys the two properties pthread robust mutexes need kernel support for:
//!
//! - **Implicit lifetime**: a freshly zero-filled mapping already contains a
//!   valid free lock; no process has to "create" it.
//! - **Robustness**: the owner record is self-describing. If the recorded
//!   holder is no longer alive (its PID is gone, or the PID now belongs to a
//!   process with a different start time), any contender may peel the lock
//!   away and take it.
//!
//! # Protocol
//!
//! **Acquire:**
//! 1. CAS null → me. Success means owned.
//! 2. On failure, look at the observed holder. Our own identifier means the
//!    lock is already held by this process: fail, reentry is not supported.
//! 3. Otherwise probe the holder's liveness. A dead holder is CASed back to
//!    null (best effort) and one fresh CAS null → me decides the attempt.
//!
//! **Release:** CAS me → null.
//!
//! All transfers ride on seq_cst compare-exchange of a single cell, so a
//! successful acquire happens-after the release that preceded it in the
//! cell's modification order, under any mix of thread-level and
//! process-level contention.
//!
//! # Thread Safety
//!
//! Ownership is per *process*, not per thread. Threads of one process
//! sharing a lock exclude each other (the CAS serializes them), but they
//! also share one identity: the holder's sibling thread gets `false` from
//! `try_lock` rather than a deadlocking probe, and `unlock` from a sibling
//! thread releases the lock. Keeping lock and unlock on one thread is the
//! caller's contract.

#![warn(unsafe_op_in_unsafe_fn)]

use galena_atomic::IpcAtomic;
use galena_procid::ProcessId;
use std::sync::atomic::Ordering;

/// A robust inter-process mutex: one atomic [`ProcessId`] that is both lock
/// state and owner record.
///
/// Safe to place in memory shared across processes; zero bytes are a valid
/// unlocked lock, and dropping the value has no effect on the bytes.
#[repr(transparent)]
pub struct ProcessIdLock {
    owner: IpcAtomic<ProcessId>,
}

impl Default for ProcessIdLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessIdLock {
    /// Creates an unlocked lock. Equivalent to adopting zero-filled bytes.
    #[inline]
    pub const fn new() -> Self {
        Self {
            owner: IpcAtomic::new(ProcessId::null()),
        }
    }

    /// Adopts existing storage (typically inside a shared mapping whose
    /// bytes were zero-filled at creation) as a lock.
    ///
    /// # Safety
    ///
    /// Same contract as [`IpcAtomic::from_ptr`]: `ptr` must be non-null,
    /// aligned, valid for reads and writes for `'a`, and all concurrent
    /// access must go through atomic operations of this width.
    #[inline]
    pub unsafe fn from_ptr<'a>(ptr: *mut ProcessId) -> &'a Self {
        // SAFETY: #[repr(transparent)] over IpcAtomic<ProcessId>, which is
        // itself transparent over ProcessId; validity is the caller's
        // contract.
        unsafe { &*ptr.cast::<Self>() }
    }

    /// Tries to take the lock without blocking.
    ///
    /// Returns `true` if the calling process now owns the lock. Returns
    /// `false` if a live process (including this one; reentry is not
    /// supported) holds it. A holder that is provably dead is evicted and
    /// the lock taken over in the same call when the race allows.
    ///
    /// The calling thread must not already hold the lock.
    pub fn try_lock(&self) -> bool {
        self.try_lock_as(ProcessId::current())
    }

    /// Takes the lock, busy-waiting until it is acquired.
    ///
    /// Spins with a scheduler yield after every failed attempt: no blocking
    /// primitive can be assumed to exist over storage shared by arbitrary
    /// processes. Callers wanting a deadline compose [`Self::try_lock`]
    /// with their own clock.
    ///
    /// The calling thread must not already hold the lock.
    pub fn lock(&self) {
        let me = ProcessId::current();
        while !self.try_lock_as(me) {
            std::thread::yield_now();
        }
    }

    /// Releases the lock.
    ///
    /// The caller must hold the lock. Debug builds assert that the released
    /// value carried the caller's identity; in release builds an unowned
    /// unlock leaves the lock untouched.
    pub fn unlock(&self) {
        let me = ProcessId::current();
        let _released =
            self.owner
                .compare_exchange(me, ProcessId::null(), Ordering::SeqCst, Ordering::SeqCst);
        debug_assert!(
            _released.is_ok(),
            "unlock of a lock this process does not hold"
        );
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub fn guard(&self) -> LockGuard<'_> {
        self.lock();
        LockGuard { lock: self }
    }

    /// The identifier currently recorded as owner, if any.
    ///
    /// Purely observational: the value may be stale by the time the caller
    /// looks at it, and a non-`None` holder may already be dead.
    pub fn holder(&self) -> Option<ProcessId> {
        let owner = self.owner.load(Ordering::SeqCst);
        (!owner.is_null()).then_some(owner)
    }

    fn try_lock_as(&self, me: ProcessId) -> bool {
        let held_by = match self.owner.compare_exchange(
            ProcessId::null(),
            me,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return true,
            Err(observed) => observed,
        };

        if held_by == me {
            // Already ours; this lock does not support reentry.
            return false;
        }

        if holder_is_alive(held_by) {
            return false;
        }

        // The holder is gone, or its PID now belongs to a younger process.
        // Peel the lock from it (best effort; a racing contender may have
        // done the same) and make one fresh attempt.
        let _ = self.owner.compare_exchange(
            held_by,
            ProcessId::null(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.owner
            .compare_exchange(ProcessId::null(), me, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Liveness probe for the recorded holder.
///
/// The holder counts as alive when the kernel reports a process behind its
/// PID whose start time matches, and also when the probe failed for lack
/// of privilege. Cooperating processes are assumed to be able to see each
/// other; a probe we are not allowed to make is no evidence of death, and
/// stealing a live process's lock is the one unrecoverable failure.
fn holder_is_alive(holder: ProcessId) -> bool {
    match ProcessId::of(holder.pid()) {
        Ok(live) => live == holder,
        Err(err) => matches!(err.os_error(), Some(libc::EPERM) | Some(libc::EACCES)),
    }
}

/// RAII guard: the lock is released when the guard drops.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a ProcessIdLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;
    use std::sync::atomic::{AtomicBool, AtomicU64};

    #[test]
    fn zeroed_bytes_are_a_valid_free_lock() {
        let lock = unsafe { MaybeUninit::<ProcessIdLock>::zeroed().assume_init() };
        assert_eq!(lock.holder(), None);
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn adopts_zeroed_storage_in_place() {
        // Stand-in for a zero-filled shared mapping: aligned zero bytes.
        let mut storage: u64 = 0;
        let lock = unsafe { ProcessIdLock::from_ptr((&mut storage as *mut u64).cast()) };
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert_eq!(storage, 0);
    }

    #[test]
    fn try_lock_round_trip() {
        let lock = ProcessIdLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock()); // held by this process: no reentry
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn holder_reports_the_owner() {
        let lock = ProcessIdLock::new();
        assert_eq!(lock.holder(), None);
        assert!(lock.try_lock());
        assert_eq!(lock.holder(), Some(ProcessId::current()));
        lock.unlock();
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn threads_exclude_each_other() {
        let lock = ProcessIdLock::new();
        let a_holds = AtomicBool::new(false);
        let b_checked = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                lock.lock();
                a_holds.store(true, Ordering::SeqCst);
                while !b_checked.load(Ordering::SeqCst) {
                    std::thread::yield_now();
                }
                lock.unlock();
            });

            scope.spawn(|| {
                while !a_holds.load(Ordering::SeqCst) {
                    std::thread::yield_now();
                }
                assert!(!lock.try_lock());
                b_checked.store(true, Ordering::SeqCst);

                // After A releases, this thread must eventually win.
                lock.lock();
                lock.unlock();
            });
        });
    }

    #[test]
    fn guarded_increments_lose_nothing() {
        const THREADS: usize = 10;
        const PER_THREAD: u64 = 10_000;

        let lock = ProcessIdLock::new();
        let nested = ProcessIdLock::new();
        // Plain (non-RMW) updates: only the lock keeps this race-free.
        let counter = AtomicU64::new(0);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..PER_THREAD {
                        std::thread::yield_now();
                        let _guard = lock.guard();
                        // A second lock in the same region stays acquirable
                        // while the first is held.
                        assert!(nested.try_lock());
                        nested.unlock();
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert!(lock.try_lock());
        assert_eq!(counter.load(Ordering::SeqCst), THREADS as u64 * PER_THREAD);
        lock.unlock();
    }

    #[test]
    fn dead_holder_is_evicted() {
        let lock = ProcessIdLock::new();

        // Plant an owner that provably cannot be alive: our own PID with a
        // start time one minute in the future is a recycled-PID signature.
        let me = ProcessId::current();
        let mut start = me.start_time();
        start.tv_sec += 60;
        let ghost = ProcessId::from_parts(me.pid(), start);
        lock.owner.store(ghost, Ordering::SeqCst);

        assert_eq!(lock.holder(), Some(ghost));
        assert!(lock.try_lock(), "a dead holder must be reclaimable");
        assert_eq!(lock.holder(), Some(me));
        lock.unlock();
    }

    #[test]
    fn live_holder_is_not_evicted() {
        let lock = ProcessIdLock::new();

        // A holder that is a different, live process: our parent is as good
        // as it gets in-process.
        let parent = unsafe { libc::getppid() };
        if let Some(parent_id) = ProcessId::maybe(parent) {
            lock.owner.store(parent_id, Ordering::SeqCst);
            assert!(!lock.try_lock(), "a live holder must not be evicted");
            assert_eq!(lock.holder(), Some(parent_id));
        }
    }
}
