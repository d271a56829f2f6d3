//! The packed (PID, start-time) identifier.
//!
//! # Encoding
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────┐
//! │  pid (high 32 bits)│  start.tv_sec − epoch (low)  │   u64
//! └────────────────────┴──────────────────────────────┘
//! ```
//!
//! The epoch is 2024-01-01 00:00:00 UTC, so the low half stays small for
//! decades. Microseconds are discarded: the value must fit in something the
//! hardware can compare-and-swap lock-free, and stable Rust offers no
//! always-lock-free 128-bit atomic to widen into. Second granularity is
//! plenty to tell a recycled PID from its previous owner.
//!
//! All-zero bytes are the null identifier. PID 0 is never handed to a user
//! process, so no live process ever packs to zero; that is what makes a
//! zero-filled shared mapping a valid "nobody" value.

use crate::start_time::start_time_of;
use crate::StartTimeError;
use galena_atomic::Primitive;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

/// Seconds from the Unix epoch to 2024-01-01 00:00:00 UTC.
const EPOCH_2024_UTC: i64 = 1_704_067_200;

/// An extended process identifier: the OS PID plus the process start time,
/// packed into one atomically-exchangeable value.
///
/// A bare PID is recyclable; the kernel hands it to an unrelated process
/// once the original dies. Pairing it with the start time makes collisions
/// practically impossible, which is what lets
/// [`ProcessIdLock`](../galena_lock/struct.ProcessIdLock.html) decide whether
/// a lock holder is still alive.
///
/// The type is plain old data and safe to place in shared memory; equality
/// and ordering are bitwise over the packed value.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProcessId(u64);

impl ProcessId {
    /// The null identifier: all-zero bytes, equal to no live process.
    #[inline]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Whether this is the null identifier.
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Identifier of a currently running process.
    ///
    /// Fails when the OS reports no start time for `pid`: the process is
    /// not running (or is a zombie), the proc entry is malformed, or the
    /// caller lacks the privilege to inspect it. The error records the PID
    /// and, when the OS left one behind, the underlying system error.
    pub fn of(pid: libc::pid_t) -> Result<Self, StartTimeError> {
        Self::maybe(pid).ok_or_else(|| StartTimeError::for_pid(pid))
    }

    /// Non-failing peer of [`ProcessId::of`]: `None` when the OS reports no
    /// start time.
    ///
    /// `None` does not prove the process is gone: a process may exist that
    /// the caller lacks permission to inspect.
    pub fn maybe(pid: libc::pid_t) -> Option<Self> {
        start_time_of(pid).map(|start| Self::from_parts(pid, start))
    }

    /// Builds an identifier from a PID and a start time, without consulting
    /// the OS.
    ///
    /// Used for serialization and for reconstructing previously observed
    /// values; the process does not have to be running. The result compares
    /// equal to a live process's identifier only if `start` matches (after
    /// the encoding's truncation to seconds) what the OS currently reports
    /// for that PID.
    #[inline]
    pub const fn from_parts(pid: libc::pid_t, start: libc::timeval) -> Self {
        let seconds = (start.tv_sec as i64).wrapping_sub(EPOCH_2024_UTC) as u32;
        Self(((pid as u32 as u64) << 32) | seconds as u64)
    }

    /// The encoded OS PID. A pure projection of the stored bits; the
    /// process does not have to be running.
    #[inline]
    pub const fn pid(&self) -> libc::pid_t {
        (self.0 >> 32) as u32 as libc::pid_t
    }

    /// The encoded start time. The microsecond field is always zero under
    /// this encoding.
    #[inline]
    pub const fn start_time(&self) -> libc::timeval {
        libc::timeval {
            tv_sec: (EPOCH_2024_UTC + self.0 as u32 as i64) as libc::time_t,
            tv_usec: 0,
        }
    }

    /// The packed value. Serialize little-endian at this width.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Reconstructs an identifier from [`ProcessId::to_bits`].
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Identifier of the calling process.
    ///
    /// Cached in process-wide storage. A `pthread_atfork` child handler
    /// refreshes the cache, so a forked child observes its own identity
    /// rather than inheriting the parent's.
    ///
    /// # Panics
    ///
    /// Panics if the start time of the calling process itself cannot be
    /// discovered (e.g. `/proc` is not mounted). Every cooperating process
    /// must be able to see at least itself.
    pub fn current() -> Self {
        static REGISTER: Once = Once::new();
        REGISTER.call_once(|| {
            // SAFETY: registering an async-signal-safe handler.
            unsafe { libc::pthread_atfork(None, None, Some(refresh_after_fork)) };
        });

        match CURRENT.load(Ordering::Relaxed) {
            0 => {
                // SAFETY: getpid cannot fail.
                let me = Self::of(unsafe { libc::getpid() })
                    .expect("start time of the calling process must be discoverable");
                CURRENT.store(me.0, Ordering::Relaxed);
                me
            }
            bits => Self(bits),
        }
    }
}

/// Cached identity of this process; zero means "not yet probed".
static CURRENT: AtomicU64 = AtomicU64::new(0);

/// Post-fork child handler. Re-probes eagerly (the probe path is
/// async-signal-safe); if even that fails the cache is cleared so the next
/// [`ProcessId::current`] retries.
unsafe extern "C" fn refresh_after_fork() {
    // SAFETY: getpid cannot fail and is async-signal-safe.
    let me = ProcessId::maybe(unsafe { libc::getpid() });
    CURRENT.store(me.map_or(0, ProcessId::to_bits), Ordering::Relaxed);
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessId")
            .field("pid", &self.pid())
            .field("start_sec", &self.start_time().tv_sec)
            .finish()
    }
}

// SAFETY: ProcessId is #[repr(transparent)] over u64; every operation
// delegates to the u64 impl, so size, alignment, lock-freedom, and bitwise
// comparison all carry over. Every bit pattern is a valid ProcessId.
unsafe impl Primitive for ProcessId {
    #[inline(always)]
    unsafe fn raw_load(ptr: *mut Self, order: Ordering) -> Self {
        Self(unsafe { <u64 as Primitive>::raw_load(ptr.cast(), order) })
    }

    #[inline(always)]
    unsafe fn raw_store(ptr: *mut Self, value: Self, order: Ordering) {
        unsafe { <u64 as Primitive>::raw_store(ptr.cast(), value.0, order) }
    }

    #[inline(always)]
    unsafe fn raw_swap(ptr: *mut Self, value: Self, order: Ordering) -> Self {
        Self(unsafe { <u64 as Primitive>::raw_swap(ptr.cast(), value.0, order) })
    }

    #[inline(always)]
    unsafe fn raw_compare_exchange(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self> {
        unsafe {
            <u64 as Primitive>::raw_compare_exchange(ptr.cast(), current.0, new.0, success, failure)
        }
        .map(Self)
        .map_err(Self)
    }

    #[inline(always)]
    unsafe fn raw_compare_exchange_weak(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self> {
        unsafe {
            <u64 as Primitive>::raw_compare_exchange_weak(
                ptr.cast(),
                current.0,
                new.0,
                success,
                failure,
            )
        }
        .map(Self)
        .map_err(Self)
    }
}
