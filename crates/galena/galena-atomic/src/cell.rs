//! The atomic cell itself.
//!
//! # Why not `std::sync::atomic` directly
//!
//! The std atomic types are perfectly usable *inside* one process, but they
//! offer no sanctioned way to be laid over bytes that already exist in a
//! shared mapping: constructing one is a write, and two processes cannot
//! both "create" the object occupying the same bytes. `IpcAtomic<T>` is the
//! adoption-friendly rendition: its storage is a bare `T`, zero bytes are a
//! valid cell holding zero, and [`IpcAtomic::from_ptr`] projects a reference
//! over pre-existing storage without running any initialization.
//!
//! # Memory layout
//!
//! ```text
//! ┌──────────────────────────┐
//! │  value: T  (bare bytes)  │   #[repr(transparent)]
//! └──────────────────────────┘
//! ```
//!
//! Two processes mapping the same region observe the same valid cell without
//! either needing to construct it; the only non-atomic writes allowed are
//! [`IpcAtomic::init`] during single-owner setup.

use crate::primitive::{ArithmeticPrimitive, BitwisePrimitive, Primitive};
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::Ordering;

/// An atomic cell of `T` safe to place in memory shared across processes.
///
/// The cell is neither clonable nor copyable: its address is its identity.
/// All operations go through `&self`; cross-process callers obtain that
/// reference with [`IpcAtomic::from_ptr`] over their own mapping of the
/// shared bytes.
#[repr(transparent)]
pub struct IpcAtomic<T: Primitive> {
    value: UnsafeCell<T>,
}

// SAFETY: all shared access goes through hardware atomics.
unsafe impl<T: Primitive + Send> Sync for IpcAtomic<T> {}

impl<T: Primitive> IpcAtomic<T> {
    /// Creates a cell holding `value`.
    ///
    /// The initialization is not atomic; this is the value-initializing
    /// constructor for storage the caller exclusively owns.
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// Adopts existing storage as an atomic cell.
    ///
    /// This is the cross-process entry point: map a region whose bytes were
    /// zero-filled at creation (`ftruncate` + `mmap`, `shm_open` of a fresh
    /// segment) and project cells over it. No constructor runs; the bytes
    /// already are the object.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, aligned for `T`, valid for reads and writes
    /// for `'a`, and every concurrent access to these bytes (from any
    /// process) must go through atomic operations of the same width.
    #[inline]
    pub unsafe fn from_ptr<'a>(ptr: *mut T) -> &'a Self {
        // SAFETY: #[repr(transparent)] makes *mut T and *mut Self
        // interchangeable; validity is the caller's contract.
        unsafe { &*ptr.cast::<Self>() }
    }

    /// Writes `value` non-atomically into a just-constructed or just-adopted
    /// cell.
    ///
    /// # Safety
    ///
    /// Calling this concurrently with any other access to the cell, even an
    /// atomic one, is a data race. Calling it on a cell that other
    /// participants have already begun operating on violates the contract.
    #[inline]
    pub unsafe fn init(&self, value: T) {
        // SAFETY: exclusivity is the caller's contract.
        unsafe { self.value.get().write(value) };
    }

    /// Atomically loads the current value.
    ///
    /// Panics if `order` is a store ordering (`Release`, `AcqRel`), same as
    /// the std atomics this delegates to.
    #[inline(always)]
    pub fn load(&self, order: Ordering) -> T {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_load(self.value.get(), order) }
    }

    /// Atomically stores `value`.
    ///
    /// Panics if `order` is a load ordering (`Acquire`, `AcqRel`).
    #[inline(always)]
    pub fn store(&self, value: T, order: Ordering) {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_store(self.value.get(), value, order) }
    }

    /// Atomically replaces the value, returning the previous one.
    #[inline(always)]
    pub fn swap(&self, value: T, order: Ordering) -> T {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_swap(self.value.get(), value, order) }
    }

    /// Atomically replaces the value with `new` if it bitwise-equals
    /// `current`.
    ///
    /// On success returns `Ok` with the previous value; on failure returns
    /// `Err` with the value actually observed.
    #[inline(always)]
    pub fn compare_exchange(
        &self,
        current: T,
        new: T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T, T> {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_compare_exchange(self.value.get(), current, new, success, failure) }
    }

    /// Weak variant of [`IpcAtomic::compare_exchange`]; may fail spuriously,
    /// which makes it the right shape for retry loops.
    #[inline(always)]
    pub fn compare_exchange_weak(
        &self,
        current: T,
        new: T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T, T> {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_compare_exchange_weak(self.value.get(), current, new, success, failure) }
    }

    /// Returns a raw pointer to the underlying storage.
    #[inline]
    pub const fn as_ptr(&self) -> *mut T {
        self.value.get()
    }

    /// Non-atomic access through exclusive ownership.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consumes the cell, returning the stored value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ArithmeticPrimitive> IpcAtomic<T> {
    /// Atomically adds `value`, returning the **previous** value.
    #[inline(always)]
    pub fn fetch_add(&self, value: T, order: Ordering) -> T {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_fetch_add(self.value.get(), value, order) }
    }

    /// Atomically subtracts `value`, returning the **previous** value.
    #[inline(always)]
    pub fn fetch_sub(&self, value: T, order: Ordering) -> T {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_fetch_sub(self.value.get(), value, order) }
    }

    /// Compound-assignment shortcut: adds `value` seq_cst and returns the
    /// **new** value.
    #[inline(always)]
    pub fn add(&self, value: T) -> T {
        T::wrapping_add(self.fetch_add(value, Ordering::SeqCst), value)
    }

    /// Compound-assignment shortcut: subtracts `value` seq_cst and returns
    /// the **new** value.
    #[inline(always)]
    pub fn sub(&self, value: T) -> T {
        T::wrapping_sub(self.fetch_sub(value, Ordering::SeqCst), value)
    }

    /// Pre-increment: adds one and returns the **new** value.
    #[inline(always)]
    pub fn inc(&self) -> T {
        self.add(T::ONE)
    }

    /// Pre-decrement: subtracts one and returns the **new** value.
    #[inline(always)]
    pub fn dec(&self) -> T {
        self.sub(T::ONE)
    }

    /// Post-increment: adds one and returns the **previous** value.
    #[inline(always)]
    pub fn post_inc(&self) -> T {
        self.fetch_add(T::ONE, Ordering::SeqCst)
    }

    /// Post-decrement: subtracts one and returns the **previous** value.
    #[inline(always)]
    pub fn post_dec(&self) -> T {
        self.fetch_sub(T::ONE, Ordering::SeqCst)
    }
}

impl<T: BitwisePrimitive> IpcAtomic<T> {
    /// Atomically ANDs with `value`, returning the **previous** value.
    #[inline(always)]
    pub fn fetch_and(&self, value: T, order: Ordering) -> T {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_fetch_and(self.value.get(), value, order) }
    }

    /// Atomically ORs with `value`, returning the **previous** value.
    #[inline(always)]
    pub fn fetch_or(&self, value: T, order: Ordering) -> T {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_fetch_or(self.value.get(), value, order) }
    }

    /// Atomically XORs with `value`, returning the **previous** value.
    #[inline(always)]
    pub fn fetch_xor(&self, value: T, order: Ordering) -> T {
        // SAFETY: self.value is valid, aligned storage for T.
        unsafe { T::raw_fetch_xor(self.value.get(), value, order) }
    }

    /// Compound-assignment shortcut: ANDs seq_cst, returns the **new** value.
    #[inline(always)]
    pub fn and(&self, value: T) -> T {
        self.fetch_and(value, Ordering::SeqCst) & value
    }

    /// Compound-assignment shortcut: ORs seq_cst, returns the **new** value.
    #[inline(always)]
    pub fn or(&self, value: T) -> T {
        self.fetch_or(value, Ordering::SeqCst) | value
    }

    /// Compound-assignment shortcut: XORs seq_cst, returns the **new** value.
    #[inline(always)]
    pub fn xor(&self, value: T) -> T {
        self.fetch_xor(value, Ordering::SeqCst) ^ value
    }
}

impl<U> IpcAtomic<*mut U> {
    /// Atomically offsets the stored pointer by `count` elements of `U`,
    /// returning the **previous** pointer.
    ///
    /// Emulated with a compare-exchange loop; stable hardware pointer
    /// atomics only cover whole-pointer exchange.
    #[inline]
    pub fn fetch_ptr_add(&self, count: isize, order: Ordering) -> *mut U {
        let mut observed = self.load(Ordering::Relaxed);
        loop {
            let next = observed.wrapping_offset(count);
            match self.compare_exchange_weak(observed, next, order, Ordering::Relaxed) {
                Ok(prev) => return prev,
                Err(actual) => observed = actual,
            }
        }
    }

    /// Atomically offsets the stored pointer by `-count` elements of `U`,
    /// returning the **previous** pointer.
    #[inline]
    pub fn fetch_ptr_sub(&self, count: isize, order: Ordering) -> *mut U {
        self.fetch_ptr_add(count.wrapping_neg(), order)
    }
}

impl<T: Primitive + fmt::Debug> fmt::Debug for IpcAtomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IpcAtomic")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}
