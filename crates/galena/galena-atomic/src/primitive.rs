//! Capability traits mapping plain values onto hardware atomics.
//!
//! `IpcAtomic<T>` stores a bare `T` and performs every operation through a
//! same-sized `std::sync::atomic` type projected over the storage with
//! `from_ptr`. The traits here are the capability seams:
//!
//! - [`Primitive`]: load / store / swap / compare-exchange. Everything that
//!   can live in an `IpcAtomic` implements this.
//! - [`ArithmeticPrimitive`]: fetch_add / fetch_sub. Integers and floats
//!   (floats are emulated with a compare-exchange loop since hardware has no
//!   atomic float RMW).
//! - [`BitwisePrimitive`]: fetch_and / fetch_or / fetch_xor. Integers only;
//!   `bool` deliberately gets neither arithmetic nor bitwise ops.
//!
//! Downstream crates implement `Primitive` for `#[repr(transparent)]`
//! newtypes over an integer by delegating to that integer's impl.

use std::sync::atomic::{
    AtomicBool, AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicPtr, AtomicU16,
    AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};

/// A value type whose bytes can be operated on atomically in place.
///
/// # Safety
///
/// Implementors assert all of the following:
///
/// - `Self` is plain old data: trivially copyable, no drop glue, and every
///   bit pattern a cooperating process may write into the storage is a valid
///   value of `Self` (zero bytes included).
/// - The raw operations below touch exactly `size_of::<Self>()` bytes at the
///   given pointer, atomically, with always-lock-free progress on every
///   supported target.
/// - Comparison in `raw_compare_exchange` is bitwise over the value
///   representation.
///
/// Every `raw_*` method requires `ptr` to be non-null, aligned for the
/// backing atomic type, and valid for reads and writes for the duration of
/// the call.
pub unsafe trait Primitive: Copy {
    #[doc(hidden)]
    unsafe fn raw_load(ptr: *mut Self, order: Ordering) -> Self;

    #[doc(hidden)]
    unsafe fn raw_store(ptr: *mut Self, value: Self, order: Ordering);

    #[doc(hidden)]
    unsafe fn raw_swap(ptr: *mut Self, value: Self, order: Ordering) -> Self;

    #[doc(hidden)]
    unsafe fn raw_compare_exchange(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;

    #[doc(hidden)]
    unsafe fn raw_compare_exchange_weak(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
}

/// A [`Primitive`] supporting atomic addition and subtraction.
///
/// # Safety
///
/// Same contract as [`Primitive`]; additionally `raw_fetch_add` /
/// `raw_fetch_sub` must be atomic read-modify-write operations returning the
/// previous value, with integer overflow wrapping around.
pub unsafe trait ArithmeticPrimitive: Primitive {
    /// The unit used by increment/decrement shortcuts.
    const ONE: Self;

    /// Non-atomic wrapping add, used to reconstruct the post-operation value
    /// for the compound-assignment shortcuts.
    fn wrapping_add(a: Self, b: Self) -> Self;

    /// Non-atomic wrapping subtract, counterpart of [`Self::wrapping_add`].
    fn wrapping_sub(a: Self, b: Self) -> Self;

    #[doc(hidden)]
    unsafe fn raw_fetch_add(ptr: *mut Self, value: Self, order: Ordering) -> Self;

    #[doc(hidden)]
    unsafe fn raw_fetch_sub(ptr: *mut Self, value: Self, order: Ordering) -> Self;
}

/// A [`Primitive`] supporting atomic bitwise AND / OR / XOR.
///
/// # Safety
///
/// Same contract as [`Primitive`]; the `raw_fetch_*` operations must be
/// atomic read-modify-write operations returning the previous value.
pub unsafe trait BitwisePrimitive:
    Primitive
    + std::ops::BitAnd<Output = Self>
    + std::ops::BitOr<Output = Self>
    + std::ops::BitXor<Output = Self>
{
    #[doc(hidden)]
    unsafe fn raw_fetch_and(ptr: *mut Self, value: Self, order: Ordering) -> Self;

    #[doc(hidden)]
    unsafe fn raw_fetch_or(ptr: *mut Self, value: Self, order: Ordering) -> Self;

    #[doc(hidden)]
    unsafe fn raw_fetch_xor(ptr: *mut Self, value: Self, order: Ordering) -> Self;
}

macro_rules! integer_primitive {
    ($($ty:ty => $atomic:ident),* $(,)?) => {$(
        // SAFETY: the std atomic has the same size, alignment, and bit
        // validity as the integer it wraps, and is always lock-free on the
        // targets this crate supports.
        unsafe impl Primitive for $ty {
            #[inline(always)]
            unsafe fn raw_load(ptr: *mut Self, order: Ordering) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.load(order)
            }

            #[inline(always)]
            unsafe fn raw_store(ptr: *mut Self, value: Self, order: Ordering) {
                unsafe { $atomic::from_ptr(ptr) }.store(value, order)
            }

            #[inline(always)]
            unsafe fn raw_swap(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.swap(value, order)
            }

            #[inline(always)]
            unsafe fn raw_compare_exchange(
                ptr: *mut Self,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                unsafe { $atomic::from_ptr(ptr) }
                    .compare_exchange(current, new, success, failure)
            }

            #[inline(always)]
            unsafe fn raw_compare_exchange_weak(
                ptr: *mut Self,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                unsafe { $atomic::from_ptr(ptr) }
                    .compare_exchange_weak(current, new, success, failure)
            }
        }

        // SAFETY: delegates to the std atomic's wrapping RMW operations.
        unsafe impl ArithmeticPrimitive for $ty {
            const ONE: Self = 1;

            #[inline(always)]
            fn wrapping_add(a: Self, b: Self) -> Self {
                a.wrapping_add(b)
            }

            #[inline(always)]
            fn wrapping_sub(a: Self, b: Self) -> Self {
                a.wrapping_sub(b)
            }

            #[inline(always)]
            unsafe fn raw_fetch_add(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_add(value, order)
            }

            #[inline(always)]
            unsafe fn raw_fetch_sub(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_sub(value, order)
            }
        }

        // SAFETY: delegates to the std atomic's bitwise RMW operations.
        unsafe impl BitwisePrimitive for $ty {
            #[inline(always)]
            unsafe fn raw_fetch_and(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_and(value, order)
            }

            #[inline(always)]
            unsafe fn raw_fetch_or(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_or(value, order)
            }

            #[inline(always)]
            unsafe fn raw_fetch_xor(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_xor(value, order)
            }
        }
    )*};
}

integer_primitive! {
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
    i8 => AtomicI8,
    i16 => AtomicI16,
    i32 => AtomicI32,
    i64 => AtomicI64,
    isize => AtomicIsize,
}

// SAFETY: AtomicBool has the same layout and bit validity as bool. No
// arithmetic or bitwise capability on purpose.
unsafe impl Primitive for bool {
    #[inline(always)]
    unsafe fn raw_load(ptr: *mut Self, order: Ordering) -> Self {
        unsafe { AtomicBool::from_ptr(ptr) }.load(order)
    }

    #[inline(always)]
    unsafe fn raw_store(ptr: *mut Self, value: Self, order: Ordering) {
        unsafe { AtomicBool::from_ptr(ptr) }.store(value, order)
    }

    #[inline(always)]
    unsafe fn raw_swap(ptr: *mut Self, value: Self, order: Ordering) -> Self {
        unsafe { AtomicBool::from_ptr(ptr) }.swap(value, order)
    }

    #[inline(always)]
    unsafe fn raw_compare_exchange(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self> {
        unsafe { AtomicBool::from_ptr(ptr) }.compare_exchange(current, new, success, failure)
    }

    #[inline(always)]
    unsafe fn raw_compare_exchange_weak(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self> {
        unsafe { AtomicBool::from_ptr(ptr) }.compare_exchange_weak(current, new, success, failure)
    }
}

// SAFETY: every object pointer has the same layout as AtomicPtr<U>.
unsafe impl<U> Primitive for *mut U {
    #[inline(always)]
    unsafe fn raw_load(ptr: *mut Self, order: Ordering) -> Self {
        unsafe { AtomicPtr::from_ptr(ptr) }.load(order)
    }

    #[inline(always)]
    unsafe fn raw_store(ptr: *mut Self, value: Self, order: Ordering) {
        unsafe { AtomicPtr::from_ptr(ptr) }.store(value, order)
    }

    #[inline(always)]
    unsafe fn raw_swap(ptr: *mut Self, value: Self, order: Ordering) -> Self {
        unsafe { AtomicPtr::from_ptr(ptr) }.swap(value, order)
    }

    #[inline(always)]
    unsafe fn raw_compare_exchange(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self> {
        unsafe { AtomicPtr::from_ptr(ptr) }.compare_exchange(current, new, success, failure)
    }

    #[inline(always)]
    unsafe fn raw_compare_exchange_weak(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self> {
        unsafe { AtomicPtr::from_ptr(ptr) }.compare_exchange_weak(current, new, success, failure)
    }
}

macro_rules! float_primitive {
    ($($ty:ty => ($bits:ty, $atomic:ident)),* $(,)?) => {$(
        // SAFETY: the float is stored as its raw bit pattern in the
        // same-sized atomic integer; to_bits/from_bits are lossless, and
        // comparison stays bitwise (two NaNs with the same payload compare
        // equal, +0.0 and -0.0 do not).
        unsafe impl Primitive for $ty {
            #[inline(always)]
            unsafe fn raw_load(ptr: *mut Self, order: Ordering) -> Self {
                <$ty>::from_bits(unsafe { $atomic::from_ptr(ptr.cast::<$bits>()) }.load(order))
            }

            #[inline(always)]
            unsafe fn raw_store(ptr: *mut Self, value: Self, order: Ordering) {
                unsafe { $atomic::from_ptr(ptr.cast::<$bits>()) }.store(value.to_bits(), order)
            }

            #[inline(always)]
            unsafe fn raw_swap(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                <$ty>::from_bits(
                    unsafe { $atomic::from_ptr(ptr.cast::<$bits>()) }.swap(value.to_bits(), order),
                )
            }

            #[inline(always)]
            unsafe fn raw_compare_exchange(
                ptr: *mut Self,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                unsafe { $atomic::from_ptr(ptr.cast::<$bits>()) }
                    .compare_exchange(current.to_bits(), new.to_bits(), success, failure)
                    .map(<$ty>::from_bits)
                    .map_err(<$ty>::from_bits)
            }

            #[inline(always)]
            unsafe fn raw_compare_exchange_weak(
                ptr: *mut Self,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                unsafe { $atomic::from_ptr(ptr.cast::<$bits>()) }
                    .compare_exchange_weak(current.to_bits(), new.to_bits(), success, failure)
                    .map(<$ty>::from_bits)
                    .map_err(<$ty>::from_bits)
            }
        }

        // SAFETY: hardware has no atomic float RMW; emulated with a weak
        // compare-exchange loop on the bit pattern. The returned value is the
        // one the successful exchange observed, so the fetch_* contract holds.
        unsafe impl ArithmeticPrimitive for $ty {
            const ONE: Self = 1.0;

            #[inline(always)]
            fn wrapping_add(a: Self, b: Self) -> Self {
                a + b
            }

            #[inline(always)]
            fn wrapping_sub(a: Self, b: Self) -> Self {
                a - b
            }

            #[inline(always)]
            unsafe fn raw_fetch_add(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                let atom = unsafe { $atomic::from_ptr(ptr.cast::<$bits>()) };
                let mut observed = atom.load(Ordering::Relaxed);
                loop {
                    let next = (<$ty>::from_bits(observed) + value).to_bits();
                    match atom.compare_exchange_weak(observed, next, order, Ordering::Relaxed) {
                        Ok(prev) => return <$ty>::from_bits(prev),
                        Err(actual) => observed = actual,
                    }
                }
            }

            #[inline(always)]
            unsafe fn raw_fetch_sub(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                let atom = unsafe { $atomic::from_ptr(ptr.cast::<$bits>()) };
                let mut observed = atom.load(Ordering::Relaxed);
                loop {
                    let next = (<$ty>::from_bits(observed) - value).to_bits();
                    match atom.compare_exchange_weak(observed, next, order, Ordering::Relaxed) {
                        Ok(prev) => return <$ty>::from_bits(prev),
                        Err(actual) => observed = actual,
                    }
                }
            }
        }
    )*};
}

float_primitive! {
    f32 => (u32, AtomicU32),
    f64 => (u64, AtomicU64),
}
