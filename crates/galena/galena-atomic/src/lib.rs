//! `galena-atomic`: atomic cells with implicit lifetime, for storage shared
//! across processes.
//!
//! The cell type here exists for one reason: bytes in a shared mapping do
//! not belong to any single process, so no process may "construct" the
//! object living in them. [`IpcAtomic<T>`] is declared so that zero-filled
//! bytes *are* a valid cell, and [`IpcAtomic::from_ptr`] adopts existing
//! storage without running any initialization. On top of that it exposes the
//! full hardware-atomic operation set with caller-chosen memory orderings.
//!
//! # Example
//!
//! ```ignore
//! use galena_atomic::IpcAtomic;
//! use std::sync::atomic::Ordering;
//!
//! // `base` points into a freshly ftruncate'd (zero-filled) mmap region.
//! let counter: &IpcAtomic<u64> = unsafe { IpcAtomic::from_ptr(base.cast()) };
//! counter.fetch_add(1, Ordering::SeqCst); // any process can do this
//! ```
//!
//! # Internal Modules
//!
//! - `primitive`: capability traits mapping value types onto std atomics
//! - `cell`: the `IpcAtomic<T>` cell

#![warn(unsafe_op_in_unsafe_fn)]

mod cell;
mod primitive;

pub use cell::IpcAtomic;
pub use primitive::{ArithmeticPrimitive, BitwisePrimitive, Primitive};
