//! Typed file-backed shared regions.
//!
//! A region holds exactly one `#[repr(C)]` layout struct shared by every
//! cooperating process. The creator sizes the file to the layout; the
//! kernel zero-fills those bytes, and zero bytes are exactly the valid
//! initial state of every galena type (null identifier, free lock, zero
//! cell), so no initialization handshake is needed before other processes
//! attach. Openers validate the mapping against the layout before any
//! typed access is handed out: a file shorter than the layout, or a base
//! address the layout's alignment cannot live at, is rejected up front
//! instead of surfacing later as a stray fault.
//!
//! Every participant maps read-write; even "readers" of a lock word must
//! be able to compare-exchange it.

#![warn(unsafe_op_in_unsafe_fn)]

use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::path::Path;

/// A shared mapping holding one layout struct `T`.
pub struct SharedRegion<T> {
    _file: File,
    mmap: MmapMut,
    _layout: PhantomData<T>,
}

impl<T> SharedRegion<T> {
    /// Creates (or truncates) the file at `path`, sized to hold one `T`,
    /// and maps it read-write.
    ///
    /// The bytes come back zero-filled from the kernel, which is the valid
    /// initial state of every galena type; workers may attach as soon as
    /// this returns.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_of::<T>() as u64)?;
        Self::map(file)
    }

    /// Maps an existing region file read-write, validating it against the
    /// layout.
    ///
    /// Fails with `InvalidData` while the creator is still sizing the file,
    /// so attach loops can simply retry on error.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::map(file)
    }

    fn map(file: File) -> io::Result<Self> {
        // SAFETY: the mapping stays valid for the struct's lifetime because
        // the file handle is held alongside it.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() < size_of::<T>() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "region file smaller than its layout",
            ));
        }
        if (mmap.as_ptr() as usize) % align_of::<T>() != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "region base misaligned for its layout",
            ));
        }
        Ok(Self {
            _file: file,
            mmap,
            _layout: PhantomData,
        })
    }

    /// Projects the layout struct over the mapped bytes.
    ///
    /// # Safety
    ///
    /// `T` must be implicit-lifetime plain old data: every bit pattern the
    /// cooperating processes may write (zero bytes included) is a valid
    /// `T`, and all concurrent access goes through the atomics inside it.
    #[inline]
    pub unsafe fn get(&self) -> &T {
        // SAFETY: length and alignment were validated in map(); value
        // validity is the caller's contract.
        unsafe { &*self.mmap.as_ptr().cast::<T>() }
    }

    /// Exclusive projection, for the creator stamping identification
    /// fields before anyone else attaches.
    ///
    /// # Safety
    ///
    /// Same contract as [`SharedRegion::get`], plus: no other process or
    /// thread may access the region for the lifetime of the returned
    /// reference.
    #[inline]
    pub unsafe fn get_mut(&mut self) -> &mut T {
        // SAFETY: as in get(); exclusivity is the caller's contract.
        unsafe { &mut *self.mmap.as_mut_ptr().cast::<T>() }
    }

    /// Size of the underlying mapping in bytes; at least `size_of::<T>()`.
    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }
}
