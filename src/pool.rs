//! Memory pool for heap payload buffers.
//!
//! Receiving a heap means owning a payload buffer for as long as the
//! heap is live. Instead of allocating a fresh buffer per heap, buffers
//! are recycled through a pool: dropping a [`PooledBuf`] returns its
//! storage to the pool while the pool holds fewer than `high_water`
//! free buffers, and frees it otherwise.
//!
//! Buffers are uninitialized storage. Payload bytes are copied in at
//! arbitrary offsets as packets arrive; nothing is ever zero-filled on
//! that path. Callers track which ranges have been written and only
//! expose initialized prefixes (see [`PooledBuf::assume_init`]).

use std::mem::MaybeUninit;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Default buffer size (64 KiB): comfortably holds a heap's payload for
/// typical packet-per-heap workloads while keeping waste bounded.
const DEFAULT_BUF_SIZE: usize = 64 * 1024;

/// Default number of free buffers retained by the pool.
const DEFAULT_HIGH_WATER: usize = 32;

type RawBuf = Box<[MaybeUninit<u8>]>;

fn alloc_uninit(size: usize) -> RawBuf {
    Box::new_uninit_slice(size)
}

struct PoolInner {
    buf_size: usize,
    high_water: usize,
    free: Mutex<Vec<RawBuf>>,
}

impl PoolInner {
    fn release(&self, buf: RawBuf) {
        // Buffers that came from a fallback direct allocation have the
        // wrong size and never re-enter the free list.
        if buf.len() == self.buf_size {
            let mut free = self.free.lock();
            if free.len() < self.high_water {
                free.push(buf);
            }
        }
    }
}

/// Thread-safe recycler of fixed-size payload buffers.
///
/// Cloning is cheap and shares the pool. The pool keeps no strong
/// reference to issued buffers; each [`PooledBuf`] holds a weak
/// back-reference for its release path, so dropping the last
/// `MemoryPool` clone simply turns releases into frees.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Create a pool with default buffer size and retention.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_BUF_SIZE, DEFAULT_HIGH_WATER)
    }

    /// Create a pool issuing buffers of `buf_size` bytes, retaining at
    /// most `high_water` free buffers.
    pub fn with_config(buf_size: usize, high_water: usize) -> Self {
        MemoryPool {
            inner: Arc::new(PoolInner {
                buf_size,
                high_water,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Take a buffer of [`buf_size`](Self::buf_size) bytes from the
    /// pool, allocating fresh storage if the free list is empty.
    pub fn allocate(&self) -> PooledBuf {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| alloc_uninit(self.inner.buf_size));
        PooledBuf {
            buf,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Size of the buffers this pool issues.
    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    /// Number of free buffers currently retained.
    pub fn free_len(&self) -> usize {
        self.inner.free.lock().len()
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("buf_size", &self.inner.buf_size)
            .field("high_water", &self.inner.high_water)
            .field("free", &self.free_len())
            .finish()
    }
}

/// A buffer of uninitialized bytes, returned to its pool on drop.
pub struct PooledBuf {
    buf: RawBuf,
    pool: Weak<PoolInner>,
}

impl PooledBuf {
    /// An empty buffer bound to no pool. Placeholder until the first
    /// reservation decides a real size.
    pub fn empty() -> Self {
        PooledBuf {
            buf: Box::new([]),
            pool: Weak::new(),
        }
    }

    /// Allocate a buffer of exactly `size` bytes, bypassing any pool.
    /// Dropping it frees the storage.
    pub fn direct(size: usize) -> Self {
        PooledBuf {
            buf: alloc_uninit(size),
            pool: Weak::new(),
        }
    }

    /// Usable size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Copy `src` into the buffer starting at `offset`.
    ///
    /// Panics if the range falls outside the buffer; callers reserve
    /// capacity before writing.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) {
        let dst = &mut self.buf[offset..offset + src.len()];
        // SAFETY: `u8` and `MaybeUninit<u8>` have identical layout, and
        // the destination range was bounds-checked by the slice above.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr().cast::<u8>(), src.len());
        }
    }

    /// Zero the given range, marking it initialized.
    pub fn write_zeros(&mut self, offset: usize, len: usize) {
        for byte in &mut self.buf[offset..offset + len] {
            byte.write(0);
        }
    }

    /// Copy as much of `other` as fits, preserving the initialization
    /// state of every copied byte. Used when growing a payload buffer.
    pub fn copy_from(&mut self, other: &PooledBuf) {
        let n = other.buf.len().min(self.buf.len());
        self.buf[..n].copy_from_slice(&other.buf[..n]);
    }

    /// View the first `len` bytes as initialized memory.
    ///
    /// # Safety
    ///
    /// Every byte in `[0, len)` must have been written via
    /// [`write_at`](Self::write_at) or [`write_zeros`](Self::write_zeros).
    pub unsafe fn assume_init(&self, len: usize) -> &[u8] {
        debug_assert!(len <= self.buf.len());
        unsafe { std::slice::from_raw_parts(self.buf.as_ptr().cast::<u8>(), len) }
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        if let Some(pool) = self.pool.upgrade() {
            pool.release(buf);
        }
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("capacity", &self.buf.len())
            .field("pooled", &(self.pool.strong_count() > 0))
            .finish()
    }
}
