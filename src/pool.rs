//! Fixed-capacity chunk pool with an intrusive free list.
//!
//! # Scope
//! One contiguous buffer of `chunk_size * chunk_count` bytes is carved into
//! fixed-size chunks. Free chunks are threaded into a singly linked list
//! stored *inside* the chunks themselves: while a chunk is free, its first
//! four bytes hold the byte offset of the next free chunk (or `-1` for the
//! tail). Renting pops the head, releasing pushes it back; both are O(1)
//! under a short-held mutex.
//!
//! When the free list is empty, [`ChunkPool::rent`] falls back to a fresh
//! heap allocation of the same size so callers never fail on exhaustion.
//!
//! # Invariants
//! - `chunk_size >= 4` (the free-list link needs four bytes) and
//!   `chunk_size * chunk_count <= MAX_POOL_BYTES`.
//! - Offsets stored in the free list are chunk-aligned and in bounds; they
//!   are only read or written while the list mutex is held.
//! - A rented chunk's region is never touched by the pool until released.
//!   Because the link overlays the data area, a free chunk's contents are
//!   undefined to users; rent with `clear` when zeroed memory is required.
//! - Rent/release are LIFO: the most recently released chunk is rented next.
//!
//! # Failure modes
//! - Construction rejects undersized or oversized configurations.
//! - Releasing a pool chunk whose buffer is not this pool's buffer fails
//!   with [`PoolError::ForeignChunk`]; the pool remains usable.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[cfg(not(loom))]
use std::sync::Mutex;

#[cfg(loom)]
use loom::sync::Mutex;

#[cfg(not(loom))]
use std::sync::OnceLock;

use crate::chunk::Chunk;
use crate::error::PoolError;
use crate::stats;

/// Minimum chunk size: the intrusive link occupies the first four bytes.
pub const MIN_CHUNK_SIZE: usize = 4;

/// Maximum total buffer size for one pool.
pub const MAX_POOL_BYTES: usize = 0x7FFF_FFC7;

/// Alignment of the shared buffer (one page, matching pooled-buffer practice
/// elsewhere in the allocator).
const BUFFER_ALIGN: usize = 4096;

/// Free-list terminator and the "no next chunk" sentinel.
const FREE_LIST_END: i32 = -1;

/// Source of fixed-size chunks: the seam between streams and allocators.
///
/// [`ChunkPool`] is the production implementation; tests substitute
/// heap-backed doubles with arbitrary chunk sizes.
pub trait ChunkSource: Send + Sync {
    /// The fixed size of every chunk this source hands out.
    fn chunk_size(&self) -> usize;

    /// Rents a chunk, falling back to a heap allocation on exhaustion.
    fn rent(&self, clear: bool) -> Chunk;

    /// Releases a chunk back to this source.
    fn release(&self, chunk: Chunk) -> Result<(), PoolError>;
}

/// The pool's shared backing allocation.
///
/// Kept behind an `Arc` that every outstanding pool chunk also holds, so the
/// buffer outlives any chunk still referring into it even if the pool itself
/// is dropped first.
#[derive(Debug)]
pub(crate) struct PoolBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl PoolBuffer {
    fn allocate(len: usize) -> Self {
        let layout = Layout::from_size_align(len, BUFFER_ALIGN)
            .expect("pool buffer layout validated by constructor bounds");
        // SAFETY: layout has non-zero size (chunk_size >= 4, chunk_count >= 1).
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(layout));
        Self { ptr, len, layout }
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        // SAFETY: same layout as the allocation in `allocate`.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: the buffer is plain memory; all mutation goes through chunks that
// hold exclusive leases on disjoint regions, or through the pool's free-list
// mutex for the link words.
unsafe impl Send for PoolBuffer {}
unsafe impl Sync for PoolBuffer {}

/// Head of the intrusive free list; the links live in the buffer itself.
#[derive(Debug)]
struct FreeList {
    head: i32,
}

/// Thread-safe pool of fixed-size chunks over one contiguous buffer.
///
/// The pool may be shared across many streams and threads; all free-list
/// mutation serializes on one mutex that is held only for the pointer swap.
#[derive(Debug)]
pub struct ChunkPool {
    buffer: Arc<PoolBuffer>,
    chunk_size: usize,
    chunk_count: usize,
    free: Mutex<FreeList>,
    /// Chunks currently lent out of this pool (pool and heap provenance).
    /// Advisory, like the process-global counters.
    lent: AtomicUsize,
}

impl ChunkPool {
    /// Creates a pool of `chunk_count` chunks of `chunk_size` bytes each.
    ///
    /// All chunks start free, linked through their first four bytes with the
    /// last chunk holding the `-1` terminator.
    ///
    /// # Errors
    /// `InvalidArgument` when `chunk_size < 4`, `chunk_count < 1`, or the
    /// total buffer size exceeds [`MAX_POOL_BYTES`].
    pub fn new(chunk_size: usize, chunk_count: usize) -> Result<Self, PoolError> {
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(PoolError::InvalidArgument {
                detail: "chunk size must be at least 4 bytes",
            });
        }
        if chunk_count < 1 {
            return Err(PoolError::InvalidArgument {
                detail: "chunk count must be at least 1",
            });
        }
        let total = chunk_size
            .checked_mul(chunk_count)
            .filter(|&t| t <= MAX_POOL_BYTES)
            .ok_or(PoolError::InvalidArgument {
                detail: "total pool size exceeds the maximum",
            })?;

        let buffer = Arc::new(PoolBuffer::allocate(total));
        let pool = Self {
            buffer,
            chunk_size,
            chunk_count,
            free: Mutex::new(FreeList { head: 0 }),
            lent: AtomicUsize::new(0),
        };

        for i in 0..chunk_count {
            let offset = i * chunk_size;
            let next = if i + 1 < chunk_count {
                (offset + chunk_size) as i32
            } else {
                FREE_LIST_END
            };
            // SAFETY: offset is a valid chunk offset; no chunk is lent yet.
            unsafe { pool.write_link(offset, next) };
        }

        tracing::debug!(chunk_size, chunk_count, "chunk pool created");
        Ok(pool)
    }

    /// The fixed size of every chunk in this pool.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks the shared buffer is carved into.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Chunks currently lent out of this pool. Advisory.
    pub fn lent_chunks(&self) -> usize {
        self.lent.load(Ordering::Relaxed)
    }

    /// Number of chunks currently linked in the free list.
    ///
    /// Walks the list under the lock; O(free chunks). Intended for
    /// diagnostics and tests, not hot paths.
    pub fn free_chunks(&self) -> usize {
        let free = self.lock_free_list();
        let mut count = 0;
        let mut offset = free.head;
        while offset != FREE_LIST_END {
            count += 1;
            // SAFETY: offsets in the list are valid free chunks; lock held.
            offset = unsafe { self.read_link(offset as usize) };
        }
        count
    }

    /// Pops the head of the free list, or returns `None` when the pool is
    /// empty. Zeroes the region first when `clear` is set.
    ///
    /// Never blocks beyond the short free-list critical section.
    pub fn try_rent(&self, clear: bool) -> Option<Chunk> {
        let offset = {
            let mut free = self.lock_free_list();
            if free.head == FREE_LIST_END {
                return None;
            }
            let head = free.head as usize;
            // SAFETY: head is a valid free chunk offset; lock held.
            free.head = unsafe { self.read_link(head) };
            head
        };

        self.lent.fetch_add(1, Ordering::Relaxed);
        stats::add_pool_bytes(self.chunk_size as i64);

        let mut chunk = Chunk::from_pool(Arc::clone(&self.buffer), offset as u32, self.chunk_size);
        if clear {
            chunk.as_mut_slice().fill(0);
        }
        Some(chunk)
    }

    /// Rents a chunk, falling back to a zero-filled heap allocation when the
    /// free list is empty.
    pub fn rent(&self, clear: bool) -> Chunk {
        if let Some(chunk) = self.try_rent(clear) {
            return chunk;
        }
        tracing::debug!(
            chunk_size = self.chunk_size,
            "pool exhausted, renting heap chunk"
        );
        self.lent.fetch_add(1, Ordering::Relaxed);
        stats::add_heap_bytes(self.chunk_size as i64);
        // Heap chunks are always zeroed; `clear` has nothing left to do.
        Chunk::allocate_heap(self.chunk_size)
    }

    /// Releases a chunk back to the pool, consuming it.
    ///
    /// Pool chunks are pushed onto the head of the free list; heap chunks
    /// are deallocated. The corresponding process-global counter is
    /// decremented either way.
    ///
    /// # Errors
    /// `ForeignChunk` when a pool-provenance chunk's buffer is not this
    /// pool's buffer. The chunk is dropped with the error.
    pub fn release(&self, chunk: Chunk) -> Result<(), PoolError> {
        if chunk.is_from_heap() {
            stats::sub_heap_bytes(chunk.len() as i64);
            sub_saturating(&self.lent);
            drop(chunk);
            return Ok(());
        }

        if !chunk.shares_buffer(&self.buffer) {
            return Err(PoolError::ForeignChunk);
        }
        let offset = chunk
            .pool_offset()
            .expect("pool-provenance chunk has an offset") as usize;
        debug_assert!(offset + self.chunk_size <= self.buffer.len());
        debug_assert!(offset % self.chunk_size == 0);

        {
            let mut free = self.lock_free_list();
            // SAFETY: the caller just returned ownership of this region;
            // offset is in bounds and chunk-aligned; lock held.
            unsafe { self.write_link(offset, free.head) };
            free.head = offset as i32;
        }

        stats::sub_pool_bytes(self.chunk_size as i64);
        sub_saturating(&self.lent);
        drop(chunk);
        Ok(())
    }

    /// True when `chunk` is pool-provenance and its region lives in this
    /// pool's buffer.
    pub fn is_from_pool(&self, chunk: &Chunk) -> bool {
        chunk.shares_buffer(&self.buffer)
    }

    fn lock_free_list(&self) -> impl std::ops::DerefMut<Target = FreeList> + '_ {
        // The critical sections never panic, so poisoning cannot occur in
        // practice; treat it as fatal if it somehow does.
        self.free.lock().expect("chunk pool free list poisoned")
    }

    /// Reads the next-free offset stored in the free chunk at `offset`.
    ///
    /// # Safety
    /// `offset` must be the offset of a chunk currently linked in the free
    /// list, and the free-list lock must be held.
    unsafe fn read_link(&self, offset: usize) -> i32 {
        // The link word is not naturally aligned when chunk_size is not a
        // multiple of 4, so go through unaligned reads.
        unsafe { (self.buffer.base().add(offset) as *const i32).read_unaligned() }
    }

    /// Writes the next-free offset into the free chunk at `offset`.
    ///
    /// # Safety
    /// `offset` must be the offset of a chunk owned by the free list (being
    /// linked right now), and the free-list lock must be held. The one
    /// exception is construction, when no chunk has been lent yet.
    unsafe fn write_link(&self, offset: usize, next: i32) {
        unsafe { (self.buffer.base().add(offset) as *mut i32).write_unaligned(next) };
    }
}

impl ChunkSource for ChunkPool {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn rent(&self, clear: bool) -> Chunk {
        ChunkPool::rent(self, clear)
    }

    fn release(&self, chunk: Chunk) -> Result<(), PoolError> {
        ChunkPool::release(self, chunk)
    }
}

fn sub_saturating(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
        Some(prev.saturating_sub(1))
    });
}

#[cfg(not(loom))]
static DEFAULT_POOL: OnceLock<Arc<ChunkPool>> = OnceLock::new();

/// Initializes the process-wide default pool, or returns the existing one.
///
/// The first successful call wins; later calls get the already-installed
/// pool regardless of the sizes they ask for.
///
/// # Errors
/// Propagates [`ChunkPool::new`] validation failures on the first call.
#[cfg(not(loom))]
pub fn init_default_pool(
    chunk_size: usize,
    chunk_count: usize,
) -> Result<Arc<ChunkPool>, PoolError> {
    if let Some(pool) = DEFAULT_POOL.get() {
        return Ok(Arc::clone(pool));
    }
    let candidate = Arc::new(ChunkPool::new(chunk_size, chunk_count)?);
    let _ = DEFAULT_POOL.set(candidate);
    Ok(Arc::clone(
        DEFAULT_POOL.get().expect("default pool just installed"),
    ))
}

/// The process-wide default pool, if one has been initialized.
#[cfg(not(loom))]
pub fn default_pool() -> Option<Arc<ChunkPool>> {
    DEFAULT_POOL.get().cloned()
}
