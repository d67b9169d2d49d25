//! Shared test doubles.

use std::sync::atomic::{AtomicUsize, Ordering};

use chunkstream::{Chunk, ChunkSource, PoolError};

/// Heap-backed chunk source with an arbitrary chunk size.
///
/// The real pool requires chunks of at least four bytes for its intrusive
/// free list; scenario tests want tiny chunks (2 or 3 bytes) to exercise
/// many chunk boundaries with little data. Every rented chunk is a fresh
/// zeroed heap allocation, which trivially satisfies `clear`.
pub struct TestPool {
    chunk_size: usize,
    lent: AtomicUsize,
}

impl TestPool {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            lent: AtomicUsize::new(0),
        }
    }

    /// Chunks currently rented and not yet released.
    pub fn lent_chunks(&self) -> usize {
        self.lent.load(Ordering::Relaxed)
    }
}

impl ChunkSource for TestPool {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn rent(&self, _clear: bool) -> Chunk {
        self.lent.fetch_add(1, Ordering::Relaxed);
        Chunk::allocate_heap(self.chunk_size)
    }

    fn release(&self, chunk: Chunk) -> Result<(), PoolError> {
        self.lent.fetch_sub(1, Ordering::Relaxed);
        drop(chunk);
        Ok(())
    }
}
