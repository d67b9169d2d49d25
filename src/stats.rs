//! Process-global chunk allocation counters.
//!
//! Two counters aggregate across every pool instance in the process: bytes
//! currently lent out of pool buffers, and bytes of heap-fallback chunks
//! currently outstanding. Both are advisory: they are updated with relaxed
//! atomic add/subtract, may be observed racily, and never gate correctness.
//! They stay non-negative only in programs that release every chunk they
//! rent.
//!
//! The counters live on separate cache lines so that pools hammering one of
//! them do not invalidate the other.

use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam_utils::CachePadded;

static POOL_BYTES: CachePadded<AtomicI64> = CachePadded::new(AtomicI64::new(0));
static HEAP_BYTES: CachePadded<AtomicI64> = CachePadded::new(AtomicI64::new(0));

/// Total bytes currently lent from any pool's shared buffer.
pub fn total_pool_allocated() -> i64 {
    POOL_BYTES.load(Ordering::Relaxed)
}

/// Total bytes of heap-fallback chunks currently outstanding.
pub fn total_heap_allocated() -> i64 {
    HEAP_BYTES.load(Ordering::Relaxed)
}

pub(crate) fn add_pool_bytes(bytes: i64) {
    POOL_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

pub(crate) fn sub_pool_bytes(bytes: i64) {
    POOL_BYTES.fetch_sub(bytes, Ordering::Relaxed);
}

pub(crate) fn add_heap_bytes(bytes: i64) {
    HEAP_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

pub(crate) fn sub_heap_bytes(bytes: i64) {
    HEAP_BYTES.fetch_sub(bytes, Ordering::Relaxed);
}
