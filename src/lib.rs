//! Pooled chunk allocator and chunked byte stream.
//!
//! The crate has two tightly coupled halves:
//! - [`ChunkPool`]: a thread-safe pool that carves one contiguous buffer
//!   into fixed-size chunks and lends/reclaims them in O(1) through an
//!   intrusive free list stored inside the free chunks themselves, with a
//!   transparent heap fallback on exhaustion.
//! - [`ChunkStream`]: a single-owner, seekable, growable byte stream whose
//!   backing storage is a sparse sequence of chunks rented from the pool.
//!   Unwritten regions are *holes* that read as zeros without costing
//!   memory; truncation and draining return chunks to the pool eagerly.
//!
//! Layered on top: [`SpanWriter`] for scatter/gather writes that land
//! directly in chunk memory, and [`Utf16Writer`] for UTF-16LE text output.
//!
//! # Module map
//! - `chunk`: the chunk value type, a byte region plus its provenance.
//! - `pool`: the intrusive free-list pool and the [`ChunkSource`] seam.
//! - `slots`: rental strategy for the stream's sparse slot array.
//! - `stream`: the stream itself plus [`ChunkCursor`] stepwise iteration.
//! - `writer`: the scatter/gather span protocol.
//! - `text`: UTF-16LE encoding over the stream.
//! - `stats`: process-global allocation counters.
//!
//! # Concurrency
//! Pools are `Send + Sync` and meant to be shared; streams are exclusively
//! owned and take `&mut self` everywhere. The async iteration entry points
//! suspend only between chunk callbacks, never inside a chunk copy.

pub mod chunk;
pub mod error;
pub mod pool;
pub mod slots;
pub mod stats;
pub mod stream;
pub mod text;
pub mod writer;

#[cfg(test)]
pub mod test_utils;

pub use chunk::Chunk;
pub use error::{PoolError, StreamError};
#[cfg(not(loom))]
pub use pool::{default_pool, init_default_pool};
pub use pool::{ChunkPool, ChunkSource, MAX_POOL_BYTES, MIN_CHUNK_SIZE};
pub use slots::{HeapSlotArrayPool, SlotArrayPool};
pub use stream::{ChunkCursor, ChunkStream};
pub use text::Utf16Writer;
pub use writer::SpanWriter;
