//! Seekable, growable byte stream over a sparse sequence of pool chunks.
//!
//! # Scope
//! [`ChunkStream`] behaves like an in-memory byte stream whose backing
//! storage is a sparse array of fixed-size chunks rented on demand from a
//! [`ChunkSource`]. A `None` slot is a *hole*: a run of logical zeros that
//! has never been written. Writes materialize exactly the chunks they touch;
//! truncation releases the chunks it cuts off; disposal releases everything.
//!
//! # Invariants
//! - `position` may exceed `length`; the first write at such a position
//!   extends `length` and zero-fills the gap.
//! - Slots at indices at or above the chunk holding the last valid byte are
//!   `None` after truncation (write-then-truncate leaves no phantom data).
//! - Every `Some` chunk was rented from this stream's chunk source.
//! - Bytes between `length` and the end of the tail chunk may hold garbage;
//!   they are zeroed before any growth exposes them.
//!
//! # Concurrency
//! A stream is single-owner: every operation takes `&mut self`, so
//! concurrent access to one instance is ruled out at compile time. The
//! chunk source behind it is shared and thread-safe.
//!
//! # Iteration
//! [`ChunkCursor`] is the stepwise iteration primitive. It deliberately does
//! not borrow the stream between steps, so caller code *can* move `position`
//! or change `length` mid-iteration; the cursor detects either change on
//! the next step and fails with
//! [`StreamError::MutatedDuringIteration`]. The `for_each_chunk` /
//! `for_each_chunk_async` convenience wrappers and the `move_to` family all
//! drive the same cursor.

use std::fmt;
use std::io::{self, SeekFrom};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::chunk::Chunk;
use crate::error::StreamError;
use crate::pool::ChunkSource;
use crate::slots::{HeapSlotArrayPool, SlotArrayPool};

/// Stream lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Normal state: read, write, seek, truncate.
    ReadWrite,
    /// Forward-only reads; chunks below `next_unreleased` have been returned
    /// to the pool as the read position passed them.
    ReadForward { next_unreleased: usize },
    /// Terminal state; every operation except disposal fails.
    Disposed,
}

/// Seekable byte stream over chunks rented from a shared source.
pub struct ChunkStream {
    source: Arc<dyn ChunkSource>,
    slot_pool: Arc<dyn SlotArrayPool>,
    slots: Vec<Option<Chunk>>,
    chunk_size: usize,
    length: u64,
    position: u64,
    mode: Mode,
}

impl ChunkStream {
    /// Creates an empty stream drawing chunks from `source`, with the
    /// default heap slot-array strategy.
    pub fn new(source: Arc<dyn ChunkSource>) -> Self {
        Self::with_slot_pool(source, Arc::new(HeapSlotArrayPool))
    }

    /// Creates an empty stream with an explicit slot-array strategy.
    pub fn with_slot_pool(source: Arc<dyn ChunkSource>, slot_pool: Arc<dyn SlotArrayPool>) -> Self {
        let chunk_size = source.chunk_size();
        assert!(chunk_size > 0, "chunk source must have a non-zero chunk size");
        let slots = slot_pool.acquire(0);
        Self {
            source,
            slot_pool,
            slots,
            chunk_size,
            length: 0,
            position: 0,
            mode: Mode::ReadWrite,
        }
    }

    /// Logical length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// True when the stream holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current cursor position. May exceed `len()`.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The fixed chunk size of the backing source.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// True once the stream has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.mode == Mode::Disposed
    }

    /// Moves the cursor to an absolute position.
    ///
    /// # Errors
    /// `Disposed` after disposal; `InvalidOperation` for backward moves in
    /// forward-read mode.
    pub fn set_position(&mut self, position: u64) -> Result<(), StreamError> {
        self.ensure_live()?;
        if matches!(self.mode, Mode::ReadForward { .. }) && position < self.position {
            return Err(StreamError::InvalidOperation {
                detail: "cannot seek backward in forward-read mode",
            });
        }
        self.position = position;
        if matches!(self.mode, Mode::ReadForward { .. }) {
            self.release_consumed_forward();
        }
        Ok(())
    }

    /// Computes a new absolute position from `Begin | Current | End`.
    ///
    /// # Errors
    /// `InvalidArgument` when the arithmetic overflows or the result would
    /// be negative.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        self.ensure_live()?;
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(delta) => offset_position(self.position, delta),
            SeekFrom::End(delta) => offset_position(self.length, delta),
        }
        .ok_or(StreamError::InvalidArgument {
            detail: "seek target out of range",
        })?;
        self.set_position(target)?;
        Ok(target)
    }

    /// Reads up to `dst.len()` bytes at the cursor, advancing it.
    ///
    /// Holes contribute zeros. Returns the byte count, `0` at end-of-stream.
    /// In forward-read mode every chunk the cursor fully passes is released
    /// back to the pool.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, StreamError> {
        self.ensure_live()?;
        let available = self.length.saturating_sub(self.position);
        let count = (dst.len() as u64).min(available) as usize;
        if count == 0 {
            return Ok(0);
        }

        let chunk_size = self.chunk_size as u64;
        let mut copied = 0usize;
        while copied < count {
            let at = self.position + copied as u64;
            let index = (at / chunk_size) as usize;
            let offset = (at % chunk_size) as usize;
            let take = (self.chunk_size - offset).min(count - copied);
            let dst_part = &mut dst[copied..copied + take];
            match self.slots.get(index).and_then(Option::as_ref) {
                Some(chunk) => dst_part.copy_from_slice(&chunk.as_slice()[offset..offset + take]),
                None => dst_part.fill(0),
            }
            copied += take;
        }

        self.position += count as u64;
        if matches!(self.mode, Mode::ReadForward { .. }) {
            self.release_consumed_forward();
        }
        Ok(count)
    }

    /// Reads one byte, or `None` past end-of-stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>, StreamError> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Writes all of `src` at the cursor, growing the stream as needed.
    ///
    /// Writing past `length` first zero-fills the gap. Chunks are rented on
    /// demand; a freshly rented chunk is cleared when the write does not
    /// start at its first byte or when valid data extends past the write
    /// position (so untouched parts keep reading as zeros).
    pub fn write(&mut self, src: &[u8]) -> Result<(), StreamError> {
        self.ensure_read_write()?;
        if src.is_empty() {
            return Ok(());
        }
        let end = self
            .position
            .checked_add(src.len() as u64)
            .ok_or(StreamError::InvalidArgument {
                detail: "write extends past the maximum stream position",
            })?;
        self.check_chunk_bound(end)?;

        if self.position > self.length {
            self.zero_grow(self.length, self.position);
            self.length = self.position;
        }

        let chunk_size = self.chunk_size as u64;
        let mut written = 0usize;
        while written < src.len() {
            let at = self.position + written as u64;
            let index = (at / chunk_size) as usize;
            let offset = (at % chunk_size) as usize;
            let take = (self.chunk_size - offset).min(src.len() - written);
            self.ensure_slot_capacity(index);
            if self.slots[index].is_none() {
                let clear = offset != 0 || self.length > at;
                self.slots[index] = Some(self.source.rent(clear));
            }
            let chunk = self.slots[index]
                .as_mut()
                .expect("chunk slot just materialized");
            chunk.as_mut_slice()[offset..offset + take]
                .copy_from_slice(&src[written..written + take]);
            written += take;
        }

        self.position = end;
        if self.position > self.length {
            self.length = self.position;
        }
        Ok(())
    }

    /// Writes a single byte at the cursor.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), StreamError> {
        self.write(&[byte])
    }

    /// Truncates or grows the logical length.
    ///
    /// Growth zeroes the newly exposed tail of the old last chunk; higher
    /// indices stay holes. Shrinking releases every chunk past the new tail
    /// chunk. Afterwards `position` is clamped to the new length.
    pub fn set_len(&mut self, new_len: u64) -> Result<(), StreamError> {
        self.ensure_read_write()?;
        self.check_chunk_bound(new_len)?;

        if new_len >= self.length {
            self.zero_grow(self.length, new_len);
        } else {
            let (new_index, _) = chunk_position_upper(new_len, self.chunk_size);
            let (old_index, _) = chunk_position_upper(self.length, self.chunk_size);
            let first_released = if new_len == 0 { 0 } else { new_index + 1 };
            let last = old_index.min(self.slots.len().saturating_sub(1));
            for index in first_released..=last {
                if let Some(chunk) = self.slots.get_mut(index).and_then(Option::take) {
                    let released = self.source.release(chunk);
                    debug_assert!(released.is_ok(), "stream chunk rejected by its own source");
                }
            }
        }

        self.length = new_len;
        self.position = self.position.min(self.length);
        Ok(())
    }

    /// Copies the whole stream into a fresh vector without moving the
    /// cursor. Holes read as zeros.
    pub fn to_vec(&mut self) -> Result<Vec<u8>, StreamError> {
        self.ensure_read_write()?;
        let saved = self.position;
        self.position = 0;
        let mut out = vec![0u8; self.length as usize];
        let read = self.read(&mut out)?;
        debug_assert_eq!(read as u64, self.length);
        self.position = saved;
        Ok(out)
    }

    /// Starts stepwise iteration over the chunks covering `[from, to)`.
    ///
    /// The cursor detects any change to `position` or `length` between
    /// steps. Iteration itself moves neither.
    ///
    /// # Errors
    /// `ReversedRange` when `from > to`; `InvalidArgument` when the range
    /// reaches past the stream length.
    pub fn cursor(&self, from: u64, to: u64) -> Result<ChunkCursor, StreamError> {
        self.ensure_live()?;
        if from > to {
            return Err(StreamError::ReversedRange { from, to });
        }
        if to > self.length {
            return Err(StreamError::InvalidArgument {
                detail: "iteration range reaches past the stream length",
            });
        }
        Ok(ChunkCursor {
            next: from,
            from,
            to,
            expect_position: self.position,
            expect_length: self.length,
            release: false,
            last_chunk: None,
        })
    }

    /// Cursor that releases each fully covered chunk back to the pool after
    /// visiting it. Only legal when the traversal runs to the logical end.
    fn release_cursor(&self, from: u64, to: u64) -> Result<ChunkCursor, StreamError> {
        debug_assert_eq!(to, self.length, "release traversals must end at length");
        let mut cursor = self.cursor(from, to)?;
        cursor.release = true;
        Ok(cursor)
    }

    /// Invokes `action` with a borrowed view of every chunk slice covering
    /// `[from, to)`, in ascending order.
    ///
    /// Holes are materialized into cleared pool chunks so the callback
    /// always sees real memory; `position` and `length` are untouched.
    pub fn for_each_chunk<F>(&mut self, from: u64, to: u64, mut action: F) -> Result<(), StreamError>
    where
        F: FnMut(&[u8]) -> Result<(), StreamError>,
    {
        let mut cursor = self.cursor(from, to)?;
        while let Some(view) = cursor.next(self)? {
            action(view)?;
        }
        Ok(())
    }

    /// Asynchronous [`Self::for_each_chunk`]: awaits the returned future
    /// between chunks. Suspension points are only at chunk boundaries, never
    /// in the middle of a chunk copy.
    pub async fn for_each_chunk_async<F>(
        &mut self,
        from: u64,
        to: u64,
        mut action: F,
    ) -> Result<(), StreamError>
    where
        F: for<'a> FnMut(&'a [u8]) -> BoxFuture<'a, Result<(), StreamError>>,
    {
        let mut cursor = self.cursor(from, to)?;
        loop {
            let Some(view) = cursor.next(self)? else {
                break;
            };
            action(view).await?;
        }
        Ok(())
    }

    /// Copies `[position, length)` into `sink`, releasing each fully covered
    /// chunk as it goes, then truncates the stream to `position`.
    ///
    /// Returns the number of bytes moved.
    pub fn move_to<W: io::Write>(&mut self, sink: &mut W) -> io::Result<u64> {
        self.ensure_read_write()?;
        let from = self.position.min(self.length);
        let mut cursor = self.release_cursor(from, self.length)?;
        let mut moved = 0u64;
        while let Some(view) = cursor.next(self)? {
            sink.write_all(view)?;
            moved += view.len() as u64;
        }
        self.length = from;
        Ok(moved)
    }

    /// Asynchronous [`Self::move_to`] with cooperative cancellation.
    ///
    /// The token is checked at each chunk boundary. On cancellation the
    /// already-moved prefix stays released and `length` is left unchanged;
    /// the error kind is `Interrupted`.
    pub async fn move_to_async<W>(
        &mut self,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        self.ensure_read_write()?;
        let from = self.position.min(self.length);
        let mut cursor = self.release_cursor(from, self.length)?;
        let mut moved = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(StreamError::Cancelled.into());
            }
            let Some(view) = cursor.next(self)? else {
                break;
            };
            sink.write_all(view).await?;
            moved += view.len() as u64;
        }
        self.length = from;
        Ok(moved)
    }

    /// Switches the stream into forward-only read mode starting at `from`.
    ///
    /// From here on only monotonic reads are allowed; writing, truncating,
    /// and backward seeks fail with `InvalidOperation`. Each chunk is
    /// released back to the pool as soon as the read position passes its
    /// end. The only transition out is disposal.
    pub fn begin_forward_read(&mut self, from: u64) -> Result<(), StreamError> {
        self.ensure_read_write()?;
        self.position = from;
        self.mode = Mode::ReadForward { next_unreleased: 0 };
        self.release_consumed_forward();
        Ok(())
    }

    /// Releases every chunk and the slot array, zeroing length and
    /// position. Idempotent; never fails. All further operations (except
    /// disposal) fail with `Disposed`.
    pub fn dispose(&mut self) {
        if self.mode == Mode::Disposed {
            return;
        }
        self.mode = Mode::Disposed;
        for index in (0..self.slots.len()).rev() {
            if let Some(chunk) = self.slots[index].take() {
                let released = self.source.release(chunk);
                debug_assert!(released.is_ok(), "stream chunk rejected by its own source");
            }
        }
        let slots = std::mem::take(&mut self.slots);
        // Every slot is already None after the release loop.
        self.slot_pool.release(slots, false);
        self.length = 0;
        self.position = 0;
        tracing::trace!("chunk stream disposed");
    }

    /// Materializes the chunk under the cursor and returns its writable
    /// tail, from the cursor's in-chunk offset to the end of the chunk.
    ///
    /// Growth rules match `write`: a cursor past `length` first zero-fills
    /// the gap, and a freshly rented chunk is cleared when the view does not
    /// start at the chunk's first byte or valid data extends past the
    /// cursor. Used by the span-writer adapter; bytes written into the view
    /// only become part of the stream when committed.
    pub(crate) fn current_chunk_tail(&mut self) -> Result<&mut [u8], StreamError> {
        self.ensure_read_write()?;
        let end = self
            .position
            .checked_add(1)
            .ok_or(StreamError::InvalidArgument {
                detail: "cursor at the maximum stream position",
            })?;
        self.check_chunk_bound(end)?;

        if self.position > self.length {
            self.zero_grow(self.length, self.position);
            self.length = self.position;
        }

        let chunk_size = self.chunk_size as u64;
        let index = (self.position / chunk_size) as usize;
        let offset = (self.position % chunk_size) as usize;
        self.ensure_slot_capacity(index);
        if self.slots[index].is_none() {
            let clear = offset != 0 || self.length > self.position;
            self.slots[index] = Some(self.source.rent(clear));
        }
        let chunk = self.slots[index]
            .as_mut()
            .expect("chunk slot just materialized");
        Ok(&mut chunk.as_mut_slice()[offset..])
    }

    /// Commits `count` bytes written in place through
    /// `current_chunk_tail`: advances the cursor and extends the length,
    /// with no copying. `count` must not exceed the tail view's size.
    pub(crate) fn commit_in_place(&mut self, count: usize) -> Result<(), StreamError> {
        self.ensure_read_write()?;
        self.position += count as u64;
        if self.position > self.length {
            self.length = self.position;
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), StreamError> {
        if self.mode == Mode::Disposed {
            return Err(StreamError::Disposed);
        }
        Ok(())
    }

    fn ensure_read_write(&self) -> Result<(), StreamError> {
        self.ensure_live()?;
        if matches!(self.mode, Mode::ReadForward { .. }) {
            return Err(StreamError::InvalidOperation {
                detail: "stream is in forward-read mode",
            });
        }
        Ok(())
    }

    /// Fails with `StreamTooLarge` when a byte range ending at `end` would
    /// need a chunk index past `i32::MAX`.
    fn check_chunk_bound(&self, end: u64) -> Result<(), StreamError> {
        if end == 0 {
            return Ok(());
        }
        let last_index = (end - 1) / self.chunk_size as u64;
        if last_index > i32::MAX as u64 {
            return Err(StreamError::StreamTooLarge);
        }
        Ok(())
    }

    /// Grows the slot array (through the slot pool) until `index` is valid,
    /// preserving existing chunks.
    fn ensure_slot_capacity(&mut self, index: usize) {
        if index < self.slots.len() {
            return;
        }
        let mut grown = self.slot_pool.acquire(index + 1);
        debug_assert!(grown.len() > index);
        for (slot, fresh) in self.slots.iter_mut().zip(grown.iter_mut()) {
            *fresh = slot.take();
        }
        let old = std::mem::replace(&mut self.slots, grown);
        self.slot_pool.release(old, false);
    }

    /// Applies the growth zeroing rules for extending the valid region from
    /// `old_len` to `new_len`: bytes of the old tail chunk that growth
    /// exposes must read as zeros. Holes stay holes.
    fn zero_grow(&mut self, old_len: u64, new_len: u64) {
        if new_len <= old_len {
            return;
        }
        let chunk_size = self.chunk_size;
        let (old_index, old_offset) = chunk_position_upper(old_len, chunk_size);
        let (new_index, new_offset) = chunk_position_upper(new_len, chunk_size);
        let zero_to = if new_index == old_index {
            new_offset
        } else {
            chunk_size
        };
        if zero_to > old_offset {
            if let Some(chunk) = self.slots.get_mut(old_index).and_then(Option::as_mut) {
                chunk.as_mut_slice()[old_offset..zero_to].fill(0);
            }
        }
    }

    /// Forward-read mode: returns every chunk that the read position has
    /// fully passed.
    fn release_consumed_forward(&mut self) {
        // Clamp to the slot count: a far-forward seek must not walk indices
        // that never held a chunk.
        let first_live =
            ((self.position / self.chunk_size as u64).min(usize::MAX as u64) as usize)
                .min(self.slots.len());
        let Mode::ReadForward { next_unreleased } = &mut self.mode else {
            return;
        };
        let start = *next_unreleased;
        *next_unreleased = first_live.max(start);
        for index in start..first_live {
            if let Some(chunk) = self.slots.get_mut(index).and_then(Option::take) {
                let released = self.source.release(chunk);
                debug_assert!(released.is_ok(), "stream chunk rejected by its own source");
            }
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream")
            .field("length", &self.length)
            .field("position", &self.position)
            .field("chunk_size", &self.chunk_size)
            .field("slots", &self.slots.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl io::Read for ChunkStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ChunkStream::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for ChunkStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ChunkStream::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for ChunkStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        ChunkStream::seek(self, pos).map_err(Into::into)
    }
}

/// Stepwise chunk iterator over a `[from, to)` byte range.
///
/// Obtained from [`ChunkStream::cursor`]. Each [`next`](Self::next) call
/// re-borrows the stream, validates that `position` and `length` are
/// exactly as they were when the cursor was created, and yields the next
/// chunk's sub-slice. Holes are materialized into cleared pool chunks so
/// every view is real memory.
pub struct ChunkCursor {
    next: u64,
    from: u64,
    to: u64,
    expect_position: u64,
    expect_length: u64,
    release: bool,
    last_chunk: Option<usize>,
}

impl ChunkCursor {
    /// Yields the next chunk view, or `None` when the range is exhausted.
    ///
    /// # Errors
    /// `MutatedDuringIteration` when the stream's position or length
    /// changed since the cursor was created; `Disposed` when the stream was
    /// disposed mid-iteration.
    pub fn next<'s>(
        &mut self,
        stream: &'s mut ChunkStream,
    ) -> Result<Option<&'s [u8]>, StreamError> {
        stream.ensure_live()?;
        if stream.position != self.expect_position || stream.length != self.expect_length {
            return Err(StreamError::MutatedDuringIteration);
        }

        self.release_previous(stream);

        if self.next >= self.to {
            return Ok(None);
        }

        let chunk_size = stream.chunk_size as u64;
        let index = (self.next / chunk_size) as usize;
        let offset = (self.next % chunk_size) as usize;
        let end = self.to.min((index as u64 + 1) * chunk_size);
        let count = (end - self.next) as usize;

        stream.ensure_slot_capacity(index);
        if stream.slots[index].is_none() {
            stream.slots[index] = Some(stream.source.rent(true));
        }

        self.next = end;
        self.last_chunk = Some(index);

        let chunk = stream.slots[index]
            .as_ref()
            .expect("chunk slot just materialized");
        Ok(Some(&chunk.as_slice()[offset..offset + count]))
    }

    /// In release mode, returns the previously visited chunk to the pool,
    /// but only when it lies entirely inside the traversed range, so a
    /// partial leading chunk keeps the bytes below `from` intact.
    fn release_previous(&mut self, stream: &mut ChunkStream) {
        let Some(index) = self.last_chunk.take() else {
            return;
        };
        if !self.release {
            return;
        }
        if (index as u64) * stream.chunk_size as u64 >= self.from {
            if let Some(chunk) = stream.slots.get_mut(index).and_then(Option::take) {
                let released = stream.source.release(chunk);
                debug_assert!(released.is_ok(), "stream chunk rejected by its own source");
            }
        }
    }
}

/// Offsets `base` by a signed delta, or `None` on overflow/underflow.
fn offset_position(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}

/// Splits a byte position into `(chunk index, in-chunk offset)`.
///
/// Uses the upper-bound convention for range ends: a position on a chunk
/// boundary (other than zero) is reported as the *previous* chunk's
/// one-past-the-end, so the chunk holding the last valid byte is the one
/// addressed.
fn chunk_position_upper(position: u64, chunk_size: usize) -> (usize, usize) {
    let cs = chunk_size as u64;
    if position > 0 && position % cs == 0 {
        ((position / cs - 1) as usize, chunk_size)
    } else {
        ((position / cs) as usize, (position % cs) as usize)
    }
}
