//! Scatter/gather write adapter over a chunked stream.
//!
//! [`SpanWriter`] hands out writable regions and commits them afterwards:
//! `get_span` returns either the remainder of the chunk under the stream's
//! cursor (bytes land in place, no copy) or an oversize temporary when the
//! request does not fit, and `advance` commits what was actually written.
//!
//! # Invariants
//! - `advance` must be called exactly once per `get_span`; violating the
//!   protocol fails with `InvalidOperation`.
//! - The caller must not write past the returned view's length; `advance`
//!   rejects counts beyond it.

use crate::error::StreamError;
use crate::stream::ChunkStream;

/// What the last `get_span` handed out.
enum Pending {
    /// No span outstanding.
    None,
    /// A view into the chunk under the cursor, of this many bytes.
    InChunk { len: usize },
    /// An oversize temporary; committed bytes go through the write path.
    Temp { buf: Vec<u8> },
}

/// Scatter/gather writer borrowing a [`ChunkStream`].
pub struct SpanWriter<'a> {
    stream: &'a mut ChunkStream,
    pending: Pending,
}

impl<'a> SpanWriter<'a> {
    pub fn new(stream: &'a mut ChunkStream) -> Self {
        Self {
            stream,
            pending: Pending::None,
        }
    }

    /// Returns a writable region of at least `size_hint` bytes
    /// (`size_hint == 0` means "whatever fits the current chunk").
    ///
    /// When the hint fits the remainder of the chunk under the cursor, the
    /// view aliases stream storage and a later `advance` is free of
    /// copying. Otherwise a temporary buffer of exactly `size_hint` bytes
    /// is handed out.
    ///
    /// # Errors
    /// `InvalidOperation` when the previous span has not been advanced, or
    /// when the stream is not writable.
    pub fn get_span(&mut self, size_hint: usize) -> Result<&mut [u8], StreamError> {
        if !matches!(self.pending, Pending::None) {
            return Err(StreamError::InvalidOperation {
                detail: "previous span has not been advanced",
            });
        }

        let tail = self.stream.current_chunk_tail()?;
        if size_hint == 0 || size_hint <= tail.len() {
            self.pending = Pending::InChunk { len: tail.len() };
            // Re-derive the view so its borrow is tied to `self`, not to the
            // temporary above.
            return self.stream.current_chunk_tail();
        }

        self.pending = Pending::Temp {
            buf: vec![0u8; size_hint],
        };
        match &mut self.pending {
            Pending::Temp { buf } => Ok(buf.as_mut_slice()),
            _ => unreachable!("pending was just set to a temporary"),
        }
    }

    /// Commits the first `count` bytes of the last span.
    ///
    /// In-chunk spans advance the stream's position and length directly;
    /// temporary spans are copied through the normal write path.
    ///
    /// # Errors
    /// `InvalidOperation` without an outstanding span; `InvalidArgument`
    /// when `count` exceeds the span's length.
    pub fn advance(&mut self, count: usize) -> Result<(), StreamError> {
        let len = match &self.pending {
            Pending::None => {
                return Err(StreamError::InvalidOperation {
                    detail: "no span to advance",
                })
            }
            Pending::InChunk { len } => *len,
            Pending::Temp { buf } => buf.len(),
        };
        if count > len {
            // The span stays outstanding; the caller may retry with a
            // count that fits.
            return Err(StreamError::InvalidArgument {
                detail: "advance count exceeds the span length",
            });
        }
        match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::None => unreachable!("pending was checked above"),
            Pending::InChunk { .. } => self.stream.commit_in_place(count),
            Pending::Temp { buf } => self.stream.write(&buf[..count]),
        }
    }
}
