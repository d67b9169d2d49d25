//! Error types for pool and stream operations.
//!
//! Errors are component-specific to keep diagnostics precise: pool failures
//! and stream failures have disjoint failure modes and are never reused to
//! describe each other. All enums are `#[non_exhaustive]` so variants can be
//! added without breaking callers; consumers should include a fallback match
//! arm.
//!
//! # Design Notes
//! - Variants with `detail` carry human-readable context and are not stable
//!   for machine parsing.
//! - Disposal never surfaces an error; releasing chunks back to the pool on
//!   teardown is best-effort by contract.

use std::error::Error;
use std::fmt;
use std::io;

/// Errors from chunk pool construction and release.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// A size, count, or range argument was out of bounds.
    InvalidArgument { detail: &'static str },
    /// A chunk was released to a pool it was not rented from.
    ///
    /// The chunk is dropped together with the error; its region is reclaimed
    /// when the pool that actually owns it is dropped.
    ForeignChunk,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { detail } => write!(f, "invalid argument: {detail}"),
            Self::ForeignChunk => write!(f, "chunk does not belong to this pool"),
        }
    }
}

impl Error for PoolError {}

/// Errors from chunked stream operations.
///
/// Every operation on a disposed stream fails with `Disposed` (except
/// disposal itself, which is idempotent and infallible).
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamError {
    /// A position, length, or range argument was out of bounds or overflowed.
    InvalidArgument { detail: &'static str },
    /// The stream has been disposed.
    Disposed,
    /// A computed chunk index would exceed `i32::MAX`.
    StreamTooLarge,
    /// An iteration range with `from > to`.
    ReversedRange { from: u64, to: u64 },
    /// The stream's position or length changed between iteration steps.
    MutatedDuringIteration,
    /// The operation is not allowed in the stream's current mode
    /// (e.g. writing in forward-read mode).
    InvalidOperation { detail: &'static str },
    /// An asynchronous move was cancelled at a chunk boundary.
    Cancelled,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { detail } => write!(f, "invalid argument: {detail}"),
            Self::Disposed => write!(f, "stream is disposed"),
            Self::StreamTooLarge => write!(f, "stream exceeds the maximum chunk index"),
            Self::ReversedRange { from, to } => {
                write!(f, "reversed iteration range: from {from} > to {to}")
            }
            Self::MutatedDuringIteration => {
                write!(f, "stream position or length changed during iteration")
            }
            Self::InvalidOperation { detail } => write!(f, "invalid operation: {detail}"),
            Self::Cancelled => write!(f, "asynchronous move was cancelled"),
        }
    }
}

impl Error for StreamError {}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::InvalidArgument { .. }
            | StreamError::ReversedRange { .. }
            | StreamError::StreamTooLarge => io::ErrorKind::InvalidInput,
            StreamError::Cancelled => io::ErrorKind::Interrupted,
            StreamError::Disposed
            | StreamError::MutatedDuringIteration
            | StreamError::InvalidOperation { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
