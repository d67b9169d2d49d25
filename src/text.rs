//! UTF-16LE text encoding over a chunked stream.
//!
//! [`Utf16Writer`] encodes characters as little-endian UTF-16 code units
//! (two bytes each, surrogate pairs for characters outside the BMP) and
//! pushes them through the stream's normal write path. It also implements
//! [`std::fmt::Write`], so the `write!` family of macros works against it.

use std::fmt;

use crate::error::StreamError;
use crate::stream::ChunkStream;

/// Batch size for encoded code units, in bytes.
const ENCODE_BUF_LEN: usize = 64;

/// UTF-16LE encoder borrowing a [`ChunkStream`].
pub struct Utf16Writer<'a> {
    stream: &'a mut ChunkStream,
}

impl<'a> Utf16Writer<'a> {
    pub fn new(stream: &'a mut ChunkStream) -> Self {
        Self { stream }
    }

    /// Encodes one character, writing two or four bytes.
    pub fn write_char(&mut self, c: char) -> Result<(), StreamError> {
        let mut units = [0u16; 2];
        let mut bytes = [0u8; 4];
        let mut len = 0;
        for &unit in c.encode_utf16(&mut units).iter() {
            bytes[len..len + 2].copy_from_slice(&unit.to_le_bytes());
            len += 2;
        }
        self.stream.write(&bytes[..len])
    }

    /// Encodes a string, batching code units to keep write calls coarse.
    pub fn write_str(&mut self, s: &str) -> Result<(), StreamError> {
        let mut buf = [0u8; ENCODE_BUF_LEN];
        let mut filled = 0;
        for unit in s.encode_utf16() {
            buf[filled..filled + 2].copy_from_slice(&unit.to_le_bytes());
            filled += 2;
            if filled == buf.len() {
                self.stream.write(&buf)?;
                filled = 0;
            }
        }
        if filled > 0 {
            self.stream.write(&buf[..filled])?;
        }
        Ok(())
    }
}

impl fmt::Write for Utf16Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Utf16Writer::write_str(self, s).map_err(|_| fmt::Error)
    }

    fn write_char(&mut self, c: char) -> fmt::Result {
        Utf16Writer::write_char(self, c).map_err(|_| fmt::Error)
    }
}
