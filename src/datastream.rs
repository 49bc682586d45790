//! The [`Cursor`] trait and its buffered, `Seek`-based implementation,
//! [`StreamCursor`]. [`crate::reader`] is generic over `Cursor` so the same
//! frame-parsing logic runs against a memory-mapped file (zero-copy) or
//! against any `Read + Seek` source, including `std::io::Cursor<Vec<u8>>`
//! in tests. Scalar reads are host-order (this format's frames, unlike
//! little-endian file records, are native-order by design), and the
//! cursor can peek without consuming (needed to check a frame's preamble
//! before deciding whether to keep or skip it).

use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, NativeEndian};

use crate::errors::CbufError;

/// A source of framed bytes that can be peeked (to inspect a preamble
/// before committing to it) and advanced (to consume it).
pub trait Cursor {
    fn remaining(&self) -> usize;
    fn position(&self) -> usize;

    /// Returns the next `len` bytes without consuming them. Errors if
    /// fewer than `len` bytes remain.
    fn peek(&mut self, len: usize) -> Result<Cow<'_, [u8]>, CbufError>;

    /// Consumes `len` bytes. Errors if fewer than `len` bytes remain.
    fn advance(&mut self, len: usize) -> Result<(), CbufError>;

    /// Seeks back to the start, so a source can be re-iterated from
    /// scratch (used by the merger's non-destructive `count_messages`).
    fn rewind(&mut self) -> Result<(), CbufError>;

    fn take(&mut self, len: usize) -> Result<Vec<u8>, CbufError> {
        let bytes = self.peek(len)?.into_owned();
        self.advance(len)?;
        Ok(bytes)
    }

    fn take_u8(&mut self) -> Result<u8, CbufError> {
        Ok(self.take(1)?[0])
    }
    fn take_u32(&mut self) -> Result<u32, CbufError> {
        Ok(NativeEndian::read_u32(&self.take(4)?))
    }
    fn take_u64(&mut self) -> Result<u64, CbufError> {
        Ok(NativeEndian::read_u64(&self.take(8)?))
    }
    fn take_f64(&mut self) -> Result<f64, CbufError> {
        Ok(NativeEndian::read_f64(&self.take(8)?))
    }
}

/// `Cursor` over any `Read + Seek` source (a plain file or an in-memory
/// `std::io::Cursor<Vec<u8>>`). Peeking reads ahead and seeks back, since
/// the underlying source has no look-ahead of its own.
pub struct StreamCursor<R: Read + Seek> {
    reader: R,
    pos: u64,
    len: u64,
}

impl<R: Read + Seek> StreamCursor<R> {
    pub fn new(mut reader: R) -> Result<Self, CbufError> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(StreamCursor { reader, pos: 0, len })
    }
}

impl<R: Read + Seek> Cursor for StreamCursor<R> {
    fn remaining(&self) -> usize {
        (self.len - self.pos) as usize
    }

    fn position(&self) -> usize {
        self.pos as usize
    }

    fn peek(&mut self, len: usize) -> Result<Cow<'_, [u8]>, CbufError> {
        if self.remaining() < len {
            return Err(CbufError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        self.reader.seek(SeekFrom::Current(-(len as i64)))?;
        Ok(Cow::Owned(buf))
    }

    fn advance(&mut self, len: usize) -> Result<(), CbufError> {
        if self.remaining() < len {
            return Err(CbufError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        self.reader.seek(SeekFrom::Current(len as i64))?;
        self.pos += len as u64;
        Ok(())
    }

    fn rewind(&mut self) -> Result<(), CbufError> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    #[test]
    fn peek_does_not_consume() {
        let mut c = StreamCursor::new(IoCursor::new(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(&*c.peek(2).unwrap(), &[1, 2]);
        assert_eq!(&*c.peek(2).unwrap(), &[1, 2]);
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn advance_consumes_and_tracks_position() {
        let mut c = StreamCursor::new(IoCursor::new(vec![1, 2, 3, 4])).unwrap();
        c.advance(2).unwrap();
        assert_eq!(c.position(), 2);
        assert_eq!(&*c.peek(2).unwrap(), &[3, 4]);
    }

    #[test]
    fn scalar_reads_use_native_order() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&42u32.to_ne_bytes());
        let mut c = StreamCursor::new(IoCursor::new(bytes)).unwrap();
        assert_eq!(c.take_u32().unwrap(), 42);
    }

    #[test]
    fn reading_past_end_errors() {
        let mut c = StreamCursor::new(IoCursor::new(vec![1, 2])).unwrap();
        assert!(c.take_u32().is_err());
    }

    #[test]
    fn remaining_shrinks_as_bytes_are_taken() {
        let mut c = StreamCursor::new(IoCursor::new(vec![0u8; 10])).unwrap();
        assert_eq!(c.remaining(), 10);
        c.advance(4).unwrap();
        assert_eq!(c.remaining(), 6);
    }
}
