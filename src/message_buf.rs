#![allow(dead_code)]

use std::mem::size_of;

use byteorder::{ByteOrder, NativeEndian};

use crate::errors::CbufError;

/// A cursor over an owned byte vector: each `take_*` reads the next value
/// of that width, in host order, and advances past it. Used by the net-
/// encoding decode path and the reflective decoder, which both consume a
/// struct body field by field.
pub struct MessageBuf {
    buf: Vec<u8>,
    current_index: usize,
}

impl MessageBuf {
    pub fn new(buf: Vec<u8>) -> Self {
        Self {
            buf,
            current_index: 0,
        }
    }

    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self::new(buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len().saturating_sub(self.current_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> usize {
        self.current_index
    }

    /// Consumes `self` and returns everything from the cursor to the end.
    pub fn into_remaining_bytes(self) -> Vec<u8> {
        self.buf[self.current_index..].to_vec()
    }

    pub fn take_u8(&mut self) -> Result<u8, CbufError> {
        self.advance(size_of::<u8>()).map(|bytes| bytes[0])
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn take_i8(&mut self) -> Result<i8, CbufError> {
        self.advance(size_of::<i8>()).map(|bytes| bytes[0] as i8)
    }

    pub fn take_u16(&mut self) -> Result<u16, CbufError> {
        self.advance(size_of::<u16>()).map(NativeEndian::read_u16)
    }

    pub fn take_i16(&mut self) -> Result<i16, CbufError> {
        self.advance(size_of::<i16>()).map(NativeEndian::read_i16)
    }

    pub fn take_u32(&mut self) -> Result<u32, CbufError> {
        self.advance(size_of::<u32>()).map(NativeEndian::read_u32)
    }

    pub fn take_i32(&mut self) -> Result<i32, CbufError> {
        self.advance(size_of::<i32>()).map(NativeEndian::read_i32)
    }

    pub fn take_u64(&mut self) -> Result<u64, CbufError> {
        self.advance(size_of::<u64>()).map(NativeEndian::read_u64)
    }

    pub fn take_i64(&mut self) -> Result<i64, CbufError> {
        self.advance(size_of::<i64>()).map(NativeEndian::read_i64)
    }

    pub fn take_f32(&mut self) -> Result<f32, CbufError> {
        self.advance(size_of::<f32>()).map(NativeEndian::read_f32)
    }

    pub fn take_f64(&mut self) -> Result<f64, CbufError> {
        self.advance(size_of::<f64>()).map(NativeEndian::read_f64)
    }

    pub fn take_bool(&mut self) -> Result<bool, CbufError> {
        self.take_u8().map(|val| val != 0)
    }

    /// Reads a cbuf `string`: a u32 byte length followed by that many bytes.
    pub fn take_string(&mut self) -> Result<String, CbufError> {
        let len = self.take_u32()? as usize;
        let bytes = self.advance(len)?.to_vec();
        String::from_utf8(bytes).map_err(|e| CbufError::Corruption {
            offset: self.current_index,
            reason: format!("string field is not valid UTF-8: {e}"),
        })
    }

    /// Reads a cbuf `short_string`: fixed 16 bytes, NUL-terminated, trailing
    /// bytes beyond the terminator unspecified.
    pub fn take_short_string(&mut self) -> Result<String, CbufError> {
        let bytes = self.advance(16)?;
        let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8(bytes[..nul].to_vec()).map_err(|e| CbufError::Corruption {
            offset: self.current_index,
            reason: format!("short_string field is not valid UTF-8: {e}"),
        })
    }

    pub fn advance(&mut self, size: usize) -> Result<&[u8], CbufError> {
        if self.current_index + size > self.buf.len() {
            Err(CbufError::Truncated {
                needed: size,
                available: self.buf.len() - self.current_index,
            })
        } else {
            let bytes = &self.buf[self.current_index..self.current_index + size];
            self.current_index += size;
            Ok(bytes)
        }
    }

    pub fn skip(&mut self, size: usize) -> Result<(), CbufError> {
        self.advance(size).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_scalars_in_order() {
        let mut buf = MessageBuf::new(vec![1, 2, 0, 3, 0, 0, 0]);
        assert_eq!(buf.take_u8().unwrap(), 1);
        assert_eq!(buf.take_u8().unwrap(), 2);
        assert_eq!(buf.take_u32().unwrap(), 3);
    }

    #[test]
    fn take_string_reads_length_prefix() {
        let mut bytes = vec![3, 0, 0, 0];
        bytes.extend_from_slice(b"abc");
        let mut buf = MessageBuf::new(bytes);
        assert_eq!(buf.take_string().unwrap(), "abc");
    }

    #[test]
    fn take_short_string_truncates_at_nul() {
        let mut bytes = vec![0u8; 16];
        bytes[..5].copy_from_slice(b"hello");
        let mut buf = MessageBuf::new(bytes);
        assert_eq!(buf.take_short_string().unwrap(), "hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn truncated_read_is_an_error() {
        let mut buf = MessageBuf::new(vec![1, 2]);
        assert!(buf.take_u32().is_err());
    }
}
