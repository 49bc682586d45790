//! Per-scalar read/write glue shared by the hand-written [`crate::wire`]
//! codec example and anything else that needs to pull a single primitive
//! off a [`crate::message_buf::MessageBuf`] or push one onto a `Vec<u8>`.
//! `ParseFromBuf`/`WriteToBuf` cover both directions since every
//! `MessageCodec` obligation needs to both encode and decode.

use byteorder::{ByteOrder, NativeEndian};

use crate::errors::CbufError;
use crate::message_buf::MessageBuf;

pub trait ParseFromBuf: Sized {
    fn parse_from_buf(buf: &mut MessageBuf) -> Result<Self, CbufError>;
}

pub trait WriteToBuf {
    fn write_to_buf(&self, out: &mut Vec<u8>);
    fn encoded_size(&self) -> usize;
}

macro_rules! impl_scalar_codec {
    ($ty:ty, $take:ident, $size:expr) => {
        impl ParseFromBuf for $ty {
            fn parse_from_buf(buf: &mut MessageBuf) -> Result<Self, CbufError> {
                buf.$take()
            }
        }
        impl WriteToBuf for $ty {
            fn write_to_buf(&self, out: &mut Vec<u8>) {
                let mut bytes = [0u8; $size];
                write_native(*self, &mut bytes);
                out.extend_from_slice(&bytes);
            }
            fn encoded_size(&self) -> usize {
                $size
            }
        }
    };
}

trait NativeWrite {
    fn write_native(self, bytes: &mut [u8]);
}

impl NativeWrite for u16 {
    fn write_native(self, bytes: &mut [u8]) {
        NativeEndian::write_u16(bytes, self);
    }
}
impl NativeWrite for i16 {
    fn write_native(self, bytes: &mut [u8]) {
        NativeEndian::write_i16(bytes, self);
    }
}
impl NativeWrite for u32 {
    fn write_native(self, bytes: &mut [u8]) {
        NativeEndian::write_u32(bytes, self);
    }
}
impl NativeWrite for i32 {
    fn write_native(self, bytes: &mut [u8]) {
        NativeEndian::write_i32(bytes, self);
    }
}
impl NativeWrite for u64 {
    fn write_native(self, bytes: &mut [u8]) {
        NativeEndian::write_u64(bytes, self);
    }
}
impl NativeWrite for i64 {
    fn write_native(self, bytes: &mut [u8]) {
        NativeEndian::write_i64(bytes, self);
    }
}
impl NativeWrite for f32 {
    fn write_native(self, bytes: &mut [u8]) {
        NativeEndian::write_f32(bytes, self);
    }
}
impl NativeWrite for f64 {
    fn write_native(self, bytes: &mut [u8]) {
        NativeEndian::write_f64(bytes, self);
    }
}

fn write_native<T: NativeWrite>(val: T, bytes: &mut [u8]) {
    val.write_native(bytes);
}

// u8/i8 write directly, everything else goes through NativeEndian.
impl ParseFromBuf for u8 {
    fn parse_from_buf(buf: &mut MessageBuf) -> Result<Self, CbufError> {
        buf.take_u8()
    }
}
impl WriteToBuf for u8 {
    fn write_to_buf(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
    fn encoded_size(&self) -> usize {
        1
    }
}
impl ParseFromBuf for i8 {
    fn parse_from_buf(buf: &mut MessageBuf) -> Result<Self, CbufError> {
        buf.take_i8()
    }
}
impl WriteToBuf for i8 {
    fn write_to_buf(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
    fn encoded_size(&self) -> usize {
        1
    }
}

impl_scalar_codec!(u16, take_u16, 2);
impl_scalar_codec!(i16, take_i16, 2);
impl_scalar_codec!(u32, take_u32, 4);
impl_scalar_codec!(i32, take_i32, 4);
impl_scalar_codec!(u64, take_u64, 8);
impl_scalar_codec!(i64, take_i64, 8);
impl_scalar_codec!(f32, take_f32, 4);
impl_scalar_codec!(f64, take_f64, 8);

impl ParseFromBuf for bool {
    fn parse_from_buf(buf: &mut MessageBuf) -> Result<Self, CbufError> {
        buf.take_bool()
    }
}
impl WriteToBuf for bool {
    fn write_to_buf(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
    fn encoded_size(&self) -> usize {
        1
    }
}

/// A cbuf `string`: u32 length prefix, then that many UTF-8 bytes.
impl ParseFromBuf for String {
    fn parse_from_buf(buf: &mut MessageBuf) -> Result<Self, CbufError> {
        buf.take_string()
    }
}
impl WriteToBuf for String {
    fn write_to_buf(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.len() as u32).to_ne_bytes());
        out.extend_from_slice(self.as_bytes());
    }
    fn encoded_size(&self) -> usize {
        4 + self.len()
    }
}

/// A cbuf `short_string`: a fixed 16-byte field, NUL-terminated, the
/// remaining bytes unspecified after the terminator. Encoding truncates
/// longer input to the 15 bytes (on a UTF-8 boundary) that fit before the
/// terminator.
pub struct ShortString(pub String);

impl ParseFromBuf for ShortString {
    fn parse_from_buf(buf: &mut MessageBuf) -> Result<Self, CbufError> {
        buf.take_short_string().map(ShortString)
    }
}

impl WriteToBuf for ShortString {
    fn write_to_buf(&self, out: &mut Vec<u8>) {
        let bytes = self.0.as_bytes();
        let mut cut = bytes.len().min(15);
        while cut > 0 && !self.0.is_char_boundary(cut) {
            cut -= 1;
        }
        out.extend_from_slice(&bytes[..cut]);
        out.extend(std::iter::repeat(0u8).take(16 - cut));
    }
    fn encoded_size(&self) -> usize {
        16
    }
}

/// Reads `count` elements of `T` in sequence; used for both static- and
/// dynamic-length arrays, the caller having already read any count prefix.
pub fn parse_array<T: ParseFromBuf>(
    buf: &mut MessageBuf,
    count: usize,
) -> Result<Vec<T>, CbufError> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(T::parse_from_buf(buf)?);
    }
    Ok(out)
}

pub fn write_array<T: WriteToBuf>(out: &mut Vec<u8>, items: &[T]) {
    for item in items {
        item.write_to_buf(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips_through_native_bytes() {
        let mut bytes = Vec::new();
        42u32.write_to_buf(&mut bytes);
        (-7i64).write_to_buf(&mut bytes);
        3.5f64.write_to_buf(&mut bytes);
        let mut buf = MessageBuf::new(bytes);
        assert_eq!(u32::parse_from_buf(&mut buf).unwrap(), 42);
        assert_eq!(i64::parse_from_buf(&mut buf).unwrap(), -7);
        assert_eq!(f64::parse_from_buf(&mut buf).unwrap(), 3.5);
    }

    #[test]
    fn string_round_trips_with_length_prefix() {
        let mut bytes = Vec::new();
        "hello".to_string().write_to_buf(&mut bytes);
        let mut buf = MessageBuf::new(bytes);
        assert_eq!(String::parse_from_buf(&mut buf).unwrap(), "hello");
    }

    #[test]
    fn short_string_round_trips_when_it_fits() {
        let mut bytes = Vec::new();
        ShortString("hello".to_string()).write_to_buf(&mut bytes);
        assert_eq!(bytes.len(), 16);
        let mut buf = MessageBuf::new(bytes);
        assert_eq!(ShortString::parse_from_buf(&mut buf).unwrap().0, "hello");
    }

    #[test]
    fn short_string_truncates_longer_input_on_encode() {
        let mut bytes = Vec::new();
        ShortString("this is definitely too long".to_string()).write_to_buf(&mut bytes);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[15..16], &[0u8]);
        let mut buf = MessageBuf::new(bytes);
        let decoded = ShortString::parse_from_buf(&mut buf).unwrap().0;
        assert_eq!(decoded, "this is definit");
        assert!(decoded.len() <= 15);
    }

    #[test]
    fn array_round_trips_element_by_element() {
        let items = vec![1u16, 2, 3, 4];
        let mut bytes = Vec::new();
        write_array(&mut bytes, &items);
        let mut buf = MessageBuf::new(bytes);
        let parsed: Vec<u16> = parse_array(&mut buf, 4).unwrap();
        assert_eq!(parsed, items);
    }
}
