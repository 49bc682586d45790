//! Frame-at-a-time log reading, generic over [`crate::datastream::Cursor`]
//! so the exact same parsing logic drives a memory-mapped file (zero-copy)
//! or any `Read + Seek` source: peek a preamble, validate it, hand the
//! body to a handler or skip it, repeat until the source is exhausted.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::ast::{Schema, StructId};
use crate::attrs::compute_all;
use crate::datastream::{Cursor, StreamCursor};
use crate::errors::CbufError;
use crate::message_buf::MessageBuf;
use crate::parser::parse_source;
use crate::reflect::Value;
use crate::resolver::resolve;
use crate::wire::{self, MessageCodec, Preamble, PREAMBLE_LEN};

/// How a reader responds to a frame whose preamble fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Any invalid preamble is a hard error.
    Strict,
    /// Scan forward byte by byte looking for the next plausible preamble
    /// (known magic, in-range size, a hash present in the dictionary),
    /// counting skipped bytes in `corruption_count`.
    Lenient,
}

#[derive(Debug, Clone)]
struct MetadataEntry {
    name: String,
    schema_text: String,
}

/// One parsed frame: its preamble plus the still-undecoded body bytes.
pub struct Frame {
    pub preamble: Preamble,
    pub body: Vec<u8>,
}

/// Reads cbuf log frames from a [`Cursor`], transparently absorbing
/// `metadata` frames into an internal dictionary keyed by type hash.
pub struct LogReader<C: Cursor> {
    cursor: C,
    dictionary: HashMap<u64, MetadataEntry>,
    recovery: RecoveryMode,
    corruption_count: u64,
}

impl LogReader<StreamCursor<File>> {
    pub fn open(path: impl AsRef<Path>, recovery: RecoveryMode) -> Result<Self, CbufError> {
        let file = File::open(path)?;
        Self::new(StreamCursor::new(file)?, recovery)
    }
}

impl<R: Read + Seek> LogReader<StreamCursor<R>> {
    pub fn from_reader(reader: R, recovery: RecoveryMode) -> Result<Self, CbufError> {
        Self::new(StreamCursor::new(reader)?, recovery)
    }
}

impl<C: Cursor> LogReader<C> {
    pub fn new(cursor: C, recovery: RecoveryMode) -> Result<Self, CbufError> {
        Ok(LogReader {
            cursor,
            dictionary: HashMap::new(),
            recovery,
            corruption_count: 0,
        })
    }

    pub fn corruption_count(&self) -> u64 {
        self.corruption_count
    }

    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    /// Seeks back to the start without discarding the dictionary learned
    /// so far, so the same frames can be iterated again.
    pub fn rewind(&mut self) -> Result<(), CbufError> {
        self.cursor.rewind()
    }

    /// The type name and cbuf source text recorded for a hash, if a
    /// `metadata` frame for it has been seen.
    pub fn schema_for(&self, hash: u64) -> Option<(&str, &str)> {
        self.dictionary
            .get(&hash)
            .map(|e| (e.name.as_str(), e.schema_text.as_str()))
    }

    pub fn peek_hash(&mut self) -> Result<u64, CbufError> {
        Ok(self.peek_preamble()?.hash)
    }

    pub fn peek_size(&mut self) -> Result<u32, CbufError> {
        Ok(self.peek_preamble()?.size())
    }

    pub fn peek_timestamp(&mut self) -> Result<f64, CbufError> {
        Ok(self.peek_preamble()?.packet_timest)
    }

    fn peek_preamble(&mut self) -> Result<Preamble, CbufError> {
        let bytes = self.cursor.peek(PREAMBLE_LEN)?;
        wire::read_preamble(&bytes)
    }

    /// Validates the next preamble against remaining bytes, applying the
    /// masking-tolerance rule, and errors (strict) or resyncs (lenient) if
    /// it doesn't hold up. Returns `Ok(None)` for a truncated tail frame in
    /// lenient mode: that is end-of-stream, not corruption to scan past.
    fn next_valid_preamble(&mut self) -> Result<Option<Preamble>, CbufError> {
        loop {
            match self.try_read_preamble() {
                Ok(p) => return Ok(Some(p)),
                Err(CbufError::Truncated { .. }) if self.recovery == RecoveryMode::Lenient => {
                    return Ok(None);
                }
                Err(e) if self.recovery == RecoveryMode::Strict => return Err(e),
                Err(_) => {
                    if self.cursor.remaining() < 1 {
                        return Err(CbufError::Truncated {
                            needed: 1,
                            available: 0,
                        });
                    }
                    self.cursor.advance(1)?;
                    self.corruption_count += 1;
                }
            }
        }
    }

    fn try_read_preamble(&mut self) -> Result<Preamble, CbufError> {
        let remaining_after_preamble = self.cursor.remaining().saturating_sub(PREAMBLE_LEN);
        let bytes = self.cursor.peek(PREAMBLE_LEN)?;
        let raw = wire::read_preamble(&bytes)?;
        let (size, variant) = wire::resolve_size(
            (raw.size() & 0x0FFF_FFFF) | ((raw.variant() as u32) << 28),
            remaining_after_preamble + PREAMBLE_LEN,
        );
        let resolved = Preamble::new(size, variant, raw.hash, raw.packet_timest);
        if (resolved.size() as usize) < PREAMBLE_LEN {
            return Err(CbufError::Corruption {
                offset: self.cursor.position(),
                reason: "frame size smaller than the preamble itself".to_string(),
            });
        }
        if (resolved.size() as usize) > self.cursor.remaining() {
            return Err(CbufError::Truncated {
                needed: resolved.size() as usize,
                available: self.cursor.remaining(),
            });
        }
        if self.recovery == RecoveryMode::Lenient
            && !resolved.is_metadata()
            && !self.dictionary.contains_key(&resolved.hash)
        {
            return Err(CbufError::MetadataMissing { hash: resolved.hash });
        }
        Ok(resolved)
    }

    /// Reads the next frame, absorbing any `metadata` frames it encounters
    /// along the way into the dictionary rather than returning them.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, CbufError> {
        loop {
            if self.cursor.remaining() == 0 {
                return Ok(None);
            }
            let Some(preamble) = self.next_valid_preamble()? else {
                return Ok(None);
            };
            let body_len = preamble.size() as usize - PREAMBLE_LEN;
            self.cursor.advance(PREAMBLE_LEN)?;
            let body = self.cursor.take(body_len)?;

            if preamble.is_metadata() {
                self.absorb_metadata(&body)?;
                continue;
            }
            return Ok(Some(Frame { preamble, body }));
        }
    }

    fn absorb_metadata(&mut self, body: &[u8]) -> Result<(), CbufError> {
        let mut buf = MessageBuf::new(body.to_vec());
        let hash = buf.take_u64()?;
        let name = buf.take_string()?;
        let schema_text = buf.take_string()?;
        if let Some(existing) = self.dictionary.get(&hash) {
            if existing.schema_text != schema_text {
                return Err(CbufError::MetadataConflict { hash });
            }
        } else {
            self.dictionary.insert(hash, MetadataEntry { name, schema_text });
        }
        Ok(())
    }

    /// Skips the next frame's body without decoding it.
    pub fn skip_frame(&mut self) -> Result<(), CbufError> {
        self.next_frame()?;
        Ok(())
    }

    /// Decodes the next frame's body as `T`, checking the type hash matches.
    pub fn deserialize<T: MessageCodec>(&mut self) -> Result<Option<T>, CbufError> {
        let frame = match self.next_frame()? {
            Some(f) => f,
            None => return Ok(None),
        };
        if frame.preamble.hash != T::type_hash() {
            return Err(CbufError::HashMismatch {
                expected: T::type_hash(),
                found: frame.preamble.hash,
            });
        }
        let mut buf = MessageBuf::new(frame.body);
        Ok(Some(T::decode(&mut buf)?))
    }

    /// Decodes the next frame reflectively using the schema text recorded
    /// for its hash in the dictionary, without any `MessageCodec` impl.
    pub fn decode_dynamic(&mut self) -> Result<Option<(String, Value)>, CbufError> {
        let frame = match self.next_frame()? {
            Some(f) => f,
            None => return Ok(None),
        };
        let entry = self
            .dictionary
            .get(&frame.preamble.hash)
            .ok_or(CbufError::MetadataMissing {
                hash: frame.preamble.hash,
            })?
            .clone();

        let mut schema = Schema::new();
        parse_source(&mut schema, "<metadata>", &entry.schema_text)?;
        resolve(&mut schema)?;
        compute_all(&mut schema);
        let sid = (0..schema.structs.len())
            .map(|i| StructId(i as u32))
            .find(|&id| schema.struct_qualified_name(id) == entry.name)
            .ok_or_else(|| CbufError::Corruption {
                offset: 0,
                reason: format!("metadata text does not declare `{}`", entry.name),
            })?;

        let mut buf = MessageBuf::new(frame.body);
        let value = crate::reflect::decode_struct(&schema, sid, &mut buf)?;
        Ok(Some((entry.name, value)))
    }
}

/// `memmap2`-backed [`Cursor`]: `peek` returns a zero-copy borrow into the
/// mapped region rather than allocating and copying.
pub struct MmapCursor {
    map: memmap2::Mmap,
    pos: usize,
}

impl MmapCursor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CbufError> {
        let file = File::open(path)?;
        // SAFETY: the caller must not mutate the file out from under the
        // mapping for the lifetime of this cursor, per `memmap2`'s contract.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(MmapCursor { map, pos: 0 })
    }
}

impl Cursor for MmapCursor {
    fn remaining(&self) -> usize {
        self.map.len() - self.pos
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn peek(&mut self, len: usize) -> Result<Cow<'_, [u8]>, CbufError> {
        if self.remaining() < len {
            return Err(CbufError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        Ok(Cow::Borrowed(&self.map[self.pos..self.pos + len]))
    }

    fn advance(&mut self, len: usize) -> Result<(), CbufError> {
        if self.remaining() < len {
            return Err(CbufError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        self.pos += len;
        Ok(())
    }

    fn rewind(&mut self) -> Result<(), CbufError> {
        self.pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    fn metadata_frame(hash: u64, name: &str, schema_text: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&hash.to_ne_bytes());
        body.extend_from_slice(&(name.len() as u32).to_ne_bytes());
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(&(schema_text.len() as u32).to_ne_bytes());
        body.extend_from_slice(schema_text.as_bytes());

        let total = (PREAMBLE_LEN + body.len()) as u32;
        let preamble = Preamble::new(total, 0, wire::METADATA_HASH, 0.0);
        let mut out = Vec::new();
        wire::write_preamble(&mut out, &preamble);
        out.extend_from_slice(&body);
        out
    }

    fn data_frame(hash: u64, body: &[u8]) -> Vec<u8> {
        let total = (PREAMBLE_LEN + body.len()) as u32;
        let preamble = Preamble::new(total, 0, hash, 42.0);
        let mut out = Vec::new();
        wire::write_preamble(&mut out, &preamble);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn absorbs_metadata_and_returns_data_frames_only() {
        let mut bytes = metadata_frame(99, "p", "struct p { u32 a; }");
        bytes.extend(data_frame(99, &7u32.to_ne_bytes()));
        let mut reader = LogReader::from_reader(IoCursor::new(bytes), RecoveryMode::Strict).unwrap();

        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.preamble.hash, 99);
        assert_eq!(frame.body, 7u32.to_ne_bytes());
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.schema_for(99).unwrap().0, "p");
    }

    #[test]
    fn decode_dynamic_uses_recorded_schema_text() {
        let mut bytes = metadata_frame(99, "p", "struct p { u32 a; }");
        bytes.extend(data_frame(99, &7u32.to_ne_bytes()));
        let mut reader = LogReader::from_reader(IoCursor::new(bytes), RecoveryMode::Strict).unwrap();

        let (name, value) = reader.decode_dynamic().unwrap().unwrap();
        assert_eq!(name, "p");
        match value {
            Value::Struct(sv) => assert_eq!(sv.fields[0], ("a".to_string(), Value::U32(7))),
            _ => panic!("expected struct"),
        }
    }

    #[test]
    fn strict_mode_rejects_bad_magic() {
        let bytes = vec![0u8; PREAMBLE_LEN];
        let mut reader = LogReader::from_reader(IoCursor::new(bytes), RecoveryMode::Strict).unwrap();
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn lenient_mode_resyncs_past_garbage_bytes() {
        let mut bytes = vec![0xFFu8; 5];
        bytes.extend(metadata_frame(99, "p", "struct p { u32 a; }"));
        bytes.extend(data_frame(99, &7u32.to_ne_bytes()));
        let mut reader = LogReader::from_reader(IoCursor::new(bytes), RecoveryMode::Lenient).unwrap();

        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.preamble.hash, 99);
        assert!(reader.corruption_count() >= 5);
    }

    #[test]
    fn lenient_mode_silently_drops_truncated_tail_frame() {
        let mut bytes = metadata_frame(99, "p", "struct p { u32 a; }");
        bytes.extend(data_frame(99, &7u32.to_ne_bytes()));
        // A preamble claiming a body far larger than what actually follows.
        let tail_preamble = Preamble::new((PREAMBLE_LEN + 1000) as u32, 0, 99, 1.0);
        wire::write_preamble(&mut bytes, &tail_preamble);
        bytes.extend_from_slice(&[1, 2, 3]);

        let mut reader = LogReader::from_reader(IoCursor::new(bytes), RecoveryMode::Lenient).unwrap();

        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.preamble.hash, 99);
        let before = reader.corruption_count();
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.corruption_count(), before);
    }

    #[test]
    fn deserialize_checks_type_hash() {
        struct Other;
        impl MessageCodec for Other {
            fn type_hash() -> u64 {
                1234
            }
            fn type_name() -> &'static str {
                "other"
            }
            fn cbuf_schema_text() -> &'static str {
                "struct other {}"
            }
            fn encoded_size(&self) -> usize {
                0
            }
            fn encode(&self, _out: &mut Vec<u8>) {}
            fn decode(_buf: &mut MessageBuf) -> Result<Self, CbufError> {
                Ok(Other)
            }
            fn init() -> Self {
                Other
            }
        }

        let bytes = data_frame(99, &[]);
        let mut reader = LogReader::from_reader(IoCursor::new(bytes), RecoveryMode::Strict).unwrap();
        assert!(matches!(
            reader.deserialize::<Other>(),
            Err(CbufError::HashMismatch { .. })
        ));
    }
}
