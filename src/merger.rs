//! Multi-stream merger (§4.7): owns N readers, advances whichever has the
//! smallest next timestamp, and exposes the three operations spec'd —
//! `process_message`, `count_messages`, `merge`. Handlers register by type
//! name and fall back to the reflective decoder on a hash mismatch with a
//! matching name.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::datastream::StreamCursor;
use crate::errors::CbufError;
use crate::reader::{Frame, LogReader, RecoveryMode};
use crate::reflect::Value;
use crate::wire::{self, Preamble, PREAMBLE_LEN};

/// Whether a `merge` filter list is an allow- or deny-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPolarity {
    Include,
    Exclude,
}

/// A handler registered for one type name. Receives the decoded value
/// reflectively; returning `Err` is logged and does not abort iteration.
pub type Handler = Box<dyn FnMut(&Value) -> Result<(), CbufError>>;

struct Stream<R: std::io::Read + std::io::Seek> {
    reader: LogReader<StreamCursor<R>>,
    pending: Option<(f64, Frame, String)>,
}

/// Merges N logs in timestamp order. Generic over the underlying `Read +
/// Seek` source so tests can drive it with `std::io::Cursor<Vec<u8>>`.
pub struct StreamMerger<R: std::io::Read + std::io::Seek> {
    streams: Vec<Stream<R>>,
    handlers: HashMap<String, Handler>,
    opted_out: HashSet<String>,
    start: Option<f64>,
    end: Option<f64>,
}

impl<R: std::io::Read + std::io::Seek> StreamMerger<R> {
    pub fn new(readers: Vec<R>, recovery: RecoveryMode) -> Result<Self, CbufError> {
        let mut streams = Vec::with_capacity(readers.len());
        for r in readers {
            let reader = LogReader::from_reader(r, recovery)?;
            streams.push(Stream { reader, pending: None });
        }
        Ok(StreamMerger {
            streams,
            handlers: HashMap::new(),
            opted_out: HashSet::new(),
            start: None,
            end: None,
        })
    }

    /// Registers a handler for a type name; replaces any existing one.
    pub fn register(&mut self, type_name: impl Into<String>, handler: Handler) {
        self.handlers.insert(type_name.into(), handler);
    }

    /// Marks a type name as opting out of the reflective hash-mismatch
    /// fallback: such messages are skipped with a one-shot warning instead.
    pub fn opt_out_of_fallback(&mut self, type_name: impl Into<String>) {
        self.opted_out.insert(type_name.into());
    }

    /// Restricts the merge/process loop to `packet_timest` in `[start, end]`.
    pub fn set_time_window(&mut self, start: Option<f64>, end: Option<f64>) {
        self.start = start;
        self.end = end;
    }

    fn fill_pending(&mut self, idx: usize) -> Result<(), CbufError> {
        if self.streams[idx].pending.is_some() {
            return Ok(());
        }
        loop {
            let frame = match self.streams[idx].reader.next_frame()? {
                Some(f) => f,
                None => return Ok(()),
            };
            if let Some(start) = self.start {
                if frame.preamble.packet_timest < start {
                    continue;
                }
            }
            let type_name = self.streams[idx]
                .reader
                .schema_for(frame.preamble.hash)
                .map(|(n, _)| n.to_string())
                .unwrap_or_default();
            self.streams[idx].pending = Some((frame.preamble.packet_timest, frame, type_name));
            return Ok(());
        }
    }

    /// Index of the stream whose pending frame has the smallest timestamp,
    /// filling each stream's lookahead slot as needed.
    fn next_index(&mut self) -> Result<Option<usize>, CbufError> {
        for i in 0..self.streams.len() {
            self.fill_pending(i)?;
        }
        let best = self
            .streams
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.pending.as_ref().map(|(ts, ..)| (i, *ts)))
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap());
        match best {
            Some((i, ts)) => {
                if let Some(end) = self.end {
                    if ts > end {
                        return Ok(None);
                    }
                }
                Ok(Some(i))
            }
            None => Ok(None),
        }
    }

    fn take_next(&mut self) -> Result<Option<(Frame, String)>, CbufError> {
        let idx = match self.next_index()? {
            Some(i) => i,
            None => return Ok(None),
        };
        let (_, frame, type_name) = self.streams[idx].pending.take().unwrap();
        Ok(Some((frame, type_name)))
    }

    /// Advances to the next message across all streams and dispatches it to
    /// a registered handler, reflectively decoding first. No-op (but still
    /// advances) if no handler is registered for the type name.
    pub fn process_message(&mut self) -> Result<bool, CbufError> {
        let (frame, type_name) = match self.take_next()? {
            Some(x) => x,
            None => return Ok(false),
        };
        if self.handlers.contains_key(&type_name) && !self.opted_out.contains(&type_name) {
            let value = self.decode_frame(&frame)?;
            if let Some(handler) = self.handlers.get_mut(&type_name) {
                if let Err(e) = handler(&value) {
                    log::warn!("cbuf merger: handler for `{type_name}` failed: {e}");
                }
            }
        } else if self.opted_out.contains(&type_name) {
            log::warn!("cbuf merger: `{type_name}` opted out of the reflective fallback, skipping");
        }
        Ok(true)
    }

    fn decode_frame(&self, frame: &Frame) -> Result<Value, CbufError> {
        let schema_text = self
            .schema_text_for(frame.preamble.hash)?
            .ok_or(CbufError::MetadataMissing { hash: frame.preamble.hash })?;
        decode_with_schema_text(&schema_text, &frame.preamble, &frame.body)
    }

    /// Resets every stream, counts frames by type name, resets again — the
    /// stream positions are left exactly where they were found, so a
    /// `process_message`/`merge` loop can still run from the start after.
    pub fn count_messages(&mut self) -> Result<HashMap<String, u64>, CbufError> {
        for stream in &mut self.streams {
            stream.reader.rewind()?;
            stream.pending = None;
        }

        let mut counts = HashMap::new();
        loop {
            let idx = match self.next_index()? {
                Some(i) => i,
                None => break,
            };
            let (_, _, type_name) = self.streams[idx].pending.take().unwrap();
            *counts.entry(type_name).or_insert(0u64) += 1;
        }

        for stream in &mut self.streams {
            stream.reader.rewind()?;
            stream.pending = None;
        }
        Ok(counts)
    }

    /// Timestamp-ordered merge of every stream into `output`, applying a
    /// type-name filter. Fails with `MetadataConflict` if two inputs
    /// declare the same hash with differing schema text.
    pub fn merge(
        &mut self,
        output: impl AsRef<Path>,
        filter: &[String],
        polarity: FilterPolarity,
    ) -> Result<(), CbufError> {
        let mut out = File::create(output)?;
        let mut written_hashes: HashSet<u64> = HashSet::new();

        while let Some((frame, type_name)) = self.take_next()? {
            let passes = match polarity {
                FilterPolarity::Include => filter.iter().any(|f| f == &type_name),
                FilterPolarity::Exclude => !filter.iter().any(|f| f == &type_name),
            };
            if !passes {
                continue;
            }

            if let Some(schema_text) = self.schema_text_for(frame.preamble.hash)? {
                if written_hashes.insert(frame.preamble.hash) {
                    write_metadata_frame(&mut out, frame.preamble.hash, &type_name, &schema_text)?;
                }
            }

            let total = (PREAMBLE_LEN + frame.body.len()) as u32;
            let preamble = Preamble::new(total, frame.preamble.variant(), frame.preamble.hash, frame.preamble.packet_timest);
            let mut bytes = Vec::with_capacity(total as usize);
            wire::write_preamble(&mut bytes, &preamble);
            bytes.extend_from_slice(&frame.body);
            out.write_all(&bytes)?;
        }
        Ok(())
    }

    /// The schema text recorded for `hash` across every stream's dictionary.
    /// Errors with `MetadataConflict` the moment two streams disagree.
    fn schema_text_for(&self, hash: u64) -> Result<Option<String>, CbufError> {
        let mut found: Option<String> = None;
        for stream in &self.streams {
            if let Some((_, text)) = stream.reader.schema_for(hash) {
                match &found {
                    None => found = Some(text.to_string()),
                    Some(existing) if existing != text => return Err(CbufError::MetadataConflict { hash }),
                    Some(_) => {}
                }
            }
        }
        Ok(found)
    }
}

fn decode_with_schema_text(schema_text: &str, preamble: &Preamble, body: &[u8]) -> Result<Value, CbufError> {
    use crate::ast::{Schema, StructId};
    use crate::attrs::compute_all;
    use crate::message_buf::MessageBuf;
    use crate::parser::parse_source;
    use crate::reflect::decode_struct;
    use crate::resolver::resolve;

    let mut schema = Schema::new();
    parse_source(&mut schema, "<metadata>", schema_text)?;
    resolve(&mut schema)?;
    compute_all(&mut schema);

    // The first struct declared in a single-type metadata blob is the one
    // this frame's hash names; recorded metadata text is always exactly
    // one struct's canonical declaration.
    let sid = (0..schema.structs.len())
        .map(|i| StructId(i as u32))
        .next()
        .ok_or(CbufError::MetadataMissing { hash: preamble.hash })?;
    let mut buf = MessageBuf::new(body.to_vec());
    decode_struct(&schema, sid, &mut buf)
}

fn write_metadata_frame(out: &mut File, hash: u64, name: &str, schema_text: &str) -> Result<(), CbufError> {
    use crate::field_codec::WriteToBuf;

    let mut body = Vec::new();
    hash.write_to_buf(&mut body);
    name.to_string().write_to_buf(&mut body);
    schema_text.to_string().write_to_buf(&mut body);

    let total = (PREAMBLE_LEN + body.len()) as u32;
    let preamble = Preamble::new(total, 0, wire::METADATA_HASH, 0.0);
    let mut bytes = Vec::with_capacity(total as usize);
    wire::write_preamble(&mut bytes, &preamble);
    bytes.extend_from_slice(&body);
    out.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor as IoCursor;
    use std::rc::Rc;

    fn metadata_frame(hash: u64, name: &str, schema_text: &str) -> Vec<u8> {
        let mut body = Vec::new();
        use crate::field_codec::WriteToBuf;
        hash.write_to_buf(&mut body);
        name.to_string().write_to_buf(&mut body);
        schema_text.to_string().write_to_buf(&mut body);
        let total = (PREAMBLE_LEN + body.len()) as u32;
        let preamble = Preamble::new(total, 0, wire::METADATA_HASH, 0.0);
        let mut out = Vec::new();
        wire::write_preamble(&mut out, &preamble);
        out.extend_from_slice(&body);
        out
    }

    fn data_frame(hash: u64, timestamp: f64, body: &[u8]) -> Vec<u8> {
        let total = (PREAMBLE_LEN + body.len()) as u32;
        let preamble = Preamble::new(total, 0, hash, timestamp);
        let mut out = Vec::new();
        wire::write_preamble(&mut out, &preamble);
        out.extend_from_slice(body);
        out
    }

    fn stream_a() -> Vec<u8> {
        let mut bytes = metadata_frame(1, "p", "struct p { u32 a; }");
        bytes.extend(data_frame(1, 1.0, &1u32.to_ne_bytes()));
        bytes.extend(data_frame(1, 3.0, &3u32.to_ne_bytes()));
        bytes
    }

    fn stream_b() -> Vec<u8> {
        let mut bytes = metadata_frame(1, "p", "struct p { u32 a; }");
        bytes.extend(data_frame(1, 2.0, &2u32.to_ne_bytes()));
        bytes
    }

    #[test]
    fn process_message_dispatches_in_timestamp_order() {
        let mut merger =
            StreamMerger::new(vec![IoCursor::new(stream_a()), IoCursor::new(stream_b())], RecoveryMode::Strict).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        merger.register(
            "p",
            Box::new(move |v: &Value| {
                if let Value::Struct(sv) = v {
                    if let Value::U32(a) = sv.fields[0].1 {
                        seen_clone.borrow_mut().push(a);
                    }
                }
                Ok(())
            }),
        );

        while merger.process_message().unwrap() {}
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn count_messages_tallies_by_type_name() {
        let mut merger =
            StreamMerger::new(vec![IoCursor::new(stream_a()), IoCursor::new(stream_b())], RecoveryMode::Strict).unwrap();
        let counts = merger.count_messages().unwrap();
        assert_eq!(counts.get("p"), Some(&3));
    }

    #[test]
    fn time_window_skips_messages_outside_range() {
        let mut merger =
            StreamMerger::new(vec![IoCursor::new(stream_a()), IoCursor::new(stream_b())], RecoveryMode::Strict).unwrap();
        merger.set_time_window(Some(2.0), Some(2.5));
        let counts = merger.count_messages().unwrap();
        assert_eq!(counts.get("p"), Some(&1));
    }

    #[test]
    fn merge_writes_timestamp_ordered_output() {
        let mut merger =
            StreamMerger::new(vec![IoCursor::new(stream_a()), IoCursor::new(stream_b())], RecoveryMode::Strict).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("merged.cb");
        merger.merge(&out_path, &["p".to_string()], FilterPolarity::Include).unwrap();

        let mut reader = LogReader::open(&out_path, RecoveryMode::Strict).unwrap();
        let mut values = Vec::new();
        while let Some((_, value)) = reader.decode_dynamic().unwrap() {
            if let Value::Struct(sv) = value {
                if let Value::U32(a) = sv.fields[0].1 {
                    values.push(a);
                }
            }
        }
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn merge_conflicting_schema_text_is_rejected() {
        let mut a = metadata_frame(1, "p", "struct p { u32 a; }");
        a.extend(data_frame(1, 1.0, &1u32.to_ne_bytes()));
        let mut b = metadata_frame(1, "p", "struct p { u64 a; }");
        b.extend(data_frame(1, 2.0, &2u64.to_ne_bytes()));

        let mut merger = StreamMerger::new(vec![IoCursor::new(a), IoCursor::new(b)], RecoveryMode::Strict).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("merged.cb");
        assert!(matches!(
            merger.merge(&out_path, &[], FilterPolarity::Exclude),
            Err(CbufError::MetadataConflict { .. })
        ));
    }
}
