//! Append-only log writer (§4.5): a [`WriterBuilder`] configures rotation
//! and timestamping, then hands out a [`LogWriter`] whose `publish` enqueues
//! into a [`crate::ring::RingAllocator`]; one drain thread owns the file,
//! the `known_types` dictionary, and rotation.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::errors::CbufError;
use crate::field_codec::WriteToBuf;
use crate::message_buf::MessageBuf;
use crate::ring::RingAllocator;
use crate::wire::{self, MessageCodec, Preamble, PREAMBLE_LEN};

const DEFAULT_ROTATION_THRESHOLD: u64 = 64 * 1024 * 1024;
const DEFAULT_RING_CAPACITY: usize = 1 << 20;
const DRAIN_POLL_INTERVAL: Duration = Duration::from_micros(200);

fn system_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// One queued publish, serialized into the ring's byte window. Distinct
/// from the on-disk frame format (`wire::Preamble`): this is an internal
/// transport encoding the drain thread unpacks before deciding whether a
/// `metadata` frame is owed.
struct Pending {
    hash: u64,
    variant: u8,
    packet_timest: f64,
    type_name: String,
    schema_text: String,
    body: Vec<u8>,
}

impl Pending {
    fn encode(&self, out: &mut Vec<u8>) {
        self.hash.write_to_buf(out);
        self.variant.write_to_buf(out);
        self.packet_timest.write_to_buf(out);
        self.type_name.write_to_buf(out);
        self.schema_text.write_to_buf(out);
        (self.body.len() as u32).write_to_buf(out);
        out.extend_from_slice(&self.body);
    }

    fn decode(bytes: Vec<u8>) -> Result<Self, CbufError> {
        let mut buf = MessageBuf::new(bytes);
        let hash = buf.take_u64()?;
        let variant = buf.take_u8()?;
        let packet_timest = buf.take_f64()?;
        let type_name = buf.take_string()?;
        let schema_text = buf.take_string()?;
        let body_len = buf.take_u32()? as usize;
        let body = buf.advance(body_len)?.to_vec();
        Ok(Pending {
            hash,
            variant,
            packet_timest,
            type_name,
            schema_text,
            body,
        })
    }
}

type TimestampSource = dyn Fn() -> f64 + Send + Sync;
type RotateHook = dyn Fn(&Path) + Send + Sync;
type ErrorHook = dyn Fn(CbufError) + Send + Sync;

/// Configures and spawns a [`LogWriter`]. Grounded in `core/src/builder.rs`.
pub struct WriterBuilder {
    output_dir: PathBuf,
    rotation_threshold: u64,
    ring_capacity: usize,
    timestamp_source: Arc<TimestampSource>,
    on_rotate: Option<Arc<RotateHook>>,
    on_error: Option<Arc<ErrorHook>>,
}

impl WriterBuilder {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        WriterBuilder {
            output_dir: output_dir.into(),
            rotation_threshold: DEFAULT_ROTATION_THRESHOLD,
            ring_capacity: DEFAULT_RING_CAPACITY,
            timestamp_source: Arc::new(system_time_secs),
            on_rotate: None,
            on_error: None,
        }
    }

    #[must_use]
    pub fn rotation_threshold(mut self, bytes: u64) -> Self {
        self.rotation_threshold = bytes;
        self
    }

    #[must_use]
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Overrides where `packet_timest` comes from (spec's producer- vs
    /// drain-thread-stamped open question; we stamp at `publish()` time
    /// using this source, default `SystemTime::now`).
    #[must_use]
    pub fn timestamp_source(mut self, f: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.timestamp_source = Arc::new(f);
        self
    }

    #[must_use]
    pub fn on_rotate(mut self, f: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_rotate = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(CbufError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<LogWriter, CbufError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let ring = RingAllocator::new(self.ring_capacity);
        let drain_ring = ring.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let drain_shutdown = shutdown.clone();
        let output_dir = self.output_dir.clone();
        let rotation_threshold = self.rotation_threshold;
        let on_rotate = self.on_rotate.clone();
        let on_error = self.on_error.clone();

        let handle = thread::Builder::new()
            .name("cbuf-writer-drain".to_string())
            .spawn(move || {
                drain_loop(
                    drain_ring,
                    drain_shutdown,
                    output_dir,
                    rotation_threshold,
                    on_rotate,
                    on_error,
                )
            })
            .map_err(CbufError::Io)?;

        Ok(LogWriter {
            ring,
            shutdown,
            handle: Some(handle),
            timestamp_source: self.timestamp_source,
            topic_variants: Mutex::new(TopicVariants::default()),
        })
    }
}

/// Assigns variant tags per (type-hash, topic-hash) pair in first-seen
/// order, starting at 1 (0 means "no topic-hash supplied"). One counter
/// per type-hash, since the tag is only 4 bits wide.
#[derive(Default)]
struct TopicVariants {
    assigned: HashMap<(u64, u64), u8>,
    next: HashMap<u64, u8>,
}

impl TopicVariants {
    fn variant_for(&mut self, type_hash: u64, topic_hash: Option<u64>) -> Result<u8, CbufError> {
        let Some(topic_hash) = topic_hash else {
            return Ok(0);
        };
        if let Some(&variant) = self.assigned.get(&(type_hash, topic_hash)) {
            return Ok(variant);
        }
        let next = self.next.entry(type_hash).or_insert(1);
        if *next > 15 {
            return Err(CbufError::TooManyTopics { type_hash });
        }
        let variant = *next;
        *next += 1;
        self.assigned.insert((type_hash, topic_hash), variant);
        Ok(variant)
    }
}

/// Producer-facing handle: `publish` copies an encoded message into the
/// ring buffer and returns; the drain thread does all file I/O.
pub struct LogWriter {
    ring: RingAllocator,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    timestamp_source: Arc<TimestampSource>,
    topic_variants: Mutex<TopicVariants>,
}

impl LogWriter {
    /// Publishes a typed message. `topic_hash` identifies which topic of
    /// `T` produced it; the writer assigns its variant tag per §4.2 (first-
    /// seen order starting at 1). Pass `None` for an untagged topic.
    pub fn publish<T: MessageCodec>(&self, msg: &T, topic_hash: Option<u64>) -> Result<(), CbufError> {
        let mut body = Vec::with_capacity(msg.encoded_size());
        msg.encode(&mut body);
        self.publish_raw(T::type_hash(), T::type_name(), T::cbuf_schema_text(), topic_hash, body)
    }

    /// Publishes a pre-encoded body without requiring a `MessageCodec` impl
    /// (used by reflective or dynamically-assembled producers).
    pub fn publish_raw(
        &self,
        hash: u64,
        type_name: &str,
        schema_text: &str,
        topic_hash: Option<u64>,
        body: Vec<u8>,
    ) -> Result<(), CbufError> {
        let variant = self
            .topic_variants
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .variant_for(hash, topic_hash)?;
        let pending = Pending {
            hash,
            variant,
            packet_timest: (self.timestamp_source)(),
            type_name: type_name.to_string(),
            schema_text: schema_text.to_string(),
            body,
        };
        let mut bytes = Vec::new();
        pending.encode(&mut bytes);

        let mut slot = self.ring.alloc(bytes.len())?;
        slot.extend_from_slice(&bytes);
        slot.commit();
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.ring.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct DrainState {
    file: BufWriter<File>,
    path: PathBuf,
    bytes_written: u64,
    known_types: HashMap<u64, String>,
    output_dir: PathBuf,
    rotation_threshold: u64,
    on_rotate: Option<Arc<RotateHook>>,
}

impl DrainState {
    fn open(output_dir: &Path, rotation_threshold: u64, on_rotate: Option<Arc<RotateHook>>) -> Result<Self, CbufError> {
        let (file, path) = open_new_file(output_dir)?;
        Ok(DrainState {
            file: BufWriter::new(file),
            path,
            bytes_written: 0,
            known_types: HashMap::new(),
            output_dir: output_dir.to_path_buf(),
            rotation_threshold,
            on_rotate,
        })
    }

    fn write_frame(&mut self, hash: u64, variant: u8, packet_timest: f64, body: &[u8]) -> Result<(), CbufError> {
        let total = (PREAMBLE_LEN + body.len()) as u32;
        let preamble = Preamble::new(total, variant, hash, packet_timest);
        let mut frame = Vec::with_capacity(total as usize);
        wire::write_preamble(&mut frame, &preamble);
        frame.extend_from_slice(body);
        self.file.write_all(&frame)?;
        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    fn ensure_metadata(&mut self, hash: u64, name: &str, schema_text: &str) -> Result<(), CbufError> {
        if self.known_types.contains_key(&hash) {
            return Ok(());
        }
        let mut body = Vec::new();
        hash.write_to_buf(&mut body);
        name.to_string().write_to_buf(&mut body);
        schema_text.to_string().write_to_buf(&mut body);
        self.write_frame(wire::METADATA_HASH, 0, system_time_secs(), &body)?;
        self.known_types.insert(hash, name.to_string());
        Ok(())
    }

    fn rotate_if_needed(&mut self) -> Result<(), CbufError> {
        if self.bytes_written < self.rotation_threshold {
            return Ok(());
        }
        self.file.flush()?;
        if let Some(hook) = &self.on_rotate {
            hook(&self.path);
        }
        let (file, path) = open_new_file(&self.output_dir)?;
        self.file = BufWriter::new(file);
        self.path = path;
        self.bytes_written = 0;
        self.known_types.clear();
        Ok(())
    }
}

fn open_new_file(output_dir: &Path) -> Result<(File, PathBuf), CbufError> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut path = output_dir.join(format!("log_{nanos:020}.cb"));
    let mut suffix = 1;
    while path.exists() {
        path = output_dir.join(format!("log_{nanos:020}_{suffix}.cb"));
        suffix += 1;
    }
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
    Ok((file, path))
}

fn drain_loop(
    ring: RingAllocator,
    shutdown: Arc<AtomicBool>,
    output_dir: PathBuf,
    rotation_threshold: u64,
    on_rotate: Option<Arc<RotateHook>>,
    on_error: Option<Arc<ErrorHook>>,
) {
    let mut state = match DrainState::open(&output_dir, rotation_threshold, on_rotate) {
        Ok(s) => s,
        Err(e) => {
            log::error!("cbuf writer: failed to open initial log file: {e}");
            if let Some(hook) = &on_error {
                hook(e);
            }
            return;
        }
    };

    loop {
        match ring.try_pop() {
            Some(bytes) => {
                if let Err(e) = drain_one(&mut state, bytes) {
                    log::error!("cbuf writer: failed to write a queued message: {e}");
                    if let Some(hook) = &on_error {
                        hook(e);
                    }
                }
            }
            None => {
                if shutdown.load(Ordering::SeqCst) && ring.is_empty() {
                    let _ = state.file.flush();
                    return;
                }
                thread::sleep(DRAIN_POLL_INTERVAL);
            }
        }
    }
}

fn drain_one(state: &mut DrainState, bytes: Vec<u8>) -> Result<(), CbufError> {
    let pending = Pending::decode(bytes)?;
    state.ensure_metadata(pending.hash, &pending.type_name, &pending.schema_text)?;
    state.write_frame(pending.hash, pending.variant, pending.packet_timest, &pending.body)?;
    state.rotate_if_needed()
}
