//! Builder-style configuration for the front-end and the log reader: a
//! mandatory input, a handful of `#[must_use]` chained setters, and a
//! final `build`/`open` that produces the real type. `WriterBuilder`
//! lives next to `LogWriter` in `writer.rs`; this module covers the
//! other two builders.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::Schema;
use crate::attrs::compute_all;
use crate::datastream::StreamCursor;
use crate::errors::CbufError;
use crate::parser::parse_source;
use crate::reader::{LogReader, MmapCursor, RecoveryMode};
use crate::resolver::resolve;

/// Parses a schema file and every file it `#import`s, resolving each
/// import against a search path (`-I <dir>`, in the order added) and
/// finally against the importing file's own directory. All files share
/// one [`Schema`] arena, so a struct in `a.cbuf` can reference one
/// declared in an imported `b.cbuf`.
pub struct SchemaLoader {
    include_dirs: Vec<PathBuf>,
}

impl SchemaLoader {
    #[must_use]
    pub fn new() -> Self {
        SchemaLoader {
            include_dirs: Vec::new(),
        }
    }

    #[must_use]
    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Parses `entry` and, transitively, everything it imports, returning
    /// a fully resolved [`Schema`] with hashes and sizes computed.
    pub fn load(&self, entry: impl AsRef<Path>) -> Result<Schema, CbufError> {
        let entry = entry.as_ref();
        let mut schema = Schema::new();
        let mut seen = HashMap::new();
        self.load_file(&mut schema, entry, &mut seen)?;
        resolve(&mut schema)?;
        compute_all(&mut schema);
        Ok(schema)
    }

    fn load_file(
        &self,
        schema: &mut Schema,
        path: &Path,
        seen: &mut HashMap<PathBuf, ()>,
    ) -> Result<(), CbufError> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if seen.contains_key(&canonical) {
            return Ok(());
        }
        seen.insert(canonical, ());

        let source = fs::read_to_string(path)?;
        let file_name = path.to_string_lossy().into_owned();
        let parsed = parse_source(schema, &file_name, &source)?;

        let own_dir = path.parent().map(Path::to_path_buf);
        for import in parsed.imports {
            let resolved = self.resolve_import(&import, own_dir.as_deref())?;
            self.load_file(schema, &resolved, seen)?;
        }
        Ok(())
    }

    fn resolve_import(&self, file: &str, own_dir: Option<&Path>) -> Result<PathBuf, CbufError> {
        for dir in &self.include_dirs {
            let candidate = dir.join(file);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        if let Some(dir) = own_dir {
            let candidate = dir.join(file);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(CbufError::ImportNotFound {
            file: file.to_string(),
        })
    }
}

impl Default for SchemaLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Configures how a log file is opened: recovery strictness, and whether
/// to memory-map the file (zero-copy reads) or stream it through a
/// buffered `File` (works on sources `mmap` can't handle, such as pipes).
pub struct ReaderBuilder {
    recovery: RecoveryMode,
}

impl ReaderBuilder {
    #[must_use]
    pub fn new() -> Self {
        ReaderBuilder {
            recovery: RecoveryMode::Strict,
        }
    }

    #[must_use]
    pub fn recovery(mut self, mode: RecoveryMode) -> Self {
        self.recovery = mode;
        self
    }

    /// Opens `path` through a buffered, seekable reader.
    pub fn open(self, path: impl AsRef<Path>) -> Result<LogReader<StreamCursor<fs::File>>, CbufError> {
        LogReader::open(path, self.recovery)
    }

    /// Opens `path` memory-mapped, for zero-copy frame reads.
    pub fn open_mmap(self, path: impl AsRef<Path>) -> Result<LogReader<MmapCursor>, CbufError> {
        LogReader::new(MmapCursor::open(path)?, self.recovery)
    }
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
