use std::io;

use thiserror::Error;

use crate::ast::SrcLocation;

/// Every error kind the front-end, codec, and log I/O layers can raise.
///
/// Front-end errors carry a [`SrcLocation`] so a caller can build a
/// `file:line:col: error: message` diagnostic; codec and reader errors
/// carry whatever numbers made the check fail.
#[derive(Error, Debug)]
pub enum CbufError {
    #[error("{loc}: error: unexpected character {found:?}")]
    LexError { loc: SrcLocation, found: char },

    #[error("{loc}: error: unexpected token, expected one of {expected:?}, found {found}")]
    ParseError {
        loc: SrcLocation,
        expected: Vec<&'static str>,
        found: String,
    },

    #[error("{loc}: error: unresolved type `{name}`")]
    UnresolvedType { loc: SrcLocation, name: String },

    #[error("{loc}: error: cyclic type containment involving `{name}`")]
    CyclicType { loc: SrcLocation, name: String },

    #[error("{loc}: error: duplicate name `{name}` in namespace `{namespace}`")]
    DuplicateName {
        loc: SrcLocation,
        namespace: String,
        name: String,
    },

    #[error("bad magic: expected {expected:#010X}, found {found:#010X}")]
    BadMagic { expected: u32, found: u32 },

    #[error("truncated frame: need {needed} bytes, only {available} remaining")]
    Truncated { needed: usize, available: usize },

    #[error("hash mismatch: expected {expected:#018X}, found {found:#018X}")]
    HashMismatch { expected: u64, found: u64 },

    #[error("compact array overflow: count {count} exceeds capacity {capacity}")]
    CompactOverflow { count: u32, capacity: u32 },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("no metadata known for hash {hash:#018X}")]
    MetadataMissing { hash: u64 },

    #[error("metadata conflict for hash {hash:#018X}: schema text differs across streams")]
    MetadataConflict { hash: u64 },

    #[error("import `{file}` not found in any include directory")]
    ImportNotFound { file: String },

    #[error("type {type_hash:#018X} has more than 15 distinct topics; the variant tag is 4 bits")]
    TooManyTopics { type_hash: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corruption at byte offset {offset}: {reason}")]
    Corruption { offset: usize, reason: String },
}

impl CbufError {
    pub fn lex(loc: SrcLocation, found: char) -> Self {
        CbufError::LexError { loc, found }
    }

    pub fn parse(loc: SrcLocation, expected: Vec<&'static str>, found: impl Into<String>) -> Self {
        CbufError::ParseError {
            loc,
            expected,
            found: found.into(),
        }
    }
}
