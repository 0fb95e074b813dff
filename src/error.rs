//! Errors produced by parsing, resolving, instantiating, and decoding.
//!
//! This is a private module. Its public items are re-exported by the parent.

use std::sync::Arc;


//------------ Error ---------------------------------------------------------

/// An error produced by any of the crate's operations.
///
/// Errors that originate in ASN.1 source text carry line and column
/// coordinates and render as `line L col C: message`. Errors that originate
/// while mapping data onto a schema carry the path of the offending element
/// and render as `/path/to/field: message`. All other errors render their
/// message alone.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// The ASN.1 source text is syntactically invalid.
    #[error("line {line} col {col}: {msg}")]
    Parse { line: usize, col: usize, msg: String },

    /// A definition refers to a type that does not exist.
    #[error("line {line} col {col}: {msg}")]
    UnknownType { line: usize, col: usize, msg: String },

    /// A definition refers to a value that does not exist.
    #[error("line {line} col {col}: {msg}")]
    UnknownValue { line: usize, col: usize, msg: String },

    /// A set of type definitions refers back to itself without ever
    /// reaching a basic type.
    #[error("line {line} col {col}: {msg}")]
    TypeCycle { line: usize, col: usize, msg: String },

    /// A set of value definitions refers back to itself.
    #[error("line {line} col {col}: {msg}")]
    ValueCycle { line: usize, col: usize, msg: String },

    /// A type or value name is defined twice.
    #[error("line {line} col {col}: {msg}")]
    Redefinition { line: usize, col: usize, msg: String },

    /// There is text after the module's `END` keyword.
    ///
    /// The definitions parsed up to `END` remain usable; only the trailing
    /// bytes are flagged.
    #[error("line {line} col {col}: {msg}")]
    TrailingGarbage { line: usize, col: usize, msg: String },

    /// Supplied data does not fit the schema type it is instantiated as.
    #[error("{path}{msg}")]
    Instantiate { path: String, msg: String },

    /// A `$…` program failed to evaluate.
    #[error("{path}{msg}")]
    Cook { path: String, msg: String },

    /// DER input is malformed or uses an unsupported encoding.
    #[error("{msg}")]
    DerDecode { msg: String },

    /// A type or value name is not known to the definitions.
    #[error("{msg}")]
    Undefined { msg: String },
}

impl Error {
    pub(crate) fn parse(
        src: &str, pos: usize, msg: impl Into<String>
    ) -> Self {
        let (line, col) = line_col(src, pos);
        Error::Parse { line, col, msg: msg.into() }
    }

    pub(crate) fn unknown_type(
        src: &str, pos: usize, msg: impl Into<String>
    ) -> Self {
        let (line, col) = line_col(src, pos);
        Error::UnknownType { line, col, msg: msg.into() }
    }

    pub(crate) fn unknown_value(
        src: &str, pos: usize, msg: impl Into<String>
    ) -> Self {
        let (line, col) = line_col(src, pos);
        Error::UnknownValue { line, col, msg: msg.into() }
    }

    pub(crate) fn type_cycle(
        src: &str, pos: usize, msg: impl Into<String>
    ) -> Self {
        let (line, col) = line_col(src, pos);
        Error::TypeCycle { line, col, msg: msg.into() }
    }

    pub(crate) fn value_cycle(
        src: &str, pos: usize, msg: impl Into<String>
    ) -> Self {
        let (line, col) = line_col(src, pos);
        Error::ValueCycle { line, col, msg: msg.into() }
    }

    pub(crate) fn trailing_garbage(src: &str, pos: usize) -> Self {
        let (line, col) = line_col(src, pos);
        Error::TrailingGarbage {
            line, col,
            msg: "trailing data after END".into(),
        }
    }

    pub(crate) fn instantiate(
        path: impl Into<String>, msg: impl Into<String>
    ) -> Self {
        Error::Instantiate {
            path: path_prefix(path.into()), msg: msg.into()
        }
    }

    pub(crate) fn cook(
        path: impl Into<String>, msg: impl Into<String>
    ) -> Self {
        Error::Cook { path: path_prefix(path.into()), msg: msg.into() }
    }

    pub(crate) fn der_decode(msg: impl Into<String>) -> Self {
        Error::DerDecode { msg: msg.into() }
    }

    pub(crate) fn undefined(msg: impl Into<String>) -> Self {
        Error::Undefined { msg: msg.into() }
    }
}


//------------ SrcPos --------------------------------------------------------

/// A position in one of the source texts held by a `Definitions`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SrcPos {
    /// Index of the source text within `Definitions::sources`.
    pub source: u32,

    /// Byte offset into that source text.
    pub offset: u32,
}

impl SrcPos {
    /// The position used by injected universal types which have no source.
    pub const BUILTIN: SrcPos = SrcPos { source: u32::MAX, offset: 0 };

    pub fn new(source: usize, offset: usize) -> Self {
        SrcPos { source: source as u32, offset: offset as u32 }
    }

    /// Returns the source text this position refers to, if any.
    pub fn src(self, sources: &[Arc<str>]) -> &str {
        sources.get(self.source as usize).map_or("", |s| s.as_ref())
    }
}

/// Turns an element path into an error prefix, empty paths into nothing.
fn path_prefix(path: String) -> String {
    if path.is_empty() {
        path
    }
    else {
        format!("{}: ", path)
    }
}

/// Converts a byte offset into one-based line and column numbers.
pub(crate) fn line_col(src: &str, pos: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 0;
    for (i, ch) in src.bytes().enumerate() {
        col += 1;
        if i == pos {
            break
        }
        if ch == b'\n' {
            col = 0;
            line += 1;
        }
    }
    if src.is_empty() {
        col = 1;
    }
    (line, col)
}


//============ Tests =========================================================
