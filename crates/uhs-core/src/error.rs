use thiserror::Error;

use crate::types::{LineNumber, NodeId};

pub type UhsResult<T> = Result<T, UhsError>;

#[derive(Debug, Error)]
pub enum UhsError {
    /// The document (tree or bytes) is malformed. Fatal to the call.
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    /// The engine broke one of its own ordering or sizing rules.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("document too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UhsError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        UhsError::Invariant(msg.into())
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, UhsError::Structural(_))
    }
}

/// Reasons a tree cannot be encoded or a byte buffer cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("dangling node reference: no line registered for node {0}")]
    DanglingReference(NodeId),

    #[error("duplicate node id {0}")]
    DuplicateId(NodeId),

    #[error("document top node must be the only root (found {found} at depth {depth})")]
    MisplacedRoot { found: &'static str, depth: usize },

    #[error("node {id} is nested deeper than {limit}")]
    NestingTooDeep { id: NodeId, limit: usize },

    #[error("title of node {0} contains a newline")]
    NewlineInTitle(NodeId),

    #[error("missing UHS magic on line 1")]
    BadMagic,

    #[error("line {line}: malformed hunk header {header:?}")]
    BadHeader { line: LineNumber, header: String },

    #[error("line {line}: unknown hunk type {word:?}")]
    UnknownHunk { line: LineNumber, word: String },

    #[error("line {line}: hunk spans {span} lines, which does not fit its container")]
    SpanOverflow { line: LineNumber, span: u32 },

    #[error("line {line}: malformed {field}: {value:?}")]
    MalformedField {
        line: LineNumber,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: {field} width {width} differs from the document's {expected}")]
    FieldWidth {
        line: LineNumber,
        field: &'static str,
        width: usize,
        expected: usize,
    },

    #[error("line {line}: text segment is not valid UTF-8")]
    InvalidUtf8 { line: LineNumber },

    #[error("text segment ends before line {line}")]
    TruncatedText { line: LineNumber },

    #[error("line {line}: binary section {offset}+{length} exceeds segment ending at {end}")]
    TruncatedBinary {
        line: LineNumber,
        offset: u64,
        length: u64,
        end: u64,
    },

    #[error("line {line}: reference to line {target}, which starts no hunk")]
    DanglingLine {
        line: LineNumber,
        target: LineNumber,
    },

    #[error("line {line}: hunks nested deeper than {limit}")]
    TooDeep { line: LineNumber, limit: usize },

    #[error("line {line}: binary offset {offset} points before the binary segment at {base}")]
    OffsetBeforeBinary {
        line: LineNumber,
        offset: u64,
        base: u64,
    },

    #[error("supplied cipher key is not the one derived from title {title:?}; readers could not decrypt it")]
    UnrecoverableKey { title: String },
}
