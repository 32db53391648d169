//! Error types for parsing, building and sizing.

use thiserror::Error;

/// What went wrong, independent of where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// A read came up short, or the stream refused a write.
    #[error("stream underflow: {0}")]
    StreamUnderflow(String),
    /// A bit-granular stream was closed at a position that is not a whole number of bytes.
    #[error("stream unaligned: {0}")]
    StreamUnaligned(String),
    /// A fixed-width number received a value it cannot represent.
    #[error("field size: {0}")]
    FieldSize(String),
    /// A constant did not match the bytes found in the stream.
    #[error("const mismatch: {0}")]
    ConstMismatch(String),
    /// An array or range saw the wrong number of elements.
    #[error("range count: {0}")]
    RangeCount(String),
    /// A switch key matched no case and there was no default.
    #[error("switch has no match: {0}")]
    SwitchNoMatch(String),
    /// Every alternative of a select failed.
    #[error("select has no match: {0}")]
    SelectNoMatch(String),
    /// Text could not be decoded or encoded.
    #[error("string encoding: {0}")]
    StringEncoding(String),
    /// A check, validator or checksum rejected the value.
    #[error("validation failed: {0}")]
    Validation(String),
    /// An enum or mapping lookup found no entry.
    #[error("unknown mapping: {0}")]
    MappingUnknown(String),
    /// End of stream was reached before a terminator.
    #[error("terminator not found: {0}")]
    TerminatorNotFound(String),
    /// Raised on purpose by the `Fail` construct.
    #[error("explicit error: {0}")]
    ExplicitError(String),
    /// The size depends on data that is not available.
    #[error("size is not statically known: {0}")]
    SizeofUnknown(String),
    /// A variable-length integer does not fit the declared bound.
    #[error("integer overflow: {0}")]
    IntegerOverflow(String),
    /// The value handed to build lacks a required field.
    #[error("missing field `{0}`")]
    MissingField(String),
    /// The value handed to a construct has the wrong shape.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Padding bytes did not match their pattern, or the padding would be negative.
    #[error("padding: {0}")]
    Padding(String),
    /// A length-prefixed child did not consume its whole payload.
    #[error("unconsumed bytes: {0}")]
    UnconsumedBytes(String),
    /// An expression could not be evaluated against the context.
    #[error("expression: {0}")]
    Expression(String),
    /// The underlying stream failed for a reason other than running short.
    #[error("io: {0}")]
    Io(String),
}

impl ErrorKind {
    /// Attaches a path, producing a full [`Error`].
    pub fn at(self, path: &str) -> Error {
        Error::new(self, path)
    }
}

/// A parse, build or sizeof failure, with the path and stream offset at which it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at {path}{}", offset_suffix(.offset))]
pub struct Error {
    pub kind: ErrorKind,
    /// Dotted path of the failing component, e.g. `this.header.length`.
    pub path: String,
    /// Stream offset at entry to the innermost failing component.
    pub offset: Option<u64>,
}

fn offset_suffix(offset: &Option<u64>) -> String {
    match offset {
        Some(offset) => format!(" (offset {offset})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            offset: None,
        }
    }

    /// Records `offset` unless an inner component already did.
    pub fn with_offset(mut self, offset: u64) -> Self {
        if self.offset.is_none() {
            self.offset = Some(offset);
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Explicit errors are never swallowed by speculative combinators.
    pub fn is_explicit(&self) -> bool {
        matches!(self.kind, ErrorKind::ExplicitError(_))
    }

    /// Errors that may clear up once later fields are built, making a back-patch worthwhile.
    pub(crate) fn is_unresolved(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Expression(_) | ErrorKind::MissingField(_)
        )
    }

    pub(crate) fn from_io(err: std::io::Error, path: &str) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::WriteZero => {
                ErrorKind::StreamUnderflow(err.to_string())
            }
            _ => ErrorKind::Io(err.to_string()),
        };
        Error::new(kind, path)
    }
}
