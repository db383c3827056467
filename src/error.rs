use std::fmt;

use crate::reference::ObjRef;

/// Unified error type for the core PDF engine.
///
/// Mirrors the taxonomy the document layer relies on: every failure mode
/// the resolver, scanner, or writers can hit maps to exactly one of these
/// variants so callers can match on it instead of parsing message text.
#[derive(Debug, Clone)]
pub enum PdfError {
    /// No `startxref` could be located, or the xref chain itself is
    /// structurally broken (truncated records, unterminated dictionary).
    MalformedXref { message: String },

    /// Deflate or PNG-predictor decoding failed on an xref or object
    /// stream.
    CorruptStream { message: String },

    /// An xref or object stream declared a filter other than
    /// `FlateDecode`.
    UnsupportedFilter { filter: String },

    /// A reference has no entry in the effective xref index, or its
    /// entry points at bytes that don't resolve to an object.
    MissingObject { obj_ref: ObjRef },

    /// A patched dictionary failed the post-edit sanity check (missing
    /// balanced `<<`/`>>`).
    InvalidDictionary { message: String },

    /// An incremental render produced zero xref entries — a bug guard,
    /// never expected to fire in correct operation.
    EmptyXref,
}

impl fmt::Display for PdfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdfError::MalformedXref { message } => {
                write!(f, "malformed cross-reference structure: {}", message)
            }
            PdfError::CorruptStream { message } => {
                write!(f, "corrupt stream: {}", message)
            }
            PdfError::UnsupportedFilter { filter } => {
                write!(f, "unsupported filter: {}", filter)
            }
            PdfError::MissingObject { obj_ref } => {
                write!(f, "object {} has no xref entry", obj_ref)
            }
            PdfError::InvalidDictionary { message } => {
                write!(f, "invalid dictionary after edit: {}", message)
            }
            PdfError::EmptyXref => write!(f, "render produced an empty xref section"),
        }
    }
}

impl std::error::Error for PdfError {}

impl PdfError {
    pub fn malformed_xref<S: Into<String>>(message: S) -> Self {
        PdfError::MalformedXref {
            message: message.into(),
        }
    }

    pub fn corrupt_stream<S: Into<String>>(message: S) -> Self {
        PdfError::CorruptStream {
            message: message.into(),
        }
    }

    pub fn unsupported_filter<S: Into<String>>(filter: S) -> Self {
        PdfError::UnsupportedFilter {
            filter: filter.into(),
        }
    }

    pub fn missing_object(obj_ref: ObjRef) -> Self {
        PdfError::MissingObject { obj_ref }
    }

    pub fn invalid_dictionary<S: Into<String>>(message: S) -> Self {
        PdfError::InvalidDictionary {
            message: message.into(),
        }
    }
}

pub type PdfResult<T> = Result<T, PdfError>;
