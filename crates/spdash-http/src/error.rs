//! Framing errors.

use thiserror::Error;

/// A frame could not be parsed or violated its declared length.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// No header terminator within the size limit.
    #[error("header section exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The request or status line is malformed.
    #[error("malformed start line: {0:?}")]
    MalformedStartLine(String),

    /// A header line has no `:` separator or is not UTF-8.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// `Content-Length` is not a non-negative integer.
    #[error("invalid content length: {0:?}")]
    InvalidContentLength(String),

    /// More bytes arrived than the declared body length.
    #[error("body overrun: {extra} bytes beyond content length")]
    BodyOverrun { extra: usize },

    /// The stream ended before the header terminator.
    #[error("stream ended inside the header section")]
    IncompleteHead,

    /// The stream ended before the body was complete.
    #[error("truncated frame: {missing} body bytes missing")]
    Truncated { missing: u64 },
}

impl From<FramingError> for spdash_common::Error {
    fn from(err: FramingError) -> Self {
        spdash_common::Error::framing(err.to_string())
    }
}
