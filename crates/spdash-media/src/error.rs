//! Error types for spdash-media.

use std::io;
use thiserror::Error;

/// Result type for spdash-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for segment-table loading.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source contained no data.
    #[error("Empty segment table")]
    EmptyTable,

    /// A required header line is missing or blank.
    #[error("Missing {0} line")]
    MissingLine(&'static str),

    /// A token could not be parsed as a number.
    #[error("Invalid number {token:?} on line {line}")]
    InvalidNumber { line: usize, token: String },

    /// A quality row has a different column count than the rows before it.
    #[error("Row for quality {quality} has {found} segments, expected {expected}")]
    RowLengthMismatch {
        quality: usize,
        expected: usize,
        found: usize,
    },

    /// No quality rows follow the header lines.
    #[error("No segment sizes in table")]
    NoQualities,

    /// The bitrate ladder and the size rows disagree on the number of qualities.
    #[error("Bitrate ladder has {ladder} levels but table has {rows} quality rows")]
    LadderMismatch { ladder: usize, rows: usize },

    /// More segments than the segment counter can address.
    #[error("Too many segments: {0}")]
    TooManySegments(usize),
}

impl From<Error> for spdash_common::Error {
    fn from(err: Error) -> Self {
        spdash_common::Error::parse(err.to_string())
    }
}
