//! Common error types used throughout spdash.
//!
//! This module provides the session error taxonomy: malformed segment tables,
//! transport failures, decision-service failures, and out-of-range decisions.
//! Every variant ends the owning session; none of them crosses into another
//! session.

/// Common error type for spdash.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The segment-size table could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A transport connect/send/receive failed, or the peer answered with
    /// something other than a successful response.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The bitrate-decision service could not be reached or did not answer.
    #[error("Decision service unavailable: {0}")]
    DecisionUnavailable(String),

    /// The decision service picked a quality outside the bitrate ladder.
    #[error("Invalid decision: quality {quality} outside ladder of {ladder_len} levels")]
    InvalidDecision {
        /// Quality index returned by the decision service.
        quality: i64,
        /// Number of levels in the session's bitrate ladder.
        ladder_len: usize,
    },

    /// A request or response frame was malformed.
    #[error("Framing error: {0}")]
    Framing(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration was provided.
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new Parse error.
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new Connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new DecisionUnavailable error.
    pub fn decision_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::DecisionUnavailable(msg.into())
    }

    /// Create a new Framing error.
    pub fn framing<S: Into<String>>(msg: S) -> Self {
        Self::Framing(msg.into())
    }

    /// Create a new Config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Check a decided quality against the ladder length.
    pub fn check_quality(quality: i64, ladder_len: usize) -> Result<usize> {
        match usize::try_from(quality) {
            Ok(q) if q < ladder_len => Ok(q),
            _ => Err(Self::InvalidDecision {
                quality,
                ladder_len,
            }),
        }
    }

    /// Framing problems surface to the state machine as connection errors.
    #[must_use]
    pub fn into_connection(self) -> Self {
        match self {
            Self::Framing(msg) => Self::Connection(format!("framing: {msg}")),
            Self::Io(e) => Self::Connection(e.to_string()),
            other => other,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
