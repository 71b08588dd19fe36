//! Core type definitions shared by the player and the server handler.
//!
//! Enums serialize in lowercase so they read naturally in TOML configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// Created, segment table not loaded yet.
    Uninitialized,
    /// Manifest request in flight.
    MpdDownloading,
    /// Manifest received, first segment about to be requested.
    MpdDownloaded,
    /// A segment request is in flight.
    SegmentDownloading,
    /// Between segments, waiting for the prefetch delay.
    Idle,
    /// All segments played out.
    Finished,
    /// Ended by an error.
    Failed,
    /// Ended by an explicit stop.
    Stopped,
}

impl PlayerState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::MpdDownloading => write!(f, "mpd_downloading"),
            Self::MpdDownloaded => write!(f, "mpd_downloaded"),
            Self::SegmentDownloading => write!(f, "segment_downloading"),
            Self::Idle => write!(f, "idle"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Which side consults the decision service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbrMode {
    /// The player decides and requests an explicit length; the server
    /// serves what was asked.
    Client,
    /// The player forwards its state; the server decides.
    #[default]
    Server,
}

impl fmt::Display for AbrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

impl std::str::FromStr for AbrMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            _ => Err(format!("Invalid abr mode: {}", s)),
        }
    }
}

/// Parsed request path: either the manifest or one segment at one quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestTarget {
    /// `/mpd`
    Manifest,
    /// `/seg-<index>-<quality>`
    Segment { index: u32, quality: u32 },
}

impl RequestTarget {
    pub const MANIFEST_PATH: &'static str = "/mpd";

    /// Parse a request path. Unknown paths yield `None`.
    pub fn parse(path: &str) -> Option<Self> {
        if path == Self::MANIFEST_PATH {
            return Some(Self::Manifest);
        }
        let rest = path.strip_prefix("/seg-")?;
        let (index, quality) = rest.split_once('-')?;
        Some(Self::Segment {
            index: index.parse().ok()?,
            quality: quality.parse().ok()?,
        })
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest => write!(f, "{}", Self::MANIFEST_PATH),
            Self::Segment { index, quality } => write!(f, "/seg-{}-{}", index, quality),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PlayerState::Finished.is_terminal());
        assert!(PlayerState::Failed.is_terminal());
        assert!(PlayerState::Stopped.is_terminal());
        assert!(!PlayerState::Idle.is_terminal());
        assert!(!PlayerState::SegmentDownloading.is_terminal());
    }

    #[test]
    fn test_abr_mode_serialization() {
        let json = serde_json::to_string(&AbrMode::Client).unwrap();
        assert_eq!(json, r#""client""#);
        let mode: AbrMode = serde_json::from_str(r#""server""#).unwrap();
        assert_eq!(mode, AbrMode::Server);
    }

    #[test]
    fn test_abr_mode_from_str() {
        assert_eq!("client".parse::<AbrMode>().unwrap(), AbrMode::Client);
        assert!("both".parse::<AbrMode>().is_err());
    }

    #[test]
    fn test_request_target_parse() {
        assert_eq!(RequestTarget::parse("/mpd"), Some(RequestTarget::Manifest));
        assert_eq!(
            RequestTarget::parse("/seg-12-3"),
            Some(RequestTarget::Segment {
                index: 12,
                quality: 3
            })
        );
        assert_eq!(RequestTarget::parse("/seg-12"), None);
        assert_eq!(RequestTarget::parse("/seg-a-1"), None);
        assert_eq!(RequestTarget::parse("/index.html"), None);
    }

    #[test]
    fn test_request_target_display() {
        let target = RequestTarget::Segment {
            index: 4,
            quality: 0,
        };
        assert_eq!(target.to_string(), "/seg-4-0");
        assert_eq!(RequestTarget::parse(&target.to_string()), Some(target));
    }
}
