//! Bitrate decisions.
//!
//! A decision service picks the quality of the next segment from the session
//! state. The exchange is a single JSON request/response; see
//! [`DecisionRequest`] for the wire field names.
//!
//! - [`HttpDecisionClient`] talks to an external service, one connection per
//!   call.
//! - [`BufferBasedAbr`] is an in-process buffer-based rule, also served over
//!   TCP by [`DecisionServer`].

mod client;
mod service;

pub use client::HttpDecisionClient;
pub use service::{BufferBasedAbr, DecisionServer};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use spdash_common::headers::{
    BUFFER_UPTO, COOKIE, LAST_CHUNK_FINISH_TIME, LAST_CHUNK_SIZE, LAST_CHUNK_START_TIME,
    LAST_QUALITY, REBUFFER, REQUIRE_SEGMENT_NUM,
};
use spdash_common::Result;
use spdash_http::Headers;

/// Chooses the next segment's quality.
///
/// One call is in flight per session at a time; the session makes no
/// transport progress until it returns. Failures are not retried.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse>;
}

/// Session state sent to the decision service.
///
/// Timestamps are nanoseconds of the session clock, buffer and rebuffer are
/// seconds. The mixed units are part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub bitrate_array: Vec<f64>,
    /// `null` when the session has no cookie yet.
    pub cookie: Option<String>,
    pub next_chunk_id: u32,
    #[serde(rename = "lastquality")]
    pub last_quality: u32,
    /// Buffered playback time, seconds.
    pub buffer: f64,
    /// Index of the previous segment, `-1` before the first one.
    pub last_request: i64,
    /// Cumulative rebuffer time, seconds.
    pub rebuffer_time: f64,
    pub last_chunk_finish_time: u64,
    pub last_chunk_start_time: u64,
    pub last_chunk_size: u64,
}

/// The service's answer. The quality is unchecked; callers validate it
/// against the ladder before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub quality: i64,
    #[serde(default)]
    pub cookie: Option<String>,
}

impl DecisionResponse {
    pub fn new(quality: i64, cookie: impl Into<String>) -> Self {
        Self {
            quality,
            cookie: Some(cookie.into()),
        }
    }

    /// The returned cookie, empty when the service sent none.
    pub fn cookie_str(&self) -> &str {
        self.cookie.as_deref().unwrap_or("")
    }
}

/// Per-segment session fields, as forwarded by the player to whichever side
/// consults the decision service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub next_segment: u32,
    pub last_quality: u32,
    pub last_chunk_size: u64,
    pub last_chunk_start: Duration,
    pub last_chunk_finish: Duration,
    pub buffer: Duration,
    pub total_rebuffer: Duration,
    pub cookie: String,
}

impl SessionSnapshot {
    /// Build the decision request for this snapshot.
    pub fn decision_request(&self, bitrates: &[f64]) -> DecisionRequest {
        DecisionRequest {
            bitrate_array: bitrates.to_vec(),
            cookie: (!self.cookie.is_empty()).then(|| self.cookie.clone()),
            next_chunk_id: self.next_segment,
            last_quality: self.last_quality,
            buffer: self.buffer.as_secs_f64(),
            last_request: i64::from(self.next_segment) - 1,
            rebuffer_time: self.total_rebuffer.as_secs_f64(),
            last_chunk_finish_time: crate::clock::as_nanos(self.last_chunk_finish),
            last_chunk_start_time: crate::clock::as_nanos(self.last_chunk_start),
            last_chunk_size: self.last_chunk_size,
        }
    }

    /// Write the snapshot into request headers.
    pub fn write_headers(&self, headers: &mut Headers) {
        headers.insert(REQUIRE_SEGMENT_NUM, self.next_segment);
        headers.insert(LAST_QUALITY, self.last_quality);
        headers.insert(LAST_CHUNK_SIZE, self.last_chunk_size);
        headers.insert(
            LAST_CHUNK_START_TIME,
            crate::clock::as_nanos(self.last_chunk_start),
        );
        headers.insert(
            LAST_CHUNK_FINISH_TIME,
            crate::clock::as_nanos(self.last_chunk_finish),
        );
        headers.insert(BUFFER_UPTO, format!("{:.6}", self.buffer.as_secs_f64()));
        headers.insert(REBUFFER, format!("{:.6}", self.total_rebuffer.as_secs_f64()));
        headers.insert(COOKIE, &self.cookie);
    }

    /// Read a snapshot back from request headers. Missing or unparsable
    /// fields fall back to their initial values; the segment index defaults
    /// to the one named by the request path.
    pub fn from_headers(headers: &Headers, segment: u32) -> Self {
        let secs = |name| {
            headers
                .get_parsed::<f64>(name)
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or_default()
        };
        let nanos = |name| Duration::from_nanos(headers.get_parsed::<u64>(name).unwrap_or(0));
        Self {
            next_segment: headers.get_parsed(REQUIRE_SEGMENT_NUM).unwrap_or(segment),
            last_quality: headers.get_parsed(LAST_QUALITY).unwrap_or(0),
            last_chunk_size: headers.get_parsed(LAST_CHUNK_SIZE).unwrap_or(0),
            last_chunk_start: nanos(LAST_CHUNK_START_TIME),
            last_chunk_finish: nanos(LAST_CHUNK_FINISH_TIME),
            buffer: secs(BUFFER_UPTO),
            total_rebuffer: secs(REBUFFER),
            cookie: headers.get(COOKIE).unwrap_or("").to_string(),
        }
    }
}
