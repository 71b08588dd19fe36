//! Download traces.
//!
//! One [`RequestTrace`] per request: when it was sent, when the first and last
//! body bytes arrived, and the cumulative byte count at every receive.
//! Serialized with times in seconds of the session clock.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use spdash_common::SessionId;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTrace {
    pub req_sent_at: f64,
    pub first_byte_at: f64,
    pub last_byte_at: f64,
    /// `(time, cumulative bytes)` per receive.
    pub trace: Vec<(f64, u64)>,
    #[serde(skip)]
    received: u64,
    #[serde(skip)]
    speed: f64,
}

impl RequestTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_sent(&mut self, now: Duration) {
        self.req_sent_at = now.as_secs_f64();
    }

    /// Record `len` body bytes arriving at `now`.
    pub fn response_received(&mut self, now: Duration, len: usize) {
        let now = now.as_secs_f64();
        if self.trace.is_empty() {
            self.first_byte_at = now;
        } else {
            let gap = now - self.last_byte_at;
            if gap > 0.0 {
                self.speed = (len as f64 * 8.0) / gap;
            }
        }
        self.last_byte_at = now;
        self.received += len as u64;
        self.trace.push((now, self.received));
    }

    /// Body bytes received.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Receive events recorded.
    pub fn receives(&self) -> usize {
        self.trace.len()
    }

    /// Instantaneous speed between the last two receives, bits per second.
    pub fn download_speed(&self) -> f64 {
        self.speed
    }
}

/// Write `traces` as a JSON array to `<prefix>-<session>.json`.
pub fn write_traces(
    prefix: &Path,
    session: &SessionId,
    traces: &[RequestTrace],
) -> io::Result<PathBuf> {
    let path = PathBuf::from(format!("{}-{}.json", prefix.display(), session));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(&path)?;
    serde_json::to_writer_pretty(io::BufWriter::new(file), traces)?;
    Ok(path)
}
