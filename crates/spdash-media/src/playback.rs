//! Playback buffer model.
//!
//! Tracks how much playable time is buffered, how much has been played, and
//! how long playback stalled. All times are measured on the session's virtual
//! clock and recomputed only when a segment finishes downloading.

use std::time::Duration;

/// Prefetch threshold: the next segment is requested once the buffered lead
/// drops to this much.
pub const DEFAULT_MIN_BUFFER: Duration = Duration::from_secs(30);

/// Result of one recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUpdate {
    /// Time since the previous recompute (zero for the first segment).
    pub elapsed: Duration,
    /// Buffered time drained since the previous recompute.
    pub consumed: Duration,
    /// Part of `elapsed` the buffer could not cover.
    pub stall: Duration,
    /// Buffered time after appending the new segment.
    pub buffer_upto: Duration,
}

/// Buffer and rebuffer state of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackBuffer {
    buffer_upto: Duration,
    playback_time: Duration,
    total_rebuffer: Duration,
    current_rebuffer: Duration,
    last_incident: Option<Duration>,
}

impl PlaybackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a completed segment.
    ///
    /// For `segment_index > 0` the buffer drains by the time elapsed since the
    /// previous completion; whatever it could not cover is a stall. The first
    /// segment simply fills the buffer with one segment duration.
    pub fn on_segment_complete(
        &mut self,
        segment_index: u32,
        now: Duration,
        segment_duration: Duration,
    ) -> BufferUpdate {
        let mut update = BufferUpdate {
            elapsed: Duration::ZERO,
            consumed: Duration::ZERO,
            stall: Duration::ZERO,
            buffer_upto: Duration::ZERO,
        };

        let mut remaining = Duration::ZERO;
        if segment_index > 0 {
            let since = self.last_incident.unwrap_or(now);
            let elapsed = now.saturating_sub(since);
            remaining = self.buffer_upto.saturating_sub(elapsed);
            let consumed = self.buffer_upto - remaining;
            let stall = elapsed - consumed;

            self.current_rebuffer = stall;
            self.total_rebuffer += stall;
            self.playback_time += consumed;

            update.elapsed = elapsed;
            update.consumed = consumed;
            update.stall = stall;
        }
        self.last_incident = Some(now);
        self.buffer_upto = remaining + segment_duration;
        update.buffer_upto = self.buffer_upto;

        tracing::trace!(
            segment = segment_index,
            elapsed_ms = update.elapsed.as_millis() as u64,
            stall_ms = update.stall.as_millis() as u64,
            buffer_secs = self.buffer_upto.as_secs_f64(),
            "Buffer recomputed"
        );
        update
    }

    /// How long to wait before requesting the next segment:
    /// `max(0, buffer_upto - min_buffer)`.
    pub fn prefetch_delay(&self, min_buffer: Duration) -> Duration {
        self.buffer_upto.saturating_sub(min_buffer)
    }

    /// Buffered playback time remaining at the last recompute.
    pub fn buffer_upto(&self) -> Duration {
        self.buffer_upto
    }

    /// Playback position reached at the last recompute.
    pub fn playback_time(&self) -> Duration {
        self.playback_time
    }

    /// Cumulative stall time.
    pub fn total_rebuffer(&self) -> Duration {
        self.total_rebuffer
    }

    /// Stall measured at the last recompute.
    pub fn current_rebuffer(&self) -> Duration {
        self.current_rebuffer
    }
}
