//! Streaming client.
//!
//! A [`Player`] runs one session: fetch the manifest, then for every segment
//! pick a quality, fetch the segment on a fresh connection, recompute the
//! playback buffer, and wait for the prefetch delay. After the last segment it
//! waits for the buffer to play out and finishes.
//!
//! ```text
//! Uninitialized -> MpdDownloading -> MpdDownloaded -> SegmentDownloading -> Idle
//!                                                          ^                |
//!                                                          +----------------+
//!                                                 Idle -> Finished
//! any state -> Failed | Stopped
//! ```
//!
//! Which side consults the decision service is set by [`AbrMode`]: in
//! `Client` mode the player decides and asks for an explicit length, in
//! `Server` mode it forwards its state and the server decides.

mod fetch;
mod log;
mod runner;
mod trace;

pub use log::{
    FileSegmentLog, MemorySegmentLog, NullSegmentLog, SegmentLog, SegmentRecord, LOG_HEADER,
};
pub use runner::run_sessions;
pub use trace::{write_traces, RequestTrace};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use spdash_common::headers::{
    COOKIE, LAST_CHUNK_SIZE, LAST_QUALITY, PATH_TO_VIDEO, REQUIRE_LENGTH, VIDEO_PATH,
};
use spdash_common::{AbrMode, Error, PlayerState, RequestTarget, Result, SessionId};
use spdash_http::{Connector, RequestHead, ResponseHead, TcpConnector, DEFAULT_SEND_WINDOW};
use spdash_media::{PlaybackBuffer, SegmentTable, DEFAULT_MIN_BUFFER};

use crate::abr::{DecisionService, HttpDecisionClient, SessionSnapshot};
use crate::clock::Clock;
use crate::server::DEFAULT_MANIFEST_LENGTH;
use fetch::{FetchOutcome, Fetched};

/// Construction-time settings of one session.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Streaming server, `host:port`.
    pub endpoint: String,
    /// Segment-size table of the video.
    pub video_table: PathBuf,
    /// Decision service, `host:port`.
    pub decision_endpoint: String,
    pub decision_timeout: Option<Duration>,
    /// Prefetch threshold.
    pub min_buffer: Duration,
    pub session_id: SessionId,
    pub abr_mode: AbrMode,
    pub manifest_length: u64,
    pub send_window: usize,
    /// Download traces go to `<trace_path>-<session_id>.json`.
    pub trace_path: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8080".to_string(),
            video_table: PathBuf::from("vid.txt"),
            decision_endpoint: "127.0.0.1:8333".to_string(),
            decision_timeout: None,
            min_buffer: DEFAULT_MIN_BUFFER,
            session_id: SessionId::generate(),
            abr_mode: AbrMode::default(),
            manifest_length: DEFAULT_MANIFEST_LENGTH,
            send_window: DEFAULT_SEND_WINDOW,
            trace_path: None,
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    /// `Finished`, `Failed`, or `Stopped`.
    pub state: PlayerState,
    pub segments_downloaded: u32,
    pub total_rebuffer: Duration,
    pub playback_time: Duration,
    /// Set when `state` is `Failed`.
    pub error: Option<Error>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionOutcome {
    pub fn is_finished(&self) -> bool {
        self.state == PlayerState::Finished
    }
}

pub type OnSessionStart = Box<dyn FnOnce(&SessionId) + Send + Sync>;
pub type OnSessionEnd = Box<dyn FnOnce(&SessionOutcome) + Send + Sync>;

/// Controls a running [`Player`] from another task.
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    state: Arc<Mutex<PlayerState>>,
}

impl PlayerHandle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(PlayerState::Uninitialized)),
        }
    }

    /// Stop the session. The in-flight transfer is closed and no further
    /// request is issued; pending callbacks become no-ops.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopping session");
        }
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PlayerState {
        *self.state.lock()
    }
}

/// Fields of the session that travel with every segment request.
#[derive(Debug, Default)]
struct SessionFields {
    current_segment: i64,
    last_quality: u32,
    last_chunk_size: u64,
    last_chunk_start: Duration,
    last_chunk_finish: Duration,
    cookie: String,
}

impl SessionFields {
    fn new() -> Self {
        Self {
            current_segment: -1,
            ..Default::default()
        }
    }

    fn snapshot(&self, next_segment: u32, buffer: &PlaybackBuffer) -> SessionSnapshot {
        SessionSnapshot {
            next_segment,
            last_quality: self.last_quality,
            last_chunk_size: self.last_chunk_size,
            last_chunk_start: self.last_chunk_start,
            last_chunk_finish: self.last_chunk_finish,
            buffer: buffer.buffer_upto(),
            total_rebuffer: buffer.total_rebuffer(),
            cookie: self.cookie.clone(),
        }
    }

    /// Take over the session headers of a response.
    fn absorb(&mut self, head: &ResponseHead, body_len: u64) {
        if let Some(cookie) = head.headers.get(COOKIE) {
            self.cookie = cookie.to_string();
        }
        if let Some(quality) = head.headers.get_parsed(LAST_QUALITY) {
            self.last_quality = quality;
        }
        self.last_chunk_size = head.headers.get_parsed(LAST_CHUNK_SIZE).unwrap_or(body_len);
    }
}

/// Counters that survive a failed run.
#[derive(Debug, Default)]
struct Progress {
    segments_downloaded: u32,
    buffer: PlaybackBuffer,
    traces: Vec<RequestTrace>,
}

/// One streaming session.
pub struct Player {
    config: PlayerConfig,
    connector: Arc<dyn Connector>,
    decision: Arc<dyn DecisionService>,
    log: Box<dyn SegmentLog>,
    clock: Clock,
    handle: PlayerHandle,
    on_start: Option<OnSessionStart>,
    on_end: Option<OnSessionEnd>,
}

impl Player {
    /// Player talking TCP to `config.endpoint` and `config.decision_endpoint`.
    pub fn new(config: PlayerConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(config.endpoint.clone()));
        let decision = Arc::new(
            HttpDecisionClient::new(config.decision_endpoint.clone())
                .with_timeout(config.decision_timeout),
        );
        Self {
            config,
            connector,
            decision,
            log: Box::new(NullSegmentLog),
            clock: Clock::new(),
            handle: PlayerHandle::new(),
            on_start: None,
            on_end: None,
        }
    }

    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    #[must_use]
    pub fn with_decision_service(mut self, decision: Arc<dyn DecisionService>) -> Self {
        self.decision = decision;
        self
    }

    #[must_use]
    pub fn with_segment_log(mut self, log: Box<dyn SegmentLog>) -> Self {
        self.log = log;
        self
    }

    /// Share a clock between sessions so their timestamps line up.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn on_session_start(
        mut self,
        callback: impl FnOnce(&SessionId) + Send + Sync + 'static,
    ) -> Self {
        self.on_start = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_session_end(
        mut self,
        callback: impl FnOnce(&SessionOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.on_end = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    /// See [`PlayerHandle::stop`].
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Run the session to a terminal state.
    pub async fn start(mut self) -> SessionOutcome {
        let session_id = self.config.session_id.clone();
        let span = tracing::info_span!("session", id = %session_id);
        async move {
            let started_at = Utc::now();
            if let Some(callback) = self.on_start.take() {
                callback(&session_id);
            }
            tracing::info!(mode = %self.config.abr_mode, "Session started");

            let mut progress = Progress::default();
            let (state, error) = match self.run(&mut progress).await {
                Ok(state) => (state, None),
                Err(e) => {
                    tracing::error!(error = %e, "Session failed");
                    (PlayerState::Failed, Some(e))
                }
            };
            self.set_state(state);
            self.handle.running.store(false, Ordering::SeqCst);
            self.finish_outputs(&progress);

            let outcome = SessionOutcome {
                session_id,
                state,
                segments_downloaded: progress.segments_downloaded,
                total_rebuffer: progress.buffer.total_rebuffer(),
                playback_time: progress.buffer.playback_time(),
                error,
                started_at,
                ended_at: Utc::now(),
            };
            tracing::info!(
                state = %outcome.state,
                segments = outcome.segments_downloaded,
                total_rebuffer_secs = outcome.total_rebuffer.as_secs_f64(),
                "Session ended"
            );
            if let Some(callback) = self.on_end.take() {
                callback(&outcome);
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&mut self, progress: &mut Progress) -> Result<PlayerState> {
        let table = SegmentTable::load(&self.config.video_table)?;
        let segment_count = u32::from(table.segment_count());
        tracing::debug!(
            segments = segment_count,
            qualities = table.quality_count(),
            "Segment table ready"
        );

        let mut fields = SessionFields::new();

        // Manifest
        self.set_state(PlayerState::MpdDownloading);
        let request = RequestHead::get(RequestTarget::Manifest.to_string())
            .header(VIDEO_PATH, self.config.video_table.display())
            .header(REQUIRE_LENGTH, self.config.manifest_length);
        fields.last_chunk_start = self.clock.now();
        let Some(manifest) = self.fetch(request, progress).await? else {
            return Ok(PlayerState::Stopped);
        };
        fields.last_chunk_finish = self.clock.now();
        fields.absorb(&manifest.head, manifest.body_len);
        self.set_state(PlayerState::MpdDownloaded);

        loop {
            if !self.handle.is_running() {
                return Ok(PlayerState::Stopped);
            }
            fields.current_segment += 1;
            let index = fields.current_segment as u32;
            if index >= segment_count {
                return Ok(PlayerState::Finished);
            }

            let mut snapshot = fields.snapshot(index, &progress.buffer);
            let (quality, required) = match self.config.abr_mode {
                AbrMode::Client => {
                    let request = snapshot.decision_request(table.bitrates());
                    let decision = tokio::select! {
                        _ = self.handle.cancel.cancelled() => return Ok(PlayerState::Stopped),
                        decision = self.decision.decide(&request) => decision?,
                    };
                    let quality = Error::check_quality(decision.quality, table.quality_count())?;
                    fields.cookie = decision.cookie_str().to_string();
                    snapshot.cookie = fields.cookie.clone();
                    (quality as u32, table.size_of(quality, index as usize))
                }
                // Advisory only; the server picks the quality.
                AbrMode::Server => (fields.last_quality, 0),
            };

            let target = RequestTarget::Segment { index, quality };
            let mut request = RequestHead::get(target.to_string())
                .header(PATH_TO_VIDEO, self.config.video_table.display());
            snapshot.write_headers(&mut request.headers);
            request.headers.insert(REQUIRE_LENGTH, required);

            self.set_state(PlayerState::SegmentDownloading);
            fields.last_chunk_start = self.clock.now();
            let Some(segment) = self.fetch(request, progress).await? else {
                return Ok(PlayerState::Stopped);
            };
            let now = self.clock.now();
            fields.last_chunk_finish = now;
            if required > 0 && segment.body_len != required {
                return Err(Error::connection(format!(
                    "segment {} arrived with {} bytes, expected {}",
                    index, segment.body_len, required
                )));
            }
            fields.absorb(&segment.head, segment.body_len);
            progress.segments_downloaded += 1;
            self.set_state(PlayerState::Idle);

            let update = progress
                .buffer
                .on_segment_complete(index, now, table.segment_duration());
            self.record_segment(index, &fields, progress, now);
            tracing::info!(
                segment = index,
                quality = fields.last_quality,
                size = fields.last_chunk_size,
                buffer_secs = update.buffer_upto.as_secs_f64(),
                stall_secs = update.stall.as_secs_f64(),
                "Segment downloaded"
            );

            if index + 1 < segment_count {
                let delay = progress.buffer.prefetch_delay(self.config.min_buffer);
                if !self.pause(delay).await {
                    return Ok(PlayerState::Stopped);
                }
            } else {
                // Play out what is buffered.
                if !self.pause(progress.buffer.buffer_upto()).await {
                    return Ok(PlayerState::Stopped);
                }
                return Ok(PlayerState::Finished);
            }
        }
    }

    /// Fetch on a fresh connection. `None` means the session was stopped.
    async fn fetch(
        &self,
        request: RequestHead,
        progress: &mut Progress,
    ) -> Result<Option<Fetched>> {
        tracing::debug!(path = %request.path, "Requesting");
        let outcome = fetch::fetch(
            self.connector.as_ref(),
            request,
            self.clock,
            self.config.send_window,
            Arc::clone(&self.handle.running),
            self.handle.cancel.clone(),
        )
        .await?;
        match outcome {
            FetchOutcome::Done(fetched) => {
                progress.traces.push(fetched.trace.clone());
                Ok(Some(fetched))
            }
            FetchOutcome::Stopped(trace) => {
                progress.traces.push(trace);
                Ok(None)
            }
        }
    }

    /// Wait for `delay`. Returns `false` if the session was stopped meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.handle.cancel.cancelled() => false,
            _ = self.clock.sleep(delay) => self.handle.is_running(),
        }
    }

    fn record_segment(
        &mut self,
        index: u32,
        fields: &SessionFields,
        progress: &Progress,
        now: Duration,
    ) {
        let record = SegmentRecord {
            time: now,
            segment: index,
            chunk_size: fields.last_chunk_size,
            start: fields.last_chunk_start,
            finish: fields.last_chunk_finish,
            buffer: progress.buffer.buffer_upto(),
            total_rebuffer: progress.buffer.total_rebuffer(),
            quality: fields.last_quality,
            current_rebuffer: progress.buffer.current_rebuffer(),
        };
        if let Err(e) = self.log.record(&self.config.session_id, &record) {
            tracing::warn!(error = %e, "Failed to write segment record");
        }
    }

    fn finish_outputs(&mut self, progress: &Progress) {
        if let Err(e) = self.log.close() {
            tracing::warn!(error = %e, "Failed to close segment log");
        }
        if let Some(prefix) = &self.config.trace_path {
            match write_traces(prefix, &self.config.session_id, &progress.traces) {
                Ok(path) => tracing::debug!(path = %path.display(), "Wrote download traces"),
                Err(e) => tracing::warn!(error = %e, "Failed to write download traces"),
            }
        }
    }

    fn set_state(&self, state: PlayerState) {
        let mut current = self.handle.state.lock();
        if *current != state {
            tracing::debug!(from = %*current, to = %state, "State change");
            *current = state;
        }
    }
}
