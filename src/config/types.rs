use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use spdash_common::{AbrMode, SessionId};
use spdash_media::DEFAULT_MIN_BUFFER;

use crate::player::PlayerConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub decision: DecisionConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Session name; generated when absent. Multi-session runs append `-<n>`.
    #[serde(default)]
    pub session_id: Option<SessionId>,

    /// Streaming server, `host:port`
    #[serde(default = "default_server_endpoint")]
    pub server: String,

    /// Segment-size table of the video
    #[serde(default = "default_video_table")]
    pub video_table: PathBuf,

    /// Prefetch threshold in seconds
    #[serde(default = "default_min_buffer_secs")]
    pub min_buffer_secs: f64,

    #[serde(default)]
    pub abr_mode: AbrMode,

    #[serde(default = "default_manifest_length")]
    pub manifest_length: u64,

    /// Directory for `log_client_<id>.csv` files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log shared by all sessions
    #[serde(default)]
    pub all_clients_log: Option<PathBuf>,

    /// Download traces go to `<trace_path>-<id>.json`
    #[serde(default)]
    pub trace_path: Option<PathBuf>,

    #[serde(default = "default_send_window")]
    pub send_window: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            server: default_server_endpoint(),
            video_table: default_video_table(),
            min_buffer_secs: default_min_buffer_secs(),
            abr_mode: AbrMode::default(),
            manifest_length: default_manifest_length(),
            log_dir: None,
            all_clients_log: None,
            trace_path: None,
            send_window: default_send_window(),
        }
    }
}

impl ClientConfig {
    /// Construction-time player settings.
    pub fn player_config(&self, decision: &DecisionConfig) -> PlayerConfig {
        PlayerConfig {
            endpoint: self.server.clone(),
            video_table: self.video_table.clone(),
            decision_endpoint: decision.endpoint.clone(),
            decision_timeout: decision.timeout(),
            min_buffer: Duration::from_secs_f64(self.min_buffer_secs),
            session_id: self.session_id.clone().unwrap_or_else(SessionId::generate),
            abr_mode: self.abr_mode,
            manifest_length: self.manifest_length,
            send_window: self.send_window,
            trace_path: self.trace_path.clone(),
        }
    }
}

fn default_server_endpoint() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_video_table() -> PathBuf {
    PathBuf::from("vid.txt")
}

fn default_min_buffer_secs() -> f64 {
    DEFAULT_MIN_BUFFER.as_secs_f64()
}

fn default_manifest_length() -> u64 {
    crate::server::DEFAULT_MANIFEST_LENGTH
}

fn default_send_window() -> usize {
    spdash_http::DEFAULT_SEND_WINDOW
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecisionConfig {
    /// Decision service, `host:port`. Also the bind address of `spdash abr`.
    #[serde(default = "default_decision_endpoint")]
    pub endpoint: String,

    /// Per-decision timeout. Expiry ends the session; there is no retry.
    #[serde(default)]
    pub timeout_secs: Option<f64>,

    /// Buffer level below which the reference service picks the lowest quality
    #[serde(default = "default_reservoir_secs")]
    pub reservoir_secs: f64,

    /// Buffer range over which it ramps up to the highest quality
    #[serde(default = "default_cushion_secs")]
    pub cushion_secs: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_decision_endpoint(),
            timeout_secs: None,
            reservoir_secs: default_reservoir_secs(),
            cushion_secs: default_cushion_secs(),
        }
    }
}

impl DecisionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }
}

fn default_decision_endpoint() -> String {
    "127.0.0.1:8333".to_string()
}

fn default_reservoir_secs() -> f64 {
    5.0
}

fn default_cushion_secs() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Table used when a request names none
    #[serde(default)]
    pub video_table: Option<PathBuf>,

    /// Upper bound on one body write
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,

    #[serde(default = "default_send_window")]
    pub send_window: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            video_table: None,
            chunk_limit: default_chunk_limit(),
            send_window: default_send_window(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_chunk_limit() -> usize {
    crate::server::DEFAULT_CHUNK_LIMIT
}
