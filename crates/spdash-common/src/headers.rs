//! Header names of the segment protocol.
//!
//! Names are case-sensitive and must stay stable within one deployment: the
//! player writes them and the server handler reads them back verbatim.

/// Opaque decision-service cookie, round-tripped in both directions.
pub const COOKIE: &str = "X-Cookie";
/// Quality of the last (request) or current (response) segment.
pub const LAST_QUALITY: &str = "X-LastQuality";
/// Byte size of the last (request) or current (response) segment.
pub const LAST_CHUNK_SIZE: &str = "X-LastChunkSize";
/// Virtual-clock nanoseconds at which the last segment request was sent.
pub const LAST_CHUNK_START_TIME: &str = "X-LastChunkStartTime";
/// Virtual-clock nanoseconds at which the last segment finished downloading.
pub const LAST_CHUNK_FINISH_TIME: &str = "X-LastChunkFinishTime";
/// Buffered playback time, seconds.
pub const BUFFER_UPTO: &str = "X-BufferUpto";
/// Cumulative rebuffer time, seconds.
pub const REBUFFER: &str = "X-Rebuffer";
/// Explicit response length. Non-zero means the server must serve exactly
/// that many bytes; zero or absent asks the server to decide.
pub const REQUIRE_LENGTH: &str = "X-Require-Length";
/// Index of the requested segment.
pub const REQUIRE_SEGMENT_NUM: &str = "X-Require-Segment-Num";
/// Segment-size table the server should use for this request.
pub const PATH_TO_VIDEO: &str = "X-PathToVideo";
/// Table path announced on the manifest request.
pub const VIDEO_PATH: &str = "videoPath";
/// Body length.
pub const CONTENT_LENGTH: &str = "Content-Length";
