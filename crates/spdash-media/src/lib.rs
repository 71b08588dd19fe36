//! Spdash-Media: segment-size tables and the playback buffer model
//!
//! # Modules
//!
//! - `segment_table` - per-quality segment byte sizes, bitrate ladder, and
//!   fixed segment duration, parsed from a line-oriented text table
//! - `playback` - buffer level, rebuffer accounting, and the prefetch delay
//!   policy recomputed at every segment completion
//!
//! # Table format
//!
//! ```text
//! 4000000                 <- segment duration, microseconds
//! 400000 1000000          <- average bitrate per quality, ascending
//! 1000 1100               <- byte sizes of every segment at quality 0
//! 2000 2200               <- byte sizes of every segment at quality 1
//! ```
//!
//! Both the player and the server handler load their own copy of the same
//! table; neither mutates it after loading.

pub mod error;
pub mod playback;
pub mod segment_table;

pub use error::{Error, Result};
pub use playback::{BufferUpdate, PlaybackBuffer, DEFAULT_MIN_BUFFER};
pub use segment_table::SegmentTable;
