//! Segment-size table.
//!
//! Holds the fixed segment duration, the bitrate ladder, and the byte size of
//! every segment at every quality. Immutable once loaded.

use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Per-quality segment sizes of one video.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentTable {
    segment_duration_micros: u64,
    bitrates: Vec<f64>,
    sizes: Vec<Vec<u64>>,
    segment_count: u16,
}

impl SegmentTable {
    /// Load a table from a file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(std::io::BufReader::new(file))?;
        tracing::debug!(
            path = %path.display(),
            qualities = table.quality_count(),
            segments = table.segment_count,
            "Loaded segment table"
        );
        Ok(table)
    }

    /// Parse a table from any buffered reader.
    ///
    /// Line 1 is the segment duration in microseconds, line 2 the bitrate
    /// ladder, and every further non-blank line one quality's segment sizes.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines().enumerate();

        let (_, first) = lines.next().ok_or(Error::EmptyTable)?;
        let first = first?;
        let duration_token = first
            .split_whitespace()
            .next()
            .ok_or(Error::EmptyTable)?;
        let segment_duration_micros = parse_token::<u64>(duration_token, 1)?;

        let (_, second) = lines.next().ok_or(Error::MissingLine("bitrate ladder"))?;
        let second = second?;
        let bitrates = second
            .split_whitespace()
            .map(|t| parse_token::<f64>(t, 2))
            .collect::<Result<Vec<_>>>()?;
        if bitrates.is_empty() {
            return Err(Error::MissingLine("bitrate ladder"));
        }

        let mut sizes: Vec<Vec<u64>> = Vec::new();
        for (idx, line) in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|t| parse_token::<u64>(t, idx + 1))
                .collect::<Result<Vec<_>>>()?;
            if let Some(expected) = sizes.first().map(Vec::len) {
                if row.len() != expected {
                    return Err(Error::RowLengthMismatch {
                        quality: sizes.len(),
                        expected,
                        found: row.len(),
                    });
                }
            }
            sizes.push(row);
        }

        if sizes.is_empty() {
            return Err(Error::NoQualities);
        }
        if sizes.len() != bitrates.len() {
            return Err(Error::LadderMismatch {
                ladder: bitrates.len(),
                rows: sizes.len(),
            });
        }
        let columns = sizes[0].len();
        let segment_count = u16::try_from(columns).map_err(|_| Error::TooManySegments(columns))?;

        Ok(Self {
            segment_duration_micros,
            bitrates,
            sizes,
            segment_count,
        })
    }

    /// Parse a table held in memory.
    pub fn parse(source: &str) -> Result<Self> {
        Self::from_reader(source.as_bytes())
    }

    /// Segment duration in microseconds, as written in the table.
    pub fn segment_duration_micros(&self) -> u64 {
        self.segment_duration_micros
    }

    /// Segment duration.
    pub fn segment_duration(&self) -> Duration {
        Duration::from_micros(self.segment_duration_micros)
    }

    /// Average bitrate of every quality, index = quality level.
    pub fn bitrates(&self) -> &[f64] {
        &self.bitrates
    }

    /// Number of quality levels.
    pub fn quality_count(&self) -> usize {
        self.sizes.len()
    }

    /// Number of segments (identical for every quality).
    pub fn segment_count(&self) -> u16 {
        self.segment_count
    }

    /// Byte size of one segment at one quality.
    ///
    /// # Panics
    ///
    /// Panics when either index is outside the table. Callers derive both
    /// from the table's own bounds; use [`try_size_of`](Self::try_size_of)
    /// for indices that come from the network.
    pub fn size_of(&self, quality: usize, segment: usize) -> u64 {
        self.sizes[quality][segment]
    }

    /// Byte size of one segment at one quality, if both indices exist.
    pub fn try_size_of(&self, quality: usize, segment: usize) -> Option<u64> {
        self.sizes.get(quality)?.get(segment).copied()
    }

    /// Total playable duration of the video.
    pub fn total_duration(&self) -> Duration {
        self.segment_duration() * u32::from(self.segment_count)
    }
}

impl fmt::Display for SegmentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} segments of {:.3}s ({:.1}s total)",
            self.segment_count,
            self.segment_duration().as_secs_f64(),
            self.total_duration().as_secs_f64()
        )?;
        for (quality, (bitrate, row)) in self.bitrates.iter().zip(&self.sizes).enumerate() {
            let total: u64 = row.iter().sum();
            writeln!(
                f,
                "  [{}] {:>10.0} bps  {:>12} bytes",
                quality, bitrate, total
            )?;
        }
        Ok(())
    }
}

fn parse_token<T: std::str::FromStr>(token: &str, line: usize) -> Result<T> {
    token.parse().map_err(|_| Error::InvalidNumber {
        line,
        token: token.to_string(),
    })
}
