//! Per-segment records.
//!
//! One record per completed segment, consumed by external aggregation
//! tooling. Sinks are pass-through collaborators: a failing sink is logged
//! and never ends the session.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use spdash_common::SessionId;

/// Column header of per-client log files.
pub const LOG_HEADER: &str =
    "Time SegmentNumber ChunkSize StartTime FinishTime Buffer TotalRebuffer Quality \
     CurrentRebuffer";

/// Completed-segment record. Times are session-clock readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    pub time: Duration,
    pub segment: u32,
    pub chunk_size: u64,
    pub start: Duration,
    pub finish: Duration,
    pub buffer: Duration,
    pub total_rebuffer: Duration,
    pub quality: u32,
    pub current_rebuffer: Duration,
}

impl SegmentRecord {
    /// Space-separated line, times in seconds. `client` is inserted after
    /// the timestamp for shared logs.
    pub fn to_line(&self, client: Option<&SessionId>) -> String {
        let client = client.map(|c| format!(" {}", c)).unwrap_or_default();
        format!(
            "{:.6}{} {} {} {:.6} {:.6} {:.6} {:.6} {} {:.6}",
            self.time.as_secs_f64(),
            client,
            self.segment,
            self.chunk_size,
            self.start.as_secs_f64(),
            self.finish.as_secs_f64(),
            self.buffer.as_secs_f64(),
            self.total_rebuffer.as_secs_f64(),
            self.quality,
            self.current_rebuffer.as_secs_f64(),
        )
    }
}

/// Receiver of segment records.
pub trait SegmentLog: Send + Sync {
    fn record(&mut self, session: &SessionId, record: &SegmentRecord) -> io::Result<()>;

    /// Flush and release resources. Called once when the session ends.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes `log_client_<id>.csv` in a directory, and optionally appends to a
/// log shared by all clients.
pub struct FileSegmentLog {
    client: BufWriter<File>,
    all_clients: Option<PathBuf>,
}

impl FileSegmentLog {
    /// Create the per-client file (truncating it) and write the header.
    pub fn create(
        dir: &Path,
        session: &SessionId,
        all_clients: Option<PathBuf>,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("log_client_{}.csv", session));
        let mut client = BufWriter::new(File::create(&path)?);
        writeln!(client, "{}", LOG_HEADER)?;
        tracing::debug!(path = %path.display(), "Opened segment log");
        Ok(Self {
            client,
            all_clients,
        })
    }
}

impl SegmentLog for FileSegmentLog {
    fn record(&mut self, session: &SessionId, record: &SegmentRecord) -> io::Result<()> {
        writeln!(self.client, "{}", record.to_line(None))?;
        if let Some(path) = &self.all_clients {
            // Reopened per record so concurrent sessions interleave whole lines.
            let mut shared = OpenOptions::new().create(true).append(true).open(path)?;
            shared.write_all(format!("{}\n", record.to_line(Some(session))).as_bytes())?;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.client.flush()
    }
}

/// Collects records in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySegmentLog {
    records: Arc<Mutex<Vec<(SessionId, SegmentRecord)>>>,
}

impl MemorySegmentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(SessionId, SegmentRecord)> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl SegmentLog for MemorySegmentLog {
    fn record(&mut self, session: &SessionId, record: &SegmentRecord) -> io::Result<()> {
        self.records.lock().push((session.clone(), record.clone()));
        Ok(())
    }
}

/// Discards records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSegmentLog;

impl SegmentLog for NullSegmentLog {
    fn record(&mut self, _session: &SessionId, _record: &SegmentRecord) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SegmentRecord {
        SegmentRecord {
            time: Duration::from_millis(2500),
            segment: 1,
            chunk_size: 2200,
            start: Duration::from_secs(2),
            finish: Duration::from_millis(2500),
            buffer: Duration::from_secs(8),
            total_rebuffer: Duration::ZERO,
            quality: 1,
            current_rebuffer: Duration::ZERO,
        }
    }

    #[test]
    fn test_line_format() {
        assert_eq!(
            record().to_line(None),
            "2.500000 1 2200 2.000000 2.500000 8.000000 0.000000 1 0.000000"
        );
        let id = SessionId::from("c7");
        assert!(record().to_line(Some(&id)).starts_with("2.500000 c7 1 2200 "));
    }

    #[test]
    fn test_file_log_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("all.csv");
        let id = SessionId::from("c1");

        let mut log = FileSegmentLog::create(dir.path(), &id, Some(shared.clone())).unwrap();
        log.record(&id, &record()).unwrap();
        log.close().unwrap();

        let own = std::fs::read_to_string(dir.path().join("log_client_c1.csv")).unwrap();
        let mut lines = own.lines();
        assert_eq!(lines.next(), Some(LOG_HEADER));
        assert!(lines.next().unwrap().starts_with("2.500000 1 2200"));

        let all = std::fs::read_to_string(&shared).unwrap();
        assert!(all.starts_with("2.500000 c1 1 2200"));
    }

    #[test]
    fn test_memory_log_shares_records() {
        let log = MemorySegmentLog::new();
        let mut writer = log.clone();
        writer.record(&SessionId::from("a"), &record()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].1.segment, 1);
    }
}
