//! Capture: drain a tailing query into a dump file, one entry at a time.

use std::path::Path;

use crate::constants::DEFAULT_PROGRESS_INTERVAL;
use crate::dump::DumpWriter;
use crate::error::Result;
use crate::oplog::OpTime;
use crate::tail::{LogCursor, TailingReader};

/// Capture options
#[derive(Debug, Clone)]
pub struct CaptureOptions {
  /// Entries between two progress reports (0 disables them)
  pub progress_interval: u64,
  /// Stop before the first entry newer than this timestamp.
  ///
  /// The bound is only noticed when such an entry arrives. Against a live
  /// source whose newest entry is at or before `end`, capture keeps waiting
  /// for the next entry (or end of stream).
  pub end: Option<OpTime>,
}

impl Default for CaptureOptions {
  fn default() -> Self {
    Self {
      progress_interval: DEFAULT_PROGRESS_INTERVAL,
      end: None,
    }
  }
}

impl CaptureOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn progress_interval(mut self, interval: u64) -> Self {
    self.progress_interval = interval;
    self
  }

  pub fn end(mut self, end: Option<OpTime>) -> Self {
    self.end = end;
    self
  }
}

/// Capture result information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
  pub entries: u64,
  pub bytes: u64,
  pub last_timestamp: Option<OpTime>,
  /// True when capture stopped at the `end` bound rather than end of stream.
  pub reached_end_bound: bool,
}

pub struct CaptureWriter {
  writer: DumpWriter,
  options: CaptureOptions,
}

impl CaptureWriter {
  /// Opens `path` for writing, truncating any previous content.
  pub fn create(path: impl AsRef<Path>, options: CaptureOptions) -> Result<Self> {
    Ok(Self::new(DumpWriter::create(path)?, options))
  }

  pub fn new(writer: DumpWriter, options: CaptureOptions) -> Self {
    Self { writer, options }
  }

  /// Drains `reader` until clean end of stream (or the `end` bound).
  ///
  /// Errors abort immediately; entries already written stay on disk.
  pub fn run<C: LogCursor>(mut self, reader: &mut TailingReader<C>) -> Result<CaptureReport> {
    let mut report = CaptureReport::default();
    tracing::info!(
      path = %self.writer.path().display(),
      namespace = %reader.namespace(),
      start = %reader.start().pretty(),
      "capturing oplog"
    );

    while reader.has_more()? {
      let entry = reader.next_entry()?;

      if let Some(end) = self.options.end {
        if entry.timestamp > end {
          tracing::info!(end = %end.pretty(), "reached end bound");
          report.reached_end_bound = true;
          break;
        }
      }

      report.bytes += self.writer.append(&entry)?;
      report.entries += 1;
      report.last_timestamp = Some(entry.timestamp);

      let interval = self.options.progress_interval;
      if interval > 0 && report.entries % interval == 0 {
        tracing::info!(
          entries = report.entries,
          bytes = report.bytes,
          last = %entry.timestamp,
          "capture progress"
        );
      }
    }

    self.writer.finish()?;
    tracing::info!(
      entries = report.entries,
      bytes = report.bytes,
      last = ?report.last_timestamp.map(|ts| ts.to_string()),
      "capture finished"
    );
    Ok(report)
  }
}

/// Tails `reader` into a fresh dump file at `path`.
pub fn capture_to_file<C: LogCursor>(
  reader: &mut TailingReader<C>,
  path: impl AsRef<Path>,
  options: CaptureOptions,
) -> Result<CaptureReport> {
  CaptureWriter::create(path, options)?.run(reader)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dump::read_dump_file;
  use crate::oplog::{Document, LogEntry, OpKind};
  use crate::transport::memory::MemoryLogSource;

  const NS: &str = "local.oplog.rs";

  fn entries(count: u32) -> Vec<LogEntry> {
    (0..count)
      .map(|i| {
        let mut payload = Document::new();
        payload.insert("_id".to_string(), serde_json::json!(i));
        LogEntry::new(OpTime::new(100 + i, 0), OpKind::Insert, "app.items", payload)
      })
      .collect()
  }

  #[test]
  fn end_bound_stops_before_newer_entry() {
    let all = entries(6);
    let mut source = MemoryLogSource::new();
    for entry in &all {
      source.push_entry(NS, entry);
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bounded.oplog");

    let mut reader = TailingReader::open(&mut source, NS, OpTime::MIN).expect("open");
    let report = capture_to_file(
      &mut reader,
      &path,
      CaptureOptions::new().end(Some(OpTime::new(102, 0))),
    )
    .expect("capture");

    assert!(report.reached_end_bound);
    assert_eq!(report.entries, 3);
    assert_eq!(report.last_timestamp, Some(OpTime::new(102, 0)));
    assert_eq!(read_dump_file(&path).expect("read back"), all[..3].to_vec());
  }

  #[test]
  fn report_counts_bytes_written() {
    let all = entries(4);
    let mut source = MemoryLogSource::new();
    for entry in &all {
      source.push_entry(NS, entry);
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("count.oplog");

    let mut reader = TailingReader::open(&mut source, NS, OpTime::MIN).expect("open");
    let report = capture_to_file(&mut reader, &path, CaptureOptions::new().progress_interval(2))
      .expect("capture");

    assert_eq!(report.entries, 4);
    assert!(!report.reached_end_bound);
    assert_eq!(report.bytes, std::fs::metadata(&path).expect("metadata").len());
  }
}
