//! Pull-based reader over a tailing query on a remote oplog.
//!
//! A [`LogSource`] is an established connection to the log; opening it
//! yields a [`LogCursor`] that hands out raw documents in source order.
//! [`TailingReader`] wraps a cursor, turns documents into [`LogEntry`]
//! values and enforces the cursor contract: a protocol failure is terminal,
//! and nothing is retried, reordered or deduplicated.

use serde_json::Value;

use crate::error::{OplogError, Result};
use crate::oplog::entry::error_document_message;
use crate::oplog::{Document, LogEntry, OpTime};

/// Connection to a log source able to run tailing queries.
pub trait LogSource {
  type Cursor: LogCursor;

  /// Starts a tailing query returning entries with `ts >= start`.
  ///
  /// Fails with [`OplogError::Query`] when the namespace is unknown or the
  /// bound is rejected, and [`OplogError::Connection`] on transport failure.
  fn open(&mut self, namespace: &str, start: OpTime) -> Result<Self::Cursor>;
}

/// Raw document stream produced by a tailing query.
pub trait LogCursor {
  /// Blocks until a document is available (`true`), the source closes the
  /// stream cleanly (`false`) or the transport fails.
  fn has_more(&mut self) -> Result<bool>;

  /// Returns the next document. Only valid after `has_more` returned `true`.
  fn next_document(&mut self) -> Result<Document>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
  Open,
  Exhausted,
  Failed,
}

pub struct TailingReader<C> {
  cursor: C,
  namespace: String,
  start: OpTime,
  last_seen: Option<OpTime>,
  delivered: u64,
  state: CursorState,
}

impl<C: LogCursor> TailingReader<C> {
  pub fn open<S>(source: &mut S, namespace: &str, start: OpTime) -> Result<Self>
  where
    S: LogSource<Cursor = C>,
  {
    tracing::info!(namespace = %namespace, start = %start.pretty(), "opening tailing query");
    let cursor = source.open(namespace, start)?;
    Ok(Self::from_cursor(cursor, namespace, start))
  }

  /// Wraps an already opened cursor.
  pub fn from_cursor(cursor: C, namespace: impl Into<String>, start: OpTime) -> Self {
    Self {
      cursor,
      namespace: namespace.into(),
      start,
      last_seen: None,
      delivered: 0,
      state: CursorState::Open,
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn start(&self) -> OpTime {
    self.start
  }

  /// Timestamp of the last entry handed out; the resume point for a new
  /// capture after a failure.
  pub fn last_seen(&self) -> Option<OpTime> {
    self.last_seen
  }

  pub fn delivered(&self) -> u64 {
    self.delivered
  }

  pub fn has_more(&mut self) -> Result<bool> {
    match self.state {
      CursorState::Exhausted => return Ok(false),
      CursorState::Failed => return Err(self.failed_error()),
      CursorState::Open => {}
    }

    match self.cursor.has_more() {
      Ok(true) => Ok(true),
      Ok(false) => {
        tracing::debug!(
          namespace = %self.namespace,
          delivered = self.delivered,
          "tailing query reached end of stream"
        );
        self.state = CursorState::Exhausted;
        Ok(false)
      }
      Err(err) => {
        self.state = CursorState::Failed;
        Err(err)
      }
    }
  }

  /// Returns the next entry in source order.
  pub fn next_entry(&mut self) -> Result<LogEntry> {
    match self.state {
      CursorState::Open => {}
      CursorState::Exhausted => {
        return Err(OplogError::Protocol(format!(
          "tailing query on {} already reached end of stream",
          self.namespace
        )))
      }
      CursorState::Failed => return Err(self.failed_error()),
    }

    let result = self.read_entry();
    if result.is_err() {
      self.state = CursorState::Failed;
    }
    result
  }

  fn read_entry(&mut self) -> Result<LogEntry> {
    let document = self.cursor.next_document()?;

    if let Some(message) = error_document_message(&document) {
      return Err(OplogError::Protocol(format!(
        "source returned error for {}: {message} ({})",
        self.namespace,
        Value::Object(document)
      )));
    }

    let entry = LogEntry::from_document(document)?;
    if entry.timestamp < self.start {
      return Err(OplogError::Protocol(format!(
        "source returned entry {} before requested start {}",
        entry.timestamp, self.start
      )));
    }

    self.last_seen = Some(entry.timestamp);
    self.delivered += 1;
    tracing::trace!(
      timestamp = %entry.timestamp,
      op = %entry.kind,
      ns = %entry.namespace,
      "received entry"
    );
    Ok(entry)
  }

  fn failed_error(&self) -> OplogError {
    OplogError::Protocol(format!(
      "tailing query on {} failed earlier and cannot be resumed; restart from {}",
      self.namespace,
      self.last_seen.unwrap_or(self.start)
    ))
  }

  pub fn into_cursor(self) -> C {
    self.cursor
  }
}

impl<C: LogCursor> Iterator for TailingReader<C> {
  type Item = Result<LogEntry>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.state != CursorState::Open {
      return None;
    }
    match self.has_more() {
      Ok(true) => Some(self.next_entry()),
      Ok(false) => None,
      Err(err) => Some(Err(err)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::oplog::OpKind;
  use crate::transport::memory::MemoryLogSource;
  use serde_json::json;

  const NS: &str = "local.oplog.rs";

  fn entry(seconds: u32, ordinal: u32, kind: OpKind) -> LogEntry {
    let mut payload = Document::new();
    payload.insert("_id".to_string(), json!(seconds * 10 + ordinal));
    LogEntry::new(OpTime::new(seconds, ordinal), kind, "app.items", payload)
  }

  fn source_with(entries: &[LogEntry]) -> MemoryLogSource {
    let mut source = MemoryLogSource::new();
    for entry in entries {
      source.push_entry(NS, entry);
    }
    source
  }

  #[test]
  fn yields_entries_in_source_order() {
    let entries = vec![
      entry(1, 0, OpKind::Insert),
      entry(1, 1, OpKind::Update),
      entry(2, 0, OpKind::Noop),
      entry(3, 0, OpKind::Delete),
    ];
    let mut source = source_with(&entries);

    let reader = TailingReader::open(&mut source, NS, OpTime::MIN).expect("open");
    let read: Vec<LogEntry> = reader.collect::<Result<_>>().expect("read all");
    assert_eq!(read, entries);
  }

  #[test]
  fn start_bound_is_inclusive() {
    let entries = vec![
      entry(1, 0, OpKind::Insert),
      entry(2, 0, OpKind::Insert),
      entry(2, 1, OpKind::Insert),
      entry(3, 0, OpKind::Insert),
    ];
    let mut source = source_with(&entries);

    let mut reader = TailingReader::open(&mut source, NS, OpTime::new(2, 0)).expect("open");
    let mut seen = Vec::new();
    while reader.has_more().expect("has_more") {
      seen.push(reader.next_entry().expect("next").timestamp);
    }
    assert_eq!(seen, vec![OpTime::new(2, 0), OpTime::new(2, 1), OpTime::new(3, 0)]);
    assert_eq!(reader.last_seen(), Some(OpTime::new(3, 0)));
    assert_eq!(reader.delivered(), 3);
    assert!(!reader.has_more().expect("exhausted"));
  }

  #[test]
  fn error_document_is_terminal() {
    let mut source = source_with(&[entry(1, 0, OpKind::Insert)]);
    let mut err = Document::new();
    err.insert("$err".to_string(), json!("capped position lost"));
    source.push_document(NS, err);
    source.push_entry(NS, &entry(5, 0, OpKind::Insert));

    let mut reader = TailingReader::open(&mut source, NS, OpTime::MIN).expect("open");
    assert!(reader.has_more().expect("first"));
    reader.next_entry().expect("first entry");
    assert!(reader.has_more().expect("second"));
    let failure = reader.next_entry().expect_err("error document");
    assert!(matches!(failure, OplogError::Protocol(_)));
    assert!(failure.to_string().contains("capped position lost"));

    assert!(reader.has_more().is_err());
    assert!(reader.next_entry().is_err());
    assert_eq!(reader.last_seen(), Some(OpTime::new(1, 0)));
  }

  #[test]
  fn entry_before_start_is_protocol_error() {
    let mut reader = TailingReader::from_cursor(
      source_with(&[entry(1, 0, OpKind::Insert)])
        .open_unfiltered(NS)
        .expect("open"),
      NS,
      OpTime::new(4, 0),
    );
    assert!(reader.has_more().expect("has_more"));
    assert!(matches!(reader.next_entry(), Err(OplogError::Protocol(_))));
  }

  #[test]
  fn unknown_namespace_is_query_error() {
    let mut source = MemoryLogSource::new();
    let err = TailingReader::open(&mut source, "local.missing", OpTime::MIN)
      .err()
      .expect("unknown namespace");
    assert!(matches!(err, OplogError::Query { .. }));
  }

  #[test]
  fn transport_failure_surfaces_without_retry() {
    let mut source = source_with(&[entry(1, 0, OpKind::Insert), entry(2, 0, OpKind::Insert)]);
    source.disconnect_after(1);

    let mut reader = TailingReader::open(&mut source, NS, OpTime::MIN).expect("open");
    let items: Vec<Result<LogEntry>> = reader.by_ref().collect();
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(OplogError::Connection { .. })));
    assert!(reader.next().is_none());
  }

  #[test]
  fn same_start_yields_same_entries() {
    let entries: Vec<LogEntry> = (0..20).map(|i| entry(i / 3, i % 3, OpKind::Insert)).collect();
    let mut source = source_with(&entries);
    let start = OpTime::new(3, 1);

    let first: Vec<LogEntry> = TailingReader::open(&mut source, NS, start)
      .expect("open first")
      .collect::<Result<_>>()
      .expect("first pass");
    let second: Vec<LogEntry> = TailingReader::open(&mut source, NS, start)
      .expect("open second")
      .collect::<Result<_>>()
      .expect("second pass");
    assert_eq!(first, second);
    assert!(first.iter().all(|entry| entry.timestamp >= start));
    assert_eq!(first.len(), entries.iter().filter(|e| e.timestamp >= start).count());
  }
}
