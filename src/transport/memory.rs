//! In-process log source and command endpoint.
//!
//! Both sides keep everything in memory and can inject the failures a real
//! transport would produce: a dropped connection after `n` documents or
//! commands, and per-command rejections.

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{OplogError, Result};
use crate::oplog::{Document, LogEntry, OpTime};
use crate::replay::{CommandEndpoint, CommandReply};
use crate::tail::{LogCursor, LogSource};

const MEMORY_ADDRESS: &str = "memory";

#[derive(Debug, Clone, Default)]
pub struct MemoryLogSource {
  namespaces: BTreeMap<String, Vec<Document>>,
  disconnect_after: Option<usize>,
}

impl MemoryLogSource {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a namespace with no entries yet.
  pub fn create_namespace(&mut self, namespace: &str) {
    self.namespaces.entry(namespace.to_string()).or_default();
  }

  pub fn push_entry(&mut self, namespace: &str, entry: &LogEntry) {
    self.push_document(namespace, entry.to_document());
  }

  /// Appends a raw document, e.g. an in-band `$err` reply.
  pub fn push_document(&mut self, namespace: &str, document: Document) {
    self
      .namespaces
      .entry(namespace.to_string())
      .or_default()
      .push(document);
  }

  /// Cursors opened afterwards fail with a connection error once they have
  /// delivered `documents` documents.
  pub fn disconnect_after(&mut self, documents: usize) {
    self.disconnect_after = Some(documents);
  }

  /// Opens a cursor over every document in `namespace`, ignoring timestamps.
  pub fn open_unfiltered(&mut self, namespace: &str) -> Result<MemoryCursor> {
    let documents = self
      .namespaces
      .get(namespace)
      .ok_or_else(|| OplogError::query(namespace, "unknown namespace"))?;
    Ok(MemoryCursor::new(documents.iter().cloned().collect(), self.disconnect_after))
  }
}

impl LogSource for MemoryLogSource {
  type Cursor = MemoryCursor;

  fn open(&mut self, namespace: &str, start: OpTime) -> Result<MemoryCursor> {
    let documents = self
      .namespaces
      .get(namespace)
      .ok_or_else(|| OplogError::query(namespace, "unknown namespace"))?;

    // Documents without a readable `ts` (error replies) always pass the bound.
    let matching = documents
      .iter()
      .filter(|document| document_timestamp(document).map_or(true, |ts| ts >= start))
      .cloned()
      .collect();
    Ok(MemoryCursor::new(matching, self.disconnect_after))
  }
}

fn document_timestamp(document: &Document) -> Option<OpTime> {
  document
    .get("ts")
    .and_then(|ts| serde_json::from_value::<OpTime>(ts.clone()).ok())
}

#[derive(Debug)]
pub struct MemoryCursor {
  documents: VecDeque<Document>,
  remaining_before_disconnect: Option<usize>,
}

impl MemoryCursor {
  fn new(documents: VecDeque<Document>, disconnect_after: Option<usize>) -> Self {
    Self {
      documents,
      remaining_before_disconnect: disconnect_after,
    }
  }
}

impl LogCursor for MemoryCursor {
  fn has_more(&mut self) -> Result<bool> {
    if self.remaining_before_disconnect == Some(0) {
      return Err(OplogError::connection(
        MEMORY_ADDRESS,
        "connection reset while waiting for next entry",
      ));
    }
    Ok(!self.documents.is_empty())
  }

  fn next_document(&mut self) -> Result<Document> {
    let document = self
      .documents
      .pop_front()
      .ok_or_else(|| OplogError::Protocol("no document available".to_string()))?;
    if let Some(remaining) = self.remaining_before_disconnect.as_mut() {
      *remaining = remaining.saturating_sub(1);
    }
    Ok(document)
  }
}

/// Records every command it receives.
#[derive(Debug, Clone, Default)]
pub struct MemoryCommandEndpoint {
  received: Vec<(String, Document)>,
  reject: BTreeSet<usize>,
  disconnect_after: Option<usize>,
}

impl MemoryCommandEndpoint {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rejects the command with the given zero-based submission index.
  pub fn reject_submission(mut self, index: usize) -> Self {
    self.reject.insert(index);
    self
  }

  /// Fails with a connection error once `commands` commands were received.
  pub fn disconnect_after(mut self, commands: usize) -> Self {
    self.disconnect_after = Some(commands);
    self
  }

  pub fn received(&self) -> &[(String, Document)] {
    &self.received
  }

  /// The single operation carried by each received `applyOps` command.
  pub fn applied_operations(&self) -> Vec<Document> {
    self
      .received
      .iter()
      .filter_map(|(_, command)| match command.get("applyOps") {
        Some(Value::Array(ops)) => ops.first().and_then(|op| op.as_object().cloned()),
        _ => None,
      })
      .collect()
  }
}

impl CommandEndpoint for MemoryCommandEndpoint {
  fn run_command(&mut self, database: &str, command: &Document) -> Result<CommandReply> {
    if self.disconnect_after == Some(self.received.len()) {
      return Err(OplogError::connection(MEMORY_ADDRESS, "destination went away"));
    }

    let index = self.received.len();
    self.received.push((database.to_string(), command.clone()));

    let mut body = Document::new();
    if self.reject.contains(&index) {
      body.insert("ok".to_string(), json!(0));
      body.insert(
        "errmsg".to_string(),
        json!(format!("operation {index} rejected")),
      );
      body.insert("code".to_string(), json!(11000));
    } else {
      body.insert("ok".to_string(), json!(1));
      body.insert("applied".to_string(), json!(1));
    }
    Ok(CommandReply::from_body(body))
  }
}
