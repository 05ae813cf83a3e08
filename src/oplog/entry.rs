//! Oplog entry model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::optime::OpTime;
use crate::error::{OplogError, Result};

/// Structured document carried by an entry. Keys are kept sorted, so the
/// serialized form of a given document is always the same.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
  #[serde(rename = "i")]
  Insert,
  #[serde(rename = "u")]
  Update,
  #[serde(rename = "d")]
  Delete,
  #[serde(rename = "c")]
  Command,
  #[serde(rename = "n")]
  Noop,
}

impl OpKind {
  /// Single-byte code used both on the wire (`op` field) and in dump records.
  pub const fn code(self) -> u8 {
    match self {
      OpKind::Insert => b'i',
      OpKind::Update => b'u',
      OpKind::Delete => b'd',
      OpKind::Command => b'c',
      OpKind::Noop => b'n',
    }
  }

  pub const fn from_code(code: u8) -> Option<Self> {
    match code {
      b'i' => Some(OpKind::Insert),
      b'u' => Some(OpKind::Update),
      b'd' => Some(OpKind::Delete),
      b'c' => Some(OpKind::Command),
      b'n' => Some(OpKind::Noop),
      _ => None,
    }
  }
}

impl fmt::Display for OpKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let value = match self {
      OpKind::Insert => "insert",
      OpKind::Update => "update",
      OpKind::Delete => "delete",
      OpKind::Command => "command",
      OpKind::Noop => "noop",
    };
    write!(f, "{value}")
  }
}

impl FromStr for OpKind {
  type Err = OplogError;

  fn from_str(raw: &str) -> Result<Self> {
    let kind = match raw.as_bytes() {
      [code] => OpKind::from_code(*code),
      _ => None,
    };
    kind.ok_or_else(|| OplogError::Protocol(format!("unknown op kind: {raw}")))
  }
}

/// One logged operation, as produced by the log source.
///
/// The document form matches the oplog: `ts`, `op`, `ns`, `o` and the
/// optional `o2` (the affected identifier for updates). Any other top-level
/// fields the source sends (`h`, `v`, `wall`, ...) are kept verbatim in
/// `extra` so that a captured entry replays exactly as it was logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
  #[serde(rename = "ts")]
  pub timestamp: OpTime,
  #[serde(rename = "op")]
  pub kind: OpKind,
  #[serde(rename = "ns")]
  pub namespace: String,
  #[serde(rename = "o")]
  pub payload: Document,
  #[serde(rename = "o2", default, skip_serializing_if = "Option::is_none")]
  pub target: Option<Document>,
  #[serde(flatten)]
  pub extra: Document,
}

impl LogEntry {
  pub fn new(
    timestamp: OpTime,
    kind: OpKind,
    namespace: impl Into<String>,
    payload: Document,
  ) -> Self {
    Self {
      timestamp,
      kind,
      namespace: namespace.into(),
      payload,
      target: None,
      extra: Document::new(),
    }
  }

  pub fn with_target(mut self, target: Document) -> Self {
    self.target = Some(target);
    self
  }

  pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
    self.extra.insert(key.into(), value);
    self
  }

  pub fn is_noop(&self) -> bool {
    self.kind == OpKind::Noop
  }

  pub fn to_document(&self) -> Document {
    let mut document = self.extra.clone();
    document.insert(
      "ts".to_string(),
      serde_json::json!({"t": self.timestamp.seconds, "i": self.timestamp.ordinal}),
    );
    document.insert(
      "op".to_string(),
      Value::String(char::from(self.kind.code()).to_string()),
    );
    document.insert("ns".to_string(), Value::String(self.namespace.clone()));
    document.insert("o".to_string(), Value::Object(self.payload.clone()));
    if let Some(target) = &self.target {
      document.insert("o2".to_string(), Value::Object(target.clone()));
    }
    document
  }

  pub fn from_document(document: Document) -> Result<Self> {
    serde_json::from_value(Value::Object(document))
      .map_err(|error| OplogError::Protocol(format!("malformed oplog entry: {error}")))
  }
}

/// Returns the in-band error message if the source sent an error document
/// instead of an entry.
pub fn error_document_message(document: &Document) -> Option<String> {
  document.get("$err").map(|value| match value {
    Value::String(message) => message.clone(),
    other => other.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn doc(value: Value) -> Document {
    match value {
      Value::Object(map) => map,
      _ => panic!("not an object"),
    }
  }

  #[test]
  fn document_form_matches_oplog_shape() {
    let entry = LogEntry::new(
      OpTime::new(100, 2),
      OpKind::Update,
      "app.users",
      doc(json!({"$set": {"name": "ada"}})),
    )
    .with_target(doc(json!({"_id": 7})));

    assert_eq!(
      Value::Object(entry.to_document()),
      json!({
        "ts": {"t": 100, "i": 2},
        "op": "u",
        "ns": "app.users",
        "o": {"$set": {"name": "ada"}},
        "o2": {"_id": 7},
      })
    );
  }

  #[test]
  fn from_document_keeps_unknown_fields() {
    let source = doc(json!({
      "ts": {"t": 5, "i": 1},
      "h": 12345,
      "v": 2,
      "op": "i",
      "ns": "app.items",
      "o": {"_id": 1, "qty": 3},
    }));

    let entry = LogEntry::from_document(source.clone()).expect("parse entry");
    assert_eq!(entry.kind, OpKind::Insert);
    assert_eq!(entry.timestamp, OpTime::new(5, 1));
    assert_eq!(entry.extra.get("h"), Some(&json!(12345)));
    assert_eq!(entry.to_document(), source);
  }

  #[test]
  fn serde_and_to_document_agree() {
    let payload = doc(json!({"msg": "periodic noop"}));
    let entry =
      LogEntry::new(OpTime::new(9, 0), OpKind::Noop, "", payload).with_extra("v", json!(2));
    let via_serde = serde_json::to_value(&entry).expect("serialize");
    assert_eq!(via_serde, Value::Object(entry.to_document()));
  }

  #[test]
  fn from_document_rejects_unknown_op() {
    let source = doc(json!({"ts": {"t": 1, "i": 0}, "op": "x", "ns": "a.b", "o": {}}));
    assert!(LogEntry::from_document(source).is_err());
  }

  #[test]
  fn error_document_detected() {
    let source = doc(json!({"$err": "cursor killed", "code": 13}));
    assert_eq!(error_document_message(&source).as_deref(), Some("cursor killed"));
    assert!(error_document_message(&doc(json!({"ok": 1}))).is_none());
  }

  #[test]
  fn op_kind_codes_roundtrip() {
    for kind in [
      OpKind::Insert,
      OpKind::Update,
      OpKind::Delete,
      OpKind::Command,
      OpKind::Noop,
    ] {
      assert_eq!(OpKind::from_code(kind.code()), Some(kind));
      let code = char::from(kind.code()).to_string();
      assert_eq!(code.parse::<OpKind>().expect("parse code"), kind);
    }
    assert_eq!(OpKind::from_code(b'z'), None);
  }
}
