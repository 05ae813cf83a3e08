//! Error types for capture and replay.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::oplog::OpTime;

#[derive(Debug, Error)]
pub enum OplogError {
  /// The log source or destination could not be reached.
  #[error("connection to {address} failed: {message}")]
  Connection { address: String, message: String },

  /// The source refused the tailing query.
  #[error("tailing query on {namespace} rejected: {message}")]
  Query { namespace: String, message: String },

  /// The source answered with an in-band error or a malformed entry.
  #[error("protocol error: {0}")]
  Protocol(String),

  #[error("write to {} failed: {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cannot open {}: {source}", .path.display())]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("corrupt entry at offset {offset}: {reason}")]
  CorruptEntry { offset: u64, reason: String },

  /// The destination refused a single re-applied operation.
  #[error("destination rejected operation at {timestamp} on {namespace}: {reply}")]
  ApplicationRejected {
    timestamp: OpTime,
    namespace: String,
    reply: String,
  },

  #[error("invalid optime: {0}")]
  InvalidOpTime(String),

  #[error("serialization error: {0}")]
  Serialization(String),

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

impl OplogError {
  pub(crate) fn connection(address: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Connection {
      address: address.into(),
      message: message.into(),
    }
  }

  pub(crate) fn query(namespace: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Query {
      namespace: namespace.into(),
      message: message.into(),
    }
  }

  pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
    Self::CorruptEntry {
      offset,
      reason: reason.into(),
    }
  }
}

pub type Result<T> = std::result::Result<T, OplogError>;
