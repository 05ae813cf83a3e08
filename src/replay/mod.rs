//! Replay: re-apply captured entries against a destination, in file order.
//!
//! Each entry except no-ops is wrapped in a single-operation `applyOps`
//! command sent to the `admin` database. A refused command is logged and
//! skipped by default ([`RejectionPolicy::Continue`]); a connection failure
//! always ends the run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::constants::ADMIN_DATABASE;
use crate::error::{OplogError, Result};
use crate::oplog::{Document, LogEntry};

/// Destination able to run administrative commands.
pub trait CommandEndpoint {
  /// Runs `command` against `database`. `Err` is reserved for transport
  /// failures; a command the destination refuses comes back as a reply with
  /// `ok == false`.
  fn run_command(&mut self, database: &str, command: &Document) -> Result<CommandReply>;
}

impl<E: CommandEndpoint + ?Sized> CommandEndpoint for &mut E {
  fn run_command(&mut self, database: &str, command: &Document) -> Result<CommandReply> {
    (**self).run_command(database, command)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
  pub ok: bool,
  pub body: Document,
}

impl CommandReply {
  /// `ok` follows the reply's `ok` field: `true` or any non-zero number.
  pub fn from_body(body: Document) -> Self {
    let ok = match body.get("ok") {
      Some(Value::Bool(ok)) => *ok,
      Some(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
      _ => false,
    };
    Self { ok, body }
  }
}

/// What to do when the destination refuses one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RejectionPolicy {
  /// Log the refusal and move on to the next entry.
  #[default]
  Continue,
  /// Stop the replay with [`OplogError::ApplicationRejected`].
  Abort,
}

impl fmt::Display for RejectionPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let value = match self {
      RejectionPolicy::Continue => "continue",
      RejectionPolicy::Abort => "abort",
    };
    write!(f, "{value}")
  }
}

impl FromStr for RejectionPolicy {
  type Err = String;

  fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
    match raw {
      "continue" => Ok(Self::Continue),
      "abort" => Ok(Self::Abort),
      _ => Err(format!("invalid rejection policy: {raw}")),
    }
  }
}

/// Replay options
#[derive(Debug, Clone)]
pub struct ReplayOptions {
  pub on_rejection: RejectionPolicy,
  /// Database the `applyOps` commands are addressed to
  pub database: String,
}

impl Default for ReplayOptions {
  fn default() -> Self {
    Self {
      on_rejection: RejectionPolicy::default(),
      database: ADMIN_DATABASE.to_string(),
    }
  }
}

impl ReplayOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on_rejection(mut self, policy: RejectionPolicy) -> Self {
    self.on_rejection = policy;
    self
  }

  pub fn database(mut self, database: impl Into<String>) -> Self {
    self.database = database.into();
    self
  }
}

/// Replay result information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub applied: u64,
  pub skipped_noops: u64,
  pub rejected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
  Applied,
  SkippedNoop,
  Rejected,
}

/// `{"applyOps": [<entry>]}`
pub fn build_apply_request(entry: &LogEntry) -> Document {
  let mut command = Document::new();
  command.insert(
    "applyOps".to_string(),
    Value::Array(vec![Value::Object(entry.to_document())]),
  );
  command
}

pub struct ReplayEngine<E> {
  endpoint: E,
  options: ReplayOptions,
}

impl<E: CommandEndpoint> ReplayEngine<E> {
  pub fn new(endpoint: E, options: ReplayOptions) -> Self {
    Self { endpoint, options }
  }

  pub fn endpoint(&self) -> &E {
    &self.endpoint
  }

  pub fn into_endpoint(self) -> E {
    self.endpoint
  }

  /// Applies every entry of `entries` in order. Stops at the first read
  /// error, connection failure, or (under [`RejectionPolicy::Abort`]) refused
  /// operation.
  pub fn run<I>(&mut self, entries: I) -> Result<ReplayReport>
  where
    I: IntoIterator<Item = Result<LogEntry>>,
  {
    let mut report = ReplayReport::default();

    for entry in entries {
      let entry = entry?;
      match self.apply(&entry)? {
        ApplyOutcome::Applied => report.applied += 1,
        ApplyOutcome::SkippedNoop => report.skipped_noops += 1,
        ApplyOutcome::Rejected => report.rejected += 1,
      }
    }

    tracing::info!(
      applied = report.applied,
      skipped_noops = report.skipped_noops,
      rejected = report.rejected,
      "replay finished"
    );
    Ok(report)
  }

  /// Applies a single entry.
  pub fn apply(&mut self, entry: &LogEntry) -> Result<ApplyOutcome> {
    if entry.is_noop() {
      return Ok(ApplyOutcome::SkippedNoop);
    }

    let command = build_apply_request(entry);
    let reply = self
      .endpoint
      .run_command(&self.options.database, &command)?;
    if reply.ok {
      tracing::trace!(
        timestamp = %entry.timestamp,
        op = %entry.kind,
        ns = %entry.namespace,
        "applied"
      );
      return Ok(ApplyOutcome::Applied);
    }

    let reply_text = Value::Object(reply.body).to_string();
    match self.options.on_rejection {
      RejectionPolicy::Continue => {
        tracing::warn!(
          timestamp = %entry.timestamp,
          op = %entry.kind,
          ns = %entry.namespace,
          reply = %reply_text,
          "apply rejected by destination, continuing"
        );
        Ok(ApplyOutcome::Rejected)
      }
      RejectionPolicy::Abort => Err(OplogError::ApplicationRejected {
        timestamp: entry.timestamp,
        namespace: entry.namespace.clone(),
        reply: reply_text,
      }),
    }
  }
}
