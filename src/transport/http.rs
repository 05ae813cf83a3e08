//! Blocking HTTP adapters for the log source and the command endpoint.
//!
//! The log source is expected to answer `GET /` with `{"ok": 1}` and to
//! stream a tailing query from `GET /oplog/tail?ns=<ns>&gte=<seconds>:<ordinal>`
//! as newline-delimited JSON documents, closing the response at end of
//! stream. Commands go to `POST /<database>/command` and are answered with a
//! JSON reply carrying `ok`.

use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use crate::constants::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::error::{OplogError, Result};
use crate::oplog::{Document, OpTime};
use crate::replay::{CommandEndpoint, CommandReply};
use crate::tail::{LogCursor, LogSource};

/// Transport timeouts. `read_timeout: None` lets a tailing query wait for new
/// entries indefinitely.
#[derive(Debug, Clone)]
pub struct HttpOptions {
  pub connect_timeout: Option<Duration>,
  pub read_timeout: Option<Duration>,
}

impl Default for HttpOptions {
  fn default() -> Self {
    Self {
      connect_timeout: Some(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)),
      read_timeout: None,
    }
  }
}

impl HttpOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.connect_timeout = timeout;
    self
  }

  pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.read_timeout = timeout;
    self
  }

  fn agent(&self) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(timeout) = self.connect_timeout {
      builder = builder.timeout_connect(timeout);
    }
    if let Some(timeout) = self.read_timeout {
      builder = builder.timeout_read(timeout);
    }
    builder.build()
  }
}

/// `localhost:8080` -> `http://localhost:8080`; trailing slashes dropped.
pub fn normalize_address(address: &str) -> String {
  let address = address.trim().trim_end_matches('/');
  if address.starts_with("http://") || address.starts_with("https://") {
    address.to_string()
  } else {
    format!("http://{address}")
  }
}

fn handshake(agent: &ureq::Agent, base_url: &str) -> Result<()> {
  let response = agent
    .get(&format!("{base_url}/"))
    .call()
    .map_err(|error| OplogError::connection(base_url, error.to_string()))?;
  let body = response
    .into_string()
    .map_err(|error| OplogError::connection(base_url, error.to_string()))?;

  let reply = parse_reply_body(&body).ok_or_else(|| {
    OplogError::connection(base_url, format!("unexpected handshake reply: {body}"))
  })?;
  if !reply.ok {
    return Err(OplogError::connection(
      base_url,
      format!("handshake refused: {}", Value::Object(reply.body)),
    ));
  }
  Ok(())
}

fn parse_reply_body(body: &str) -> Option<CommandReply> {
  match serde_json::from_str::<Value>(body) {
    Ok(Value::Object(document)) => Some(CommandReply::from_body(document)),
    _ => None,
  }
}

#[derive(Debug, Clone)]
pub struct HttpLogSource {
  agent: ureq::Agent,
  base_url: String,
}

impl HttpLogSource {
  pub fn connect(address: &str, options: &HttpOptions) -> Result<Self> {
    let base_url = normalize_address(address);
    let agent = options.agent();
    handshake(&agent, &base_url)?;
    tracing::info!(address = %base_url, "connected to log source");
    Ok(Self { agent, base_url })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

impl LogSource for HttpLogSource {
  type Cursor = HttpLogCursor;

  fn open(&mut self, namespace: &str, start: OpTime) -> Result<HttpLogCursor> {
    let url = format!("{}/oplog/tail", self.base_url);
    let response = self
      .agent
      .get(&url)
      .query("ns", namespace)
      .query("gte", &start.to_string())
      .call();

    match response {
      Ok(response) => Ok(HttpLogCursor {
        lines: Box::new(BufReader::new(response.into_reader())),
        pending: None,
        address: self.base_url.clone(),
      }),
      Err(ureq::Error::Status(404, response)) => Err(OplogError::query(
        namespace,
        format!("unknown namespace: {}", response.into_string().unwrap_or_default()),
      )),
      Err(ureq::Error::Status(status, response)) => Err(OplogError::query(
        namespace,
        format!(
          "status {status}: {}",
          response.into_string().unwrap_or_default()
        ),
      )),
      Err(ureq::Error::Transport(transport)) => Err(OplogError::connection(
        self.base_url.clone(),
        transport.to_string(),
      )),
    }
  }
}

pub struct HttpLogCursor {
  lines: Box<dyn BufRead + Send>,
  pending: Option<String>,
  address: String,
}

impl LogCursor for HttpLogCursor {
  fn has_more(&mut self) -> Result<bool> {
    if self.pending.is_some() {
      return Ok(true);
    }

    loop {
      let mut line = String::new();
      let read = self
        .lines
        .read_line(&mut line)
        .map_err(|error| OplogError::connection(self.address.clone(), error.to_string()))?;
      if read == 0 {
        return Ok(false);
      }
      if line.trim().is_empty() {
        continue;
      }
      self.pending = Some(line);
      return Ok(true);
    }
  }

  fn next_document(&mut self) -> Result<Document> {
    let line = self
      .pending
      .take()
      .ok_or_else(|| OplogError::Protocol("no document available".to_string()))?;
    match serde_json::from_str::<Value>(&line) {
      Ok(Value::Object(document)) => Ok(document),
      Ok(other) => Err(OplogError::Protocol(format!(
        "expected a document, got {other}"
      ))),
      Err(error) => Err(OplogError::Protocol(format!(
        "unparseable document from {}: {error}",
        self.address
      ))),
    }
  }
}

#[derive(Debug, Clone)]
pub struct HttpCommandEndpoint {
  agent: ureq::Agent,
  base_url: String,
}

impl HttpCommandEndpoint {
  pub fn connect(address: &str, options: &HttpOptions) -> Result<Self> {
    let base_url = normalize_address(address);
    let agent = options.agent();
    handshake(&agent, &base_url)?;
    tracing::info!(address = %base_url, "connected to destination");
    Ok(Self { agent, base_url })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

impl CommandEndpoint for HttpCommandEndpoint {
  fn run_command(&mut self, database: &str, command: &Document) -> Result<CommandReply> {
    let url = format!("{}/{database}/command", self.base_url);
    let body = serde_json::to_string(command)
      .map_err(|error| OplogError::Serialization(format!("encode command: {error}")))?;

    let (status, text) = match self
      .agent
      .post(&url)
      .set("Content-Type", "application/json")
      .send_string(&body)
    {
      Ok(response) => (response.status(), response.into_string()),
      Err(ureq::Error::Status(status, response)) => (status, response.into_string()),
      Err(ureq::Error::Transport(transport)) => {
        return Err(OplogError::connection(
          self.base_url.clone(),
          transport.to_string(),
        ))
      }
    };
    let text =
      text.map_err(|error| OplogError::connection(self.base_url.clone(), error.to_string()))?;

    if let Some(reply) = parse_reply_body(&text) {
      return Ok(reply);
    }

    // Without a JSON reply the command never reached the destination, e.g. a
    // gateway error page.
    let excerpt: String = text.chars().take(200).collect();
    if (200..300).contains(&status) {
      return Err(OplogError::Protocol(format!(
        "destination answered {url} with a non-JSON reply: {excerpt}"
      )));
    }
    Err(OplogError::connection(
      self.base_url.clone(),
      format!("HTTP {status} without a command reply: {excerpt}"),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::normalize_address;

  #[test]
  fn normalizes_addresses() {
    assert_eq!(normalize_address("localhost"), "http://localhost");
    assert_eq!(normalize_address("db1:27017/"), "http://db1:27017");
    assert_eq!(normalize_address("https://replica.example"), "https://replica.example");
  }
}
