//! Logical oplog timestamp.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::OplogError;

/// Position in the oplog: `(seconds, ordinal)`, ordered lexicographically.
///
/// Serialized as `{"t": seconds, "i": ordinal}`, the shape log sources use
/// for the `ts` field of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct OpTime {
  #[serde(rename = "t")]
  pub seconds: u32,
  #[serde(rename = "i")]
  pub ordinal: u32,
}

impl OpTime {
  pub const MIN: OpTime = OpTime::new(0, 0);

  pub const fn new(seconds: u32, ordinal: u32) -> Self {
    Self { seconds, ordinal }
  }

  /// Start of the given second.
  pub const fn from_seconds(seconds: u32) -> Self {
    Self::new(seconds, 0)
  }

  /// Wall-clock rendering for operator logs, e.g.
  /// `2024-03-01T12:00:00Z 1709294400:3`.
  pub fn pretty(&self) -> String {
    match DateTime::from_timestamp(i64::from(self.seconds), 0) {
      Some(at) => format!("{} {}", at.format("%Y-%m-%dT%H:%M:%SZ"), self),
      None => self.to_string(),
    }
  }
}

impl fmt::Display for OpTime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.seconds, self.ordinal)
  }
}

impl Ord for OpTime {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .seconds
      .cmp(&other.seconds)
      .then_with(|| self.ordinal.cmp(&other.ordinal))
  }
}

impl PartialOrd for OpTime {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl FromStr for OpTime {
  type Err = OplogError;

  fn from_str(raw: &str) -> Result<Self, Self::Err> {
    let mut parts = raw.split(':');
    let seconds = parse_u32_component(parts.next(), "seconds", raw)?;
    let ordinal = parse_u32_component(parts.next(), "ordinal", raw)?;

    if parts.next().is_some() {
      return Err(OplogError::InvalidOpTime(format!(
        "invalid optime format: {raw}"
      )));
    }

    Ok(Self::new(seconds, ordinal))
  }
}

fn parse_u32_component(
  value: Option<&str>,
  component: &'static str,
  original: &str,
) -> Result<u32, OplogError> {
  let value = value.ok_or_else(|| {
    OplogError::InvalidOpTime(format!("{component} missing: {original}"))
  })?;

  if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
    return Err(OplogError::InvalidOpTime(format!(
      "invalid {component}: {value}"
    )));
  }

  value
    .parse::<u32>()
    .map_err(|_| OplogError::InvalidOpTime(format!("{component} overflow: {original}")))
}

#[cfg(test)]
mod tests {
  use super::OpTime;
  use rand::{rngs::StdRng, Rng, SeedableRng};
  use std::str::FromStr;

  #[test]
  fn ordering_is_seconds_then_ordinal() {
    assert!(OpTime::new(1, 9) < OpTime::new(2, 0));
    assert!(OpTime::new(2, 0) < OpTime::new(2, 1));
    assert_eq!(OpTime::new(5, 5), OpTime::new(5, 5));
    assert!(OpTime::MIN <= OpTime::from_seconds(0));
  }

  #[test]
  fn text_roundtrip_fuzz_like() {
    let mut rng = StdRng::seed_from_u64(0x0b10_9000);

    for _ in 0..2_000 {
      let time = OpTime::new(rng.gen(), rng.gen());
      let parsed = OpTime::from_str(&time.to_string()).expect("parse optime");
      assert_eq!(parsed, time);
    }
  }

  #[test]
  fn invalid_strings_rejected() {
    let invalid = [
      "", "1", "1:", ":1", "1:2:3", "x:1", "1:y", "-1:2", " 1:2", "1:2 ", "4294967296:0",
    ];

    for raw in invalid {
      assert!(OpTime::from_str(raw).is_err(), "optime should fail: {raw}");
    }
  }

  #[test]
  fn pretty_includes_wall_clock() {
    let time = OpTime::new(1_709_294_400, 3);
    assert_eq!(time.pretty(), "2024-03-01T12:00:00Z 1709294400:3");
  }

  #[test]
  fn serializes_as_ts_document() {
    let value = serde_json::to_value(OpTime::new(7, 2)).expect("serialize");
    assert_eq!(value, serde_json::json!({"t": 7, "i": 2}));
  }
}
