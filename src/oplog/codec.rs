//! Self-delimiting binary records for oplog entries.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! u32 record_len | "OPL1" | u32 seconds | u32 ordinal | u8 kind | u8 flags
//! u16 ns_len | ns | u32 payload_len | payload
//! [u32 target_len | target]   flags & 0x01
//! [u32 extra_len | extra]     flags & 0x02
//! u32 crc32(all preceding bytes)
//! ```
//!
//! `record_len` covers the whole record including itself, so a reader can
//! step from one record to the next without any index.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

use super::entry::{Document, LogEntry, OpKind};
use super::optime::OpTime;
use crate::error::{OplogError, Result};

pub const RECORD_MAGIC: &[u8; 4] = b"OPL1";
/// Length prefix through namespace length.
pub const RECORD_HEADER_BYTES: usize = 20;
pub const RECORD_TRAILER_BYTES: usize = 4;
/// Smallest well-formed record: empty namespace, empty payload, no options.
pub const MIN_RECORD_BYTES: usize = RECORD_HEADER_BYTES + 4 + RECORD_TRAILER_BYTES;

const FLAG_HAS_TARGET: u8 = 0x01;
const FLAG_HAS_EXTRA: u8 = 0x02;
const KNOWN_FLAGS: u8 = FLAG_HAS_TARGET | FLAG_HAS_EXTRA;

pub fn encode_entry(entry: &LogEntry) -> Result<Vec<u8>> {
  let namespace = entry.namespace.as_bytes();
  let namespace_len = u16::try_from(namespace.len()).map_err(|_| {
    OplogError::Serialization(format!("namespace too long: {} bytes", namespace.len()))
  })?;

  let payload = document_bytes(&entry.payload, "payload")?;
  let target = entry
    .target
    .as_ref()
    .map(|target| document_bytes(target, "target"))
    .transpose()?;
  let extra = if entry.extra.is_empty() {
    None
  } else {
    Some(document_bytes(&entry.extra, "extra")?)
  };

  let mut flags = 0u8;
  let mut record_len = RECORD_HEADER_BYTES + namespace.len() + 4 + payload.len();
  if let Some(target) = &target {
    flags |= FLAG_HAS_TARGET;
    record_len += 4 + target.len();
  }
  if let Some(extra) = &extra {
    flags |= FLAG_HAS_EXTRA;
    record_len += 4 + extra.len();
  }
  record_len += RECORD_TRAILER_BYTES;

  let record_len_u32 = u32::try_from(record_len)
    .map_err(|_| OplogError::Serialization(format!("entry too large: {record_len} bytes")))?;

  let mut bytes = Vec::with_capacity(record_len);
  bytes.extend_from_slice(&record_len_u32.to_le_bytes());
  bytes.extend_from_slice(RECORD_MAGIC);
  bytes.extend_from_slice(&entry.timestamp.seconds.to_le_bytes());
  bytes.extend_from_slice(&entry.timestamp.ordinal.to_le_bytes());
  bytes.push(entry.kind.code());
  bytes.push(flags);
  bytes.extend_from_slice(&namespace_len.to_le_bytes());
  bytes.extend_from_slice(namespace);
  push_section(&mut bytes, &payload);
  if let Some(target) = &target {
    push_section(&mut bytes, target);
  }
  if let Some(extra) = &extra {
    push_section(&mut bytes, extra);
  }

  let crc = crc32fast::hash(&bytes);
  bytes.extend_from_slice(&crc.to_le_bytes());
  debug_assert_eq!(bytes.len(), record_len);
  Ok(bytes)
}

/// Decodes the record starting at `offset`, returning the entry and the
/// number of bytes it occupies.
pub fn decode_entry(bytes: &[u8], offset: usize) -> Result<(LogEntry, usize)> {
  let at = offset as u64;
  let remaining = bytes
    .get(offset..)
    .ok_or_else(|| OplogError::corrupt(at, "offset beyond end of buffer"))?;

  let record_len = declared_record_len(remaining).ok_or_else(|| {
    OplogError::corrupt(
      at,
      format!("truncated length prefix: {} bytes remain", remaining.len()),
    )
  })?;
  if record_len < MIN_RECORD_BYTES {
    return Err(OplogError::corrupt(
      at,
      format!("declared length {record_len} below minimum {MIN_RECORD_BYTES}"),
    ));
  }
  if record_len > remaining.len() {
    return Err(OplogError::corrupt(
      at,
      format!(
        "declared length {record_len} exceeds remaining {} bytes",
        remaining.len()
      ),
    ));
  }

  let record = &remaining[..record_len];
  let body_end = record_len - RECORD_TRAILER_BYTES;
  let stored = LittleEndian::read_u32(&record[body_end..]);
  let computed = crc32fast::hash(&record[..body_end]);
  if stored != computed {
    return Err(OplogError::corrupt(
      at,
      format!("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"),
    ));
  }

  let body = &record[4..body_end];
  let mut cursor = Cursor::new(body);

  let mut magic = [0u8; 4];
  cursor
    .read_exact(&mut magic)
    .map_err(truncated(at, "magic"))?;
  if &magic != RECORD_MAGIC {
    return Err(OplogError::corrupt(at, "invalid record magic"));
  }

  let seconds = cursor
    .read_u32::<LittleEndian>()
    .map_err(truncated(at, "seconds"))?;
  let ordinal = cursor
    .read_u32::<LittleEndian>()
    .map_err(truncated(at, "ordinal"))?;
  let code = cursor.read_u8().map_err(truncated(at, "kind"))?;
  let kind = OpKind::from_code(code)
    .ok_or_else(|| OplogError::corrupt(at, format!("unknown op kind code {code:#04x}")))?;
  let flags = cursor.read_u8().map_err(truncated(at, "flags"))?;
  if flags & !KNOWN_FLAGS != 0 {
    return Err(OplogError::corrupt(
      at,
      format!("unknown record flags {flags:#04x}"),
    ));
  }

  let namespace_len = cursor
    .read_u16::<LittleEndian>()
    .map_err(truncated(at, "namespace length"))?;
  let namespace = read_section(&mut cursor, usize::from(namespace_len), at, "namespace")?;
  let namespace = String::from_utf8(namespace)
    .map_err(|_| OplogError::corrupt(at, "namespace is not valid UTF-8"))?;

  let payload = read_document_section(&mut cursor, at, "payload")?;
  let target = if flags & FLAG_HAS_TARGET != 0 {
    Some(read_document_section(&mut cursor, at, "target")?)
  } else {
    None
  };
  let extra = if flags & FLAG_HAS_EXTRA != 0 {
    read_document_section(&mut cursor, at, "extra")?
  } else {
    Document::new()
  };

  if cursor.position() as usize != body.len() {
    return Err(OplogError::corrupt(
      at,
      "record contains unexpected trailing bytes",
    ));
  }

  let entry = LogEntry {
    timestamp: OpTime::new(seconds, ordinal),
    kind,
    namespace,
    payload,
    target,
    extra,
  };
  Ok((entry, record_len))
}

/// Reads the length prefix of the record at the start of `bytes`.
pub fn declared_record_len(bytes: &[u8]) -> Option<usize> {
  if bytes.len() < 4 {
    return None;
  }
  Some(LittleEndian::read_u32(&bytes[..4]) as usize)
}

fn document_bytes(document: &Document, section: &str) -> Result<Vec<u8>> {
  let bytes = serde_json::to_vec(document)
    .map_err(|error| OplogError::Serialization(format!("encode {section}: {error}")))?;
  if u32::try_from(bytes.len()).is_err() {
    return Err(OplogError::Serialization(format!(
      "{section} too large: {} bytes",
      bytes.len()
    )));
  }
  Ok(bytes)
}

fn push_section(bytes: &mut Vec<u8>, section: &[u8]) {
  bytes.extend_from_slice(&(section.len() as u32).to_le_bytes());
  bytes.extend_from_slice(section);
}

fn read_section(
  cursor: &mut Cursor<&[u8]>,
  len: usize,
  at: u64,
  what: &str,
) -> Result<Vec<u8>> {
  let available = cursor.get_ref().len() - cursor.position() as usize;
  if len > available {
    return Err(OplogError::corrupt(
      at,
      format!("{what} length {len} overruns record ({available} bytes left)"),
    ));
  }
  let mut section = vec![0; len];
  cursor
    .read_exact(&mut section)
    .map_err(truncated(at, what))?;
  Ok(section)
}

fn read_document_section(cursor: &mut Cursor<&[u8]>, at: u64, what: &str) -> Result<Document> {
  let len = cursor
    .read_u32::<LittleEndian>()
    .map_err(truncated(at, what))? as usize;
  let bytes = read_section(cursor, len, at, what)?;
  match serde_json::from_slice::<serde_json::Value>(&bytes) {
    Ok(serde_json::Value::Object(document)) => Ok(document),
    Ok(_) => Err(OplogError::corrupt(
      at,
      format!("{what} is not a structured document"),
    )),
    Err(error) => Err(OplogError::corrupt(
      at,
      format!("{what} cannot be parsed: {error}"),
    )),
  }
}

fn truncated(at: u64, what: &str) -> impl FnOnce(io::Error) -> OplogError + '_ {
  move |_| OplogError::corrupt(at, format!("record truncated while reading {what}"))
}
