//! Sequential dump file reader.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{OplogError, Result};
use crate::oplog::codec::{declared_record_len, MIN_RECORD_BYTES};
use crate::oplog::{decode_entry, LogEntry};

/// Reads a dump file front to back. A corrupt record ends the pass: record
/// boundaries after it cannot be trusted, so there is no resynchronisation.
#[derive(Debug)]
pub struct DumpReader {
  path: PathBuf,
  reader: BufReader<File>,
  file_len: u64,
  position: u64,
  failed: bool,
}

impl DumpReader {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let open_error = |source| OplogError::Open {
      path: path.clone(),
      source,
    };

    let file = File::open(&path).map_err(open_error)?;
    let metadata = file.metadata().map_err(open_error)?;
    if !metadata.is_file() {
      return Err(OplogError::Open {
        path: path.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
      });
    }

    // Shared lock: fails while a capture still holds the file.
    #[cfg(not(target_arch = "wasm32"))]
    fs2::FileExt::try_lock_shared(&file).map_err(open_error)?;

    Ok(Self {
      path,
      reader: BufReader::new(file),
      file_len: metadata.len(),
      position: 0,
      failed: false,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Byte offset of the next record.
  pub fn position(&self) -> u64 {
    self.position
  }

  /// Restarts the pass from the first record.
  pub fn rewind(&mut self) -> Result<()> {
    self.reader.seek(SeekFrom::Start(0))?;
    self.position = 0;
    self.failed = false;
    Ok(())
  }

  /// Returns the next entry, or `None` at a clean end of file.
  pub fn next_entry(&mut self) -> Result<Option<LogEntry>> {
    if self.failed {
      return Err(OplogError::corrupt(
        self.position,
        "read pass already stopped at a corrupt record",
      ));
    }

    let result = self.read_record();
    if result.is_err() {
      self.failed = true;
    }
    result
  }

  fn read_record(&mut self) -> Result<Option<LogEntry>> {
    let offset = self.position;

    let mut prefix = [0u8; 4];
    let read = read_full(&mut self.reader, &mut prefix)?;
    if read == 0 {
      return Ok(None);
    }
    if read < prefix.len() {
      return Err(OplogError::corrupt(
        offset,
        format!("truncated length prefix: {read} of 4 bytes"),
      ));
    }

    let record_len = declared_record_len(&prefix).unwrap_or_default();
    let remaining = self.file_len.saturating_sub(offset);
    if record_len < MIN_RECORD_BYTES {
      return Err(OplogError::corrupt(
        offset,
        format!("declared length {record_len} below minimum {MIN_RECORD_BYTES}"),
      ));
    }
    if record_len as u64 > remaining {
      return Err(OplogError::corrupt(
        offset,
        format!("declared length {record_len} exceeds remaining {remaining} bytes"),
      ));
    }

    let mut record = vec![0u8; record_len];
    record[..4].copy_from_slice(&prefix);
    let read = read_full(&mut self.reader, &mut record[4..])?;
    if read < record_len - 4 {
      return Err(OplogError::corrupt(
        offset,
        format!("record truncated: {} of {record_len} bytes", read + 4),
      ));
    }

    let (entry, consumed) = decode_entry(&record, 0).map_err(|error| match error {
      OplogError::CorruptEntry { offset: inner, reason } => OplogError::CorruptEntry {
        offset: offset + inner,
        reason,
      },
      other => other,
    })?;
    self.position += consumed as u64;
    Ok(Some(entry))
  }
}

impl Iterator for DumpReader {
  type Item = Result<LogEntry>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failed {
      return None;
    }
    self.next_entry().transpose()
  }
}

/// Reads until `buf` is full or the stream ends; returns bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    match reader.read(&mut buf[filled..]) {
      Ok(0) => break,
      Ok(read) => filled += read,
      Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
      Err(error) => return Err(error.into()),
    }
  }
  Ok(filled)
}

/// Reads every entry of a dump file.
pub fn read_dump_file(path: impl AsRef<Path>) -> Result<Vec<LogEntry>> {
  DumpReader::open(path)?.collect()
}
