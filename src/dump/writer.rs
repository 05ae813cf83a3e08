//! Append-only dump file writer.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{OplogError, Result};
use crate::oplog::{encode_entry, LogEntry};

/// Exclusively owns a dump file for the duration of one capture.
///
/// Every append is synced before it returns, so the file on disk is always
/// a sequence of complete records.
#[derive(Debug)]
pub struct DumpWriter {
  path: PathBuf,
  file: File,
  len: u64,
  entries: u64,
}

impl DumpWriter {
  /// Creates (or truncates) the dump file at `path`.
  ///
  /// Existing content is only discarded once the exclusive lock is held, so
  /// a dump still being written or replayed is left untouched.
  pub fn create(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let write_error = |source| OplogError::Write {
      path: path.clone(),
      source,
    };

    let mut file = OpenOptions::new()
      .create(true)
      .truncate(false)
      .write(true)
      .open(&path)
      .map_err(write_error)?;

    #[cfg(not(target_arch = "wasm32"))]
    fs2::FileExt::try_lock_exclusive(&file).map_err(write_error)?;

    file.set_len(0).map_err(write_error)?;
    file.seek(SeekFrom::Start(0)).map_err(write_error)?;

    Ok(Self {
      path,
      file,
      len: 0,
      entries: 0,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Bytes of complete records written so far.
  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn entries(&self) -> u64 {
    self.entries
  }

  /// Encodes `entry`, appends it and syncs the file. Returns the record size.
  pub fn append(&mut self, entry: &LogEntry) -> Result<u64> {
    let record = encode_entry(entry)?;

    // A record only counts once it is synced; anything short of that is cut.
    let written = self
      .file
      .write_all(&record)
      .and_then(|()| self.file.sync_data());
    if let Err(source) = written {
      self.discard_partial_record();
      return Err(OplogError::Write {
        path: self.path.clone(),
        source,
      });
    }

    let written = record.len() as u64;
    self.len += written;
    self.entries += 1;
    Ok(written)
  }

  /// Flushes metadata and releases the file. Returns the number of entries.
  pub fn finish(self) -> Result<u64> {
    self.file.sync_all().map_err(|source| OplogError::Write {
      path: self.path.clone(),
      source,
    })?;
    Ok(self.entries)
  }

  // A failed write or sync may have left all or part of a record behind; cut
  // the file back to the last synced record boundary.
  fn discard_partial_record(&mut self) {
    let restored = self
      .file
      .set_len(self.len)
      .and_then(|()| self.file.seek(SeekFrom::Start(self.len)).map(|_| ()))
      .and_then(|()| self.file.sync_data());
    if let Err(error) = restored {
      tracing::warn!(
        path = %self.path.display(),
        valid_len = self.len,
        error = %error,
        "could not trim partial record from dump file"
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dump::read_dump_file;
  use crate::oplog::{Document, OpKind, OpTime};

  fn entry(seconds: u32) -> LogEntry {
    LogEntry::new(OpTime::new(seconds, 0), OpKind::Insert, "app.items", Document::new())
  }

  #[test]
  fn failed_append_is_not_counted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dump.oplog");
    let mut writer = DumpWriter::create(&path).expect("create");
    let first = writer.append(&entry(1)).expect("append");

    // Swap in a handle that refuses writes.
    writer.file = File::open(&path).expect("reopen read-only");
    assert!(matches!(writer.append(&entry(2)), Err(OplogError::Write { .. })));
    assert_eq!(writer.len(), first);
    assert_eq!(writer.entries(), 1);

    drop(writer);
    assert_eq!(read_dump_file(&path).expect("read"), vec![entry(1)]);
  }

  #[test]
  fn create_truncates_unlocked_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dump.oplog");
    std::fs::write(&path, b"stale bytes").expect("seed file");

    let mut writer = DumpWriter::create(&path).expect("create");
    writer.append(&entry(7)).expect("append");
    writer.finish().expect("finish");
    assert_eq!(read_dump_file(&path).expect("read"), vec![entry(7)]);
  }
}
