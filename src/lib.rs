//! oplogkit - capture a replication oplog to a file and replay it.
//!
//! Capture tails a remote log from a starting [`OpTime`] and appends every
//! entry, in order, to a dump file. Replay reads that file back and re-issues
//! each operation against a destination as a single-operation `applyOps`
//! command.
//!
//! ```no_run
//! use oplogkit::capture::{capture_to_file, CaptureOptions};
//! use oplogkit::tail::TailingReader;
//! use oplogkit::transport::{HttpLogSource, HttpOptions};
//! use oplogkit::OpTime;
//!
//! # fn main() -> oplogkit::Result<()> {
//! let mut source = HttpLogSource::connect("localhost:8080", &HttpOptions::new())?;
//! let mut reader = TailingReader::open(&mut source, "local.oplog.rs", OpTime::from_seconds(0))?;
//! capture_to_file(&mut reader, "oplog.dump", CaptureOptions::new())?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod constants;
pub mod dump;
pub mod error;
pub mod oplog;
pub mod replay;
pub mod tail;
pub mod transport;

pub use error::{OplogError, Result};
pub use oplog::{Document, LogEntry, OpKind, OpTime};
