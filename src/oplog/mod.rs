//! Oplog data model: logical timestamps, entries and their record codec.

pub mod codec;
pub mod entry;
pub mod optime;

pub use codec::{decode_entry, encode_entry};
pub use entry::{Document, LogEntry, OpKind};
pub use optime::OpTime;
