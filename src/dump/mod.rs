//! Dump files: a flat sequence of encoded oplog records, no header or
//! trailer. End of file is reached between two complete records.

pub mod reader;
pub mod writer;

pub use reader::{read_dump_file, DumpReader};
pub use writer::DumpWriter;
