//! Defaults shared by the library and the `oplog` binary.

/// Namespace of the replica-set oplog.
pub const DEFAULT_OPLOG_NAMESPACE: &str = "local.oplog.rs";

pub const DEFAULT_SOURCE_HOST: &str = "localhost";
pub const DEFAULT_DESTINATION_HOST: &str = "localhost";

/// Database that receives `applyOps` during replay.
pub const ADMIN_DATABASE: &str = "admin";

/// Entries between two capture progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
