//! logsync: collect a contract's event logs into a local database
//!
//! Umbrella crate over the workspace members; see `logsync-ingest` for the
//! collector service and `logsync-core` for the shared types.

pub use logsync_core;
pub use logsync_ingest;
