//! logsync-core: shared types for contract log ingestion
//!
//! Holds everything the ingestion pipeline agrees on without touching the
//! network or the database:
//! - `EventRecord` / `EventKey`: the persisted unit and its `<seq>-<log>` key
//! - `ScanRange` / `plan_chunks`: fixed-width block chunking
//! - `RawLog`, `BlockSummary`, `LogFilter`: chain data as the pipeline sees it
//! - `CollectorConfig`: run configuration
//! - `Error`: the error taxonomy shared by every crate

mod config;
mod error;
mod range;
mod record;
mod types;

pub use config::CollectorConfig;
pub use error::Error;
pub use range::{plan_chunks, Chunks, ScanRange, DEFAULT_BLOCK_RANGE_SIZE};
pub use record::{EventKey, EventRecord, RECORD_FORMAT_VERSION};
pub use types::{BlockSummary, LogFilter, RawLog};

pub type Result<T> = std::result::Result<T, Error>;
