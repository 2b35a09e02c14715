//! graphload: dependency-aware bulk writes, cascade previews and record
//! diffs over relational storage

pub mod bulk;
pub mod config;
pub mod metadata;
pub mod records;
pub mod storage;

pub use bulk::{BulkError, BulkExecutor, BulkOutcome, CascadeSet, DeleteSummary, Orchestrator};
pub use config::{AppConfig, BulkConfig, StorageConfig};
pub use metadata::{MetadataProvider, Schema};
pub use records::{Instance, RecordKey, RecordRef, RecordSet, Value};
pub use storage::{SqliteOptions, SqliteStore, Storage};
