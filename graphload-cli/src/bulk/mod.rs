//! Dependency-aware bulk write and diff engine

pub mod cascade;
pub mod concurrency;
pub mod dependency_graph;
pub mod diff;
pub mod error;
pub mod executor;
pub mod orchestrator;

pub use cascade::{CascadeCollector, CascadeSet};
pub use concurrency::{ChunkLimiter, LimiterStats};
pub use dependency_graph::{DependencyCategory, DependencyGraph, EntityWithLookups, LookupInfo};
pub use diff::{DiffKey, RecordDiff, diff_records};
pub use error::{BulkError, ChunkError, CycleError, Result};
pub use executor::{BulkExecutor, BulkOutcome, ChunkFailure, DeleteSummary};
pub use orchestrator::{MultiOutcome, Orchestrator, check_refs};
