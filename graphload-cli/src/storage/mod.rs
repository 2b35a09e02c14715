//! Storage engine interface consumed by the bulk engine
//!
//! The engine never issues raw queries; every read and write goes through
//! these primitives. `sqlite` provides the bundled implementation.

pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::EntityType;
use crate::records::{Instance, RecordKey};

pub use sqlite::{SqliteOptions, SqliteStore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record for '{entity}' has no value for required column '{field}'")]
    MissingValue { entity: String, field: String },

    #[error("cannot store {found} value in {entity}.{field}")]
    TypeMismatch {
        entity: String,
        field: String,
        found: &'static str,
    },

    #[error("failed to decode {entity}.{field}: {message}")]
    Decode {
        entity: String,
        field: String,
        message: String,
    },
}

/// Read primitives used by cascade collection and previews
#[async_trait]
pub trait RecordReader: Send {
    /// Rows of `entity` whose key is in `keys`, in key order
    async fn fetch_by_keys(
        &mut self,
        entity: &EntityType,
        keys: &[RecordKey],
    ) -> Result<Vec<Instance>, StorageError>;

    /// Rows of `entity` whose `field` holds one of `keys`, in key order
    async fn fetch_referencing(
        &mut self,
        entity: &EntityType,
        field: &str,
        keys: &[RecordKey],
    ) -> Result<Vec<Instance>, StorageError>;

    /// Number of rows stored for `entity`
    async fn count(&mut self, entity: &EntityType) -> Result<u64, StorageError>;
}

/// A scoped unit of work
///
/// Dropping a transaction without calling `commit` rolls it back.
#[async_trait]
pub trait StorageTransaction: RecordReader {
    /// Insert `records` in order and return their new keys in the same order
    async fn insert_batch(
        &mut self,
        entity: &EntityType,
        records: &[Instance],
    ) -> Result<Vec<RecordKey>, StorageError>;

    /// Write `fields` of each saved record; returns rows actually written
    async fn update_batch(
        &mut self,
        entity: &EntityType,
        records: &[Instance],
        fields: &[String],
    ) -> Result<u64, StorageError>;

    /// Remove rows by key using the engine's own cascade rules; returns the
    /// number of `entity` rows removed (cascaded rows are not included)
    async fn delete_batch(
        &mut self,
        entity: &EntityType,
        keys: &[RecordKey],
    ) -> Result<u64, StorageError>;

    /// View this transaction as a plain reader
    fn as_reader(&mut self) -> &mut dyn RecordReader;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Connection-pool backed storage handle
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open a new transaction on its own connection
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError>;

    /// Open a read-only view that sees one consistent snapshot
    async fn reader(&self) -> Result<Box<dyn RecordReader>, StorageError>;
}
