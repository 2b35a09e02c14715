//! Chunked bulk executor
//!
//! Splits one entity type's records into consecutive chunks and runs each
//! chunk in its own storage transaction on a spawned task, gated by a
//! `ChunkLimiter`. A chunk either commits completely or rolls back
//! completely; a failed chunk never undoes its siblings.
//!
//! The executor owns the outermost transaction of every chunk. Running it
//! inside a transaction managed by the caller is not supported.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use uuid::Uuid;

use super::cascade::{CascadeCollector, CascadeSet};
use super::concurrency::{ChunkLimiter, LimiterStats};
use super::error::{BulkError, ChunkError, Result};
use crate::config::BulkConfig;
use crate::metadata::{EntityType, MetadataProvider};
use crate::records::{Instance, RecordKey, RecordSet};
use crate::storage::{Storage, StorageTransaction};

/// A chunk that did not commit
#[derive(Debug)]
pub struct ChunkFailure {
    /// Position of the chunk in dispatch order
    pub index: usize,
    /// Position of the chunk's first record in the input
    pub offset: usize,
    pub len: usize,
    pub error: ChunkError,
}

/// Aggregate result of one bulk call plus the chunks that failed
#[derive(Debug)]
pub struct BulkOutcome<T> {
    pub result: T,
    pub failures: Vec<ChunkFailure>,
}

impl<T> BulkOutcome<T> {
    /// Every chunk committed
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of input records in failed chunks
    pub fn failed_records(&self) -> usize {
        self.failures.iter().map(|f| f.len).sum()
    }
}

/// Rows removed by a delete, including cascaded rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub total: u64,
    pub by_entity: BTreeMap<String, u64>,
}

impl DeleteSummary {
    pub fn merge(&mut self, other: &DeleteSummary) {
        for (entity, count) in &other.by_entity {
            *self.by_entity.entry(entity.clone()).or_default() += count;
        }
        self.total += other.total;
    }

    fn from_cascade(entity: &str, set: &CascadeSet) -> Self {
        let mut by_entity: BTreeMap<String, u64> = set
            .counts()
            .into_iter()
            .map(|(name, count)| (name, count as u64))
            .collect();
        by_entity.entry(entity.to_string()).or_default();
        let total = by_entity.values().sum();
        Self { total, by_entity }
    }
}

/// The mutation a chunk performs inside its transaction
#[async_trait]
trait ChunkJob: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn run(
        &self,
        tx: &mut dyn StorageTransaction,
        entity: &EntityType,
        records: &[Instance],
    ) -> std::result::Result<Self::Output, ChunkError>;
}

struct CreateJob;

#[async_trait]
impl ChunkJob for CreateJob {
    type Output = Vec<RecordKey>;

    async fn run(
        &self,
        tx: &mut dyn StorageTransaction,
        entity: &EntityType,
        records: &[Instance],
    ) -> std::result::Result<Vec<RecordKey>, ChunkError> {
        Ok(tx.insert_batch(entity, records).await?)
    }
}

struct UpdateJob {
    fields: Vec<String>,
}

#[async_trait]
impl ChunkJob for UpdateJob {
    type Output = u64;

    async fn run(
        &self,
        tx: &mut dyn StorageTransaction,
        entity: &EntityType,
        records: &[Instance],
    ) -> std::result::Result<u64, ChunkError> {
        Ok(tx.update_batch(entity, records, &self.fields).await?)
    }
}

struct DeleteJob {
    collector: CascadeCollector,
}

#[async_trait]
impl ChunkJob for DeleteJob {
    type Output = DeleteSummary;

    async fn run(
        &self,
        tx: &mut dyn StorageTransaction,
        entity: &EntityType,
        records: &[Instance],
    ) -> std::result::Result<DeleteSummary, ChunkError> {
        let set = self
            .collector
            .collect(tx.as_reader(), &entity.name, records)
            .await?;

        let keys: Vec<RecordKey> = records.iter().filter_map(|r| r.key).collect();
        let removed = tx.delete_batch(entity, &keys).await?;

        let summary = DeleteSummary::from_cascade(&entity.name, &set);
        if summary.by_entity.get(&entity.name).copied().unwrap_or(0) < removed {
            warn!(
                "Delete of {} removed {} roots but only {} were collected",
                entity.name,
                removed,
                set.count(&entity.name)
            );
        }
        Ok(summary)
    }
}

/// One chunk after its task finished
struct ChunkRun<T> {
    index: usize,
    offset: usize,
    records: Vec<Instance>,
    result: std::result::Result<T, ChunkError>,
}

/// Runs create/update/delete for one entity type in chunked transactions
#[derive(Clone)]
pub struct BulkExecutor {
    storage: Arc<dyn Storage>,
    metadata: Arc<dyn MetadataProvider>,
    config: BulkConfig,
    limiter: ChunkLimiter,
}

impl BulkExecutor {
    pub fn new(
        storage: Arc<dyn Storage>,
        metadata: Arc<dyn MetadataProvider>,
        config: BulkConfig,
    ) -> Self {
        let limiter = ChunkLimiter::new(config.max_concurrency);
        Self {
            storage,
            metadata,
            config,
            limiter,
        }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataProvider> {
        &self.metadata
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn limiter_stats(&self) -> LimiterStats {
        self.limiter.stats()
    }

    /// Insert `records`, returning them in input order
    ///
    /// Records of committed chunks carry their new keys; records of failed
    /// chunks are returned unsaved.
    pub async fn create(
        &self,
        entity: &str,
        records: Vec<Instance>,
    ) -> Result<BulkOutcome<Vec<Instance>>> {
        let entity_type = self.preflight(entity)?;
        for (position, record) in records.iter().enumerate() {
            check_known_fields(&entity_type, record, position)?;
            if let Some((field, target)) = record.pending_refs().next() {
                return Err(BulkError::validation(format!(
                    "{} record at position {} has unresolved reference {} -> {}[{}]",
                    entity, position, field, target.entity, target.index
                )));
            }
        }

        let op = Uuid::new_v4();
        let total = records.len();
        let runs = self.dispatch(op, entity_type, records, Arc::new(CreateJob)).await;

        let mut result = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for run in runs {
            match run.result {
                Ok(keys) => {
                    for (mut record, key) in run.records.into_iter().zip(keys) {
                        record.key = Some(key);
                        result.push(record);
                    }
                }
                Err(error) => {
                    failures.push(ChunkFailure {
                        index: run.index,
                        offset: run.offset,
                        len: run.records.len(),
                        error,
                    });
                    result.extend(run.records);
                }
            }
        }

        let outcome = BulkOutcome { result, failures };
        info!(
            "[{}] Created {}/{} {} records ({} chunks failed)",
            op,
            total - outcome.failed_records(),
            total,
            entity,
            outcome.failures.len()
        );
        Ok(outcome)
    }

    /// Write `fields` of saved records; the result is rows actually written
    pub async fn update(
        &self,
        entity: &str,
        records: Vec<Instance>,
        fields: &[String],
    ) -> Result<BulkOutcome<u64>> {
        let entity_type = self.preflight(entity)?;

        if fields.is_empty() {
            return Err(BulkError::validation(
                "update requires an explicit, non-empty field list",
            ));
        }
        for field in fields {
            if *field == entity_type.key_field {
                return Err(BulkError::validation(format!(
                    "key field '{}' of {} cannot be updated",
                    field, entity
                )));
            }
            if !entity_type.has_column(field) {
                return Err(BulkError::validation(format!(
                    "'{}' is not a field of {}",
                    field, entity
                )));
            }
        }

        for (position, record) in records.iter().enumerate() {
            require_key(entity, record, position)?;
            check_known_fields(&entity_type, record, position)?;
            for field in fields {
                match record.get(field) {
                    None => {
                        return Err(BulkError::validation(format!(
                            "{} record at position {} has no value for '{}'",
                            entity, position, field
                        )));
                    }
                    Some(value) if value.is_ref() => {
                        return Err(BulkError::validation(format!(
                            "{} record at position {} has an unresolved reference in '{}'",
                            entity, position, field
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        let op = Uuid::new_v4();
        let total = records.len();
        let job = Arc::new(UpdateJob {
            fields: fields.to_vec(),
        });
        let runs = self.dispatch(op, entity_type, records, job).await;

        let mut written = 0;
        let mut failures = Vec::new();
        for run in runs {
            match run.result {
                Ok(rows) => written += rows,
                Err(error) => failures.push(ChunkFailure {
                    index: run.index,
                    offset: run.offset,
                    len: run.records.len(),
                    error,
                }),
            }
        }

        info!(
            "[{}] Updated {} of {} {} records ({} chunks failed)",
            op,
            written,
            total,
            entity,
            failures.len()
        );
        Ok(BulkOutcome {
            result: written,
            failures,
        })
    }

    /// Delete saved records with the storage engine's cascade rules
    pub async fn delete(
        &self,
        entity: &str,
        records: Vec<Instance>,
    ) -> Result<BulkOutcome<DeleteSummary>> {
        let entity_type = self.preflight(entity)?;
        for (position, record) in records.iter().enumerate() {
            require_key(entity, record, position)?;
        }

        let op = Uuid::new_v4();
        let job = Arc::new(DeleteJob {
            collector: CascadeCollector::new(Arc::clone(&self.metadata)),
        });
        let runs = self.dispatch(op, entity_type, records, job).await;

        let mut summary = DeleteSummary::default();
        let mut failures = Vec::new();
        for run in runs {
            match run.result {
                Ok(chunk) => summary.merge(&chunk),
                Err(error) => failures.push(ChunkFailure {
                    index: run.index,
                    offset: run.offset,
                    len: run.records.len(),
                    error,
                }),
            }
        }

        info!(
            "[{}] Deleted {} rows starting from {} ({} chunks failed)",
            op,
            summary.total,
            entity,
            failures.len()
        );
        Ok(BulkOutcome {
            result: summary,
            failures,
        })
    }

    /// Preview what deleting `records` would remove, without mutating storage
    pub async fn simulate_delete(&self, entity: &str, records: &[Instance]) -> Result<CascadeSet> {
        let mut reader = self.storage.reader().await?;
        let collector = CascadeCollector::new(Arc::clone(&self.metadata));
        collector.collect(reader.as_mut(), entity, records).await
    }

    /// Preview the union of deleting several root collections
    pub async fn simulate_delete_many(&self, roots: &[RecordSet]) -> Result<CascadeSet> {
        let mut reader = self.storage.reader().await?;
        let collector = CascadeCollector::new(Arc::clone(&self.metadata));
        collector.collect_many(reader.as_mut(), roots).await
    }

    fn preflight(&self, entity: &str) -> Result<Arc<EntityType>> {
        self.config.validate().map_err(BulkError::Config)?;
        self.metadata
            .entity(entity)
            .ok_or_else(|| BulkError::UnknownEntity(entity.to_string()))
    }

    /// Run `job` over consecutive chunks and wait for all of them
    ///
    /// Results come back in chunk order whatever order the chunks finished in.
    async fn dispatch<J: ChunkJob>(
        &self,
        op: Uuid,
        entity: Arc<EntityType>,
        records: Vec<Instance>,
        job: Arc<J>,
    ) -> Vec<ChunkRun<J::Output>> {
        if records.is_empty() {
            return Vec::new();
        }

        let chunk_size = self.config.chunk_size;
        let chunks = partition(records, chunk_size);
        debug!(
            "[{}] Dispatching {} chunks of {} (chunk size {}, concurrency {})",
            op,
            chunks.len(),
            entity.name,
            chunk_size,
            self.limiter.max_concurrency()
        );

        let handles: Vec<_> = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let chunk = Arc::clone(chunk);
                let storage = Arc::clone(&self.storage);
                let entity = Arc::clone(&entity);
                let job = Arc::clone(&job);
                let limiter = self.limiter.clone();

                tokio::spawn(async move {
                    let _permit = limiter
                        .acquire()
                        .await
                        .map_err(|e| ChunkError::Aborted(e.to_string()))?;
                    debug!("[{}] Chunk {} started ({} records)", op, index, chunk.len());
                    let result = run_in_transaction(storage.as_ref(), &entity, &chunk, job.as_ref()).await;
                    debug!("[{}] Chunk {} finished (ok: {})", op, index, result.is_ok());
                    result
                })
            })
            .collect();

        let joined = join_all(handles).await;

        chunks
            .into_iter()
            .zip(joined)
            .enumerate()
            .map(|(index, (chunk, joined))| {
                let result = joined.unwrap_or_else(|e| Err(ChunkError::Aborted(e.to_string())));
                if let Err(error) = &result {
                    warn!("[{}] Chunk {} of {} failed: {}", op, index, entity.name, error);
                }
                // The task has dropped its handle on the chunk by now.
                let records = Arc::try_unwrap(chunk).unwrap_or_else(|shared| (*shared).clone());
                ChunkRun {
                    index,
                    offset: index * chunk_size,
                    records,
                    result,
                }
            })
            .collect()
    }
}

/// Begin, run, then commit or roll back
async fn run_in_transaction<J: ChunkJob>(
    storage: &dyn Storage,
    entity: &EntityType,
    records: &[Instance],
    job: &J,
) -> std::result::Result<J::Output, ChunkError> {
    let mut tx = storage.begin().await?;
    match job.run(tx.as_mut(), entity, records).await {
        Ok(output) => {
            tx.commit().await?;
            Ok(output)
        }
        Err(error) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback of failed {} chunk also failed: {}", entity.name, rollback);
            }
            Err(error)
        }
    }
}

/// Split into consecutive chunks of at most `size` records
fn partition(records: Vec<Instance>, size: usize) -> Vec<Arc<Vec<Instance>>> {
    let mut chunks = Vec::with_capacity(records.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(records.len()));
    for record in records {
        current.push(record);
        if current.len() == size {
            chunks.push(Arc::new(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        chunks.push(Arc::new(current));
    }
    chunks
}

fn require_key(entity: &str, record: &Instance, position: usize) -> Result<()> {
    if record.key.is_none() {
        return Err(BulkError::validation(format!(
            "{} record at position {} has no key",
            entity, position
        )));
    }
    Ok(())
}

fn check_known_fields(entity: &EntityType, record: &Instance, position: usize) -> Result<()> {
    if let Some(field) = record.values.keys().find(|f| !entity.has_column(f)) {
        return Err(BulkError::validation(format!(
            "{} record at position {} sets unknown field '{}'",
            entity.name, position, field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityType, FieldDef, FieldKind, Schema};
    use crate::records::{RecordRef, Value};
    use crate::storage::{RecordReader, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks transactions open at once
    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    /// Storage whose inserts take longer for earlier chunks
    #[derive(Clone, Default)]
    struct SlowStorage {
        in_flight: Arc<InFlight>,
    }

    struct SlowTransaction {
        in_flight: Arc<InFlight>,
    }

    impl SlowTransaction {
        fn close(&self) {
            self.in_flight.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Storage for SlowStorage {
        async fn begin(&self) -> std::result::Result<Box<dyn StorageTransaction>, StorageError> {
            let now = self.in_flight.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(SlowTransaction {
                in_flight: Arc::clone(&self.in_flight),
            }))
        }

        async fn reader(&self) -> std::result::Result<Box<dyn RecordReader>, StorageError> {
            unimplemented!("not used by create")
        }
    }

    #[async_trait]
    impl RecordReader for SlowTransaction {
        async fn fetch_by_keys(
            &mut self,
            _entity: &EntityType,
            _keys: &[RecordKey],
        ) -> std::result::Result<Vec<Instance>, StorageError> {
            Ok(Vec::new())
        }

        async fn fetch_referencing(
            &mut self,
            _entity: &EntityType,
            _field: &str,
            _keys: &[RecordKey],
        ) -> std::result::Result<Vec<Instance>, StorageError> {
            Ok(Vec::new())
        }

        async fn count(&mut self, _entity: &EntityType) -> std::result::Result<u64, StorageError> {
            Ok(0)
        }
    }

    #[async_trait]
    impl StorageTransaction for SlowTransaction {
        async fn insert_batch(
            &mut self,
            _entity: &EntityType,
            records: &[Instance],
        ) -> std::result::Result<Vec<RecordKey>, StorageError> {
            let ns: Vec<i64> = records
                .iter()
                .filter_map(|r| r.get("n").and_then(Value::as_int))
                .collect();
            let first = ns.first().copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(5 * (20 - first.min(20)) as u64)).await;
            Ok(ns.into_iter().map(|n| n + 100).collect())
        }

        async fn update_batch(
            &mut self,
            _entity: &EntityType,
            records: &[Instance],
            _fields: &[String],
        ) -> std::result::Result<u64, StorageError> {
            Ok(records.len() as u64)
        }

        async fn delete_batch(
            &mut self,
            _entity: &EntityType,
            keys: &[RecordKey],
        ) -> std::result::Result<u64, StorageError> {
            Ok(keys.len() as u64)
        }

        fn as_reader(&mut self) -> &mut dyn RecordReader {
            self
        }

        async fn commit(self: Box<Self>) -> std::result::Result<(), StorageError> {
            self.close();
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> std::result::Result<(), StorageError> {
            self.close();
            Ok(())
        }
    }

    fn sizes(chunks: &[Arc<Vec<Instance>>]) -> Vec<usize> {
        chunks.iter().map(|c| c.len()).collect()
    }

    fn unsaved(n: usize) -> Vec<Instance> {
        (0..n).map(|i| Instance::new().set("n", i as i64)).collect()
    }

    #[test]
    fn test_partition_sizes() {
        assert_eq!(sizes(&partition(unsaved(5), 2)), vec![2, 2, 1]);
        assert_eq!(sizes(&partition(unsaved(5), 1)), vec![1, 1, 1, 1, 1]);
        assert_eq!(sizes(&partition(unsaved(5), 5)), vec![5]);
        assert_eq!(sizes(&partition(unsaved(4), 10)), vec![4]);
        assert!(partition(Vec::new(), 3).is_empty());
    }

    #[test]
    fn test_partition_keeps_order() {
        let chunks = partition(unsaved(5), 2);
        let flattened: Vec<i64> = chunks
            .iter()
            .flat_map(|c| c.iter())
            .filter_map(|r| r.get("n").and_then(Value::as_int))
            .collect();
        assert_eq!(flattened, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_delete_summary_merge() {
        let mut a = DeleteSummary {
            total: 3,
            by_entity: BTreeMap::from([("author".into(), 1), ("book".into(), 2)]),
        };
        let b = DeleteSummary {
            total: 2,
            by_entity: BTreeMap::from([("book".into(), 1), ("review".into(), 1)]),
        };
        a.merge(&b);
        assert_eq!(a.total, 5);
        assert_eq!(a.by_entity["book"], 3);
        assert_eq!(a.by_entity["review"], 1);
    }

    #[test]
    fn test_field_checks() {
        let entity = EntityType::new("author").field(FieldDef::new("name", FieldKind::Text));

        assert!(check_known_fields(&entity, &Instance::new().set("name", "x"), 0).is_ok());
        assert!(check_known_fields(&entity, &Instance::new().set("nmae", "x"), 0).is_err());
        assert!(require_key("author", &Instance::new(), 0).is_err());
        assert!(require_key("author", &Instance::with_key(1), 0).is_ok());

        let pending = Instance::new().set("name", RecordRef::new("author", 0));
        assert!(pending.has_pending_refs());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_chunks_stay_bounded_and_ordered() {
        let storage = SlowStorage::default();
        let schema = Schema::builder()
            .entity(EntityType::new("item").field(FieldDef::new("n", FieldKind::Integer)))
            .build()
            .unwrap();
        let config = BulkConfig::builder().chunk_size(2).max_concurrency(3).build();
        let executor = BulkExecutor::new(Arc::new(storage.clone()), Arc::new(schema), config);

        let outcome = executor.create("item", unsaved(20)).await.unwrap();

        assert!(outcome.is_complete());
        let peak = storage.in_flight.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in flight was {}", peak);
        assert!(peak > 1, "chunks never overlapped");
        assert_eq!(storage.in_flight.current.load(Ordering::SeqCst), 0);

        let order: Vec<i64> = outcome
            .result
            .iter()
            .filter_map(|r| r.get("n").and_then(Value::as_int))
            .collect();
        assert_eq!(order, (0..20).collect::<Vec<i64>>());
        let keys: Vec<RecordKey> = outcome.result.iter().filter_map(|r| r.key).collect();
        assert_eq!(keys, (100..120).collect::<Vec<RecordKey>>());
        assert_eq!(executor.limiter_stats().acquired, 10);
    }
}
