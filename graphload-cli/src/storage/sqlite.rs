//! SQLite storage engine built on sqlx
//!
//! Tables are installed from a `Schema` with real foreign keys, so deletes
//! cascade natively. SQLite admits a single writer at a time: write
//! transactions queue on a process-local writer gate before taking a
//! connection. Readers bypass the gate and read from a deferred
//! transaction that is always rolled back, so a preview sees one snapshot.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{RecordReader, Storage, StorageError, StorageTransaction};
use crate::config::StorageConfig;
use crate::metadata::{EntityType, FieldKind, MetadataProvider, Schema};
use crate::records::{Instance, RecordKey, Value};

/// Largest number of keys bound into one `IN (...)` clause
const MAX_IN_PARAMS: usize = 500;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Connection settings for `SqliteStore::open`
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for SqliteOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_connections: config.max_connections.max(1),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        }
    }
}

/// Pool-backed SQLite storage
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file
    pub async fn open(path: impl AsRef<Path>, options: SqliteOptions) -> Result<Self, StorageError> {
        let connect = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await?;

        log::debug!(
            "Opened SQLite database {} ({} connections)",
            path.as_ref().display(),
            options.max_connections
        );

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool; foreign keys must be enabled on its connections
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and reference indexes for every entity in `schema`
    pub async fn install_schema(&self, schema: &Schema) -> Result<(), StorageError> {
        let statements = ddl_statements(schema);

        let _gate = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        for statement in &statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        log::info!("Installed schema ({} entity types)", schema.len());
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError> {
        let gate = Arc::clone(&self.writer).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx, _gate: gate }))
    }

    async fn reader(&self) -> Result<Box<dyn RecordReader>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteReader { tx }))
    }
}

/// Read-only snapshot; dropping it rolls the transaction back
struct SqliteReader {
    tx: Transaction<'static, Sqlite>,
}


#[async_trait]
impl RecordReader for SqliteReader {
    async fn fetch_by_keys(
        &mut self,
        entity: &EntityType,
        keys: &[RecordKey],
    ) -> Result<Vec<Instance>, StorageError> {
        fetch_where_in(&mut self.tx, entity, &entity.key_field, keys).await
    }

    async fn fetch_referencing(
        &mut self,
        entity: &EntityType,
        field: &str,
        keys: &[RecordKey],
    ) -> Result<Vec<Instance>, StorageError> {
        fetch_where_in(&mut self.tx, entity, field, keys).await
    }

    async fn count(&mut self, entity: &EntityType) -> Result<u64, StorageError> {
        count_rows(&mut self.tx, entity).await
    }
}

/// Write transaction holding the writer gate until it finishes
struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

#[async_trait]
impl RecordReader for SqliteTransaction {
    async fn fetch_by_keys(
        &mut self,
        entity: &EntityType,
        keys: &[RecordKey],
    ) -> Result<Vec<Instance>, StorageError> {
        fetch_where_in(&mut self.tx, entity, &entity.key_field, keys).await
    }

    async fn fetch_referencing(
        &mut self,
        entity: &EntityType,
        field: &str,
        keys: &[RecordKey],
    ) -> Result<Vec<Instance>, StorageError> {
        fetch_where_in(&mut self.tx, entity, field, keys).await
    }

    async fn count(&mut self, entity: &EntityType) -> Result<u64, StorageError> {
        count_rows(&mut self.tx, entity).await
    }
}

#[async_trait]
impl StorageTransaction for SqliteTransaction {
    async fn insert_batch(
        &mut self,
        entity: &EntityType,
        records: &[Instance],
    ) -> Result<Vec<RecordKey>, StorageError> {
        let table = quote(&entity.name);
        let mut keys = Vec::with_capacity(records.len());

        for record in records {
            let columns: Vec<&str> = entity
                .column_names()
                .into_iter()
                .filter(|c| record.values.contains_key(*c))
                .collect();

            let mut names: Vec<String> = Vec::with_capacity(columns.len() + 1);
            if record.key.is_some() {
                names.push(quote(&entity.key_field));
            }
            names.extend(columns.iter().map(|c| quote(c)));

            let sql = if names.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", table)
            } else {
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    names.join(", "),
                    placeholders(names.len())
                )
            };

            let mut query = sqlx::query(&sql);
            if let Some(key) = record.key {
                query = query.bind(key);
            }
            for column in &columns {
                query = bind_value(query, entity, column, &record.values[*column])?;
            }

            let result = query.execute(&mut *self.tx).await?;
            keys.push(record.key.unwrap_or_else(|| result.last_insert_rowid()));
        }

        Ok(keys)
    }

    async fn update_batch(
        &mut self,
        entity: &EntityType,
        records: &[Instance],
        fields: &[String],
    ) -> Result<u64, StorageError> {
        let assignments: Vec<String> = fields.iter().map(|f| format!("{} = ?", quote(f))).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(&entity.name),
            assignments.join(", "),
            quote(&entity.key_field)
        );

        let mut written = 0;
        for record in records {
            let Some(key) = record.key else {
                return Err(StorageError::MissingValue {
                    entity: entity.name.clone(),
                    field: entity.key_field.clone(),
                });
            };

            let mut query = sqlx::query(&sql);
            for field in fields {
                let value = record.values.get(field).ok_or_else(|| StorageError::MissingValue {
                    entity: entity.name.clone(),
                    field: field.clone(),
                })?;
                query = bind_value(query, entity, field, value)?;
            }
            query = query.bind(key);

            written += query.execute(&mut *self.tx).await?.rows_affected();
        }

        Ok(written)
    }

    async fn delete_batch(
        &mut self,
        entity: &EntityType,
        keys: &[RecordKey],
    ) -> Result<u64, StorageError> {
        let mut removed = 0;
        for group in keys.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                quote(&entity.name),
                quote(&entity.key_field),
                placeholders(group.len())
            );
            let mut query = sqlx::query(&sql);
            for key in group {
                query = query.bind(*key);
            }
            removed += query.execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(removed)
    }

    fn as_reader(&mut self) -> &mut dyn RecordReader {
        self
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

/// Select full rows of `entity` whose `column` is one of `keys`
async fn fetch_where_in(
    conn: &mut SqliteConnection,
    entity: &EntityType,
    column: &str,
    keys: &[RecordKey],
) -> Result<Vec<Instance>, StorageError> {
    let columns = entity.column_names();
    let select_list: Vec<String> = std::iter::once(entity.key_field.as_str())
        .chain(columns.iter().copied())
        .map(quote)
        .collect();

    let mut instances = Vec::new();
    for group in keys.chunks(MAX_IN_PARAMS) {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN ({})",
            select_list.join(", "),
            quote(&entity.name),
            quote(column),
            placeholders(group.len())
        );
        let mut query = sqlx::query(&sql);
        for key in group {
            query = query.bind(*key);
        }

        let rows = query.fetch_all(&mut *conn).await?;
        for row in &rows {
            instances.push(decode_row(row, entity, &columns)?);
        }
    }

    instances.sort_by_key(|i| i.key);
    Ok(instances)
}

async fn count_rows(conn: &mut SqliteConnection, entity: &EntityType) -> Result<u64, StorageError> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote(&entity.name));
    let row = sqlx::query(&sql).fetch_one(&mut *conn).await?;
    let count: i64 = row.try_get(0)?;
    Ok(count as u64)
}

fn decode_row(row: &SqliteRow, entity: &EntityType, columns: &[&str]) -> Result<Instance, StorageError> {
    let decode_err = |field: &str, err: sqlx::Error| StorageError::Decode {
        entity: entity.name.clone(),
        field: field.to_string(),
        message: err.to_string(),
    };

    let key: i64 = row.try_get(0).map_err(|e| decode_err(&entity.key_field, e))?;
    let mut instance = Instance::with_key(key);

    for (offset, column) in columns.iter().enumerate() {
        let idx = offset + 1;
        let kind = entity.column_kind(column).unwrap_or(FieldKind::Text);
        let value = match kind {
            FieldKind::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .map(Value::from),
            FieldKind::Real => row.try_get::<Option<f64>, _>(idx).map(Value::from),
            FieldKind::Text => row.try_get::<Option<String>, _>(idx).map(Value::from),
            FieldKind::Boolean => row.try_get::<Option<bool>, _>(idx).map(Value::from),
        }
        .map_err(|e| decode_err(column, e))?;
        instance.insert(*column, value);
    }

    Ok(instance)
}

/// Bind one value after checking it fits the column kind
fn bind_value<'q>(
    query: SqliteQuery<'q>,
    entity: &EntityType,
    field: &str,
    value: &Value,
) -> Result<SqliteQuery<'q>, StorageError> {
    let kind = entity.column_kind(field).unwrap_or(FieldKind::Text);
    let mismatch = || StorageError::TypeMismatch {
        entity: entity.name.clone(),
        field: field.to_string(),
        found: value.type_name(),
    };

    let query = match (kind, value) {
        (_, Value::Null) => query.bind(None::<i64>),
        (FieldKind::Text, Value::String(s)) => query.bind(s.clone()),
        (FieldKind::Integer, Value::Int(i)) => query.bind(*i),
        (FieldKind::Integer, Value::Bool(b)) => query.bind(i64::from(*b)),
        (FieldKind::Real, Value::Float(f)) => query.bind(*f),
        (FieldKind::Real, Value::Int(i)) => query.bind(*i as f64),
        (FieldKind::Boolean, Value::Bool(b)) => query.bind(*b),
        (FieldKind::Boolean, Value::Int(i)) => query.bind(*i != 0),
        _ => return Err(mismatch()),
    };
    Ok(query)
}

/// CREATE TABLE / CREATE INDEX statements for every entity in `schema`
pub fn ddl_statements(schema: &Schema) -> Vec<String> {
    let mut statements = Vec::new();

    for entity in schema.entities() {
        let mut columns = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote(&entity.key_field)
        )];

        for field in &entity.fields {
            let mut column = format!("{} {}", quote(&field.name), field.kind.sql_type());
            if !field.nullable {
                column.push_str(" NOT NULL");
            }
            columns.push(column);
        }

        for reference in &entity.references {
            let target_key = schema
                .entity(&reference.target)
                .map(|t| t.key_field.clone())
                .unwrap_or_else(|| "id".to_string());
            let mut column = format!("{} INTEGER", quote(&reference.field));
            if !reference.nullable {
                column.push_str(" NOT NULL");
            }
            column.push_str(&format!(
                " REFERENCES {}({}) {}",
                quote(&reference.target),
                quote(&target_key),
                reference.on_delete.sql_clause()
            ));
            columns.push(column);
        }

        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&entity.name),
            columns.join(", ")
        ));

        for reference in &entity.references {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("idx_{}_{}", entity.name, reference.field)),
                quote(&entity.name),
                quote(&reference.field)
            ));
        }
    }

    statements
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
