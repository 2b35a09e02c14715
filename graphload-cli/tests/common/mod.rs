#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use graphload::bulk::{BulkExecutor, Orchestrator};
use graphload::config::BulkConfig;
use graphload::metadata::{
    CascadePolicy, EntityType, FieldDef, FieldKind, MetadataProvider, Reference, Schema,
};
use graphload::records::{Instance, RecordRef, RecordSet};
use graphload::storage::{SqliteOptions, SqliteStore, Storage};

/// Temporary database with a library schema installed
pub struct Fixture {
    pub dir: TempDir,
    pub schema: Arc<Schema>,
    pub store: SqliteStore,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_schema(library_schema()).await
    }

    pub async fn with_schema(schema: Schema) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("test.db"), SqliteOptions::default())
            .await
            .unwrap();
        store.install_schema(&schema).await.unwrap();
        Self {
            dir,
            schema: Arc::new(schema),
            store,
        }
    }

    pub fn executor(&self, config: BulkConfig) -> BulkExecutor {
        BulkExecutor::new(Arc::new(self.store.clone()), self.schema.clone(), config)
    }

    pub fn orchestrator(&self, config: BulkConfig) -> Orchestrator {
        Orchestrator::new(self.executor(config))
    }

    pub async fn count(&self, entity: &str) -> u64 {
        let entity_type = self.schema.entity(entity).unwrap();
        let mut reader = self.store.reader().await.unwrap();
        reader.count(&entity_type).await.unwrap()
    }

    pub async fn fetch(&self, entity: &str, keys: &[i64]) -> Vec<Instance> {
        let entity_type = self.schema.entity(entity).unwrap();
        let mut reader = self.store.reader().await.unwrap();
        reader.fetch_by_keys(&entity_type, keys).await.unwrap()
    }

    pub async fn counts(&self) -> Vec<(String, u64)> {
        let mut counts = Vec::new();
        for name in ["author", "book", "review", "note", "award"] {
            if self.schema.entity(name).is_some() {
                counts.push((name.to_string(), self.count(name).await));
            }
        }
        counts
    }
}

/// author <- book <- review, all cascading
pub fn library_schema() -> Schema {
    Schema::builder()
        .entity(EntityType::new("author").field(FieldDef::new("name", FieldKind::Text).required()))
        .entity(
            EntityType::new("book")
                .field(FieldDef::new("title", FieldKind::Text).required())
                .field(FieldDef::new("pages", FieldKind::Integer))
                .reference(Reference::new("author_id", "author", CascadePolicy::Cascade).required()),
        )
        .entity(
            EntityType::new("review")
                .field(FieldDef::new("body", FieldKind::Text))
                .field(FieldDef::new("rating", FieldKind::Real))
                .reference(Reference::new("book_id", "book", CascadePolicy::Cascade).required()),
        )
        .build()
        .unwrap()
}

/// Library schema plus a nulling and a restricting reference to author
pub fn guarded_schema() -> Schema {
    Schema::builder()
        .entity(EntityType::new("author").field(FieldDef::new("name", FieldKind::Text).required()))
        .entity(
            EntityType::new("book")
                .field(FieldDef::new("title", FieldKind::Text).required())
                .reference(Reference::new("author_id", "author", CascadePolicy::Cascade).required()),
        )
        .entity(
            EntityType::new("note")
                .field(FieldDef::new("text", FieldKind::Text))
                .reference(Reference::new("author_id", "author", CascadePolicy::SetNull)),
        )
        .entity(
            EntityType::new("award")
                .field(FieldDef::new("title", FieldKind::Text))
                .reference(Reference::new("author_id", "author", CascadePolicy::Restrict).required()),
        )
        .build()
        .unwrap()
}

pub fn authors(n: usize) -> Vec<Instance> {
    (0..n)
        .map(|i| Instance::new().set("name", format!("Author {}", i)))
        .collect()
}

/// 3 authors, 10 books, 20 reviews linked by refs, listed dependents first
pub fn library_sets() -> Vec<RecordSet> {
    let books = (0..10)
        .map(|i| {
            Instance::new()
                .set("title", format!("Book {}", i))
                .set("pages", 100 + i as i64)
                .set("author_id", RecordRef::new("author", i % 3))
        })
        .collect();
    let reviews = (0..20)
        .map(|i| {
            Instance::new()
                .set("body", format!("Review {}", i))
                .set("rating", 3.5)
                .set("book_id", RecordRef::new("book", i % 10))
        })
        .collect();

    vec![
        RecordSet::new("review", reviews),
        RecordSet::new("book", books),
        RecordSet::new("author", authors(3)),
    ]
}
