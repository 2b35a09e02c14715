//! Record instances and per-type record sets

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::{RecordRef, Value};

/// Identity key assigned by storage on insert
pub type RecordKey = i64;

/// One record of an entity type
///
/// An instance without a key is unsaved; create assigns the key once the
/// chunk holding the instance has committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub key: Option<RecordKey>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl Instance {
    /// New unsaved instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance that already exists in storage
    pub fn with_key(key: RecordKey) -> Self {
        Self {
            key: Some(key),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style setter
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn is_saved(&self) -> bool {
        self.key.is_some()
    }

    /// Unresolved references held by this instance, with their field names
    pub fn pending_refs(&self) -> impl Iterator<Item = (&str, &RecordRef)> {
        self.values
            .iter()
            .filter_map(|(field, value)| value.as_record_ref().map(|r| (field.as_str(), r)))
    }

    pub fn has_pending_refs(&self) -> bool {
        self.values.values().any(Value::is_ref)
    }
}

/// Records of one entity type, as supplied to a bulk call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub entity: String,
    #[serde(default)]
    pub records: Vec<Instance>,
}

impl RecordSet {
    pub fn new(entity: impl Into<String>, records: Vec<Instance>) -> Self {
        Self {
            entity: entity.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keys of all saved records, in order
    pub fn keys(&self) -> Vec<RecordKey> {
        self.records.iter().filter_map(|r| r.key).collect()
    }
}
