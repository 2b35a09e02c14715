//! JSON input and output of record sets
//!
//! Files hold an array of record sets in input order:
//! `[{"entity": "author", "records": [{"key": null, "values": {...}}]}]`.
//! A value of the form `{"$ref": {"entity": "author", "index": 0}}` refers
//! to another record of the same file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use graphload::records::{Instance, RecordKey, RecordSet, Value};

#[derive(Debug, Serialize, Deserialize)]
struct RecordSetJson {
    entity: String,
    #[serde(default)]
    records: Vec<RecordJson>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordJson {
    #[serde(default)]
    key: Option<RecordKey>,
    #[serde(default)]
    values: serde_json::Map<String, serde_json::Value>,
}

pub fn parse_record_sets(text: &str) -> Result<Vec<RecordSet>> {
    let sets: Vec<RecordSetJson> = serde_json::from_str(text).context("Failed to parse record sets")?;

    Ok(sets
        .into_iter()
        .map(|set| {
            let records = set
                .records
                .into_iter()
                .map(|record| {
                    let mut instance = match record.key {
                        Some(key) => Instance::with_key(key),
                        None => Instance::new(),
                    };
                    for (field, value) in &record.values {
                        instance.insert(field.clone(), Value::from_json(value));
                    }
                    instance
                })
                .collect();
            RecordSet::new(set.entity, records)
        })
        .collect())
}

pub fn load_record_sets(path: &Path) -> Result<Vec<RecordSet>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    parse_record_sets(&text).with_context(|| format!("Invalid input file: {}", path.display()))
}

pub fn record_sets_to_json<'a>(
    sets: impl IntoIterator<Item = (&'a str, &'a [Instance])>,
) -> serde_json::Value {
    let sets: Vec<serde_json::Value> = sets
        .into_iter()
        .map(|(entity, records)| {
            let records: Vec<serde_json::Value> = records
                .iter()
                .map(|r| {
                    let values: serde_json::Map<String, serde_json::Value> = r
                        .values
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect();
                    serde_json::json!({ "key": r.key, "values": values })
                })
                .collect();
            serde_json::json!({ "entity": entity, "records": records })
        })
        .collect();
    serde_json::Value::Array(sets)
}
