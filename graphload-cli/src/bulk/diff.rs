//! Record diff logic for comparing two collections of one entity type
//!
//! Records are matched by a `DiffKey`: saved records by their key alone,
//! unsaved records by the values of the comparison fields. Matching is
//! shallow; two records with the same `DiffKey` count as the same logical
//! record regardless of their other values.

use std::collections::HashSet;

use super::error::{BulkError, Result};
use crate::metadata::{EntityType, FieldKind, MetadataProvider};
use crate::records::{Instance, RecordKey, RecordSet, Value};

/// Identity used to pair records across the two collections
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiffKey {
    /// Saved record, identified by its key
    Identified(RecordKey),
    /// Unsaved record, identified by comparison field values in field order
    Unidentified(Vec<Value>),
}

impl DiffKey {
    /// Missing comparison values count as `Null`; values are read as the
    /// column kind declared for their field
    pub fn of(instance: &Instance, entity: &EntityType, fields: &[String]) -> Self {
        match instance.key {
            Some(key) => DiffKey::Identified(key),
            None => DiffKey::Unidentified(
                fields
                    .iter()
                    .map(|f| {
                        let value = instance.get(f).cloned().unwrap_or(Value::Null);
                        match entity.column_kind(f) {
                            Some(kind) => normalize(kind, value),
                            None => value,
                        }
                    })
                    .collect(),
            ),
        }
    }
}

/// Coerce a value to the representation its column stores
fn normalize(kind: FieldKind, value: Value) -> Value {
    match (kind, value) {
        (FieldKind::Real, Value::Int(i)) => Value::Float(i as f64),
        (FieldKind::Integer, Value::Float(f)) if f.is_finite() && f.fract() == 0.0 => {
            Value::Int(f as i64)
        }
        (FieldKind::Boolean, Value::Int(0)) => Value::Bool(false),
        (FieldKind::Boolean, Value::Int(1)) => Value::Bool(true),
        (_, value) => value,
    }
}

/// Four-way partition of two record collections
///
/// Entries borrow from the compared collections and keep their input order.
#[derive(Debug, Default)]
pub struct RecordDiff<'a> {
    pub only_in_first: Vec<&'a Instance>,
    pub only_in_second: Vec<&'a Instance>,
    pub matched_first: Vec<&'a Instance>,
    pub matched_second: Vec<&'a Instance>,
}

impl RecordDiff<'_> {
    /// No records exclusive to either side
    pub fn is_identical(&self) -> bool {
        self.only_in_first.is_empty() && self.only_in_second.is_empty()
    }
}

/// Partition `first` and `second` by `DiffKey` membership
pub fn diff_records<'a>(
    metadata: &dyn MetadataProvider,
    first: &'a RecordSet,
    second: &'a RecordSet,
    fields: &[String],
) -> Result<RecordDiff<'a>> {
    if first.entity != second.entity {
        return Err(BulkError::validation(format!(
            "cannot compare {} records with {} records",
            first.entity, second.entity
        )));
    }

    let entity = metadata
        .entity(&first.entity)
        .ok_or_else(|| BulkError::UnknownEntity(first.entity.clone()))?;

    if let Some(unknown) = fields.iter().find(|f| !entity.has_column(f)) {
        return Err(BulkError::validation(format!(
            "'{}' is not a field of {}",
            unknown, entity.name
        )));
    }

    let has_unsaved = first
        .records
        .iter()
        .chain(second.records.iter())
        .any(|r| !r.is_saved());
    if fields.is_empty() && has_unsaved {
        return Err(BulkError::validation(
            "comparison fields are required when unsaved records are present",
        ));
    }

    let first_keys: HashSet<DiffKey> = first.records.iter().map(|r| DiffKey::of(r, &entity, fields)).collect();
    let second_keys: HashSet<DiffKey> = second.records.iter().map(|r| DiffKey::of(r, &entity, fields)).collect();

    let mut diff = RecordDiff::default();

    for record in &first.records {
        if second_keys.contains(&DiffKey::of(record, &entity, fields)) {
            diff.matched_first.push(record);
        } else {
            diff.only_in_first.push(record);
        }
    }

    for record in &second.records {
        if first_keys.contains(&DiffKey::of(record, &entity, fields)) {
            diff.matched_second.push(record);
        } else {
            diff.only_in_second.push(record);
        }
    }

    log::debug!(
        "Diff {}: {} only in first, {} only in second, {}/{} matched",
        entity.name,
        diff.only_in_first.len(),
        diff.only_in_second.len(),
        diff.matched_first.len(),
        diff.matched_second.len()
    );

    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldDef, Schema};

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntityType::new("author")
                    .field(FieldDef::new("name", FieldKind::Text))
                    .field(FieldDef::new("born", FieldKind::Integer)),
            )
            .entity(EntityType::new("book").field(FieldDef::new("title", FieldKind::Text)))
            .entity(
                EntityType::new("review")
                    .field(FieldDef::new("body", FieldKind::Text))
                    .field(FieldDef::new("rating", FieldKind::Real))
                    .field(FieldDef::new("featured", FieldKind::Boolean)),
            )
            .build()
            .unwrap()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_keys_match_fully() {
        let schema = schema();
        let first = RecordSet::new(
            "author",
            vec![Instance::with_key(1), Instance::with_key(2)],
        );
        let second = RecordSet::new(
            "author",
            vec![
                Instance::with_key(2).set("name", "changed"),
                Instance::with_key(1),
            ],
        );

        let diff = diff_records(&schema, &first, &second, &[]).unwrap();
        assert!(diff.is_identical());
        assert_eq!(diff.matched_first.len(), 2);
        assert_eq!(diff.matched_second.len(), 2);
    }

    #[test]
    fn test_key_missing_from_second_is_only_in_first() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::with_key(1), Instance::with_key(9)]);
        let second = RecordSet::new("author", vec![Instance::with_key(1), Instance::with_key(3)]);

        let diff = diff_records(&schema, &first, &second, &[]).unwrap();
        assert_eq!(diff.only_in_first.len(), 1);
        assert_eq!(diff.only_in_first[0].key, Some(9));
        assert_eq!(diff.only_in_second[0].key, Some(3));
    }

    #[test]
    fn test_unsaved_records_compare_by_content() {
        let schema = schema();
        let first = RecordSet::new(
            "author",
            vec![
                Instance::new().set("name", "Ada").set("born", 1815i64),
                Instance::new().set("name", "Grace").set("born", 1906i64),
            ],
        );
        let second = RecordSet::new(
            "author",
            vec![Instance::new().set("name", "Ada").set("born", 1815i64)],
        );

        let diff = diff_records(&schema, &first, &second, &fields(&["name", "born"])).unwrap();
        assert_eq!(diff.matched_first.len(), 1);
        assert_eq!(diff.only_in_first.len(), 1);
        assert_eq!(diff.only_in_first[0].get("name"), Some(&Value::from("Grace")));
        assert!(diff.only_in_second.is_empty());
    }

    #[test]
    fn test_shallow_match_ignores_other_fields() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::new().set("name", "Ada").set("born", 1i64)]);
        let second = RecordSet::new("author", vec![Instance::new().set("name", "Ada").set("born", 2i64)]);

        let diff = diff_records(&schema, &first, &second, &fields(&["name"])).unwrap();
        assert!(diff.is_identical());
    }

    #[test]
    fn test_missing_value_equals_null() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::new().set("name", "Ada")]);
        let second = RecordSet::new("author", vec![Instance::new().set("name", "Ada").set("born", Value::Null)]);

        let diff = diff_records(&schema, &first, &second, &fields(&["name", "born"])).unwrap();
        assert!(diff.is_identical());
    }

    #[test]
    fn test_numbers_compare_by_column_kind() {
        let schema = schema();
        let first = RecordSet::new(
            "review",
            vec![
                Instance::new().set("body", "x").set("rating", 4i64).set("featured", 1i64),
                Instance::new().set("body", "y").set("rating", 3i64),
            ],
        );
        let second = RecordSet::new(
            "review",
            vec![
                Instance::new().set("body", "x").set("rating", 4.0).set("featured", true),
                Instance::new().set("body", "y").set("rating", 3.5),
            ],
        );

        let diff = diff_records(&schema, &first, &second, &fields(&["body", "rating", "featured"])).unwrap();
        assert_eq!(diff.matched_first.len(), 1);
        assert_eq!(diff.matched_second.len(), 1);
        assert_eq!(diff.only_in_first[0].get("body"), Some(&Value::from("y")));
        assert_eq!(diff.only_in_second[0].get("body"), Some(&Value::from("y")));
    }

    #[test]
    fn test_integer_column_accepts_whole_floats() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::new().set("name", "Ada").set("born", 1815i64)]);
        let second = RecordSet::new("author", vec![Instance::new().set("name", "Ada").set("born", 1815.0)]);

        let diff = diff_records(&schema, &first, &second, &fields(&["name", "born"])).unwrap();
        assert!(diff.is_identical());
    }

    #[test]
    fn test_saved_and_unsaved_never_match() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::with_key(1).set("name", "Ada")]);
        let second = RecordSet::new("author", vec![Instance::new().set("name", "Ada")]);

        let diff = diff_records(&schema, &first, &second, &fields(&["name"])).unwrap();
        assert_eq!(diff.only_in_first.len(), 1);
        assert_eq!(diff.only_in_second.len(), 1);
    }

    #[test]
    fn test_duplicates_each_classified() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::with_key(1), Instance::with_key(1)]);
        let second = RecordSet::new("author", vec![Instance::with_key(1)]);

        let diff = diff_records(&schema, &first, &second, &[]).unwrap();
        assert_eq!(diff.matched_first.len(), 2);
        assert_eq!(diff.matched_second.len(), 1);
    }

    #[test]
    fn test_results_borrow_inputs() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::with_key(5)]);
        let second = RecordSet::new("author", vec![]);

        let diff = diff_records(&schema, &first, &second, &[]).unwrap();
        assert!(std::ptr::eq(diff.only_in_first[0], &first.records[0]));
    }

    #[test]
    fn test_entity_mismatch_rejected() {
        let schema = schema();
        let first = RecordSet::new("author", vec![]);
        let second = RecordSet::new("book", vec![]);

        let err = diff_records(&schema, &first, &second, &[]).unwrap_err();
        assert!(matches!(err, BulkError::Validation(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::with_key(1)]);
        let second = RecordSet::new("author", vec![]);

        let err = diff_records(&schema, &first, &second, &fields(&["title"])).unwrap_err();
        assert!(matches!(err, BulkError::Validation(_)));
    }

    #[test]
    fn test_empty_fields_with_unsaved_rejected() {
        let schema = schema();
        let first = RecordSet::new("author", vec![Instance::new().set("name", "Ada")]);
        let second = RecordSet::new("author", vec![]);

        let err = diff_records(&schema, &first, &second, &[]).unwrap_err();
        assert!(matches!(err, BulkError::Validation(_)));
    }
}
