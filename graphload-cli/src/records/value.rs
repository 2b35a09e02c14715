//! Field values carried by record instances

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Points at a record supplied earlier in the same multi-type call.
///
/// `index` is the position of the target record inside the `entity`
/// record set. The orchestrator swaps the reference for the target's key
/// once that type has been created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub entity: String,
    pub index: usize,
}

impl RecordRef {
    pub fn new(entity: impl Into<String>, index: usize) -> Self {
        Self {
            entity: entity.into(),
            index,
        }
    }
}

/// A single column value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Null/empty value
    Null,
    /// Text value
    String(String),
    /// Whole number
    Int(i64),
    /// Floating point
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Unresolved reference to a record created in the same call
    Ref(RecordRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_record_ref(&self) -> Option<&RecordRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Convert to plain JSON; references become `{"$ref": {...}}`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Ref(r) => serde_json::json!({ "$ref": { "entity": r.entity, "index": r.index } }),
        }
    }

    /// Parse from plain JSON
    ///
    /// Objects of the form `{"$ref": {"entity": .., "index": ..}}` become
    /// references; any other array or object is kept as its JSON text.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Object(map) => {
                if let Some(target) = map.get("$ref") {
                    if let Ok(r) = serde_json::from_value::<RecordRef>(target.clone()) {
                        return Value::Ref(r);
                    }
                }
                Value::String(json.to_string())
            }
            serde_json::Value::Array(_) => Value::String(json.to_string()),
        }
    }

    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Ref(_) => "ref",
        }
    }
}

// Floats compare by bit pattern so that Eq and Hash agree.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::String(s) => s.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Ref(r) => r.hash(state),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "(null)"),
            Value::String(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Ref(r) => write!(f, "$ref({}[{}])", r.entity, r.index),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<RecordRef> for Value {
    fn from(r: RecordRef) -> Self {
        Value::Ref(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_float_equality_follows_bits() {
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_variants_never_cross_compare() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::String("1".into()), Value::Int(1));
        assert_ne!(Value::Null, Value::Bool(false));
    }

    #[test]
    fn test_hash_set_dedups_equal_values() {
        let mut set = HashSet::new();
        set.insert(Value::from("a"));
        set.insert(Value::from("a"));
        set.insert(Value::Int(3));
        set.insert(Value::Float(3.0));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_serde_tagged_layout() {
        let json = serde_json::to_value(Value::Int(7)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Int", "value": 7}));

        let parsed: Value =
            serde_json::from_value(serde_json::json!({"type": "Ref", "value": {"entity": "author", "index": 2}}))
                .unwrap();
        assert_eq!(parsed, Value::Ref(RecordRef::new("author", 2)));

        let null: Value = serde_json::from_value(serde_json::json!({"type": "Null"})).unwrap();
        assert!(null.is_null());
    }

    #[test]
    fn test_plain_json_conversion() {
        let r = Value::from_json(&serde_json::json!({"$ref": {"entity": "book", "index": 4}}));
        assert_eq!(r, Value::Ref(RecordRef::new("book", 4)));
        assert_eq!(Value::from_json(&serde_json::json!(12)), Value::Int(12));
        assert_eq!(Value::from_json(&serde_json::json!(1.25)), Value::Float(1.25));
        assert_eq!(Value::from_json(&serde_json::json!([1, 2])), Value::String("[1,2]".into()));
        assert_eq!(Value::from_json(&r.to_json()), r);
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(4i64)), Value::Int(4));
    }
}
