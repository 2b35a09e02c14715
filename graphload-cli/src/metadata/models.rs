//! Entity type metadata models

use serde::{Deserialize, Serialize};

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Boolean,
}

impl FieldKind {
    /// SQL column type used when installing tables
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Integer => "INTEGER",
            FieldKind::Real => "REAL",
            FieldKind::Text => "TEXT",
            FieldKind::Boolean => "BOOLEAN",
        }
    }
}

/// What storage does to referencing rows when the referenced row goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Referencing rows are removed too
    Cascade,
    /// Referencing column is set to null
    SetNull,
    /// Removal fails while referencing rows exist
    #[default]
    Restrict,
    /// No action at delete time; the constraint is checked at commit
    DoNothing,
}

impl CascadePolicy {
    pub fn sql_clause(&self) -> &'static str {
        match self {
            CascadePolicy::Cascade => "ON DELETE CASCADE",
            CascadePolicy::SetNull => "ON DELETE SET NULL",
            CascadePolicy::Restrict => "ON DELETE RESTRICT",
            CascadePolicy::DoNothing => "ON DELETE NO ACTION DEFERRABLE INITIALLY DEFERRED",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CascadePolicy::Cascade => "cascade",
            CascadePolicy::SetNull => "set null",
            CascadePolicy::Restrict => "restrict",
            CascadePolicy::DoNothing => "no action",
        }
    }
}

/// Plain (non-reference) column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Outgoing reference: `field` on this type holds the key of a `target` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub field: String,
    pub target: String,
    #[serde(default)]
    pub on_delete: CascadePolicy,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

impl Reference {
    pub fn new(field: impl Into<String>, target: impl Into<String>, on_delete: CascadePolicy) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            on_delete,
            nullable: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Incoming reference: rows of `source` point at this type through `field`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseReference {
    pub source: String,
    pub field: String,
    pub on_delete: CascadePolicy,
}

/// A record kind with its identity key and reference metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default, rename = "reference")]
    pub references: Vec<Reference>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: default_key_field(),
            fields: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    pub fn key(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }

    /// All writable column names: plain fields then reference fields
    pub fn column_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.references.iter().map(|r| r.field.as_str()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name) || self.references.iter().any(|r| r.field == name)
    }

    /// Storage kind of a column; reference columns hold integer keys
    pub fn column_kind(&self, name: &str) -> Option<FieldKind> {
        if let Some(field) = self.fields.iter().find(|f| f.name == name) {
            return Some(field.kind);
        }
        self.references
            .iter()
            .find(|r| r.field == name)
            .map(|_| FieldKind::Integer)
    }

    pub fn reference_for(&self, field: &str) -> Option<&Reference> {
        self.references.iter().find(|r| r.field == field)
    }
}

fn default_true() -> bool {
    true
}

fn default_key_field() -> String {
    "id".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> EntityType {
        EntityType::new("book")
            .field(FieldDef::new("title", FieldKind::Text).required())
            .field(FieldDef::new("pages", FieldKind::Integer))
            .reference(Reference::new("author_id", "author", CascadePolicy::Cascade).required())
    }

    #[test]
    fn test_column_names_include_references() {
        assert_eq!(book().column_names(), vec!["title", "pages", "author_id"]);
    }

    #[test]
    fn test_column_kind() {
        let book = book();
        assert_eq!(book.column_kind("title"), Some(FieldKind::Text));
        assert_eq!(book.column_kind("author_id"), Some(FieldKind::Integer));
        assert_eq!(book.column_kind("missing"), None);
        assert!(!book.has_column("id"));
    }

    #[test]
    fn test_policy_defaults_to_restrict() {
        let reference: Reference = toml::from_str(
            r#"
            field = "owner_id"
            target = "user"
            "#,
        )
        .unwrap();
        assert_eq!(reference.on_delete, CascadePolicy::Restrict);
        assert!(reference.nullable);
    }
}
