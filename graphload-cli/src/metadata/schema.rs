//! Schema registry: the in-process metadata provider
//!
//! A `Schema` is built once (from code or a TOML file), validated, and then
//! answers reference queries for the graph builder and cascade collector.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::models::{CascadePolicy, EntityType, Reference, ReverseReference};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Supplies per-type reference descriptors
///
/// Implementations must be deterministic and free of side effects.
pub trait MetadataProvider: Send + Sync {
    /// Look up an entity type by name
    fn entity(&self, name: &str) -> Option<Arc<EntityType>>;

    /// Outgoing references of `name`, in declaration order
    fn references(&self, name: &str) -> Vec<Reference> {
        self.entity(name)
            .map(|e| e.references.clone())
            .unwrap_or_default()
    }

    /// References from other types (or itself) pointing at `name`
    fn reverse_references(&self, name: &str) -> Vec<ReverseReference>;
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("entity '{0}' is declared more than once")]
    DuplicateEntity(String),

    #[error("field '{field}' is declared more than once on '{entity}'")]
    DuplicateField { entity: String, field: String },

    #[error("field '{field}' on '{entity}' collides with the key field")]
    KeyCollision { entity: String, field: String },

    #[error("reference '{entity}.{field}' targets unknown entity '{target}'")]
    UnknownTarget {
        entity: String,
        field: String,
        target: String,
    },

    #[error("reference '{entity}.{field}' uses set null but is not nullable")]
    NonNullableSetNull { entity: String, field: String },

    #[error("failed to parse schema: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read schema file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntityType>,
}

/// Validated set of entity types
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: Vec<Arc<EntityType>>,
    index: HashMap<String, usize>,
    reverse: HashMap<String, Vec<ReverseReference>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parse and validate a TOML schema document
    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = toml::from_str(content)?;
        SchemaBuilder {
            entities: file.entities,
        }
        .build()
    }

    /// Load a TOML schema file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Entity types in declaration order
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl MetadataProvider for Schema {
    fn entity(&self, name: &str) -> Option<Arc<EntityType>> {
        self.index.get(name).map(|&i| Arc::clone(&self.entities[i]))
    }

    fn reverse_references(&self, name: &str) -> Vec<ReverseReference> {
        self.reverse.get(name).cloned().unwrap_or_default()
    }
}

/// Collects entity types and validates them into a `Schema`
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityType>,
}

impl SchemaBuilder {
    pub fn entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut index = HashMap::new();
        for (i, entity) in self.entities.iter().enumerate() {
            check_identifier(&entity.name)?;
            check_identifier(&entity.key_field)?;
            if index.insert(entity.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateEntity(entity.name.clone()));
            }
        }

        let mut reverse: HashMap<String, Vec<ReverseReference>> = HashMap::new();
        for entity in &self.entities {
            let mut seen = HashSet::new();
            for column in entity.column_names() {
                check_identifier(column)?;
                if column == entity.key_field {
                    return Err(SchemaError::KeyCollision {
                        entity: entity.name.clone(),
                        field: column.to_string(),
                    });
                }
                if !seen.insert(column) {
                    return Err(SchemaError::DuplicateField {
                        entity: entity.name.clone(),
                        field: column.to_string(),
                    });
                }
            }

            for reference in &entity.references {
                if !index.contains_key(&reference.target) {
                    return Err(SchemaError::UnknownTarget {
                        entity: entity.name.clone(),
                        field: reference.field.clone(),
                        target: reference.target.clone(),
                    });
                }
                if reference.on_delete == CascadePolicy::SetNull && !reference.nullable {
                    return Err(SchemaError::NonNullableSetNull {
                        entity: entity.name.clone(),
                        field: reference.field.clone(),
                    });
                }
                reverse
                    .entry(reference.target.clone())
                    .or_default()
                    .push(ReverseReference {
                        source: entity.name.clone(),
                        field: reference.field.clone(),
                        on_delete: reference.on_delete,
                    });
            }
        }

        Ok(Schema {
            entities: self.entities.into_iter().map(Arc::new).collect(),
            index,
            reverse,
        })
    }
}

fn check_identifier(name: &str) -> Result<(), SchemaError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::models::{FieldDef, FieldKind};

    const LIBRARY: &str = r#"
        [[entity]]
        name = "author"
        fields = [{ name = "name", kind = "text", nullable = false }]

        [[entity]]
        name = "book"
        fields = [{ name = "title", kind = "text" }]

        [[entity.reference]]
        field = "author_id"
        target = "author"
        on_delete = "cascade"
        nullable = false

        [[entity]]
        name = "review"
        fields = [{ name = "stars", kind = "integer" }]

        [[entity.reference]]
        field = "book_id"
        target = "book"
        on_delete = "cascade"

        [[entity.reference]]
        field = "editor_id"
        target = "author"
        on_delete = "set_null"
    "#;

    #[test]
    fn test_parse_toml_schema() {
        let schema = Schema::from_toml_str(LIBRARY).unwrap();
        assert_eq!(schema.len(), 3);

        let book = schema.entity("book").unwrap();
        assert_eq!(book.key_field, "id");
        assert_eq!(book.references.len(), 1);
        assert_eq!(book.references[0].on_delete, CascadePolicy::Cascade);
        assert!(!book.references[0].nullable);
    }

    #[test]
    fn test_reverse_references_follow_declaration_order() {
        let schema = Schema::from_toml_str(LIBRARY).unwrap();

        let into_author = schema.reverse_references("author");
        assert_eq!(into_author.len(), 2);
        assert_eq!(into_author[0].source, "book");
        assert_eq!(into_author[0].field, "author_id");
        assert_eq!(into_author[1].source, "review");
        assert_eq!(into_author[1].on_delete, CascadePolicy::SetNull);

        assert!(schema.reverse_references("review").is_empty());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let result = Schema::builder()
            .entity(EntityType::new("book").reference(Reference::new(
                "author_id",
                "author",
                CascadePolicy::Cascade,
            )))
            .build();
        assert!(matches!(result, Err(SchemaError::UnknownTarget { .. })));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let result = Schema::builder()
            .entity(EntityType::new("author"))
            .entity(EntityType::new("author"))
            .build();
        assert!(matches!(result, Err(SchemaError::DuplicateEntity(name)) if name == "author"));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let result = Schema::builder()
            .entity(EntityType::new("author").field(FieldDef::new("first name", FieldKind::Text)))
            .build();
        assert!(matches!(result, Err(SchemaError::InvalidIdentifier(_))));

        let result = Schema::builder().entity(EntityType::new("drop;table")).build();
        assert!(matches!(result, Err(SchemaError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_key_collision_rejected() {
        let result = Schema::builder()
            .entity(EntityType::new("author").field(FieldDef::new("id", FieldKind::Integer)))
            .build();
        assert!(matches!(result, Err(SchemaError::KeyCollision { .. })));
    }

    #[test]
    fn test_set_null_requires_nullable() {
        let result = Schema::builder()
            .entity(EntityType::new("author"))
            .entity(EntityType::new("book").reference(
                Reference::new("author_id", "author", CascadePolicy::SetNull).required(),
            ))
            .build();
        assert!(matches!(result, Err(SchemaError::NonNullableSetNull { .. })));
    }

    #[test]
    fn test_self_reference_is_reverse_reference() {
        let schema = Schema::builder()
            .entity(EntityType::new("category").reference(Reference::new(
                "parent_id",
                "category",
                CascadePolicy::Cascade,
            )))
            .build()
            .unwrap();

        let reverse = schema.reverse_references("category");
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].source, "category");
    }
}
