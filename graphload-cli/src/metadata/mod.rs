//! Entity metadata: types, fields, references, and the provider interface

pub mod models;
pub mod schema;

pub use models::{CascadePolicy, EntityType, FieldDef, FieldKind, Reference, ReverseReference};
pub use schema::{MetadataProvider, Schema, SchemaBuilder, SchemaError};
