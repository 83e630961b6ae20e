//! Entity catalog for QDSL.
//!
//! The catalog stores entity, field, and relation definitions. It is built
//! once, then frozen and shared read-only by query builders and stores.

mod catalog;
mod entity;
mod field;
mod relation;
mod schema;
mod types;

pub use catalog::{Catalog, SharedCatalog};
pub use entity::EntityDef;
pub use field::FieldDef;
pub use relation::{Cardinality, RelationDef};
pub use schema::SchemaBundle;
pub use types::{FieldType, ScalarType};
