//! Entity definitions.

use std::collections::HashSet;

use super::field::FieldDef;
use super::types::{FieldType, ScalarType};
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// An entity definition (record type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within the catalog).
    pub name: String,
    /// Name of the identity field.
    pub identity_field: String,
    /// Field definitions in declaration order.
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    /// Create a new entity definition with an `Int64` identity field.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        let identity_field = identity_field.into();
        Self {
            name: name.into(),
            fields: vec![FieldDef::new(
                identity_field.clone(),
                FieldType::scalar(ScalarType::Int64),
            )],
            identity_field,
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of a field in declaration order.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Position of the identity field.
    pub fn identity_index(&self) -> Option<usize> {
        self.field_index(&self.identity_field)
    }

    /// Get the identity field definition.
    pub fn get_identity_field(&self) -> Option<&FieldDef> {
        self.get_field(&self.identity_field)
    }

    /// Reference fields in declaration order.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    /// Check field uniqueness and the identity field's type.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::InvalidSchema("entity name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate field {}.{}",
                    self.name, field.name
                )));
            }
        }

        match self.get_identity_field() {
            Some(field) if field.field_type == FieldType::Scalar(ScalarType::Int64) => Ok(()),
            Some(_) => Err(Error::InvalidSchema(format!(
                "identity field {}.{} must be a non-nullable int64",
                self.name, self.identity_field
            ))),
            None => Err(Error::InvalidSchema(format!(
                "identity field {}.{} is not declared",
                self.name, self.identity_field
            ))),
        }
    }
}
