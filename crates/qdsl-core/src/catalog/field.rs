//! Field definitions for entities.

use super::types::{FieldType, ScalarType};
use serde::{Deserialize, Serialize};

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field data type.
    pub field_type: FieldType,
    /// Whether a value must be supplied on insert.
    pub required: bool,
}

impl FieldDef {
    /// Create a new field; required unless the type is nullable.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let required = !field_type.is_nullable();
        Self {
            name: name.into(),
            field_type,
            required,
        }
    }

    /// Create an optional scalar field.
    pub fn optional(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::OptionalScalar(scalar),
            required: false,
        }
    }

    /// Create a reference (foreign key) field.
    pub fn reference(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::reference(entity),
            required: false,
        }
    }

    /// Check if this is a reference field.
    pub fn is_reference(&self) -> bool {
        matches!(self.field_type, FieldType::Reference { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_follows_nullability() {
        let name = FieldDef::new("username", FieldType::scalar(ScalarType::String));
        assert!(name.required);

        let nick = FieldDef::new("nickname", FieldType::optional_scalar(ScalarType::String));
        assert!(!nick.required);

        let team = FieldDef::reference("team", "Team");
        assert!(!team.required);
        assert!(team.is_reference());
    }
}
