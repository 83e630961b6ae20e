//! Relation definitions between entities.

use serde::{Deserialize, Serialize};

/// Cardinality of a relation, seen from the owning side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// Many owners may reference one target.
    ManyToOne,
    /// At most one owner per target.
    OneToOne,
}

/// A directional association from an owning entity's reference field to a
/// target entity's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation name (unique within the catalog).
    pub name: String,
    /// Owning entity name.
    pub from_entity: String,
    /// Reference field on the owning entity (foreign key).
    pub from_field: String,
    /// Target entity name.
    pub to_entity: String,
    /// Field on the target entity (its identity).
    pub to_field: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Name of the derived collection on the target, if exposed.
    pub inverse: Option<String>,
}

impl RelationDef {
    /// Create a many-to-one relation.
    pub fn many_to_one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            from_field: from_field.into(),
            to_entity: to_entity.into(),
            to_field: to_field.into(),
            cardinality: Cardinality::ManyToOne,
            inverse: None,
        }
    }

    /// Create a one-to-one relation.
    pub fn one_to_one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::OneToOne,
            ..Self::many_to_one(name, from_entity, from_field, to_entity, to_field)
        }
    }

    /// Expose the derived collection on the target under `name`.
    pub fn with_inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }
}
