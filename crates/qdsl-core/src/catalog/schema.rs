//! Schema bundle - a declarative snapshot of entities and relations.

use super::{EntityDef, RelationDef};
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Entities and relations supplied together, typically by an external loader.
///
/// Order is preserved: entities are registered first, in declaration order,
/// then relations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Entity definitions.
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    /// Relation definitions.
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity to the schema.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add a relation to the schema.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Serialize the bundle to JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self)
            .map_err(|e| qdsl_proto::Error::Serialization(e.to_string()).into())
    }

    /// Deserialize a bundle from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|e| qdsl_proto::Error::Deserialization(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, FieldType, ScalarType};

    fn sample_schema() -> SchemaBundle {
        let team = EntityDef::new("Team", "id")
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)));

        let member = EntityDef::new("Member", "id")
            .with_field(FieldDef::new("username", FieldType::scalar(ScalarType::String)))
            .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
            .with_field(FieldDef::reference("team", "Team"));

        SchemaBundle::new()
            .with_entity(team)
            .with_entity(member)
            .with_relation(
                RelationDef::many_to_one("member_team", "Member", "team", "Team", "id")
                    .with_inverse("members"),
            )
    }

    #[test]
    fn test_schema_bundle_json() {
        let schema = sample_schema();
        let json = schema.to_json().unwrap();
        let decoded = SchemaBundle::from_json(&json).unwrap();

        assert_eq!(schema, decoded);
        assert!(decoded.get_entity("Member").is_some());
        assert!(decoded.get_entity("Post").is_none());
    }

    #[test]
    fn test_schema_bundle_bad_json() {
        let err = SchemaBundle::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
