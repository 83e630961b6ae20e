//! Catalog of registered entities and relations.

use std::collections::HashMap;
use std::sync::Arc;

use super::{EntityDef, FieldType, RelationDef, SchemaBundle};
use crate::error::Error;
use crate::query::EntityPath;

/// A catalog frozen for sharing across builders and stores.
pub type SharedCatalog = Arc<Catalog>;

/// Registry of entity and relation definitions.
///
/// Built single-threaded through `register_*`, then frozen into a
/// [`SharedCatalog`]. There is no removal operation.
#[derive(Debug, Default)]
pub struct Catalog {
    entities: Vec<Arc<EntityDef>>,
    by_name: HashMap<String, usize>,
    relations: Vec<RelationDef>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a schema bundle.
    pub fn from_bundle(bundle: SchemaBundle) -> Result<Self, Error> {
        let mut catalog = Self::new();
        for entity in bundle.entities {
            catalog.register_entity(entity)?;
        }
        for relation in bundle.relations {
            catalog.register_relation(relation)?;
        }
        Ok(catalog)
    }

    /// Register an entity.
    pub fn register_entity(&mut self, entity: EntityDef) -> Result<(), Error> {
        if self.by_name.contains_key(&entity.name) {
            return Err(Error::DuplicateEntity(entity.name));
        }
        entity.validate()?;

        tracing::debug!(entity = %entity.name, fields = entity.fields.len(), "registered entity");
        self.by_name.insert(entity.name.clone(), self.entities.len());
        self.entities.push(Arc::new(entity));
        Ok(())
    }

    /// Register a relation between two registered entities.
    pub fn register_relation(&mut self, relation: RelationDef) -> Result<(), Error> {
        let owner = self.resolve(&relation.from_entity)?;
        let target = self.resolve(&relation.to_entity)?;

        let field = owner
            .get_field(&relation.from_field)
            .ok_or_else(|| Error::UnknownField {
                entity: owner.name.clone(),
                field: relation.from_field.clone(),
            })?;
        match &field.field_type {
            FieldType::Reference { entity } if *entity == target.name => {}
            other => {
                return Err(Error::InvalidSchema(format!(
                    "{}.{} must be a reference to {}, found {:?}",
                    owner.name, field.name, target.name, other
                )))
            }
        }

        if target.get_field(&relation.to_field).is_none() {
            return Err(Error::UnknownField {
                entity: target.name.clone(),
                field: relation.to_field.clone(),
            });
        }
        if relation.to_field != target.identity_field {
            return Err(Error::InvalidSchema(format!(
                "relation {} must target the identity of {}",
                relation.name, target.name
            )));
        }

        if self
            .relations
            .iter()
            .any(|r| r.from_entity == relation.from_entity && r.from_field == relation.from_field)
        {
            return Err(Error::DuplicateRelation {
                entity: relation.from_entity,
                field: relation.from_field,
            });
        }
        if self.relations.iter().any(|r| r.name == relation.name) {
            return Err(Error::InvalidSchema(format!(
                "relation name {} is already used",
                relation.name
            )));
        }

        if let Some(inverse) = &relation.inverse {
            let clashes_with_field = target.get_field(inverse).is_some();
            let clashes_with_inverse = self.inverse_of(&target.name, inverse).is_some();
            if clashes_with_field || clashes_with_inverse {
                return Err(Error::InvalidSchema(format!(
                    "collection {}.{} is already defined",
                    target.name, inverse
                )));
            }
        }

        tracing::debug!(
            relation = %relation.name,
            from = %relation.from_entity,
            to = %relation.to_entity,
            "registered relation"
        );
        self.relations.push(relation);
        Ok(())
    }

    /// Resolve an entity by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<EntityDef>, Error> {
        self.by_name
            .get(name)
            .map(|&idx| Arc::clone(&self.entities[idx]))
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Check whether an entity is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.iter()
    }

    /// All registered relations.
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Relation owned by `entity.field`, if any.
    pub fn relation_for(&self, entity: &str, field: &str) -> Option<&RelationDef> {
        self.relations
            .iter()
            .find(|r| r.from_entity == entity && r.from_field == field)
    }

    /// Relations owned by an entity.
    pub fn relations_from(&self, entity: &str) -> Vec<&RelationDef> {
        self.relations
            .iter()
            .filter(|r| r.from_entity == entity)
            .collect()
    }

    /// Relation whose derived collection on `entity` is named `collection`.
    pub fn inverse_of(&self, entity: &str, collection: &str) -> Option<&RelationDef> {
        self.relations
            .iter()
            .find(|r| r.to_entity == entity && r.inverse.as_deref() == Some(collection))
    }

    /// Path over an entity under its default alias (name with a lowercase
    /// first letter).
    pub fn path(&self, entity: &str) -> Result<EntityPath, Error> {
        let mut chars = entity.chars();
        let alias = match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        };
        self.path_as(entity, alias)
    }

    /// Path over an entity under an explicit alias, for self-joins and
    /// subqueries.
    pub fn path_as(&self, entity: &str, alias: impl Into<String>) -> Result<EntityPath, Error> {
        let def = self.resolve(entity)?;
        let relations = self
            .relations_from(entity)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        Ok(EntityPath::new(alias, def, relations))
    }

    /// Freeze the catalog for sharing.
    pub fn freeze(self) -> SharedCatalog {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, ScalarType};

    fn team() -> EntityDef {
        EntityDef::new("Team", "id")
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
    }

    fn member() -> EntityDef {
        EntityDef::new("Member", "id")
            .with_field(FieldDef::new("username", FieldType::scalar(ScalarType::String)))
            .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
            .with_field(FieldDef::reference("team", "Team"))
    }

    fn member_team() -> RelationDef {
        RelationDef::many_to_one("member_team", "Member", "team", "Team", "id")
            .with_inverse("members")
    }

    #[test]
    fn test_register_and_resolve() {
        let mut catalog = Catalog::new();
        catalog.register_entity(team()).unwrap();
        catalog.register_entity(member()).unwrap();
        catalog.register_relation(member_team()).unwrap();

        assert_eq!(catalog.resolve("Member").unwrap().name, "Member");
        assert!(matches!(
            catalog.resolve("Post"),
            Err(Error::UnknownEntity(name)) if name == "Post"
        ));
        assert!(catalog.relation_for("Member", "team").is_some());
        assert_eq!(
            catalog.inverse_of("Team", "members").map(|r| r.name.as_str()),
            Some("member_team")
        );
        assert_eq!(catalog.entities().count(), 2);
    }

    #[test]
    fn test_duplicate_entity() {
        let mut catalog = Catalog::new();
        catalog.register_entity(team()).unwrap();
        assert!(matches!(
            catalog.register_entity(team()),
            Err(Error::DuplicateEntity(name)) if name == "Team"
        ));
    }

    #[test]
    fn test_relation_validation() {
        let mut catalog = Catalog::new();
        catalog.register_entity(member()).unwrap();

        // Target not registered yet
        assert!(matches!(
            catalog.register_relation(member_team()),
            Err(Error::UnknownEntity(_))
        ));

        catalog.register_entity(team()).unwrap();

        let bad_field = RelationDef::many_to_one("r", "Member", "club", "Team", "id");
        assert!(matches!(
            catalog.register_relation(bad_field),
            Err(Error::UnknownField { .. })
        ));

        let not_reference = RelationDef::many_to_one("r", "Member", "age", "Team", "id");
        assert!(matches!(
            catalog.register_relation(not_reference),
            Err(Error::InvalidSchema(_))
        ));

        let not_identity = RelationDef::many_to_one("r", "Member", "team", "Team", "name");
        assert!(matches!(
            catalog.register_relation(not_identity),
            Err(Error::InvalidSchema(_))
        ));

        catalog.register_relation(member_team()).unwrap();
        let again = RelationDef::many_to_one("other", "Member", "team", "Team", "id");
        assert!(matches!(
            catalog.register_relation(again),
            Err(Error::DuplicateRelation { .. })
        ));
    }

    #[test]
    fn test_inverse_name_clash() {
        let mut catalog = Catalog::new();
        catalog.register_entity(team()).unwrap();
        catalog.register_entity(member()).unwrap();

        let clash = RelationDef::many_to_one("member_team", "Member", "team", "Team", "id")
            .with_inverse("name");
        assert!(matches!(
            catalog.register_relation(clash),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_from_bundle_and_paths() {
        let bundle = SchemaBundle::new()
            .with_entity(team())
            .with_entity(member())
            .with_relation(member_team());
        let catalog = Catalog::from_bundle(bundle).unwrap().freeze();

        let member = catalog.path("Member").unwrap();
        assert_eq!(member.alias(), "member");

        let sub = catalog.path_as("Member", "memberSub").unwrap();
        assert_eq!(sub.alias(), "memberSub");

        assert!(matches!(catalog.path("Post"), Err(Error::UnknownEntity(_))));
    }
}
