//! In-memory entity store.
//!
//! The reference execution backend. Tables and the inverse index live under
//! one lock, so an owning-side write and its inverse update are observed
//! together, and each query runs against one consistent snapshot.

use parking_lot::RwLock;
use qdsl_proto::{EntityObject, ResultSet, Value};

use super::inverse::InverseIndex;
use super::record::EntityRecord;
use super::table::Tables;
use crate::catalog::{EntityDef, FieldType, SharedCatalog};
use crate::config::ExecutorConfig;
use crate::error::{Error, ExecutionError, Result};
use crate::query::{ExecutionAdapter, ExecutionPlan, QueryExecutor};

/// Field values for a record about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    entity: String,
    values: Vec<(String, Value)>,
}

impl NewRecord {
    /// Start a record of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            values: Vec::new(),
        }
    }

    /// Set a field. Reference fields take the target's identity.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((field.into(), value.into()));
        self
    }
}

struct StoreState {
    tables: Tables,
    inverse: InverseIndex,
    next_id: i64,
}

/// In-memory store implementing [`ExecutionAdapter`].
///
/// Identities are assigned from one sequence shared by all entities,
/// starting at 1.
pub struct MemoryStore {
    catalog: SharedCatalog,
    config: ExecutorConfig,
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create an empty store with the default executor configuration.
    pub fn new(catalog: SharedCatalog) -> Self {
        Self::with_config(catalog, ExecutorConfig::default())
    }

    /// Create an empty store.
    pub fn with_config(catalog: SharedCatalog, config: ExecutorConfig) -> Self {
        Self {
            catalog,
            config,
            state: RwLock::new(StoreState {
                tables: Tables::new(),
                inverse: InverseIndex::new(),
                next_id: 1,
            }),
        }
    }

    /// The catalog records are validated against.
    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Insert a record and return its assigned identity.
    ///
    /// Required fields must be present, values are coerced to the field's
    /// type, and referenced records must exist.
    pub fn insert(&self, record: NewRecord) -> Result<i64> {
        let def = self.catalog.resolve(&record.entity)?;
        let identity = identity_index(&def)?;

        let mut values = vec![Value::Null; def.fields.len()];
        for (field, value) in record.values {
            let index = field_index(&def, &field)?;
            if index == identity {
                return Err(invalid(&def, &field, "identity is assigned by the store"));
            }
            values[index] = check_value(&def, index, value)?;
        }
        for (index, field) in def.fields.iter().enumerate() {
            if index != identity && field.required && values[index].is_null() {
                return Err(invalid(&def, &field.name, "required field is missing"));
            }
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        for (index, field) in def.fields.iter().enumerate() {
            if let (FieldType::Reference { entity }, Some(target)) =
                (&field.field_type, values[index].as_i64())
            {
                if state.tables.get(entity, target).is_none() {
                    return Err(Error::RecordNotFound {
                        entity: entity.clone(),
                        id: target,
                    });
                }
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        values[identity] = Value::Int64(id);

        for (index, field) in def.fields.iter().enumerate() {
            if let Some(target) = values[index].as_i64().filter(|_| field.is_reference()) {
                if let Some(relation) = self.catalog.relation_for(&def.name, &field.name) {
                    state.inverse.add(&relation.name, target, id);
                }
            }
        }
        state.tables.table_mut(&def.name).insert(EntityRecord::new(id, values));

        tracing::debug!(entity = %def.name, id, "inserted record");
        Ok(id)
    }

    /// Set one field of an existing record.
    ///
    /// Changing a reference field reassigns the foreign key and moves the
    /// record between inverse collections in the same write.
    pub fn update(&self, entity: &str, id: i64, field: &str, value: impl Into<Value>) -> Result<()> {
        let def = self.catalog.resolve(entity)?;
        let index = field_index(&def, field)?;
        if index == identity_index(&def)? {
            return Err(invalid(&def, field, "identity is immutable"));
        }
        let value = check_value(&def, index, value.into())?;

        let mut guard = self.state.write();
        let state = &mut *guard;
        if let (FieldType::Reference { entity: target_entity }, Some(target)) =
            (&def.fields[index].field_type, value.as_i64())
        {
            if state.tables.get(target_entity, target).is_none() {
                return Err(Error::RecordNotFound {
                    entity: target_entity.clone(),
                    id: target,
                });
            }
        }

        let record = state
            .tables
            .get_mut(&def.name, id)
            .ok_or_else(|| Error::RecordNotFound {
                entity: def.name.clone(),
                id,
            })?;
        let previous = std::mem::replace(&mut record.values[index], value.clone());

        if let Some(relation) = self.catalog.relation_for(&def.name, field) {
            if let Some(old) = previous.as_i64() {
                state.inverse.remove(&relation.name, old, id);
            }
            if let Some(new) = value.as_i64() {
                state.inverse.add(&relation.name, new, id);
            }
        }

        tracing::debug!(entity = %def.name, id, field, "updated record");
        Ok(())
    }

    /// Point a reference field at another record, or clear it.
    pub fn change_reference(
        &self,
        entity: &str,
        id: i64,
        field: &str,
        target: Option<i64>,
    ) -> Result<()> {
        let def = self.catalog.resolve(entity)?;
        if !def.get_field(field).is_some_and(|f| f.is_reference()) {
            return Err(invalid(&def, field, "not a reference field"));
        }
        self.update(entity, id, field, target.map_or(Value::Null, Value::Int64))
    }

    /// Fetch one record as an entity object; references stay unloaded.
    pub fn get(&self, entity: &str, id: i64) -> Result<EntityObject> {
        let def = self.catalog.resolve(entity)?;
        let state = self.state.read();
        state
            .tables
            .get(&def.name, id)
            .map(|record| record.to_object(&def, |_, _| None))
            .ok_or_else(|| Error::RecordNotFound {
                entity: def.name.clone(),
                id,
            })
    }

    /// The derived collection `collection` of record `entity#id`, e.g. a
    /// team's members, in identity order.
    pub fn members(&self, entity: &str, id: i64, collection: &str) -> Result<Vec<EntityObject>> {
        let relation = self
            .catalog
            .inverse_of(entity, collection)
            .ok_or_else(|| Error::UnknownField {
                entity: entity.to_string(),
                field: collection.to_string(),
            })?;
        let owner = self.catalog.resolve(&relation.from_entity)?;

        let state = self.state.read();
        if state.tables.get(entity, id).is_none() {
            return Err(Error::RecordNotFound {
                entity: entity.to_string(),
                id,
            });
        }
        Ok(state
            .inverse
            .owners(&relation.name, id)
            .into_iter()
            .filter_map(|owner_id| state.tables.get(&owner.name, owner_id))
            .map(|record| record.to_object(&owner, |_, _| None))
            .collect())
    }

    /// Number of records of an entity.
    pub fn count(&self, entity: &str) -> usize {
        self.state
            .read()
            .tables
            .table(entity)
            .map_or(0, |table| table.len())
    }

    /// Check that the inverse index matches the owning references.
    pub fn verify_inverse_index(&self) -> bool {
        let state = self.state.read();
        InverseIndex::rebuild(&self.catalog, &state.tables) == state.inverse
    }
}

impl ExecutionAdapter for MemoryStore {
    fn execute(&self, plan: &ExecutionPlan) -> std::result::Result<ResultSet, ExecutionError> {
        let state = self.state.read();
        QueryExecutor::new(&state.tables, &self.config).execute(plan)
    }

    fn execute_count(&self, plan: &ExecutionPlan) -> std::result::Result<u64, ExecutionError> {
        let state = self.state.read();
        QueryExecutor::new(&state.tables, &self.config).execute_count(plan)
    }
}

fn identity_index(def: &EntityDef) -> Result<usize> {
    def.identity_index()
        .ok_or_else(|| Error::InvalidSchema(format!("{} has no identity field", def.name)))
}

fn field_index(def: &EntityDef, field: &str) -> Result<usize> {
    def.field_index(field).ok_or_else(|| Error::UnknownField {
        entity: def.name.clone(),
        field: field.to_string(),
    })
}

fn invalid(def: &EntityDef, field: &str, reason: impl Into<String>) -> Error {
    Error::InvalidValue {
        entity: def.name.clone(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn check_value(def: &EntityDef, index: usize, value: Value) -> Result<Value> {
    let field = &def.fields[index];
    if value.is_null() {
        return if field.required {
            Err(invalid(def, &field.name, "null for a required field"))
        } else {
            Ok(Value::Null)
        };
    }
    match &field.field_type {
        FieldType::Scalar(scalar) | FieldType::OptionalScalar(scalar) => {
            let found = value.type_name();
            scalar.coerce(value).ok_or_else(|| {
                invalid(def, &field.name, format!("cannot store {found} as {scalar:?}"))
            })
        }
        FieldType::Reference { entity } => value.as_i64().map(Value::Int64).ok_or_else(|| {
            invalid(
                def,
                &field.name,
                format!("reference to {entity} needs an integer identity"),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, FieldDef, RelationDef, ScalarType};
    use qdsl_proto::Reference;

    fn store() -> MemoryStore {
        let mut catalog = Catalog::new();
        catalog
            .register_entity(
                EntityDef::new("Team", "id")
                    .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String))),
            )
            .unwrap();
        catalog
            .register_entity(
                EntityDef::new("Member", "id")
                    .with_field(FieldDef::optional("username", ScalarType::String))
                    .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
                    .with_field(FieldDef::reference("team", "Team")),
            )
            .unwrap();
        catalog
            .register_relation(
                RelationDef::many_to_one("member_team", "Member", "team", "Team", "id")
                    .with_inverse("members"),
            )
            .unwrap();
        MemoryStore::new(catalog.freeze())
    }

    fn team(store: &MemoryStore, name: &str) -> i64 {
        store.insert(NewRecord::new("Team").with("name", name)).unwrap()
    }

    fn member(store: &MemoryStore, name: &str, age: i32, team: i64) -> i64 {
        store
            .insert(
                NewRecord::new("Member")
                    .with("username", name)
                    .with("age", age)
                    .with("team", team),
            )
            .unwrap()
    }

    fn usernames(objects: &[EntityObject]) -> Vec<&str> {
        objects.iter().filter_map(|o| o.get_str("username")).collect()
    }

    #[test]
    fn test_sequential_identities() {
        let store = store();
        let team_a = team(&store, "teamA");
        let team_b = team(&store, "teamB");
        let first = member(&store, "member1", 10, team_a);

        assert_eq!((team_a, team_b, first), (1, 2, 3));
        assert_eq!(store.count("Team"), 2);
        assert_eq!(store.count("Member"), 1);
    }

    #[test]
    fn test_insert_validation() {
        let store = store();
        let team_a = team(&store, "teamA");

        let missing_age = store.insert(NewRecord::new("Member").with("team", team_a));
        assert!(matches!(missing_age, Err(Error::InvalidValue { .. })));

        let bad_type = store.insert(NewRecord::new("Member").with("age", "ten"));
        assert!(matches!(bad_type, Err(Error::InvalidValue { .. })));

        let explicit_id = store.insert(NewRecord::new("Team").with("id", 99i64).with("name", "x"));
        assert!(matches!(explicit_id, Err(Error::InvalidValue { .. })));

        let dangling = store.insert(NewRecord::new("Member").with("age", 10).with("team", 42i64));
        assert!(matches!(
            dangling,
            Err(Error::RecordNotFound { id: 42, .. })
        ));

        let unknown = store.insert(NewRecord::new("Member").with("height", 180));
        assert!(matches!(unknown, Err(Error::UnknownField { .. })));

        // Failed inserts consume no identities.
        assert_eq!(team(&store, "teamB"), 2);
    }

    #[test]
    fn test_inverse_collection_follows_owner() {
        let store = store();
        let team_a = team(&store, "teamA");
        let team_b = team(&store, "teamB");
        let m1 = member(&store, "member1", 10, team_a);
        member(&store, "member2", 20, team_a);
        member(&store, "member3", 30, team_b);

        assert_eq!(
            usernames(&store.members("Team", team_a, "members").unwrap()),
            vec!["member1", "member2"]
        );

        store
            .change_reference("Member", m1, "team", Some(team_b))
            .unwrap();
        assert_eq!(
            usernames(&store.members("Team", team_a, "members").unwrap()),
            vec!["member2"]
        );
        assert_eq!(
            usernames(&store.members("Team", team_b, "members").unwrap()),
            vec!["member1", "member3"]
        );

        store.change_reference("Member", m1, "team", None).unwrap();
        assert_eq!(
            store.get("Member", m1).unwrap().reference("team"),
            Some(&Reference::Absent)
        );
        assert!(store.verify_inverse_index());
    }

    #[test]
    fn test_update_rules() {
        let store = store();
        let team_a = team(&store, "teamA");
        let m1 = member(&store, "member1", 10, team_a);

        store.update("Member", m1, "age", 11).unwrap();
        assert_eq!(
            store.get("Member", m1).unwrap().get("age"),
            Some(&Value::Int32(11))
        );

        assert!(matches!(
            store.update("Member", m1, "id", 5i64),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            store.update("Member", 77, "age", 1),
            Err(Error::RecordNotFound { id: 77, .. })
        ));
        assert!(matches!(
            store.change_reference("Member", m1, "age", Some(team_a)),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            store.members("Team", team_a, "players"),
            Err(Error::UnknownField { .. })
        ));
    }
}
