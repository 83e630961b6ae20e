//! Record type for stored entities.

use qdsl_proto::{EntityObject, Reference, Value};

use crate::catalog::{EntityDef, FieldType};

/// A stored entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Identity value; also present in `values` at the identity position.
    pub id: i64,

    /// Field values in declaration order. Reference fields hold the target
    /// identity as `Int64`, or `Null`.
    pub values: Vec<Value>,
}

impl EntityRecord {
    /// Create a record.
    pub fn new(id: i64, values: Vec<Value>) -> Self {
        Self { id, values }
    }

    /// Value at a field position; null when out of range.
    pub fn value(&self, field: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(field).unwrap_or(&NULL)
    }

    /// Materialize as an entity object.
    ///
    /// `load` is asked for each non-null reference (field position, target
    /// identity); references it declines stay unloaded.
    pub fn to_object(
        &self,
        def: &EntityDef,
        mut load: impl FnMut(usize, i64) -> Option<EntityObject>,
    ) -> EntityObject {
        let mut object = EntityObject::new(def.name.clone(), self.id);
        for (index, field) in def.fields.iter().enumerate() {
            let value = self.value(index);
            match &field.field_type {
                FieldType::Reference { entity } => {
                    let reference = match value.as_i64() {
                        None => Reference::Absent,
                        Some(id) => match load(index, id) {
                            Some(target) => Reference::Loaded(Box::new(target)),
                            None => Reference::Unloaded {
                                entity: entity.clone(),
                                id,
                            },
                        },
                    };
                    object.references.push((field.name.clone(), reference));
                }
                _ => object.fields.push((field.name.clone(), value.clone())),
            }
        }
        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_out_of_range_is_null() {
        let record = EntityRecord::new(1, vec![Value::Int64(1), Value::from("teamA")]);
        assert_eq!(record.value(1), &Value::from("teamA"));
        assert_eq!(record.value(5), &Value::Null);
    }

    #[test]
    fn test_to_object_references() {
        use crate::catalog::{FieldDef, ScalarType};

        let def = EntityDef::new("Member", "id")
            .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
            .with_field(FieldDef::reference("team", "Team"));
        let with_team = EntityRecord::new(3, vec![Value::Int64(3), Value::Int32(10), Value::Int64(1)]);
        let without_team = EntityRecord::new(6, vec![Value::Int64(6), Value::Int32(40), Value::Null]);

        let object = with_team.to_object(&def, |_, _| None);
        assert_eq!(object.get("age"), Some(&Value::Int32(10)));
        assert_eq!(
            object.reference("team"),
            Some(&Reference::Unloaded {
                entity: "Team".into(),
                id: 1,
            })
        );

        let loaded = with_team.to_object(&def, |_, id| Some(EntityObject::new("Team", id)));
        assert!(loaded.is_loaded("team"));

        let object = without_team.to_object(&def, |_, _| panic!("null reference loaded"));
        assert_eq!(object.reference("team"), Some(&Reference::Absent));
    }
}
