//! Core type definitions for the catalog.

use qdsl_proto::Value;
use serde::{Deserialize, Serialize};

/// Scalar data types a field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
}

/// Field types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// A scalar value.
    Scalar(ScalarType),
    /// An optional scalar value (nullable).
    OptionalScalar(ScalarType),
    /// A nullable foreign key holding another entity's identity.
    Reference {
        /// Name of the referenced entity.
        entity: String,
    },
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float64
        )
    }

    /// Convert a value into this type's storage representation.
    ///
    /// Integers narrow or widen when the value fits; anything else is
    /// rejected. Null is handled by the caller.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (ScalarType::Bool, v @ Value::Bool(_)) => Some(v),
            (ScalarType::Int32, v @ Value::Int32(_)) => Some(v),
            (ScalarType::Int32, Value::Int64(i)) => i32::try_from(i).ok().map(Value::Int32),
            (ScalarType::Int64, v @ Value::Int64(_)) => Some(v),
            (ScalarType::Int64, Value::Int32(i)) => Some(Value::Int64(i as i64)),
            (ScalarType::Float64, v @ Value::Float64(_)) => Some(v),
            (ScalarType::Float64, Value::Int32(i)) => Some(Value::Float64(i as f64)),
            (ScalarType::Float64, Value::Int64(i)) => Some(Value::Float64(i as f64)),
            (ScalarType::String, v @ Value::String(_)) => Some(v),
            _ => None,
        }
    }
}

impl FieldType {
    /// Create a scalar field type.
    pub fn scalar(scalar: ScalarType) -> Self {
        FieldType::Scalar(scalar)
    }

    /// Create an optional scalar field type.
    pub fn optional_scalar(scalar: ScalarType) -> Self {
        FieldType::OptionalScalar(scalar)
    }

    /// Create a reference field type.
    pub fn reference(entity: impl Into<String>) -> Self {
        FieldType::Reference {
            entity: entity.into(),
        }
    }

    /// Check if this type is nullable.
    pub fn is_nullable(&self) -> bool {
        matches!(
            self,
            FieldType::OptionalScalar(_) | FieldType::Reference { .. }
        )
    }

    /// Get the inner scalar type if this is a scalar-based type.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            FieldType::Scalar(s) | FieldType::OptionalScalar(s) => Some(*s),
            FieldType::Reference { .. } => None,
        }
    }

    /// Get the referenced entity name if this is a reference.
    pub fn referenced_entity(&self) -> Option<&str> {
        match self {
            FieldType::Reference { entity } => Some(entity),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_is_numeric() {
        assert!(ScalarType::Int32.is_numeric());
        assert!(ScalarType::Float64.is_numeric());
        assert!(!ScalarType::String.is_numeric());
        assert!(!ScalarType::Bool.is_numeric());
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            ScalarType::Int32.coerce(Value::Int64(10)),
            Some(Value::Int32(10))
        );
        assert_eq!(ScalarType::Int32.coerce(Value::Int64(i64::MAX)), None);
        assert_eq!(
            ScalarType::Int64.coerce(Value::Int32(7)),
            Some(Value::Int64(7))
        );
        assert_eq!(ScalarType::String.coerce(Value::Int32(1)), None);
        assert_eq!(ScalarType::Int32.coerce(Value::String("1".into())), None);
    }

    #[test]
    fn test_field_type_nullable() {
        assert!(!FieldType::scalar(ScalarType::String).is_nullable());
        assert!(FieldType::optional_scalar(ScalarType::Int32).is_nullable());
        assert!(FieldType::reference("Team").is_nullable());
        assert_eq!(FieldType::reference("Team").referenced_entity(), Some("Team"));
    }
}
