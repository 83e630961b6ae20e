//! Semantic types of query expressions.

use std::fmt;

use qdsl_proto::Value;

use crate::catalog::{FieldType, ScalarType};

/// Type of an expression, checked when predicates and projections are built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ExprType {
    /// Boolean.
    Bool,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// String.
    String,
    /// A whole entity, or a reference to one. Compared by identity.
    Entity(String),
    /// The null literal; unifies with any type.
    #[default]
    Null,
}

impl ExprType {
    /// Type of a stored field.
    pub fn of_field(field_type: &FieldType) -> Self {
        match field_type {
            FieldType::Scalar(s) | FieldType::OptionalScalar(s) => Self::of_scalar(*s),
            FieldType::Reference { entity } => ExprType::Entity(entity.clone()),
        }
    }

    /// Type of a scalar.
    pub fn of_scalar(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Bool => ExprType::Bool,
            ScalarType::Int32 => ExprType::Int32,
            ScalarType::Int64 => ExprType::Int64,
            ScalarType::Float64 => ExprType::Float64,
            ScalarType::String => ExprType::String,
        }
    }

    /// Type of a literal value.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => ExprType::Null,
            Value::Bool(_) => ExprType::Bool,
            Value::Int32(_) => ExprType::Int32,
            Value::Int64(_) => ExprType::Int64,
            Value::Float64(_) => ExprType::Float64,
            Value::String(_) => ExprType::String,
        }
    }

    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ExprType::Int32 | ExprType::Int64 | ExprType::Float64)
    }

    /// Check if this type is an integer.
    pub fn is_integer(&self) -> bool {
        matches!(self, ExprType::Int32 | ExprType::Int64)
    }

    /// Check if values of this type support `<`, `>`, `between`, `min`, `max`.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            ExprType::Bool | ExprType::Int32 | ExprType::Int64 | ExprType::Float64 | ExprType::String
        )
    }

    /// Check if values of both types can be compared for equality.
    ///
    /// Numeric types are mutually comparable. The null type is not
    /// comparable to anything; use `is_null` instead.
    pub fn comparable_with(&self, other: &ExprType) -> bool {
        match (self, other) {
            (ExprType::Null, _) | (_, ExprType::Null) => false,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (a, b) => a == b,
        }
    }

    /// Common type of two branch or operand types, if any.
    pub fn unify(&self, other: &ExprType) -> Option<ExprType> {
        match (self, other) {
            (ExprType::Null, t) | (t, ExprType::Null) => Some(t.clone()),
            (a, b) if a == b => Some(a.clone()),
            (ExprType::Float64, b) if b.is_numeric() => Some(ExprType::Float64),
            (a, ExprType::Float64) if a.is_numeric() => Some(ExprType::Float64),
            (a, b) if a.is_integer() && b.is_integer() => Some(ExprType::Int64),
            _ => None,
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprType::Bool => write!(f, "bool"),
            ExprType::Int32 => write!(f, "int32"),
            ExprType::Int64 => write!(f, "int64"),
            ExprType::Float64 => write!(f, "float64"),
            ExprType::String => write!(f, "string"),
            ExprType::Entity(name) => write!(f, "entity {name}"),
            ExprType::Null => write!(f, "null"),
        }
    }
}
