//! Typed extraction of result cells.

use qdsl_proto::{Cell, EntityObject, Value};

use crate::error::{Error, ExecutionError};

/// Conversion from a projected cell into a Rust type.
pub trait FromCell: Sized {
    /// Convert a cell.
    fn from_cell(cell: Cell) -> Result<Self, Error>;
}

fn mismatch(expected: &str, cell: &Cell) -> Error {
    let found = match cell {
        Cell::Value(value) => value.type_name(),
        Cell::Entity(Some(_)) => "entity",
        Cell::Entity(None) => "null",
    };
    Error::Execution(ExecutionError::Evaluation(format!(
        "cannot read {found} cell as {expected}"
    )))
}

impl FromCell for Cell {
    fn from_cell(cell: Cell) -> Result<Self, Error> {
        Ok(cell)
    }
}

impl FromCell for Value {
    fn from_cell(cell: Cell) -> Result<Self, Error> {
        match cell {
            Cell::Value(value) => Ok(value),
            Cell::Entity(None) => Ok(Value::Null),
            other => Err(mismatch("value", &other)),
        }
    }
}

impl FromCell for EntityObject {
    fn from_cell(cell: Cell) -> Result<Self, Error> {
        match cell {
            Cell::Entity(Some(object)) => Ok(object),
            other => Err(mismatch("entity", &other)),
        }
    }
}

macro_rules! from_cell_scalar {
    ($ty:ty, $name:literal, $read:expr) => {
        impl FromCell for $ty {
            fn from_cell(cell: Cell) -> Result<Self, Error> {
                let read: fn(&Value) -> Option<$ty> = $read;
                match &cell {
                    Cell::Value(value) => read(value).ok_or_else(|| mismatch($name, &cell)),
                    Cell::Entity(_) => Err(mismatch($name, &cell)),
                }
            }
        }
    };
}

from_cell_scalar!(bool, "bool", Value::as_bool);
from_cell_scalar!(i32, "int32", Value::as_i32);
from_cell_scalar!(i64, "int64", Value::as_i64);
from_cell_scalar!(f64, "float64", Value::as_f64);
from_cell_scalar!(String, "string", |v| v.as_str().map(str::to_string));

/// Null cells read as `None`.
impl<T: FromCell> FromCell for Option<T> {
    fn from_cell(cell: Cell) -> Result<Self, Error> {
        if cell.is_null() {
            Ok(None)
        } else {
            T::from_cell(cell).map(Some)
        }
    }
}
