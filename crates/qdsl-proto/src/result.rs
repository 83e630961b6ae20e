//! Result types for query responses.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::query::Expr;
use crate::value::Value;

/// State of a reference field on a materialized entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    /// The foreign key is null.
    Absent,
    /// The target exists but was not materialized by this query.
    Unloaded {
        /// Target entity name.
        entity: String,
        /// Target identity.
        id: i64,
    },
    /// The target was materialized by an eager (fetch) join.
    Loaded(Box<EntityObject>),
}

impl Reference {
    /// Check whether the target was materialized.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Reference::Loaded(_))
    }

    /// Identity of the referenced entity, if any.
    pub fn id(&self) -> Option<i64> {
        match self {
            Reference::Absent => None,
            Reference::Unloaded { id, .. } => Some(*id),
            Reference::Loaded(object) => Some(object.id),
        }
    }

    /// The loaded entity, if materialized.
    pub fn loaded(&self) -> Option<&EntityObject> {
        match self {
            Reference::Loaded(object) => Some(object),
            _ => None,
        }
    }
}

/// A whole entity projected by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityObject {
    /// Entity type name.
    pub entity: String,
    /// Identity value.
    pub id: i64,
    /// Scalar fields in declaration order, identity included.
    pub fields: Vec<(String, Value)>,
    /// Reference fields in declaration order.
    pub references: Vec<(String, Reference)>,
}

impl EntityObject {
    /// Create an entity object without fields.
    pub fn new(entity: impl Into<String>, id: i64) -> Self {
        Self {
            entity: entity.into(),
            id,
            fields: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Get a scalar field value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Get a string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Get an integer field, widening `Int32`.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    /// Get a reference field by name.
    pub fn reference(&self, field: &str) -> Option<&Reference> {
        self.references
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, reference)| reference)
    }

    /// Check whether a reference field's target was materialized.
    pub fn is_loaded(&self, field: &str) -> bool {
        self.reference(field).is_some_and(Reference::is_loaded)
    }
}

/// One projected cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// A scalar value.
    Value(Value),
    /// A whole entity; `None` for the null side of an outer join.
    Entity(Option<EntityObject>),
}

impl Cell {
    /// Check whether this cell is null.
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Value(value) => value.is_null(),
            Cell::Entity(entity) => entity.is_none(),
        }
    }

    /// Scalar value, if this is a value cell.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Cell::Value(value) => Some(value),
            Cell::Entity(_) => None,
        }
    }

    /// Entity, if this is a non-null entity cell.
    pub fn as_entity(&self) -> Option<&EntityObject> {
        match self {
            Cell::Entity(entity) => entity.as_ref(),
            Cell::Value(_) => None,
        }
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        Cell::Value(value)
    }
}

impl From<EntityObject> for Cell {
    fn from(entity: EntityObject) -> Self {
        Cell::Entity(Some(entity))
    }
}

/// Rows returned by an execution adapter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultSet {
    /// Projected expressions, one per column.
    pub columns: Vec<Expr>,
    /// Rows, each holding one cell per column.
    pub rows: Vec<Vec<Cell>>,
}

impl ResultSet {
    /// Create an empty result set with the given columns.
    pub fn new(columns: Vec<Expr>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Convert into tuples sharing one column list.
    pub fn into_tuples(self) -> Vec<Tuple> {
        let columns = Arc::new(self.columns);
        self.rows
            .into_iter()
            .map(|cells| Tuple {
                columns: Arc::clone(&columns),
                cells,
            })
            .collect()
    }
}

/// A row of a multi-projection query.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    columns: Arc<Vec<Expr>>,
    cells: Vec<Cell>,
}

impl Tuple {
    /// Cell at a column position.
    pub fn get(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Cell for the column projected by `expr`.
    pub fn get_expr(&self, expr: impl AsRef<Expr>) -> Option<&Cell> {
        let expr = expr.as_ref();
        self.columns
            .iter()
            .position(|column| column == expr)
            .and_then(|index| self.cells.get(index))
    }

    /// Scalar value at a column position.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.get(index).and_then(Cell::as_value)
    }

    /// Scalar value for the column projected by `expr`.
    pub fn value_of(&self, expr: impl AsRef<Expr>) -> Option<&Value> {
        self.get_expr(expr).and_then(Cell::as_value)
    }

    /// Projected columns.
    pub fn columns(&self) -> &[Expr] {
        &self.columns
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if the tuple has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Take ownership of the cells.
    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }
}

impl AsRef<Expr> for Expr {
    fn as_ref(&self) -> &Expr {
        self
    }
}

/// A page of results bundled with the total from a separate count.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResults<T> {
    /// Content rows.
    pub results: Vec<T>,
    /// Total number of qualifying rows, ignoring paging.
    pub total: u64,
    /// Limit applied to the content query.
    pub limit: Option<u64>,
    /// Offset applied to the content query.
    pub offset: u64,
}

impl<T> QueryResults<T> {
    /// Check whether the page is empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
