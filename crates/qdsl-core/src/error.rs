//! Core error types.

use thiserror::Error;

/// Errors raised by the catalog, the expression model, the builder, the plan
/// compiler, and the store.
///
/// Everything except [`Error::TooManyResults`], [`Error::RecordNotFound`],
/// [`Error::InvalidValue`], and [`Error::Execution`] is a construction error:
/// it is reported before an execution adapter is ever invoked.
#[derive(Debug, Error)]
pub enum Error {
    /// An entity with this name is already registered.
    #[error("entity already registered: {0}")]
    DuplicateEntity(String),

    /// No entity with this name is registered.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The entity has no such field.
    #[error("unknown field {entity}.{field}")]
    UnknownField {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
    },

    /// The owning field already carries a relation.
    #[error("relation already registered on {entity}.{field}")]
    DuplicateRelation {
        /// Owning entity name.
        entity: String,
        /// Owning field name.
        field: String,
    },

    /// An entity or relation definition is malformed.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Operand types are incompatible.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Operation being constructed.
        context: String,
        /// Expected type.
        expected: String,
        /// Actual type.
        found: String,
    },

    /// A subquery used as a value or in `in` must project exactly one column.
    #[error("subquery must project exactly one column, found {columns}")]
    InvalidSubqueryShape {
        /// Number of projected columns.
        columns: usize,
    },

    /// The select list is inconsistent with aggregation or grouping.
    #[error("invalid projection: {0}")]
    InvalidProjection(String),

    /// A join clause is malformed or misused.
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// An expression references an alias that is not in scope.
    #[error("alias not in scope: {0}")]
    AliasNotInScope(String),

    /// A single-row fetch matched more than one row.
    #[error("expected at most one result, found {found}")]
    TooManyResults {
        /// Number of rows that qualified.
        found: usize,
    },

    /// No record with this identity exists.
    #[error("record not found: {entity}#{id}")]
    RecordNotFound {
        /// Entity name.
        entity: String,
        /// Identity value.
        id: i64,
    },

    /// A value supplied to the store does not fit its field.
    #[error("invalid value for {entity}.{field}: {reason}")]
    InvalidValue {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Backend failure during execution.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] qdsl_proto::Error),
}

impl Error {
    /// Check whether the error was raised before execution.
    pub fn is_construction_error(&self) -> bool {
        !matches!(
            self,
            Error::TooManyResults { .. }
                | Error::RecordNotFound { .. }
                | Error::InvalidValue { .. }
                | Error::Execution(_)
                | Error::Protocol(_)
        )
    }

    pub(crate) fn type_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        found: impl ToString,
    ) -> Self {
        Error::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            found: found.to_string(),
        }
    }
}

/// Failures reported by an execution adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Opaque backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The plan produced more intermediate rows than the configured budget.
    #[error("row budget exceeded: {rows} rows (limit: {limit})")]
    BudgetExceeded {
        /// Rows produced when the budget tripped.
        rows: usize,
        /// Configured limit.
        limit: usize,
    },

    /// An expression could not be evaluated over the stored data.
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
