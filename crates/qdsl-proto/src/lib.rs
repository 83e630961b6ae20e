//! QDSL plan and result types.
//!
//! This crate defines the backend-neutral intermediate representation that a
//! query builder produces and an execution adapter consumes, plus the values
//! and result shapes that flow back.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for literals, fields, and results
//! - [`query`] - Query plan IR (sources, joins, predicates, ordering, paging)
//! - [`result`] - Result rows, tuples, materialized entities
//! - [`error`] - Protocol error types
//!
//! # Serialization
//!
//! Plans and results derive `serde::Serialize`/`Deserialize` so they can be
//! logged or shipped to an external backend as JSON:
//!
//! ```ignore
//! use qdsl_proto::QueryPlan;
//!
//! let json = plan.to_json()?;
//! let decoded = QueryPlan::from_json(&json)?;
//! ```

pub mod error;
pub mod query;
pub mod result;
pub mod value;

pub use error::Error;

pub use query::{
    AggregateFunction, Association, CaseBranch, CaseExpr, ColumnRef, CompareOp, Expr, InSource,
    JoinClause, JoinKind, NullOrdering, OrderDirection, OrderSpec, Pagination, Predicate,
    QueryPlan, Source,
};
pub use result::{Cell, EntityObject, QueryResults, Reference, ResultSet, Tuple};
pub use value::Value;
