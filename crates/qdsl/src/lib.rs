//! QDSL - A type-safe relational query builder.
//!
//! Entities are described once in a [`Catalog`]; typed paths over them build
//! predicates, projections, joins, and subqueries that are checked as they
//! are constructed and executed through an [`ExecutionAdapter`].
//!
//! # Quick Start
//!
//! ```ignore
//! use qdsl::prelude::*;
//!
//! let session = Session::open(catalog);
//! let member = session.path("Member")?;
//! let team = session.path("Team")?;
//!
//! let team_a = session
//!     .select_from(&member)
//!     .join(&member.association("team")?, &team)
//!     .filter(team.get("name")?.eq("teamA")?)
//!     .order_by([member.get("age")?.desc()])
//!     .fetch_as::<EntityObject>()?;
//! ```

mod session;

pub use session::Session;

pub use qdsl_core::catalog::{
    Cardinality, Catalog, EntityDef, FieldDef, FieldType, RelationDef, ScalarType, SchemaBundle,
    SharedCatalog,
};
pub use qdsl_core::config::{ExecutorConfig, NullsAre};
pub use qdsl_core::query::{
    AssociationPath, CaseBuilder, EntityPath, ExecutionAdapter, ExecutionPlan, ExprType,
    Expression, FromCell, OrderSpecifier, Query, QueryFactory, SubQuery,
};
pub use qdsl_core::storage::{MemoryStore, NewRecord};
pub use qdsl_core::{Error, ExecutionError, Result};

/// Re-export protocol types.
pub use qdsl_proto as proto;

/// Everything needed to declare entities and write queries.
pub mod prelude {
    pub use crate::{
        CaseBuilder, Catalog, EntityDef, EntityPath, Expression, FieldDef, FieldType, NewRecord,
        RelationDef, ScalarType, Session,
    };
    pub use qdsl_proto::{Cell, EntityObject, Predicate, Reference, Tuple, Value};
}
