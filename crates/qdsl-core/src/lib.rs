//! QDSL Core - Entity catalog, query builder, and query execution.
//!
//! This crate provides the typed query surface for QDSL and the in-memory
//! engine that runs it.

pub mod catalog;
pub mod config;
pub mod error;
pub mod query;
pub mod storage;

pub use catalog::{
    Cardinality, Catalog, EntityDef, FieldDef, FieldType, RelationDef, ScalarType, SchemaBundle,
    SharedCatalog,
};
pub use config::{ExecutorConfig, NullsAre};
pub use error::{Error, ExecutionError, Result};
pub use query::{
    AssociationPath, CaseBuilder, EntityPath, ExecutionAdapter, ExecutionPlan, ExprType,
    Expression, FromCell, Operand, OrderSpecifier, PlanCompiler, Query, QueryExecutor,
    QueryFactory, RowSource, SubQuery,
};
pub use storage::{EntityRecord, InverseIndex, MemoryStore, NewRecord, Table, Tables};

/// Re-export protocol types.
pub use qdsl_proto as proto;
