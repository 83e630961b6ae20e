//! Query engine for QDSL.
//!
//! Typed expressions and the fluent builder accumulate a [`QueryPlan`];
//! the plan compiler validates and lowers it into an [`ExecutionPlan`]; an
//! [`ExecutionAdapter`] runs it. [`QueryExecutor`] is the in-memory engine
//! behind the bundled store.
//!
//! [`QueryPlan`]: qdsl_proto::QueryPlan

mod adapter;
mod aggregate;
mod builder;
mod case;
mod compiler;
mod executor;
mod expr;
mod filter;
mod join;
mod results;
mod subquery;
mod types;

pub use adapter::ExecutionAdapter;
pub use aggregate::Accumulator;
pub use builder::{Query, QueryFactory};
pub use case::{CaseBuilder, CaseWhen, SimpleCaseThen, SimpleCaseWhen};
pub use compiler::{
    EagerLoad, ExecutionPlan, Grouping, JoinKey, JoinStep, PlanCompiler, PlanExpr, PlanOrder,
    PlanPredicate, Projection, Slot,
};
pub use executor::{QueryExecutor, RowSource};
pub use expr::{AssociationPath, EntityPath, Expression, Operand, OrderSpecifier};
pub use filter::FilterEvaluator;
pub use join::{JoinStrategy, KeyIndex};
pub use results::FromCell;
pub use subquery::SubQuery;
pub use types::ExprType;
