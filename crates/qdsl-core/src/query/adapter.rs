//! Execution adapter seam.

use qdsl_proto::ResultSet;

use super::compiler::ExecutionPlan;
use crate::error::ExecutionError;

/// Trait for execution backends.
///
/// The builder compiles a plan and hands it to an adapter; it never touches
/// storage itself. The in-memory [`MemoryStore`](crate::storage::MemoryStore)
/// is the bundled implementation.
pub trait ExecutionAdapter: Send + Sync {
    /// Execute a content plan, returning rows in plan order.
    fn execute(&self, plan: &ExecutionPlan) -> Result<ResultSet, ExecutionError>;

    /// Execute a count plan, returning the number of qualifying rows.
    fn execute_count(&self, plan: &ExecutionPlan) -> Result<u64, ExecutionError>;
}
