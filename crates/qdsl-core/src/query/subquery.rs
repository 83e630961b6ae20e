//! Nested queries used as values or `in` sources.

use qdsl_proto::{Expr, QueryPlan};

use super::expr::Expression;
use super::types::ExprType;
use crate::error::Error;

/// A query embedded in another one.
///
/// Aliases from enclosing queries may be referenced inside; the plan compiler
/// resolves them against the outer scope.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    plan: QueryPlan,
    columns: Vec<ExprType>,
    fault: Option<String>,
}

impl SubQuery {
    pub(crate) fn new(plan: QueryPlan, columns: Vec<ExprType>, fault: Option<String>) -> Self {
        Self {
            plan,
            columns,
            fault,
        }
    }

    /// The nested plan.
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Types of the projected columns.
    pub fn columns(&self) -> &[ExprType] {
        &self.columns
    }

    /// Type of the single projected column.
    pub fn column_type(&self) -> Result<&ExprType, Error> {
        if let Some(fault) = &self.fault {
            return Err(Error::InvalidJoin(fault.clone()));
        }
        match self.columns.as_slice() {
            [ty] => Ok(ty),
            other => Err(Error::InvalidSubqueryShape {
                columns: other.len(),
            }),
        }
    }

    /// The subquery as a scalar expression.
    pub fn to_expression(&self) -> Result<Expression, Error> {
        let ty = self.column_type()?.clone();
        Ok(Expression::new(Expr::Subquery(Box::new(self.plan.clone())), ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_checked_at_use() {
        let two = SubQuery::new(QueryPlan::new(), vec![ExprType::Int32, ExprType::String], None);
        assert!(matches!(
            two.to_expression(),
            Err(Error::InvalidSubqueryShape { columns: 2 })
        ));

        let one = SubQuery::new(QueryPlan::new(), vec![ExprType::Float64], None);
        assert_eq!(one.to_expression().unwrap().ty(), &ExprType::Float64);
    }

    #[test]
    fn test_builder_fault_surfaces() {
        let broken = SubQuery::new(
            QueryPlan::new(),
            vec![ExprType::Int32],
            Some("on() without a preceding join".into()),
        );
        assert!(matches!(broken.column_type(), Err(Error::InvalidJoin(_))));
    }
}
