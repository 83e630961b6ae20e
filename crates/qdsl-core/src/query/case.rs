//! Case expressions.
//!
//! Branches are evaluated top to bottom and the first match wins. Errors found
//! while adding branches are held until the expression is finished with
//! `otherwise` or `end`, which keeps the fluent chain unbroken.

use qdsl_proto::{CaseBranch, CaseExpr, Expr, Predicate};

use super::expr::{Expression, Operand};
use super::types::ExprType;
use crate::error::Error;

/// Searched case: `case when <predicate> then <value> ... else <value> end`.
#[derive(Debug, Default)]
pub struct CaseBuilder {
    branches: Vec<CaseBranch>,
    result_type: ExprType,
    fault: Option<Error>,
}

/// A searched case waiting for the `then` of its latest `when`.
#[derive(Debug)]
pub struct CaseWhen {
    builder: CaseBuilder,
    condition: Predicate,
}

impl CaseBuilder {
    /// Start an empty case expression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a branch condition.
    pub fn when(self, condition: Predicate) -> CaseWhen {
        CaseWhen {
            builder: self,
            condition,
        }
    }

    /// Finish with a default result.
    pub fn otherwise(self, value: impl Into<Operand>) -> Result<Expression, Error> {
        self.finish(Some(value.into()))
    }

    /// Finish without a default; rows matching no branch yield null.
    pub fn end(self) -> Result<Expression, Error> {
        self.finish(None)
    }

    fn push(mut self, condition: Predicate, value: Operand) -> Self {
        if self.fault.is_some() {
            return self;
        }
        match value.into_expression().and_then(|v| self.unify(v)) {
            Ok(then) => self.branches.push(CaseBranch {
                when: condition,
                then: then.into_expr(),
            }),
            Err(err) => self.fault = Some(err),
        }
        self
    }

    fn unify(&mut self, value: Expression) -> Result<Expression, Error> {
        match self.result_type.unify(value.ty()) {
            Some(ty) => {
                self.result_type = ty;
                Ok(value)
            }
            None => Err(Error::type_mismatch(
                "case",
                self.result_type.to_string(),
                value.ty(),
            )),
        }
    }

    fn finish(mut self, otherwise: Option<Operand>) -> Result<Expression, Error> {
        if let Some(err) = self.fault.take() {
            return Err(err);
        }
        if self.branches.is_empty() {
            return Err(Error::InvalidProjection(
                "case expression needs at least one branch".into(),
            ));
        }
        let otherwise = match otherwise {
            Some(value) => {
                let value = value.into_expression()?;
                Some(Box::new(self.unify(value)?.into_expr()))
            }
            None => None,
        };
        Ok(Expression::new(
            Expr::Case(CaseExpr {
                branches: self.branches,
                otherwise,
            }),
            self.result_type,
        ))
    }
}

impl CaseWhen {
    /// Result of the pending branch.
    pub fn then(self, value: impl Into<Operand>) -> CaseBuilder {
        self.builder.push(self.condition, value.into())
    }
}

/// Simple case waiting for the `then` of its latest `when`.
#[derive(Debug)]
pub struct SimpleCaseWhen {
    subject: Expression,
    builder: CaseBuilder,
    value: Operand,
}

/// Simple case: `case <subject> when <value> then <value> ... end`.
#[derive(Debug)]
pub struct SimpleCaseThen {
    subject: Expression,
    builder: CaseBuilder,
}

impl SimpleCaseWhen {
    pub(crate) fn start(subject: Expression, value: Operand) -> Self {
        Self {
            subject,
            builder: CaseBuilder::new(),
            value,
        }
    }

    /// Result when the subject equals the pending value.
    pub fn then(self, result: impl Into<Operand>) -> SimpleCaseThen {
        let mut builder = self.builder;
        builder = match self.subject.eq(self.value) {
            Ok(condition) => builder.push(condition, result.into()),
            Err(err) => {
                if builder.fault.is_none() {
                    builder.fault = Some(err);
                }
                builder
            }
        };
        SimpleCaseThen {
            subject: self.subject,
            builder,
        }
    }
}

impl SimpleCaseThen {
    /// Add another value to match against.
    pub fn when(self, value: impl Into<Operand>) -> SimpleCaseWhen {
        SimpleCaseWhen {
            subject: self.subject,
            builder: self.builder,
            value: value.into(),
        }
    }

    /// Finish with a default result.
    pub fn otherwise(self, value: impl Into<Operand>) -> Result<Expression, Error> {
        self.builder.otherwise(value)
    }

    /// Finish without a default; unmatched rows yield null.
    pub fn end(self) -> Result<Expression, Error> {
        self.builder.end()
    }
}
