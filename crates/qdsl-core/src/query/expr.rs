//! Typed expressions over entity paths.
//!
//! An [`Expression`] pairs an IR [`Expr`] with its [`ExprType`]. Every
//! operator checks operand types when it is called, so an ill-typed
//! predicate or projection never reaches the plan compiler.

use std::sync::Arc;

use qdsl_proto::{
    AggregateFunction, ColumnRef, CompareOp, EntityObject, Expr, InSource, NullOrdering,
    OrderDirection, OrderSpec, Predicate, Source, Value,
};

use super::case::SimpleCaseWhen;
use super::subquery::SubQuery;
use super::types::ExprType;
use crate::catalog::{EntityDef, RelationDef};
use crate::error::Error;

/// A typed value expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    expr: Expr,
    ty: ExprType,
}

/// Right-hand operand of a comparison, case branch, or concatenation.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A literal.
    Value(Value),
    /// Another expression.
    Expression(Expression),
    /// A scalar subquery.
    Subquery(SubQuery),
}

impl Operand {
    pub(crate) fn into_expression(self) -> Result<Expression, Error> {
        match self {
            Operand::Value(value) => Ok(Expression::constant(value)),
            Operand::Expression(expr) => Ok(expr),
            Operand::Subquery(subquery) => subquery.to_expression(),
        }
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from_value!(Value, bool, i32, i64, f64, String, &str);

impl From<Expression> for Operand {
    fn from(expr: Expression) -> Self {
        Operand::Expression(expr)
    }
}

impl From<&Expression> for Operand {
    fn from(expr: &Expression) -> Self {
        Operand::Expression(expr.clone())
    }
}

impl From<SubQuery> for Operand {
    fn from(subquery: SubQuery) -> Self {
        Operand::Subquery(subquery)
    }
}

impl From<&SubQuery> for Operand {
    fn from(subquery: &SubQuery) -> Self {
        Operand::Subquery(subquery.clone())
    }
}

impl From<&EntityPath> for Operand {
    fn from(path: &EntityPath) -> Self {
        Operand::Expression(path.as_expr())
    }
}

/// A previously fetched entity compares by identity.
impl From<&EntityObject> for Operand {
    fn from(object: &EntityObject) -> Self {
        Operand::Expression(Expression::new(
            Expr::Literal(Value::Int64(object.id)),
            ExprType::Entity(object.entity.clone()),
        ))
    }
}

impl Expression {
    pub(crate) fn new(expr: Expr, ty: ExprType) -> Self {
        Self { expr, ty }
    }

    /// A literal projected or compared as-is.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = ExprType::of_value(&value);
        Self::new(Expr::Literal(value), ty)
    }

    /// `count(*)`.
    pub fn count_all() -> Self {
        Self::new(
            Expr::Aggregate {
                function: AggregateFunction::Count,
                arg: None,
            },
            ExprType::Int64,
        )
    }

    /// The underlying IR expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// The expression's type.
    pub fn ty(&self) -> &ExprType {
        &self.ty
    }

    /// Readable label, also used as the result column name.
    pub fn label(&self) -> String {
        self.expr.to_string()
    }

    /// Take the IR expression.
    pub fn into_expr(self) -> Expr {
        self.expr
    }

    fn context(&self, op: &str) -> String {
        format!("{} {}", self.label(), op)
    }

    fn check_comparable(&self, op: &str, other: &Expression) -> Result<(), Error> {
        if self.ty.comparable_with(&other.ty) {
            Ok(())
        } else {
            Err(Error::type_mismatch(
                self.context(op),
                self.ty.to_string(),
                &other.ty,
            ))
        }
    }

    fn check_orderable(&self, op: &str) -> Result<(), Error> {
        if self.ty.is_orderable() {
            Ok(())
        } else {
            Err(Error::type_mismatch(self.context(op), "orderable type", &self.ty))
        }
    }

    fn compare(&self, op: CompareOp, other: Operand) -> Result<Predicate, Error> {
        let right = other.into_expression()?;
        self.check_comparable(op.symbol(), &right)?;
        if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
            self.check_orderable(op.symbol())?;
        }
        Ok(Predicate::Compare {
            op,
            left: self.expr.clone(),
            right: right.expr,
        })
    }

    // ============== Comparisons ==============

    /// `self = other`.
    pub fn eq(&self, other: impl Into<Operand>) -> Result<Predicate, Error> {
        self.compare(CompareOp::Eq, other.into())
    }

    /// `self <> other`.
    pub fn ne(&self, other: impl Into<Operand>) -> Result<Predicate, Error> {
        self.compare(CompareOp::Ne, other.into())
    }

    /// `self > other`.
    pub fn gt(&self, other: impl Into<Operand>) -> Result<Predicate, Error> {
        self.compare(CompareOp::Gt, other.into())
    }

    /// `self >= other`.
    pub fn goe(&self, other: impl Into<Operand>) -> Result<Predicate, Error> {
        self.compare(CompareOp::Ge, other.into())
    }

    /// `self < other`.
    pub fn lt(&self, other: impl Into<Operand>) -> Result<Predicate, Error> {
        self.compare(CompareOp::Lt, other.into())
    }

    /// `self <= other`.
    pub fn loe(&self, other: impl Into<Operand>) -> Result<Predicate, Error> {
        self.compare(CompareOp::Le, other.into())
    }

    /// `low <= self <= high`, inclusive on both bounds.
    pub fn between(
        &self,
        low: impl Into<Operand>,
        high: impl Into<Operand>,
    ) -> Result<Predicate, Error> {
        self.check_orderable("between")?;
        let low = low.into().into_expression()?;
        let high = high.into().into_expression()?;
        self.check_comparable("between", &low)?;
        self.check_comparable("between", &high)?;
        Ok(Predicate::Between {
            expr: self.expr.clone(),
            low: low.expr,
            high: high.expr,
        })
    }

    /// Membership in a literal set.
    pub fn in_values<I, V>(&self, values: I) -> Result<Predicate, Error>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_literal(values, false)
    }

    /// Non-membership in a literal set.
    pub fn not_in_values<I, V>(&self, values: I) -> Result<Predicate, Error>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_literal(values, true)
    }

    fn in_literal<I, V>(&self, values: I, negated: bool) -> Result<Predicate, Error>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<Value>>();
        for value in &values {
            let ty = ExprType::of_value(value);
            if !self.ty.comparable_with(&ty) {
                return Err(Error::type_mismatch(self.context("in"), self.ty.to_string(), &ty));
            }
        }
        Ok(Predicate::In {
            expr: self.expr.clone(),
            source: InSource::Values(values),
            negated,
        })
    }

    /// Membership in the single column a subquery projects.
    pub fn in_subquery(&self, subquery: &SubQuery) -> Result<Predicate, Error> {
        self.in_nested(subquery, false)
    }

    /// Non-membership in the single column a subquery projects.
    pub fn not_in_subquery(&self, subquery: &SubQuery) -> Result<Predicate, Error> {
        self.in_nested(subquery, true)
    }

    fn in_nested(&self, subquery: &SubQuery, negated: bool) -> Result<Predicate, Error> {
        let column = subquery.to_expression()?;
        self.check_comparable("in", &column)?;
        Ok(Predicate::In {
            expr: self.expr.clone(),
            source: InSource::Subquery(Box::new(subquery.plan().clone())),
            negated,
        })
    }

    /// SQL LIKE with `%` and `_` wildcards.
    pub fn like(&self, pattern: impl Into<String>) -> Result<Predicate, Error> {
        if self.ty != ExprType::String {
            return Err(Error::type_mismatch(self.context("like"), "string", &self.ty));
        }
        Ok(Predicate::Like {
            expr: self.expr.clone(),
            pattern: pattern.into(),
        })
    }

    /// `self is null`.
    pub fn is_null(&self) -> Predicate {
        Predicate::IsNull(self.expr.clone())
    }

    /// `self is not null`.
    pub fn is_not_null(&self) -> Predicate {
        Predicate::IsNotNull(self.expr.clone())
    }

    // ============== Aggregates ==============

    fn aggregate(&self, function: AggregateFunction, ty: ExprType) -> Expression {
        Expression::new(
            Expr::Aggregate {
                function,
                arg: Some(Box::new(self.expr.clone())),
            },
            ty,
        )
    }

    /// Count of non-null values.
    pub fn count(&self) -> Expression {
        self.aggregate(AggregateFunction::Count, ExprType::Int64)
    }

    /// Sum; integers sum to `int64`, floats to `float64`.
    pub fn sum(&self) -> Result<Expression, Error> {
        if !self.ty.is_numeric() {
            return Err(Error::type_mismatch(self.context("sum"), "numeric", &self.ty));
        }
        let ty = if self.ty.is_integer() {
            ExprType::Int64
        } else {
            ExprType::Float64
        };
        Ok(self.aggregate(AggregateFunction::Sum, ty))
    }

    /// Average as `float64`; integer input is never truncated.
    pub fn avg(&self) -> Result<Expression, Error> {
        if !self.ty.is_numeric() {
            return Err(Error::type_mismatch(self.context("avg"), "numeric", &self.ty));
        }
        Ok(self.aggregate(AggregateFunction::Avg, ExprType::Float64))
    }

    /// Maximum value.
    pub fn max(&self) -> Result<Expression, Error> {
        self.check_orderable("max")?;
        Ok(self.aggregate(AggregateFunction::Max, self.ty.clone()))
    }

    /// Minimum value.
    pub fn min(&self) -> Result<Expression, Error> {
        self.check_orderable("min")?;
        Ok(self.aggregate(AggregateFunction::Min, self.ty.clone()))
    }

    // ============== Strings ==============

    /// String concatenation. Both sides must be strings; adapt other types
    /// with [`Expression::string_value`] first.
    pub fn concat(&self, other: impl Into<Operand>) -> Result<Expression, Error> {
        if self.ty != ExprType::String {
            return Err(Error::type_mismatch(self.context("concat"), "string", &self.ty));
        }
        let other = other.into().into_expression()?;
        if other.ty != ExprType::String {
            return Err(Error::type_mismatch(self.context("concat"), "string", &other.ty));
        }
        Ok(Expression::new(
            Expr::Concat(Box::new(self.expr.clone()), Box::new(other.expr)),
            ExprType::String,
        ))
    }

    /// The value rendered as a string.
    pub fn string_value(&self) -> Expression {
        Expression::new(Expr::StringValue(Box::new(self.expr.clone())), ExprType::String)
    }

    // ============== Case & ordering ==============

    /// Start a simple case: `case self when value then ...`.
    pub fn when(&self, value: impl Into<Operand>) -> SimpleCaseWhen {
        SimpleCaseWhen::start(self.clone(), value.into())
    }

    /// Ascending order on this expression.
    pub fn asc(&self) -> OrderSpecifier {
        OrderSpecifier(OrderSpec::asc(self.expr.clone()))
    }

    /// Descending order on this expression.
    pub fn desc(&self) -> OrderSpecifier {
        OrderSpecifier(OrderSpec::desc(self.expr.clone()))
    }
}

impl AsRef<Expr> for Expression {
    fn as_ref(&self) -> &Expr {
        &self.expr
    }
}

impl From<&Expression> for Expression {
    fn from(expr: &Expression) -> Self {
        expr.clone()
    }
}

impl From<&EntityPath> for Expression {
    fn from(path: &EntityPath) -> Self {
        path.as_expr()
    }
}

/// A sort key with direction and null placement.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpecifier(OrderSpec);

impl OrderSpecifier {
    /// Place nulls before every non-null value.
    pub fn nulls_first(mut self) -> Self {
        self.0.nulls = NullOrdering::NullsFirst;
        self
    }

    /// Place nulls after every non-null value.
    pub fn nulls_last(mut self) -> Self {
        self.0.nulls = NullOrdering::NullsLast;
        self
    }

    /// Sort direction.
    pub fn direction(&self) -> OrderDirection {
        self.0.direction
    }

    /// Take the IR order spec.
    pub fn into_spec(self) -> OrderSpec {
        self.0
    }
}

impl From<OrderSpecifier> for OrderSpec {
    fn from(spec: OrderSpecifier) -> Self {
        spec.0
    }
}

/// An entity under an alias; the root of field expressions and joins.
#[derive(Debug, Clone)]
pub struct EntityPath {
    alias: String,
    def: Arc<EntityDef>,
    relations: Arc<[RelationDef]>,
}

impl EntityPath {
    pub(crate) fn new(
        alias: impl Into<String>,
        def: Arc<EntityDef>,
        relations: Vec<RelationDef>,
    ) -> Self {
        Self {
            alias: alias.into(),
            def,
            relations: relations.into(),
        }
    }

    /// Alias the path is bound to.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        &self.def.name
    }

    /// Entity definition.
    pub fn def(&self) -> &EntityDef {
        &self.def
    }

    /// Typed expression for one field.
    pub fn get(&self, field: &str) -> Result<Expression, Error> {
        let def = self.def.get_field(field).ok_or_else(|| Error::UnknownField {
            entity: self.def.name.clone(),
            field: field.to_string(),
        })?;
        Ok(Expression::new(
            Expr::Column(ColumnRef {
                alias: self.alias.clone(),
                field: field.to_string(),
            }),
            ExprType::of_field(&def.field_type),
        ))
    }

    /// The identity field.
    pub fn id(&self) -> Expression {
        Expression::new(
            Expr::Column(ColumnRef {
                alias: self.alias.clone(),
                field: self.def.identity_field.clone(),
            }),
            ExprType::Int64,
        )
    }

    /// The whole entity, for projection or identity comparison.
    pub fn as_expr(&self) -> Expression {
        Expression::new(
            Expr::Entity {
                alias: self.alias.clone(),
            },
            ExprType::Entity(self.def.name.clone()),
        )
    }

    /// Count of rows where this entity is present.
    pub fn count(&self) -> Expression {
        self.as_expr().count()
    }

    /// Association owned by `field`, for joins.
    pub fn association(&self, field: &str) -> Result<AssociationPath, Error> {
        if self.def.get_field(field).is_none() {
            return Err(Error::UnknownField {
                entity: self.def.name.clone(),
                field: field.to_string(),
            });
        }
        let relation = self
            .relations
            .iter()
            .find(|r| r.from_field == field)
            .ok_or_else(|| {
                Error::InvalidJoin(format!(
                    "{}.{} is not an association",
                    self.def.name, field
                ))
            })?;
        Ok(AssociationPath {
            owner_alias: self.alias.clone(),
            owner_entity: self.def.name.clone(),
            field: field.to_string(),
            target_entity: relation.to_entity.clone(),
        })
    }

    /// The plan source for this path.
    pub fn source(&self) -> Source {
        Source::new(self.def.name.clone(), self.alias.clone())
    }
}

/// A navigable association, `owner.field -> target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationPath {
    owner_alias: String,
    owner_entity: String,
    field: String,
    target_entity: String,
}

impl AssociationPath {
    /// Alias of the owning source.
    pub fn owner_alias(&self) -> &str {
        &self.owner_alias
    }

    /// Owning entity name.
    pub fn owner_entity(&self) -> &str {
        &self.owner_entity
    }

    /// Reference field on the owner.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Target entity name.
    pub fn target_entity(&self) -> &str {
        &self.target_entity
    }
}
