//! Query plan IR.
//!
//! A [`QueryPlan`] is the untyped, serializable description a query builder
//! accumulates: sources, joins, predicates, grouping, ordering, paging, and
//! the select list. Type checking happens when expressions are constructed;
//! alias resolution and lowering happen in the plan compiler.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Count of non-null values (or rows, for `count(*)`).
    Count,
    /// Sum of numeric values.
    Sum,
    /// Average of numeric values, never truncated.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

impl AggregateFunction {
    /// Lowercase function name.
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl CompareOp {
    /// Operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A field of an aliased source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Alias of the source the field belongs to.
    pub alias: String,
    /// Field name.
    pub field: String,
}

/// Value expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A field of an aliased source.
    Column(ColumnRef),
    /// A whole entity (projection) or its identity (comparison).
    Entity {
        /// Alias of the source.
        alias: String,
    },
    /// A constant.
    Literal(Value),
    /// An aggregate; `arg` is `None` for `count(*)`.
    Aggregate {
        /// Aggregate function.
        function: AggregateFunction,
        /// Aggregated expression.
        arg: Option<Box<Expr>>,
    },
    /// String concatenation.
    Concat(Box<Expr>, Box<Expr>),
    /// Conversion of any scalar to its string form.
    StringValue(Box<Expr>),
    /// Searched case expression.
    Case(CaseExpr),
    /// Scalar subquery.
    Subquery(Box<QueryPlan>),
}

/// Case expression: branches evaluated top to bottom, first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseExpr {
    /// Ordered branches.
    pub branches: Vec<CaseBranch>,
    /// Result when no branch matches; `None` yields null.
    pub otherwise: Option<Box<Expr>>,
}

/// One `when ... then ...` branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    /// Branch condition.
    pub when: Predicate,
    /// Branch result.
    pub then: Expr,
}

/// Right-hand side of an `in` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InSource {
    /// Literal set of values.
    Values(Vec<Value>),
    /// Single-column subquery.
    Subquery(Box<QueryPlan>),
}

/// Boolean predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Expr,
        /// Right operand.
        right: Expr,
    },
    /// Inclusive range check.
    Between {
        /// Tested expression.
        expr: Expr,
        /// Lower bound (inclusive).
        low: Expr,
        /// Upper bound (inclusive).
        high: Expr,
    },
    /// Set membership.
    In {
        /// Tested expression.
        expr: Expr,
        /// Candidate set.
        source: InSource,
        /// `not in` when true.
        negated: bool,
    },
    /// SQL LIKE pattern match.
    Like {
        /// Tested expression.
        expr: Expr,
        /// Pattern using `%` and `_`.
        pattern: String,
    },
    /// Expression is null.
    IsNull(Expr),
    /// Expression is not null.
    IsNotNull(Expr),
    /// All conditions must hold.
    And(Vec<Predicate>),
    /// At least one condition must hold.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Combine with another predicate using AND, flattening nested ANDs.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), right) => {
                left.push(right);
                Predicate::And(left)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// Combine with another predicate using OR, flattening nested ORs.
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), right) => {
                left.push(right);
                Predicate::Or(left)
            }
            (left, right) => Predicate::Or(vec![left, right]),
        }
    }

    /// Negate this predicate.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        match self {
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// AND-combine the present predicates, skipping `None` slots.
    ///
    /// Returns `None` when every slot is empty, so an absent criterion never
    /// turns into a predicate that matches nothing.
    pub fn all<I>(predicates: I) -> Option<Predicate>
    where
        I: IntoIterator<Item = Option<Predicate>>,
    {
        predicates.into_iter().flatten().reduce(Predicate::and)
    }

    /// OR-combine the present predicates, skipping `None` slots.
    pub fn any<I>(predicates: I) -> Option<Predicate>
    where
        I: IntoIterator<Item = Option<Predicate>>,
    {
        predicates.into_iter().flatten().reduce(Predicate::or)
    }
}

/// A query source: an entity under an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Entity name.
    pub entity: String,
    /// Alias, unique within one query level.
    pub alias: String,
}

impl Source {
    /// Create a new source.
    pub fn new(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: alias.into(),
        }
    }
}

/// Join kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    /// Inner join: unmatched left rows are dropped.
    Inner,
    /// Left outer join: unmatched left rows are kept with a null right side.
    Left,
}

/// Association a join follows: the owning side's reference field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Alias of the owning source.
    pub owner_alias: String,
    /// Reference field on the owning entity.
    pub field: String,
}

/// A join clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    /// Joined source.
    pub target: Source,
    /// Join kind.
    pub kind: JoinKind,
    /// Followed association; `None` for an unrelated-entity (theta) join.
    pub association: Option<Association>,
    /// Explicit on-clause, applied before rows are paired.
    pub on: Option<Predicate>,
    /// Materialize the joined entity into the owner's reference.
    pub fetch: bool,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Placement of null sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NullOrdering {
    /// Backend-defined placement.
    #[default]
    Default,
    /// Nulls before every non-null value, regardless of direction.
    NullsFirst,
    /// Nulls after every non-null value, regardless of direction.
    NullsLast,
}

/// Order specification for sorting results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Sort key.
    pub expr: Expr,
    /// Sort direction.
    pub direction: OrderDirection,
    /// Null placement.
    pub nulls: NullOrdering,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Asc,
            nulls: NullOrdering::Default,
        }
    }

    /// Create a descending order spec.
    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Desc,
            nulls: NullOrdering::Default,
        }
    }
}

/// Pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    /// Number of results to skip.
    pub offset: u64,
    /// Maximum number of results to return.
    pub limit: Option<u64>,
}

impl Pagination {
    /// Create pagination with offset and limit.
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Check whether any paging is applied.
    pub fn is_unbounded(&self) -> bool {
        self.offset == 0 && self.limit.is_none()
    }
}

/// The plan a query builder accumulates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Projected expressions.
    pub select: Vec<Expr>,
    /// Sources in `from` order.
    pub sources: Vec<Source>,
    /// Join clauses in declaration order.
    pub joins: Vec<JoinClause>,
    /// Where-clause, applied after joins.
    pub filter: Option<Predicate>,
    /// Grouping keys.
    pub group_by: Vec<Expr>,
    /// Filter over groups.
    pub having: Option<Predicate>,
    /// Sort keys.
    pub order_by: Vec<OrderSpec>,
    /// Paging.
    pub pagination: Pagination,
    /// Drop duplicate projected rows.
    #[serde(default)]
    pub distinct: bool,
}

impl QueryPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// All aliases introduced at this level, sources first.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.sources
            .iter()
            .map(|s| s.alias.as_str())
            .chain(self.joins.iter().map(|j| j.target.alias.as_str()))
    }

    /// Encode the plan as JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a plan from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(col) => write!(f, "{}.{}", col.alias, col.field),
            Expr::Entity { alias } => write!(f, "{alias}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Aggregate { function, arg } => match arg {
                Some(arg) => write!(f, "{}({arg})", function.name()),
                None => write!(f, "{}(*)", function.name()),
            },
            Expr::Concat(left, right) => write!(f, "concat({left}, {right})"),
            Expr::StringValue(inner) => write!(f, "str({inner})"),
            Expr::Case(case) => {
                write!(f, "case")?;
                for branch in &case.branches {
                    write!(f, " when {} then {}", branch.when, branch.then)?;
                }
                if let Some(otherwise) = &case.otherwise {
                    write!(f, " else {otherwise}")?;
                }
                write!(f, " end")
            }
            Expr::Subquery(plan) => {
                write!(f, "(select ")?;
                write_list(f, &plan.select)?;
                write!(f, " from ")?;
                for (i, source) in plan.sources.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", source.entity, source.alias)?;
                }
                if let Some(filter) = &plan.filter {
                    write!(f, " where {filter}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
            Predicate::Between { expr, low, high } => {
                write!(f, "{expr} between {low} and {high}")
            }
            Predicate::In {
                expr,
                source,
                negated,
            } => {
                let keyword = if *negated { "not in" } else { "in" };
                match source {
                    InSource::Values(values) => {
                        write!(f, "{expr} {keyword} (")?;
                        for (i, value) in values.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{value}")?;
                        }
                        write!(f, ")")
                    }
                    InSource::Subquery(plan) => {
                        write!(f, "{expr} {keyword} {}", Expr::Subquery(plan.clone()))
                    }
                }
            }
            Predicate::Like { expr, pattern } => write!(f, "{expr} like '{pattern}'"),
            Predicate::IsNull(expr) => write!(f, "{expr} is null"),
            Predicate::IsNotNull(expr) => write!(f, "{expr} is not null"),
            Predicate::And(parts) => write_joined(f, parts, " and "),
            Predicate::Or(parts) => write_joined(f, parts, " or "),
            Predicate::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{expr}")?;
    }
    Ok(())
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{part}")?;
    }
    write!(f, ")")
}
