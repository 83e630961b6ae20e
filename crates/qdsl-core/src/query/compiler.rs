//! Plan compiler.
//!
//! The compiler validates a [`QueryPlan`] against the catalog and lowers it
//! into an [`ExecutionPlan`]: aliases become slot positions, field names
//! become field indexes, association joins become key-equality joins, and
//! aggregation shape is checked. Every error it raises is raised before an
//! execution adapter sees the plan.

use std::fmt::Write as _;
use std::sync::Arc;

use qdsl_proto::{
    AggregateFunction, CompareOp, Expr, InSource, JoinKind, NullOrdering, OrderDirection,
    Pagination, Predicate, QueryPlan, Value,
};

use crate::catalog::{Catalog, EntityDef};
use crate::error::Error;

/// An aliased entity bound to a row position.
#[derive(Debug, Clone)]
pub struct Slot {
    /// Alias in the query.
    pub alias: String,
    /// Entity definition.
    pub entity: Arc<EntityDef>,
}

/// Key equality of an association join: `owner.fk = target.id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinKey {
    /// Slot of the owning entity.
    pub owner_slot: usize,
    /// Index of the reference field on the owner.
    pub owner_field: usize,
    /// Index of the identity field on the target.
    pub target_field: usize,
}

/// One join step, binding `slot` against the rows produced so far.
#[derive(Debug, Clone)]
pub struct JoinStep {
    /// Slot this step binds.
    pub slot: usize,
    /// Inner or left.
    pub kind: JoinKind,
    /// Association key, if the join follows a relation.
    pub key: Option<JoinKey>,
    /// On-clause, applied to candidate rows before pairing.
    pub on: Option<PlanPredicate>,
    /// Readable form for `explain`.
    pub label: String,
}

impl JoinStep {
    /// A join with neither key nor on-clause pairs every row with every row.
    pub fn is_cross(&self) -> bool {
        self.key.is_none() && self.on.is_none()
    }
}

/// A reference to materialize eagerly from a fetch join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EagerLoad {
    /// Slot of the owning entity.
    pub owner_slot: usize,
    /// Index of the reference field on the owner.
    pub field_index: usize,
    /// Slot holding the joined target.
    pub target_slot: usize,
}

/// Lowered value expression.
#[derive(Debug, Clone)]
pub enum PlanExpr {
    /// Field `field` of the entity bound to `slot`, `depth` query levels up.
    Column {
        /// Enclosing levels to walk up; 0 is the current query.
        depth: usize,
        /// Slot position.
        slot: usize,
        /// Field position.
        field: usize,
    },
    /// Identity of the entity bound to `slot`; null on the empty side of a
    /// left join.
    Entity {
        /// Enclosing levels to walk up.
        depth: usize,
        /// Slot position.
        slot: usize,
    },
    /// Constant.
    Literal(Value),
    /// Aggregate over the current group.
    Aggregate {
        /// Function.
        function: AggregateFunction,
        /// Argument; `None` for `count(*)`.
        arg: Option<Box<PlanExpr>>,
    },
    /// String concatenation.
    Concat(Box<PlanExpr>, Box<PlanExpr>),
    /// String rendering.
    StringValue(Box<PlanExpr>),
    /// Case expression.
    Case {
        /// Branches, first match wins.
        branches: Vec<(PlanPredicate, PlanExpr)>,
        /// Default; null when absent.
        otherwise: Option<Box<PlanExpr>>,
    },
    /// Scalar subquery.
    Subquery(Arc<ExecutionPlan>),
}

/// Lowered predicate.
#[derive(Debug, Clone)]
pub enum PlanPredicate {
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: PlanExpr,
        /// Right operand.
        right: PlanExpr,
    },
    /// Inclusive range.
    Between {
        /// Tested value.
        expr: PlanExpr,
        /// Lower bound.
        low: PlanExpr,
        /// Upper bound.
        high: PlanExpr,
    },
    /// Membership in a literal set.
    InValues {
        /// Tested value.
        expr: PlanExpr,
        /// Candidates.
        values: Vec<Value>,
        /// `not in`.
        negated: bool,
    },
    /// Membership in a subquery's column.
    InSubquery {
        /// Tested value.
        expr: PlanExpr,
        /// Single-column subquery.
        plan: Arc<ExecutionPlan>,
        /// `not in`.
        negated: bool,
    },
    /// LIKE pattern.
    Like {
        /// Tested value.
        expr: PlanExpr,
        /// Pattern.
        pattern: String,
    },
    /// Null check.
    IsNull(PlanExpr),
    /// Non-null check.
    IsNotNull(PlanExpr),
    /// Conjunction.
    And(Vec<PlanPredicate>),
    /// Disjunction.
    Or(Vec<PlanPredicate>),
    /// Negation.
    Not(Box<PlanPredicate>),
}

/// A projected column.
#[derive(Debug, Clone)]
pub enum Projection {
    /// Materialize the entity bound to a slot.
    Entity {
        /// Slot position.
        slot: usize,
    },
    /// Evaluate a value.
    Value(PlanExpr),
}

/// A lowered sort key.
#[derive(Debug, Clone)]
pub struct PlanOrder {
    /// Key expression.
    pub expr: PlanExpr,
    /// Direction.
    pub direction: OrderDirection,
    /// Null placement.
    pub nulls: NullOrdering,
}

/// Grouping stage.
#[derive(Debug, Clone)]
pub struct Grouping {
    /// Group keys; empty means the whole input is one group.
    pub keys: Vec<PlanExpr>,
    /// Filter over groups.
    pub having: Option<PlanPredicate>,
}

/// A validated, slot-resolved plan ready for execution.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// The plan this was compiled from.
    pub ir: QueryPlan,
    /// Bound entities: sources first, then join targets.
    pub slots: Vec<Slot>,
    /// Join steps for every slot after the first.
    pub steps: Vec<JoinStep>,
    /// Where-clause, applied after all joins.
    pub filter: Option<PlanPredicate>,
    /// Grouping, present for aggregate queries.
    pub grouping: Option<Grouping>,
    /// Projected columns.
    pub projection: Vec<Projection>,
    /// Sort keys.
    pub order_by: Vec<PlanOrder>,
    /// Drop duplicate projected rows.
    pub distinct: bool,
    /// Rows to skip.
    pub offset: u64,
    /// Maximum rows to return.
    pub limit: Option<u64>,
    /// References to materialize from fetch joins.
    pub eager: Vec<EagerLoad>,
    /// References an enclosing query's rows.
    pub correlated: bool,
    /// Count the produced rows instead of reading a `count(*)` cell.
    pub count_rows: bool,
}

impl ExecutionPlan {
    /// Projected column labels.
    pub fn columns(&self) -> &[Expr] {
        &self.ir.select
    }

    /// Render the plan as readable text, one stage per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.slots.first() {
            let _ = writeln!(out, "scan {} as {}", root.entity.name, root.alias);
        }
        for step in &self.steps {
            let _ = writeln!(out, "{}", step.label);
        }
        if let Some(filter) = &self.ir.filter {
            let _ = writeln!(out, "filter {filter}");
        }
        if !self.ir.group_by.is_empty() {
            let _ = writeln!(out, "group by {}", join_labels(&self.ir.group_by));
        } else if self.grouping.is_some() {
            let _ = writeln!(out, "aggregate");
        }
        if let Some(having) = &self.ir.having {
            let _ = writeln!(out, "having {having}");
        }
        if !self.ir.order_by.is_empty() {
            let keys = self
                .ir
                .order_by
                .iter()
                .map(|spec| {
                    let mut key = format!(
                        "{} {}",
                        spec.expr,
                        match spec.direction {
                            OrderDirection::Asc => "asc",
                            OrderDirection::Desc => "desc",
                        }
                    );
                    match spec.nulls {
                        NullOrdering::Default => {}
                        NullOrdering::NullsFirst => key.push_str(" nulls first"),
                        NullOrdering::NullsLast => key.push_str(" nulls last"),
                    }
                    key
                })
                .collect::<Vec<_>>();
            let _ = writeln!(out, "order by {}", keys.join(", "));
        }
        if self.distinct {
            let _ = writeln!(out, "distinct");
        }
        if self.offset > 0 {
            let _ = writeln!(out, "offset {}", self.offset);
        }
        if let Some(limit) = self.limit {
            let _ = writeln!(out, "limit {limit}");
        }
        for eager in &self.eager {
            let owner = &self.slots[eager.owner_slot];
            let _ = writeln!(
                out,
                "fetch {}.{}",
                owner.alias, owner.entity.fields[eager.field_index].name
            );
        }
        let _ = write!(out, "select {}", join_labels(&self.ir.select));
        out
    }
}

fn join_labels(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Aliases visible while lowering one query level.
struct Scope<'p> {
    slots: Vec<Slot>,
    visible: usize,
    parent: Option<&'p Scope<'p>>,
}

impl Scope<'_> {
    /// Find an alias, innermost level first: `(depth, slot, entity)`.
    fn resolve(&self, alias: &str) -> Result<(usize, usize, Arc<EntityDef>), Error> {
        if let Some(pos) = self.slots.iter().position(|s| s.alias == alias) {
            if pos < self.visible {
                return Ok((0, pos, Arc::clone(&self.slots[pos].entity)));
            }
            return Err(Error::AliasNotInScope(format!(
                "{alias} is referenced before it is joined"
            )));
        }
        match self.parent {
            Some(parent) => parent
                .resolve(alias)
                .map(|(depth, slot, entity)| (depth + 1, slot, entity)),
            None => Err(Error::AliasNotInScope(alias.to_string())),
        }
    }
}

/// Compiles builder plans into execution plans.
pub struct PlanCompiler<'a> {
    catalog: &'a Catalog,
}

impl<'a> PlanCompiler<'a> {
    /// Create a compiler over a catalog.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Compile the content plan.
    pub fn compile(&self, plan: &QueryPlan) -> Result<ExecutionPlan, Error> {
        let (compiled, _) = self.compile_level(plan, None)?;
        tracing::debug!(
            aliases = compiled.slots.len(),
            joins = compiled.steps.len(),
            grouped = compiled.grouping.is_some(),
            columns = compiled.projection.len(),
            "compiled query plan"
        );
        Ok(compiled)
    }

    /// Compile the count plan: the selection becomes `count(*)`, and
    /// grouping, ordering, and paging are dropped.
    pub fn compile_count(&self, plan: &QueryPlan) -> Result<ExecutionPlan, Error> {
        let mut ir = plan.clone();
        if !ir.group_by.is_empty() || ir.having.is_some() {
            tracing::warn!(
                group_keys = ir.group_by.len(),
                "count plan drops grouping; the total counts joined rows, not groups"
            );
        }
        ir.group_by.clear();
        ir.having = None;
        ir.order_by.clear();
        ir.pagination = Pagination::default();

        let count_rows = ir.distinct;
        if !count_rows {
            ir.select = vec![Expr::Aggregate {
                function: AggregateFunction::Count,
                arg: None,
            }];
        }

        let (mut compiled, _) = self.compile_level(&ir, None)?;
        compiled.count_rows = count_rows;
        tracing::debug!(
            aliases = compiled.slots.len(),
            joins = compiled.steps.len(),
            count_rows,
            "compiled count plan"
        );
        Ok(compiled)
    }

    /// Compile one query level. Returns the plan and how many enclosing
    /// levels it reaches into.
    fn compile_level(
        &self,
        plan: &QueryPlan,
        parent: Option<&Scope<'_>>,
    ) -> Result<(ExecutionPlan, usize), Error> {
        if plan.sources.is_empty() {
            return Err(Error::InvalidProjection("query has no from clause".into()));
        }
        if plan.select.is_empty() {
            return Err(Error::InvalidProjection("query selects nothing".into()));
        }

        let mut slots: Vec<Slot> = Vec::new();
        let targets = plan
            .sources
            .iter()
            .chain(plan.joins.iter().map(|j| &j.target));
        for source in targets {
            if slots.iter().any(|s| s.alias == source.alias) {
                return Err(Error::InvalidJoin(format!(
                    "alias {} is declared twice",
                    source.alias
                )));
            }
            slots.push(Slot {
                alias: source.alias.clone(),
                entity: self.catalog.resolve(&source.entity)?,
            });
        }

        let mut scope = Scope {
            slots,
            visible: plan.sources.len(),
            parent,
        };
        let mut reach = 0;

        // Extra from-sources pair with every row.
        let mut steps = Vec::new();
        for (slot, source) in plan.sources.iter().enumerate().skip(1) {
            steps.push(JoinStep {
                slot,
                kind: JoinKind::Inner,
                key: None,
                on: None,
                label: format!("cross join {} as {}", source.entity, source.alias),
            });
        }

        let mut eager = Vec::new();
        for (i, join) in plan.joins.iter().enumerate() {
            let slot = plan.sources.len() + i;
            scope.visible = slot + 1;
            let target = Arc::clone(&scope.slots[slot].entity);

            let key = match &join.association {
                Some(assoc) => {
                    let owner_slot = scope.slots[..slot]
                        .iter()
                        .position(|s| s.alias == assoc.owner_alias)
                        .ok_or_else(|| {
                            Error::InvalidJoin(format!(
                                "association owner {} must be joined before {}",
                                assoc.owner_alias, join.target.alias
                            ))
                        })?;
                    let owner = &scope.slots[owner_slot].entity;
                    let relation = self
                        .catalog
                        .relation_for(&owner.name, &assoc.field)
                        .ok_or_else(|| {
                            Error::InvalidJoin(format!(
                                "{}.{} is not an association",
                                owner.name, assoc.field
                            ))
                        })?;
                    if relation.to_entity != target.name {
                        return Err(Error::InvalidJoin(format!(
                            "{}.{} leads to {}, not {}",
                            owner.name, assoc.field, relation.to_entity, target.name
                        )));
                    }
                    let owner_field = owner.field_index(&assoc.field).ok_or_else(|| {
                        Error::UnknownField {
                            entity: owner.name.clone(),
                            field: assoc.field.clone(),
                        }
                    })?;
                    let target_field = target.identity_index().ok_or_else(|| {
                        Error::InvalidSchema(format!("{} has no identity field", target.name))
                    })?;
                    if join.fetch {
                        eager.push(EagerLoad {
                            owner_slot,
                            field_index: owner_field,
                            target_slot: slot,
                        });
                    }
                    Some(JoinKey {
                        owner_slot,
                        owner_field,
                        target_field,
                    })
                }
                None => {
                    if join.fetch {
                        return Err(Error::InvalidJoin(format!(
                            "fetch join on {} needs an association",
                            join.target.alias
                        )));
                    }
                    None
                }
            };

            let on = match &join.on {
                Some(predicate) => {
                    if predicate_has_aggregate(predicate) {
                        return Err(Error::InvalidProjection(
                            "aggregates are not allowed in on-clauses".into(),
                        ));
                    }
                    Some(self.lower_predicate(predicate, &scope, &mut reach)?)
                }
                None => None,
            };

            if join.kind == JoinKind::Left && key.is_none() && on.is_none() {
                return Err(Error::InvalidJoin(format!(
                    "left join on unrelated entity {} needs an on-clause",
                    join.target.alias
                )));
            }

            let mut label = format!(
                "{} {} as {}",
                match (join.kind, key.is_none() && on.is_none()) {
                    (JoinKind::Inner, true) => "cross join",
                    (JoinKind::Inner, false) => "inner join",
                    (JoinKind::Left, _) => "left join",
                },
                join.target.entity,
                join.target.alias
            );
            if let Some(assoc) = &join.association {
                let _ = write!(
                    label,
                    " on {}.{} = {}.{}",
                    assoc.owner_alias, assoc.field, join.target.alias, target.identity_field
                );
            }
            if let Some(predicate) = &join.on {
                let word = if join.association.is_some() { "and" } else { "on" };
                let _ = write!(label, " {word} {predicate}");
            }

            steps.push(JoinStep {
                slot,
                kind: join.kind,
                key,
                on,
                label,
            });
        }
        scope.visible = scope.slots.len();

        let filter = match &plan.filter {
            Some(predicate) => {
                if predicate_has_aggregate(predicate) {
                    return Err(Error::InvalidProjection(
                        "aggregates are not allowed in the where clause; use having".into(),
                    ));
                }
                Some(self.lower_predicate(predicate, &scope, &mut reach)?)
            }
            None => None,
        };

        // Aggregation shape.
        if plan.having.is_some() && plan.group_by.is_empty() {
            return Err(Error::InvalidProjection("having requires group by".into()));
        }
        if plan.group_by.iter().any(has_aggregate) {
            return Err(Error::InvalidProjection(
                "aggregates are not allowed as group keys".into(),
            ));
        }
        let aggregated = !plan.group_by.is_empty() || plan.select.iter().any(has_aggregate);
        if aggregated {
            for expr in &plan.select {
                if matches!(expr, Expr::Entity { .. }) {
                    return Err(Error::InvalidProjection(format!(
                        "whole entity {expr} cannot be selected in an aggregate query"
                    )));
                }
                if !group_safe(expr, &plan.group_by) {
                    return Err(Error::InvalidProjection(format!(
                        "{expr} is neither aggregated nor grouped"
                    )));
                }
            }
            for spec in &plan.order_by {
                if !group_safe(&spec.expr, &plan.group_by) {
                    return Err(Error::InvalidProjection(format!(
                        "order key {} is neither aggregated nor grouped",
                        spec.expr
                    )));
                }
            }
            if let Some(having) = &plan.having {
                if !predicate_group_safe(having, &plan.group_by) {
                    return Err(Error::InvalidProjection(format!(
                        "having clause {having} uses ungrouped columns"
                    )));
                }
            }
        } else if plan.order_by.iter().any(|spec| has_aggregate(&spec.expr)) {
            return Err(Error::InvalidProjection(
                "aggregate order keys need an aggregate query".into(),
            ));
        }
        for expr in &plan.select {
            if has_nested_aggregate(expr) {
                return Err(Error::InvalidProjection(format!(
                    "{expr} nests aggregate functions"
                )));
            }
        }

        let grouping = if aggregated {
            let keys = plan
                .group_by
                .iter()
                .map(|expr| self.lower_expr(expr, &scope, &mut reach))
                .collect::<Result<Vec<_>, _>>()?;
            let having = match &plan.having {
                Some(predicate) => Some(self.lower_predicate(predicate, &scope, &mut reach)?),
                None => None,
            };
            Some(Grouping { keys, having })
        } else {
            None
        };

        let mut projection = Vec::with_capacity(plan.select.len());
        for expr in &plan.select {
            match expr {
                Expr::Entity { alias } => {
                    let (depth, slot, _) = scope.resolve(alias)?;
                    if depth == 0 && parent.is_none() {
                        projection.push(Projection::Entity { slot });
                    } else {
                        reach = reach.max(depth);
                        projection.push(Projection::Value(PlanExpr::Entity { depth, slot }));
                    }
                }
                other => projection.push(Projection::Value(
                    self.lower_expr(other, &scope, &mut reach)?,
                )),
            }
        }

        let order_by = plan
            .order_by
            .iter()
            .map(|spec| {
                Ok(PlanOrder {
                    expr: self.lower_expr(&spec.expr, &scope, &mut reach)?,
                    direction: spec.direction,
                    nulls: spec.nulls,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let compiled = ExecutionPlan {
            ir: plan.clone(),
            slots: scope.slots,
            steps,
            filter,
            grouping,
            projection,
            order_by,
            distinct: plan.distinct,
            offset: plan.pagination.offset,
            limit: plan.pagination.limit,
            eager,
            correlated: reach > 0,
            count_rows: false,
        };
        Ok((compiled, reach))
    }

    fn lower_expr(
        &self,
        expr: &Expr,
        scope: &Scope<'_>,
        reach: &mut usize,
    ) -> Result<PlanExpr, Error> {
        let lowered = match expr {
            Expr::Column(col) => {
                let (depth, slot, entity) = scope.resolve(&col.alias)?;
                let field = entity
                    .field_index(&col.field)
                    .ok_or_else(|| Error::UnknownField {
                        entity: entity.name.clone(),
                        field: col.field.clone(),
                    })?;
                *reach = (*reach).max(depth);
                PlanExpr::Column { depth, slot, field }
            }
            Expr::Entity { alias } => {
                let (depth, slot, _) = scope.resolve(alias)?;
                *reach = (*reach).max(depth);
                PlanExpr::Entity { depth, slot }
            }
            Expr::Literal(value) => PlanExpr::Literal(value.clone()),
            Expr::Aggregate { function, arg } => PlanExpr::Aggregate {
                function: *function,
                arg: match arg {
                    Some(arg) => Some(Box::new(self.lower_expr(arg, scope, reach)?)),
                    None => None,
                },
            },
            Expr::Concat(left, right) => PlanExpr::Concat(
                Box::new(self.lower_expr(left, scope, reach)?),
                Box::new(self.lower_expr(right, scope, reach)?),
            ),
            Expr::StringValue(inner) => {
                PlanExpr::StringValue(Box::new(self.lower_expr(inner, scope, reach)?))
            }
            Expr::Case(case) => {
                let branches = case
                    .branches
                    .iter()
                    .map(|branch| {
                        Ok((
                            self.lower_predicate(&branch.when, scope, reach)?,
                            self.lower_expr(&branch.then, scope, reach)?,
                        ))
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                let otherwise = match &case.otherwise {
                    Some(expr) => Some(Box::new(self.lower_expr(expr, scope, reach)?)),
                    None => None,
                };
                PlanExpr::Case {
                    branches,
                    otherwise,
                }
            }
            Expr::Subquery(plan) => PlanExpr::Subquery(self.lower_subquery(plan, scope, reach)?),
        };
        Ok(lowered)
    }

    fn lower_subquery(
        &self,
        plan: &QueryPlan,
        scope: &Scope<'_>,
        reach: &mut usize,
    ) -> Result<Arc<ExecutionPlan>, Error> {
        if plan.select.len() != 1 {
            return Err(Error::InvalidSubqueryShape {
                columns: plan.select.len(),
            });
        }
        let (compiled, inner_reach) = self.compile_level(plan, Some(scope))?;
        *reach = (*reach).max(inner_reach.saturating_sub(1));
        Ok(Arc::new(compiled))
    }

    fn lower_predicate(
        &self,
        predicate: &Predicate,
        scope: &Scope<'_>,
        reach: &mut usize,
    ) -> Result<PlanPredicate, Error> {
        let lowered = match predicate {
            Predicate::Compare { op, left, right } => PlanPredicate::Compare {
                op: *op,
                left: self.lower_expr(left, scope, reach)?,
                right: self.lower_expr(right, scope, reach)?,
            },
            Predicate::Between { expr, low, high } => PlanPredicate::Between {
                expr: self.lower_expr(expr, scope, reach)?,
                low: self.lower_expr(low, scope, reach)?,
                high: self.lower_expr(high, scope, reach)?,
            },
            Predicate::In {
                expr,
                source,
                negated,
            } => {
                let expr = self.lower_expr(expr, scope, reach)?;
                match source {
                    InSource::Values(values) => PlanPredicate::InValues {
                        expr,
                        values: values.clone(),
                        negated: *negated,
                    },
                    InSource::Subquery(plan) => PlanPredicate::InSubquery {
                        expr,
                        plan: self.lower_subquery(plan, scope, reach)?,
                        negated: *negated,
                    },
                }
            }
            Predicate::Like { expr, pattern } => PlanPredicate::Like {
                expr: self.lower_expr(expr, scope, reach)?,
                pattern: pattern.clone(),
            },
            Predicate::IsNull(expr) => PlanPredicate::IsNull(self.lower_expr(expr, scope, reach)?),
            Predicate::IsNotNull(expr) => {
                PlanPredicate::IsNotNull(self.lower_expr(expr, scope, reach)?)
            }
            Predicate::And(parts) => PlanPredicate::And(
                parts
                    .iter()
                    .map(|p| self.lower_predicate(p, scope, reach))
                    .collect::<Result<_, _>>()?,
            ),
            Predicate::Or(parts) => PlanPredicate::Or(
                parts
                    .iter()
                    .map(|p| self.lower_predicate(p, scope, reach))
                    .collect::<Result<_, _>>()?,
            ),
            Predicate::Not(inner) => {
                PlanPredicate::Not(Box::new(self.lower_predicate(inner, scope, reach)?))
            }
        };
        Ok(lowered)
    }
}

// ============== Aggregation shape ==============

/// Aggregates at this level; subqueries aggregate on their own.
fn has_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Aggregate { .. } => true,
        Expr::Column(_) | Expr::Entity { .. } | Expr::Literal(_) | Expr::Subquery(_) => false,
        Expr::Concat(left, right) => has_aggregate(left) || has_aggregate(right),
        Expr::StringValue(inner) => has_aggregate(inner),
        Expr::Case(case) => {
            case.branches
                .iter()
                .any(|b| predicate_has_aggregate(&b.when) || has_aggregate(&b.then))
                || case.otherwise.as_deref().is_some_and(has_aggregate)
        }
    }
}

fn predicate_has_aggregate(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Compare { left, right, .. } => has_aggregate(left) || has_aggregate(right),
        Predicate::Between { expr, low, high } => {
            has_aggregate(expr) || has_aggregate(low) || has_aggregate(high)
        }
        Predicate::In { expr, .. }
        | Predicate::Like { expr, .. }
        | Predicate::IsNull(expr)
        | Predicate::IsNotNull(expr) => has_aggregate(expr),
        Predicate::And(parts) | Predicate::Or(parts) => parts.iter().any(predicate_has_aggregate),
        Predicate::Not(inner) => predicate_has_aggregate(inner),
    }
}

fn has_nested_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Aggregate { arg, .. } => arg.as_deref().is_some_and(has_aggregate),
        Expr::Concat(left, right) => has_nested_aggregate(left) || has_nested_aggregate(right),
        Expr::StringValue(inner) => has_nested_aggregate(inner),
        Expr::Case(case) => {
            case.branches.iter().any(|b| has_nested_aggregate(&b.then))
                || case.otherwise.as_deref().is_some_and(has_nested_aggregate)
        }
        _ => false,
    }
}

/// Whether `expr` has one value per group.
fn group_safe(expr: &Expr, keys: &[Expr]) -> bool {
    if keys.contains(expr) {
        return true;
    }
    match expr {
        Expr::Aggregate { .. } | Expr::Literal(_) => true,
        Expr::Subquery(sub) => subquery_group_safe(sub, keys),
        Expr::Column(_) | Expr::Entity { .. } => false,
        Expr::Concat(left, right) => group_safe(left, keys) && group_safe(right, keys),
        Expr::StringValue(inner) => group_safe(inner, keys),
        Expr::Case(case) => {
            case.branches
                .iter()
                .all(|b| predicate_group_safe(&b.when, keys) && group_safe(&b.then, keys))
                && case
                    .otherwise
                    .as_deref()
                    .map_or(true, |e| group_safe(e, keys))
        }
    }
}

fn predicate_group_safe(predicate: &Predicate, keys: &[Expr]) -> bool {
    match predicate {
        Predicate::Compare { left, right, .. } => {
            group_safe(left, keys) && group_safe(right, keys)
        }
        Predicate::Between { expr, low, high } => {
            group_safe(expr, keys) && group_safe(low, keys) && group_safe(high, keys)
        }
        Predicate::In { expr, source, .. } => {
            group_safe(expr, keys)
                && match source {
                    InSource::Subquery(sub) => subquery_group_safe(sub, keys),
                    InSource::Values(_) => true,
                }
        }
        Predicate::Like { expr, .. } | Predicate::IsNull(expr) | Predicate::IsNotNull(expr) => {
            group_safe(expr, keys)
        }
        Predicate::And(parts) | Predicate::Or(parts) => {
            parts.iter().all(|p| predicate_group_safe(p, keys))
        }
        Predicate::Not(inner) => predicate_group_safe(inner, keys),
    }
}

/// A subquery is evaluated once per group, so every outer column it reads
/// must be a group key.
fn subquery_group_safe(sub: &QueryPlan, keys: &[Expr]) -> bool {
    let mut outer = Vec::new();
    collect_outer_refs(sub, &mut Vec::new(), &mut outer);
    outer.into_iter().all(|expr| keys.contains(expr))
}

/// Collect column and entity references to aliases not bound by `plan` or
/// any plan enclosing it inside the subquery.
fn collect_outer_refs<'a>(
    plan: &'a QueryPlan,
    bound: &mut Vec<&'a str>,
    out: &mut Vec<&'a Expr>,
) {
    let depth = bound.len();
    bound.extend(plan.aliases());
    for expr in plan.select.iter().chain(&plan.group_by) {
        collect_expr_refs(expr, bound, out);
    }
    for spec in &plan.order_by {
        collect_expr_refs(&spec.expr, bound, out);
    }
    let predicates = plan
        .joins
        .iter()
        .filter_map(|join| join.on.as_ref())
        .chain(plan.filter.as_ref())
        .chain(plan.having.as_ref());
    for predicate in predicates {
        collect_predicate_refs(predicate, bound, out);
    }
    bound.truncate(depth);
}

fn collect_expr_refs<'a>(expr: &'a Expr, bound: &mut Vec<&'a str>, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Column(column) => {
            if !bound.contains(&column.alias.as_str()) {
                out.push(expr);
            }
        }
        Expr::Entity { alias } => {
            if !bound.contains(&alias.as_str()) {
                out.push(expr);
            }
        }
        Expr::Literal(_) => {}
        Expr::Aggregate { arg, .. } => {
            if let Some(arg) = arg {
                collect_expr_refs(arg, bound, out);
            }
        }
        Expr::Concat(left, right) => {
            collect_expr_refs(left, bound, out);
            collect_expr_refs(right, bound, out);
        }
        Expr::StringValue(inner) => collect_expr_refs(inner, bound, out),
        Expr::Case(case) => {
            for branch in &case.branches {
                collect_predicate_refs(&branch.when, bound, out);
                collect_expr_refs(&branch.then, bound, out);
            }
            if let Some(otherwise) = &case.otherwise {
                collect_expr_refs(otherwise, bound, out);
            }
        }
        Expr::Subquery(sub) => collect_outer_refs(sub, bound, out),
    }
}

fn collect_predicate_refs<'a>(
    predicate: &'a Predicate,
    bound: &mut Vec<&'a str>,
    out: &mut Vec<&'a Expr>,
) {
    match predicate {
        Predicate::Compare { left, right, .. } => {
            collect_expr_refs(left, bound, out);
            collect_expr_refs(right, bound, out);
        }
        Predicate::Between { expr, low, high } => {
            collect_expr_refs(expr, bound, out);
            collect_expr_refs(low, bound, out);
            collect_expr_refs(high, bound, out);
        }
        Predicate::In { expr, source, .. } => {
            collect_expr_refs(expr, bound, out);
            if let InSource::Subquery(sub) = source {
                collect_outer_refs(sub, bound, out);
            }
        }
        Predicate::Like { expr, .. } | Predicate::IsNull(expr) | Predicate::IsNotNull(expr) => {
            collect_expr_refs(expr, bound, out);
        }
        Predicate::And(parts) | Predicate::Or(parts) => {
            for part in parts {
                collect_predicate_refs(part, bound, out);
            }
        }
        Predicate::Not(inner) => collect_predicate_refs(inner, bound, out),
    }
}
