//! Fluent query builder.
//!
//! A [`Query`] is a value: every method consumes it and returns the extended
//! query, and cloning branches it. Misuse that cannot be rejected by the type
//! system (an `on` with no preceding join, a fetch join on an unrelated
//! entity) is recorded and reported when the query is compiled, before any
//! execution.

use std::fmt;
use std::sync::Arc;

use qdsl_proto::{
    Association, Cell, JoinClause, JoinKind, Predicate, QueryPlan, QueryResults, ResultSet, Tuple,
};

use super::adapter::ExecutionAdapter;
use super::compiler::{ExecutionPlan, PlanCompiler};
use super::expr::{AssociationPath, EntityPath, Expression, OrderSpecifier};
use super::results::FromCell;
use super::subquery::SubQuery;
use super::types::ExprType;
use crate::catalog::SharedCatalog;
use crate::error::Error;

/// Creates queries bound to a catalog and an execution adapter.
#[derive(Clone)]
pub struct QueryFactory {
    catalog: SharedCatalog,
    adapter: Arc<dyn ExecutionAdapter>,
}

impl QueryFactory {
    /// Create a factory.
    pub fn new(catalog: SharedCatalog, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        Self { catalog, adapter }
    }

    /// The catalog queries resolve against.
    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// An empty query. Also the starting point for subqueries.
    pub fn query(&self) -> Query {
        Query {
            catalog: Arc::clone(&self.catalog),
            adapter: Arc::clone(&self.adapter),
            plan: QueryPlan::new(),
            select_types: Vec::new(),
            fault: None,
        }
    }

    /// A query projecting `targets`.
    pub fn select<I>(&self, targets: I) -> Query
    where
        I: IntoIterator,
        I::Item: Into<Expression>,
    {
        self.query().select(targets)
    }

    /// `select path from path`.
    pub fn select_from(&self, path: &EntityPath) -> Query {
        self.select([path.as_expr()]).from([path])
    }
}

impl fmt::Debug for QueryFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFactory").finish_non_exhaustive()
    }
}

/// A query under construction.
#[derive(Clone)]
pub struct Query {
    catalog: SharedCatalog,
    adapter: Arc<dyn ExecutionAdapter>,
    plan: QueryPlan,
    select_types: Vec<ExprType>,
    fault: Option<String>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("plan", &self.plan)
            .field("select_types", &self.select_types)
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}

impl Query {
    /// The accumulated plan.
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Types of the projected columns.
    pub fn select_types(&self) -> &[ExprType] {
        &self.select_types
    }

    fn record_fault(&mut self, fault: String) {
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    // ============== Clauses ==============

    /// Replace the projection.
    pub fn select<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Expression>,
    {
        self.plan.select.clear();
        self.select_types.clear();
        for target in targets {
            let target = target.into();
            self.select_types.push(target.ty().clone());
            self.plan.select.push(target.into_expr());
        }
        self
    }

    /// Add sources. Several sources pair every row with every row; a
    /// where-clause relating them makes a theta join.
    pub fn from<'p>(mut self, paths: impl IntoIterator<Item = &'p EntityPath>) -> Self {
        self.plan.sources.extend(paths.into_iter().map(EntityPath::source));
        self
    }

    /// Inner join following an association.
    pub fn join(self, association: &AssociationPath, alias: &EntityPath) -> Self {
        self.push_association(association, alias, JoinKind::Inner)
    }

    /// Left join following an association.
    pub fn left_join(self, association: &AssociationPath, alias: &EntityPath) -> Self {
        self.push_association(association, alias, JoinKind::Left)
    }

    /// Inner join on an unrelated entity; pair it with [`Query::on`], or
    /// leave it bare for a cross join.
    pub fn join_entity(self, alias: &EntityPath) -> Self {
        self.push_join(alias, JoinKind::Inner, None)
    }

    /// Left join on an unrelated entity; requires [`Query::on`].
    pub fn left_join_entity(self, alias: &EntityPath) -> Self {
        self.push_join(alias, JoinKind::Left, None)
    }

    fn push_association(
        mut self,
        association: &AssociationPath,
        alias: &EntityPath,
        kind: JoinKind,
    ) -> Self {
        if association.target_entity() != alias.entity() {
            self.record_fault(format!(
                "{}.{} leads to {}, not {}",
                association.owner_entity(),
                association.field(),
                association.target_entity(),
                alias.entity()
            ));
        }
        let association = Association {
            owner_alias: association.owner_alias().to_string(),
            field: association.field().to_string(),
        };
        self.push_join(alias, kind, Some(association))
    }

    fn push_join(
        mut self,
        alias: &EntityPath,
        kind: JoinKind,
        association: Option<Association>,
    ) -> Self {
        self.plan.joins.push(JoinClause {
            target: alias.source(),
            kind,
            association,
            on: None,
            fetch: false,
        });
        self
    }

    /// Add an on-clause to the most recent join. On-clauses filter candidate
    /// rows before pairing, so a left join keeps rows they reject.
    pub fn on(mut self, predicate: Predicate) -> Self {
        match self.plan.joins.last_mut() {
            Some(join) => {
                join.on = Some(match join.on.take() {
                    Some(existing) => existing.and(predicate),
                    None => predicate,
                });
            }
            None => self.record_fault("on() without a preceding join".into()),
        }
        self
    }

    /// Materialize the most recent association join into its owner.
    pub fn fetch_join(mut self) -> Self {
        match self.plan.joins.last_mut() {
            Some(join) if join.association.is_some() => join.fetch = true,
            Some(join) => {
                let alias = join.target.alias.clone();
                self.record_fault(format!(
                    "fetch_join() on {alias} needs an association join"
                ));
            }
            None => self.record_fault("fetch_join() without a preceding join".into()),
        }
        self
    }

    /// Add a where-predicate, AND-ed with any existing one.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.plan.filter = Some(match self.plan.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// AND-combine optional predicates; `None` slots are dropped.
    pub fn filter_all<I>(self, predicates: I) -> Self
    where
        I: IntoIterator<Item = Option<Predicate>>,
    {
        match Predicate::all(predicates) {
            Some(predicate) => self.filter(predicate),
            None => self,
        }
    }

    /// Add group keys.
    pub fn group_by<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Expression>,
    {
        self.plan
            .group_by
            .extend(keys.into_iter().map(|key| key.into().into_expr()));
        self
    }

    /// Add a group filter, AND-ed with any existing one.
    pub fn having(mut self, predicate: Predicate) -> Self {
        self.plan.having = Some(match self.plan.having.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Add sort keys.
    pub fn order_by(mut self, specs: impl IntoIterator<Item = OrderSpecifier>) -> Self {
        self.plan
            .order_by
            .extend(specs.into_iter().map(OrderSpecifier::into_spec));
        self
    }

    /// Skip `offset` rows.
    pub fn offset(mut self, offset: u64) -> Self {
        self.plan.pagination.offset = offset;
        self
    }

    /// Return at most `limit` rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.plan.pagination.limit = Some(limit);
        self
    }

    /// Drop duplicate rows.
    pub fn distinct(mut self) -> Self {
        self.plan.distinct = true;
        self
    }

    /// Use this query inside another one.
    pub fn as_subquery(&self) -> SubQuery {
        SubQuery::new(
            self.plan.clone(),
            self.select_types.clone(),
            self.fault.clone(),
        )
    }

    // ============== Compilation ==============

    /// Validate and lower the content plan.
    pub fn compile(&self) -> Result<ExecutionPlan, Error> {
        self.check_fault()?;
        PlanCompiler::new(&self.catalog).compile(&self.plan)
    }

    /// Validate and lower the count plan.
    pub fn compile_count(&self) -> Result<ExecutionPlan, Error> {
        self.check_fault()?;
        PlanCompiler::new(&self.catalog).compile_count(&self.plan)
    }

    fn check_fault(&self) -> Result<(), Error> {
        match &self.fault {
            Some(fault) => Err(Error::InvalidJoin(fault.clone())),
            None => Ok(()),
        }
    }

    // ============== Terminals ==============

    fn execute(&self) -> Result<ResultSet, Error> {
        let plan = self.compile()?;
        Ok(self.adapter.execute(&plan)?)
    }

    fn execute_single(&self, terminal: &str) -> Result<Vec<Cell>, Error> {
        if self.plan.select.len() != 1 {
            return Err(Error::InvalidProjection(format!(
                "{terminal} needs exactly one projection, found {}; use fetch_tuples",
                self.plan.select.len()
            )));
        }
        Ok(self
            .execute()?
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    /// All qualifying rows of a single-projection query.
    pub fn fetch(&self) -> Result<Vec<Cell>, Error> {
        self.execute_single("fetch")
    }

    /// All qualifying rows, converted.
    pub fn fetch_as<T: FromCell>(&self) -> Result<Vec<T>, Error> {
        self.fetch()?.into_iter().map(T::from_cell).collect()
    }

    /// All qualifying rows of a multi-projection query.
    pub fn fetch_tuples(&self) -> Result<Vec<Tuple>, Error> {
        Ok(self.execute()?.into_tuples())
    }

    /// The only qualifying row, or `None`.
    ///
    /// Fails with [`Error::TooManyResults`] when more than one row qualifies.
    pub fn fetch_one(&self) -> Result<Option<Cell>, Error> {
        let mut cells = self.execute_single("fetch_one")?;
        if cells.len() > 1 {
            return Err(Error::TooManyResults { found: cells.len() });
        }
        Ok(cells.pop())
    }

    /// The only qualifying row, converted.
    pub fn fetch_one_as<T: FromCell>(&self) -> Result<Option<T>, Error> {
        self.fetch_one()?.map(T::from_cell).transpose()
    }

    /// The first qualifying row; never fails on multiplicity.
    pub fn fetch_first(&self) -> Result<Option<Cell>, Error> {
        Ok(self
            .clone()
            .limit(1)
            .execute_single("fetch_first")?
            .into_iter()
            .next())
    }

    /// Number of qualifying rows, from a separate count plan.
    pub fn fetch_count(&self) -> Result<u64, Error> {
        let plan = self.compile_count()?;
        Ok(self.adapter.execute_count(&plan)?)
    }

    /// One page of rows together with the total from the count plan.
    pub fn fetch_results_with_total(&self) -> Result<QueryResults<Cell>, Error> {
        let results = self.fetch()?;
        let total = self.fetch_count()?;
        Ok(QueryResults {
            results,
            total,
            limit: self.plan.pagination.limit,
            offset: self.plan.pagination.offset,
        })
    }
}
