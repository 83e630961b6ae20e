//! Execution of compiled plans over in-memory rows.
//!
//! Rows flow through a fixed pipeline:
//! 1. scan the first slot
//! 2. join each later slot, keyed or by on-clause
//! 3. filter with the where-clause
//! 4. group and apply having
//! 5. sort, stable, with explicit null placement
//! 6. dedupe (distinct) and page
//! 7. project, materializing entities and fetch-joined references
//!
//! Subqueries run the same pipeline with the enclosing row as their parent
//! frame. Uncorrelated subqueries run once per execution.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use qdsl_proto::{Cell, EntityObject, JoinKind, NullOrdering, OrderDirection, ResultSet, Value};
use tracing::instrument;

use super::aggregate::Accumulator;
use super::compiler::{ExecutionPlan, PlanExpr, PlanOrder, PlanPredicate, Projection};
use super::filter::FilterEvaluator;
use super::join::{nested_loop_probe, JoinStrategy, KeyIndex};
use crate::config::{ExecutorConfig, NullsAre};
use crate::error::ExecutionError;
use crate::storage::EntityRecord;

/// Supplies stored records to the executor.
pub trait RowSource {
    /// All records of an entity. Unknown entities have no records.
    fn scan(&self, entity: &str) -> Result<&[EntityRecord], ExecutionError>;
}

/// One joined row: a record, or nothing, per slot.
type Row<'r> = Vec<Option<&'r EntityRecord>>;

/// Evaluation context: the current row, its group, and the enclosing
/// query's frame.
struct Frame<'f, 'r> {
    row: &'f [Option<&'r EntityRecord>],
    group: Option<&'f [Row<'r>]>,
    parent: Option<&'f Frame<'f, 'r>>,
}

impl<'f, 'r> Frame<'f, 'r> {
    fn at(&self, depth: usize) -> Result<&Frame<'f, 'r>, ExecutionError> {
        let mut frame = self;
        for _ in 0..depth {
            frame = frame.parent.ok_or_else(|| {
                ExecutionError::Evaluation(format!("no enclosing query at depth {depth}"))
            })?;
        }
        Ok(frame)
    }
}

/// A row after grouping. Ungrouped queries have one unit per row;
/// aggregate queries have one per group, represented by its first row.
struct Unit<'r> {
    row: Row<'r>,
    group: Option<Vec<Row<'r>>>,
}

impl<'r> Unit<'r> {
    fn frame<'f>(&'f self, parent: Option<&'f Frame<'f, 'r>>) -> Frame<'f, 'r> {
        Frame {
            row: &self.row,
            group: self.group.as_deref(),
            parent,
        }
    }
}

/// Hashable form of a value for grouping and distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl From<&Value> for ValueKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Int32(i) => ValueKey::Int(*i as i64),
            Value::Int64(i) => ValueKey::Int(*i),
            // -0.0 and 0.0 group together.
            Value::Float64(f) => ValueKey::Float(if *f == 0.0 { 0 } else { f.to_bits() }),
            Value::String(s) => ValueKey::Str(s.clone()),
        }
    }
}

/// Executes compiled plans against a [`RowSource`].
pub struct QueryExecutor<'a> {
    source: &'a dyn RowSource,
    config: &'a ExecutorConfig,
    subqueries: RefCell<HashMap<usize, Rc<Vec<Value>>>>,
}

impl<'a> QueryExecutor<'a> {
    /// Create an executor over a row source.
    pub fn new(source: &'a dyn RowSource, config: &'a ExecutorConfig) -> Self {
        Self {
            source,
            config,
            subqueries: RefCell::new(HashMap::new()),
        }
    }

    /// Execute a content plan.
    #[instrument(skip_all, fields(slots = plan.slots.len(), steps = plan.steps.len()))]
    pub fn execute(&self, plan: &ExecutionPlan) -> Result<ResultSet, ExecutionError> {
        let units = self.run(plan, None)?;
        let shaped = self.shape(plan, units, None)?;

        let mut result = ResultSet::new(plan.columns().to_vec());
        for (unit, values) in shaped {
            let cells = plan
                .projection
                .iter()
                .zip(values)
                .map(|(projection, value)| match projection {
                    Projection::Entity { slot } => Cell::Entity(
                        unit.row[*slot].map(|record| self.materialize(plan, &unit.row, *slot, record)),
                    ),
                    Projection::Value(_) => Cell::Value(value),
                })
                .collect();
            result.rows.push(cells);
        }
        tracing::debug!(rows = result.len(), "plan executed");
        Ok(result)
    }

    /// Execute a count plan.
    #[instrument(skip_all, fields(slots = plan.slots.len(), count_rows = plan.count_rows))]
    pub fn execute_count(&self, plan: &ExecutionPlan) -> Result<u64, ExecutionError> {
        let units = self.run(plan, None)?;
        let shaped = self.shape(plan, units, None)?;
        if plan.count_rows {
            return Ok(shaped.len() as u64);
        }
        let count = shaped
            .first()
            .and_then(|(_, values)| values.first())
            .and_then(Value::as_i64)
            .ok_or_else(|| ExecutionError::Evaluation("count plan produced no count".into()))?;
        Ok(count.max(0) as u64)
    }

    // ============== Pipeline ==============

    /// Join, filter, group, and sort.
    fn run(
        &self,
        plan: &ExecutionPlan,
        parent: Option<&Frame<'_, 'a>>,
    ) -> Result<Vec<Unit<'a>>, ExecutionError> {
        let rows = self.join(plan, parent)?;

        let rows = match &plan.filter {
            Some(filter) => {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    let frame = Frame {
                        row: &row,
                        group: None,
                        parent,
                    };
                    if self.predicate(filter, &frame)? == Some(true) {
                        kept.push(row);
                    }
                }
                kept
            }
            None => rows,
        };

        let mut units = self.group(plan, rows, parent)?;

        if let Some(having) = plan.grouping.as_ref().and_then(|g| g.having.as_ref()) {
            let mut kept = Vec::with_capacity(units.len());
            for unit in units {
                if self.predicate(having, &unit.frame(parent))? == Some(true) {
                    kept.push(unit);
                }
            }
            units = kept;
        }

        if !plan.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(units.len());
            for unit in units {
                let keys = {
                    let frame = unit.frame(parent);
                    plan.order_by
                        .iter()
                        .map(|order| self.eval(&order.expr, &frame))
                        .collect::<Result<Vec<_>, _>>()?
                };
                keyed.push((keys, unit));
            }
            keyed.sort_by(|(a, _), (b, _)| self.compare_keys(a, b, &plan.order_by));
            units = keyed.into_iter().map(|(_, unit)| unit).collect();
        }

        Ok(units)
    }

    fn join(
        &self,
        plan: &ExecutionPlan,
        parent: Option<&Frame<'_, 'a>>,
    ) -> Result<Vec<Row<'a>>, ExecutionError> {
        let Some(root) = plan.slots.first() else {
            return Ok(Vec::new());
        };
        let width = plan.slots.len();
        let mut rows: Vec<Row<'a>> = self
            .source
            .scan(&root.entity.name)?
            .iter()
            .map(|record| {
                let mut row = vec![None; width];
                row[0] = Some(record);
                row
            })
            .collect();
        self.check_budget(rows.len())?;

        for step in &plan.steps {
            let target = self.source.scan(&plan.slots[step.slot].entity.name)?;
            let strategy = JoinStrategy::select(
                step.key.is_some(),
                target.len(),
                self.config.hash_join_threshold,
            );
            let index = match (strategy, step.key) {
                (JoinStrategy::HashJoin, Some(key)) => Some(KeyIndex::build(target, key.target_field)),
                _ => None,
            };

            let input = rows.len();
            let mut next = Vec::new();
            for row in rows {
                let candidates: Vec<&'a EntityRecord> = match step.key {
                    Some(key) => {
                        let fk = match row[key.owner_slot] {
                            Some(owner) => owner.value(key.owner_field).clone(),
                            None => Value::Null,
                        };
                        match &index {
                            Some(index) => index.probe(&fk).to_vec(),
                            None => nested_loop_probe(target, key.target_field, &fk),
                        }
                    }
                    None => target.iter().collect(),
                };

                let mut matched = false;
                for candidate in candidates {
                    let mut extended = row.clone();
                    extended[step.slot] = Some(candidate);
                    if let Some(on) = &step.on {
                        let frame = Frame {
                            row: &extended,
                            group: None,
                            parent,
                        };
                        if self.predicate(on, &frame)? != Some(true) {
                            continue;
                        }
                    }
                    matched = true;
                    next.push(extended);
                }
                if !matched && step.kind == JoinKind::Left {
                    next.push(row);
                }
                self.check_budget(next.len())?;
            }
            tracing::trace!(
                step = %step.label,
                ?strategy,
                input,
                output = next.len(),
                "join step"
            );
            rows = next;
        }
        Ok(rows)
    }

    fn group(
        &self,
        plan: &ExecutionPlan,
        rows: Vec<Row<'a>>,
        parent: Option<&Frame<'_, 'a>>,
    ) -> Result<Vec<Unit<'a>>, ExecutionError> {
        let Some(grouping) = &plan.grouping else {
            return Ok(rows
                .into_iter()
                .map(|row| Unit { row, group: None })
                .collect());
        };

        if grouping.keys.is_empty() {
            // One group, even over no rows.
            let row = rows
                .first()
                .cloned()
                .unwrap_or_else(|| vec![None; plan.slots.len()]);
            return Ok(vec![Unit {
                row,
                group: Some(rows),
            }]);
        }

        let mut positions: HashMap<Vec<ValueKey>, usize> = HashMap::new();
        let mut groups: Vec<Vec<Row<'a>>> = Vec::new();
        for row in rows {
            let key = {
                let frame = Frame {
                    row: &row,
                    group: None,
                    parent,
                };
                grouping
                    .keys
                    .iter()
                    .map(|expr| self.eval(expr, &frame).map(|v| ValueKey::from(&v)))
                    .collect::<Result<Vec<_>, _>>()?
            };
            let fresh = groups.len();
            let pos = *positions.entry(key).or_insert(fresh);
            if pos == fresh {
                groups.push(vec![row]);
            } else {
                groups[pos].push(row);
            }
        }
        tracing::trace!(groups = groups.len(), "grouped rows");

        Ok(groups
            .into_iter()
            .map(|group| Unit {
                row: group[0].clone(),
                group: Some(group),
            })
            .collect())
    }

    /// Dedupe and page, projecting the surviving units.
    fn shape(
        &self,
        plan: &ExecutionPlan,
        units: Vec<Unit<'a>>,
        parent: Option<&Frame<'_, 'a>>,
    ) -> Result<Vec<(Unit<'a>, Vec<Value>)>, ExecutionError> {
        let offset = usize::try_from(plan.offset).unwrap_or(usize::MAX);
        let limit = plan
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        if plan.distinct {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for unit in units {
                let values = self.project(plan, &unit, parent)?;
                if seen.insert(values.iter().map(ValueKey::from).collect::<Vec<_>>()) {
                    out.push((unit, values));
                }
            }
            return Ok(out.into_iter().skip(offset).take(limit).collect());
        }

        units
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|unit| {
                let values = self.project(plan, &unit, parent)?;
                Ok((unit, values))
            })
            .collect()
    }

    /// Projected values; entity columns yield their identity.
    fn project(
        &self,
        plan: &ExecutionPlan,
        unit: &Unit<'a>,
        parent: Option<&Frame<'_, 'a>>,
    ) -> Result<Vec<Value>, ExecutionError> {
        let frame = unit.frame(parent);
        plan.projection
            .iter()
            .map(|projection| match projection {
                Projection::Entity { slot } => Ok(unit.row[*slot]
                    .map_or(Value::Null, |record| Value::Int64(record.id))),
                Projection::Value(expr) => self.eval(expr, &frame),
            })
            .collect()
    }

    fn materialize(
        &self,
        plan: &ExecutionPlan,
        row: &[Option<&'a EntityRecord>],
        slot: usize,
        record: &EntityRecord,
    ) -> EntityObject {
        record.to_object(&plan.slots[slot].entity, |field, id| {
            self.eager_target(plan, row, slot, field, id)
                .map(|(target_slot, target)| self.materialize(plan, row, target_slot, target))
        })
    }

    fn eager_target(
        &self,
        plan: &ExecutionPlan,
        row: &[Option<&'a EntityRecord>],
        slot: usize,
        field: usize,
        id: i64,
    ) -> Option<(usize, &'a EntityRecord)> {
        plan.eager
            .iter()
            .find(|eager| eager.owner_slot == slot && eager.field_index == field)
            .and_then(|eager| {
                row.get(eager.target_slot)
                    .copied()
                    .flatten()
                    .filter(|target| target.id == id)
                    .map(|target| (eager.target_slot, target))
            })
    }

    fn check_budget(&self, rows: usize) -> Result<(), ExecutionError> {
        match self.config.max_rows {
            Some(limit) if rows > limit => Err(ExecutionError::BudgetExceeded { rows, limit }),
            _ => Ok(()),
        }
    }

    // ============== Ordering ==============

    fn compare_keys(&self, a: &[Value], b: &[Value], order: &[PlanOrder]) -> Ordering {
        for ((x, y), spec) in a.iter().zip(b).zip(order) {
            let nulls_first = self.nulls_first(spec);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) if nulls_first => Ordering::Less,
                (true, false) => Ordering::Greater,
                (false, true) if nulls_first => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ord = FilterEvaluator::compare_values(x, y).unwrap_or(Ordering::Equal);
                    match spec.direction {
                        OrderDirection::Asc => ord,
                        OrderDirection::Desc => ord.reverse(),
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn nulls_first(&self, spec: &PlanOrder) -> bool {
        match spec.nulls {
            NullOrdering::NullsFirst => true,
            NullOrdering::NullsLast => false,
            NullOrdering::Default => matches!(
                (self.config.default_nulls, spec.direction),
                (NullsAre::Smallest, OrderDirection::Asc) | (NullsAre::Largest, OrderDirection::Desc)
            ),
        }
    }

    // ============== Evaluation ==============

    fn eval(&self, expr: &PlanExpr, frame: &Frame<'_, 'a>) -> Result<Value, ExecutionError> {
        match expr {
            PlanExpr::Column { depth, slot, field } => {
                let frame = frame.at(*depth)?;
                Ok(match frame.row.get(*slot).copied().flatten() {
                    Some(record) => record.value(*field).clone(),
                    None => Value::Null,
                })
            }
            PlanExpr::Entity { depth, slot } => {
                let frame = frame.at(*depth)?;
                Ok(frame
                    .row
                    .get(*slot)
                    .copied()
                    .flatten()
                    .map_or(Value::Null, |record| Value::Int64(record.id)))
            }
            PlanExpr::Literal(value) => Ok(value.clone()),
            PlanExpr::Aggregate { function, arg } => {
                let group = frame.group.ok_or_else(|| {
                    ExecutionError::Evaluation("aggregate evaluated outside a group".into())
                })?;
                let mut acc = Accumulator::new(*function);
                for row in group {
                    match arg {
                        None => acc.add_row(),
                        Some(arg) => {
                            let inner = Frame {
                                row,
                                group: None,
                                parent: frame.parent,
                            };
                            acc.add(&self.eval(arg, &inner)?)?;
                        }
                    }
                }
                Ok(acc.finish())
            }
            PlanExpr::Concat(left, right) => {
                match (self.eval(left, frame)?, self.eval(right, frame)?) {
                    (Value::String(mut a), Value::String(b)) => {
                        a.push_str(&b);
                        Ok(Value::String(a))
                    }
                    (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                    (a, b) => Err(ExecutionError::Evaluation(format!(
                        "cannot concatenate {} and {}",
                        a.type_name(),
                        b.type_name()
                    ))),
                }
            }
            PlanExpr::StringValue(inner) => Ok(match self.eval(inner, frame)? {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            }),
            PlanExpr::Case {
                branches,
                otherwise,
            } => {
                for (when, then) in branches {
                    if self.predicate(when, frame)? == Some(true) {
                        return self.eval(then, frame);
                    }
                }
                match otherwise {
                    Some(expr) => self.eval(expr, frame),
                    None => Ok(Value::Null),
                }
            }
            PlanExpr::Subquery(plan) => {
                let values = self.subquery_values(plan, frame)?;
                match values.as_slice() {
                    [] => Ok(Value::Null),
                    [value] => Ok(value.clone()),
                    many => Err(ExecutionError::Evaluation(format!(
                        "scalar subquery returned {} rows",
                        many.len()
                    ))),
                }
            }
        }
    }

    fn predicate(
        &self,
        predicate: &PlanPredicate,
        frame: &Frame<'_, 'a>,
    ) -> Result<Option<bool>, ExecutionError> {
        Ok(match predicate {
            PlanPredicate::Compare { op, left, right } => {
                FilterEvaluator::compare(*op, &self.eval(left, frame)?, &self.eval(right, frame)?)
            }
            PlanPredicate::Between { expr, low, high } => FilterEvaluator::between(
                &self.eval(expr, frame)?,
                &self.eval(low, frame)?,
                &self.eval(high, frame)?,
            ),
            PlanPredicate::InValues {
                expr,
                values,
                negated,
            } => {
                let found = FilterEvaluator::in_set(&self.eval(expr, frame)?, values);
                if *negated {
                    FilterEvaluator::not(found)
                } else {
                    found
                }
            }
            PlanPredicate::InSubquery {
                expr,
                plan,
                negated,
            } => {
                let value = self.eval(expr, frame)?;
                let values = self.subquery_values(plan, frame)?;
                let found = FilterEvaluator::in_set(&value, values.iter());
                if *negated {
                    FilterEvaluator::not(found)
                } else {
                    found
                }
            }
            PlanPredicate::Like { expr, pattern } => {
                FilterEvaluator::like(&self.eval(expr, frame)?, pattern)
            }
            PlanPredicate::IsNull(expr) => Some(self.eval(expr, frame)?.is_null()),
            PlanPredicate::IsNotNull(expr) => Some(!self.eval(expr, frame)?.is_null()),
            PlanPredicate::And(parts) => FilterEvaluator::and(
                parts
                    .iter()
                    .map(|p| self.predicate(p, frame))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            PlanPredicate::Or(parts) => FilterEvaluator::or(
                parts
                    .iter()
                    .map(|p| self.predicate(p, frame))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            PlanPredicate::Not(inner) => FilterEvaluator::not(self.predicate(inner, frame)?),
        })
    }

    /// The single column a subquery produces for the current frame.
    fn subquery_values(
        &self,
        plan: &Arc<ExecutionPlan>,
        frame: &Frame<'_, 'a>,
    ) -> Result<Rc<Vec<Value>>, ExecutionError> {
        if plan.correlated {
            return Ok(Rc::new(self.column_values(plan, Some(frame))?));
        }

        let key = Arc::as_ptr(plan) as usize;
        if let Some(values) = self.subqueries.borrow().get(&key) {
            return Ok(Rc::clone(values));
        }
        let values = Rc::new(self.column_values(plan, None)?);
        self.subqueries.borrow_mut().insert(key, Rc::clone(&values));
        Ok(values)
    }

    fn column_values(
        &self,
        plan: &ExecutionPlan,
        parent: Option<&Frame<'_, 'a>>,
    ) -> Result<Vec<Value>, ExecutionError> {
        let units = self.run(plan, parent)?;
        Ok(self
            .shape(plan, units, parent)?
            .into_iter()
            .filter_map(|(_, values)| values.into_iter().next())
            .collect())
    }
}
