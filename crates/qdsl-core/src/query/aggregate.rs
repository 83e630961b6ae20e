//! Aggregate accumulators.
//!
//! Each accumulator folds one group's values. Nulls are skipped by every
//! function except `count(*)`; an empty or all-null input yields null for
//! `sum`, `avg`, `min`, and `max`, and zero for `count`.

use std::cmp::Ordering;

use qdsl_proto::{AggregateFunction, Value};

use super::filter::FilterEvaluator;
use crate::error::ExecutionError;

/// Running state of one aggregate over one group.
#[derive(Debug, Clone)]
pub enum Accumulator {
    /// Row or non-null value count.
    Count(i64),
    /// Integer sum, float sum once any float was seen.
    Sum {
        /// Integer total.
        int: i64,
        /// Float total.
        float: f64,
        /// Whether any float contributed.
        floating: bool,
        /// Whether any value contributed.
        seen: bool,
    },
    /// Sum and count for the mean.
    Avg {
        /// Running total.
        sum: f64,
        /// Values seen.
        count: u64,
    },
    /// Extreme value so far.
    Extreme {
        /// Current extreme.
        current: Option<Value>,
        /// `Greater` tracks max, `Less` tracks min.
        keep: Ordering,
    },
}

impl Accumulator {
    /// Fresh accumulator for `function`.
    pub fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::Sum {
                int: 0,
                float: 0.0,
                floating: false,
                seen: false,
            },
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Max => Accumulator::Extreme {
                current: None,
                keep: Ordering::Greater,
            },
            AggregateFunction::Min => Accumulator::Extreme {
                current: None,
                keep: Ordering::Less,
            },
        }
    }

    /// Count one row regardless of value, for `count(*)`.
    pub fn add_row(&mut self) {
        if let Accumulator::Count(n) = self {
            *n += 1;
        }
    }

    /// Fold one value.
    pub fn add(&mut self, value: &Value) -> Result<(), ExecutionError> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum {
                int,
                float,
                floating,
                seen,
            } => {
                *seen = true;
                match value {
                    Value::Int32(v) => Self::add_int(int, *v as i64)?,
                    Value::Int64(v) => Self::add_int(int, *v)?,
                    Value::Float64(v) => {
                        *floating = true;
                        *float += v;
                    }
                    other => return Err(Self::not_numeric("sum", other)),
                }
            }
            Accumulator::Avg { sum, count } => {
                *sum += value
                    .as_f64()
                    .ok_or_else(|| Self::not_numeric("avg", value))?;
                *count += 1;
            }
            Accumulator::Extreme { current, keep } => {
                let replace = match current {
                    None => true,
                    Some(existing) => {
                        FilterEvaluator::compare_values(value, existing) == Some(*keep)
                    }
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    /// Final value.
    pub fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Int64(n),
            Accumulator::Sum {
                int,
                float,
                floating,
                seen,
            } => {
                if !seen {
                    Value::Null
                } else if floating {
                    Value::Float64(float + int as f64)
                } else {
                    Value::Int64(int)
                }
            }
            Accumulator::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float64(sum / count as f64)
                }
            }
            Accumulator::Extreme { current, .. } => current.unwrap_or(Value::Null),
        }
    }

    fn add_int(total: &mut i64, v: i64) -> Result<(), ExecutionError> {
        *total = total
            .checked_add(v)
            .ok_or_else(|| ExecutionError::Evaluation("integer overflow in sum".into()))?;
        Ok(())
    }

    fn not_numeric(function: &str, value: &Value) -> ExecutionError {
        ExecutionError::Evaluation(format!(
            "{function} over non-numeric value of type {}",
            value.type_name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(function: AggregateFunction, values: &[Value]) -> Value {
        let mut acc = Accumulator::new(function);
        for v in values {
            acc.add(v).unwrap();
        }
        acc.finish()
    }

    #[test]
    fn test_member_ages() {
        let ages = [10, 20, 30, 40].map(Value::Int32);
        assert_eq!(fold(AggregateFunction::Count, &ages), Value::Int64(4));
        assert_eq!(fold(AggregateFunction::Sum, &ages), Value::Int64(100));
        assert_eq!(fold(AggregateFunction::Avg, &ages), Value::Float64(25.0));
        assert_eq!(fold(AggregateFunction::Max, &ages), Value::Int32(40));
        assert_eq!(fold(AggregateFunction::Min, &ages), Value::Int32(10));
    }

    #[test]
    fn test_nulls_skipped() {
        let values = [Value::Int32(10), Value::Null, Value::Int32(20)];
        assert_eq!(fold(AggregateFunction::Count, &values), Value::Int64(2));
        assert_eq!(fold(AggregateFunction::Avg, &values), Value::Float64(15.0));

        let mut star = Accumulator::new(AggregateFunction::Count);
        for _ in &values {
            star.add_row();
        }
        assert_eq!(star.finish(), Value::Int64(3));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(fold(AggregateFunction::Count, &[]), Value::Int64(0));
        assert_eq!(fold(AggregateFunction::Sum, &[]), Value::Null);
        assert_eq!(fold(AggregateFunction::Avg, &[]), Value::Null);
        assert_eq!(fold(AggregateFunction::Max, &[Value::Null]), Value::Null);
    }

    #[test]
    fn test_float_sum() {
        let values = [Value::Int32(1), Value::Float64(0.5)];
        assert_eq!(fold(AggregateFunction::Sum, &values), Value::Float64(1.5));
    }

    #[test]
    fn test_min_max_strings() {
        let names = [Value::from("teamB"), Value::from("teamA")];
        assert_eq!(fold(AggregateFunction::Min, &names), Value::from("teamA"));
        assert_eq!(fold(AggregateFunction::Max, &names), Value::from("teamB"));
    }
}
