//! Join strategies for association joins.
//!
//! Association joins match `owner.fk = target.id`. Small targets are probed
//! with a nested loop; larger ones are indexed once by key and probed per
//! row:
//! - NestedLoop: O(N*M), no setup cost
//! - HashJoin: O(N+M), one build pass over the target

use std::collections::HashMap;

use qdsl_proto::Value;

use crate::storage::EntityRecord;

/// Join strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Nested loop join - best for small targets.
    NestedLoop,
    /// Hash join - best for larger targets.
    HashJoin,
}

impl JoinStrategy {
    /// Select a strategy from the target's row count.
    ///
    /// Only keyed joins can hash; on-clause and cross joins always loop.
    pub fn select(keyed: bool, target_rows: usize, threshold: usize) -> Self {
        if keyed && target_rows > threshold {
            JoinStrategy::HashJoin
        } else {
            JoinStrategy::NestedLoop
        }
    }
}

/// Target records indexed by one field.
///
/// Build phase scans the target once; probes are O(1). Records with a null
/// key are left out since they never match.
pub struct KeyIndex<'r> {
    buckets: HashMap<i64, Vec<&'r EntityRecord>>,
}

impl<'r> KeyIndex<'r> {
    /// Index `records` by the value at `field`.
    pub fn build(records: &'r [EntityRecord], field: usize) -> Self {
        let mut buckets: HashMap<i64, Vec<&'r EntityRecord>> = HashMap::new();
        for record in records {
            if let Some(key) = record.values.get(field).and_then(Value::as_i64) {
                buckets.entry(key).or_default().push(record);
            }
        }
        Self { buckets }
    }

    /// Records whose key equals `key`.
    pub fn probe(&self, key: &Value) -> &[&'r EntityRecord] {
        key.as_i64()
            .and_then(|k| self.buckets.get(&k))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Records whose value at `field` equals `key`, by linear scan.
pub fn nested_loop_probe<'r>(
    records: &'r [EntityRecord],
    field: usize,
    key: &Value,
) -> Vec<&'r EntityRecord> {
    let Some(key) = key.as_i64() else {
        return Vec::new();
    };
    records
        .iter()
        .filter(|r| r.values.get(field).and_then(Value::as_i64) == Some(key))
        .collect()
}
