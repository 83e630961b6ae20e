//! Executor configuration.

use serde::{Deserialize, Serialize};

/// Where null sort keys land when an order spec uses default placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NullsAre {
    /// Nulls compare below every value: first ascending, last descending.
    #[default]
    Smallest,
    /// Nulls compare above every value: last ascending, first descending.
    Largest,
}

/// Configuration for the in-memory executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Null placement for order specs without an explicit nulls-first/last.
    pub default_nulls: NullsAre,

    /// Maximum intermediate rows one execution may produce. None means
    /// unlimited.
    pub max_rows: Option<usize>,

    /// Right-side row count above which joins use a hash join.
    pub hash_join_threshold: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_nulls: NullsAre::Smallest,
            max_rows: None,
            hash_join_threshold: 64,
        }
    }
}

impl ExecutorConfig {
    /// Set the default null placement.
    pub fn with_default_nulls(mut self, nulls: NullsAre) -> Self {
        self.default_nulls = nulls;
        self
    }

    /// Set the intermediate row budget.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Set the hash join threshold.
    pub fn with_hash_join_threshold(mut self, threshold: usize) -> Self {
        self.hash_join_threshold = threshold;
        self
    }
}
