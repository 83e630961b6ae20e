//! Per-entity record tables.

use std::collections::HashMap;

use super::record::EntityRecord;
use crate::error::ExecutionError;
use crate::query::RowSource;

/// Records of one entity in insertion order, with an identity lookup.
#[derive(Debug, Clone, Default)]
pub struct Table {
    records: Vec<EntityRecord>,
    positions: HashMap<i64, usize>,
}

impl Table {
    /// Append a record.
    pub fn insert(&mut self, record: EntityRecord) {
        self.positions.insert(record.id, self.records.len());
        self.records.push(record);
    }

    /// Record by identity.
    pub fn get(&self, id: i64) -> Option<&EntityRecord> {
        self.positions.get(&id).map(|&pos| &self.records[pos])
    }

    /// Mutable record by identity.
    pub fn get_mut(&mut self, id: i64) -> Option<&mut EntityRecord> {
        match self.positions.get(&id) {
            Some(&pos) => self.records.get_mut(pos),
            None => None,
        }
    }

    /// All records in insertion order.
    pub fn records(&self) -> &[EntityRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Tables keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    tables: HashMap<String, Table>,
}

impl Tables {
    /// Create an empty set of tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for an entity, if it has any records.
    pub fn table(&self, entity: &str) -> Option<&Table> {
        self.tables.get(entity)
    }

    /// Table for an entity, created on first use.
    pub fn table_mut(&mut self, entity: &str) -> &mut Table {
        self.tables.entry(entity.to_string()).or_default()
    }

    /// Record by entity and identity.
    pub fn get(&self, entity: &str, id: i64) -> Option<&EntityRecord> {
        self.tables.get(entity).and_then(|t| t.get(id))
    }

    /// Mutable record by entity and identity.
    pub fn get_mut(&mut self, entity: &str, id: i64) -> Option<&mut EntityRecord> {
        self.tables.get_mut(entity).and_then(|t| t.get_mut(id))
    }
}

impl RowSource for Tables {
    fn scan(&self, entity: &str) -> Result<&[EntityRecord], ExecutionError> {
        Ok(self.tables.get(entity).map(Table::records).unwrap_or(&[]))
    }
}
