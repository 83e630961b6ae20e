//! Inverse collections derived from owning references.
//!
//! For every relation, maps a target identity to the identities of the
//! owners referencing it. The index is never written directly; the store
//! keeps it in step with owning-side writes.

use std::collections::{BTreeSet, HashMap};

use super::table::Tables;
use crate::catalog::Catalog;

/// Relation name -> target id -> owner ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InverseIndex {
    relations: HashMap<String, HashMap<i64, BTreeSet<i64>>>,
}

impl InverseIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `owner` references `target` through `relation`.
    pub fn add(&mut self, relation: &str, target: i64, owner: i64) {
        self.relations
            .entry(relation.to_string())
            .or_default()
            .entry(target)
            .or_default()
            .insert(owner);
    }

    /// Forget that `owner` references `target` through `relation`.
    pub fn remove(&mut self, relation: &str, target: i64, owner: i64) {
        let Some(targets) = self.relations.get_mut(relation) else {
            return;
        };
        if let Some(owners) = targets.get_mut(&target) {
            owners.remove(&owner);
            if owners.is_empty() {
                targets.remove(&target);
            }
        }
        if targets.is_empty() {
            self.relations.remove(relation);
        }
    }

    /// Owners referencing `target`, in identity order.
    pub fn owners(&self, relation: &str, target: i64) -> Vec<i64> {
        self.relations
            .get(relation)
            .and_then(|targets| targets.get(&target))
            .map(|owners| owners.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rebuild the index from the owning references in `tables`.
    pub fn rebuild(catalog: &Catalog, tables: &Tables) -> Self {
        let mut index = Self::new();
        for relation in catalog.relations() {
            let Ok(owner) = catalog.resolve(&relation.from_entity) else {
                continue;
            };
            let Some(field) = owner.field_index(&relation.from_field) else {
                continue;
            };
            let Some(table) = tables.table(&relation.from_entity) else {
                continue;
            };
            for record in table.records() {
                if let Some(target) = record.value(field).as_i64() {
                    index.add(&relation.name, target, record.id);
                }
            }
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let mut index = InverseIndex::new();
        index.add("member_team", 1, 4);
        index.add("member_team", 1, 3);
        index.add("member_team", 2, 5);

        assert_eq!(index.owners("member_team", 1), vec![3, 4]);
        assert_eq!(index.owners("member_team", 2), vec![5]);

        index.remove("member_team", 2, 5);
        assert!(index.owners("member_team", 2).is_empty());
        index.remove("member_team", 1, 3);
        index.remove("member_team", 1, 4);
        assert_eq!(index, InverseIndex::new());
    }

    #[test]
    fn test_unknown_relation_is_empty() {
        let index = InverseIndex::new();
        assert!(index.owners("nothing", 1).is_empty());
    }
}
