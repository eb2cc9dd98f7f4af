//! The inverted dependency index: which operations read which slots.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::key::{Dependency, EntityKey};

#[derive(Default)]
pub(crate) struct DependencyIndex {
    by_field: HashMap<Dependency, IndexSet<u64>>,
    by_type: HashMap<String, IndexSet<u64>>,
}

impl DependencyIndex {
    /// Replaces an operation's registration with its latest read set.
    pub fn update(
        &mut self,
        operation: u64,
        old_deps: &IndexSet<Dependency>,
        old_types: &IndexSet<String>,
        new_deps: &IndexSet<Dependency>,
        new_types: &IndexSet<String>,
    ) {
        for dep in old_deps {
            if new_deps.contains(dep) {
                continue;
            }
            if let Some(operations) = self.by_field.get_mut(dep) {
                operations.shift_remove(&operation);
                if operations.is_empty() {
                    self.by_field.remove(dep);
                }
            }
        }
        for dep in new_deps {
            self.by_field.entry(dep.clone()).or_default().insert(operation);
        }

        for typename in old_types {
            if new_types.contains(typename) {
                continue;
            }
            if let Some(operations) = self.by_type.get_mut(typename) {
                operations.shift_remove(&operation);
                if operations.is_empty() {
                    self.by_type.remove(typename);
                }
            }
        }
        for typename in new_types {
            self.by_type.entry(typename.clone()).or_default().insert(operation);
        }
    }

    /// Drops every entry of a torn-down operation.
    pub fn remove(&mut self, operation: u64, deps: &IndexSet<Dependency>, types: &IndexSet<String>) {
        self.update(operation, deps, types, &IndexSet::new(), &IndexSet::new());
    }

    /// The operations whose reads intersect a write's touched set.
    pub fn dependents(
        &self,
        touched: &IndexSet<Dependency>,
        invalidated_types: &IndexSet<String>,
    ) -> IndexSet<u64> {
        let mut out = IndexSet::new();
        for dep in touched {
            if let Some(operations) = self.by_field.get(dep) {
                out.extend(operations.iter().copied());
            }
        }
        for typename in invalidated_types {
            if let Some(operations) = self.by_type.get(typename) {
                out.extend(operations.iter().copied());
            }
        }
        out
    }

    /// Entities some live operation still depends on; the GC roots.
    pub fn live_entities(&self) -> IndexSet<EntityKey> {
        self.by_field.keys().map(|dep| dep.entity.clone()).collect()
    }
}
