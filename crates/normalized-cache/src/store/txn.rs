use indexmap::IndexSet;
use serde_json::Value;

use super::{
    layer::{LayerData, Link, SlotValue},
    Store,
};
use crate::key::{Dependency, EntityKey, FieldKey};

/// Where a transaction's writes land.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LayerTarget {
    Base,
    Layer(u64),
}

/// A single open write transaction.
///
/// Writes are staged and only become visible when the staged set is
/// committed to the store, so readers never observe a half-written result.
/// Touched dependencies are only recorded for writes that change the value
/// visible from the target layer downward.
pub(crate) struct WriteTxn<'a> {
    store: &'a Store,
    target: LayerTarget,
    data: LayerData,
    removals: Vec<(EntityKey, FieldKey)>,
    touched: IndexSet<Dependency>,
    invalidated_types: IndexSet<String>,
}

impl<'a> WriteTxn<'a> {
    pub fn new(store: &'a Store, target: LayerTarget) -> Self {
        WriteTxn {
            store,
            target,
            data: LayerData::default(),
            removals: Vec::new(),
            touched: IndexSet::new(),
            invalidated_types: IndexSet::new(),
        }
    }

    fn visible(&self, entity: &EntityKey, field: &FieldKey) -> Option<&SlotValue> {
        self.data
            .get(entity, field)
            .or_else(|| self.store.visible_below(self.target, entity, field))
    }

    pub fn write_record(&mut self, entity: EntityKey, field: FieldKey, value: Value) {
        self.write_slot(entity, field, SlotValue::Record(value));
    }

    pub fn write_link(&mut self, entity: EntityKey, field: FieldKey, link: Link) {
        self.write_slot(entity, field, SlotValue::Link(link));
    }

    fn write_slot(&mut self, entity: EntityKey, field: FieldKey, slot: SlotValue) {
        if self.visible(&entity, &field) != Some(&slot) {
            self.touched.insert(Dependency::new(entity.clone(), field.clone()));
        }
        self.data.set(entity, field, slot);
    }

    /// Removes one slot from the base layer.
    pub fn remove(&mut self, entity: EntityKey, field: FieldKey) {
        if self.visible(&entity, &field).is_some() {
            self.touched.insert(Dependency::new(entity.clone(), field.clone()));
        }
        self.data.remove(&entity, &field);
        self.removals.push((entity, field));
    }

    /// Marks every known field of the entity as undefined.
    pub fn invalidate_entity(&mut self, entity: &EntityKey) {
        for field in self.store.entity_field_keys(entity) {
            self.remove(entity.clone(), field);
        }
        let staged: Vec<FieldKey> = self
            .data
            .entity(entity)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default();
        for field in staged {
            self.remove(entity.clone(), field);
        }
    }

    /// Flags every operation that read an entity of this type as stale.
    pub fn invalidate_type(&mut self, typename: impl Into<String>) {
        self.invalidated_types.insert(typename.into());
    }

    /// Whether anything (staged or committed) occupies this slot.
    pub fn contains(&self, entity: &EntityKey, field: &FieldKey) -> bool {
        self.visible(entity, field).is_some()
    }

    /// The link visible at this slot, staged writes included.
    pub fn visible_link(&self, entity: &EntityKey, field: &FieldKey) -> Option<Link> {
        match self.visible(entity, field)? {
            SlotValue::Link(link) => Some(link.clone()),
            SlotValue::Record(_) => None,
        }
    }

    /// Whether the base layer already holds this slot, regardless of what
    /// upper layers show.
    pub fn base_contains(&self, entity: &EntityKey, field: &FieldKey) -> bool {
        self.store.base_contains(entity, field)
    }

    /// Whether the entity exists anywhere in the store.
    pub fn entity_known(&self, entity: &EntityKey) -> bool {
        !self.store.entity_field_keys(entity).is_empty()
    }

    pub fn finish(self) -> StagedWrite {
        StagedWrite {
            target: self.target,
            data: self.data,
            removals: self.removals,
            touched: self.touched,
            invalidated_types: self.invalidated_types,
        }
    }
}

/// The outcome of a finished transaction, ready to be committed.
pub(crate) struct StagedWrite {
    pub target: LayerTarget,
    pub data: LayerData,
    pub removals: Vec<(EntityKey, FieldKey)>,
    pub touched: IndexSet<Dependency>,
    pub invalidated_types: IndexSet<String>,
}

/// What a committed transaction touched, handed to the dependency index.
#[derive(Debug, Default)]
pub(crate) struct WriteOutcome {
    pub touched: IndexSet<Dependency>,
    pub invalidated_types: IndexSet<String>,
}

impl WriteOutcome {
    pub fn merge(&mut self, other: WriteOutcome) {
        self.touched.extend(other.touched);
        self.invalidated_types.extend(other.invalidated_types);
    }

    pub fn extend_touched(&mut self, deps: impl IntoIterator<Item = Dependency>) {
        self.touched.extend(deps);
    }
}
