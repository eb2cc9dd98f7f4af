use indexmap::IndexMap;
use serde_json::Value;

use crate::key::{EntityKey, FieldKey};

/// A reference stored under `(entity, field)`.
#[derive(Clone, Debug, PartialEq)]
pub enum Link {
    /// An explicit null link, distinct from an absent slot.
    Null,
    Entity(EntityKey),
    /// An ordered list of links; lists nest for `[[T]]` fields.
    List(Vec<Link>),
}

impl Link {
    pub(crate) fn collect_targets(&self, out: &mut Vec<EntityKey>) {
        match self {
            Link::Null => {}
            Link::Entity(key) => out.push(key.clone()),
            Link::List(items) => {
                for item in items {
                    item.collect_targets(out);
                }
            }
        }
    }
}

/// What occupies one `(entity, field)` slot. A slot is either a record or a
/// link, never both.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SlotValue {
    Record(Value),
    Link(Link),
}

/// The record/link map of one layer.
#[derive(Clone, Debug, Default)]
pub(crate) struct LayerData {
    entities: IndexMap<EntityKey, IndexMap<FieldKey, SlotValue>>,
}

impl LayerData {
    pub fn get(&self, entity: &EntityKey, field: &FieldKey) -> Option<&SlotValue> {
        self.entities.get(entity)?.get(field)
    }

    pub fn set(&mut self, entity: EntityKey, field: FieldKey, value: SlotValue) {
        self.entities.entry(entity).or_default().insert(field, value);
    }

    pub fn remove(&mut self, entity: &EntityKey, field: &FieldKey) {
        if let Some(fields) = self.entities.get_mut(entity) {
            fields.shift_remove(field);
            if fields.is_empty() {
                self.entities.shift_remove(entity);
            }
        }
    }

    pub fn contains(&self, entity: &EntityKey, field: &FieldKey) -> bool {
        self.get(entity, field).is_some()
    }

    pub fn entity(&self, entity: &EntityKey) -> Option<&IndexMap<FieldKey, SlotValue>> {
        self.entities.get(entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&EntityKey, &IndexMap<FieldKey, SlotValue>)> {
        self.entities.iter()
    }

    pub fn slots(&self) -> impl Iterator<Item = (&EntityKey, &FieldKey, &SlotValue)> {
        self.entities
            .iter()
            .flat_map(|(entity, fields)| fields.iter().map(move |(field, value)| (entity, field, value)))
    }

    pub fn into_slots(self) -> impl Iterator<Item = (EntityKey, FieldKey, SlotValue)> {
        self.entities.into_iter().flat_map(|(entity, fields)| {
            fields
                .into_iter()
                .map(move |(field, value)| (entity.clone(), field, value))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn retain_entities(&mut self, mut keep: impl FnMut(&EntityKey) -> bool) {
        self.entities.retain(|entity, _| keep(entity));
    }

    /// Squashes this layer's slots into `target`, overwriting.
    pub fn merge_into(self, target: &mut LayerData) {
        for (entity, field, value) in self.into_slots() {
            target.set(entity, field, value);
        }
    }
}

/// Position class of a layer in the overlay stack. Read order is
/// subscriptions, then optimistic layers, then commutative layers in
/// descending issue order, then base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LayerKind {
    Optimistic,
    Commutative { order: u64 },
    Subscription,
}

#[derive(Debug)]
pub(crate) struct Layer {
    pub id: u64,
    pub kind: LayerKind,
    pub data: LayerData,
    /// Whether the owning operation delivered its final payload.
    pub complete: bool,
}
