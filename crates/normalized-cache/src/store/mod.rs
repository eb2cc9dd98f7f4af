//! The normalized store: layered record/link maps plus the layer stack
//! bookkeeping that keeps concurrently-issued operations commutative.

mod layer;
mod txn;

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexSet;
use serde_json::Value;

pub use layer::Link;
pub(crate) use layer::{Layer, LayerData, LayerKind, SlotValue};
pub(crate) use txn::{LayerTarget, StagedWrite, WriteOutcome, WriteTxn};

use crate::key::{Dependency, EntityKey, FieldKey};

/// In-memory normalized records and links with a layered overlay model.
///
/// Reads consult layers top-down; only one write transaction is open at a
/// time and its writes become visible atomically on commit.
pub(crate) struct Store {
    base: LayerData,
    /// Read order: index 0 is the topmost layer.
    layers: Vec<Layer>,
    /// Issue orders of queries whose results are still outstanding,
    /// `true` once resolved.
    reservations: BTreeMap<u64, bool>,
    generation: u64,
    entity_generations: HashMap<EntityKey, u64>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            base: LayerData::default(),
            layers: Vec::new(),
            reservations: BTreeMap::new(),
            generation: 0,
            entity_generations: HashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation of the last write that touched this entity.
    pub fn entity_generation(&self, entity: &EntityKey) -> u64 {
        self.entity_generations.get(entity).copied().unwrap_or(0)
    }

    pub fn begin(&self, target: LayerTarget) -> WriteTxn<'_> {
        WriteTxn::new(self, target)
    }

    /// The slot visible at `(entity, field)`, layers consulted top-down.
    pub fn slot(&self, entity: &EntityKey, field: &FieldKey) -> Option<&SlotValue> {
        for layer in &self.layers {
            if let Some(slot) = layer.data.get(entity, field) {
                return Some(slot);
            }
        }
        self.base.get(entity, field)
    }

    pub fn read_record(&self, entity: &EntityKey, field: &FieldKey) -> Option<&Value> {
        match self.slot(entity, field)? {
            SlotValue::Record(value) => Some(value),
            SlotValue::Link(_) => None,
        }
    }

    pub fn read_link(&self, entity: &EntityKey, field: &FieldKey) -> Option<&Link> {
        match self.slot(entity, field)? {
            SlotValue::Link(link) => Some(link),
            SlotValue::Record(_) => None,
        }
    }

    /// The slot visible from `target` downward, used by transactions to
    /// detect writes that change nothing.
    pub(crate) fn visible_below(
        &self,
        target: LayerTarget,
        entity: &EntityKey,
        field: &FieldKey,
    ) -> Option<&SlotValue> {
        let start = match target {
            LayerTarget::Base => self.layers.len(),
            LayerTarget::Layer(id) => self.layer_index(id).map_or(self.layers.len(), |index| index),
        };
        for layer in &self.layers[start..] {
            if let Some(slot) = layer.data.get(entity, field) {
                return Some(slot);
            }
        }
        self.base.get(entity, field)
    }

    pub fn base_contains(&self, entity: &EntityKey, field: &FieldKey) -> bool {
        self.base.contains(entity, field)
    }

    /// The runtime type name of an entity: its `__typename` record when one
    /// was written, otherwise whatever the key encodes.
    pub fn entity_typename(&self, entity: &EntityKey) -> Option<String> {
        if let Some(Value::String(typename)) = self.read_record(entity, &FieldKey::new("__typename")) {
            return Some(typename.clone());
        }
        entity.typename().map(str::to_owned)
    }

    /// Every field key known for the entity across base and layers.
    pub fn entity_field_keys(&self, entity: &EntityKey) -> IndexSet<FieldKey> {
        let mut fields = IndexSet::new();
        if let Some(slots) = self.base.entity(entity) {
            fields.extend(slots.keys().cloned());
        }
        for layer in &self.layers {
            if let Some(slots) = layer.data.entity(entity) {
                fields.extend(slots.keys().cloned());
            }
        }
        fields
    }

    fn layer_index(&self, id: u64) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id == id)
    }

    pub fn has_layer(&self, id: u64) -> bool {
        self.layer_index(id).is_some()
    }

    pub fn layer_kind(&self, id: u64) -> Option<LayerKind> {
        self.layer_index(id).map(|index| self.layers[index].kind)
    }

    /// Inserts a new empty layer at the position its kind dictates.
    pub fn push_layer(&mut self, id: u64, kind: LayerKind) {
        if self.has_layer(id) {
            return;
        }
        let index = self.insert_position(&kind);
        self.layers.insert(
            index,
            Layer {
                id,
                kind,
                data: LayerData::default(),
                complete: false,
            },
        );
    }

    fn insert_position(&self, kind: &LayerKind) -> usize {
        match kind {
            LayerKind::Subscription => 0,
            LayerKind::Optimistic => self
                .layers
                .iter()
                .position(|layer| !matches!(layer.kind, LayerKind::Subscription))
                .unwrap_or(self.layers.len()),
            LayerKind::Commutative { order } => {
                let mut index = self
                    .layers
                    .iter()
                    .position(|layer| matches!(layer.kind, LayerKind::Commutative { .. }))
                    .unwrap_or(self.layers.len());
                while index < self.layers.len() {
                    match self.layers[index].kind {
                        LayerKind::Commutative { order: existing } if existing > *order => index += 1,
                        _ => break,
                    }
                }
                index
            }
        }
    }

    /// Drops a layer without applying it, returning the dependencies whose
    /// visible values may have rolled back.
    pub fn discard_layer(&mut self, id: u64) -> IndexSet<Dependency> {
        let Some(index) = self.layer_index(id) else {
            return IndexSet::new();
        };
        let layer = self.layers.remove(index);
        self.reservations.remove(&id);

        let mut touched = IndexSet::new();
        for (entity, field, _) in layer.data.slots() {
            touched.insert(Dependency::new(entity.clone(), field.clone()));
        }
        if !touched.is_empty() {
            self.generation += 1;
            for dep in &touched {
                self.entity_generations.insert(dep.entity.clone(), self.generation);
            }
        }
        touched
    }

    /// Squashes a layer into the base layer. The composed view is unchanged
    /// for slots the layer owned, so this touches no dependencies.
    pub fn squash_layer(&mut self, id: u64) {
        let Some(index) = self.layer_index(id) else { return };
        let layer = self.layers.remove(index);
        self.reservations.remove(&id);
        layer.data.merge_into(&mut self.base);
    }

    pub fn mark_layer_complete(&mut self, id: u64, complete: bool) {
        if let Some(index) = self.layer_index(id) {
            self.layers[index].complete = complete;
        }
    }

    /// Notes that a query with this issue order has been forwarded.
    pub fn reserve(&mut self, order: u64) {
        self.reservations.entry(order).or_insert(false);
    }

    /// Marks a reservation resolved once the final result arrived.
    pub fn resolve_reservation(&mut self, order: u64) {
        if self.has_layer(order) {
            if let Some(resolved) = self.reservations.get_mut(&order) {
                *resolved = true;
            }
        } else {
            self.reservations.remove(&order);
        }
    }

    /// Drops a reservation entirely (teardown before any result).
    pub fn release_reservation(&mut self, order: u64) {
        self.reservations.remove(&order);
    }

    /// Whether a result for `order` must go through a commutative layer
    /// because an earlier-issued query is still outstanding.
    pub fn needs_commutative_layer(&self, order: u64) -> bool {
        self.reservations
            .range(..order)
            .any(|(_, resolved)| !*resolved)
    }

    /// Squashes resolved commutative layers into base, bottom-up, as long
    /// as no earlier-issued query is still outstanding.
    pub fn squash_ready(&mut self) -> Vec<u64> {
        let mut squashed = Vec::new();
        loop {
            let Some(layer) = self.layers.last() else { break };
            let LayerKind::Commutative { order } = layer.kind else { break };
            if !layer.complete {
                break;
            }
            if self.reservations.range(..order).any(|(_, resolved)| !*resolved) {
                break;
            }
            let layer = self.layers.pop().unwrap();
            self.reservations.remove(&layer.id);
            layer.data.merge_into(&mut self.base);
            squashed.push(layer.id);
        }
        squashed
    }

    /// Whether any optimistic layer currently shadows one of `deps`.
    pub fn optimistic_covers(&self, deps: &IndexSet<Dependency>) -> bool {
        self.layers
            .iter()
            .filter(|layer| layer.kind == LayerKind::Optimistic)
            .any(|layer| deps.iter().any(|dep| layer.data.contains(&dep.entity, &dep.field)))
    }

    pub fn commit(&mut self, staged: StagedWrite) -> WriteOutcome {
        let StagedWrite {
            target,
            data,
            removals,
            touched,
            invalidated_types,
        } = staged;

        if !data.is_empty() || !removals.is_empty() {
            self.generation += 1;
        }

        let target_data = match target {
            LayerTarget::Base => &mut self.base,
            LayerTarget::Layer(id) => match self.layers.iter_mut().find(|layer| layer.id == id) {
                Some(layer) => &mut layer.data,
                None => {
                    tracing::warn!(target: "normalized_cache", "write committed to a dropped layer {id}");
                    &mut self.base
                }
            },
        };
        for (entity, field, slot) in data.into_slots() {
            target_data.set(entity, field, slot);
        }
        for (entity, field) in removals {
            self.base.remove(&entity, &field);
        }

        let generation = self.generation;
        for dep in &touched {
            self.entity_generations.insert(dep.entity.clone(), generation);
        }

        WriteOutcome {
            touched,
            invalidated_types,
        }
    }

    /// Best-effort sweep of entities unreachable from the operation roots
    /// and unreferenced by any live dependency.
    pub fn gc(&mut self, live: &IndexSet<EntityKey>) -> usize {
        let mut marked = live.clone();
        for (entity, _) in self.base.entities() {
            if entity.typename().is_some_and(|ty| ty == entity.as_str()) {
                marked.insert(entity.clone());
            }
        }
        for layer in &self.layers {
            for (entity, _, _) in layer.data.slots() {
                marked.insert(entity.clone());
            }
        }

        let mut queue: Vec<EntityKey> = marked.iter().cloned().collect();
        while let Some(entity) = queue.pop() {
            let mut targets = Vec::new();
            if let Some(slots) = self.base.entity(&entity) {
                for slot in slots.values() {
                    if let SlotValue::Link(link) = slot {
                        link.collect_targets(&mut targets);
                    }
                }
            }
            for target in targets {
                if marked.insert(target.clone()) {
                    queue.push(target);
                }
            }
        }

        let before = self.base.entity_count();
        self.base.retain_entities(|entity| marked.contains(entity));
        before - self.base.entity_count()
    }
}
