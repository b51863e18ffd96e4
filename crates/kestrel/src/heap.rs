//! Arena heap for objects, computed strings, big integers, and scopes.
//!
//! All cyclic runtime structure (object <-> prototype <-> constructor,
//! scope <-> parent <-> activation) lives in one typed arena addressed by
//! [`HeapId`] indices. Links are ids, never Rust references, which keeps
//! lifetimes trivial, makes frame snapshots serializable, and lets a
//! tracing collector reclaim cycles.
//!
//! Collection is mark-and-sweep and only runs at explicit safepoints (the
//! dispatch loop's interrupt poll and the host boundary), with roots
//! supplied by the caller: the global scope, operand and frame stacks,
//! pending jobs, and suspended generator state.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{
    property::{AssocKey, JsObject, SlotData},
    resource::{ResourceError, ResourceTracker},
    scope::Scope,
    value::Value,
};

/// Index handle into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }

    /// Placeholder id for unit tests that never dereference it.
    #[cfg(test)]
    pub(crate) fn default_for_tests() -> Self {
        Self(0)
    }
}

/// Arena-resident data. A closed union: every runtime entity that other
/// entities can point at is one of these.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum HeapData {
    Object(JsObject),
    /// A computed string. Literal strings stay interned; only runtime
    /// concatenation and conversion results land here.
    Str(String),
    BigInt(BigInt),
    Scope(Scope),
}

impl HeapData {
    /// Static name of this variant for statistics.
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Object(obj) => obj.class_tag.name(),
            Self::Str(_) => "String",
            Self::BigInt(_) => "BigInt",
            Self::Scope(_) => "Scope",
        }
    }

    /// Rough payload size for resource accounting. Precision matters less
    /// than monotonicity: growth must be visible to the tracker.
    fn estimate_size(&self) -> usize {
        match self {
            Self::Object(obj) => {
                std::mem::size_of::<JsObject>() + obj.properties.len() * 48 + obj.estimate_kind_size()
            }
            Self::Str(s) => std::mem::size_of::<String>() + s.len(),
            Self::BigInt(b) => std::mem::size_of::<BigInt>() + b.bits() as usize / 8,
            Self::Scope(scope) => std::mem::size_of::<Scope>() + scope.estimate_size(),
        }
    }
}

/// Snapshot of heap state at a point in time.
///
/// Captures object counts by kind plus interner growth; used by hosts to
/// monitor a long-lived realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live entries on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live entries by kind name.
    ///
    /// `BTreeMap` keeps iteration deterministic for display and comparison.
    pub objects_by_kind: BTreeMap<&'static str, usize>,
    /// Number of dynamically interned strings in the program's interns.
    pub interned_strings: usize,
}

/// The arena heap.
///
/// Slots are `Option` so freed entries can be recycled through a free list
/// without shifting ids. The tracker is consulted before every allocation
/// and after every free.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = "T: Default"))]
pub(crate) struct Heap<T: ResourceTracker> {
    slots: Vec<Option<HeapData>>,
    free: Vec<u32>,
    #[serde(skip)]
    tracker: T,
    /// Allocations since the last collection; drives `should_collect`.
    #[serde(skip)]
    allocated_since_collect: usize,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            tracker,
            allocated_since_collect: 0,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Replaces the tracker after deserialization (serde skips it).
    pub fn set_tracker(&mut self, tracker: T) {
        self.tracker = tracker;
    }

    /// Allocates a heap entry, charging the tracker.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| data.estimate_size())?;
        self.allocated_since_collect += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(data);
            Ok(HeapId(index))
        } else {
            let index = u32::try_from(self.slots.len()).expect("heap slot overflow");
            self.slots.push(Some(data));
            Ok(HeapId(index))
        }
    }

    /// Reads a heap entry.
    ///
    /// # Panics
    /// Panics if the id points at a freed slot; ids are never exposed past
    /// the lifetime of their entry.
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slots[id.index()].as_ref().expect("use of freed heap id")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slots[id.index()].as_mut().expect("use of freed heap id")
    }

    /// Reads an entry known to be an object.
    ///
    /// # Panics
    /// Panics when the entry is not an object; callers hold this invariant
    /// structurally (ids stored in object-position fields).
    pub fn object(&self, id: HeapId) -> &JsObject {
        match self.get(id) {
            HeapData::Object(obj) => obj,
            other => panic!("heap id is not an object: {}", other.kind_name()),
        }
    }

    pub fn object_mut(&mut self, id: HeapId) -> &mut JsObject {
        match self.get_mut(id) {
            HeapData::Object(obj) => obj,
            other => panic!("heap id is not an object: {}", other.kind_name()),
        }
    }

    /// Reads an entry known to be a scope.
    pub fn scope(&self, id: HeapId) -> &Scope {
        match self.get(id) {
            HeapData::Scope(scope) => scope,
            other => panic!("heap id is not a scope: {}", other.kind_name()),
        }
    }

    pub fn scope_mut(&mut self, id: HeapId) -> &mut Scope {
        match self.get_mut(id) {
            HeapData::Scope(scope) => scope,
            other => panic!("heap id is not a scope: {}", other.kind_name()),
        }
    }

    /// Allocates a computed string.
    pub fn alloc_string(&mut self, s: String) -> Result<HeapId, ResourceError> {
        self.allocate(HeapData::Str(s))
    }

    /// Allocates a `BigInt` value.
    pub fn alloc_bigint(&mut self, b: BigInt) -> Result<HeapId, ResourceError> {
        self.allocate(HeapData::BigInt(b))
    }

    /// Number of live entries.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when enough allocation has happened to justify a collection at
    /// the next safepoint.
    pub fn wants_collect(&self) -> bool {
        self.tracker.should_collect(self.live_count(), self.allocated_since_collect)
    }

    /// Mark-and-sweep collection from the given roots. Returns the number
    /// of entries freed.
    ///
    /// Ids are stable across collections; only unreachable entries are
    /// freed and their slots recycled.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = HeapId>) -> usize {
        let mut marked = vec![false; self.slots.len()];
        let mut pending: Vec<HeapId> = Vec::new();
        for root in roots {
            if !marked[root.index()] {
                marked[root.index()] = true;
                pending.push(root);
            }
        }
        while let Some(id) = pending.pop() {
            let mut push = |next: HeapId| {
                if !marked[next.index()] {
                    marked[next.index()] = true;
                    pending.push(next);
                }
            };
            // A marked id may already have been freed in an earlier cycle
            // only if a stale root was passed; treat that as a caller bug.
            trace_data(self.slots[id.index()].as_ref().expect("traced freed heap id"), &mut push);
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !marked[index] {
                let data = slot.take().expect("slot vanished during sweep");
                self.tracker.on_free(|| data.estimate_size());
                self.free.push(u32::try_from(index).expect("heap slot overflow"));
                freed += 1;
            }
        }
        self.allocated_since_collect = 0;
        freed
    }

    /// Builds a statistics snapshot; the dynamic-intern count comes from
    /// the program's interns table.
    pub fn stats(&self, interned_strings: usize) -> HeapStats {
        let mut objects_by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
        for slot in self.slots.iter().flatten() {
            *objects_by_kind.entry(slot.kind_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: self.live_count(),
            free_slots: self.free.len(),
            total_slots: self.slots.len(),
            objects_by_kind,
            interned_strings,
        }
    }
}

fn trace_value(value: &Value, push: &mut impl FnMut(HeapId)) {
    if let Some(id) = value.ref_id() {
        push(id);
    }
}

/// Enumerates every id a heap entry references.
fn trace_data(data: &HeapData, push: &mut impl FnMut(HeapId)) {
    match data {
        HeapData::Str(_) | HeapData::BigInt(_) => {}
        HeapData::Object(obj) => {
            if let Some(proto) = obj.prototype {
                push(proto);
            }
            for slot in obj.properties.values() {
                match &slot.data {
                    SlotData::Data(value) => trace_value(value, push),
                    SlotData::Accessor { get, set } => {
                        if let Some(get) = get {
                            trace_value(get, push);
                        }
                        if let Some(set) = set {
                            trace_value(set, push);
                        }
                    }
                }
            }
            if let Some(associated) = &obj.associated {
                for (key, value) in associated.iter() {
                    match key {
                        AssocKey::Private(storage, _)
                        | AssocKey::PrivateMethod(storage, _)
                        | AssocKey::PrivateGetter(storage, _)
                        | AssocKey::PrivateSetter(storage, _)
                        | AssocKey::Brand(storage) => push(*storage),
                    }
                    trace_value(value, push);
                }
            }
            obj.kind.trace(push);
        }
        HeapData::Scope(scope) => scope.trace(push),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn allocation_recycles_freed_slots() {
        let mut heap = Heap::new(NoLimitTracker);
        let a = heap.alloc_string("alpha".to_owned()).unwrap();
        let b = heap.alloc_string("beta".to_owned()).unwrap();
        assert_ne!(a, b);

        // Nothing roots `a`, so collecting with only `b` frees one slot.
        let freed = heap.collect([b]);
        assert_eq!(freed, 1);
        let c = heap.alloc_string("gamma".to_owned()).unwrap();
        assert_eq!(a, c, "freed slot is reused");
        match heap.get(c) {
            HeapData::Str(s) => assert_eq!(s, "gamma"),
            other => panic!("unexpected kind: {}", other.kind_name()),
        }
    }

    #[test]
    fn collect_traces_through_cycles() {
        let mut heap = Heap::new(NoLimitTracker);
        // Two objects pointing at each other through their prototypes.
        let a = heap
            .allocate(HeapData::Object(JsObject::plain(None)))
            .unwrap();
        let b = heap
            .allocate(HeapData::Object(JsObject::plain(Some(a))))
            .unwrap();
        heap.object_mut(a).prototype = Some(b);

        // Rooted: the cycle survives.
        assert_eq!(heap.collect([a]), 0);
        // Unrooted: the whole cycle goes at once.
        assert_eq!(heap.collect([]), 2);
    }

    #[test]
    fn stats_counts_by_kind() {
        let mut heap = Heap::new(NoLimitTracker);
        heap.alloc_string("x".to_owned()).unwrap();
        heap.allocate(HeapData::Object(JsObject::plain(None))).unwrap();
        heap.allocate(HeapData::Object(JsObject::plain(None))).unwrap();
        let stats = heap.stats(0);
        assert_eq!(stats.live_objects, 3);
        assert_eq!(stats.objects_by_kind.get("Object"), Some(&2));
        assert_eq!(stats.objects_by_kind.get("String"), Some(&1));
    }
}
