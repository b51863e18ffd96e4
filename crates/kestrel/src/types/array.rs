//! Array element storage: a dense prefix plus a sparse overflow.
//!
//! Elements live outside the property map; the VM's property operations
//! route integer keys on arrays here and keep the magic `length` in sync.
//! Holes in the dense prefix are marked with the internal `NotFound`
//! sentinel and are reported as absent, never as values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{heap::HeapId, value::Value};

/// Indices this far past the dense prefix fall into the sparse map instead
/// of growing the prefix with holes.
const SPARSE_GAP: u32 = 256;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ArrayStorage {
    /// Dense prefix; holes are `Value::NotFound`.
    dense: Vec<Value>,
    /// Sparse overflow for indices far past the dense prefix.
    sparse: BTreeMap<u32, Value>,
    /// The `length` property. Always larger than every populated index.
    length: u32,
    /// Set by `Object.seal`: element adds and deletes are rejected.
    pub sealed: bool,
    /// Set by `Object.freeze`: every element mutation is rejected.
    pub frozen: bool,
}

impl ArrayStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            dense: Vec::with_capacity(capacity as usize),
            ..Self::default()
        }
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Sets `length`, deleting every element at or past the new value when
    /// it decreases.
    pub fn set_length(&mut self, new_length: u32) {
        if new_length < self.length {
            self.dense.truncate(new_length as usize);
            self.sparse.retain(|&index, _| index < new_length);
        }
        self.length = new_length;
    }

    /// Reads an element; `None` for holes and out-of-range indices.
    pub fn get(&self, index: u32) -> Option<&Value> {
        if (index as usize) < self.dense.len() {
            match &self.dense[index as usize] {
                Value::NotFound => None,
                value => Some(value),
            }
        } else {
            self.sparse.get(&index)
        }
    }

    pub fn has(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    /// Writes an element, growing `length` when the index reaches past it.
    pub fn set(&mut self, index: u32, value: Value) {
        let dense_len = self.dense.len() as u32;
        if index < dense_len {
            self.dense[index as usize] = value;
        } else if index <= dense_len.saturating_add(SPARSE_GAP) {
            // Close the gap with holes and extend the dense prefix.
            for _ in dense_len..index {
                self.dense.push(Value::NotFound);
            }
            self.dense.push(value);
            // Pull in any sparse entries that now border the prefix.
            while let Some(entry) = self.sparse.remove(&(self.dense.len() as u32)) {
                self.dense.push(entry);
            }
        } else {
            self.sparse.insert(index, value);
        }
        if index >= self.length {
            self.length = index + 1;
        }
    }

    /// Appends at `length`.
    pub fn push(&mut self, value: Value) {
        self.set(self.length, value);
    }

    /// Deletes an element, leaving a hole. `length` is unchanged, matching
    /// the `delete` operator.
    pub fn delete(&mut self, index: u32) -> bool {
        if (index as usize) < self.dense.len() {
            self.dense[index as usize] = Value::NotFound;
            true
        } else {
            self.sparse.remove(&index);
            true
        }
    }

    /// Populated indices in ascending order.
    pub fn own_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self
            .dense
            .iter()
            .enumerate()
            .filter(|(_, value)| !matches!(value, Value::NotFound))
            .map(|(i, _)| i as u32)
            .collect();
        indices.extend(self.sparse.keys().copied());
        indices
    }

    /// Number of populated elements.
    pub fn element_count(&self) -> usize {
        self.dense.iter().filter(|v| !matches!(v, Value::NotFound)).count() + self.sparse.len()
    }

    pub fn trace(&self, push: &mut impl FnMut(HeapId)) {
        for value in &self.dense {
            if let Some(id) = value.ref_id() {
                push(id);
            }
        }
        for value in self.sparse.values() {
            if let Some(id) = value.ref_id() {
                push(id);
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.dense.len() * std::mem::size_of::<Value>() + self.sparse.len() * 32
    }
}
