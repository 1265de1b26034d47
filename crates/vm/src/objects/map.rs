//! The insertion-ordered, open-addressed map.
//!
//! Two parallel arrays back every map:
//!
//! - the *entry array* is dense and append-only; it records insertion order.
//!   Deleting an entry overwrites its key with the tombstone sentinel and
//!   leaves the slot in place so iteration order is preserved.
//! - the *index array* is power-of-two sized and linear-probed; each slot
//!   holds an index into the entry array, or one of the sentinels
//!   [`EMPTY_SLOT`] / [`TOMBSTONE_SLOT`].
//!
//! The load invariant is `index_array_count <= capacity * 0.5`, where the
//! count *includes tombstones*. Breaching it doubles the index array and
//! rebuilds it, compacting entry-array tombstones in the process.
//!
//! Key hashing and equality can call into Pyro code (instance keys with
//! `$hash` / `$op_binary_equals_equals`), so the probe loops that need them
//! live on the VM; this module holds the storage and the pure operations.

use crate::value::Value;

/// Index-array sentinel: the slot has never been used.
pub const EMPTY_SLOT: i64 = -1;

/// Index-array sentinel: the slot held an entry that was deleted. Retained
/// to preserve probe chains.
pub const TOMBSTONE_SLOT: i64 = -2;

/// The load threshold: count (including tombstones) over capacity.
const MAX_LOAD: f64 = 0.5;

/// Distinguishes the map's user-visible flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    /// A plain key-value map.
    Map,

    /// A set: the same storage, keys only.
    Set,

    /// A weak map: entries are not traced by the collector and are pruned
    /// when their keys are collected. Used for the intern pool.
    WeakRef,
}

/// A key-value pair in the entry array. A deleted entry has a tombstone key.
#[derive(Debug, Clone, Copy)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

/// The insertion-ordered open-addressed map.
#[derive(Debug)]
pub struct PyroMap {
    /// Map, Set or WeakRef flavor.
    pub kind: MapKind,

    /// The number of live (non-tombstone) entries.
    pub(crate) live_entry_count: usize,

    /// Dense, append-only storage in insertion order. Length includes
    /// tombstoned entries.
    pub(crate) entry_array: Vec<MapEntry>,

    /// Power-of-two sized, linear-probed index into `entry_array`.
    pub(crate) index_array: Vec<i64>,

    /// The number of used index slots, including tombstones.
    pub(crate) index_array_count: usize,

    /// Recomputed on every resize: `capacity * MAX_LOAD`.
    pub(crate) max_load_threshold: usize,
}

impl PyroMap {
    /// Creates an empty map of the given flavor.
    pub fn new(kind: MapKind) -> Self {
        Self {
            kind,
            live_entry_count: 0,
            entry_array: Vec::new(),
            index_array: Vec::new(),
            index_array_count: 0,
            max_load_threshold: 0,
        }
    }

    /// Returns the number of live entries.
    #[inline]
    pub fn count(&self) -> usize {
        self.live_entry_count
    }

    /// Returns true if the map has no live entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live_entry_count == 0
    }

    /// Returns the index array capacity.
    #[inline]
    pub(crate) fn index_capacity(&self) -> usize {
        self.index_array.len()
    }

    /// Returns the entry array, tombstones included. Iteration in entry
    /// order is insertion order.
    #[inline]
    pub fn entries(&self) -> &[MapEntry] {
        &self.entry_array
    }

    /// Iterates the live entries in insertion order.
    pub fn live_entries(&self) -> impl Iterator<Item = &MapEntry> {
        self.entry_array
            .iter()
            .filter(|entry| !entry.key.is_tombstone())
    }

    /// True if an insert must resize the index array first: either the index
    /// has never been allocated, or its used-slot count (tombstones
    /// included) has reached the load threshold.
    #[inline]
    pub(crate) fn needs_index_resize(&self) -> bool {
        self.index_array.is_empty() || self.index_array_count >= self.max_load_threshold
    }

    /// Appends a new entry, growing the entry array under the shared growth
    /// discipline. Returns the new entry's index.
    pub(crate) fn append_entry(&mut self, key: Value, value: Value) -> i64 {
        if self.entry_array.len() == self.entry_array.capacity() {
            let new_capacity = super::grow_capacity(self.entry_array.capacity());
            self.entry_array
                .reserve_exact(new_capacity - self.entry_array.len());
        }
        self.entry_array.push(MapEntry { key, value });
        (self.entry_array.len() - 1) as i64
    }

    /// Drops tombstoned entries from the entry array, preserving the order
    /// of the survivors. Only called while the index is being rebuilt.
    pub(crate) fn compact_entries(&mut self) {
        if self.entry_array.len() > self.live_entry_count {
            self.entry_array.retain(|entry| !entry.key.is_tombstone());
        }
    }

    /// Replaces the index array with a fresh one of `capacity` empty slots
    /// and resets the slot count to the live entry count.
    pub(crate) fn reset_index(&mut self, capacity: usize) {
        debug_assert!(capacity.is_power_of_two());
        self.index_array.clear();
        self.index_array.resize(capacity, EMPTY_SLOT);
        self.index_array_count = self.live_entry_count;
        self.max_load_threshold = (capacity as f64 * MAX_LOAD) as usize;
    }

    /// Probes for the first empty slot for `hash` and stores `entry_index`
    /// there. Used only while rebuilding the index, when every key is known
    /// to be distinct.
    pub(crate) fn place_index(&mut self, hash: u64, entry_index: i64) {
        let mask = self.index_array.len() - 1;
        let mut i = hash as usize & mask;
        while self.index_array[i] != EMPTY_SLOT {
            i = (i + 1) & mask;
        }
        self.index_array[i] = entry_index;
    }

    /// The number of heap bytes owned by this object's payload.
    pub(crate) fn payload_size(&self) -> usize {
        self.entry_array.capacity() * std::mem::size_of::<MapEntry>()
            + self.index_array.len() * std::mem::size_of::<i64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_map_has_no_index() {
        let map = PyroMap::new(MapKind::Map);
        assert!(map.needs_index_resize());
        assert_eq!(map.count(), 0);
    }

    #[test]
    fn test_compaction_preserves_order() {
        let mut map = PyroMap::new(MapKind::Map);
        for i in 0..4 {
            map.append_entry(Value::I64(i), Value::Null);
        }
        map.live_entry_count = 3;
        map.entry_array[1].key = Value::Tombstone;

        map.compact_entries();
        let keys: Vec<i64> = map
            .entries()
            .iter()
            .map(|entry| match entry.key {
                Value::I64(n) => n,
                _ => panic!("unexpected key"),
            })
            .collect();
        assert_eq!(keys, vec![0, 2, 3]);
    }

    #[test]
    fn test_threshold_tracks_capacity() {
        let mut map = PyroMap::new(MapKind::Map);
        map.reset_index(8);
        assert_eq!(map.max_load_threshold, 4);
        map.reset_index(64);
        assert_eq!(map.max_load_threshold, 32);
    }
}
