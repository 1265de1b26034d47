//! The managed heap for the Pyro virtual machine.
//!
//! All objects live in a slot arena owned by the heap; values reference them
//! through stable [`ObjRef`] handles. A single allocation entry point
//! maintains a running byte count, enforces the optional `max_bytes`
//! ceiling, and records allocation failure; objects are freed only by the
//! collector (see `gc.rs`) or at VM teardown.
//!
//! The heap also owns the interned string pool: a weak map from string
//! objects to nothing, probed by content hash. At most one live string
//! exists per byte sequence; entries are removed when their string is
//! collected.

use crate::error::{Panic, VmResult};
use crate::objects::{
    MapKind, PyroBoundMethod, PyroBuf, PyroClass, PyroClosure, PyroFile, PyroFn, PyroInstance,
    PyroIter, PyroMap, PyroModule, PyroNativeFn, PyroQueue, PyroResource, PyroStr, PyroTup,
    PyroVec, EMPTY_SLOT, TOMBSTONE_SLOT,
};
use crate::value::{ObjRef, Value};

use xxhash_rust::xxh3::xxh3_64;

/// The initial garbage collection threshold: 1 MiB.
pub const INIT_GC_THRESHOLD: usize = 1024 * 1024;

/// After each collection the next threshold is set to
/// `bytes_allocated * GC_HEAP_GROW_FACTOR`.
pub const GC_HEAP_GROW_FACTOR: usize = 2;

/// A heap object: a type-tagged payload plus a nullable class pointer and
/// the collector's mark bit.
#[derive(Debug)]
pub struct HeapObject {
    /// Set during the mark phase; cleared after the sweep.
    pub(crate) marked: bool,

    /// The object's class, if it has one.
    pub class: Option<ObjRef>,

    /// The payload.
    pub kind: ObjKind,
}

/// The payload of a heap object.
#[derive(Debug)]
pub enum ObjKind {
    Str(PyroStr),
    Tup(PyroTup),
    Vec(PyroVec),
    Map(PyroMap),
    Buf(PyroBuf),
    Queue(PyroQueue),
    Fn(PyroFn),
    Closure(PyroClosure),
    NativeFn(PyroNativeFn),
    Class(PyroClass),
    Instance(PyroInstance),
    BoundMethod(PyroBoundMethod),
    Module(PyroModule),
    Upvalue(crate::objects::PyroUpvalue),
    Iter(PyroIter),
    File(PyroFile),
    Resource(PyroResource),
}

impl ObjKind {
    /// Returns the user-visible name of the object's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjKind::Str(_) => "str",
            ObjKind::Tup(tup) => {
                if tup.is_err {
                    "err"
                } else {
                    "tup"
                }
            }
            ObjKind::Vec(vec) => match vec.kind {
                crate::objects::VecKind::Vec => "vec",
                crate::objects::VecKind::Stack => "stack",
            },
            ObjKind::Map(map) => match map.kind {
                MapKind::Map => "map",
                MapKind::Set => "set",
                MapKind::WeakRef => "map",
            },
            ObjKind::Buf(_) => "buf",
            ObjKind::Queue(_) => "queue",
            ObjKind::Fn(_) => "fn",
            ObjKind::Closure(_) => "fn",
            ObjKind::NativeFn(_) => "fn",
            ObjKind::Class(_) => "class",
            ObjKind::Instance(_) => "instance",
            ObjKind::BoundMethod(_) => "method",
            ObjKind::Module(_) => "module",
            ObjKind::Upvalue(_) => "upvalue",
            ObjKind::Iter(_) => "iter",
            ObjKind::File(_) => "file",
            ObjKind::Resource(_) => "resource",
        }
    }

    /// The number of payload bytes currently owned by the object, used for
    /// the heap's byte accounting.
    fn payload_size(&self) -> usize {
        match self {
            ObjKind::Str(s) => s.payload_size(),
            ObjKind::Tup(t) => t.payload_size(),
            ObjKind::Vec(v) => v.payload_size(),
            ObjKind::Map(m) => m.payload_size(),
            ObjKind::Buf(b) => b.payload_size(),
            ObjKind::Queue(q) => q.payload_size(),
            ObjKind::Fn(f) => f.payload_size(),
            ObjKind::Closure(c) => c.payload_size(),
            ObjKind::Instance(i) => i.payload_size(),
            ObjKind::Iter(i) => i.payload_size(),
            ObjKind::NativeFn(_)
            | ObjKind::Class(_)
            | ObjKind::BoundMethod(_)
            | ObjKind::Module(_)
            | ObjKind::Upvalue(_)
            | ObjKind::File(_)
            | ObjKind::Resource(_) => 0,
        }
    }
}

/// A cheap discriminant for dispatching on an object's kind without
/// holding a borrow on its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjTag {
    Str,
    Tup,
    Vec,
    Map,
    Buf,
    Queue,
    Fn,
    Closure,
    NativeFn,
    Class,
    Instance,
    BoundMethod,
    Module,
    Upvalue,
    Iter,
    File,
    Resource,
}

/// The slot-arena heap.
pub struct Heap {
    /// The object slots. `None` marks a free slot.
    slots: Vec<Option<HeapObject>>,

    /// Indices of free slots, reused before the arena grows.
    free_slots: Vec<u32>,

    /// The current memory allocation in bytes.
    bytes_allocated: usize,

    /// The maximum allowed allocation in bytes.
    max_bytes: usize,

    /// The next collection triggers when `bytes_allocated` breaches this.
    next_gc_threshold: usize,

    /// Set when an allocation request was refused.
    memory_allocation_failed: bool,

    /// Collection is a no-op while this counter is positive.
    gc_disallows: u32,

    /// The collector's grey worklist.
    pub(crate) grey_stack: Vec<ObjRef>,

    /// The interned string pool. Weak: not traced, pruned on sweep.
    strings: PyroMap,

    /// The number of live objects, for collector logging.
    live_objects: usize,
}

impl Heap {
    /// Creates an empty heap with no memory ceiling.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            bytes_allocated: 0,
            max_bytes: usize::MAX,
            next_gc_threshold: INIT_GC_THRESHOLD,
            memory_allocation_failed: false,
            gc_disallows: 0,
            grey_stack: Vec::new(),
            strings: PyroMap::new(MapKind::WeakRef),
            live_objects: 0,
        }
    }

    /// Sets the maximum allowed memory allocation in bytes.
    pub fn set_max_bytes(&mut self, max_bytes: usize) {
        self.max_bytes = max_bytes;
    }

    /// Returns the current allocation in bytes.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Returns the number of live objects.
    pub fn live_objects(&self) -> usize {
        self.live_objects
    }

    /// Returns true if an allocation request has been refused.
    pub fn memory_allocation_failed(&self) -> bool {
        self.memory_allocation_failed
    }

    /// Clears the allocation-failed flag, after a `try` expression has
    /// turned the failure into a catchable error value.
    pub(crate) fn clear_allocation_failed(&mut self) {
        self.memory_allocation_failed = false;
    }

    /// Pins the collector off for a critical section.
    pub(crate) fn disallow_gc(&mut self) {
        self.gc_disallows += 1;
    }

    /// Releases one collector pin.
    pub(crate) fn allow_gc(&mut self) {
        debug_assert!(self.gc_disallows > 0);
        self.gc_disallows -= 1;
    }

    /// True if the collector should run at the next safepoint.
    pub(crate) fn should_collect(&self) -> bool {
        self.gc_disallows == 0 && self.bytes_allocated > self.next_gc_threshold
    }

    /// True if the collector is currently pinned off.
    pub(crate) fn gc_disallowed(&self) -> bool {
        self.gc_disallows > 0
    }

    /// Sets the threshold for the next collection.
    pub(crate) fn update_gc_threshold(&mut self) {
        self.next_gc_threshold = self.bytes_allocated.saturating_mul(GC_HEAP_GROW_FACTOR);
    }

    /// Allocates a new object, enforcing the memory ceiling.
    ///
    /// A refused request does not allocate further memory to report the
    /// failure: it sets the allocation-failed flag and returns an
    /// out-of-memory panic for the caller to unwind with.
    pub fn alloc(&mut self, kind: ObjKind, class: Option<ObjRef>) -> VmResult<ObjRef> {
        let size = std::mem::size_of::<HeapObject>() + kind.payload_size();
        if self.bytes_allocated.saturating_add(size) > self.max_bytes {
            self.memory_allocation_failed = true;
            return Err(Panic::out_of_memory().into());
        }
        self.bytes_allocated += size;
        self.live_objects += 1;

        let object = HeapObject {
            marked: false,
            class,
            kind,
        };

        if let Some(index) = self.free_slots.pop() {
            self.slots[index as usize] = Some(object);
            Ok(ObjRef(index))
        } else {
            self.slots.push(Some(object));
            Ok(ObjRef((self.slots.len() - 1) as u32))
        }
    }

    /// Re-measures an object after a mutation that may have grown or shrunk
    /// its payload, keeping the byte count and ceiling honest.
    pub(crate) fn resize_tracked(&mut self, obj_ref: ObjRef, payload_before: usize) -> VmResult<()> {
        let payload_after = self.object(obj_ref).kind.payload_size();
        self.bytes_allocated = self
            .bytes_allocated
            .saturating_sub(payload_before)
            .saturating_add(payload_after);
        if self.bytes_allocated > self.max_bytes {
            self.memory_allocation_failed = true;
            return Err(Panic::out_of_memory().into());
        }
        Ok(())
    }

    /// Returns an object's current payload size, for `resize_tracked`.
    pub(crate) fn payload_size(&self, obj_ref: ObjRef) -> usize {
        self.object(obj_ref).kind.payload_size()
    }

    /// Frees the object in `slot`, running its finalizer. Only called from
    /// the sweep phase and from VM teardown.
    pub(crate) fn free_slot(&mut self, slot: usize) {
        if let Some(mut object) = self.slots[slot].take() {
            match &mut object.kind {
                ObjKind::File(file) => file.close(),
                ObjKind::Resource(resource) => resource.finalize(),
                _ => {}
            }
            let size = std::mem::size_of::<HeapObject>() + object.kind.payload_size();
            self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
            self.live_objects -= 1;
            self.free_slots.push(slot as u32);
        }
    }

    /// Returns the number of slots in the arena, free ones included.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the object behind a handle.
    ///
    /// Handles are only obtained from live allocations and objects are
    /// never freed while reachable, so a vacant slot here is a VM bug.
    #[inline]
    pub fn object(&self, obj_ref: ObjRef) -> &HeapObject {
        match &self.slots[obj_ref.index()] {
            Some(object) => object,
            None => unreachable!("dangling object handle"),
        }
    }

    /// Returns the object behind a handle, mutably.
    #[inline]
    pub fn object_mut(&mut self, obj_ref: ObjRef) -> &mut HeapObject {
        match &mut self.slots[obj_ref.index()] {
            Some(object) => object,
            None => unreachable!("dangling object handle"),
        }
    }

    /// Returns the kind discriminant for an object.
    #[inline]
    pub fn tag(&self, obj_ref: ObjRef) -> ObjTag {
        match &self.object(obj_ref).kind {
            ObjKind::Str(_) => ObjTag::Str,
            ObjKind::Tup(_) => ObjTag::Tup,
            ObjKind::Vec(_) => ObjTag::Vec,
            ObjKind::Map(_) => ObjTag::Map,
            ObjKind::Buf(_) => ObjTag::Buf,
            ObjKind::Queue(_) => ObjTag::Queue,
            ObjKind::Fn(_) => ObjTag::Fn,
            ObjKind::Closure(_) => ObjTag::Closure,
            ObjKind::NativeFn(_) => ObjTag::NativeFn,
            ObjKind::Class(_) => ObjTag::Class,
            ObjKind::Instance(_) => ObjTag::Instance,
            ObjKind::BoundMethod(_) => ObjTag::BoundMethod,
            ObjKind::Module(_) => ObjTag::Module,
            ObjKind::Upvalue(_) => ObjTag::Upvalue,
            ObjKind::Iter(_) => ObjTag::Iter,
            ObjKind::File(_) => ObjTag::File,
            ObjKind::Resource(_) => ObjTag::Resource,
        }
    }

    /// Returns the kind discriminant for a value, if it is an object.
    #[inline]
    pub fn value_tag(&self, value: Value) -> Option<ObjTag> {
        value.as_obj().map(|obj_ref| self.tag(obj_ref))
    }

    /// Returns the object in `slot` if the slot is live.
    pub(crate) fn slot_object(&self, slot: usize) -> Option<&HeapObject> {
        self.slots[slot].as_ref()
    }

    /// Returns the object in `slot` if the slot is live, mutably.
    pub(crate) fn slot_object_mut(&mut self, slot: usize) -> Option<&mut HeapObject> {
        self.slots[slot].as_mut()
    }
}

// Typed payload accessors. Callers check the object's kind before casting,
// exactly as the VM's opcode handlers do; a mismatch is a VM bug.
macro_rules! typed_accessors {
    ($name:ident, $name_mut:ident, $variant:ident, $ty:ty) => {
        impl Heap {
            #[inline]
            pub fn $name(&self, obj_ref: ObjRef) -> &$ty {
                match &self.object(obj_ref).kind {
                    ObjKind::$variant(payload) => payload,
                    _ => unreachable!(concat!("object is not a ", stringify!($variant))),
                }
            }

            #[inline]
            pub fn $name_mut(&mut self, obj_ref: ObjRef) -> &mut $ty {
                match &mut self.object_mut(obj_ref).kind {
                    ObjKind::$variant(payload) => payload,
                    _ => unreachable!(concat!("object is not a ", stringify!($variant))),
                }
            }
        }
    };
}

typed_accessors!(str_obj, str_obj_mut, Str, PyroStr);
typed_accessors!(tup, tup_mut, Tup, PyroTup);
typed_accessors!(vec, vec_mut, Vec, PyroVec);
typed_accessors!(map, map_mut, Map, PyroMap);
typed_accessors!(buf, buf_mut, Buf, PyroBuf);
typed_accessors!(queue, queue_mut, Queue, PyroQueue);
typed_accessors!(fun, fun_mut, Fn, PyroFn);
typed_accessors!(closure, closure_mut, Closure, PyroClosure);
typed_accessors!(native, native_mut, NativeFn, PyroNativeFn);
typed_accessors!(class, class_mut, Class, PyroClass);
typed_accessors!(instance, instance_mut, Instance, PyroInstance);
typed_accessors!(bound_method, bound_method_mut, BoundMethod, PyroBoundMethod);
typed_accessors!(module, module_mut, Module, PyroModule);
typed_accessors!(upvalue, upvalue_mut, Upvalue, crate::objects::PyroUpvalue);
typed_accessors!(iter, iter_mut, Iter, PyroIter);
typed_accessors!(file, file_mut, File, PyroFile);
typed_accessors!(resource, resource_mut, Resource, PyroResource);

// The interned string pool.
impl Heap {
    /// Creates or finds the interned string for `bytes`.
    pub fn intern(&mut self, bytes: &[u8], class: Option<ObjRef>) -> VmResult<ObjRef> {
        let hash = xxh3_64(bytes);
        if let Some(existing) = self.find_interned(bytes, hash) {
            return Ok(existing);
        }
        let string = PyroStr::new(bytes.to_vec().into_boxed_slice(), hash);
        let obj_ref = self.alloc(ObjKind::Str(string), class)?;
        self.register_interned(obj_ref, hash);
        Ok(obj_ref)
    }

    /// Creates or finds the interned string for an owned byte vector,
    /// avoiding the copy when the string is new.
    pub fn intern_owned(&mut self, bytes: Vec<u8>, class: Option<ObjRef>) -> VmResult<ObjRef> {
        let hash = xxh3_64(&bytes);
        if let Some(existing) = self.find_interned(&bytes, hash) {
            return Ok(existing);
        }
        let string = PyroStr::new(bytes.into_boxed_slice(), hash);
        let obj_ref = self.alloc(ObjKind::Str(string), class)?;
        self.register_interned(obj_ref, hash);
        Ok(obj_ref)
    }

    /// Looks up `bytes` in the intern pool.
    fn find_interned(&self, bytes: &[u8], hash: u64) -> Option<ObjRef> {
        if self.strings.is_empty() {
            return None;
        }

        let mask = self.strings.index_capacity() - 1;
        let mut i = hash as usize & mask;

        loop {
            let slot = self.strings.index_array[i];
            if slot == EMPTY_SLOT {
                return None;
            }
            if slot != TOMBSTONE_SLOT {
                if let Value::Obj(candidate) = self.strings.entry_array[slot as usize].key {
                    let string = self.str_obj(candidate);
                    if string.hash == hash && string.as_bytes() == bytes {
                        return Some(candidate);
                    }
                }
            }
            i = (i + 1) & mask;
        }
    }

    /// Inserts a freshly allocated string into the pool.
    fn register_interned(&mut self, obj_ref: ObjRef, hash: u64) {
        if self.strings.needs_index_resize() {
            self.grow_string_pool();
        }

        let mask = self.strings.index_capacity() - 1;
        let mut i = hash as usize & mask;
        loop {
            match self.strings.index_array[i] {
                EMPTY_SLOT => {
                    let index = self.strings.append_entry(Value::Obj(obj_ref), Value::Null);
                    self.strings.index_array[i] = index;
                    self.strings.live_entry_count += 1;
                    self.strings.index_array_count += 1;
                    return;
                }
                TOMBSTONE_SLOT => {
                    let index = self.strings.append_entry(Value::Obj(obj_ref), Value::Null);
                    self.strings.index_array[i] = index;
                    self.strings.live_entry_count += 1;
                    return;
                }
                _ => i = (i + 1) & mask,
            }
        }
    }

    /// Removes a collected string from the pool. Probes by identity so the
    /// string's content is never read.
    pub(crate) fn remove_interned(&mut self, obj_ref: ObjRef, hash: u64) {
        if self.strings.is_empty() {
            return;
        }

        let mask = self.strings.index_capacity() - 1;
        let mut i = hash as usize & mask;
        loop {
            let slot = self.strings.index_array[i];
            if slot == EMPTY_SLOT {
                return;
            }
            if slot != TOMBSTONE_SLOT {
                let entry = &mut self.strings.entry_array[slot as usize];
                if let Value::Obj(key) = entry.key {
                    if key == obj_ref {
                        entry.key = Value::Tombstone;
                        entry.value = Value::Tombstone;
                        self.strings.index_array[i] = TOMBSTONE_SLOT;
                        self.strings.live_entry_count -= 1;
                        return;
                    }
                }
            }
            i = (i + 1) & mask;
        }
    }

    /// Doubles the pool's index array, compacting tombstones.
    fn grow_string_pool(&mut self) {
        let mut pool = std::mem::replace(&mut self.strings, PyroMap::new(MapKind::WeakRef));
        pool.compact_entries();
        let capacity = crate::objects::grow_capacity(pool.index_capacity());
        pool.reset_index(capacity);
        for index in 0..pool.entry_array.len() {
            if let Value::Obj(key) = pool.entry_array[index].key {
                let hash = self.str_obj(key).hash;
                pool.place_index(hash, index as i64);
            }
        }
        self.strings = pool;
    }

    /// The number of live strings in the intern pool, for tests and
    /// collector logging.
    pub fn interned_count(&self) -> usize {
        self.strings.count()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // VM teardown: run the finalizers the collector would have run.
        for slot in self.slots.iter_mut() {
            if let Some(object) = slot.as_mut() {
                match &mut object.kind {
                    ObjKind::File(file) => file.close(),
                    ObjKind::Resource(resource) => resource.finalize(),
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_canonical() {
        let mut heap = Heap::new();
        let a = heap.intern(b"hello", None).unwrap();
        let b = heap.intern(b"hello", None).unwrap();
        let c = heap.intern(b"world", None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.interned_count(), 2);
    }

    #[test]
    fn test_intern_owned_matches_copied() {
        let mut heap = Heap::new();
        let a = heap.intern(b"shared", None).unwrap();
        let b = heap.intern_owned(b"shared".to_vec(), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pool_survives_growth() {
        let mut heap = Heap::new();
        let mut refs = Vec::new();
        for i in 0..100 {
            let name = format!("string-{i}");
            refs.push((name.clone(), heap.intern(name.as_bytes(), None).unwrap()));
        }
        for (name, obj_ref) in refs {
            assert_eq!(heap.intern(name.as_bytes(), None).unwrap(), obj_ref);
        }
    }

    #[test]
    fn test_memory_ceiling() {
        let mut heap = Heap::new();
        heap.set_max_bytes(256);
        let mut allocated = 0;
        loop {
            match heap.intern(format!("padding-{allocated}").as_bytes(), None) {
                Ok(_) => allocated += 1,
                Err(_) => break,
            }
        }
        assert!(heap.memory_allocation_failed());
    }

    #[test]
    fn test_removal_leaves_pool_probe_chains_intact() {
        let mut heap = Heap::new();
        let keep = heap.intern(b"keep", None).unwrap();
        let drop_ref = heap.intern(b"drop", None).unwrap();
        let hash = heap.str_obj(drop_ref).hash;
        heap.remove_interned(drop_ref, hash);
        assert_eq!(heap.intern(b"keep", None).unwrap(), keep);
        // A fresh "drop" gets a new object.
        let again = heap.intern(b"drop", None).unwrap();
        assert_ne!(again, drop_ref);
    }
}
