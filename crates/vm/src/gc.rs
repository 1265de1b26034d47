//! The tracing garbage collector.
//!
//! Mark-and-sweep, non-moving, stop-the-world. Collection is triggered at
//! the safepoint at the top of the dispatch loop when the allocated byte
//! count breaches the threshold; after a collection the threshold is reset
//! to `bytes_allocated * GC_HEAP_GROW_FACTOR`.
//!
//! Roots are every value on the VM stack, every call frame's closure, the
//! open-upvalue list, the globals / module tree / import roots, and the
//! canned strings and singleton classes. The intern pool holds weak
//! references: it is not traced, and a string's pool entry is removed when
//! the string is swept.

use crate::heap::{Heap, ObjKind};
use crate::objects::UpvalueState;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

impl Heap {
    /// Marks a value's object, if it has one.
    pub(crate) fn mark_value(&mut self, value: Value) {
        if let Value::Obj(obj_ref) = value {
            self.mark_object(obj_ref);
        }
    }

    /// Colors an object grey: marks it and queues it for tracing.
    pub(crate) fn mark_object(&mut self, obj_ref: ObjRef) {
        let object = self.object_mut(obj_ref);
        if object.marked {
            return;
        }
        object.marked = true;
        self.grey_stack.push(obj_ref);
    }

    /// Marks an optional object.
    pub(crate) fn mark_optional(&mut self, obj_ref: Option<ObjRef>) {
        if let Some(obj_ref) = obj_ref {
            self.mark_object(obj_ref);
        }
    }

    /// Drains the grey worklist, blackening each object by marking
    /// everything it references.
    pub(crate) fn trace_references(&mut self) {
        while let Some(obj_ref) = self.grey_stack.pop() {
            let mut refs: Vec<Value> = Vec::new();
            let object = self.object(obj_ref);

            if let Some(class) = object.class {
                refs.push(Value::Obj(class));
            }

            match &object.kind {
                ObjKind::Str(_)
                | ObjKind::Buf(_)
                | ObjKind::File(_)
                | ObjKind::Resource(_) => {}
                ObjKind::Tup(tup) => refs.extend_from_slice(&tup.values),
                ObjKind::Vec(vec) => refs.extend_from_slice(vec.values()),
                ObjKind::Map(map) => {
                    // Weak maps are not traced; the sweep prunes their dead
                    // entries instead.
                    if map.kind != crate::objects::MapKind::WeakRef {
                        for entry in map.live_entries() {
                            refs.push(entry.key);
                            refs.push(entry.value);
                        }
                    }
                }
                ObjKind::Queue(queue) => refs.extend(queue.iter().copied()),
                ObjKind::Fn(fun) => {
                    refs.extend_from_slice(&fun.constants);
                    if let Some(name) = fun.name {
                        refs.push(Value::Obj(name));
                    }
                    if let Some(source_id) = fun.source_id {
                        refs.push(Value::Obj(source_id));
                    }
                }
                ObjKind::Closure(closure) => {
                    refs.push(Value::Obj(closure.fun));
                    refs.push(Value::Obj(closure.module));
                    refs.extend(closure.upvalues.iter().map(|&r| Value::Obj(r)));
                }
                ObjKind::NativeFn(native) => refs.push(Value::Obj(native.name)),
                ObjKind::Class(class) => {
                    if let Some(name) = class.name {
                        refs.push(Value::Obj(name));
                    }
                    refs.push(Value::Obj(class.methods));
                    refs.push(Value::Obj(class.field_indexes));
                    refs.push(Value::Obj(class.field_initializers));
                    if let Some(superclass) = class.superclass {
                        refs.push(Value::Obj(superclass));
                    }
                }
                ObjKind::Instance(instance) => refs.extend_from_slice(&instance.fields),
                ObjKind::BoundMethod(bound) => {
                    refs.push(bound.receiver);
                    refs.push(Value::Obj(bound.method));
                }
                ObjKind::Module(module) => {
                    refs.push(Value::Obj(module.globals));
                    refs.push(Value::Obj(module.submodules));
                }
                ObjKind::Upvalue(upvalue) => {
                    if let UpvalueState::Closed(value) = upvalue.state {
                        refs.push(value);
                    }
                    if let Some(next) = upvalue.next {
                        refs.push(Value::Obj(next));
                    }
                }
                ObjKind::Iter(iter) => {
                    if let Some(source) = iter.source {
                        refs.push(Value::Obj(source));
                    }
                    if let Some(callback) = iter.callback {
                        refs.push(Value::Obj(callback));
                    }
                    refs.extend_from_slice(&iter.lookahead);
                }
            }

            for value in refs {
                self.mark_value(value);
            }
        }
    }

    /// Frees every unmarked object and clears the survivors' marks.
    ///
    /// Collected strings are removed from the intern pool before they are
    /// freed; weak maps are pruned of entries whose keys died.
    pub(crate) fn sweep(&mut self) {
        // Prune weak maps before anything is freed, while the mark bits
        // still identify the dead keys.
        let mut weak_maps: Vec<usize> = Vec::new();
        for slot in 0..self.slot_count() {
            if let Some(object) = self.slot_object(slot) {
                if let ObjKind::Map(map) = &object.kind {
                    if map.kind == crate::objects::MapKind::WeakRef && !map.is_empty() {
                        weak_maps.push(slot);
                    }
                }
            }
        }
        for slot in weak_maps {
            self.prune_weak_map(slot);
        }

        for slot in 0..self.slot_count() {
            let (marked, str_key) = match self.slot_object(slot) {
                Some(object) => {
                    let key = match &object.kind {
                        ObjKind::Str(string) => Some(string.hash),
                        _ => None,
                    };
                    (object.marked, key)
                }
                None => continue,
            };

            if marked {
                if let Some(object) = self.slot_object_mut(slot) {
                    object.marked = false;
                }
                continue;
            }

            if let Some(hash) = str_key {
                self.remove_interned(ObjRef(slot as u32), hash);
            }
            self.free_slot(slot);
        }
    }

    /// Tombstones the entries of the weak map in `slot` whose keys are
    /// about to be collected.
    fn prune_weak_map(&mut self, slot: usize) {
        let mut dead: Vec<Value> = Vec::new();
        if let Some(object) = self.slot_object(slot) {
            if let ObjKind::Map(map) = &object.kind {
                for entry in map.live_entries() {
                    if let Value::Obj(key) = entry.key {
                        if !self.object(key).marked {
                            dead.push(entry.key);
                        }
                    }
                }
            }
        }
        if dead.is_empty() {
            return;
        }
        if let Some(object) = self.slot_object_mut(slot) {
            if let ObjKind::Map(map) = &mut object.kind {
                for entry in map.entry_array.iter_mut() {
                    if dead.iter().any(|d| d.strict_eq(&entry.key)) {
                        entry.key = Value::Tombstone;
                        entry.value = Value::Tombstone;
                        map.live_entry_count -= 1;
                    }
                }
                for index_slot in map.index_array.iter_mut() {
                    let i = *index_slot;
                    if i >= 0 && map.entry_array[i as usize].key.is_tombstone() {
                        *index_slot = crate::objects::TOMBSTONE_SLOT;
                    }
                }
            }
        }
    }
}

impl Vm {
    /// Runs a full collection cycle: mark the roots, trace, sweep, reset
    /// the threshold. A no-op while the collector is pinned off.
    pub fn collect_garbage(&mut self) {
        if self.heap.gc_disallowed() {
            return;
        }

        let bytes_before = self.heap.bytes_allocated();
        let objects_before = self.heap.live_objects();

        self.mark_roots();
        self.heap.trace_references();
        self.heap.sweep();
        self.heap.update_gc_threshold();

        log::debug!(
            "gc: {} -> {} bytes, {} -> {} objects",
            bytes_before,
            self.heap.bytes_allocated(),
            objects_before,
            self.heap.live_objects(),
        );
    }

    fn mark_roots(&mut self) {
        for index in 0..self.stack_len() {
            let value = self.stack_value(index);
            self.heap.mark_value(value);
        }

        for index in 0..self.frame_count() {
            let closure = self.frame_closure(index);
            self.heap.mark_object(closure);
        }

        // The open-upvalue list head; each node traces its successor.
        self.heap.mark_optional(self.open_upvalues_head());

        let roots = self.root_objects();
        for obj_ref in roots {
            self.heap.mark_object(obj_ref);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::value::Value;
    use crate::vm::Vm;

    #[test]
    fn test_collection_frees_unreachable_objects() {
        let mut vm = Vm::new();
        let live_before = vm.heap.live_objects();

        // An unrooted garbage tuple.
        vm.new_tup(vec![Value::I64(1), Value::I64(2)]).unwrap();
        assert_eq!(vm.heap.live_objects(), live_before + 1);

        vm.collect_garbage();
        assert_eq!(vm.heap.live_objects(), live_before);
    }

    #[test]
    fn test_collection_is_idempotent() {
        let mut vm = Vm::new();
        vm.new_tup(vec![Value::Null]).unwrap();

        vm.collect_garbage();
        let after_first = vm.heap.live_objects();
        let bytes_first = vm.heap.bytes_allocated();

        vm.collect_garbage();
        assert_eq!(vm.heap.live_objects(), after_first);
        assert_eq!(vm.heap.bytes_allocated(), bytes_first);
    }

    #[test]
    fn test_rooted_values_survive() {
        let mut vm = Vm::new();
        let tup = vm.new_tup(vec![Value::I64(7)]).unwrap();
        vm.push(Value::Obj(tup)).unwrap();

        vm.collect_garbage();
        let tup_obj = vm.heap.tup(tup);
        assert_eq!(tup_obj.count(), 1);

        vm.pop().unwrap();
        vm.collect_garbage();
    }

    #[test]
    fn test_resource_free_callback_runs_on_collection() {
        use std::any::Any;
        use std::cell::Cell;
        use std::rc::Rc;

        use crate::heap::ObjKind;
        use crate::objects::PyroResource;

        fn free_resource(payload: &mut dyn Any) {
            if let Some(flag) = payload.downcast_mut::<Rc<Cell<bool>>>() {
                flag.set(true);
            }
        }

        let mut vm = Vm::new();
        let freed = Rc::new(Cell::new(false));
        let resource = PyroResource::new(Box::new(Rc::clone(&freed)), Some(free_resource));
        vm.heap
            .alloc(ObjKind::Resource(resource), None)
            .unwrap();

        assert!(!freed.get());
        vm.collect_garbage();
        assert!(freed.get());
    }

    #[test]
    fn test_dead_strings_leave_the_intern_pool() {
        let mut vm = Vm::new();
        let interned_before = vm.heap.interned_count();

        vm.intern("an unrooted transient string").unwrap();
        assert_eq!(vm.heap.interned_count(), interned_before + 1);

        vm.collect_garbage();
        assert_eq!(vm.heap.interned_count(), interned_before);
    }
}
