//! Methods for the vector type and its stack view.

use crate::error::{Panic, VmResult};
use crate::objects::{IterKind, PyroIter, PyroVec, VecKind};
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    vm.define_global_fn("$vec", -1, fn_vec)?;
    vm.define_global_fn("$stack", 0, |vm, _args| {
        Ok(Value::Obj(vm.new_vec(PyroVec::new(VecKind::Stack))?))
    })?;

    let vec_class = vm.classes.vec;
    vm.define_method(vec_class, "count", 0, vec_count)?;
    vm.define_method(vec_class, "is_empty", 0, vec_is_empty)?;
    vm.define_method(vec_class, "append", 1, vec_append)?;
    vm.define_method(vec_class, "get", 1, vec_get)?;
    vm.define_method(vec_class, "set", 2, vec_set)?;
    vm.define_method(vec_class, "$get_index", 1, vec_get)?;
    vm.define_method(vec_class, "$set_index", 2, vec_set)?;
    vm.define_method(vec_class, "first", 0, vec_first)?;
    vm.define_method(vec_class, "last", 0, vec_last)?;
    vm.define_method(vec_class, "reverse", 0, vec_reverse)?;
    vm.define_method(vec_class, "contains", 1, vec_contains)?;
    vm.define_method(vec_class, "index_of", 1, vec_index_of)?;
    vm.define_method(vec_class, "map", 1, vec_map)?;
    vm.define_method(vec_class, "filter", 1, vec_filter)?;
    vm.define_method(vec_class, "copy", 0, vec_copy)?;
    vm.define_method(vec_class, "remove_last", 0, vec_remove_last)?;
    vm.define_method(vec_class, "remove_first", 0, vec_remove_first)?;
    vm.define_method(vec_class, "remove_at", 1, vec_remove_at)?;
    vm.define_method(vec_class, "insert_at", 2, vec_insert_at)?;
    vm.define_method(vec_class, "slice", -1, vec_slice)?;
    vm.define_method(vec_class, "join", 1, vec_join)?;
    vm.define_method(vec_class, "$iter", 0, vec_iter)?;

    let stack_class = vm.classes.stack;
    vm.define_method(stack_class, "count", 0, vec_count)?;
    vm.define_method(stack_class, "is_empty", 0, vec_is_empty)?;
    vm.define_method(stack_class, "push", 1, vec_append)?;
    vm.define_method(stack_class, "pop", 0, stack_pop)?;
    vm.define_method(stack_class, "$iter", 0, vec_iter)?;

    Ok(())
}

fn receiver(args: &[Value]) -> VmResult<ObjRef> {
    match args[0] {
        Value::Obj(obj_ref) => Ok(obj_ref),
        _ => Err(Panic::type_error("Invalid receiver.").into()),
    }
}

fn fn_vec(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mut vec = PyroVec::with_capacity(args.len() - 1);
    for value in &args[1..] {
        vec.append(*value);
    }
    Ok(Value::Obj(vm.new_vec(vec)?))
}

fn vec_count(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    Ok(Value::I64(vm.heap.vec(vec).count() as i64))
}

fn vec_is_empty(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    Ok(Value::Bool(vm.heap.vec(vec).is_empty()))
}

fn vec_append(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let before = vm.heap.payload_size(vec);
    vm.heap.vec_mut(vec).append(args[1]);
    vm.heap.resize_tracked(vec, before)?;
    Ok(Value::Null)
}

fn vec_get(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let index = vm.index_in_range(args[1], vm.heap.vec(vec).count())?;
    Ok(vm.heap.vec(vec).values()[index])
}

fn vec_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let index = vm.index_in_range(args[1], vm.heap.vec(vec).count())?;
    vm.heap.vec_mut(vec).values_mut()[index] = args[2];
    Ok(args[2])
}

fn vec_first(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    match vm.heap.vec(vec).values().first() {
        Some(value) => Ok(*value),
        None => Err(Panic::value_error("Vector is empty.").into()),
    }
}

fn vec_last(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    match vm.heap.vec(vec).values().last() {
        Some(value) => Ok(*value),
        None => Err(Panic::value_error("Vector is empty.").into()),
    }
}

fn vec_reverse(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    vm.heap.vec_mut(vec).reverse();
    Ok(args[0])
}

fn vec_contains(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let count = vm.heap.vec(vec).count();
    for index in 0..count {
        let element = vm.heap.vec(vec).values()[index];
        if vm.op_compare_eq(args[1], element)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

/// Returns the index of the first equal element, or an `err`.
fn vec_index_of(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let count = vm.heap.vec(vec).count();
    for index in 0..count {
        let element = vm.heap.vec(vec).values()[index];
        if vm.op_compare_eq(args[1], element)? {
            return Ok(Value::I64(index as i64));
        }
    }
    Ok(Value::Obj(vm.empty_error()))
}

/// Eager map: returns a new vector of callback results.
fn vec_map(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let callback = args[1];

    let out = vm.new_vec(PyroVec::with_capacity(vm.heap.vec(vec).count()))?;
    vm.push(Value::Obj(out))?;

    let mut index = 0;
    while index < vm.heap.vec(vec).count() {
        let element = vm.heap.vec(vec).values()[index];
        vm.push(callback)?;
        vm.push(element)?;
        let mapped = vm.call_function_value(1)?;
        let before = vm.heap.payload_size(out);
        vm.heap.vec_mut(out).append(mapped);
        vm.heap.resize_tracked(out, before)?;
        index += 1;
    }

    vm.pop()?;
    Ok(Value::Obj(out))
}

/// Eager filter: returns a new vector of accepted elements.
fn vec_filter(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let callback = args[1];

    let out = vm.new_vec(PyroVec::new(VecKind::Vec))?;
    vm.push(Value::Obj(out))?;

    let mut index = 0;
    while index < vm.heap.vec(vec).count() {
        let element = vm.heap.vec(vec).values()[index];
        vm.push(callback)?;
        vm.push(element)?;
        let keep = vm.call_function_value(1)?;
        if vm.is_truthy(keep) {
            let before = vm.heap.payload_size(out);
            vm.heap.vec_mut(out).append(element);
            vm.heap.resize_tracked(out, before)?;
        }
        index += 1;
    }

    vm.pop()?;
    Ok(Value::Obj(out))
}

fn vec_copy(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let copy = vm.heap.vec(vec).copy();
    Ok(Value::Obj(vm.new_vec(copy)?))
}

fn vec_remove_last(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    match vm.heap.vec_mut(vec).remove_last() {
        Some(value) => Ok(value),
        None => Err(Panic::value_error("Cannot remove a value from an empty vector.").into()),
    }
}

fn vec_remove_first(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    match vm.heap.vec_mut(vec).remove_first() {
        Some(value) => Ok(value),
        None => Err(Panic::value_error("Cannot remove a value from an empty vector.").into()),
    }
}

fn vec_remove_at(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let index = vm.index_in_range(args[1], vm.heap.vec(vec).count())?;
    match vm.heap.vec_mut(vec).remove_at(index) {
        Some(value) => Ok(value),
        None => Err(Panic::value_error("Index out of range.").into()),
    }
}

fn vec_insert_at(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let count = vm.heap.vec(vec).count();
    let index = match args[1] {
        Value::I64(index) if index >= 0 && index as usize <= count => index as usize,
        Value::I64(_) => return Err(Panic::value_error("Index out of range.").into()),
        _ => return Err(Panic::type_error("Index must be an integer.").into()),
    };
    let before = vm.heap.payload_size(vec);
    vm.heap.vec_mut(vec).insert_at(index, args[2]);
    vm.heap.resize_tracked(vec, before)?;
    Ok(Value::Null)
}

/// `slice(start)` or `slice(start, length)`.
fn vec_slice(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let count = vm.heap.vec(vec).count();

    let (start, length) = match args.len() - 1 {
        1 => match args[1] {
            Value::I64(start) if start >= 0 && start as usize <= count => {
                (start as usize, count - start as usize)
            }
            _ => return Err(Panic::value_error("Slice start is out of range.").into()),
        },
        2 => match (args[1], args[2]) {
            (Value::I64(start), Value::I64(length))
                if start >= 0
                    && length >= 0
                    && (start as usize) <= count
                    && start as usize + length as usize <= count =>
            {
                (start as usize, length as usize)
            }
            _ => return Err(Panic::value_error("Slice is out of range.").into()),
        },
        n => {
            return Err(Panic::args_error(format!(
                "Expected 1 or 2 arguments for slice(), found {n}.",
            ))
            .into())
        }
    };

    let values = vm.heap.vec(vec).values()[start..start + length].to_vec();
    let mut out = PyroVec::with_capacity(values.len());
    for value in values {
        out.append(value);
    }
    Ok(Value::Obj(vm.new_vec(out)?))
}

fn vec_join(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let separator = match args[1] {
        Value::Obj(obj_ref)
            if matches!(vm.heap.object(obj_ref).kind, crate::heap::ObjKind::Str(_)) =>
        {
            vm.heap.str_obj(obj_ref).as_bytes().to_vec()
        }
        _ => return Err(Panic::type_error("join() requires a string separator.").into()),
    };

    let iter = vm.new_iter(PyroIter::new(vec, IterKind::Vec))?;
    vm.push(Value::Obj(iter))?;
    let joined = vm.iter_join(iter, &separator)?;
    vm.pop()?;
    Ok(Value::Obj(joined))
}

fn vec_iter(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(vec, IterKind::Vec))?;
    Ok(Value::Obj(iter))
}

fn stack_pop(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let vec = receiver(args)?;
    match vm.heap.vec_mut(vec).remove_last() {
        Some(value) => Ok(value),
        None => Err(Panic::value_error("Cannot pop an empty stack.").into()),
    }
}
