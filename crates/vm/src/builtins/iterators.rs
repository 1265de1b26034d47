//! Methods for the iterator type: the lazy adapters and the eager
//! drains.

use crate::error::{Panic, VmResult};
use crate::objects::{IterKind, MapKind, PyroIter, PyroVec};
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    let iter_class = vm.classes.iter;
    vm.define_method(iter_class, "$iter", 0, iter_self)?;
    vm.define_method(iter_class, "$next", 0, iter_next)?;
    vm.define_method(iter_class, "next", 0, iter_next)?;
    vm.define_method(iter_class, "map", 1, iter_map)?;
    vm.define_method(iter_class, "filter", 1, iter_filter)?;
    vm.define_method(iter_class, "enumerate", -1, iter_enumerate)?;
    vm.define_method(iter_class, "skip_first", 1, iter_skip_first)?;
    vm.define_method(iter_class, "skip_last", 1, iter_skip_last)?;
    vm.define_method(iter_class, "to_vec", 0, iter_to_vec)?;
    vm.define_method(iter_class, "to_set", 0, iter_to_set)?;
    vm.define_method(iter_class, "join", 1, iter_join)?;
    vm.define_method(iter_class, "count", 0, iter_count)?;
    Ok(())
}

fn receiver(args: &[Value]) -> VmResult<ObjRef> {
    match args[0] {
        Value::Obj(obj_ref) => Ok(obj_ref),
        _ => Err(Panic::type_error("Invalid receiver.").into()),
    }
}

fn callback_arg(vm: &Vm, value: Value) -> VmResult<ObjRef> {
    match value {
        Value::Obj(obj_ref) => match &vm.heap.object(obj_ref).kind {
            crate::heap::ObjKind::Closure(_)
            | crate::heap::ObjKind::NativeFn(_)
            | crate::heap::ObjKind::BoundMethod(_)
            | crate::heap::ObjKind::Class(_) => Ok(obj_ref),
            _ => Err(Panic::type_error("Expected a callable argument.").into()),
        },
        _ => Err(Panic::type_error("Expected a callable argument.").into()),
    }
}

fn iter_self(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    Ok(args[0])
}

fn iter_next(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let iter = receiver(args)?;
    vm.iter_next(iter)
}

/// Wraps the iterator: each value has the callback applied. One source
/// pull plus one callback call per `next`.
fn iter_map(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let source = receiver(args)?;
    let callback = callback_arg(vm, args[1])?;
    let mut wrapped = PyroIter::new(source, IterKind::FuncMap);
    wrapped.callback = Some(callback);
    Ok(Value::Obj(vm.new_iter(wrapped)?))
}

/// Wraps the iterator: only values the callback accepts are yielded.
fn iter_filter(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let source = receiver(args)?;
    let callback = callback_arg(vm, args[1])?;
    let mut wrapped = PyroIter::new(source, IterKind::FuncFilter);
    wrapped.callback = Some(callback);
    Ok(Value::Obj(vm.new_iter(wrapped)?))
}

/// `enumerate()` or `enumerate(start)`: pairs each value with a counter.
fn iter_enumerate(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let source = receiver(args)?;
    let start = match args.len() - 1 {
        0 => 0,
        1 => match args[1] {
            Value::I64(n) => n,
            _ => {
                return Err(
                    Panic::type_error("enumerate() requires an integer start value.").into(),
                )
            }
        },
        n => {
            return Err(Panic::args_error(format!(
                "Expected 0 or 1 arguments for enumerate(), found {n}.",
            ))
            .into())
        }
    };
    let mut wrapped = PyroIter::new(source, IterKind::Enumerate);
    wrapped.next_enum = start;
    Ok(Value::Obj(vm.new_iter(wrapped)?))
}

fn skip_count_arg(value: Value) -> VmResult<usize> {
    match value {
        Value::I64(n) if n >= 0 => Ok(n as usize),
        _ => Err(Panic::value_error("Skip count must be a non-negative integer.").into()),
    }
}

fn iter_skip_first(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let source = receiver(args)?;
    let mut wrapped = PyroIter::new(source, IterKind::SkipFirst);
    wrapped.skip_count = skip_count_arg(args[1])?;
    Ok(Value::Obj(vm.new_iter(wrapped)?))
}

fn iter_skip_last(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let source = receiver(args)?;
    let mut wrapped = PyroIter::new(source, IterKind::SkipLast);
    wrapped.skip_count = skip_count_arg(args[1])?;
    Ok(Value::Obj(vm.new_iter(wrapped)?))
}

/// Drives the iterator to exhaustion, collecting into a vector.
fn iter_to_vec(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let iter = receiver(args)?;
    let out = vm.new_vec(PyroVec::with_capacity(8))?;
    vm.push(Value::Obj(out))?;

    loop {
        let next_value = vm.iter_next(iter)?;
        if vm.is_err_value(next_value) {
            break;
        }
        let before = vm.heap.payload_size(out);
        vm.heap.vec_mut(out).append(next_value);
        vm.heap.resize_tracked(out, before)?;
    }

    vm.pop()?;
    Ok(Value::Obj(out))
}

/// Drives the iterator to exhaustion, collecting into a set.
fn iter_to_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let iter = receiver(args)?;
    let out = vm.new_map(MapKind::Set)?;
    vm.push(Value::Obj(out))?;

    loop {
        let next_value = vm.iter_next(iter)?;
        if vm.is_err_value(next_value) {
            break;
        }
        vm.push(next_value)?;
        vm.map_set(out, next_value, Value::Null)?;
        vm.pop()?;
    }

    vm.pop()?;
    Ok(Value::Obj(out))
}

fn iter_join(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let iter = receiver(args)?;
    let separator = match args[1] {
        Value::Obj(obj_ref)
            if matches!(vm.heap.object(obj_ref).kind, crate::heap::ObjKind::Str(_)) =>
        {
            vm.heap.str_obj(obj_ref).as_bytes().to_vec()
        }
        _ => return Err(Panic::type_error("join() requires a string separator.").into()),
    };
    let joined = vm.iter_join(iter, &separator)?;
    Ok(Value::Obj(joined))
}

/// Drives the iterator to exhaustion, counting the values.
fn iter_count(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let iter = receiver(args)?;
    let mut count = 0i64;
    loop {
        let next_value = vm.iter_next(iter)?;
        if vm.is_err_value(next_value) {
            break;
        }
        count += 1;
    }
    Ok(Value::I64(count))
}
