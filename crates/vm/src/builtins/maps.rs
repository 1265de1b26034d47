//! Methods for the map and set types.

use crate::error::{Panic, VmResult};
use crate::objects::{IterKind, MapKind, PyroIter};
use crate::value::Value;
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    vm.define_global_fn("$map", 0, |vm, _args| {
        Ok(Value::Obj(vm.new_map(MapKind::Map)?))
    })?;
    vm.define_global_fn("$set", -1, fn_set)?;

    let map_class = vm.classes.map;
    vm.define_method(map_class, "count", 0, map_count)?;
    vm.define_method(map_class, "is_empty", 0, map_is_empty)?;
    vm.define_method(map_class, "get", 1, map_get)?;
    vm.define_method(map_class, "set", 2, map_set)?;
    vm.define_method(map_class, "remove", 1, map_remove)?;
    vm.define_method(map_class, "contains", 1, map_contains)?;
    vm.define_method(map_class, "copy", 0, map_copy)?;
    vm.define_method(map_class, "keys", 0, map_keys)?;
    vm.define_method(map_class, "values", 0, map_values)?;
    vm.define_method(map_class, "entries", 0, map_entries)?;
    vm.define_method(map_class, "$iter", 0, map_entries)?;
    vm.define_method(map_class, "$get_index", 1, map_get)?;
    vm.define_method(map_class, "$set_index", 2, map_set)?;

    let set_class = vm.classes.set;
    vm.define_method(set_class, "count", 0, map_count)?;
    vm.define_method(set_class, "is_empty", 0, map_is_empty)?;
    vm.define_method(set_class, "add", 1, set_add)?;
    vm.define_method(set_class, "remove", 1, map_remove)?;
    vm.define_method(set_class, "contains", 1, map_contains)?;
    vm.define_method(set_class, "$iter", 0, map_keys)?;

    Ok(())
}

fn receiver(args: &[Value]) -> VmResult<crate::value::ObjRef> {
    match args[0] {
        Value::Obj(obj_ref) => Ok(obj_ref),
        _ => Err(Panic::type_error("Invalid receiver.").into()),
    }
}

fn fn_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let set = vm.new_map(MapKind::Set)?;
    vm.push(Value::Obj(set))?;
    for value in &args[1..] {
        vm.map_set(set, *value, Value::Null)?;
    }
    vm.pop()?;
    Ok(Value::Obj(set))
}

fn map_count(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    Ok(Value::I64(vm.heap.map(map).count() as i64))
}

fn map_is_empty(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    Ok(Value::Bool(vm.heap.map(map).is_empty()))
}

/// Returns the value for the key, or an `err` if the key is absent.
fn map_get(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    match vm.map_get(map, args[1])? {
        Some(value) => Ok(value),
        None => Ok(Value::Obj(vm.empty_error())),
    }
}

fn map_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    vm.map_set(map, args[1], args[2])?;
    Ok(Value::Null)
}

fn map_remove(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    let removed = vm.map_remove(map, args[1])?;
    Ok(Value::Bool(removed))
}

fn map_contains(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    let contains = vm.map_contains(map, args[1])?;
    Ok(Value::Bool(contains))
}

fn map_copy(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    Ok(Value::Obj(vm.map_copy(map)?))
}

fn map_keys(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(map, IterKind::MapKeys))?;
    Ok(Value::Obj(iter))
}

fn map_values(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(map, IterKind::MapValues))?;
    Ok(Value::Obj(iter))
}

fn map_entries(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let map = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(map, IterKind::MapEntries))?;
    Ok(Value::Obj(iter))
}

fn set_add(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let set = receiver(args)?;
    vm.map_set(set, args[1], Value::Null)?;
    Ok(Value::Null)
}
