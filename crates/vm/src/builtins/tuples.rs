//! Methods for the tuple type and its `Err` flavor.

use crate::error::{Panic, VmResult};
use crate::objects::{IterKind, PyroIter};
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    vm.define_global_fn("$tup", -1, fn_tup)?;
    vm.define_global_fn("$err", -1, fn_err)?;

    let tup_class = vm.classes.tup;
    vm.define_method(tup_class, "count", 0, tup_count)?;
    vm.define_method(tup_class, "get", 1, tup_get)?;
    vm.define_method(tup_class, "$get_index", 1, tup_get)?;
    vm.define_method(tup_class, "$iter", 0, tup_iter)?;

    let err_class = vm.classes.err;
    vm.define_method(err_class, "count", 0, tup_count)?;
    vm.define_method(err_class, "get", 1, tup_get)?;
    vm.define_method(err_class, "$get_index", 1, tup_get)?;
    vm.define_method(err_class, "$iter", 0, tup_iter)?;
    vm.define_method(err_class, "code", 0, err_code)?;
    vm.define_method(err_class, "message", 0, err_message)?;

    Ok(())
}

fn receiver(args: &[Value]) -> VmResult<ObjRef> {
    match args[0] {
        Value::Obj(obj_ref) => Ok(obj_ref),
        _ => Err(Panic::type_error("Invalid receiver.").into()),
    }
}

fn fn_tup(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let tup = vm.new_tup(args[1..].to_vec())?;
    Ok(Value::Obj(tup))
}

fn fn_err(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let err = vm.new_err_tup(args[1..].to_vec())?;
    Ok(Value::Obj(err))
}

fn tup_count(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let tup = receiver(args)?;
    Ok(Value::I64(vm.heap.tup(tup).count() as i64))
}

fn tup_get(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let tup = receiver(args)?;
    let index = vm.index_in_range(args[1], vm.heap.tup(tup).count())?;
    Ok(vm.heap.tup(tup).values[index])
}

fn tup_iter(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let tup = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(tup, IterKind::Tup))?;
    Ok(Value::Obj(iter))
}

/// The error code of an `Err` tuple: its first element, by convention.
fn err_code(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let tup = receiver(args)?;
    Ok(vm.heap.tup(tup).values.first().copied().unwrap_or(Value::Null))
}

/// The error message of an `Err` tuple: its second element.
fn err_message(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let tup = receiver(args)?;
    Ok(vm.heap.tup(tup).values.get(1).copied().unwrap_or(Value::Null))
}
