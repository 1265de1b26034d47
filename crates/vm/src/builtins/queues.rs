//! Methods for the queue type.

use crate::error::{Panic, VmResult};
use crate::objects::{IterKind, PyroIter};
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    vm.define_global_fn("$queue", 0, |vm, _args| Ok(Value::Obj(vm.new_queue()?)))?;

    let queue_class = vm.classes.queue;
    vm.define_method(queue_class, "count", 0, queue_count)?;
    vm.define_method(queue_class, "is_empty", 0, queue_is_empty)?;
    vm.define_method(queue_class, "enqueue", 1, queue_enqueue)?;
    vm.define_method(queue_class, "dequeue", 0, queue_dequeue)?;
    vm.define_method(queue_class, "$iter", 0, queue_iter)?;
    Ok(())
}

fn receiver(args: &[Value]) -> VmResult<ObjRef> {
    match args[0] {
        Value::Obj(obj_ref) => Ok(obj_ref),
        _ => Err(Panic::type_error("Invalid receiver.").into()),
    }
}

fn queue_count(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let queue = receiver(args)?;
    Ok(Value::I64(vm.heap.queue(queue).count() as i64))
}

fn queue_is_empty(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let queue = receiver(args)?;
    Ok(Value::Bool(vm.heap.queue(queue).is_empty()))
}

fn queue_enqueue(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let queue = receiver(args)?;
    let before = vm.heap.payload_size(queue);
    vm.heap.queue_mut(queue).enqueue(args[1]);
    vm.heap.resize_tracked(queue, before)?;
    Ok(Value::Null)
}

/// Removes and returns the front value, or an `err` if the queue is
/// empty.
fn queue_dequeue(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let queue = receiver(args)?;
    match vm.heap.queue_mut(queue).dequeue() {
        Some(value) => Ok(value),
        None => Ok(Value::Obj(vm.empty_error())),
    }
}

fn queue_iter(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let queue = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(queue, IterKind::Queue))?;
    Ok(Value::Obj(iter))
}
