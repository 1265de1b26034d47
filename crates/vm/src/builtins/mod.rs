//! The core library: `$`-prefixed global functions and the method tables
//! of the builtin singleton classes.
//!
//! Native functions receive their receiver (or callee) as `args[0]` and
//! the call arguments as `args[1..]`.

mod buffers;
mod core;
mod files;
mod iterators;
mod maps;
mod queues;
mod strings;
mod tuples;
mod vectors;

use crate::error::{Panic, VmResult};
use crate::heap::ObjKind;
use crate::objects::{IterKind, PyroIter};
use crate::value::Value;
use crate::vm::Vm;

/// Returns an iterator over `value`: the value itself if it is already an
/// iterator, the result of its `$iter` method, or a generic wrapper for
/// an object that only implements `$next`.
pub(crate) fn core_iter_of(vm: &mut Vm, value: Value) -> VmResult<Value> {
    if let Value::Obj(obj_ref) = value {
        if matches!(vm.heap.object(obj_ref).kind, ObjKind::Iter(_)) {
            return Ok(value);
        }
    }
    if let Some(method) = vm.get_method(value, vm.canned.iter)? {
        vm.push(value)?;
        return vm.call_method_value(method, 0);
    }
    if vm.has_method(value, vm.canned.next)? {
        let Value::Obj(source) = value else {
            return Err(Panic::type_error("Object is not iterable.").into());
        };
        let iter = vm.new_iter(PyroIter::new(source, IterKind::Generic))?;
        return Ok(Value::Obj(iter));
    }
    Err(Panic::type_error("Object is not iterable.").into())
}

/// Installs the core library into a fresh VM.
pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    core::install(vm)?;
    maps::install(vm)?;
    vectors::install(vm)?;
    tuples::install(vm)?;
    strings::install(vm)?;
    buffers::install(vm)?;
    queues::install(vm)?;
    iterators::install(vm)?;
    files::install(vm)?;
    Ok(())
}
