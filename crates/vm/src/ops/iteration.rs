//! Iteration handlers.

use crate::error::{Panic, VmResult};
use crate::heap::ObjKind;
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::vm::Vm;

/// Registers the iteration handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::GetIteratorObject, get_iterator_object);
    table.register(Op::GetIteratorNextValue, get_iterator_next_value);
}

/// Calls `$iter` on the value on top of the stack, replacing it with the
/// iterator it returns.
fn get_iterator_object(vm: &mut Vm) -> VmResult<()> {
    let value = vm.peek(0)?;
    if vm.has_method(value, vm.canned.iter)? {
        vm.invoke_method(vm.canned.iter, 0)
    } else {
        Err(Panic::type_error("Object is not iterable.").into())
    }
}

/// Pushes the next value from the iterator on top of the stack, leaving
/// the iterator in place. Built-in iterators are fast-pathed; anything
/// else has its `$next` method invoked.
fn get_iterator_next_value(vm: &mut Vm) -> VmResult<()> {
    let top = vm.peek(0)?;
    match top.as_obj() {
        Some(obj_ref) if matches!(vm.heap.object(obj_ref).kind, ObjKind::Iter(_)) => {
            let next_value = vm.iter_next(obj_ref)?;
            vm.push(next_value)
        }
        _ => {
            vm.push(top)?;
            vm.invoke_method(vm.canned.next, 0)
        }
    }
}
