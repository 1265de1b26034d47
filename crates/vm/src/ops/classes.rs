//! Class-declaration handlers.

use crate::error::{Panic, VmResult};
use crate::heap::ObjKind;
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

/// Registers the class-declaration handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::MakeClass, make_class);
    table.register(Op::DefineMethod, define_method);
    table.register(Op::DefineField, define_field);
    table.register(Op::Inherit, inherit);
}

fn make_class(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_string()?;
    let class = vm.new_class()?;
    vm.heap.class_mut(class).name = Some(name);
    vm.push(Value::Obj(class))
}

fn peek_class(vm: &Vm, distance: usize) -> VmResult<ObjRef> {
    match vm.peek(distance)? {
        Value::Obj(obj_ref) if matches!(vm.heap.object(obj_ref).kind, ObjKind::Class(_)) => {
            Ok(obj_ref)
        }
        _ => Err(Panic::error("Expected a class on the stack.").hard().into()),
    }
}

/// The method's closure sits on top of the stack, the class just below it.
fn define_method(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_string()?;
    let method = vm.peek(0)?;
    let class = peek_class(vm, 1)?;

    let methods = vm.heap.class(class).methods;
    vm.map_set(methods, Value::Obj(name), method)?;
    vm.pop()?;
    Ok(())
}

/// The field's initial value sits on top of the stack, the class below it.
/// The field gets the next dense index; its initializer is recorded on the
/// class and copied into each new instance.
fn define_field(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_string()?;
    let init_value = vm.peek(0)?;
    let class = peek_class(vm, 1)?;

    let initializers = vm.heap.class(class).field_initializers;
    let field_indexes = vm.heap.class(class).field_indexes;

    let field_index = vm.heap.vec(initializers).count() as i64;
    let before = vm.heap.payload_size(initializers);
    vm.heap.vec_mut(initializers).append(init_value);
    vm.heap.resize_tracked(initializers, before)?;

    vm.map_set(field_indexes, Value::Obj(name), Value::I64(field_index))?;
    vm.pop()?;
    Ok(())
}

/// Copy-down inheritance: the superclass's methods, field indexes and
/// field initializers are copied into the subclass, so lookup never walks
/// the superclass chain at runtime.
fn inherit(vm: &mut Vm) -> VmResult<()> {
    let superclass = match vm.peek(1)? {
        Value::Obj(obj_ref) if matches!(vm.heap.object(obj_ref).kind, ObjKind::Class(_)) => {
            obj_ref
        }
        _ => return Err(Panic::type_error("Invalid superclass value (not a class).").into()),
    };
    let subclass = peek_class(vm, 0)?;

    if superclass == subclass {
        return Err(Panic::type_error("A class cannot inherit from itself.").into());
    }

    let (super_methods, super_indexes, super_initializers) = {
        let class = vm.heap.class(superclass);
        (class.methods, class.field_indexes, class.field_initializers)
    };
    let (sub_methods, sub_indexes, sub_initializers) = {
        let class = vm.heap.class(subclass);
        (class.methods, class.field_indexes, class.field_initializers)
    };

    vm.map_copy_entries(super_methods, sub_methods)?;
    vm.map_copy_entries(super_indexes, sub_indexes)?;

    let before = vm.heap.payload_size(sub_initializers);
    let values = vm.heap.vec(super_initializers).values().to_vec();
    for value in values {
        vm.heap.vec_mut(sub_initializers).append(value);
    }
    vm.heap.resize_tracked(sub_initializers, before)?;

    vm.heap.class_mut(subclass).superclass = Some(superclass);
    vm.pop()?;
    Ok(())
}
