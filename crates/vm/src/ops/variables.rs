//! Variable, field and member access handlers.

use crate::error::{Panic, VmResult};
use crate::heap::ObjKind;
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::value::Value;
use crate::vm::Vm;

/// Registers the variable-access handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::DefineGlobal, define_global);
    table.register(Op::DefineGlobals, define_globals);
    table.register(Op::GetGlobal, get_global);
    table.register(Op::SetGlobal, set_global);
    table.register(Op::GetLocal, get_local);
    table.register(Op::SetLocal, set_local);
    table.register(Op::GetUpvalue, get_upvalue);
    table.register(Op::SetUpvalue, set_upvalue);
    table.register(Op::GetField, get_field);
    table.register(Op::SetField, set_field);
    table.register(Op::GetMember, get_member);
}

fn define_global(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_constant()?;
    let value = vm.peek(0)?;
    let module = vm.current_module()?;
    let globals = vm.heap.module(module).globals;
    vm.map_set(globals, name, value)?;
    vm.pop()?;
    Ok(())
}

fn define_globals(vm: &mut Vm) -> VmResult<()> {
    let count = vm.read_byte()? as usize;
    let module = vm.current_module()?;
    let globals = vm.heap.module(module).globals;

    for index in 0..count {
        let name = vm.read_constant()?;
        let value = vm.peek(count - 1 - index)?;
        vm.map_set(globals, name, value)?;
    }

    let new_len = vm.stack_len() - count;
    vm.truncate_stack(new_len);
    Ok(())
}

/// Module globals first, then the VM-level globals.
fn get_global(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_constant()?;
    let module = vm.current_module()?;
    let globals = vm.heap.module(module).globals;

    if let Some(value) = vm.map_get(globals, name)? {
        return vm.push(value);
    }
    if let Some(value) = vm.map_get(vm.globals, name)? {
        return vm.push(value);
    }

    Err(Panic::name_error(format!(
        "Undefined variable '{}'.",
        name_text(vm, name),
    ))
    .into())
}

fn set_global(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_constant()?;
    let value = vm.peek(0)?;
    let module = vm.current_module()?;
    let globals = vm.heap.module(module).globals;

    if vm.map_update_entry(globals, name, value)? {
        return Ok(());
    }
    if vm.map_update_entry(vm.globals, name, value)? {
        return Ok(());
    }

    Err(Panic::name_error(format!(
        "Undefined variable '{}'.",
        name_text(vm, name),
    ))
    .into())
}

fn get_local(vm: &mut Vm) -> VmResult<()> {
    let index = vm.read_byte()? as usize;
    let fp = vm.current_frame()?.fp;
    let value = vm.stack_value(fp + index);
    vm.push(value)
}

fn set_local(vm: &mut Vm) -> VmResult<()> {
    let index = vm.read_byte()? as usize;
    let fp = vm.current_frame()?.fp;
    let value = vm.peek(0)?;
    vm.set_stack_value(fp + index, value);
    Ok(())
}

fn get_upvalue(vm: &mut Vm) -> VmResult<()> {
    let index = vm.read_byte()? as usize;
    let closure = vm.current_frame()?.closure;
    let upvalue = vm.heap.closure(closure).upvalues[index];
    let value = vm.upvalue_value(upvalue);
    vm.push(value)
}

fn set_upvalue(vm: &mut Vm) -> VmResult<()> {
    let index = vm.read_byte()? as usize;
    let closure = vm.current_frame()?.closure;
    let upvalue = vm.heap.closure(closure).upvalues[index];
    let value = vm.peek(0)?;
    vm.set_upvalue_value(upvalue, value);
    Ok(())
}

/// Field access. A receiver without such a field falls back to binding
/// the method of the same name, so `map.keys()` works alongside
/// `map:keys()`.
fn get_field(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_string()?;
    let receiver = vm.peek(0)?;

    if let Value::Obj(obj_ref) = receiver {
        if matches!(vm.heap.object(obj_ref).kind, ObjKind::Instance(_)) {
            let class = vm
                .heap
                .object(obj_ref)
                .class
                .ok_or_else(|| Panic::error("Instance has no class.").hard())?;
            let field_indexes = vm.heap.class(class).field_indexes;
            if let Some(Value::I64(index)) = vm.map_get(field_indexes, Value::Obj(name))? {
                let value = vm.heap.instance(obj_ref).fields[index as usize];
                vm.pop()?;
                return vm.push(value);
            }
        }
    }

    if let Some(class) = vm.class_of(receiver) {
        let methods = vm.heap.class(class).methods;
        if vm.map_get(methods, Value::Obj(name))?.is_some() {
            return super::calls::bind_method(vm, class, name);
        }
    }

    let name_text = vm.heap.str_obj(name).to_string_lossy();
    if matches!(receiver, Value::Obj(obj_ref) if matches!(vm.heap.object(obj_ref).kind, ObjKind::Instance(_)))
    {
        Err(Panic::name_error(format!("Invalid field name '{name_text}'.")).into())
    } else {
        Err(Panic::type_error(format!("Invalid field access '{name_text}'.")).into())
    }
}

fn set_field(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_string()?;
    let receiver = vm.peek(1)?;

    let Value::Obj(obj_ref) = receiver else {
        return Err(Panic::type_error(
            "Invalid field access '.', receiver does not have fields.",
        )
        .into());
    };
    if !matches!(vm.heap.object(obj_ref).kind, ObjKind::Instance(_)) {
        return Err(Panic::type_error(
            "Invalid field access '.', receiver does not have fields.",
        )
        .into());
    }

    let class = vm
        .heap
        .object(obj_ref)
        .class
        .ok_or_else(|| Panic::error("Instance has no class.").hard())?;
    let field_indexes = vm.heap.class(class).field_indexes;

    match vm.map_get(field_indexes, Value::Obj(name))? {
        Some(Value::I64(index)) => {
            let new_value = vm.pop()?;
            vm.pop()?;
            vm.heap.instance_mut(obj_ref).fields[index as usize] = new_value;
            vm.push(new_value)
        }
        _ => Err(Panic::name_error(format!(
            "Invalid field name '{}'.",
            vm.heap.str_obj(name).to_string_lossy(),
        ))
        .into()),
    }
}

/// Member access on a module: `module::name`.
fn get_member(vm: &mut Vm) -> VmResult<()> {
    let name = vm.read_constant()?;
    let receiver = vm.peek(0)?;

    let Value::Obj(obj_ref) = receiver else {
        return Err(Panic::type_error(format!(
            "Invalid member access '{}', receiver is not a module.",
            name_text(vm, name),
        ))
        .into());
    };
    if !matches!(vm.heap.object(obj_ref).kind, ObjKind::Module(_)) {
        return Err(Panic::type_error(format!(
            "Invalid member access '{}', receiver is not a module.",
            name_text(vm, name),
        ))
        .into());
    }

    let globals = vm.heap.module(obj_ref).globals;
    match vm.map_get(globals, name)? {
        Some(value) => {
            vm.pop()?;
            vm.push(value)
        }
        None => Err(Panic::name_error(format!(
            "Invalid member name '{}'.",
            name_text(vm, name),
        ))
        .into()),
    }
}

fn name_text(vm: &Vm, name: Value) -> String {
    match name {
        Value::Obj(obj_ref) => match &vm.heap.object(obj_ref).kind {
            ObjKind::Str(string) => string.to_string_lossy(),
            _ => "<name>".to_string(),
        },
        _ => "<name>".to_string(),
    }
}
