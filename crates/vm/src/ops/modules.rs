//! Import handlers.
//!
//! `ImportModule` walks the dotted path one component at a time; each
//! component that has not been loaded yet gets an empty module object
//! registered in its parent's submodule map *before* its code executes,
//! which is what lets cyclic imports resolve.

use crate::error::{Halt, Panic, VmResult};
use crate::heap::ObjKind;
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

/// Registers the import handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::ImportModule, import_module);
    table.register(Op::ImportMembers, import_members);
}

fn expect_module(vm: &Vm, value: Value) -> VmResult<ObjRef> {
    match value {
        Value::Obj(obj_ref) if matches!(vm.heap.object(obj_ref).kind, ObjKind::Module(_)) => {
            Ok(obj_ref)
        }
        _ => Err(Panic::error("Expected a module value.").hard().into()),
    }
}

/// Imports the ancestor chain for the path components on the stack.
/// Returns the first and last modules of the chain.
fn walk_import_path(vm: &mut Vm, base: usize, component_count: usize) -> VmResult<(Value, Value)> {
    let mut supermod_map = vm.modules;
    let mut parent_module: Option<ObjRef> = None;
    let mut first_value = Value::Null;
    let mut module_value = Value::Null;

    for index in 0..component_count {
        let name = vm.stack_value(base + index);

        if let Some(existing) = vm.map_get(supermod_map, name)? {
            module_value = existing;
            if index == 0 {
                first_value = existing;
            }
            let module = expect_module(vm, existing)?;
            supermod_map = vm.heap.module(module).submodules;
            parent_module = Some(module);
            continue;
        }

        let module = vm.new_module()?;
        module_value = Value::Obj(module);
        if index == 0 {
            first_value = module_value;
        }

        // Register before executing so a cyclic import of this path finds
        // the partially-populated module. Submodules are also entered in
        // their parent's globals so member chains like `a::b::x` resolve.
        vm.push(module_value)?;
        vm.map_set(supermod_map, name, module_value)?;
        if let Some(parent) = parent_module {
            let parent_globals = vm.heap.module(parent).globals;
            vm.map_set(parent_globals, name, module_value)?;
        }
        vm.pop()?;

        let names: Vec<Value> = (0..=index).map(|i| vm.stack_value(base + i)).collect();
        if let Err(halt) = vm.import_module(&names, module) {
            vm.map_remove(supermod_map, name)?;
            return Err(halt);
        }

        supermod_map = vm.heap.module(module).submodules;
        parent_module = Some(module);
    }

    Ok((first_value, module_value))
}

fn import_module(vm: &mut Vm) -> VmResult<()> {
    let component_count = vm.read_byte()? as usize;
    let base = vm.stack_len() - component_count;

    let first_name = vm.stack_value(base);
    let (first_value, module_value) = walk_import_path(vm, base, component_count)?;

    // A dotted import also binds its top-level module, so both `b::x` and
    // `a::b::x` work after `import a::b`.
    if component_count > 1 {
        let importing_module = vm.current_module()?;
        let globals = vm.heap.module(importing_module).globals;
        vm.map_set(globals, first_name, first_value)?;
    }

    vm.truncate_stack(base);
    vm.push(module_value)
}

/// Like `import_module`, but additionally plucks the named members from
/// the loaded module onto the stack.
fn import_members(vm: &mut Vm) -> VmResult<()> {
    let module_count = vm.read_byte()? as usize;
    let member_count = vm.read_byte()? as usize;
    let base = vm.stack_len() - module_count - member_count;

    let (_, module_value) = walk_import_path(vm, base, module_count)?;
    let module = expect_module(vm, module_value)?;
    let module_globals = vm.heap.module(module).globals;

    for index in 0..member_count {
        let name = vm.stack_value(base + module_count + index);
        let member = vm.map_get(module_globals, name)?.ok_or_else(|| {
            let name_text = match name {
                Value::Obj(obj_ref) => match &vm.heap.object(obj_ref).kind {
                    ObjKind::Str(string) => string.to_string_lossy(),
                    _ => "<name>".to_string(),
                },
                _ => "<name>".to_string(),
            };
            Halt::from(Panic::name_error(format!(
                "Member '{name_text}' not found in module.",
            )))
        })?;
        vm.set_stack_value(base + index, member);
    }

    let new_len = base + member_count;
    vm.truncate_stack(new_len);
    Ok(())
}
