//! Call, closure and `try` handlers.

use crate::error::{Halt, Panic, VmResult};
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

/// Registers the call and closure handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::Call, call);
    table.register(Op::Return, return_op);
    table.register(Op::MakeClosure, make_closure);
    table.register(Op::CloseUpvalue, close_upvalue);
    table.register(Op::InvokeMethod, invoke_method);
    table.register(Op::InvokeSuperMethod, invoke_super_method);
    table.register(Op::GetMethod, get_method);
    table.register(Op::GetSuperMethod, get_super_method);
    table.register(Op::Try, try_op);
}

fn call(vm: &mut Vm) -> VmResult<()> {
    let arg_count = vm.read_byte()? as usize;
    let callee = vm.peek(arg_count)?;
    vm.call_value(callee, arg_count)
}

/// Pops the frame: the return value replaces the callee's stack window,
/// and every open upvalue at or above the frame base is closed first.
fn return_op(vm: &mut Vm) -> VmResult<()> {
    let result = vm.pop()?;
    let frame = *vm.current_frame()?;

    vm.close_upvalues(frame.fp);
    vm.truncate_stack(frame.fp);
    vm.push(result)?;

    vm.frames.pop();
    Ok(())
}

/// Creates a closure over the function constant, then resolves its
/// captured upvalues from the trailing `(is_local, index)` pairs.
fn make_closure(vm: &mut Vm) -> VmResult<()> {
    let fun_value = vm.read_constant()?;
    let Value::Obj(fun) = fun_value else {
        return Err(Panic::error("Closure constant is not a function.").hard().into());
    };
    let module = vm.current_module()?;

    let closure = vm.new_closure(fun, module)?;
    vm.push(Value::Obj(closure))?;

    let upvalue_count = vm.heap.fun(fun).upvalue_count;
    let frame_fp = vm.current_frame()?.fp;
    let enclosing = vm.current_frame()?.closure;

    for _ in 0..upvalue_count {
        let is_local = vm.read_byte()? != 0;
        let index = vm.read_byte()? as usize;
        let upvalue = if is_local {
            vm.capture_upvalue(frame_fp + index)?
        } else {
            vm.heap.closure(enclosing).upvalues[index]
        };
        vm.heap.closure_mut(closure).upvalues.push(upvalue);
    }

    Ok(())
}

fn close_upvalue(vm: &mut Vm) -> VmResult<()> {
    let top = vm.stack_len() - 1;
    vm.close_upvalues(top);
    vm.pop()?;
    Ok(())
}

fn invoke_method(vm: &mut Vm) -> VmResult<()> {
    let method_name = vm.read_string()?;
    let arg_count = vm.read_byte()? as usize;
    vm.invoke_method(method_name, arg_count)
}

fn invoke_super_method(vm: &mut Vm) -> VmResult<()> {
    let method_name = vm.read_string()?;
    let arg_count = vm.read_byte()? as usize;
    let superclass = pop_class(vm)?;
    vm.invoke_method_from_class(superclass, method_name, arg_count)
}

fn get_method(vm: &mut Vm) -> VmResult<()> {
    let method_name = vm.read_string()?;
    let receiver = vm.peek(0)?;
    match vm.class_of(receiver) {
        Some(class) => bind_method(vm, class, method_name),
        None => Err(Panic::type_error(format!(
            "Invalid method access '{}'.",
            vm.heap.str_obj(method_name).to_string_lossy(),
        ))
        .into()),
    }
}

fn get_super_method(vm: &mut Vm) -> VmResult<()> {
    let method_name = vm.read_string()?;
    let superclass = pop_class(vm)?;
    bind_method(vm, superclass, method_name)
}

/// Pops the receiver and replaces it with a bound-method object.
pub(crate) fn bind_method(vm: &mut Vm, class: ObjRef, method_name: ObjRef) -> VmResult<()> {
    let methods = vm.heap.class(class).methods;
    let method = vm
        .map_get(methods, Value::Obj(method_name))?
        .ok_or_else(|| {
            Halt::from(Panic::name_error(format!(
                "Invalid method name '{}'.",
                vm.heap.str_obj(method_name).to_string_lossy(),
            )))
        })?;
    let Value::Obj(method_ref) = method else {
        return Err(Panic::type_error("Invalid method value.").into());
    };

    let receiver = vm.peek(0)?;
    let bound = vm.new_bound_method(receiver, method_ref)?;
    vm.pop()?;
    vm.push(Value::Obj(bound))
}

fn pop_class(vm: &mut Vm) -> VmResult<ObjRef> {
    match vm.pop()? {
        Value::Obj(obj_ref)
            if matches!(vm.heap.object(obj_ref).kind, crate::heap::ObjKind::Class(_)) =>
        {
            Ok(obj_ref)
        }
        _ => Err(Panic::type_error("Invalid superclass value (not a class).").into()),
    }
}

/// Runs the zero-arg callee in a nested interpreter loop. A catchable
/// panic is converted into an `Err(code, message)` tuple; the stack and
/// frame depths are restored first. `$exit()` and hard panics pass
/// through.
fn try_op(vm: &mut Vm) -> VmResult<()> {
    let stashed_stack = vm.stack_len();
    let stashed_frames = vm.frame_count();

    vm.try_depth += 1;
    let result = (|| -> VmResult<()> {
        let callee = vm.peek(0)?;
        let frames_before = vm.frame_count();
        vm.call_value(callee, 0)?;
        if vm.frame_count() > frames_before {
            vm.run()?;
        }
        Ok(())
    })();
    vm.try_depth -= 1;

    let halt = match result {
        Ok(()) => {
            debug_assert_eq!(vm.stack_len(), stashed_stack);
            debug_assert_eq!(vm.frame_count(), stashed_frames);
            return Ok(());
        }
        Err(halt) => halt,
    };
    if !halt.is_catchable() {
        return Err(halt);
    }
    let Halt::Panic(panic) = halt else {
        return Err(halt);
    };

    // Restore the VM: open upvalues above the stashed depth are closed,
    // then the callee and everything above it is discarded.
    vm.close_upvalues(stashed_stack);
    vm.truncate_stack(stashed_stack - 1);
    vm.frames.truncate(stashed_frames);
    vm.heap.clear_allocation_failed();

    // Building the error tuple must not itself be reported as catchable:
    // an allocation failure here becomes a hard panic.
    let to_hard = |halt: Halt| -> Halt {
        match halt {
            Halt::Panic(panic) => Halt::Panic(panic.hard()),
            other => other,
        }
    };

    let message = vm.intern(&panic.message).map_err(to_hard)?;
    vm.push(Value::Obj(message)).map_err(to_hard)?;
    let err_tup = vm
        .new_err_tup(vec![Value::I64(panic.code.as_i64()), Value::Obj(message)])
        .map_err(to_hard)?;
    vm.pop()?;
    vm.push(Value::Obj(err_tup))?;

    Ok(())
}
