//! Control-flow, stack-shuffling and output handlers.

use crate::error::{Panic, VmResult};
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::vm::Vm;

/// Registers the control-flow handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::Jump, jump);
    table.register(Op::JumpBack, jump_back);
    table.register(Op::JumpIfFalse, jump_if_false);
    table.register(Op::JumpIfTrue, jump_if_true);
    table.register(Op::JumpIfErr, jump_if_err);
    table.register(Op::JumpIfNotErr, jump_if_not_err);
    table.register(Op::JumpIfNotNull, jump_if_not_null);
    table.register(Op::PopJumpIfFalse, pop_jump_if_false);

    table.register(Op::Pop, pop);
    table.register(Op::PopEchoInRepl, pop_echo_in_repl);
    table.register(Op::Dup, dup);
    table.register(Op::Dup2, dup2);

    table.register(Op::Echo, echo);
    table.register(Op::Assert, assert_op);
}

fn offset_forward(vm: &mut Vm) -> VmResult<u16> {
    vm.read_u16()
}

fn jump(vm: &mut Vm) -> VmResult<()> {
    let offset = offset_forward(vm)?;
    vm.current_frame_mut()?.ip += offset as usize;
    Ok(())
}

fn jump_back(vm: &mut Vm) -> VmResult<()> {
    let offset = offset_forward(vm)?;
    vm.current_frame_mut()?.ip -= offset as usize;
    Ok(())
}

fn jump_if_false(vm: &mut Vm) -> VmResult<()> {
    let offset = offset_forward(vm)?;
    let top = vm.peek(0)?;
    if !vm.is_truthy(top) {
        vm.current_frame_mut()?.ip += offset as usize;
    }
    Ok(())
}

fn jump_if_true(vm: &mut Vm) -> VmResult<()> {
    let offset = offset_forward(vm)?;
    let top = vm.peek(0)?;
    if vm.is_truthy(top) {
        vm.current_frame_mut()?.ip += offset as usize;
    }
    Ok(())
}

fn jump_if_err(vm: &mut Vm) -> VmResult<()> {
    let offset = offset_forward(vm)?;
    let top = vm.peek(0)?;
    if vm.is_err_value(top) {
        vm.current_frame_mut()?.ip += offset as usize;
    }
    Ok(())
}

fn jump_if_not_err(vm: &mut Vm) -> VmResult<()> {
    let offset = offset_forward(vm)?;
    let top = vm.peek(0)?;
    if !vm.is_err_value(top) {
        vm.current_frame_mut()?.ip += offset as usize;
    }
    Ok(())
}

fn jump_if_not_null(vm: &mut Vm) -> VmResult<()> {
    let offset = offset_forward(vm)?;
    let top = vm.peek(0)?;
    if !top.is_null() {
        vm.current_frame_mut()?.ip += offset as usize;
    }
    Ok(())
}

fn pop_jump_if_false(vm: &mut Vm) -> VmResult<()> {
    let offset = offset_forward(vm)?;
    let condition = vm.pop()?;
    if !vm.is_truthy(condition) {
        vm.current_frame_mut()?.ip += offset as usize;
    }
    Ok(())
}

fn pop(vm: &mut Vm) -> VmResult<()> {
    vm.pop()?;
    Ok(())
}

/// Top-level expression statements echo their (non-null) value in the REPL.
fn pop_echo_in_repl(vm: &mut Vm) -> VmResult<()> {
    let value = vm.peek(0)?;
    if vm.in_repl && !value.is_null() {
        let string = vm.debugify_value(value)?;
        let bytes = vm.heap.str_obj(string).as_bytes().to_vec();
        vm.write_out_bytes(&bytes);
        vm.write_out_bytes(b"\n");
    }
    vm.pop()?;
    Ok(())
}

fn dup(vm: &mut Vm) -> VmResult<()> {
    let top = vm.peek(0)?;
    vm.push(top)
}

fn dup2(vm: &mut Vm) -> VmResult<()> {
    let below = vm.peek(1)?;
    vm.push(below)?;
    let below = vm.peek(1)?;
    vm.push(below)
}

/// Prints each operand's string form, space-separated, newline-terminated.
fn echo(vm: &mut Vm) -> VmResult<()> {
    let arg_count = vm.read_byte()? as usize;

    for index in (1..=arg_count).rev() {
        let value = vm.peek(index - 1)?;
        let string = vm.stringify_value(value)?;
        let bytes = vm.heap.str_obj(string).as_bytes().to_vec();
        if !vm.write_out_bytes(&bytes) {
            return Err(
                Panic::os_error("Failed to write to the standard output stream.").into(),
            );
        }
        let separator: &[u8] = if index > 1 { b" " } else { b"\n" };
        if !vm.write_out_bytes(separator) {
            return Err(
                Panic::os_error("Failed to write to the standard output stream.").into(),
            );
        }
    }
    if arg_count == 0 && !vm.write_out_bytes(b"\n") {
        return Err(Panic::os_error("Failed to write to the standard output stream.").into());
    }

    let new_len = vm.stack_len() - arg_count;
    vm.truncate_stack(new_len);
    Ok(())
}

fn assert_op(vm: &mut Vm) -> VmResult<()> {
    let test_expr = vm.pop()?;
    if !vm.is_truthy(test_expr) {
        return Err(Panic::assertion_failed().into());
    }
    Ok(())
}

// The Try handler lives in `calls.rs` with the rest of the call machinery.
