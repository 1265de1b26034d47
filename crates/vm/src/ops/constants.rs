//! Constant-loading handlers.

use crate::error::VmResult;
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::value::Value;
use crate::vm::Vm;

/// Registers the constant-loading handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::LoadConstant, load_constant);
    table.register(Op::LoadNull, |vm| vm.push(Value::Null));
    table.register(Op::LoadTrue, |vm| vm.push(Value::Bool(true)));
    table.register(Op::LoadFalse, |vm| vm.push(Value::Bool(false)));
    table.register(Op::LoadI64_0, |vm| vm.push(Value::I64(0)));
    table.register(Op::LoadI64_1, |vm| vm.push(Value::I64(1)));
    table.register(Op::LoadI64_2, |vm| vm.push(Value::I64(2)));
    table.register(Op::LoadI64_3, |vm| vm.push(Value::I64(3)));
    table.register(Op::LoadI64_4, |vm| vm.push(Value::I64(4)));
    table.register(Op::LoadI64_5, |vm| vm.push(Value::I64(5)));
    table.register(Op::LoadI64_6, |vm| vm.push(Value::I64(6)));
    table.register(Op::LoadI64_7, |vm| vm.push(Value::I64(7)));
    table.register(Op::LoadI64_8, |vm| vm.push(Value::I64(8)));
    table.register(Op::LoadI64_9, |vm| vm.push(Value::I64(9)));
}

fn load_constant(vm: &mut Vm) -> VmResult<()> {
    let constant = vm.read_constant()?;
    vm.push(constant)
}
