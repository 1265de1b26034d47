//! Arithmetic, bitwise, comparison and unary operation handlers.

use crate::error::{Panic, VmResult};
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::value::Value;
use crate::vm::Vm;

/// Registers the arithmetic and comparison handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::BinaryPlus, binary_plus);
    table.register(Op::BinaryMinus, binary_minus);
    table.register(Op::BinaryStar, binary_star);
    table.register(Op::BinarySlash, binary_slash);
    table.register(Op::BinarySlashSlash, binary_slash_slash);
    table.register(Op::BinaryPercent, binary_percent);
    table.register(Op::BinaryStarStar, binary_star_star);

    table.register(Op::BinaryAmp, binary_amp);
    table.register(Op::BinaryBar, binary_bar);
    table.register(Op::BinaryCaret, binary_caret);
    table.register(Op::BinaryLessLess, binary_less_less);
    table.register(Op::BinaryGreaterGreater, binary_greater_greater);
    table.register(Op::UnaryTilde, unary_tilde);

    table.register(Op::BinaryEqualEqual, binary_equal_equal);
    table.register(Op::BinaryBangEqual, binary_bang_equal);
    table.register(Op::BinaryLess, binary_less);
    table.register(Op::BinaryLessEqual, binary_less_equal);
    table.register(Op::BinaryGreater, binary_greater);
    table.register(Op::BinaryGreaterEqual, binary_greater_equal);

    table.register(Op::UnaryBang, unary_bang);
    table.register(Op::UnaryMinus, unary_minus);
    table.register(Op::UnaryPlus, unary_plus);
}

fn pop_pair(vm: &mut Vm) -> VmResult<(Value, Value)> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    Ok((a, b))
}

fn binary_plus(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_binary_plus(a, b)?;
    vm.push(result)
}

fn binary_minus(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_binary_minus(a, b)?;
    vm.push(result)
}

fn binary_star(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_binary_star(a, b)?;
    vm.push(result)
}

fn binary_slash(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_binary_slash(a, b)?;
    vm.push(result)
}

/// Truncating division: `//`.
fn binary_slash_slash(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let zero = Panic::value_error("Division by zero.");
    let result = match (a, b) {
        (Value::I64(x), Value::I64(y)) => {
            if y == 0 {
                return Err(zero.into());
            }
            Value::I64(x.wrapping_div(y))
        }
        (Value::I64(x), Value::F64(y)) => {
            if y == 0.0 {
                return Err(zero.into());
            }
            Value::F64((x as f64 / y).trunc())
        }
        (Value::F64(x), Value::I64(y)) => {
            if y == 0 {
                return Err(zero.into());
            }
            Value::F64((x / y as f64).trunc())
        }
        (Value::F64(x), Value::F64(y)) => {
            if y == 0.0 {
                return Err(zero.into());
            }
            Value::F64((x / y).trunc())
        }
        _ => return Err(Panic::type_error("Operands to '//' must both be numbers.").into()),
    };
    vm.push(result)
}

fn binary_percent(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let zero = Panic::value_error("Modulo by zero.");
    let result = match (a, b) {
        (Value::I64(x), Value::I64(y)) => {
            if y == 0 {
                return Err(zero.into());
            }
            Value::I64(x.wrapping_rem(y))
        }
        (Value::I64(x), Value::F64(y)) => {
            if y == 0.0 {
                return Err(zero.into());
            }
            Value::F64((x as f64) % y)
        }
        (Value::F64(x), Value::I64(y)) => {
            if y == 0 {
                return Err(zero.into());
            }
            Value::F64(x % y as f64)
        }
        (Value::F64(x), Value::F64(y)) => {
            if y == 0.0 {
                return Err(zero.into());
            }
            Value::F64(x % y)
        }
        _ => return Err(Panic::type_error("Operands to '%' must both be numbers.").into()),
    };
    vm.push(result)
}

/// Exponentiation always produces a float.
fn binary_star_star(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = match (a, b) {
        (Value::I64(x), Value::I64(y)) => Value::F64((x as f64).powf(y as f64)),
        (Value::I64(x), Value::F64(y)) => Value::F64((x as f64).powf(y)),
        (Value::F64(x), Value::I64(y)) => Value::F64(x.powf(y as f64)),
        (Value::F64(x), Value::F64(y)) => Value::F64(x.powf(y)),
        _ => return Err(Panic::type_error("Operands to '**' must both be numbers.").into()),
    };
    vm.push(result)
}

fn binary_amp(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => vm.push(Value::I64(x & y)),
        _ => Err(Panic::type_error("Operands to '&' must both be integers.").into()),
    }
}

fn binary_bar(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => vm.push(Value::I64(x | y)),
        _ => Err(Panic::type_error("Operands to '|' must both be integers.").into()),
    }
}

fn binary_caret(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => vm.push(Value::I64(x ^ y)),
        _ => Err(Panic::type_error("Operands to '^' must both be integers.").into()),
    }
}

fn binary_less_less(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => {
            if y < 0 {
                Err(Panic::value_error("Right operand to '<<' cannot be negative.").into())
            } else {
                vm.push(Value::I64(x.wrapping_shl(y as u32)))
            }
        }
        _ => Err(Panic::type_error("Operands to '<<' must both be integers.").into()),
    }
}

fn binary_greater_greater(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => {
            if y < 0 {
                Err(Panic::value_error("Right operand to '>>' cannot be negative.").into())
            } else {
                vm.push(Value::I64(x.wrapping_shr(y as u32)))
            }
        }
        _ => Err(Panic::type_error("Operands to '>>' must both be integers.").into()),
    }
}

fn unary_tilde(vm: &mut Vm) -> VmResult<()> {
    let operand = vm.pop()?;
    match operand {
        Value::I64(x) => vm.push(Value::I64(!x)),
        _ => Err(Panic::type_error("Bitwise '~' requires an integer operand.").into()),
    }
}

fn binary_equal_equal(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_compare_eq(a, b)?;
    vm.push(Value::Bool(result))
}

fn binary_bang_equal(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_compare_eq(a, b)?;
    vm.push(Value::Bool(!result))
}

fn binary_less(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_compare_lt(a, b)?;
    vm.push(Value::Bool(result))
}

fn binary_less_equal(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_compare_le(a, b)?;
    vm.push(Value::Bool(result))
}

fn binary_greater(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_compare_gt(a, b)?;
    vm.push(Value::Bool(result))
}

fn binary_greater_equal(vm: &mut Vm) -> VmResult<()> {
    let (a, b) = pop_pair(vm)?;
    let result = vm.op_compare_ge(a, b)?;
    vm.push(Value::Bool(result))
}

fn unary_bang(vm: &mut Vm) -> VmResult<()> {
    let operand = vm.pop()?;
    let truthy = vm.is_truthy(operand);
    vm.push(Value::Bool(!truthy))
}

fn unary_minus(vm: &mut Vm) -> VmResult<()> {
    let operand = vm.pop()?;
    let result = vm.op_unary_minus(operand)?;
    vm.push(result)
}

fn unary_plus(vm: &mut Vm) -> VmResult<()> {
    let operand = vm.pop()?;
    let result = vm.op_unary_plus(operand)?;
    vm.push(result)
}
