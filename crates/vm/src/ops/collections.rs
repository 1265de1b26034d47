//! Container-construction, indexing and unpacking handlers.

use crate::error::{Panic, VmResult};
use crate::heap::ObjKind;
use crate::objects::{MapKind, PyroVec, VecKind};
use crate::opcode::Op;
use crate::ops::JumpTable;
use crate::value::Value;
use crate::vm::Vm;

/// Registers the container handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(Op::MakeMap, make_map);
    table.register(Op::MakeVec, make_vec);
    table.register(Op::GetIndex, get_index);
    table.register(Op::SetIndex, set_index);
    table.register(Op::Unpack, unpack);
    table.register(Op::BinaryIn, binary_in);
}

/// The entries sit on the stack as key-value pairs in source order.
fn make_map(vm: &mut Vm) -> VmResult<()> {
    let entry_count = vm.read_u16()? as usize;

    let map = vm.new_map(MapKind::Map)?;
    // Keep the map reachable while entries are added.
    vm.push(Value::Obj(map))?;

    let base = vm.stack_len() - entry_count * 2 - 1;
    for pair in 0..entry_count {
        let key = vm.stack_value(base + pair * 2);
        let value = vm.stack_value(base + pair * 2 + 1);
        vm.map_set(map, key, value)?;
    }

    vm.truncate_stack(base);
    vm.push(Value::Obj(map))
}

fn make_vec(vm: &mut Vm) -> VmResult<()> {
    let item_count = vm.read_u16()? as usize;

    let mut vec = PyroVec::with_capacity(item_count);
    let base = vm.stack_len() - item_count;
    for index in 0..item_count {
        vec.append(vm.stack_value(base + index));
    }

    let vec_ref = vm.new_vec(vec)?;
    vm.truncate_stack(base);
    vm.push(Value::Obj(vec_ref))
}

fn get_index(vm: &mut Vm) -> VmResult<()> {
    let key = vm.pop()?;
    let receiver = vm.pop()?;
    let result = vm.op_get_index(receiver, key)?;
    vm.push(result)
}

fn set_index(vm: &mut Vm) -> VmResult<()> {
    let value = vm.pop()?;
    let key = vm.pop()?;
    let receiver = vm.pop()?;
    let result = vm.op_set_index(receiver, key, value)?;
    vm.push(result)
}

/// Destructures a tuple or vector onto the stack. A source with fewer
/// values than requested is a value error; extras are ignored.
fn unpack(vm: &mut Vm) -> VmResult<()> {
    let value = vm.pop()?;
    let count = vm.read_byte()? as usize;

    let values: Vec<Value> = match value {
        Value::Obj(obj_ref) => match &vm.heap.object(obj_ref).kind {
            ObjKind::Tup(tup) => {
                if tup.count() < count {
                    return Err(Panic::value_error(format!(
                        "Tuple has {} value(s), requires {} for unpacking.",
                        tup.count(),
                        count,
                    ))
                    .into());
                }
                tup.values[..count].to_vec()
            }
            ObjKind::Vec(vec) if vec.kind == VecKind::Vec => {
                if vec.count() < count {
                    return Err(Panic::value_error(format!(
                        "Vector has {} value(s), requires {} for unpacking.",
                        vec.count(),
                        count,
                    ))
                    .into());
                }
                vec.values()[..count].to_vec()
            }
            _ => return Err(Panic::type_error("Value is not unpackable.").into()),
        },
        _ => return Err(Panic::type_error("Value is not unpackable.").into()),
    };

    for value in values {
        vm.push(value)?;
    }
    Ok(())
}

fn binary_in(vm: &mut Vm) -> VmResult<()> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    let result = vm.op_binary_in(a, b)?;
    vm.push(Value::Bool(result))
}
