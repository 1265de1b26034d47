//! Methods for the byte-buffer type.

use crate::error::{Panic, VmResult};
use crate::objects::PyroBuf;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    vm.define_global_fn("$buf", 0, |vm, _args| {
        Ok(Value::Obj(vm.new_buf(PyroBuf::new())?))
    })?;

    let buf_class = vm.classes.buf;
    vm.define_method(buf_class, "count", 0, buf_count)?;
    vm.define_method(buf_class, "is_empty", 0, buf_is_empty)?;
    vm.define_method(buf_class, "get", 1, buf_get)?;
    vm.define_method(buf_class, "set", 2, buf_set)?;
    vm.define_method(buf_class, "$get_index", 1, buf_get)?;
    vm.define_method(buf_class, "$set_index", 2, buf_set)?;
    vm.define_method(buf_class, "write_byte", 1, buf_write_byte)?;
    vm.define_method(buf_class, "write", -1, buf_write)?;
    vm.define_method(buf_class, "to_str", 0, buf_to_str)?;
    Ok(())
}

fn receiver(args: &[Value]) -> VmResult<ObjRef> {
    match args[0] {
        Value::Obj(obj_ref) => Ok(obj_ref),
        _ => Err(Panic::type_error("Invalid receiver.").into()),
    }
}

fn buf_count(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let buf = receiver(args)?;
    Ok(Value::I64(vm.heap.buf(buf).count() as i64))
}

fn buf_is_empty(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let buf = receiver(args)?;
    Ok(Value::Bool(vm.heap.buf(buf).is_empty()))
}

fn buf_get(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let buf = receiver(args)?;
    let index = vm.index_in_range(args[1], vm.heap.buf(buf).count())?;
    match vm.heap.buf(buf).get(index) {
        Some(byte) => Ok(Value::I64(byte as i64)),
        None => Err(Panic::value_error("Index out of range.").into()),
    }
}

fn buf_set(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let buf = receiver(args)?;
    let index = vm.index_in_range(args[1], vm.heap.buf(buf).count())?;
    let byte = expect_byte(args[2])?;
    vm.heap.buf_mut(buf).set(index, byte);
    Ok(args[2])
}

fn buf_write_byte(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let buf = receiver(args)?;
    let byte = expect_byte(args[1])?;
    let before = vm.heap.payload_size(buf);
    vm.heap.buf_mut(buf).append_byte(byte);
    vm.heap.resize_tracked(buf, before)?;
    Ok(Value::Null)
}

/// Appends the string form of each argument. Returns the number of bytes
/// written.
fn buf_write(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let buf = receiver(args)?;
    let mut written = 0i64;
    for value in &args[1..] {
        let string = vm.stringify_value(*value)?;
        let bytes = vm.heap.str_obj(string).as_bytes().to_vec();
        written += bytes.len() as i64;
        let before = vm.heap.payload_size(buf);
        vm.heap.buf_mut(buf).append_bytes(&bytes);
        vm.heap.resize_tracked(buf, before)?;
    }
    Ok(Value::I64(written))
}

/// Converts the buffer's content into a string, taking ownership of the
/// byte array and leaving the buffer empty.
fn buf_to_str(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let buf = receiver(args)?;
    let before = vm.heap.payload_size(buf);
    let bytes = vm.heap.buf_mut(buf).take_bytes();
    vm.heap.resize_tracked(buf, before)?;
    Ok(Value::Obj(vm.intern_owned(bytes)?))
}

fn expect_byte(value: Value) -> VmResult<u8> {
    match value {
        Value::I64(n) if (0..=255).contains(&n) => Ok(n as u8),
        _ => Err(Panic::value_error("Buffer values must be integers in the range [0, 255].").into()),
    }
}
