//! Methods for the string type.

use crate::error::{Panic, VmResult};
use crate::heap::ObjKind;
use crate::objects::{IterKind, PyroIter};
use crate::utf8;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    let str_class = vm.classes.str_;
    vm.define_method(str_class, "byte_count", 0, str_byte_count)?;
    vm.define_method(str_class, "count", 0, str_byte_count)?;
    vm.define_method(str_class, "is_empty", 0, str_is_empty)?;
    vm.define_method(str_class, "byte", 1, str_byte)?;
    vm.define_method(str_class, "bytes", 0, str_bytes)?;
    vm.define_method(str_class, "char", 1, str_char)?;
    vm.define_method(str_class, "chars", 0, str_chars)?;
    vm.define_method(str_class, "char_count", 0, str_char_count)?;
    vm.define_method(str_class, "lines", 0, str_lines)?;
    vm.define_method(str_class, "is_utf8", 0, str_is_utf8)?;
    vm.define_method(str_class, "is_ascii", 0, str_is_ascii)?;
    vm.define_method(str_class, "to_ascii_upper", 0, str_to_ascii_upper)?;
    vm.define_method(str_class, "to_ascii_lower", 0, str_to_ascii_lower)?;
    vm.define_method(str_class, "starts_with", 1, str_starts_with)?;
    vm.define_method(str_class, "ends_with", 1, str_ends_with)?;
    vm.define_method(str_class, "strip_prefix", 1, str_strip_prefix)?;
    vm.define_method(str_class, "strip_suffix", 1, str_strip_suffix)?;
    vm.define_method(str_class, "strip", 0, str_strip)?;
    vm.define_method(str_class, "strip_ascii_ws", 0, str_strip)?;
    vm.define_method(str_class, "contains", 1, str_contains)?;
    vm.define_method(str_class, "split", 1, str_split)?;
    vm.define_method(str_class, "index_of", -1, str_index_of)?;
    vm.define_method(str_class, "replace", 2, str_replace)?;
    vm.define_method(str_class, "slice", -1, str_slice)?;
    vm.define_method(str_class, "join", 1, str_join)?;
    vm.define_method(str_class, "$iter", 0, str_chars)?;
    Ok(())
}

fn receiver(args: &[Value]) -> VmResult<ObjRef> {
    match args[0] {
        Value::Obj(obj_ref) => Ok(obj_ref),
        _ => Err(Panic::type_error("Invalid receiver.").into()),
    }
}

fn arg_as_str(vm: &Vm, value: Value) -> VmResult<ObjRef> {
    match value {
        Value::Obj(obj_ref) if matches!(vm.heap.object(obj_ref).kind, ObjKind::Str(_)) => {
            Ok(obj_ref)
        }
        _ => Err(Panic::type_error("Expected a string argument.").into()),
    }
}

fn str_byte_count(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    Ok(Value::I64(vm.heap.str_obj(string).len() as i64))
}

fn str_is_empty(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    Ok(Value::Bool(vm.heap.str_obj(string).is_empty()))
}

fn str_byte(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let index = vm.index_in_range(args[1], vm.heap.str_obj(string).len())?;
    Ok(Value::I64(vm.heap.str_obj(string).as_bytes()[index] as i64))
}

fn str_bytes(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(string, IterKind::StrBytes))?;
    Ok(Value::Obj(iter))
}

/// The n-th code point, by char index.
fn str_char(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let Value::I64(target) = args[1] else {
        return Err(Panic::type_error("Index must be an integer.").into());
    };
    if target < 0 {
        return Err(Panic::value_error("Index out of range.").into());
    }

    let bytes = vm.heap.str_obj(string).as_bytes();
    let mut index = 0usize;
    let mut seen = 0i64;
    while index < bytes.len() {
        match utf8::read_utf8_codepoint(&bytes[index..]) {
            Some(cp) => {
                if seen == target {
                    return match char::from_u32(cp.value) {
                        Some(c) => Ok(Value::Char(c)),
                        None => Err(Panic::value_error("Invalid code point.").into()),
                    };
                }
                seen += 1;
                index += cp.length;
            }
            None => {
                return Err(Panic::value_error(format!(
                    "String contains invalid utf-8 at byte index {index}.",
                ))
                .into())
            }
        }
    }
    Err(Panic::value_error("Index out of range.").into())
}

fn str_chars(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(string, IterKind::StrChars))?;
    Ok(Value::Obj(iter))
}

fn str_char_count(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    match utf8::count_codepoints(vm.heap.str_obj(string).as_bytes()) {
        Ok(count) => Ok(Value::I64(count as i64)),
        Err(index) => Err(Panic::value_error(format!(
            "String contains invalid utf-8 at byte index {index}.",
        ))
        .into()),
    }
}

fn str_lines(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(string, IterKind::StrLines))?;
    Ok(Value::Obj(iter))
}

fn str_is_utf8(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    Ok(Value::Bool(vm.heap.str_obj(string).is_valid_utf8()))
}

fn str_is_ascii(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    Ok(Value::Bool(vm.heap.str_obj(string).as_bytes().is_ascii()))
}

fn str_to_ascii_upper(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let bytes = vm.heap.str_obj(string).as_bytes().to_ascii_uppercase();
    Ok(Value::Obj(vm.intern_owned(bytes)?))
}

fn str_to_ascii_lower(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let bytes = vm.heap.str_obj(string).as_bytes().to_ascii_lowercase();
    Ok(Value::Obj(vm.intern_owned(bytes)?))
}

fn str_starts_with(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let prefix = arg_as_str(vm, args[1])?;
    let result = vm
        .heap
        .str_obj(string)
        .as_bytes()
        .starts_with(vm.heap.str_obj(prefix).as_bytes());
    Ok(Value::Bool(result))
}

fn str_ends_with(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let suffix = arg_as_str(vm, args[1])?;
    let result = vm
        .heap
        .str_obj(string)
        .as_bytes()
        .ends_with(vm.heap.str_obj(suffix).as_bytes());
    Ok(Value::Bool(result))
}

fn str_strip_prefix(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let prefix = arg_as_str(vm, args[1])?;
    let prefix_bytes = vm.heap.str_obj(prefix).as_bytes().to_vec();
    let bytes = vm.heap.str_obj(string).as_bytes();
    match bytes.strip_prefix(prefix_bytes.as_slice()) {
        Some(stripped) => {
            let stripped = stripped.to_vec();
            Ok(Value::Obj(vm.intern_owned(stripped)?))
        }
        None => Ok(args[0]),
    }
}

fn str_strip_suffix(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let suffix = arg_as_str(vm, args[1])?;
    let suffix_bytes = vm.heap.str_obj(suffix).as_bytes().to_vec();
    let bytes = vm.heap.str_obj(string).as_bytes();
    match bytes.strip_suffix(suffix_bytes.as_slice()) {
        Some(stripped) => {
            let stripped = stripped.to_vec();
            Ok(Value::Obj(vm.intern_owned(stripped)?))
        }
        None => Ok(args[0]),
    }
}

fn str_strip(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let bytes = vm.heap.str_obj(string).as_bytes();
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    let stripped = bytes[start..end].to_vec();
    Ok(Value::Obj(vm.intern_owned(stripped)?))
}

fn str_contains(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let result = vm.op_binary_in(args[1], args[0])?;
    Ok(Value::Bool(result))
}

fn str_split(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let separator = arg_as_str(vm, args[1])?;
    let separator_bytes = vm.heap.str_obj(separator).as_bytes().to_vec();
    if separator_bytes.is_empty() {
        return Err(Panic::value_error("Cannot split on an empty separator.").into());
    }

    let bytes = vm.heap.str_obj(string).as_bytes().to_vec();
    let mut pieces: Vec<Vec<u8>> = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;
    while index + separator_bytes.len() <= bytes.len() {
        if &bytes[index..index + separator_bytes.len()] == separator_bytes.as_slice() {
            pieces.push(bytes[start..index].to_vec());
            index += separator_bytes.len();
            start = index;
        } else {
            index += 1;
        }
    }
    pieces.push(bytes[start..].to_vec());

    let out = vm.new_vec(crate::objects::PyroVec::with_capacity(pieces.len()))?;
    vm.push(Value::Obj(out))?;
    for piece in pieces {
        let piece_ref = vm.intern_owned(piece)?;
        let before = vm.heap.payload_size(out);
        vm.heap.vec_mut(out).append(Value::Obj(piece_ref));
        vm.heap.resize_tracked(out, before)?;
    }
    vm.pop()?;
    Ok(Value::Obj(out))
}

/// `index_of(target)` or `index_of(target, start)`: the byte index of the
/// first occurrence, or an `err`.
fn str_index_of(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    if args.len() < 2 || args.len() > 3 {
        return Err(Panic::args_error(format!(
            "Expected 1 or 2 arguments for index_of(), found {}.",
            args.len() - 1,
        ))
        .into());
    }
    let target = arg_as_str(vm, args[1])?;
    let start = match args.get(2) {
        None => 0usize,
        Some(Value::I64(n)) if *n >= 0 => *n as usize,
        Some(_) => return Err(Panic::value_error("Invalid start index.").into()),
    };

    let bytes = vm.heap.str_obj(string).as_bytes();
    let needle = vm.heap.str_obj(target).as_bytes();
    if needle.is_empty() || start > bytes.len() {
        return Ok(Value::Obj(vm.empty_error()));
    }
    let found = bytes[start..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + start);
    match found {
        Some(index) => Ok(Value::I64(index as i64)),
        None => Ok(Value::Obj(vm.empty_error())),
    }
}

fn str_replace(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let old = arg_as_str(vm, args[1])?;
    let new = arg_as_str(vm, args[2])?;

    let old_bytes = vm.heap.str_obj(old).as_bytes().to_vec();
    let new_bytes = vm.heap.str_obj(new).as_bytes().to_vec();
    if old_bytes.is_empty() {
        return Ok(args[0]);
    }

    let bytes = vm.heap.str_obj(string).as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut index = 0usize;
    while index < bytes.len() {
        if index + old_bytes.len() <= bytes.len()
            && &bytes[index..index + old_bytes.len()] == old_bytes.as_slice()
        {
            out.extend_from_slice(&new_bytes);
            index += old_bytes.len();
        } else {
            out.push(bytes[index]);
            index += 1;
        }
    }
    Ok(Value::Obj(vm.intern_owned(out)?))
}

/// `slice(start)` or `slice(start, length)`, in bytes.
fn str_slice(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let string = receiver(args)?;
    let count = vm.heap.str_obj(string).len();

    let (start, length) = match args.len() - 1 {
        1 => match args[1] {
            Value::I64(start) if start >= 0 && start as usize <= count => {
                (start as usize, count - start as usize)
            }
            _ => return Err(Panic::value_error("Slice start is out of range.").into()),
        },
        2 => match (args[1], args[2]) {
            (Value::I64(start), Value::I64(length))
                if start >= 0
                    && length >= 0
                    && start as usize + length as usize <= count =>
            {
                (start as usize, length as usize)
            }
            _ => return Err(Panic::value_error("Slice is out of range.").into()),
        },
        n => {
            return Err(Panic::args_error(format!(
                "Expected 1 or 2 arguments for slice(), found {n}.",
            ))
            .into())
        }
    };

    let bytes = vm.heap.str_obj(string).as_bytes()[start..start + length].to_vec();
    Ok(Value::Obj(vm.intern_owned(bytes)?))
}

/// Joins the elements of an iterable value, with the receiver as the
/// separator.
fn str_join(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let separator_ref = receiver(args)?;
    let separator = vm.heap.str_obj(separator_ref).as_bytes().to_vec();

    let iter_value = crate::builtins::core_iter_of(vm, args[1])?;
    let Value::Obj(iter) = iter_value else {
        return Err(Panic::type_error("Object is not iterable.").into());
    };
    if !matches!(vm.heap.object(iter).kind, ObjKind::Iter(_)) {
        // A user-defined iterator: drive it through the generic wrapper.
        let wrapper = vm.new_iter(PyroIter::new(iter, IterKind::Generic))?;
        vm.push(Value::Obj(wrapper))?;
        let joined = vm.iter_join(wrapper, &separator)?;
        vm.pop()?;
        return Ok(Value::Obj(joined));
    }

    vm.push(iter_value)?;
    let joined = vm.iter_join(iter, &separator)?;
    vm.pop()?;
    Ok(Value::Obj(joined))
}
