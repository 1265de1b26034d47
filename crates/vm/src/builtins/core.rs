//! Global `$`-prefixed functions.

use std::io::BufRead;

use num_traits::ToPrimitive;

use crate::error::{ErrorCode, Halt, Panic, VmResult};
use crate::heap::ObjKind;
use crate::objects::{MapKind, PyroIter, VecKind};
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    vm.define_global_fn("$exit", 1, fn_exit)?;
    vm.define_global_fn("$panic", -1, fn_panic)?;
    vm.define_global_fn("$clock", 0, fn_clock)?;
    vm.define_global_fn("$sleep", 1, fn_sleep)?;
    vm.define_global_fn("$env", 1, fn_env)?;
    vm.define_global_fn("$input", 0, fn_input)?;
    vm.define_global_fn("$shell", 1, fn_shell)?;
    vm.define_global_fn("$read_file", 1, fn_read_file)?;
    vm.define_global_fn("$write_file", 2, fn_write_file)?;

    vm.define_global_fn("$str", 1, fn_str)?;
    vm.define_global_fn("$debug", 1, fn_debug)?;
    vm.define_global_fn("$i64", 1, fn_i64)?;
    vm.define_global_fn("$f64", 1, fn_f64)?;
    vm.define_global_fn("$char", 1, fn_char)?;
    vm.define_global_fn("$bool", 1, fn_bool)?;
    vm.define_global_fn("$hash", 1, fn_hash)?;

    vm.define_global_fn("$fmt", -1, fn_fmt)?;
    vm.define_global_fn("$print", -1, fn_print)?;
    vm.define_global_fn("$println", -1, fn_println)?;
    vm.define_global_fn("$eprint", -1, fn_eprint)?;
    vm.define_global_fn("$eprintln", -1, fn_eprintln)?;

    vm.define_global_fn("$is_null", 1, |_, args| {
        Ok(Value::Bool(args[1].is_null()))
    })?;
    vm.define_global_fn("$is_bool", 1, |_, args| {
        Ok(Value::Bool(matches!(args[1], Value::Bool(_))))
    })?;
    vm.define_global_fn("$is_i64", 1, |_, args| {
        Ok(Value::Bool(matches!(args[1], Value::I64(_))))
    })?;
    vm.define_global_fn("$is_f64", 1, |_, args| {
        Ok(Value::Bool(matches!(args[1], Value::F64(_))))
    })?;
    vm.define_global_fn("$is_char", 1, |_, args| {
        Ok(Value::Bool(matches!(args[1], Value::Char(_))))
    })?;
    vm.define_global_fn("$is_nan", 1, |_, args| {
        Ok(Value::Bool(matches!(args[1], Value::F64(f) if f.is_nan())))
    })?;
    vm.define_global_fn("$is_inf", 1, |_, args| {
        Ok(Value::Bool(
            matches!(args[1], Value::F64(f) if f.is_infinite()),
        ))
    })?;

    vm.define_global_fn("$is_str", 1, |vm, args| Ok(Value::Bool(is_str(vm, args[1]))))?;
    vm.define_global_fn("$is_map", 1, |vm, args| Ok(Value::Bool(is_map(vm, args[1]))))?;
    vm.define_global_fn("$is_set", 1, |vm, args| Ok(Value::Bool(is_set(vm, args[1]))))?;
    vm.define_global_fn("$is_vec", 1, |vm, args| Ok(Value::Bool(is_vec(vm, args[1]))))?;
    vm.define_global_fn("$is_stack", 1, |vm, args| {
        Ok(Value::Bool(is_stack(vm, args[1])))
    })?;
    vm.define_global_fn("$is_tup", 1, |vm, args| Ok(Value::Bool(is_tup(vm, args[1]))))?;
    vm.define_global_fn("$is_buf", 1, |vm, args| Ok(Value::Bool(is_buf(vm, args[1]))))?;
    vm.define_global_fn("$is_queue", 1, |vm, args| {
        Ok(Value::Bool(is_queue(vm, args[1])))
    })?;
    vm.define_global_fn("$is_iter", 1, |vm, args| Ok(Value::Bool(is_iter(vm, args[1]))))?;
    vm.define_global_fn("$is_file", 1, |vm, args| Ok(Value::Bool(is_file(vm, args[1]))))?;
    vm.define_global_fn("$is_class", 1, |vm, args| {
        Ok(Value::Bool(is_class(vm, args[1])))
    })?;
    vm.define_global_fn("$is_module", 1, |vm, args| {
        Ok(Value::Bool(is_module(vm, args[1])))
    })?;
    vm.define_global_fn("$is_err", 1, |vm, args| {
        Ok(Value::Bool(vm.is_err_value(args[1])))
    })?;

    vm.define_global_fn("$is_callable", 1, fn_is_callable)?;
    vm.define_global_fn("$is_iterable", 1, fn_is_iterable)?;
    vm.define_global_fn("$is_iterator", 1, fn_is_iterator)?;
    vm.define_global_fn("$is_instance", 2, fn_is_instance)?;
    vm.define_global_fn("$is_instance_of", 2, fn_is_instance)?;
    vm.define_global_fn("$has_method", 2, fn_has_method)?;
    vm.define_global_fn("$has_field", 2, fn_has_field)?;

    vm.define_global_fn("$iter", 1, fn_iter)?;
    vm.define_global_fn("$range", -1, fn_range)?;

    Ok(())
}

fn is_str(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(vm.heap.object(r).kind, ObjKind::Str(_)))
}
fn is_map(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(&vm.heap.object(r).kind, ObjKind::Map(m) if m.kind == MapKind::Map))
}
fn is_set(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(&vm.heap.object(r).kind, ObjKind::Map(m) if m.kind == MapKind::Set))
}
fn is_vec(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(&vm.heap.object(r).kind, ObjKind::Vec(vec) if vec.kind == VecKind::Vec))
}
fn is_stack(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(&vm.heap.object(r).kind, ObjKind::Vec(vec) if vec.kind == VecKind::Stack))
}
fn is_tup(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(&vm.heap.object(r).kind, ObjKind::Tup(t) if !t.is_err))
}
fn is_buf(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(vm.heap.object(r).kind, ObjKind::Buf(_)))
}
fn is_queue(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(vm.heap.object(r).kind, ObjKind::Queue(_)))
}
fn is_iter(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(vm.heap.object(r).kind, ObjKind::Iter(_)))
}
fn is_file(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(vm.heap.object(r).kind, ObjKind::File(_)))
}
fn is_class(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(vm.heap.object(r).kind, ObjKind::Class(_)))
}
fn is_module(vm: &Vm, v: Value) -> bool {
    matches!(v, Value::Obj(r) if matches!(vm.heap.object(r).kind, ObjKind::Module(_)))
}

fn fn_exit(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    match args[1] {
        Value::I64(code) => Err(Halt::Exit(code)),
        _ => Err(Panic::type_error("$exit() requires an integer status code.").into()),
    }
}

fn fn_panic(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    if args.len() < 2 {
        return Err(Panic::args_error("$panic() requires at least one argument.").into());
    }
    let message_ref = vm.stringify_value(args[1])?;
    let message = vm.heap.str_obj(message_ref).to_string_lossy();
    Err(Panic::new(ErrorCode::Error, message).into())
}

fn fn_clock(vm: &mut Vm, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::F64(vm.start_time.elapsed().as_secs_f64()))
}

fn fn_sleep(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let seconds = match args[1] {
        Value::I64(n) if n >= 0 => n as f64,
        Value::F64(f) if f >= 0.0 => f,
        _ => {
            return Err(
                Panic::type_error("$sleep() requires a non-negative number of seconds.").into(),
            )
        }
    };
    std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
    Ok(Value::Null)
}

fn fn_env(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let name = expect_str(vm, args[1], "$env() requires a string name.")?;
    match std::env::var(&name) {
        Ok(value) => Ok(Value::Obj(vm.intern(&value)?)),
        Err(_) => Ok(Value::Obj(vm.empty_error())),
    }
}

fn fn_input(vm: &mut Vm, _args: &[Value]) -> VmResult<Value> {
    let mut line = Vec::new();
    let count = std::io::stdin()
        .lock()
        .read_until(b'\n', &mut line)
        .map_err(|err| Panic::os_error(format!("Failed to read from standard input: {err}.")))?;
    if count == 0 {
        return Ok(Value::Null);
    }
    if line.ends_with(b"\n") {
        line.pop();
        if line.ends_with(b"\r") {
            line.pop();
        }
    }
    Ok(Value::Obj(vm.intern_owned(line)?))
}

fn fn_shell(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let command = expect_str(vm, args[1], "$shell() requires a command string.")?;
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .output()
        .map_err(|err| Panic::os_error(format!("Failed to run command: {err}.")))?;
    Ok(Value::Obj(vm.intern_owned(output.stdout)?))
}

fn fn_read_file(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let path = expect_str(vm, args[1], "$read_file() requires a path string.")?;
    let content = std::fs::read(&path)
        .map_err(|err| Panic::os_error(format!("Unable to read file '{path}': {err}.")))?;
    Ok(Value::Obj(vm.intern_owned(content)?))
}

fn fn_write_file(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let path = expect_str(vm, args[1], "$write_file() requires a path string.")?;
    let content_ref = vm.stringify_value(args[2])?;
    let content = vm.heap.str_obj(content_ref).as_bytes().to_vec();
    std::fs::write(&path, &content)
        .map_err(|err| Panic::os_error(format!("Unable to write file '{path}': {err}.")))?;
    Ok(Value::I64(content.len() as i64))
}

fn fn_str(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Obj(vm.stringify_value(args[1])?))
}

fn fn_debug(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Obj(vm.debugify_value(args[1])?))
}

fn fn_i64(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    match args[1] {
        Value::I64(n) => Ok(Value::I64(n)),
        Value::Char(c) => Ok(Value::I64(c as i64)),
        Value::F64(f) => match f.trunc().to_i64() {
            Some(n) if (i64::MIN as f64..=i64::MAX as f64).contains(&f) => Ok(Value::I64(n)),
            _ => Err(Panic::value_error("Float is out of range for $i64().").into()),
        },
        Value::Obj(obj_ref)
            if matches!(vm.heap.object(obj_ref).kind, ObjKind::Str(_)) =>
        {
            let text = vm.heap.str_obj(obj_ref).to_string_lossy();
            let cleaned: String = text.trim().chars().filter(|&c| c != '_').collect();
            match cleaned.parse::<i64>() {
                Ok(n) => Ok(Value::I64(n)),
                Err(_) => Err(Panic::value_error(format!(
                    "Unable to parse '{text}' as an integer.",
                ))
                .into()),
            }
        }
        _ => Err(Panic::type_error("Invalid operand type for $i64().").into()),
    }
}

fn fn_f64(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    match args[1] {
        Value::I64(n) => Ok(Value::F64(n as f64)),
        Value::F64(f) => Ok(Value::F64(f)),
        Value::Char(c) => Ok(Value::F64(c as u32 as f64)),
        Value::Obj(obj_ref)
            if matches!(vm.heap.object(obj_ref).kind, ObjKind::Str(_)) =>
        {
            let text = vm.heap.str_obj(obj_ref).to_string_lossy();
            let cleaned: String = text.trim().chars().filter(|&c| c != '_').collect();
            match cleaned.parse::<f64>() {
                Ok(f) => Ok(Value::F64(f)),
                Err(_) => Err(Panic::value_error(format!(
                    "Unable to parse '{text}' as a float.",
                ))
                .into()),
            }
        }
        _ => Err(Panic::type_error("Invalid operand type for $f64().").into()),
    }
}

fn fn_char(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    match args[1] {
        Value::Char(c) => Ok(Value::Char(c)),
        Value::I64(n) => {
            let out_of_range =
                || Panic::value_error("Integer is out of range for $char().");
            let cp = u32::try_from(n).map_err(|_| out_of_range())?;
            match char::from_u32(cp) {
                Some(c) => Ok(Value::Char(c)),
                None => Err(out_of_range().into()),
            }
        }
        _ => Err(Panic::type_error("Invalid operand type for $char().").into()),
    }
}

fn fn_bool(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Bool(vm.is_truthy(args[1])))
}

fn fn_hash(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let hash = vm.hash_value(args[1])?;
    Ok(Value::I64(hash as i64))
}

/// Substitutes successive arguments for `{}` / `{spec}` placeholders.
pub(crate) fn format_with_args(
    vm: &mut Vm,
    format_ref: ObjRef,
    args: &[Value],
) -> VmResult<Vec<u8>> {
    let format = vm.heap.str_obj(format_ref).as_bytes().to_vec();
    let mut out: Vec<u8> = Vec::with_capacity(format.len());
    let mut next_arg = 0usize;
    let mut index = 0usize;

    while index < format.len() {
        let byte = format[index];
        if byte != b'{' {
            out.push(byte);
            index += 1;
            continue;
        }
        if format.get(index + 1) == Some(&b'{') {
            out.push(b'{');
            index += 2;
            continue;
        }

        let close = format[index..]
            .iter()
            .position(|&b| b == b'}')
            .ok_or_else(|| Panic::value_error("Unmatched '{' in format string."))?;
        let spec_bytes = &format[index + 1..index + close];
        let spec = String::from_utf8_lossy(spec_bytes).into_owned();
        index += close + 1;

        if next_arg >= args.len() {
            return Err(
                Panic::args_error("Too few arguments for the format string.").into()
            );
        }
        let formatted = vm.format_value(args[next_arg], spec.trim_start_matches(':'))?;
        out.extend_from_slice(vm.heap.str_obj(formatted).as_bytes());
        next_arg += 1;
    }

    Ok(out)
}

fn fn_fmt(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    if args.len() < 2 {
        return Err(Panic::args_error("$fmt() requires a format string.").into());
    }
    let format_ref = match args[1] {
        Value::Obj(obj_ref)
            if matches!(vm.heap.object(obj_ref).kind, ObjKind::Str(_)) =>
        {
            obj_ref
        }
        _ => return Err(Panic::type_error("$fmt() requires a string as its first argument.").into()),
    };
    let out = format_with_args(vm, format_ref, &args[2..])?;
    Ok(Value::Obj(vm.intern_owned(out)?))
}

fn print_impl(vm: &mut Vm, args: &[Value], newline: bool, to_err: bool) -> VmResult<Value> {
    let bytes: Vec<u8> = if args.len() == 2 {
        let string = vm.stringify_value(args[1])?;
        vm.heap.str_obj(string).as_bytes().to_vec()
    } else if args.len() > 2 {
        let format_ref = match args[1] {
            Value::Obj(obj_ref)
                if matches!(vm.heap.object(obj_ref).kind, ObjKind::Str(_)) =>
            {
                obj_ref
            }
            _ => {
                return Err(Panic::type_error(
                    "The first argument to a print function must be a format string.",
                )
                .into())
            }
        };
        format_with_args(vm, format_ref, &args[2..])?
    } else {
        Vec::new()
    };

    let count = bytes.len() as i64 + if newline { 1 } else { 0 };
    if to_err {
        vm.write_err(format_args!("{}", String::from_utf8_lossy(&bytes)));
        if newline {
            vm.write_err(format_args!("\n"));
        }
    } else {
        if !vm.write_out_bytes(&bytes) {
            return Err(
                Panic::os_error("Failed to write to the standard output stream.").into(),
            );
        }
        if newline && !vm.write_out_bytes(b"\n") {
            return Err(
                Panic::os_error("Failed to write to the standard output stream.").into(),
            );
        }
    }
    Ok(Value::I64(count))
}

fn fn_print(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    print_impl(vm, args, false, false)
}

fn fn_println(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    print_impl(vm, args, true, false)
}

fn fn_eprint(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    print_impl(vm, args, false, true)
}

fn fn_eprintln(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    print_impl(vm, args, true, true)
}

fn fn_is_callable(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let callable = match args[1] {
        Value::Obj(obj_ref) => match vm.heap.tag(obj_ref) {
            crate::heap::ObjTag::Closure
            | crate::heap::ObjTag::NativeFn
            | crate::heap::ObjTag::Class
            | crate::heap::ObjTag::BoundMethod => true,
            crate::heap::ObjTag::Instance => vm.has_method(args[1], vm.canned.call)?,
            _ => false,
        },
        _ => false,
    };
    Ok(Value::Bool(callable))
}

fn fn_is_iterable(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let iterable = vm.has_method(args[1], vm.canned.iter)?;
    Ok(Value::Bool(iterable))
}

fn fn_is_iterator(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let is_iterator = vm.has_method(args[1], vm.canned.next)?;
    Ok(Value::Bool(is_iterator))
}

/// True if the value is an instance of the class or one of its
/// subclasses.
fn fn_is_instance(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let Value::Obj(class_ref) = args[2] else {
        return Err(Panic::type_error("$is_instance() requires a class.").into());
    };
    if !matches!(vm.heap.object(class_ref).kind, ObjKind::Class(_)) {
        return Err(Panic::type_error("$is_instance() requires a class.").into());
    }

    let mut current = vm.class_of(args[1]);
    while let Some(class) = current {
        if class == class_ref {
            return Ok(Value::Bool(true));
        }
        current = vm.heap.class(class).superclass;
    }
    Ok(Value::Bool(false))
}

fn fn_has_method(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let name = expect_str_ref(vm, args[2], "$has_method() requires a string name.")?;
    let has = vm.has_method(args[1], name)?;
    Ok(Value::Bool(has))
}

fn fn_has_field(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let name = expect_str_ref(vm, args[2], "$has_field() requires a string name.")?;
    let has = match vm.class_of(args[1]) {
        Some(class) => {
            let field_indexes = vm.heap.class(class).field_indexes;
            vm.map_contains(field_indexes, Value::Obj(name))?
        }
        None => false,
    };
    Ok(Value::Bool(has))
}

/// Returns an iterator over the argument, via its `$iter` method.
fn fn_iter(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    super::core_iter_of(vm, args[1])
}

/// `$range(stop)`, `$range(start, stop)` or `$range(start, stop, step)`.
fn fn_range(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    fn int_arg(value: Value) -> VmResult<i64> {
        match value {
            Value::I64(n) => Ok(n),
            _ => Err(Panic::type_error("$range() requires integer arguments.").into()),
        }
    }

    let (start, stop, step) = match args.len() - 1 {
        1 => (0, int_arg(args[1])?, 1),
        2 => (int_arg(args[1])?, int_arg(args[2])?, 1),
        3 => (int_arg(args[1])?, int_arg(args[2])?, int_arg(args[3])?),
        n => {
            return Err(Panic::args_error(format!(
                "Expected 1 to 3 arguments for $range(), found {n}.",
            ))
            .into())
        }
    };
    if step == 0 && start != stop {
        return Err(Panic::value_error("$range() step cannot be zero.").into());
    }

    let iter = vm.new_iter(PyroIter::new_range(start, stop, step))?;
    Ok(Value::Obj(iter))
}

pub(crate) fn expect_str(vm: &Vm, value: Value, message: &str) -> VmResult<String> {
    match value {
        Value::Obj(obj_ref)
            if matches!(vm.heap.object(obj_ref).kind, ObjKind::Str(_)) =>
        {
            Ok(vm.heap.str_obj(obj_ref).to_string_lossy())
        }
        _ => Err(Panic::type_error(message).into()),
    }
}

pub(crate) fn expect_str_ref(vm: &Vm, value: Value, message: &str) -> VmResult<ObjRef> {
    match value {
        Value::Obj(obj_ref)
            if matches!(vm.heap.object(obj_ref).kind, ObjKind::Str(_)) =>
        {
            Ok(obj_ref)
        }
        _ => Err(Panic::type_error(message).into()),
    }
}
