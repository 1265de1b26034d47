//! Methods for the file type.

use std::fs::OpenOptions;
use std::io::BufReader;

use crate::error::{Panic, VmResult};
use crate::objects::{FileHandle, FileMode, IterKind, PyroIter};
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) -> VmResult<()> {
    vm.define_global_fn("$file", 2, fn_file)?;

    let file_class = vm.classes.file;
    vm.define_method(file_class, "close", 0, file_close)?;
    vm.define_method(file_class, "read", 0, file_read)?;
    vm.define_method(file_class, "read_string", 0, file_read)?;
    vm.define_method(file_class, "read_line", 0, file_read_line)?;
    vm.define_method(file_class, "lines", 0, file_lines)?;
    vm.define_method(file_class, "write", -1, file_write)?;
    vm.define_method(file_class, "$iter", 0, file_lines)?;
    Ok(())
}

fn receiver(args: &[Value]) -> VmResult<ObjRef> {
    match args[0] {
        Value::Obj(obj_ref) => Ok(obj_ref),
        _ => Err(Panic::type_error("Invalid receiver.").into()),
    }
}

/// `$file(path, mode)` opens a file with an fopen-style mode string.
fn fn_file(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let path = super::core::expect_str(vm, args[1], "$file() requires a path string.")?;
    let mode_text = super::core::expect_str(vm, args[2], "$file() requires a mode string.")?;
    let mode = FileMode::parse(&mode_text)
        .ok_or_else(|| Panic::value_error(format!("Invalid file mode '{mode_text}'.")))?;

    let handle = if mode.contains(FileMode::READ) && !mode.contains(FileMode::WRITE) {
        let file = std::fs::File::open(&path)
            .map_err(|err| Panic::os_error(format!("Unable to open file '{path}': {err}.")))?;
        FileHandle::Read(BufReader::new(file))
    } else {
        let mut options = OpenOptions::new();
        options.write(true);
        if mode.contains(FileMode::APPEND) {
            options.append(true).create(true);
        } else {
            options.truncate(true).create(true);
        }
        let file = options
            .open(&path)
            .map_err(|err| Panic::os_error(format!("Unable to open file '{path}': {err}.")))?;
        FileHandle::Write(file)
    };

    Ok(Value::Obj(vm.new_file(handle)?))
}

fn file_close(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let file = receiver(args)?;
    vm.heap.file_mut(file).close();
    Ok(Value::Null)
}

/// Reads the remainder of the stream as a string.
fn file_read(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let file = receiver(args)?;
    let bytes = vm
        .heap
        .file_mut(file)
        .read_to_end_bytes()
        .map_err(|err| Panic::os_error(format!("Failed to read file: {err}.")))?;
    Ok(Value::Obj(vm.intern_owned(bytes)?))
}

/// Reads the next line, or returns null at end of file.
fn file_read_line(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let file = receiver(args)?;
    let line = vm
        .heap
        .file_mut(file)
        .read_line_bytes()
        .map_err(|err| Panic::os_error(format!("Failed to read file: {err}.")))?;
    match line {
        Some(bytes) => Ok(Value::Obj(vm.intern_owned(bytes)?)),
        None => Ok(Value::Null),
    }
}

fn file_lines(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let file = receiver(args)?;
    let iter = vm.new_iter(PyroIter::new(file, IterKind::FileLines))?;
    Ok(Value::Obj(iter))
}

/// Writes the string form of each argument. Returns the byte count.
fn file_write(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let file = receiver(args)?;
    let mut written = 0i64;
    for value in &args[1..] {
        let string = vm.stringify_value(*value)?;
        let bytes = vm.heap.str_obj(string).as_bytes().to_vec();
        written += bytes.len() as i64;
        vm.heap
            .file_mut(file)
            .write_bytes(&bytes)
            .map_err(|err| Panic::os_error(format!("Failed to write to file: {err}.")))?;
    }
    Ok(Value::I64(written))
}
