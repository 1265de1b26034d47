//! The Pyro virtual machine.
//!
//! A stack machine: the top-level program is compiled into a zero-arg
//! function and called as a closure whose module is `main_module`. Each
//! call pushes a [`CallFrame`] carrying an instruction pointer into the
//! closure's bytecode and a frame base pointer into the value stack.
//!
//! Every fallible operation returns [`VmResult`]; a panic unwinds through
//! `?` until an `Op::Try` handler catches it or one of the public entry
//! points reports it.

use std::time::Instant;

use hashbrown::HashMap;

use crate::error::{Halt, Panic, VmResult};
use crate::heap::{Heap, ObjKind, ObjTag};
use crate::io::OutputStream;
use crate::objects::{
    IterKind, MapKind, PyroBoundMethod, PyroBuf, PyroClass, PyroClosure, PyroFile, PyroFn,
    PyroInstance, PyroIter, PyroMap, PyroModule, PyroNativeFn, PyroQueue, PyroTup, PyroUpvalue,
    PyroVec, UpvalueState, VecKind, EMPTY_SLOT, TOMBSTONE_SLOT,
};
use crate::objects::{FileHandle, NativeFnPtr};
use crate::ops;
use crate::value::{ObjRef, Value};

/// The maximum number of call frames.
pub const MAX_CALL_FRAMES: usize = 1024;

/// The default maximum number of values on the stack.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 16;

/// A function call in progress: the executing closure, the instruction
/// pointer into its bytecode, and the frame base pointer into the value
/// stack (slot zero holds the callee or receiver).
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub closure: ObjRef,
    pub ip: usize,
    pub fp: usize,
}

/// The canned strings the VM interns at startup: protocol method names and
/// a few stringification constants.
pub(crate) struct CannedStrings {
    pub empty: ObjRef,
    pub true_: ObjRef,
    pub false_: ObjRef,
    pub null: ObjRef,
    pub init: ObjRef,
    pub str_: ObjRef,
    pub fmt: ObjRef,
    pub debug: ObjRef,
    pub iter: ObjRef,
    pub next: ObjRef,
    pub get_index: ObjRef,
    pub set_index: ObjRef,
    pub hash: ObjRef,
    pub call: ObjRef,
    pub contains: ObjRef,
    pub op_binary_plus: ObjRef,
    pub op_binary_minus: ObjRef,
    pub op_binary_star: ObjRef,
    pub op_binary_slash: ObjRef,
    pub op_binary_equals_equals: ObjRef,
    pub op_binary_less: ObjRef,
    pub op_binary_less_equals: ObjRef,
    pub op_binary_greater: ObjRef,
    pub op_binary_greater_equals: ObjRef,
    pub op_unary_plus: ObjRef,
    pub op_unary_minus: ObjRef,
}

/// The singleton classes of the builtin types.
pub(crate) struct CoreClasses {
    pub str_: ObjRef,
    pub map: ObjRef,
    pub set: ObjRef,
    pub tup: ObjRef,
    pub err: ObjRef,
    pub vec: ObjRef,
    pub stack: ObjRef,
    pub buf: ObjRef,
    pub queue: ObjRef,
    pub iter: ObjRef,
    pub file: ObjRef,
}

/// A loader for a builtin (`$std`) module.
pub type BuiltinModuleLoader = fn(&mut Vm, ObjRef) -> VmResult<()>;

/// The Pyro virtual machine. Each instance owns its heap, interned-string
/// table and module tree; objects are not safe to share across instances.
pub struct Vm {
    /// The managed heap.
    pub heap: Heap,

    /// The value stack.
    pub(crate) stack: Vec<Value>,

    /// The maximum number of values on the stack.
    pub(crate) stack_limit: usize,

    /// The call stack.
    pub(crate) frames: Vec<CallFrame>,

    /// Head of the linked list of open upvalues, sorted by stack slot with
    /// higher slots first.
    pub(crate) open_upvalues: Option<ObjRef>,

    /// VM-level global functions and variables, visible in all modules.
    pub(crate) globals: ObjRef,

    /// The tree of imported modules. A map object.
    pub(crate) modules: ObjRef,

    /// The module script files and the REPL execute in.
    pub(crate) main_module: ObjRef,

    /// Root directories checked when importing modules. A vec object.
    pub(crate) import_roots: ObjRef,

    /// The canned zero-length `Err` tuple: the iterator-exhausted
    /// sentinel, compared by identity.
    pub(crate) empty_error: ObjRef,

    pub(crate) canned: CannedStrings,
    pub(crate) classes: CoreClasses,

    /// Builtin module loaders, keyed by `$std` submodule name.
    pub(crate) builtin_modules: HashMap<&'static str, BuiltinModuleLoader>,

    /// Embedded module sources, compiled on first import.
    pub(crate) embedded_modules: HashMap<&'static str, &'static str>,

    /// Counts nested `try` expressions, for panic reporting.
    pub(crate) try_depth: usize,

    /// The status code of the last halt.
    pub(crate) status_code: i64,

    /// True when the VM is executing in a REPL.
    pub(crate) in_repl: bool,

    /// The program output stream.
    pub(crate) out: OutputStream,

    /// The diagnostics stream.
    pub(crate) err_out: OutputStream,

    /// For `$clock`.
    pub(crate) start_time: Instant,
}

fn must<T>(result: VmResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(_) => unreachable!("allocation cannot fail during VM construction"),
    }
}

impl Vm {
    /// Creates a new VM with the core library installed.
    pub fn new() -> Self {
        let mut heap = Heap::new();

        // The collector must stay off until the globals map and module
        // tree exist to serve as roots.
        heap.disallow_gc();

        // The string class must exist before any string is interned.
        let class_names = [
            "str", "map", "set", "tup", "err", "vec", "stack", "buf", "queue", "iter", "file",
        ];
        let mut class_refs = Vec::with_capacity(class_names.len());
        for _ in class_names {
            let methods = must(heap.alloc(ObjKind::Map(PyroMap::new(MapKind::Map)), None));
            let field_indexes = must(heap.alloc(ObjKind::Map(PyroMap::new(MapKind::Map)), None));
            let field_initializers =
                must(heap.alloc(ObjKind::Vec(PyroVec::new(VecKind::Vec)), None));
            let class = PyroClass::new(methods, field_indexes, field_initializers);
            class_refs.push(must(heap.alloc(ObjKind::Class(class), None)));
        }
        let classes = CoreClasses {
            str_: class_refs[0],
            map: class_refs[1],
            set: class_refs[2],
            tup: class_refs[3],
            err: class_refs[4],
            vec: class_refs[5],
            stack: class_refs[6],
            buf: class_refs[7],
            queue: class_refs[8],
            iter: class_refs[9],
            file: class_refs[10],
        };

        let str_class = Some(classes.str_);
        let mut intern = |heap: &mut Heap, text: &str| must(heap.intern(text.as_bytes(), str_class));

        for (index, &name) in class_names.iter().enumerate() {
            let name_ref = intern(&mut heap, name);
            heap.class_mut(class_refs[index]).name = Some(name_ref);
        }

        let canned = CannedStrings {
            empty: intern(&mut heap, ""),
            true_: intern(&mut heap, "true"),
            false_: intern(&mut heap, "false"),
            null: intern(&mut heap, "null"),
            init: intern(&mut heap, "$init"),
            str_: intern(&mut heap, "$str"),
            fmt: intern(&mut heap, "$fmt"),
            debug: intern(&mut heap, "$debug"),
            iter: intern(&mut heap, "$iter"),
            next: intern(&mut heap, "$next"),
            get_index: intern(&mut heap, "$get_index"),
            set_index: intern(&mut heap, "$set_index"),
            hash: intern(&mut heap, "$hash"),
            call: intern(&mut heap, "$call"),
            contains: intern(&mut heap, "$contains"),
            op_binary_plus: intern(&mut heap, "$op_binary_plus"),
            op_binary_minus: intern(&mut heap, "$op_binary_minus"),
            op_binary_star: intern(&mut heap, "$op_binary_star"),
            op_binary_slash: intern(&mut heap, "$op_binary_slash"),
            op_binary_equals_equals: intern(&mut heap, "$op_binary_equals_equals"),
            op_binary_less: intern(&mut heap, "$op_binary_less"),
            op_binary_less_equals: intern(&mut heap, "$op_binary_less_equals"),
            op_binary_greater: intern(&mut heap, "$op_binary_greater"),
            op_binary_greater_equals: intern(&mut heap, "$op_binary_greater_equals"),
            op_unary_plus: intern(&mut heap, "$op_unary_plus"),
            op_unary_minus: intern(&mut heap, "$op_unary_minus"),
        };

        let empty_error = must(heap.alloc(
            ObjKind::Tup(PyroTup::new_err(Vec::new())),
            Some(classes.err),
        ));

        let globals = must(heap.alloc(ObjKind::Map(PyroMap::new(MapKind::Map)), Some(classes.map)));
        let modules = must(heap.alloc(ObjKind::Map(PyroMap::new(MapKind::Map)), Some(classes.map)));
        let import_roots = must(heap.alloc(
            ObjKind::Vec(PyroVec::new(VecKind::Vec)),
            Some(classes.vec),
        ));

        let main_globals =
            must(heap.alloc(ObjKind::Map(PyroMap::new(MapKind::Map)), Some(classes.map)));
        let main_submodules =
            must(heap.alloc(ObjKind::Map(PyroMap::new(MapKind::Map)), Some(classes.map)));
        let main_module = must(heap.alloc(
            ObjKind::Module(PyroModule::new(main_globals, main_submodules)),
            None,
        ));

        let mut vm = Vm {
            heap,
            stack: Vec::new(),
            stack_limit: DEFAULT_STACK_SIZE,
            frames: Vec::new(),
            open_upvalues: None,
            globals,
            modules,
            main_module,
            import_roots,
            empty_error,
            canned,
            classes,
            builtin_modules: HashMap::new(),
            embedded_modules: HashMap::new(),
            try_depth: 0,
            status_code: 0,
            in_repl: false,
            out: OutputStream::Stdout,
            err_out: OutputStream::Stderr,
            start_time: Instant::now(),
        };

        must(crate::builtins::install(&mut vm));
        must(crate::imports::install_builtin_modules(&mut vm));
        must(vm.define_global("$roots", Value::Obj(vm.import_roots)));

        vm.heap.allow_gc();
        vm
    }

    // ------------------------------------------------------------------
    // Configuration.
    // ------------------------------------------------------------------

    /// Sets the maximum memory allocation in bytes.
    pub fn set_max_memory(&mut self, bytes: usize) {
        self.heap.set_max_bytes(bytes);
    }

    /// Sets the maximum number of values on the stack.
    pub fn set_stack_limit(&mut self, values: usize) {
        self.stack_limit = values.max(64);
    }

    /// Marks the VM as executing in a REPL: top-level expression statements
    /// echo their value.
    pub fn set_repl_mode(&mut self, in_repl: bool) {
        self.in_repl = in_repl;
    }

    /// Replaces the program output stream.
    pub fn set_output(&mut self, out: OutputStream) {
        self.out = out;
    }

    /// Replaces the diagnostics stream.
    pub fn set_error_output(&mut self, err_out: OutputStream) {
        self.err_out = err_out;
    }

    /// Returns the status code of the last halt.
    pub fn status_code(&self) -> i64 {
        self.status_code
    }

    /// Appends a directory to the list checked when importing modules.
    pub fn add_import_root(&mut self, path: &str) -> VmResult<()> {
        let root = self.intern(path)?;
        let before = self.heap.payload_size(self.import_roots);
        self.heap.vec_mut(self.import_roots).append(Value::Obj(root));
        self.heap.resize_tracked(self.import_roots, before)?;
        Ok(())
    }

    /// Sets the global `$args` tuple.
    pub fn set_args(&mut self, args: &[String]) -> VmResult<()> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let string = self.intern(arg)?;
            self.push(Value::Obj(string))?;
            values.push(Value::Obj(string));
        }
        let tup = self.new_tup(values)?;
        for _ in args {
            self.pop()?;
        }
        self.define_global("$args", Value::Obj(tup))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stack and frames.
    // ------------------------------------------------------------------

    /// Pushes a value onto the stack. Panics if the stack overflows.
    #[inline]
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() == self.stack_limit {
            return Err(Panic::out_of_memory().into());
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pops the top value from the stack.
    #[inline]
    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| Halt::from(Panic::error("Stack underflow.").hard()))
    }

    /// Peeks at a value on the stack without popping it. Distance 0 is the
    /// top of the stack.
    #[inline]
    pub fn peek(&self, distance: usize) -> VmResult<Value> {
        let len = self.stack.len();
        if distance < len {
            Ok(self.stack[len - 1 - distance])
        } else {
            Err(Panic::error("Stack underflow.").hard().into())
        }
    }

    pub(crate) fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn stack_value(&self, index: usize) -> Value {
        self.stack[index]
    }

    pub(crate) fn set_stack_value(&mut self, index: usize, value: Value) {
        self.stack[index] = value;
    }

    pub(crate) fn truncate_stack(&mut self, len: usize) {
        self.stack.truncate(len);
    }

    pub(crate) fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn frame_closure(&self, index: usize) -> ObjRef {
        self.frames[index].closure
    }

    pub(crate) fn open_upvalues_head(&self) -> Option<ObjRef> {
        self.open_upvalues
    }

    /// The fixed VM roots: module tree, canned objects, singleton classes.
    pub(crate) fn root_objects(&self) -> Vec<ObjRef> {
        let canned = &self.canned;
        let classes = &self.classes;
        vec![
            self.globals,
            self.modules,
            self.main_module,
            self.import_roots,
            self.empty_error,
            canned.empty,
            canned.true_,
            canned.false_,
            canned.null,
            canned.init,
            canned.str_,
            canned.fmt,
            canned.debug,
            canned.iter,
            canned.next,
            canned.get_index,
            canned.set_index,
            canned.hash,
            canned.call,
            canned.contains,
            canned.op_binary_plus,
            canned.op_binary_minus,
            canned.op_binary_star,
            canned.op_binary_slash,
            canned.op_binary_equals_equals,
            canned.op_binary_less,
            canned.op_binary_less_equals,
            canned.op_binary_greater,
            canned.op_binary_greater_equals,
            canned.op_unary_plus,
            canned.op_unary_minus,
            classes.str_,
            classes.map,
            classes.set,
            classes.tup,
            classes.err,
            classes.vec,
            classes.stack,
            classes.buf,
            classes.queue,
            classes.iter,
            classes.file,
        ]
    }

    pub(crate) fn current_frame(&self) -> VmResult<&CallFrame> {
        self.frames
            .last()
            .ok_or_else(|| Panic::error("No current call frame.").hard().into())
    }

    pub(crate) fn current_frame_mut(&mut self) -> VmResult<&mut CallFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| Panic::error("No current call frame.").hard().into())
    }

    /// Reads the next byte from the current frame's bytecode.
    #[inline]
    pub(crate) fn read_byte(&mut self) -> VmResult<u8> {
        let frame = *self.current_frame()?;
        let fun = self.heap.closure(frame.closure).fun;
        let byte = self.heap.fun(fun).code[frame.ip];
        self.current_frame_mut()?.ip += 1;
        Ok(byte)
    }

    /// Reads the next two bytes as a big-endian u16.
    #[inline]
    pub(crate) fn read_u16(&mut self) -> VmResult<u16> {
        let high = self.read_byte()?;
        let low = self.read_byte()?;
        Ok(((high as u16) << 8) | low as u16)
    }

    /// Reads a two-byte constant index and returns the constant.
    #[inline]
    pub(crate) fn read_constant(&mut self) -> VmResult<Value> {
        let index = self.read_u16()? as usize;
        let frame = *self.current_frame()?;
        let fun = self.heap.closure(frame.closure).fun;
        Ok(self.heap.fun(fun).constants[index])
    }

    /// Reads a two-byte constant index referencing a string constant.
    #[inline]
    pub(crate) fn read_string(&mut self) -> VmResult<ObjRef> {
        match self.read_constant()? {
            Value::Obj(obj_ref) if matches!(self.heap.object(obj_ref).kind, ObjKind::Str(_)) => {
                Ok(obj_ref)
            }
            _ => Err(Panic::error("Constant is not a string.").hard().into()),
        }
    }

    /// The module the current frame executes in.
    pub(crate) fn current_module(&self) -> VmResult<ObjRef> {
        let frame = self.current_frame()?;
        Ok(self.heap.closure(frame.closure).module)
    }

    // ------------------------------------------------------------------
    // Interning and object construction.
    // ------------------------------------------------------------------

    /// Creates or finds the interned string for `text`.
    pub fn intern(&mut self, text: &str) -> VmResult<ObjRef> {
        self.heap.intern(text.as_bytes(), Some(self.classes.str_))
    }

    /// Creates or finds the interned string for raw bytes.
    pub fn intern_bytes(&mut self, bytes: &[u8]) -> VmResult<ObjRef> {
        self.heap.intern(bytes, Some(self.classes.str_))
    }

    /// Creates or finds the interned string for an owned byte vector.
    pub fn intern_owned(&mut self, bytes: Vec<u8>) -> VmResult<ObjRef> {
        self.heap.intern_owned(bytes, Some(self.classes.str_))
    }

    /// The canned empty string.
    pub fn empty_string(&self) -> ObjRef {
        self.canned.empty
    }

    /// The canned zero-length `Err` tuple used as the iterator-exhausted
    /// sentinel.
    pub fn empty_error(&self) -> ObjRef {
        self.empty_error
    }

    pub fn new_tup(&mut self, values: Vec<Value>) -> VmResult<ObjRef> {
        self.heap
            .alloc(ObjKind::Tup(PyroTup::new(values)), Some(self.classes.tup))
    }

    pub fn new_err_tup(&mut self, values: Vec<Value>) -> VmResult<ObjRef> {
        self.heap
            .alloc(ObjKind::Tup(PyroTup::new_err(values)), Some(self.classes.err))
    }

    pub fn new_vec(&mut self, vec: PyroVec) -> VmResult<ObjRef> {
        let class = match vec.kind {
            VecKind::Vec => self.classes.vec,
            VecKind::Stack => self.classes.stack,
        };
        self.heap.alloc(ObjKind::Vec(vec), Some(class))
    }

    pub fn new_map(&mut self, kind: MapKind) -> VmResult<ObjRef> {
        let class = match kind {
            MapKind::Set => self.classes.set,
            _ => self.classes.map,
        };
        self.heap.alloc(ObjKind::Map(PyroMap::new(kind)), Some(class))
    }

    pub fn new_buf(&mut self, buf: PyroBuf) -> VmResult<ObjRef> {
        self.heap.alloc(ObjKind::Buf(buf), Some(self.classes.buf))
    }

    pub fn new_queue(&mut self) -> VmResult<ObjRef> {
        self.heap
            .alloc(ObjKind::Queue(PyroQueue::new()), Some(self.classes.queue))
    }

    pub fn new_iter(&mut self, iter: PyroIter) -> VmResult<ObjRef> {
        self.heap.alloc(ObjKind::Iter(iter), Some(self.classes.iter))
    }

    pub fn new_file(&mut self, handle: FileHandle) -> VmResult<ObjRef> {
        self.heap
            .alloc(ObjKind::File(PyroFile::new(handle)), Some(self.classes.file))
    }

    pub fn new_fn(&mut self, fun: PyroFn) -> VmResult<ObjRef> {
        self.heap.alloc(ObjKind::Fn(fun), None)
    }

    pub fn new_closure(&mut self, fun: ObjRef, module: ObjRef) -> VmResult<ObjRef> {
        self.heap
            .alloc(ObjKind::Closure(PyroClosure::new(fun, module)), None)
    }

    pub fn new_native(&mut self, name: &str, arity: i32, fun: NativeFnPtr) -> VmResult<ObjRef> {
        let name_ref = self.intern(name)?;
        self.heap
            .alloc(ObjKind::NativeFn(PyroNativeFn::new(fun, name_ref, arity)), None)
    }

    /// Creates a class with empty method and field tables.
    pub fn new_class(&mut self) -> VmResult<ObjRef> {
        let methods = self.new_map(MapKind::Map)?;
        self.push(Value::Obj(methods))?;
        let field_indexes = self.new_map(MapKind::Map)?;
        self.push(Value::Obj(field_indexes))?;
        let field_initializers = self.new_vec(PyroVec::new(VecKind::Vec))?;
        self.push(Value::Obj(field_initializers))?;
        let class = self.heap.alloc(
            ObjKind::Class(PyroClass::new(methods, field_indexes, field_initializers)),
            None,
        )?;
        self.pop()?;
        self.pop()?;
        self.pop()?;
        Ok(class)
    }

    /// Creates an instance of `class`, with fields copied from the class's
    /// field initializers.
    pub fn new_instance(&mut self, class: ObjRef) -> VmResult<ObjRef> {
        let initializers = self.heap.class(class).field_initializers;
        let fields = self.heap.vec(initializers).values().to_vec();
        self.heap
            .alloc(ObjKind::Instance(PyroInstance::new(fields)), Some(class))
    }

    pub fn new_bound_method(&mut self, receiver: Value, method: ObjRef) -> VmResult<ObjRef> {
        self.heap.alloc(
            ObjKind::BoundMethod(PyroBoundMethod::new(receiver, method)),
            None,
        )
    }

    /// Creates an empty module.
    pub fn new_module(&mut self) -> VmResult<ObjRef> {
        let globals = self.new_map(MapKind::Map)?;
        self.push(Value::Obj(globals))?;
        let submodules = self.new_map(MapKind::Map)?;
        self.push(Value::Obj(submodules))?;
        let module = self
            .heap
            .alloc(ObjKind::Module(PyroModule::new(globals, submodules)), None)?;
        self.pop()?;
        self.pop()?;
        Ok(module)
    }

    /// The main module: the context script files and the REPL execute in.
    pub fn main_module(&self) -> ObjRef {
        self.main_module
    }

    // ------------------------------------------------------------------
    // Truthiness, classes, method lookup.
    // ------------------------------------------------------------------

    /// `false`, `null` and any `Err` tuple are falsy; all else is truthy.
    pub fn is_truthy(&self, value: Value) -> bool {
        match value {
            Value::Bool(b) => b,
            Value::Null => false,
            Value::Obj(obj_ref) => !matches!(
                &self.heap.object(obj_ref).kind,
                ObjKind::Tup(tup) if tup.is_err
            ),
            _ => true,
        }
    }

    /// Returns true if the value is an `Err` tuple.
    pub fn is_err_value(&self, value: Value) -> bool {
        match value {
            Value::Obj(obj_ref) => {
                matches!(&self.heap.object(obj_ref).kind, ObjKind::Tup(tup) if tup.is_err)
            }
            _ => false,
        }
    }

    /// Returns the value's class, if it has one. Primitives have none.
    pub fn class_of(&self, value: Value) -> Option<ObjRef> {
        match value {
            Value::Obj(obj_ref) => self.heap.object(obj_ref).class,
            _ => None,
        }
    }

    /// Looks up `name` in the value's class's method table.
    pub fn get_method(&mut self, value: Value, name: ObjRef) -> VmResult<Option<Value>> {
        match self.class_of(value) {
            Some(class) => {
                let methods = self.heap.class(class).methods;
                self.map_get(methods, Value::Obj(name))
            }
            None => Ok(None),
        }
    }

    /// Returns true if the named method is defined for the value.
    pub fn has_method(&mut self, value: Value, name: ObjRef) -> VmResult<bool> {
        Ok(self.get_method(value, name)?.is_some())
    }

    // ------------------------------------------------------------------
    // Hashing.
    // ------------------------------------------------------------------

    /// Returns the value's 64-bit hash. Equal values hash equally,
    /// including across the numeric types: an f64 that equals an integer
    /// hashes as that integer.
    pub fn hash_value(&mut self, value: Value) -> VmResult<u64> {
        match value {
            Value::Null => Ok(123),
            Value::Bool(true) => Ok(456),
            Value::Bool(false) => Ok(789),
            Value::I64(n) => Ok(n as u64),
            Value::Char(c) => Ok(c as u64),
            Value::F64(f) => {
                if f >= -9_223_372_036_854_775_808.0
                    && f < 9_223_372_036_854_775_808.0
                    && f.floor() == f
                {
                    Ok(f as i64 as u64)
                } else {
                    Ok(f.to_bits())
                }
            }
            Value::Obj(obj_ref) => match self.heap.tag(obj_ref) {
                ObjTag::Str => Ok(self.heap.str_obj(obj_ref).hash),
                ObjTag::Tup => {
                    let values = self.heap.tup(obj_ref).values.to_vec();
                    let mut hash: u64 = 0xCBF2_9CE4_8422_2325;
                    for element in values {
                        let element_hash = self.hash_value(element)?;
                        hash = (hash ^ element_hash).wrapping_mul(0x100_0000_01B3);
                    }
                    Ok(hash)
                }
                ObjTag::Instance => {
                    let method = self.get_method(value, self.canned.hash)?;
                    match method {
                        Some(method) => {
                            self.push(value)?;
                            let result = self.call_method_value(method, 0)?;
                            match result {
                                Value::I64(n) => Ok(n as u64),
                                _ => Err(Panic::type_error("$hash() must return an integer.").into()),
                            }
                        }
                        None => Ok(Self::ref_hash(obj_ref)),
                    }
                }
                _ => Ok(Self::ref_hash(obj_ref)),
            },
            Value::Tombstone | Value::Empty => Ok(0),
        }
    }

    fn ref_hash(obj_ref: ObjRef) -> u64 {
        (obj_ref.0 as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    // ------------------------------------------------------------------
    // Map operations.
    //
    // Key hashing and equality can call into Pyro code, so the probe loops
    // copy each candidate key out of the heap before comparing.
    // ------------------------------------------------------------------

    /// Probes the map's index array for `key`. Returns the index-array
    /// position and the value stored there: an entry index, or a sentinel.
    /// For inserts, a first-tombstone position is returned in preference to
    /// the trailing empty slot.
    fn map_find_slot(&mut self, map_ref: ObjRef, key: Value) -> VmResult<(usize, i64)> {
        let hash = self.hash_value(key)?;
        let capacity = self.heap.map(map_ref).index_capacity();
        let mask = capacity - 1;
        let mut i = hash as usize & mask;
        let mut first_tombstone: Option<usize> = None;

        loop {
            let slot = self.heap.map(map_ref).index_array[i];
            match slot {
                EMPTY_SLOT => {
                    return Ok(match first_tombstone {
                        Some(t) => (t, TOMBSTONE_SLOT),
                        None => (i, EMPTY_SLOT),
                    });
                }
                TOMBSTONE_SLOT => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(i);
                    }
                }
                entry_index => {
                    let entry_key = self.heap.map(map_ref).entry_array[entry_index as usize].key;
                    if self.op_compare_eq(key, entry_key)? {
                        return Ok((i, entry_index));
                    }
                }
            }
            i = (i + 1) & mask;
        }
    }

    /// Doubles the map's index array and rebuilds it, compacting
    /// entry-array tombstones in the process.
    fn map_resize_index(&mut self, map_ref: ObjRef) -> VmResult<()> {
        let before = self.heap.payload_size(map_ref);

        let map = self.heap.map_mut(map_ref);
        map.compact_entries();
        let capacity = crate::objects::grow_capacity(map.index_capacity());
        map.reset_index(capacity);

        let entry_count = self.heap.map(map_ref).entry_array.len();
        for index in 0..entry_count {
            let key = self.heap.map(map_ref).entry_array[index].key;
            let hash = self.hash_value(key)?;
            self.heap.map_mut(map_ref).place_index(hash, index as i64);
        }

        self.heap.resize_tracked(map_ref, before)
    }

    /// Adds a new entry or updates an existing one. Returns true if a new
    /// entry was added, false if an existing entry was updated.
    pub fn map_set(&mut self, map_ref: ObjRef, key: Value, value: Value) -> VmResult<bool> {
        if self.heap.map(map_ref).index_capacity() == 0 {
            self.map_resize_index(map_ref)?;
        }

        let (mut slot, mut slot_value) = self.map_find_slot(map_ref, key)?;

        if slot_value == EMPTY_SLOT {
            // The load numerator counts tombstones, so check against the
            // threshold before claiming a fresh slot.
            let map = self.heap.map(map_ref);
            if map.index_array_count >= map.max_load_threshold {
                self.map_resize_index(map_ref)?;
                (slot, slot_value) = self.map_find_slot(map_ref, key)?;
            }
        }

        match slot_value {
            EMPTY_SLOT => {
                let before = self.heap.payload_size(map_ref);
                let map = self.heap.map_mut(map_ref);
                let index = map.append_entry(key, value);
                map.index_array[slot] = index;
                map.live_entry_count += 1;
                map.index_array_count += 1;
                self.heap.resize_tracked(map_ref, before)?;
                Ok(true)
            }
            TOMBSTONE_SLOT => {
                let before = self.heap.payload_size(map_ref);
                let map = self.heap.map_mut(map_ref);
                let index = map.append_entry(key, value);
                map.index_array[slot] = index;
                map.live_entry_count += 1;
                self.heap.resize_tracked(map_ref, before)?;
                Ok(true)
            }
            entry_index => {
                let map = self.heap.map_mut(map_ref);
                map.entry_array[entry_index as usize].key = key;
                map.entry_array[entry_index as usize].value = value;
                Ok(false)
            }
        }
    }

    /// Looks up `key`, returning its value if present.
    pub fn map_get(&mut self, map_ref: ObjRef, key: Value) -> VmResult<Option<Value>> {
        if self.heap.map(map_ref).is_empty() {
            return Ok(None);
        }
        let (_, slot_value) = self.map_find_slot(map_ref, key)?;
        if slot_value == EMPTY_SLOT || slot_value == TOMBSTONE_SLOT {
            Ok(None)
        } else {
            Ok(Some(
                self.heap.map(map_ref).entry_array[slot_value as usize].value,
            ))
        }
    }

    /// Returns true if the map contains `key`.
    pub fn map_contains(&mut self, map_ref: ObjRef, key: Value) -> VmResult<bool> {
        Ok(self.map_get(map_ref, key)?.is_some())
    }

    /// Updates an existing entry. Returns false if no entry was found.
    pub fn map_update_entry(&mut self, map_ref: ObjRef, key: Value, value: Value) -> VmResult<bool> {
        if self.heap.map(map_ref).is_empty() {
            return Ok(false);
        }
        let (_, slot_value) = self.map_find_slot(map_ref, key)?;
        if slot_value == EMPTY_SLOT || slot_value == TOMBSTONE_SLOT {
            return Ok(false);
        }
        let map = self.heap.map_mut(map_ref);
        map.entry_array[slot_value as usize].key = key;
        map.entry_array[slot_value as usize].value = value;
        Ok(true)
    }

    /// Removes `key`, leaving a tombstone. Returns false if absent.
    pub fn map_remove(&mut self, map_ref: ObjRef, key: Value) -> VmResult<bool> {
        if self.heap.map(map_ref).is_empty() {
            return Ok(false);
        }
        let (slot, slot_value) = self.map_find_slot(map_ref, key)?;
        if slot_value == EMPTY_SLOT || slot_value == TOMBSTONE_SLOT {
            return Ok(false);
        }
        let map = self.heap.map_mut(map_ref);
        map.entry_array[slot_value as usize].key = Value::Tombstone;
        map.entry_array[slot_value as usize].value = Value::Tombstone;
        map.index_array[slot] = TOMBSTONE_SLOT;
        map.live_entry_count -= 1;
        Ok(true)
    }

    /// Copies all live entries from `src` into `dst`, preserving order.
    pub fn map_copy_entries(&mut self, src: ObjRef, dst: ObjRef) -> VmResult<()> {
        let mut index = 0;
        loop {
            let entry = {
                let map = self.heap.map(src);
                if index >= map.entry_array.len() {
                    break;
                }
                map.entry_array[index]
            };
            index += 1;
            if entry.key.is_tombstone() {
                continue;
            }
            self.map_set(dst, entry.key, entry.value)?;
        }
        Ok(())
    }

    /// Creates a new map with the same kind and entries as `src`.
    pub fn map_copy(&mut self, src: ObjRef) -> VmResult<ObjRef> {
        let kind = self.heap.map(src).kind;
        let copy = self.new_map(kind)?;
        self.push(Value::Obj(copy))?;
        self.map_copy_entries(src, copy)?;
        self.pop()?;
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Globals.
    // ------------------------------------------------------------------

    /// Creates a VM-level global variable, visible in all modules.
    pub fn define_global(&mut self, name: &str, value: Value) -> VmResult<()> {
        self.push(value)?;
        let name_ref = self.intern(name)?;
        self.push(Value::Obj(name_ref))?;
        self.map_set(self.globals, Value::Obj(name_ref), value)?;
        self.pop()?;
        self.pop()?;
        Ok(())
    }

    /// Creates a VM-level global native function.
    pub fn define_global_fn(&mut self, name: &str, arity: i32, fun: NativeFnPtr) -> VmResult<()> {
        let native = self.new_native(name, arity, fun)?;
        self.define_global(name, Value::Obj(native))
    }

    /// Adds a native method to a class.
    pub fn define_method(
        &mut self,
        class: ObjRef,
        name: &str,
        arity: i32,
        fun: NativeFnPtr,
    ) -> VmResult<()> {
        let name_ref = self.intern(name)?;
        self.push(Value::Obj(name_ref))?;
        let native = self.new_native(name, arity, fun)?;
        self.push(Value::Obj(native))?;
        let methods = self.heap.class(class).methods;
        self.map_set(methods, Value::Obj(name_ref), Value::Obj(native))?;
        self.pop()?;
        self.pop()?;
        Ok(())
    }

    /// Adds a member to a module: a module-level global variable.
    pub fn define_member(&mut self, module: ObjRef, name: &str, value: Value) -> VmResult<()> {
        self.push(value)?;
        let name_ref = self.intern(name)?;
        self.push(Value::Obj(name_ref))?;
        let globals = self.heap.module(module).globals;
        self.map_set(globals, Value::Obj(name_ref), value)?;
        self.pop()?;
        self.pop()?;
        Ok(())
    }

    /// Adds a native function member to a module.
    pub fn define_member_fn(
        &mut self,
        module: ObjRef,
        name: &str,
        arity: i32,
        fun: NativeFnPtr,
    ) -> VmResult<()> {
        let native = self.new_native(name, arity, fun)?;
        self.define_member(module, name, Value::Obj(native))
    }

    // ------------------------------------------------------------------
    // Upvalues.
    // ------------------------------------------------------------------

    /// Captures the stack slot as an upvalue, reusing an existing open
    /// upvalue for the slot if one exists. The open list is sorted with
    /// higher slots first.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> VmResult<ObjRef> {
        let mut prev: Option<ObjRef> = None;
        let mut curr = self.open_upvalues;

        while let Some(curr_ref) = curr {
            let upvalue = self.heap.upvalue(curr_ref);
            match upvalue.open_slot() {
                Some(open_slot) if open_slot > slot => {
                    prev = Some(curr_ref);
                    curr = upvalue.next;
                }
                Some(open_slot) if open_slot == slot => return Ok(curr_ref),
                _ => break,
            }
        }

        let new_upvalue = self
            .heap
            .alloc(ObjKind::Upvalue(PyroUpvalue::open(slot)), None)?;
        self.heap.upvalue_mut(new_upvalue).next = curr;
        match prev {
            Some(prev_ref) => self.heap.upvalue_mut(prev_ref).next = Some(new_upvalue),
            None => self.open_upvalues = Some(new_upvalue),
        }
        Ok(new_upvalue)
    }

    /// Closes every open upvalue pointing at `from_slot` or any slot above
    /// it: the upvalue takes ownership of the stack value.
    pub(crate) fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(head) = self.open_upvalues {
            let slot = match self.heap.upvalue(head).open_slot() {
                Some(slot) if slot >= from_slot => slot,
                _ => break,
            };
            let value = self.stack[slot];
            let upvalue = self.heap.upvalue_mut(head);
            upvalue.state = UpvalueState::Closed(value);
            self.open_upvalues = upvalue.next;
        }
    }

    /// Reads through an upvalue.
    pub(crate) fn upvalue_value(&self, upvalue_ref: ObjRef) -> Value {
        match self.heap.upvalue(upvalue_ref).state {
            UpvalueState::Open(slot) => self.stack[slot],
            UpvalueState::Closed(value) => value,
        }
    }

    /// Writes through an upvalue.
    pub(crate) fn set_upvalue_value(&mut self, upvalue_ref: ObjRef, value: Value) {
        match self.heap.upvalue(upvalue_ref).state {
            UpvalueState::Open(slot) => self.stack[slot] = value,
            UpvalueState::Closed(_) => {
                self.heap.upvalue_mut(upvalue_ref).state = UpvalueState::Closed(value);
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls.
    // ------------------------------------------------------------------

    fn arity_error(&self, name: Option<ObjRef>, expected: i64, found: usize) -> Halt {
        let name = name
            .map(|n| self.heap.str_obj(n).to_string_lossy())
            .unwrap_or_else(|| "<fn>".to_string());
        Panic::args_error(format!(
            "Expected {} argument{} for {}(), found {}.",
            expected,
            if expected == 1 { "" } else { "s" },
            name,
            found,
        ))
        .into()
    }

    /// Pushes a call frame for a closure call. The callee and its
    /// arguments are already on the stack.
    pub(crate) fn call_closure(&mut self, closure: ObjRef, arg_count: usize) -> VmResult<()> {
        let fun = self.heap.closure(closure).fun;
        let arity = self.heap.fun(fun).arity as usize;
        if arg_count != arity {
            let name = self.heap.fun(fun).name;
            return Err(self.arity_error(name, arity as i64, arg_count));
        }

        if self.frames.len() == MAX_CALL_FRAMES {
            return Err(Panic::out_of_memory().into());
        }

        self.frames.push(CallFrame {
            closure,
            ip: 0,
            fp: self.stack.len() - arg_count - 1,
        });
        Ok(())
    }

    /// Calls a native function. Pops the callee and arguments, pushes the
    /// return value.
    pub(crate) fn call_native(&mut self, native: ObjRef, arg_count: usize) -> VmResult<()> {
        let (fun, arity, name) = {
            let native_fn = self.heap.native(native);
            (native_fn.fun, native_fn.arity, native_fn.name)
        };
        if !(arity == -1 || arity as usize == arg_count) {
            return Err(self.arity_error(Some(name), arity as i64, arg_count));
        }

        let base = self.stack.len() - arg_count - 1;
        let args: Vec<Value> = self.stack[base..].to_vec();
        let result = fun(self, &args)?;
        self.truncate_stack(base);
        self.push(result)
    }

    /// Calls a value. Dispatches on bound methods, classes (instance
    /// construction plus `$init`), closures, natives and callable
    /// instances.
    pub(crate) fn call_value(&mut self, callee: Value, arg_count: usize) -> VmResult<()> {
        if let Value::Obj(obj_ref) = callee {
            let base = self.stack.len() - arg_count - 1;
            match self.heap.tag(obj_ref) {
                ObjTag::BoundMethod => {
                    let receiver = self.heap.bound_method(obj_ref).receiver;
                    let method = self.heap.bound_method(obj_ref).method;
                    self.stack[base] = receiver;
                    return if self.heap.tag(method) == ObjTag::NativeFn {
                        self.call_native(method, arg_count)
                    } else {
                        self.call_closure(method, arg_count)
                    };
                }
                ObjTag::Class => {
                    let instance = self.new_instance(obj_ref)?;
                    self.stack[base] = Value::Obj(instance);

                    let methods = self.heap.class(obj_ref).methods;
                    let initializer = self.map_get(methods, Value::Obj(self.canned.init))?;
                    return match initializer {
                        Some(initializer) => self.call_value(initializer, arg_count),
                        None if arg_count != 0 => Err(Panic::args_error(format!(
                            "Expected 0 arguments for initializer, found {arg_count}.",
                        ))
                        .into()),
                        None => Ok(()),
                    };
                }
                ObjTag::Closure => return self.call_closure(obj_ref, arg_count),
                ObjTag::NativeFn => return self.call_native(obj_ref, arg_count),
                ObjTag::Instance => {
                    let call_method = self.get_method(callee, self.canned.call)?;
                    return match call_method {
                        Some(method) => self.call_value(method, arg_count),
                        None => Err(Panic::type_error("Object is not callable.").into()),
                    };
                }
                _ => {}
            }
        }
        Err(Panic::type_error("Object is not callable.").into())
    }

    /// Invokes a method looked up on an explicit class. The receiver sits
    /// at `peek(arg_count)`.
    pub(crate) fn invoke_method_from_class(
        &mut self,
        class: ObjRef,
        method_name: ObjRef,
        arg_count: usize,
    ) -> VmResult<()> {
        let methods = self.heap.class(class).methods;
        let method = self.map_get(methods, Value::Obj(method_name))?.ok_or_else(|| {
            Halt::from(Panic::name_error(format!(
                "Invalid method name '{}'.",
                self.heap.str_obj(method_name).to_string_lossy(),
            )))
        })?;

        match method {
            Value::Obj(method_ref) => {
                if self.heap.tag(method_ref) == ObjTag::NativeFn {
                    self.call_native(method_ref, arg_count)
                } else {
                    self.call_closure(method_ref, arg_count)
                }
            }
            _ => Err(Panic::type_error("Invalid method value.").into()),
        }
    }

    /// Invokes a method on the receiver at `peek(arg_count)`.
    pub(crate) fn invoke_method(&mut self, method_name: ObjRef, arg_count: usize) -> VmResult<()> {
        let receiver = self.peek(arg_count)?;
        match self.class_of(receiver) {
            Some(class) => self.invoke_method_from_class(class, method_name, arg_count),
            None => Err(Panic::type_error(format!(
                "Invalid method call '{}'.",
                self.heap.str_obj(method_name).to_string_lossy(),
            ))
            .into()),
        }
    }

    /// Calls a method value from native code. The receiver and arguments
    /// must already be on the stack; they and the return value are popped
    /// before this function returns.
    pub fn call_method_value(&mut self, method: Value, arg_count: usize) -> VmResult<Value> {
        match method {
            Value::Obj(method_ref)
                if matches!(self.heap.object(method_ref).kind, ObjKind::NativeFn(_)) =>
            {
                self.call_native(method_ref, arg_count)?;
                self.pop()
            }
            Value::Obj(method_ref)
                if matches!(self.heap.object(method_ref).kind, ObjKind::Closure(_)) =>
            {
                self.call_closure(method_ref, arg_count)?;
                self.run()?;
                self.pop()
            }
            _ => Err(Panic::type_error("Invalid method value.").into()),
        }
    }

    /// Calls a callable value from native code. The callee and arguments
    /// must already be on the stack; they and the return value are popped
    /// before this function returns.
    pub fn call_function_value(&mut self, arg_count: usize) -> VmResult<Value> {
        let callee = self.peek(arg_count)?;
        let frames_before = self.frames.len();
        self.call_value(callee, arg_count)?;
        if self.frames.len() > frames_before {
            self.run()?;
        }
        self.pop()
    }

    // ------------------------------------------------------------------
    // The dispatch loop.
    // ------------------------------------------------------------------

    /// Runs the interpreter until the frame that was on top when this call
    /// was entered returns. Nested loops are used for `try` expressions and
    /// for native code calling back into Pyro code.
    pub(crate) fn run(&mut self) -> VmResult<()> {
        let frame_count_on_entry = self.frames.len();
        debug_assert!(frame_count_on_entry >= 1);

        loop {
            // The collector's safepoint.
            if self.heap.should_collect() {
                self.collect_garbage();
            }

            let op = self.read_byte()?;
            ops::dispatch(self, op)?;

            if self.frames.len() < frame_count_on_entry {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Execution entry points.
    // ------------------------------------------------------------------

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    /// Compiles and executes `src` in the context of the main module.
    ///
    /// On a halt, reports it to the error stream, resets the stack, and
    /// returns the halt to the caller.
    pub fn exec_code_as_main(&mut self, src: &[u8], src_id: &str) -> VmResult<()> {
        self.status_code = 0;
        let result = self.exec_code_in_module(src, src_id, self.main_module);
        if let Err(halt) = &result {
            self.status_code = halt.status_code();
            self.report_halt(halt);
            self.reset_stack();
        }
        result
    }

    /// Loads and executes a source file in the context of the main module.
    pub fn exec_file_as_main(&mut self, path: &str) -> VmResult<()> {
        self.status_code = 0;
        let result = self.exec_file_in_module(path, self.main_module);
        if let Err(halt) = &result {
            self.status_code = halt.status_code();
            self.report_halt(halt);
            self.reset_stack();
        }
        result
    }

    /// Compiles and executes `src` in the context of `module`, without
    /// reporting halts. Used by the loader and the builtin-module
    /// registry.
    pub(crate) fn exec_code_in_module(
        &mut self,
        src: &[u8],
        src_id: &str,
        module: ObjRef,
    ) -> VmResult<()> {
        let fun = crate::compiler::compile(self, src, src_id)?;
        self.push(Value::Obj(fun))?;
        let closure = self.new_closure(fun, module)?;
        self.pop()?;

        self.push(Value::Obj(closure))?;
        self.call_value(Value::Obj(closure), 0)?;
        let result = self.run();
        if result.is_ok() {
            self.pop()?;
        }
        result
    }

    /// Loads and executes a source file in the context of `module`.
    pub(crate) fn exec_file_in_module(&mut self, path: &str, module: ObjRef) -> VmResult<()> {
        let path_string = self.intern(path)?;
        self.define_member(module, "$filepath", Value::Obj(path_string))?;

        let src = std::fs::read(path).map_err(|err| {
            Halt::from(Panic::os_error(format!("Unable to read file '{path}': {err}.")))
        })?;
        self.exec_code_in_module(&src, path, module)
    }

    /// Compiles `src` without executing it.
    pub fn try_compile_code(&mut self, src: &[u8], src_id: &str) -> VmResult<()> {
        let result = crate::compiler::compile(self, src, src_id).map(|_| ());
        if let Err(halt) = &result {
            self.status_code = halt.status_code();
            self.report_halt(halt);
        }
        result
    }

    /// Loads and compiles a file without executing it.
    pub fn try_compile_file(&mut self, path: &str) -> VmResult<()> {
        let src = match std::fs::read(path) {
            Ok(src) => src,
            Err(err) => {
                let halt = Halt::from(Panic::os_error(format!(
                    "Unable to read file '{path}': {err}.",
                )));
                self.status_code = halt.status_code();
                self.report_halt(&halt);
                return Err(halt);
            }
        };
        self.try_compile_code(&src, path)
    }

    /// Runs `$main()` if the main module defines it.
    pub fn run_main_func(&mut self) -> VmResult<()> {
        let name = self.intern("$main")?;
        let globals = self.heap.module(self.main_module).globals;
        let Some(main_value) = self.map_get(globals, Value::Obj(name))? else {
            return Ok(());
        };

        let result = (|| -> VmResult<()> {
            match main_value {
                Value::Obj(obj_ref)
                    if matches!(self.heap.object(obj_ref).kind, ObjKind::Closure(_)) =>
                {
                    let fun = self.heap.closure(obj_ref).fun;
                    if self.heap.fun(fun).arity != 0 {
                        return Err(
                            Panic::args_error("Invalid $main(), must take 0 arguments.").into()
                        );
                    }
                    self.push(main_value)?;
                    self.call_value(main_value, 0)?;
                    self.run()?;
                    self.pop()?;
                    Ok(())
                }
                _ => Err(Panic::type_error("Invalid $main, must be a function.").into()),
            }
        })();

        if let Err(halt) = &result {
            self.status_code = halt.status_code();
            self.report_halt(halt);
            self.reset_stack();
        }
        result
    }

    /// Finds the `$test_*` functions in the main module and runs each with
    /// zero arguments. A non-panicking call passes. Returns
    /// `(passed, failed)`; an `$exit()` or hard panic stops the run and is
    /// returned as the error.
    pub fn run_test_funcs(&mut self) -> VmResult<(usize, usize)> {
        let mut passed = 0;
        let mut failed = 0;

        for (name_ref, value) in self.prefixed_globals(b"$test_")? {
            let name = self.heap.str_obj(name_ref).to_string_lossy();

            let fun = self.heap.closure(value).fun;
            if self.heap.fun(fun).arity != 0 {
                self.write_out(format_args!("  INVALID {name} (takes arguments)\n"));
                failed += 1;
                continue;
            }

            self.push(Value::Obj(value))?;
            let result = self
                .call_value(Value::Obj(value), 0)
                .and_then(|_| self.run());

            match result {
                Ok(()) => {
                    self.pop()?;
                    passed += 1;
                }
                Err(halt) if halt.is_catchable() => {
                    self.write_out(format_args!("  FAIL {name}\n"));
                    self.reset_stack();
                    failed += 1;
                }
                Err(halt) => {
                    self.reset_stack();
                    return Err(halt);
                }
            }
        }

        Ok((passed, failed))
    }

    /// Finds the `$time_*` functions in the main module, runs each
    /// `num_runs` times, and reports the mean wall-clock time per call.
    pub fn run_time_funcs(&mut self, num_runs: usize) -> VmResult<()> {
        for (name_ref, value) in self.prefixed_globals(b"$time_")? {
            let name = self.heap.str_obj(name_ref).to_string_lossy();

            let fun = self.heap.closure(value).fun;
            if self.heap.fun(fun).arity != 0 {
                return Err(Panic::args_error(format!(
                    "Invalid timing function ({name}), takes arguments.",
                ))
                .into());
            }

            let start = Instant::now();
            for _ in 0..num_runs {
                self.push(Value::Obj(value))?;
                let result = self
                    .call_value(Value::Obj(value), 0)
                    .and_then(|_| self.run());
                match result {
                    Ok(()) => {
                        self.pop()?;
                    }
                    Err(halt) => {
                        self.reset_stack();
                        return Err(halt);
                    }
                }
            }
            let elapsed = start.elapsed().as_secs_f64();
            self.write_out(format_args!(
                "  {}()  {:.6} secs\n",
                name,
                elapsed / num_runs as f64,
            ));
        }
        Ok(())
    }

    /// Collects the main module's global closures whose interned names
    /// start with the given byte prefix, in insertion order.
    fn prefixed_globals(&mut self, prefix: &[u8]) -> VmResult<Vec<(ObjRef, ObjRef)>> {
        let globals = self.heap.module(self.main_module).globals;
        let mut found = Vec::new();
        for entry in self.heap.map(globals).live_entries() {
            let (Value::Obj(key), value) = (entry.key, entry.value) else {
                continue;
            };
            let ObjKind::Str(name) = &self.heap.object(key).kind else {
                continue;
            };
            if name.len() > prefix.len() && &name.as_bytes()[..prefix.len()] == prefix {
                if let Value::Obj(value_ref) = value {
                    if matches!(self.heap.object(value_ref).kind, ObjKind::Closure(_)) {
                        found.push((key, value_ref));
                    }
                }
            }
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Output and halt reporting.
    // ------------------------------------------------------------------

    /// Writes formatted text to the program output stream.
    pub(crate) fn write_out(&mut self, args: std::fmt::Arguments<'_>) {
        let _ = self.out.write_fmt(args);
    }

    /// Writes raw bytes to the program output stream. Returns false on an
    /// I/O failure.
    pub(crate) fn write_out_bytes(&mut self, bytes: &[u8]) -> bool {
        self.out.write_bytes(bytes).is_ok()
    }

    /// Writes formatted text to the diagnostics stream.
    pub(crate) fn write_err(&mut self, args: std::fmt::Arguments<'_>) {
        let _ = self.err_out.write_fmt(args);
    }

    /// Prints a halt report: the panic message with its source location,
    /// plus a stack trace when the panic occurred inside a function call.
    pub(crate) fn report_halt(&mut self, halt: &Halt) {
        let Halt::Panic(panic) = halt else {
            return;
        };

        if let (Some(source_id), Some(line)) = (&panic.source_id, panic.line) {
            let source_id = source_id.clone();
            self.write_err(format_args!("{source_id}:{line}\n  "));
        } else if let Some(frame) = self.frames.last().copied() {
            let fun = self.heap.closure(frame.closure).fun;
            let line = self.heap.fun(fun).line_for_offset(frame.ip.saturating_sub(1));
            let source_id = self
                .heap
                .fun(fun)
                .source_id
                .map(|s| self.heap.str_obj(s).to_string_lossy())
                .unwrap_or_else(|| "<source>".to_string());
            self.write_err(format_args!("{source_id}:{line}\n  "));
        }

        self.write_err(format_args!(
            "[{}] Error: {}\n",
            panic.code.as_i64(),
            panic.message,
        ));

        if self.frames.len() > 1 {
            self.write_err(format_args!("\n"));
            self.print_stack_trace();
        }
    }

    /// Prints the call stack in source-line terms, most recent function
    /// first.
    pub(crate) fn print_stack_trace(&mut self) {
        self.write_err(format_args!("Traceback (most recent function first):\n\n"));
        for index in (0..self.frames.len()).rev() {
            let frame = self.frames[index];
            let fun = self.heap.closure(frame.closure).fun;
            let line = if frame.ip > 0 {
                self.heap.fun(fun).line_for_offset(frame.ip - 1)
            } else {
                self.heap.fun(fun).first_line_number
            };
            let source_id = self
                .heap
                .fun(fun)
                .source_id
                .map(|s| self.heap.str_obj(s).to_string_lossy())
                .unwrap_or_else(|| "<source>".to_string());
            let name = self
                .heap
                .fun(fun)
                .name
                .map(|n| self.heap.str_obj(n).to_string_lossy())
                .unwrap_or_else(|| "<fn>".to_string());
            self.write_err(format_args!("{source_id}:{line}\n"));
            self.write_err(format_args!("  [{}] --> in {}\n", index + 1, name));
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_peek() {
        let mut vm = Vm::new();
        vm.push(Value::I64(1)).unwrap();
        vm.push(Value::I64(2)).unwrap();
        assert!(matches!(vm.peek(0).unwrap(), Value::I64(2)));
        assert!(matches!(vm.peek(1).unwrap(), Value::I64(1)));
        assert!(matches!(vm.pop().unwrap(), Value::I64(2)));
        assert!(matches!(vm.pop().unwrap(), Value::I64(1)));
    }

    #[test]
    fn test_stack_overflow_is_an_out_of_memory_panic() {
        let mut vm = Vm::new();
        vm.set_stack_limit(64);
        let mut result = Ok(());
        for _ in 0..100 {
            result = vm.push(Value::Null);
            if result.is_err() {
                break;
            }
        }
        match result {
            Err(Halt::Panic(panic)) => {
                assert_eq!(panic.code, crate::error::ErrorCode::OutOfMemory)
            }
            _ => panic!("expected stack overflow"),
        }
    }

    #[test]
    fn test_map_insertion_order_and_removal() {
        let mut vm = Vm::new();
        let map = vm.new_map(MapKind::Map).unwrap();
        vm.push(Value::Obj(map)).unwrap();

        for i in 0..20 {
            vm.map_set(map, Value::I64(i), Value::I64(i * 10)).unwrap();
        }
        assert!(vm.map_remove(map, Value::I64(3)).unwrap());
        assert!(!vm.map_remove(map, Value::I64(99)).unwrap());
        assert_eq!(vm.heap.map(map).count(), 19);

        let keys: Vec<i64> = vm
            .heap
            .map(map)
            .live_entries()
            .map(|entry| match entry.key {
                Value::I64(n) => n,
                _ => panic!("unexpected key"),
            })
            .collect();
        let expected: Vec<i64> = (0..20).filter(|&n| n != 3).collect();
        assert_eq!(keys, expected);

        assert_eq!(vm.map_get(map, Value::I64(3)).unwrap(), None);
        assert!(matches!(
            vm.map_get(map, Value::I64(4)).unwrap(),
            Some(Value::I64(40))
        ));
    }

    #[test]
    fn test_map_mixed_numeric_keys_collide() {
        let mut vm = Vm::new();
        let map = vm.new_map(MapKind::Map).unwrap();
        vm.push(Value::Obj(map)).unwrap();

        vm.map_set(map, Value::I64(1), Value::I64(100)).unwrap();
        // 1.0 == 1 and hashes identically, so this updates the entry.
        let added = vm.map_set(map, Value::F64(1.0), Value::I64(200)).unwrap();
        assert!(!added);
        assert_eq!(vm.heap.map(map).count(), 1);
    }

    #[test]
    fn test_upvalue_capture_is_unique_per_slot() {
        let mut vm = Vm::new();
        vm.push(Value::I64(42)).unwrap();

        let a = vm.capture_upvalue(0).unwrap();
        let b = vm.capture_upvalue(0).unwrap();
        assert_eq!(a, b);

        vm.close_upvalues(0);
        let c = vm.capture_upvalue(0).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_close_upvalues_takes_ownership() {
        let mut vm = Vm::new();
        vm.push(Value::I64(7)).unwrap();
        let upvalue = vm.capture_upvalue(0).unwrap();

        vm.close_upvalues(0);
        vm.pop().unwrap();

        assert!(matches!(vm.upvalue_value(upvalue), Value::I64(7)));
        vm.set_upvalue_value(upvalue, Value::I64(8));
        assert!(matches!(vm.upvalue_value(upvalue), Value::I64(8)));
    }

    #[test]
    fn test_truthiness() {
        let mut vm = Vm::new();
        assert!(!vm.is_truthy(Value::Null));
        assert!(!vm.is_truthy(Value::Bool(false)));
        assert!(vm.is_truthy(Value::Bool(true)));
        assert!(vm.is_truthy(Value::I64(0)));
        assert!(vm.is_truthy(Value::F64(0.0)));

        let err = vm.new_err_tup(vec![]).unwrap();
        assert!(!vm.is_truthy(Value::Obj(err)));
        let tup = vm.new_tup(vec![]).unwrap();
        assert!(vm.is_truthy(Value::Obj(tup)));
    }

    #[test]
    fn test_hash_equal_implies_equal_hash() {
        let mut vm = Vm::new();
        let int_hash = vm.hash_value(Value::I64(65)).unwrap();
        let float_hash = vm.hash_value(Value::F64(65.0)).unwrap();
        let char_hash = vm.hash_value(Value::Char('A')).unwrap();
        assert_eq!(int_hash, float_hash);
        assert_eq!(int_hash, char_hash);
    }
}
