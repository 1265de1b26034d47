//! Native function objects.

use crate::error::VmResult;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

/// The signature of a natively-implemented function or method.
///
/// `args[0]` is the receiver for methods, or the callee value itself for
/// global functions; `args[1..]` are the call arguments. The values are
/// copied off the VM stack before the call, so natives that allocate must
/// push any object they need to keep alive onto the VM stack around
/// re-entrant calls.
pub type NativeFnPtr = fn(&mut Vm, &[Value]) -> VmResult<Value>;

/// A function implemented in Rust.
#[derive(Debug)]
pub struct PyroNativeFn {
    /// The function pointer.
    pub fun: NativeFnPtr,

    /// The function's name, for error messages. Interned string.
    pub name: ObjRef,

    /// The number of arguments required. -1 means variadic.
    pub arity: i32,
}

impl PyroNativeFn {
    /// Creates a native function object.
    pub fn new(fun: NativeFnPtr, name: ObjRef, arity: i32) -> Self {
        Self { fun, name, arity }
    }

    /// Returns true if the function accepts `count` arguments.
    pub fn accepts(&self, count: usize) -> bool {
        self.arity == -1 || self.arity as usize == count
    }
}
