//! Classes, instances and bound methods.

use crate::value::{ObjRef, Value};

/// A class: method table, field layout and field initializers.
///
/// Inheritance is copy-down: `class B < A` copies A's method table, field
/// index map and field initializer vector into B before B's own
/// declarations run, so method lookup never walks the superclass chain at
/// runtime. Inherited fields keep their indices from the superclass.
#[derive(Debug)]
pub struct PyroClass {
    /// The class name. Interned string; `None` for anonymous classes.
    pub name: Option<ObjRef>,

    /// Method-name string to closure or native function. A map object.
    pub methods: ObjRef,

    /// Field-name string to field index. A map object.
    pub field_indexes: ObjRef,

    /// Initial field values, indexed by field index. A vector object.
    pub field_initializers: ObjRef,

    /// The superclass, if any.
    pub superclass: Option<ObjRef>,
}

impl PyroClass {
    /// Creates a class with the given (empty) method and field tables.
    pub fn new(methods: ObjRef, field_indexes: ObjRef, field_initializers: ObjRef) -> Self {
        Self {
            name: None,
            methods,
            field_indexes,
            field_initializers,
            superclass: None,
        }
    }
}

/// An instance: its class plus a dense field array.
///
/// The field array is indexed by the class's field-index map; the class
/// pointer itself lives in the object header.
#[derive(Debug)]
pub struct PyroInstance {
    /// The field values, initialized from the class's field initializers.
    pub fields: Vec<Value>,
}

impl PyroInstance {
    /// Creates an instance with the given initial field values.
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    /// The number of heap bytes owned by this object's payload.
    pub(crate) fn payload_size(&self) -> usize {
        self.fields.capacity() * std::mem::size_of::<Value>()
    }
}

/// A receiver paired with a method, ready to call.
#[derive(Debug)]
pub struct PyroBoundMethod {
    /// The receiver the method was bound to.
    pub receiver: Value,

    /// The method: a closure or a native function.
    pub method: ObjRef,
}

impl PyroBoundMethod {
    /// Binds `method` to `receiver`.
    pub fn new(receiver: Value, method: ObjRef) -> Self {
        Self { receiver, method }
    }
}
