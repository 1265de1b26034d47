//! Closures and upvalues.

use crate::value::{ObjRef, Value};

/// A callable binding a function's bytecode to the upvalues that were live
/// when it was constructed, plus the module it executes in.
#[derive(Debug)]
pub struct PyroClosure {
    /// The compiled function.
    pub fun: ObjRef,

    /// The module whose globals the closure reads and writes.
    pub module: ObjRef,

    /// The resolved upvalues, one per captured variable.
    pub upvalues: Vec<ObjRef>,
}

impl PyroClosure {
    /// Creates a closure over `fun` in `module`. The upvalue array is
    /// filled in by the `MakeClosure` instruction.
    pub fn new(fun: ObjRef, module: ObjRef) -> Self {
        Self {
            fun,
            module,
            upvalues: Vec::new(),
        }
    }

    /// The number of heap bytes owned by this object's payload.
    pub(crate) fn payload_size(&self) -> usize {
        self.upvalues.capacity() * std::mem::size_of::<ObjRef>()
    }
}

/// Where an upvalue's value currently lives.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    /// The variable is still on the VM value stack, at this slot.
    Open(usize),

    /// The variable has been closed over and the upvalue owns it.
    Closed(Value),
}

/// The runtime representation of a closed-over variable.
///
/// Open upvalues form a linked list threaded through `next`, sorted by
/// stack slot with higher slots first. At most one upvalue object exists
/// per live stack slot.
#[derive(Debug)]
pub struct PyroUpvalue {
    /// Open (points at a stack slot) or closed (owns its value).
    pub state: UpvalueState,

    /// The next open upvalue, at an equal-or-lower stack slot.
    pub next: Option<ObjRef>,
}

impl PyroUpvalue {
    /// Creates an open upvalue pointing at a stack slot.
    pub fn open(slot: usize) -> Self {
        Self {
            state: UpvalueState::Open(slot),
            next: None,
        }
    }

    /// Returns the stack slot if the upvalue is open.
    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }
}
