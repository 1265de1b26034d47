//! Heap object kinds for the Pyro virtual machine.
//!
//! Each module implements one object kind. The objects themselves are plain
//! data; operations that can call back into Pyro code (map probing with
//! instance keys, iterator callbacks, operator overloads) live on the VM.

mod buffer;
mod class;
mod closure;
mod file;
mod func;
mod iterator;
mod map;
mod module;
mod native;
mod queue;
mod resource;
mod string;
mod tuple;
mod vector;

pub use buffer::PyroBuf;
pub use class::{PyroBoundMethod, PyroClass, PyroInstance};
pub use closure::{PyroClosure, PyroUpvalue, UpvalueState};
pub use file::{FileHandle, FileMode, PyroFile};
pub use func::PyroFn;
pub use iterator::{IterKind, PyroIter};
pub use map::{MapEntry, MapKind, PyroMap, EMPTY_SLOT, TOMBSTONE_SLOT};
pub use module::PyroModule;
pub use native::{NativeFnPtr, PyroNativeFn};
pub use queue::PyroQueue;
pub use resource::PyroResource;
pub use string::{unescape_bytes, PyroStr};
pub use tuple::PyroTup;
pub use vector::{PyroVec, VecKind};

/// The shared growth discipline for dynamic arrays: capacity doubles, with a
/// floor of eight slots.
pub(crate) fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 {
        8
    } else {
        capacity * 2
    }
}
