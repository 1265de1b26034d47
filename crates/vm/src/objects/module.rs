//! Module objects.

use crate::value::ObjRef;

/// A named namespace: a globals map plus a submodule tree.
///
/// The loader inserts an empty module into its parent's submodule map
/// *before* the module's code executes, which is what makes cyclic imports
/// resolve to the partially-populated module instead of recursing forever.
#[derive(Debug)]
pub struct PyroModule {
    /// The module's global variables. A map object.
    pub globals: ObjRef,

    /// The module's submodules by name. A map object.
    pub submodules: ObjRef,
}

impl PyroModule {
    /// Creates a module with the given (empty) globals and submodule maps.
    pub fn new(globals: ObjRef, submodules: ObjRef) -> Self {
        Self {
            globals,
            submodules,
        }
    }
}
