//! Opaque resource pointers.

use std::any::Any;

/// The free callback invoked when the resource is finalized.
pub type FreeResourceFn = fn(&mut dyn Any);

/// An opaque payload owned by the VM on behalf of an embedder, with an
/// explicit free callback the collector invokes on finalization.
pub struct PyroResource {
    /// The embedder's payload.
    pub payload: Box<dyn Any>,

    /// Called exactly once, when the object is finalized.
    pub free: Option<FreeResourceFn>,
}

impl PyroResource {
    /// Wraps a payload with its free callback.
    pub fn new(payload: Box<dyn Any>, free: Option<FreeResourceFn>) -> Self {
        Self { payload, free }
    }

    /// Runs the free callback, at most once.
    pub fn finalize(&mut self) {
        if let Some(free) = self.free.take() {
            free(self.payload.as_mut());
        }
    }
}

impl std::fmt::Debug for PyroResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PyroResource")
            .field("has_free_callback", &self.free.is_some())
            .finish()
    }
}
