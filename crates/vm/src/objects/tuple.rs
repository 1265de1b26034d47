//! Tuple objects.

use crate::value::Value;

/// A fixed-length value array.
///
/// Tuples come in two flavors: plain, and `Err`. An `Err` tuple is the
/// language's signalling value — it is falsy, it satisfies `$is_err()`, and
/// the canned zero-length `Err` is the iterator-exhausted sentinel.
#[derive(Debug)]
pub struct PyroTup {
    /// True for the `Err` flavor.
    pub is_err: bool,

    /// The tuple's elements.
    pub values: Box<[Value]>,
}

impl PyroTup {
    /// Creates a plain tuple from its elements.
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            is_err: false,
            values: values.into_boxed_slice(),
        }
    }

    /// Creates an `Err`-flavored tuple from its elements.
    pub fn new_err(values: Vec<Value>) -> Self {
        Self {
            is_err: true,
            values: values.into_boxed_slice(),
        }
    }

    /// Returns the number of elements.
    #[inline]
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// The number of heap bytes owned by this object's payload.
    pub(crate) fn payload_size(&self) -> usize {
        self.values.len() * std::mem::size_of::<Value>()
    }
}
