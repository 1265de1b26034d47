//! Iterator objects.

use crate::value::ObjRef;

/// The iterator state machine's variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterKind {
    /// Over a vector's elements.
    Vec,

    /// Over a tuple's elements.
    Tup,

    /// Over a queue's values, front to back.
    Queue,

    /// Over a string's bytes, as i64 values.
    StrBytes,

    /// Over a string's code points, as chars.
    StrChars,

    /// Over a string's lines, as strings.
    StrLines,

    /// Over a map's keys in insertion order.
    MapKeys,

    /// Over a map's values in insertion order.
    MapValues,

    /// Over a map's entries as two-element tuples.
    MapEntries,

    /// Over an arithmetic range.
    Range,

    /// Wraps a source iterator, pairing each value with a counter.
    Enumerate,

    /// Wraps a source iterator, applying a callback to each value.
    FuncMap,

    /// Wraps a source iterator, keeping values the callback accepts.
    FuncFilter,

    /// Wraps a source iterator, dropping the first N values.
    SkipFirst,

    /// Wraps a source iterator, dropping the last N values.
    SkipLast,

    /// Over a file's lines.
    FileLines,

    /// Delegates to the source object's `$next` method.
    Generic,
}

/// A built-in iterator: a tagged state machine over a source object.
///
/// `$next` returns the next value, or the canned empty-`Err` tuple
/// (compared by identity) once the sequence is exhausted.
#[derive(Debug)]
pub struct PyroIter {
    /// The object being iterated. Cleared by the line-based variants once
    /// exhausted.
    pub source: Option<ObjRef>,

    /// Which state machine this iterator runs.
    pub kind: IterKind,

    /// Cursor into the source, for the indexable variants.
    pub next_index: usize,

    /// The enumerate counter.
    pub next_enum: i64,

    /// Range state.
    pub range_next: i64,
    pub range_stop: i64,
    pub range_step: i64,

    /// Skip count for SkipFirst / SkipLast; SkipFirst decrements it to
    /// zero, SkipLast uses it as its lookahead distance.
    pub skip_count: usize,

    /// Buffered lookahead for SkipLast.
    pub lookahead: Vec<crate::value::Value>,

    /// The callback for the map / filter variants.
    pub callback: Option<ObjRef>,
}

impl PyroIter {
    /// Creates an iterator over `source`.
    pub fn new(source: ObjRef, kind: IterKind) -> Self {
        Self {
            source: Some(source),
            kind,
            next_index: 0,
            next_enum: 0,
            range_next: 0,
            range_stop: 0,
            range_step: 0,
            skip_count: 0,
            lookahead: Vec::new(),
            callback: None,
        }
    }

    /// Creates a range iterator. A zero step produces an empty sequence.
    pub fn new_range(start: i64, stop: i64, step: i64) -> Self {
        Self {
            source: None,
            kind: IterKind::Range,
            next_index: 0,
            next_enum: 0,
            range_next: start,
            range_stop: stop,
            range_step: step,
            skip_count: 0,
            lookahead: Vec::new(),
            callback: None,
        }
    }

    /// The number of heap bytes owned by this object's payload.
    pub(crate) fn payload_size(&self) -> usize {
        self.lookahead.capacity() * std::mem::size_of::<crate::value::Value>()
    }
}
