//! The built-in iterator state machine.
//!
//! `iter_next` advances a built-in [`PyroIter`]; the adapters (`map`,
//! `filter`, `enumerate`, `skip_first`, `skip_last`) wrap a source iterator
//! and a callback and perform at most one source pull plus one callback
//! call per `next`. Exhaustion is signalled by returning the canned
//! zero-length `Err` tuple, which callers compare by identity.

use crate::error::{Panic, VmResult};
use crate::heap::ObjKind;
use crate::objects::IterKind;
use crate::utf8;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

impl Vm {
    /// Returns the next value from a built-in iterator, or the exhausted
    /// sentinel. Adapter callbacks can call into Pyro code.
    pub fn iter_next(&mut self, iter_ref: ObjRef) -> VmResult<Value> {
        let kind = self.heap.iter(iter_ref).kind;
        let exhausted = Value::Obj(self.empty_error);

        match kind {
            IterKind::Vec => {
                let Some(source) = self.heap.iter(iter_ref).source else {
                    return Ok(exhausted);
                };
                let index = self.heap.iter(iter_ref).next_index;
                if index < self.heap.vec(source).count() {
                    self.heap.iter_mut(iter_ref).next_index += 1;
                    Ok(self.heap.vec(source).values()[index])
                } else {
                    Ok(exhausted)
                }
            }

            IterKind::Tup => {
                let Some(source) = self.heap.iter(iter_ref).source else {
                    return Ok(exhausted);
                };
                let index = self.heap.iter(iter_ref).next_index;
                if index < self.heap.tup(source).count() {
                    self.heap.iter_mut(iter_ref).next_index += 1;
                    Ok(self.heap.tup(source).values[index])
                } else {
                    Ok(exhausted)
                }
            }

            IterKind::Queue => {
                let Some(source) = self.heap.iter(iter_ref).source else {
                    return Ok(exhausted);
                };
                let index = self.heap.iter(iter_ref).next_index;
                match self.heap.queue(source).get(index) {
                    Some(value) => {
                        self.heap.iter_mut(iter_ref).next_index += 1;
                        Ok(value)
                    }
                    None => Ok(exhausted),
                }
            }

            IterKind::StrBytes => {
                let Some(source) = self.heap.iter(iter_ref).source else {
                    return Ok(exhausted);
                };
                let index = self.heap.iter(iter_ref).next_index;
                match self.heap.str_obj(source).as_bytes().get(index) {
                    Some(&byte) => {
                        self.heap.iter_mut(iter_ref).next_index += 1;
                        Ok(Value::I64(byte as i64))
                    }
                    None => Ok(exhausted),
                }
            }

            IterKind::StrChars => {
                let Some(source) = self.heap.iter(iter_ref).source else {
                    return Ok(exhausted);
                };
                let index = self.heap.iter(iter_ref).next_index;
                let bytes = self.heap.str_obj(source).as_bytes();
                if index >= bytes.len() {
                    return Ok(exhausted);
                }
                match utf8::read_utf8_codepoint(&bytes[index..]) {
                    Some(cp) => {
                        self.heap.iter_mut(iter_ref).next_index += cp.length;
                        match char::from_u32(cp.value) {
                            Some(c) => Ok(Value::Char(c)),
                            None => Err(Panic::value_error(
                                "String contains an invalid code point.",
                            )
                            .into()),
                        }
                    }
                    None => Err(Panic::value_error(format!(
                        "String contains invalid utf-8 at byte index {index}.",
                    ))
                    .into()),
                }
            }

            IterKind::StrLines => self.str_lines_next(iter_ref, exhausted),

            IterKind::MapKeys | IterKind::MapValues | IterKind::MapEntries => {
                self.map_iter_next(iter_ref, kind, exhausted)
            }

            IterKind::Range => {
                let (next, stop, step) = {
                    let iter = self.heap.iter(iter_ref);
                    (iter.range_next, iter.range_stop, iter.range_step)
                };
                let yields = (step > 0 && next < stop) || (step < 0 && next > stop);
                if yields {
                    self.heap.iter_mut(iter_ref).range_next = next.wrapping_add(step);
                    Ok(Value::I64(next))
                } else {
                    Ok(exhausted)
                }
            }

            IterKind::Enumerate => {
                let source = self.source_iter(iter_ref)?;
                let next_value = self.iter_next(source)?;
                if self.is_err_value(next_value) {
                    return Ok(next_value);
                }
                let counter = self.heap.iter(iter_ref).next_enum;
                self.heap.iter_mut(iter_ref).next_enum += 1;

                self.push(next_value)?;
                let tup = self.new_tup(vec![Value::I64(counter), next_value])?;
                self.pop()?;
                Ok(Value::Obj(tup))
            }

            IterKind::FuncMap => {
                let source = self.source_iter(iter_ref)?;
                let next_value = self.iter_next(source)?;
                if self.is_err_value(next_value) {
                    return Ok(next_value);
                }
                let callback = self.iter_callback(iter_ref)?;
                self.push(Value::Obj(callback))?;
                self.push(next_value)?;
                self.call_function_value(1)
            }

            IterKind::FuncFilter => {
                let source = self.source_iter(iter_ref)?;
                let callback = self.iter_callback(iter_ref)?;
                loop {
                    let next_value = self.iter_next(source)?;
                    if self.is_err_value(next_value) {
                        return Ok(next_value);
                    }
                    self.push(Value::Obj(callback))?;
                    self.push(next_value)?;
                    let keep = self.call_function_value(1)?;
                    if self.is_truthy(keep) {
                        return Ok(next_value);
                    }
                }
            }

            IterKind::SkipFirst => {
                let source = self.source_iter(iter_ref)?;
                while self.heap.iter(iter_ref).skip_count > 0 {
                    self.heap.iter_mut(iter_ref).skip_count -= 1;
                    let skipped = self.iter_next(source)?;
                    if self.is_err_value(skipped) {
                        return Ok(skipped);
                    }
                }
                self.iter_next(source)
            }

            IterKind::SkipLast => {
                let source = self.source_iter(iter_ref)?;
                let window = self.heap.iter(iter_ref).skip_count + 1;
                while self.heap.iter(iter_ref).lookahead.len() < window {
                    let next_value = self.iter_next(source)?;
                    if self.is_err_value(next_value) {
                        return Ok(next_value);
                    }
                    self.heap.iter_mut(iter_ref).lookahead.push(next_value);
                }
                Ok(self.heap.iter_mut(iter_ref).lookahead.remove(0))
            }

            IterKind::FileLines => {
                let Some(source) = self.heap.iter(iter_ref).source else {
                    return Ok(exhausted);
                };
                let line = self
                    .heap
                    .file_mut(source)
                    .read_line_bytes()
                    .map_err(|err| Panic::os_error(format!("Failed to read file: {err}.")))?;
                match line {
                    Some(bytes) => Ok(Value::Obj(self.intern_owned(bytes)?)),
                    None => {
                        self.heap.iter_mut(iter_ref).source = None;
                        Ok(exhausted)
                    }
                }
            }

            IterKind::Generic => {
                let Some(source) = self.heap.iter(iter_ref).source else {
                    return Ok(exhausted);
                };
                let source_value = Value::Obj(source);
                let method = self
                    .get_method(source_value, self.canned.next)?
                    .ok_or_else(|| Panic::type_error("Object is not an iterator."))?;
                self.push(source_value)?;
                self.call_method_value(method, 0)
            }
        }
    }

    fn source_iter(&mut self, iter_ref: ObjRef) -> VmResult<ObjRef> {
        let source = self
            .heap
            .iter(iter_ref)
            .source
            .ok_or_else(|| Panic::error("Iterator has no source.").hard())?;
        if matches!(self.heap.object(source).kind, ObjKind::Iter(_)) {
            Ok(source)
        } else {
            Err(Panic::error("Iterator source is not an iterator.").hard().into())
        }
    }

    fn iter_callback(&mut self, iter_ref: ObjRef) -> VmResult<ObjRef> {
        self.heap
            .iter(iter_ref)
            .callback
            .ok_or_else(|| Panic::error("Iterator has no callback.").hard().into())
    }

    fn map_iter_next(
        &mut self,
        iter_ref: ObjRef,
        kind: IterKind,
        exhausted: Value,
    ) -> VmResult<Value> {
        let Some(source) = self.heap.iter(iter_ref).source else {
            return Ok(exhausted);
        };
        loop {
            let index = self.heap.iter(iter_ref).next_index;
            let entry = {
                let map = self.heap.map(source);
                if index >= map.entries().len() {
                    return Ok(exhausted);
                }
                map.entries()[index]
            };
            self.heap.iter_mut(iter_ref).next_index += 1;
            if entry.key.is_tombstone() {
                continue;
            }
            return match kind {
                IterKind::MapKeys => Ok(entry.key),
                IterKind::MapValues => Ok(entry.value),
                _ => {
                    self.push(entry.key)?;
                    self.push(entry.value)?;
                    let tup = self.new_tup(vec![entry.key, entry.value])?;
                    self.pop()?;
                    self.pop()?;
                    Ok(Value::Obj(tup))
                }
            };
        }
    }

    /// Lines of a string, split on LF, CR or CRLF. A trailing linebreak
    /// yields one final empty string.
    fn str_lines_next(&mut self, iter_ref: ObjRef, exhausted: Value) -> VmResult<Value> {
        let Some(source) = self.heap.iter(iter_ref).source else {
            return Ok(exhausted);
        };

        let start = self.heap.iter(iter_ref).next_index;
        if start == self.heap.str_obj(source).len() {
            // The string ended with a linebreak: one final empty line.
            self.heap.iter_mut(iter_ref).source = None;
            return Ok(Value::Obj(self.empty_string()));
        }

        let (line, next_index, found_break) = {
            let bytes = self.heap.str_obj(source).as_bytes();
            let mut end = start;
            let mut next = bytes.len();
            let mut found_break = false;
            while end < bytes.len() {
                if bytes.len() - end > 1 && bytes[end] == b'\r' && bytes[end + 1] == b'\n' {
                    next = end + 2;
                    found_break = true;
                    break;
                } else if bytes[end] == b'\n' || bytes[end] == b'\r' {
                    next = end + 1;
                    found_break = true;
                    break;
                }
                end += 1;
            }
            (bytes[start..end].to_vec(), next, found_break)
        };

        if found_break {
            self.heap.iter_mut(iter_ref).next_index = next_index;
        } else {
            self.heap.iter_mut(iter_ref).source = None;
        }

        Ok(Value::Obj(self.intern_owned(line)?))
    }

    /// Drives an iterator to exhaustion, stringifying each value and
    /// joining them with `separator`.
    pub fn iter_join(&mut self, iter_ref: ObjRef, separator: &[u8]) -> VmResult<ObjRef> {
        let mut out: Vec<u8> = Vec::new();
        let mut is_first = true;

        loop {
            let next_value = self.iter_next(iter_ref)?;
            if self.is_err_value(next_value) {
                break;
            }
            if !is_first {
                out.extend_from_slice(separator);
            }
            is_first = false;
            self.push(next_value)?;
            let string = self.stringify_value(next_value)?;
            out.extend_from_slice(self.heap.str_obj(string).as_bytes());
            self.pop()?;
        }

        self.intern_owned(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::PyroIter;

    #[test]
    fn test_range_iteration() {
        let mut vm = Vm::new();
        let iter = vm.new_iter(PyroIter::new_range(0, 6, 2)).unwrap();
        vm.push(Value::Obj(iter)).unwrap();

        let mut values = Vec::new();
        loop {
            let next = vm.iter_next(iter).unwrap();
            if vm.is_err_value(next) {
                break;
            }
            match next {
                Value::I64(n) => values.push(n),
                _ => panic!("unexpected value"),
            }
        }
        assert_eq!(values, vec![0, 2, 4]);

        // The exhausted iterator stays exhausted.
        let next = vm.iter_next(iter).unwrap();
        assert!(vm.is_err_value(next));
    }

    #[test]
    fn test_reverse_range() {
        let mut vm = Vm::new();
        let iter = vm.new_iter(PyroIter::new_range(3, 0, -1)).unwrap();
        vm.push(Value::Obj(iter)).unwrap();
        let mut values = Vec::new();
        loop {
            let next = vm.iter_next(iter).unwrap();
            if vm.is_err_value(next) {
                break;
            }
            if let Value::I64(n) = next {
                values.push(n);
            }
        }
        assert_eq!(values, vec![3, 2, 1]);
    }

    #[test]
    fn test_string_char_iteration() {
        let mut vm = Vm::new();
        let string = vm.intern("héllo").unwrap();
        let iter = vm
            .new_iter(PyroIter::new(string, IterKind::StrChars))
            .unwrap();
        vm.push(Value::Obj(iter)).unwrap();

        let mut chars = Vec::new();
        loop {
            let next = vm.iter_next(iter).unwrap();
            if vm.is_err_value(next) {
                break;
            }
            if let Value::Char(c) = next {
                chars.push(c);
            }
        }
        assert_eq!(chars, vec!['h', 'é', 'l', 'l', 'o']);
    }

    #[test]
    fn test_string_lines() {
        let mut vm = Vm::new();
        let string = vm.intern("one\ntwo\r\nthree").unwrap();
        let iter = vm
            .new_iter(PyroIter::new(string, IterKind::StrLines))
            .unwrap();
        vm.push(Value::Obj(iter)).unwrap();

        let mut lines = Vec::new();
        loop {
            let next = vm.iter_next(iter).unwrap();
            if vm.is_err_value(next) {
                break;
            }
            if let Value::Obj(s) = next {
                lines.push(vm.heap.str_obj(s).to_string_lossy());
            }
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_join() {
        let mut vm = Vm::new();
        let iter = vm.new_iter(PyroIter::new_range(1, 4, 1)).unwrap();
        vm.push(Value::Obj(iter)).unwrap();
        let joined = vm.iter_join(iter, b", ").unwrap();
        assert_eq!(vm.heap.str_obj(joined).to_string_lossy(), "1, 2, 3");
    }
}
