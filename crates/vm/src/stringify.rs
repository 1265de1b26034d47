//! Stringification for the Pyro virtual machine.
//!
//! `stringify` produces the default string form (what `echo` prints);
//! `debugify` produces the inspectable form — strings quoted and escaped,
//! chars quoted — used for container elements and the REPL echo. Instances
//! are consulted for `$str`, `$debug` and `$fmt` overrides; these can call
//! back into Pyro code, so everything here is fallible.

use crate::error::{Panic, VmResult};
use crate::heap::{ObjKind, ObjTag};
use crate::objects::MapKind;
use crate::utf8;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

impl Vm {
    /// Returns the default string representation of a value.
    pub fn stringify_value(&mut self, value: Value) -> VmResult<ObjRef> {
        match value {
            Value::Null => Ok(self.canned.null),
            Value::Bool(true) => Ok(self.canned.true_),
            Value::Bool(false) => Ok(self.canned.false_),
            Value::I64(n) => self.intern(&n.to_string()),
            Value::F64(f) => self.intern(&format_f64(f)),
            Value::Char(c) => {
                let mut bytes = Vec::with_capacity(4);
                utf8::push_utf8_codepoint(c as u32, &mut bytes);
                self.intern_owned(bytes)
            }
            Value::Obj(obj_ref) => match self.heap.tag(obj_ref) {
                ObjTag::Str => Ok(obj_ref),
                ObjTag::Instance => match self.get_method(value, self.canned.str_)? {
                    Some(method) => {
                        self.push(value)?;
                        let result = self.call_method_value(method, 0)?;
                        self.expect_string(result, "$str()")
                    }
                    None => self.default_object_string(obj_ref),
                },
                _ => self.default_object_string(obj_ref),
            },
            Value::Tombstone | Value::Empty => self.intern("<sentinel>"),
        }
    }

    /// Returns the debug string representation of a value.
    pub fn debugify_value(&mut self, value: Value) -> VmResult<ObjRef> {
        match value {
            Value::Obj(obj_ref) => match self.heap.tag(obj_ref) {
                ObjTag::Str => {
                    let quoted = quote_bytes(self.heap.str_obj(obj_ref).as_bytes());
                    self.intern_owned(quoted)
                }
                ObjTag::Instance => match self.get_method(value, self.canned.debug)? {
                    Some(method) => {
                        self.push(value)?;
                        let result = self.call_method_value(method, 0)?;
                        self.expect_string(result, "$debug()")
                    }
                    None => self.stringify_value(value),
                },
                _ => self.stringify_value(value),
            },
            Value::Char(c) => {
                let mut bytes = vec![b'\''];
                match c {
                    '\n' => bytes.extend_from_slice(b"\\n"),
                    '\r' => bytes.extend_from_slice(b"\\r"),
                    '\t' => bytes.extend_from_slice(b"\\t"),
                    '\'' => bytes.extend_from_slice(b"\\'"),
                    '\\' => bytes.extend_from_slice(b"\\\\"),
                    _ => utf8::push_utf8_codepoint(c as u32, &mut bytes),
                }
                bytes.push(b'\'');
                self.intern_owned(bytes)
            }
            _ => self.stringify_value(value),
        }
    }

    /// Returns the formatted representation of a value, per a `$fmt`
    /// format specifier.
    pub fn format_value(&mut self, value: Value, spec: &str) -> VmResult<ObjRef> {
        if spec.is_empty() {
            return self.stringify_value(value);
        }

        if let Value::Obj(obj_ref) = value {
            if matches!(self.heap.object(obj_ref).kind, ObjKind::Instance(_)) {
                if let Some(method) = self.get_method(value, self.canned.fmt)? {
                    let spec_string = self.intern(spec)?;
                    self.push(value)?;
                    self.push(Value::Obj(spec_string))?;
                    let result = self.call_method_value(method, 1)?;
                    return self.expect_string(result, "$fmt()");
                }
            }
        }

        let parsed = FormatSpec::parse(spec)
            .ok_or_else(|| Panic::value_error(format!("Invalid format specifier '{spec}'.")))?;
        let text = match value {
            Value::I64(n) => parsed.format_i64(n),
            Value::F64(f) => parsed.format_f64(f),
            Value::Char(c) => parsed.format_str(&c.to_string()),
            Value::Obj(obj_ref)
                if matches!(self.heap.object(obj_ref).kind, ObjKind::Str(_)) =>
            {
                parsed.format_str(&self.heap.str_obj(obj_ref).to_string_lossy())
            }
            _ => {
                let string = self.stringify_value(value)?;
                parsed.format_str(&self.heap.str_obj(string).to_string_lossy())
            }
        };
        let text = text
            .ok_or_else(|| Panic::value_error(format!("Invalid format specifier '{spec}'.")))?;
        self.intern(&text)
    }

    fn expect_string(&mut self, value: Value, method: &str) -> VmResult<ObjRef> {
        match value {
            Value::Obj(obj_ref)
                if matches!(self.heap.object(obj_ref).kind, ObjKind::Str(_)) =>
            {
                Ok(obj_ref)
            }
            _ => Err(Panic::type_error(format!("{method} must return a string.")).into()),
        }
    }

    fn default_object_string(&mut self, obj_ref: ObjRef) -> VmResult<ObjRef> {
        match self.heap.tag(obj_ref) {
            ObjTag::Tup => {
                let tup = self.heap.tup(obj_ref);
                let prefix: &[u8] = if tup.is_err { b"Err(" } else { b"(" };
                let values = tup.values.to_vec();
                self.join_debug_values(prefix, &values, b")")
            }
            ObjTag::Vec => {
                let values = self.heap.vec(obj_ref).values().to_vec();
                self.join_debug_values(b"[", &values, b"]")
            }
            ObjTag::Map if self.heap.map(obj_ref).kind == MapKind::Set => {
                let keys: Vec<Value> = self
                    .heap
                    .map(obj_ref)
                    .live_entries()
                    .map(|entry| entry.key)
                    .collect();
                self.join_debug_values(b"{", &keys, b"}")
            }
            ObjTag::Map => {
                let entries: Vec<(Value, Value)> = self
                    .heap
                    .map(obj_ref)
                    .live_entries()
                    .map(|entry| (entry.key, entry.value))
                    .collect();
                let mut out = b"{".to_vec();
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        out.extend_from_slice(b", ");
                    }
                    let key_string = self.debugify_value(*key)?;
                    out.extend_from_slice(self.heap.str_obj(key_string).as_bytes());
                    out.extend_from_slice(b" = ");
                    let value_string = self.debugify_value(*value)?;
                    out.extend_from_slice(self.heap.str_obj(value_string).as_bytes());
                }
                out.push(b'}');
                self.intern_owned(out)
            }
            ObjTag::Queue => {
                let values: Vec<Value> = self.heap.queue(obj_ref).iter().copied().collect();
                self.join_debug_values(b"<queue ", &values, b">")
            }
            ObjTag::Class => {
                let name = self
                    .heap
                    .class(obj_ref)
                    .name
                    .map(|n| self.heap.str_obj(n).to_string_lossy())
                    .unwrap_or_default();
                self.intern(&format!("<class {name}>"))
            }
            ObjTag::Instance => {
                let name = self
                    .heap
                    .object(obj_ref)
                    .class
                    .and_then(|class| self.heap.class(class).name)
                    .map(|n| self.heap.str_obj(n).to_string_lossy())
                    .unwrap_or_default();
                self.intern(&format!("<instance {name}>"))
            }
            ObjTag::Closure => {
                let fun = self.heap.closure(obj_ref).fun;
                let name = self
                    .heap
                    .fun(fun)
                    .name
                    .map(|n| self.heap.str_obj(n).to_string_lossy())
                    .unwrap_or_default();
                self.intern(&format!("<fn {name}>"))
            }
            ObjTag::Fn => {
                let name = self
                    .heap
                    .fun(obj_ref)
                    .name
                    .map(|n| self.heap.str_obj(n).to_string_lossy())
                    .unwrap_or_default();
                self.intern(&format!("<fn {name}>"))
            }
            ObjTag::NativeFn => {
                let name_ref = self.heap.native(obj_ref).name;
                let name = self.heap.str_obj(name_ref).to_string_lossy();
                self.intern(&format!("<fn {name}>"))
            }
            ObjTag::BoundMethod => self.intern("<method>"),
            ObjTag::Module => self.intern("<module>"),
            ObjTag::Buf => self.intern("<buf>"),
            ObjTag::Iter => self.intern("<iter>"),
            ObjTag::File => self.intern("<file>"),
            ObjTag::Upvalue => self.intern("<upvalue>"),
            ObjTag::Resource => self.intern("<resource>"),
            ObjTag::Str => Ok(obj_ref),
        }
    }

    fn join_debug_values(
        &mut self,
        prefix: &[u8],
        values: &[Value],
        suffix: &[u8],
    ) -> VmResult<ObjRef> {
        let mut out = prefix.to_vec();
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                out.extend_from_slice(b", ");
            }
            let string = self.debugify_value(*value)?;
            out.extend_from_slice(self.heap.str_obj(string).as_bytes());
        }
        out.extend_from_slice(suffix);
        self.intern_owned(out)
    }
}

/// Formats an f64 in its shortest round-trip form, keeping a `.0` suffix
/// for integral values so floats remain visually distinct from integers.
pub(crate) fn format_f64(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let text = format!("{f:?}");
    if text.contains('.') || text.contains('e') || text.contains("inf") {
        text
    } else {
        format!("{text}.0")
    }
}

/// Produces a quoted, backslash-escaped rendition of string content.
fn quote_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![b'"'];
    for &byte in bytes {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x20..=0x7E | 0x80..=0xFF => out.push(byte),
            _ => {
                out.extend_from_slice(format!("\\x{byte:02X}").as_bytes());
            }
        }
    }
    out.push(b'"');
    out
}

/// A parsed `$fmt` specifier: optional zero-fill, width, precision and a
/// presentation type.
struct FormatSpec {
    zero_fill: bool,
    width: usize,
    precision: Option<usize>,
    presentation: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Option<FormatSpec> {
        let mut chars = spec.chars().peekable();
        let mut zero_fill = false;
        if chars.peek() == Some(&'0') {
            zero_fill = true;
            chars.next();
        }

        let mut width = 0usize;
        while let Some(c) = chars.peek() {
            if let Some(digit) = c.to_digit(10) {
                width = width.checked_mul(10)?.checked_add(digit as usize)?;
                chars.next();
            } else {
                break;
            }
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut value = 0usize;
            let mut any = false;
            while let Some(c) = chars.peek() {
                if let Some(digit) = c.to_digit(10) {
                    value = value.checked_mul(10)?.checked_add(digit as usize)?;
                    chars.next();
                    any = true;
                } else {
                    break;
                }
            }
            if !any {
                return None;
            }
            precision = Some(value);
        }

        let presentation = chars.next();
        if chars.next().is_some() {
            return None;
        }
        if let Some(p) = presentation {
            if !matches!(p, 'd' | 'f' | 'x' | 'X' | 'o' | 'b' | 's') {
                return None;
            }
        }

        Some(FormatSpec {
            zero_fill,
            width,
            precision,
            presentation,
        })
    }

    fn format_i64(&self, n: i64) -> Option<String> {
        let digits = match self.presentation {
            None | Some('d') => format!("{n}"),
            Some('x') => format!("{n:x}"),
            Some('X') => format!("{n:X}"),
            Some('o') => format!("{n:o}"),
            Some('b') => format!("{n:b}"),
            Some('f') => return self.format_f64(n as f64),
            _ => return None,
        };
        Some(self.pad_number(digits))
    }

    fn format_f64(&self, f: f64) -> Option<String> {
        let digits = match self.precision {
            Some(precision) => format!("{f:.precision$}"),
            None => format_f64(f),
        };
        Some(self.pad_number(digits))
    }

    fn format_str(&self, s: &str) -> Option<String> {
        if self.presentation.is_some() && self.presentation != Some('s') {
            return None;
        }
        let mut out = s.to_string();
        while out.chars().count() < self.width {
            out.push(' ');
        }
        Some(out)
    }

    fn pad_number(&self, digits: String) -> String {
        if digits.len() >= self.width {
            return digits;
        }
        let pad = self.width - digits.len();
        if self.zero_fill {
            if let Some(stripped) = digits.strip_prefix('-') {
                format!("-{}{}", "0".repeat(pad), stripped)
            } else {
                format!("{}{}", "0".repeat(pad), digits)
            }
        } else {
            format!("{}{}", " ".repeat(pad), digits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn test_f64_round_trip_formatting() {
        for &f in &[0.0, 1.0, -1.5, 0.1, 1e100, 1e-300, 65.0] {
            let text = format_f64(f);
            let parsed: f64 = text.parse().expect("parseable");
            assert_eq!(parsed, f, "round trip failed for {text}");
        }
        assert_eq!(format_f64(65.0), "65.0");
    }

    #[test]
    fn test_stringify_primitives() {
        let mut vm = Vm::new();
        let cases = [
            (Value::Null, "null"),
            (Value::Bool(true), "true"),
            (Value::I64(42), "42"),
            (Value::Char('é'), "é"),
        ];
        for (value, expected) in cases {
            let string = vm.stringify_value(value).unwrap();
            assert_eq!(vm.heap.str_obj(string).to_string_lossy(), expected);
        }
    }

    #[test]
    fn test_debugify_quotes_strings() {
        let mut vm = Vm::new();
        let string = vm.intern("a\"b\n").unwrap();
        let debug = vm.debugify_value(Value::Obj(string)).unwrap();
        assert_eq!(vm.heap.str_obj(debug).to_string_lossy(), "\"a\\\"b\\n\"");
    }

    #[test]
    fn test_container_forms() {
        let mut vm = Vm::new();
        let hello = vm.intern("hi").unwrap();
        let tup = vm
            .new_tup(vec![Value::I64(1), Value::Obj(hello)])
            .unwrap();
        vm.push(Value::Obj(tup)).unwrap();
        let string = vm.stringify_value(Value::Obj(tup)).unwrap();
        assert_eq!(vm.heap.str_obj(string).to_string_lossy(), "(1, \"hi\")");
    }

    #[test]
    fn test_format_specs() {
        let mut vm = Vm::new();
        let formatted = vm.format_value(Value::I64(42), "05d").unwrap();
        assert_eq!(vm.heap.str_obj(formatted).to_string_lossy(), "00042");

        let formatted = vm.format_value(Value::F64(3.14159), ".2f").unwrap();
        assert_eq!(vm.heap.str_obj(formatted).to_string_lossy(), "3.14");

        let formatted = vm.format_value(Value::I64(255), "x").unwrap();
        assert_eq!(vm.heap.str_obj(formatted).to_string_lossy(), "ff");

        assert!(vm.format_value(Value::I64(1), "??").is_err());
    }
}
