//! Operator semantics for the Pyro virtual machine.
//!
//! Binary arithmetic promotes between i64 and f64; `+` also concatenates
//! strings and chars. Instances route through their `$op_binary_*` /
//! `$op_unary_*` methods when defined. Comparisons order numbers exactly —
//! an i64 is never rounded through f64 on the way to a comparison — and
//! fall back to lexicographic bytes for strings and element-wise order for
//! tuples.

use crate::error::{Panic, VmResult};
use crate::heap::{ObjKind, ObjTag};
use crate::objects::MapKind;
use crate::utf8;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

/// Compares an integer and a float exactly.
///
/// Casting the i64 to f64 would lose precision: only integers in
/// `[-(2^53), 2^53]` are exactly representable. Instead, a float outside
/// the i64 range is ordered by sign, and one inside it is split into whole
/// and fractional parts which are examined separately.
///
/// Returns -1, 0 or 1; 2 if the float is NaN.
pub(crate) fn compare_int_and_float(a: i64, b: f64) -> i32 {
    if b.is_nan() {
        return 2;
    }

    // 2^63; i64::MAX rounds up to this as a double.
    if b >= 9_223_372_036_854_775_808.0 {
        return -1;
    }
    // -(2^63) == i64::MIN exactly.
    if b < -9_223_372_036_854_775_808.0 {
        return 1;
    }

    let b_whole = if b >= 0.0 { b.floor() } else { b.ceil() };
    let b_fract = b - b_whole;

    if b_whole as i64 == a {
        if b_fract == 0.0 {
            0
        } else if a >= 0 {
            -1
        } else {
            1
        }
    } else if a < b_whole as i64 {
        -1
    } else {
        1
    }
}

impl Vm {
    /// Calls a binary operator method on `a` if its class defines one.
    fn call_binary_op_method(
        &mut self,
        a: Value,
        b: Value,
        name: ObjRef,
    ) -> VmResult<Option<Value>> {
        match self.get_method(a, name)? {
            Some(method) => {
                self.push(a)?;
                self.push(b)?;
                Ok(Some(self.call_method_value(method, 1)?))
            }
            None => Ok(None),
        }
    }

    /// Concatenates two strings.
    fn concat_strings(&mut self, a: ObjRef, b: ObjRef) -> VmResult<ObjRef> {
        let mut bytes = Vec::with_capacity(
            self.heap.str_obj(a).len() + self.heap.str_obj(b).len(),
        );
        bytes.extend_from_slice(self.heap.str_obj(a).as_bytes());
        bytes.extend_from_slice(self.heap.str_obj(b).as_bytes());
        self.intern_owned(bytes)
    }

    /// Returns `a + b`.
    pub(crate) fn op_binary_plus(&mut self, a: Value, b: Value) -> VmResult<Value> {
        match (a, b) {
            (Value::I64(x), Value::I64(y)) => Ok(Value::I64(x.wrapping_add(y))),
            (Value::I64(x), Value::F64(y)) => Ok(Value::F64(x as f64 + y)),
            (Value::F64(x), Value::I64(y)) => Ok(Value::F64(x + y as f64)),
            (Value::F64(x), Value::F64(y)) => Ok(Value::F64(x + y)),
            (Value::Char(x), Value::Char(y)) => {
                let mut bytes = Vec::with_capacity(8);
                utf8::push_utf8_codepoint(x as u32, &mut bytes);
                utf8::push_utf8_codepoint(y as u32, &mut bytes);
                Ok(Value::Obj(self.intern_owned(bytes)?))
            }
            (Value::Obj(sa), Value::Obj(sb))
                if matches!(self.heap.object(sa).kind, ObjKind::Str(_))
                    && matches!(self.heap.object(sb).kind, ObjKind::Str(_)) =>
            {
                Ok(Value::Obj(self.concat_strings(sa, sb)?))
            }
            (Value::Obj(sa), Value::Char(c))
                if matches!(self.heap.object(sa).kind, ObjKind::Str(_)) =>
            {
                let mut bytes = self.heap.str_obj(sa).as_bytes().to_vec();
                utf8::push_utf8_codepoint(c as u32, &mut bytes);
                Ok(Value::Obj(self.intern_owned(bytes)?))
            }
            (Value::Char(c), Value::Obj(sb))
                if matches!(self.heap.object(sb).kind, ObjKind::Str(_)) =>
            {
                let mut bytes = Vec::with_capacity(4 + self.heap.str_obj(sb).len());
                utf8::push_utf8_codepoint(c as u32, &mut bytes);
                bytes.extend_from_slice(self.heap.str_obj(sb).as_bytes());
                Ok(Value::Obj(self.intern_owned(bytes)?))
            }
            (Value::Obj(ia), _) if matches!(self.heap.object(ia).kind, ObjKind::Instance(_)) => {
                let name = self.canned.op_binary_plus;
                match self.call_binary_op_method(a, b, name)? {
                    Some(result) => Ok(result),
                    None => Err(Panic::type_error("Invalid operand types to '+'.").into()),
                }
            }
            _ => Err(Panic::type_error("Invalid operand types to '+'.").into()),
        }
    }

    /// Returns `a - b`.
    pub(crate) fn op_binary_minus(&mut self, a: Value, b: Value) -> VmResult<Value> {
        match (a, b) {
            (Value::I64(x), Value::I64(y)) => Ok(Value::I64(x.wrapping_sub(y))),
            (Value::I64(x), Value::F64(y)) => Ok(Value::F64(x as f64 - y)),
            (Value::F64(x), Value::I64(y)) => Ok(Value::F64(x - y as f64)),
            (Value::F64(x), Value::F64(y)) => Ok(Value::F64(x - y)),
            (Value::Obj(obj), _) if matches!(self.heap.object(obj).kind, ObjKind::Instance(_)) => {
                let name = self.canned.op_binary_minus;
                match self.call_binary_op_method(a, b, name)? {
                    Some(result) => Ok(result),
                    None => Err(Panic::type_error("Invalid operand types to '-'.").into()),
                }
            }
            _ => Err(Panic::type_error("Invalid operand types to '-'.").into()),
        }
    }

    /// Returns `a * b`.
    pub(crate) fn op_binary_star(&mut self, a: Value, b: Value) -> VmResult<Value> {
        match (a, b) {
            (Value::I64(x), Value::I64(y)) => Ok(Value::I64(x.wrapping_mul(y))),
            (Value::I64(x), Value::F64(y)) => Ok(Value::F64(x as f64 * y)),
            (Value::F64(x), Value::I64(y)) => Ok(Value::F64(x * y as f64)),
            (Value::F64(x), Value::F64(y)) => Ok(Value::F64(x * y)),
            (Value::Obj(obj), Value::I64(n))
                if matches!(self.heap.object(obj).kind, ObjKind::Str(_)) =>
            {
                if n < 0 {
                    return Err(Panic::value_error(
                        "Cannot multiply a string by a negative count.",
                    )
                    .into());
                }
                let source = self.heap.str_obj(obj).as_bytes().to_vec();
                let mut bytes = Vec::with_capacity(source.len() * n as usize);
                for _ in 0..n {
                    bytes.extend_from_slice(&source);
                }
                Ok(Value::Obj(self.intern_owned(bytes)?))
            }
            (Value::Obj(obj), _) if matches!(self.heap.object(obj).kind, ObjKind::Instance(_)) => {
                let name = self.canned.op_binary_star;
                match self.call_binary_op_method(a, b, name)? {
                    Some(result) => Ok(result),
                    None => Err(Panic::type_error("Invalid operand types to '*'.").into()),
                }
            }
            _ => Err(Panic::type_error("Invalid operand types to '*'.").into()),
        }
    }

    /// Returns `a / b`. Division by zero is a value error, not a trap.
    pub(crate) fn op_binary_slash(&mut self, a: Value, b: Value) -> VmResult<Value> {
        let zero = Panic::value_error("Division by zero.");
        match (a, b) {
            (Value::I64(x), Value::I64(y)) => {
                if y == 0 {
                    return Err(zero.into());
                }
                Ok(Value::F64(x as f64 / y as f64))
            }
            (Value::I64(x), Value::F64(y)) => {
                if y == 0.0 {
                    return Err(zero.into());
                }
                Ok(Value::F64(x as f64 / y))
            }
            (Value::F64(x), Value::I64(y)) => {
                if y == 0 {
                    return Err(zero.into());
                }
                Ok(Value::F64(x / y as f64))
            }
            (Value::F64(x), Value::F64(y)) => {
                if y == 0.0 {
                    return Err(zero.into());
                }
                Ok(Value::F64(x / y))
            }
            (Value::Obj(obj), _) if matches!(self.heap.object(obj).kind, ObjKind::Instance(_)) => {
                let name = self.canned.op_binary_slash;
                match self.call_binary_op_method(a, b, name)? {
                    Some(result) => Ok(result),
                    None => Err(Panic::type_error("Invalid operand types to '/'.").into()),
                }
            }
            _ => Err(Panic::type_error("Invalid operand types to '/'.").into()),
        }
    }

    /// Returns `-a`.
    pub(crate) fn op_unary_minus(&mut self, a: Value) -> VmResult<Value> {
        match a {
            Value::I64(x) => Ok(Value::I64(x.wrapping_neg())),
            Value::F64(x) => Ok(Value::F64(-x)),
            Value::Obj(obj) if matches!(self.heap.object(obj).kind, ObjKind::Instance(_)) => {
                let name = self.canned.op_unary_minus;
                match self.get_method(a, name)? {
                    Some(method) => {
                        self.push(a)?;
                        self.call_method_value(method, 0)
                    }
                    None => Err(Panic::type_error("Operand to '-' must be a number.").into()),
                }
            }
            _ => Err(Panic::type_error("Operand to '-' must be a number.").into()),
        }
    }

    /// Returns `+a`.
    pub(crate) fn op_unary_plus(&mut self, a: Value) -> VmResult<Value> {
        match a {
            Value::I64(_) | Value::F64(_) => Ok(a),
            Value::Obj(obj) if matches!(self.heap.object(obj).kind, ObjKind::Instance(_)) => {
                let name = self.canned.op_unary_plus;
                match self.get_method(a, name)? {
                    Some(method) => {
                        self.push(a)?;
                        self.call_method_value(method, 0)
                    }
                    None => Err(Panic::type_error("Operand to '+' must be a number.").into()),
                }
            }
            _ => Err(Panic::type_error("Operand to '+' must be a number.").into()),
        }
    }

    /// Element-wise tuple equality. `Err` tuples equal plain tuples if
    /// their elements do.
    fn tuples_equal(&mut self, a: ObjRef, b: ObjRef) -> VmResult<bool> {
        let count = self.heap.tup(a).count();
        if count != self.heap.tup(b).count() {
            return Ok(false);
        }
        for index in 0..count {
            let x = self.heap.tup(a).values[index];
            let y = self.heap.tup(b).values[index];
            if !self.op_compare_eq(x, y)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns true if `a == b`.
    pub(crate) fn op_compare_eq(&mut self, a: Value, b: Value) -> VmResult<bool> {
        match a {
            Value::I64(x) => Ok(match b {
                Value::I64(y) => x == y,
                Value::F64(y) => compare_int_and_float(x, y) == 0,
                Value::Char(y) => x == y as i64,
                _ => false,
            }),
            Value::Char(x) => Ok(match b {
                Value::I64(y) => x as i64 == y,
                Value::F64(y) => compare_int_and_float(x as i64, y) == 0,
                Value::Char(y) => x == y,
                _ => false,
            }),
            Value::F64(x) => Ok(match b {
                Value::I64(y) => compare_int_and_float(y, x) == 0,
                Value::F64(y) => x == y,
                Value::Char(y) => compare_int_and_float(y as i64, x) == 0,
                _ => false,
            }),
            Value::Bool(x) => Ok(matches!(b, Value::Bool(y) if x == y)),
            Value::Null => Ok(b.is_null()),
            Value::Tombstone => Ok(b.is_tombstone()),
            Value::Empty => Ok(matches!(b, Value::Empty)),
            Value::Obj(a_ref) => match self.heap.tag(a_ref) {
                ObjTag::Tup => match b {
                    Value::Obj(b_ref) if self.heap.tag(b_ref) == ObjTag::Tup => {
                        self.tuples_equal(a_ref, b_ref)
                    }
                    _ => Ok(false),
                },
                ObjTag::Instance => {
                    let name = self.canned.op_binary_equals_equals;
                    match self.call_binary_op_method(a, b, name)? {
                        Some(result) => Ok(self.is_truthy(result)),
                        None => Ok(matches!(b, Value::Obj(b_ref) if a_ref == b_ref)),
                    }
                }
                _ => Ok(matches!(b, Value::Obj(b_ref) if a_ref == b_ref)),
            },
        }
    }

    /// Three-way comparison for ordered values: -1, 0 or 1. Values that
    /// cannot be ordered produce a type error.
    fn op_compare_order(&mut self, a: Value, b: Value, op_token: &str) -> VmResult<i32> {
        let not_comparable = || Panic::type_error("Values are not comparable.");

        let numeric = |result: i32| -> VmResult<i32> {
            if result == 2 || result == -2 {
                Err(not_comparable().into())
            } else {
                Ok(result)
            }
        };

        match (a, b) {
            (Value::I64(x), Value::I64(y)) => Ok(order(x.cmp(&y))),
            (Value::I64(x), Value::F64(y)) => numeric(compare_int_and_float(x, y)),
            (Value::I64(x), Value::Char(y)) => Ok(order(x.cmp(&(y as i64)))),
            (Value::Char(x), Value::I64(y)) => Ok(order((x as i64).cmp(&y))),
            (Value::Char(x), Value::Char(y)) => Ok(order(x.cmp(&y))),
            (Value::Char(x), Value::F64(y)) => numeric(compare_int_and_float(x as i64, y)),
            (Value::F64(x), Value::F64(y)) => {
                x.partial_cmp(&y).map(order).ok_or_else(|| not_comparable().into())
            }
            (Value::F64(x), Value::I64(y)) => numeric(-compare_int_and_float(y, x)),
            (Value::F64(x), Value::Char(y)) => numeric(-compare_int_and_float(y as i64, x)),
            (Value::Obj(a_ref), Value::Obj(b_ref)) => {
                match (self.heap.tag(a_ref), self.heap.tag(b_ref)) {
                    (ObjTag::Str, ObjTag::Str) => {
                        let ordering =
                            self.heap.str_obj(a_ref).compare(self.heap.str_obj(b_ref));
                        Ok(order(ordering))
                    }
                    (ObjTag::Tup, ObjTag::Tup)
                        if !self.heap.tup(a_ref).is_err && !self.heap.tup(b_ref).is_err =>
                    {
                        self.compare_tuples(a_ref, b_ref)
                    }
                    (ObjTag::Instance, _) => self.compare_instances(a, b, op_token),
                    _ => Err(not_comparable().into()),
                }
            }
            (Value::Obj(a_ref), _) if self.heap.tag(a_ref) == ObjTag::Instance => {
                self.compare_instances(a, b, op_token)
            }
            _ => Err(not_comparable().into()),
        }
    }

    fn compare_tuples(&mut self, a: ObjRef, b: ObjRef) -> VmResult<i32> {
        if self.tuples_equal(a, b)? {
            return Ok(0);
        }
        let a_count = self.heap.tup(a).count();
        let b_count = self.heap.tup(b).count();
        let min_count = a_count.min(b_count);

        for index in 0..min_count {
            let x = self.heap.tup(a).values[index];
            let y = self.heap.tup(b).values[index];
            if self.op_compare_eq(x, y)? {
                continue;
            }
            return self.op_compare_order(x, y, "<");
        }
        Ok(if a_count < b_count { -1 } else { 1 })
    }

    /// Ordering for instances routes through the class's comparison
    /// methods; absent the method for the requested operator, the values
    /// are not comparable.
    fn compare_instances(&mut self, a: Value, b: Value, op_token: &str) -> VmResult<i32> {
        let name = match op_token {
            "<" => self.canned.op_binary_less,
            "<=" => self.canned.op_binary_less_equals,
            ">" => self.canned.op_binary_greater,
            ">=" => self.canned.op_binary_greater_equals,
            _ => return Err(Panic::type_error("Values are not comparable.").into()),
        };
        match self.call_binary_op_method(a, b, name)? {
            // The overload answers the operator question directly; encode
            // the answer as an ordering the caller maps back.
            Some(result) => {
                let truthy = self.is_truthy(result);
                let ordered_less = matches!(op_token, "<" | "<=");
                Ok(match (ordered_less, truthy) {
                    (true, true) => -1,
                    (true, false) => 1,
                    (false, true) => 1,
                    (false, false) => -1,
                })
            }
            None => Err(Panic::type_error("Values are not comparable.").into()),
        }
    }

    /// Returns true if `a < b`.
    pub(crate) fn op_compare_lt(&mut self, a: Value, b: Value) -> VmResult<bool> {
        Ok(self.op_compare_order(a, b, "<")? < 0)
    }

    /// Returns true if `a <= b`.
    pub(crate) fn op_compare_le(&mut self, a: Value, b: Value) -> VmResult<bool> {
        if self.op_compare_eq(a, b)? {
            return Ok(true);
        }
        Ok(self.op_compare_order(a, b, "<=")? < 0)
    }

    /// Returns true if `a > b`.
    pub(crate) fn op_compare_gt(&mut self, a: Value, b: Value) -> VmResult<bool> {
        Ok(self.op_compare_order(a, b, ">")? > 0)
    }

    /// Returns true if `a >= b`.
    pub(crate) fn op_compare_ge(&mut self, a: Value, b: Value) -> VmResult<bool> {
        if self.op_compare_eq(a, b)? {
            return Ok(true);
        }
        Ok(self.op_compare_order(a, b, ">=")? > 0)
    }

    /// Implements `receiver[key]`.
    pub(crate) fn op_get_index(&mut self, receiver: Value, key: Value) -> VmResult<Value> {
        let Value::Obj(obj_ref) = receiver else {
            return Err(Panic::type_error("Value does not support indexing.").into());
        };

        match self.heap.tag(obj_ref) {
            ObjTag::Map if self.heap.map(obj_ref).kind != MapKind::Set => {
                match self.map_get(obj_ref, key)? {
                    Some(value) => Ok(value),
                    None => Ok(Value::Obj(self.empty_error())),
                }
            }
            ObjTag::Vec => {
                let index = self.index_in_range(key, self.heap.vec(obj_ref).count())?;
                Ok(self.heap.vec(obj_ref).values()[index])
            }
            ObjTag::Tup => {
                let index = self.index_in_range(key, self.heap.tup(obj_ref).count())?;
                Ok(self.heap.tup(obj_ref).values[index])
            }
            ObjTag::Buf => {
                let index = self.index_in_range(key, self.heap.buf(obj_ref).count())?;
                match self.heap.buf(obj_ref).get(index) {
                    Some(byte) => Ok(Value::I64(byte as i64)),
                    None => Err(Panic::value_error("Index out of range.").into()),
                }
            }
            ObjTag::Instance => {
                let name = self.canned.get_index;
                match self.get_method(receiver, name)? {
                    Some(method) => {
                        self.push(receiver)?;
                        self.push(key)?;
                        self.call_method_value(method, 1)
                    }
                    None => Err(Panic::type_error("Value does not support indexing.").into()),
                }
            }
            _ => Err(Panic::type_error("Value does not support indexing.").into()),
        }
    }

    /// Implements `receiver[key] = value`. Returns the assigned value.
    pub(crate) fn op_set_index(
        &mut self,
        receiver: Value,
        key: Value,
        value: Value,
    ) -> VmResult<Value> {
        let Value::Obj(obj_ref) = receiver else {
            return Err(Panic::type_error("Value does not support index assignment.").into());
        };

        match self.heap.tag(obj_ref) {
            ObjTag::Map if self.heap.map(obj_ref).kind != MapKind::Set => {
                self.map_set(obj_ref, key, value)?;
                Ok(value)
            }
            ObjTag::Vec => {
                let index = self.index_in_range(key, self.heap.vec(obj_ref).count())?;
                self.heap.vec_mut(obj_ref).values_mut()[index] = value;
                Ok(value)
            }
            ObjTag::Buf => {
                let index = self.index_in_range(key, self.heap.buf(obj_ref).count())?;
                let byte = match value {
                    Value::I64(n) if (0..=255).contains(&n) => n as u8,
                    _ => {
                        return Err(Panic::value_error(
                            "Buffer values must be integers in the range [0, 255].",
                        )
                        .into())
                    }
                };
                self.heap.buf_mut(obj_ref).set(index, byte);
                Ok(value)
            }
            ObjTag::Instance => {
                let name = self.canned.set_index;
                match self.get_method(receiver, name)? {
                    Some(method) => {
                        self.push(receiver)?;
                        self.push(key)?;
                        self.push(value)?;
                        self.call_method_value(method, 2)
                    }
                    None => Err(
                        Panic::type_error("Value does not support index assignment.").into(),
                    ),
                }
            }
            _ => Err(Panic::type_error("Value does not support index assignment.").into()),
        }
    }

    /// Validates an index key against a container length.
    pub(crate) fn index_in_range(&self, key: Value, count: usize) -> VmResult<usize> {
        match key {
            Value::I64(index) if index >= 0 && (index as usize) < count => Ok(index as usize),
            Value::I64(_) => Err(Panic::value_error("Index out of range.").into()),
            _ => Err(Panic::type_error("Index must be an integer.").into()),
        }
    }

    /// Implements `a in b`.
    pub(crate) fn op_binary_in(&mut self, a: Value, b: Value) -> VmResult<bool> {
        let Value::Obj(obj_ref) = b else {
            return Err(Panic::type_error("Invalid operand types to 'in'.").into());
        };

        match self.heap.tag(obj_ref) {
            ObjTag::Str => match a {
                Value::Obj(needle) if self.heap.tag(needle) == ObjTag::Str => {
                    let haystack = self.heap.str_obj(obj_ref).as_bytes();
                    let needle = self.heap.str_obj(needle).as_bytes();
                    if needle.is_empty() {
                        return Ok(true);
                    }
                    Ok(haystack
                        .windows(needle.len())
                        .any(|window| window == needle))
                }
                Value::Char(c) => Ok(utf8::contains_utf8_codepoint(
                    self.heap.str_obj(obj_ref).as_bytes(),
                    c as u32,
                )),
                _ => Err(Panic::type_error("Invalid operand types to 'in'.").into()),
            },
            ObjTag::Map => self.map_contains(obj_ref, a),
            ObjTag::Vec => {
                let count = self.heap.vec(obj_ref).count();
                for index in 0..count {
                    let element = self.heap.vec(obj_ref).values()[index];
                    if self.op_compare_eq(a, element)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ObjTag::Tup => {
                let count = self.heap.tup(obj_ref).count();
                for index in 0..count {
                    let element = self.heap.tup(obj_ref).values[index];
                    if self.op_compare_eq(a, element)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ObjTag::Queue => {
                let count = self.heap.queue(obj_ref).count();
                for index in 0..count {
                    let element = match self.heap.queue(obj_ref).get(index) {
                        Some(value) => value,
                        None => break,
                    };
                    if self.op_compare_eq(a, element)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ObjTag::Instance => {
                let name = self.canned.contains;
                match self.get_method(b, name)? {
                    Some(method) => {
                        self.push(b)?;
                        self.push(a)?;
                        let result = self.call_method_value(method, 1)?;
                        Ok(self.is_truthy(result))
                    }
                    None => Err(Panic::type_error("Invalid operand types to 'in'.").into()),
                }
            }
            _ => Err(Panic::type_error("Invalid operand types to 'in'.").into()),
        }
    }
}

fn order(ordering: std::cmp::Ordering) -> i32 {
    match ordering {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_float_comparison_is_exact() {
        // 2^53 and 2^53 + 1 both round to the same f64.
        let big = (1i64 << 53) + 1;
        assert_eq!(compare_int_and_float(big, (1i64 << 53) as f64), 1);
        assert_eq!(compare_int_and_float(1 << 53, (1i64 << 53) as f64), 0);
        assert_eq!(compare_int_and_float(0, 0.5), -1);
        assert_eq!(compare_int_and_float(1, 0.5), 1);
        assert_eq!(compare_int_and_float(-1, -0.5), -1);
        assert_eq!(compare_int_and_float(0, f64::NAN), 2);
        assert_eq!(compare_int_and_float(i64::MAX, 9.3e18), -1);
        assert_eq!(compare_int_and_float(i64::MIN, -9.3e18), 1);
    }

    #[test]
    fn test_numeric_promotion() {
        let mut vm = Vm::new();
        assert!(matches!(
            vm.op_binary_plus(Value::I64(1), Value::I64(2)).unwrap(),
            Value::I64(3)
        ));
        assert!(matches!(
            vm.op_binary_plus(Value::I64(1), Value::F64(0.5)).unwrap(),
            Value::F64(f) if f == 1.5
        ));
        assert!(matches!(
            vm.op_binary_star(Value::F64(2.0), Value::I64(3)).unwrap(),
            Value::F64(f) if f == 6.0
        ));
    }

    #[test]
    fn test_division_by_zero_is_a_value_error() {
        let mut vm = Vm::new();
        let result = vm.op_binary_slash(Value::I64(1), Value::I64(0));
        match result {
            Err(crate::error::Halt::Panic(panic)) => {
                assert_eq!(panic.code, crate::error::ErrorCode::ValueError)
            }
            _ => panic!("expected a value error"),
        }
    }

    #[test]
    fn test_string_concatenation_interns() {
        let mut vm = Vm::new();
        let hello = vm.intern("hel").unwrap();
        let world = vm.intern("lo").unwrap();
        let joined = vm
            .op_binary_plus(Value::Obj(hello), Value::Obj(world))
            .unwrap();
        let direct = vm.intern("hello").unwrap();
        assert!(matches!(joined, Value::Obj(r) if r == direct));
    }

    #[test]
    fn test_cross_type_equality() {
        let mut vm = Vm::new();
        assert!(vm.op_compare_eq(Value::I64(65), Value::F64(65.0)).unwrap());
        assert!(vm.op_compare_eq(Value::I64(65), Value::Char('A')).unwrap());
        assert!(!vm.op_compare_eq(Value::I64(65), Value::F64(65.5)).unwrap());
        assert!(!vm.op_compare_eq(Value::Bool(true), Value::I64(1)).unwrap());
    }

    #[test]
    fn test_tuple_equality_spans_flavors() {
        let mut vm = Vm::new();
        let plain = vm.new_tup(vec![Value::I64(1), Value::I64(2)]).unwrap();
        vm.push(Value::Obj(plain)).unwrap();
        let err = vm.new_err_tup(vec![Value::I64(1), Value::I64(2)]).unwrap();
        vm.push(Value::Obj(err)).unwrap();
        assert!(vm
            .op_compare_eq(Value::Obj(plain), Value::Obj(err))
            .unwrap());
    }

    #[test]
    fn test_string_ordering_is_lexicographic_bytes() {
        let mut vm = Vm::new();
        let a = vm.intern("abc").unwrap();
        let b = vm.intern("abd").unwrap();
        assert!(vm.op_compare_lt(Value::Obj(a), Value::Obj(b)).unwrap());
        assert!(vm.op_compare_ge(Value::Obj(b), Value::Obj(a)).unwrap());
    }

    #[test]
    fn test_indexing_bounds() {
        let mut vm = Vm::new();
        let vec = vm.new_vec(crate::objects::PyroVec::new(crate::objects::VecKind::Vec)).unwrap();
        vm.push(Value::Obj(vec)).unwrap();
        let result = vm.op_get_index(Value::Obj(vec), Value::I64(0));
        match result {
            Err(crate::error::Halt::Panic(panic)) => {
                assert_eq!(panic.code, crate::error::ErrorCode::ValueError)
            }
            _ => panic!("expected a value error for an empty vector"),
        }
    }

    #[test]
    fn test_in_operator() {
        let mut vm = Vm::new();
        let haystack = vm.intern("héllo").unwrap();
        let needle = vm.intern("éll").unwrap();
        assert!(vm
            .op_binary_in(Value::Obj(needle), Value::Obj(haystack))
            .unwrap());
        assert!(vm
            .op_binary_in(Value::Char('é'), Value::Obj(haystack))
            .unwrap());
        assert!(!vm
            .op_binary_in(Value::Char('z'), Value::Obj(haystack))
            .unwrap());
    }
}
