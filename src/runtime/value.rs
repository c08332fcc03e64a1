//! Runtime values.
//!
//! Values carry no host handles: a program can only ever hold numbers, text,
//! lists, ranges, its own functions and the operations the policy installed.

use crate::config::types::{FaultDiagnostic, FaultKind};
use crate::runtime::builtins::Operation;
use crate::runtime::heap::{Charge, Heap, MemoryExceeded, OBJECT_OVERHEAD, SLOT_SIZE};
use crate::runtime::interpreter::Exec;
use crate::script::ast::FunctionDef;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::rc::Rc;

/// Nesting beyond which comparisons give up with `RecursionError`
pub const MAX_COMPARE_DEPTH: usize = 64;

/// Nesting beyond which lists are displayed as `[...]`
pub const MAX_DISPLAY_DEPTH: usize = 64;

pub struct StrObj {
    text: String,
    _charge: Charge,
}

impl StrObj {
    pub fn new(heap: &Rc<Heap>, text: String) -> Result<Rc<Self>, MemoryExceeded> {
        let charge = heap.charge(OBJECT_OVERHEAD + text.capacity() as u64)?;
        Ok(Rc::new(Self {
            text,
            _charge: charge,
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

pub struct ListObj {
    items: RefCell<Vec<Value>>,
    _charge: Charge,
}

impl ListObj {
    pub fn new(heap: &Rc<Heap>, items: Vec<Value>) -> Result<Rc<Self>, MemoryExceeded> {
        let charge = heap.charge(OBJECT_OVERHEAD + items.capacity() as u64 * SLOT_SIZE)?;
        let list = Rc::new(Self {
            items: RefCell::new(items),
            _charge: charge,
        });
        heap.track_list(&list);
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Replace the item at `index`; false when out of range
    pub fn set(&self, index: usize, value: Value) -> bool {
        let old = {
            let mut items = self.items.borrow_mut();
            match items.get_mut(index) {
                Some(slot) => std::mem::replace(slot, value),
                None => return false,
            }
        };
        // Dropped outside the borrow: the old value may own this very list.
        drop(old);
        true
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    pub fn with_items<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        f(&self.items.borrow())
    }

    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.items.borrow_mut());
        drop(old);
    }
}

impl Drop for ListObj {
    // Deeply nested lists are released iteratively so dropping them cannot
    // exhaust the native stack.
    fn drop(&mut self) {
        let mut pending: Vec<Value> = std::mem::take(self.items.get_mut());
        while let Some(value) = pending.pop() {
            if let Value::List(list) = value {
                if let Ok(mut owned) = Rc::try_unwrap(list) {
                    pending.append(owned.items.get_mut());
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> u64 {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let count = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        count as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, which must be below `len()`
    pub fn nth(&self, index: u64) -> i64 {
        (self.start as i128 + index as i128 * self.step as i128) as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let (v, start, step) = (value as i128, self.start as i128, self.step as i128);
        let in_bounds = if step > 0 {
            v >= start && v < self.stop as i128
        } else {
            v <= start && v > self.stop as i128
        };
        in_bounds && (v - start) % step == 0
    }
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<StrObj>),
    List(Rc<ListObj>),
    Range(RangeValue),
    Function(Rc<FunctionDef>),
    Operation(Operation),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Operation(_) => "builtin_function_or_method",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.as_str().is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Range(r) => !r.is_empty(),
            Value::Function(_) | Value::Operation(_) => true,
        }
    }

    /// Integer view, with booleans counting as 0 and 1
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Bool(b) => Some(Number::Int(*b as i64)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// `str(value)`, stopping once `out` reaches `limit` bytes
    pub fn write_str(&self, out: &mut String, limit: usize) {
        write_value(self, out, limit, false, &mut Vec::new());
    }

    /// `repr(value)`, stopping once `out` reaches `limit` bytes
    pub fn write_repr(&self, out: &mut String, limit: usize) {
        write_value(self, out, limit, true, &mut Vec::new());
    }

    pub fn to_display_string(&self) -> String {
        let mut out = String::new();
        self.write_str(&mut out, usize::MAX);
        out
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_repr(&mut out, usize::MAX);
        f.write_str(&out)
    }
}

/// Float text in the short round-trip form learners expect: `1.0`, `0.1`, `1e+20`
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let text = format!("{:e}", value);
        let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
    }

    let text = format!("{}", value);
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

fn push_limited(out: &mut String, text: &str, limit: usize) {
    if out.len() >= limit {
        return;
    }
    let room = limit - out.len();
    if text.len() <= room {
        out.push_str(text);
        return;
    }
    let mut cut = room;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    out.push_str(&text[..cut]);
}

fn write_str_repr(text: &str, out: &mut String, limit: usize) {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for ch in text.chars() {
        if out.len() >= limit {
            return;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn write_value(
    value: &Value,
    out: &mut String,
    limit: usize,
    repr: bool,
    path: &mut Vec<*const ListObj>,
) {
    if out.len() >= limit {
        return;
    }
    match value {
        Value::None => push_limited(out, "None", limit),
        Value::Bool(true) => push_limited(out, "True", limit),
        Value::Bool(false) => push_limited(out, "False", limit),
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) => push_limited(out, &format_float(*f), limit),
        Value::Str(s) if repr => write_str_repr(s.as_str(), out, limit),
        Value::Str(s) => push_limited(out, s.as_str(), limit),
        Value::List(list) => {
            let ptr = Rc::as_ptr(list);
            if path.contains(&ptr) || path.len() >= MAX_DISPLAY_DEPTH {
                push_limited(out, "[...]", limit);
                return;
            }
            path.push(ptr);
            out.push('[');
            list.with_items(|items| {
                for (i, item) in items.iter().enumerate() {
                    if out.len() >= limit {
                        break;
                    }
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_value(item, out, limit, true, path);
                }
            });
            out.push(']');
            path.pop();
        }
        Value::Range(r) if r.step == 1 => {
            let _ = write!(out, "range({}, {})", r.start, r.stop);
        }
        Value::Range(r) => {
            let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
        }
        Value::Function(def) => {
            let _ = write!(out, "<function {}>", def.name);
        }
        Value::Operation(op) => {
            let _ = write!(out, "<built-in function {}>", op.name());
        }
    }
}

fn recursion_fault() -> FaultDiagnostic {
    FaultDiagnostic::new(
        FaultKind::RecursionError,
        "maximum recursion depth exceeded in comparison",
        None,
    )
}

/// `a == b`.
///
/// `step` is charged once per element pair visited, so comparing large or
/// heavily shared structures stays preemptible.
pub fn equal<F>(a: &Value, b: &Value, step: &mut F) -> Exec<bool>
where
    F: FnMut() -> Exec<()>,
{
    equal_at(a, b, 0, step)
}

fn equal_at<F>(a: &Value, b: &Value, depth: usize, step: &mut F) -> Exec<bool>
where
    F: FnMut() -> Exec<()>,
{
    if depth > MAX_COMPARE_DEPTH {
        return Err(recursion_fault().into());
    }
    step()?;
    let same = match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x.as_str() == y.as_str(),
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let xs = x.items.borrow();
            let ys = y.items.borrow();
            if xs.len() != ys.len() {
                return Ok(false);
            }
            for (p, q) in xs.iter().zip(ys.iter()) {
                if !equal_at(p, q, depth + 1, step)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Range(x), Value::Range(y)) => {
            let len = x.len();
            len == y.len()
                && (len == 0 || (x.start == y.start && (len == 1 || x.step == y.step)))
        }
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Operation(x), Value::Operation(y)) => x == y,
        _ => match (a.as_number(), b.as_number()) {
            (Some(Number::Int(x)), Some(Number::Int(y))) => x == y,
            (Some(x), Some(y)) => x.to_f64() == y.to_f64(),
            _ => false,
        },
    };
    Ok(same)
}

/// Ordering for `<`, `<=`, `>`, `>=`, `min`, `max` and `sorted`.
///
/// `Ok(None)` means the values are unordered (a NaN is involved), which
/// makes every ordering comparison false. `step` is charged like in [`equal`].
pub fn compare<F>(a: &Value, b: &Value, symbol: &str, step: &mut F) -> Exec<Option<Ordering>>
where
    F: FnMut() -> Exec<()>,
{
    compare_at(a, b, symbol, 0, step)
}

fn compare_at<F>(
    a: &Value,
    b: &Value,
    symbol: &str,
    depth: usize,
    step: &mut F,
) -> Exec<Option<Ordering>>
where
    F: FnMut() -> Exec<()>,
{
    if depth > MAX_COMPARE_DEPTH {
        return Err(recursion_fault().into());
    }
    step()?;
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.as_str().cmp(y.as_str()))),
        (Value::List(x), Value::List(y)) => {
            let xs = x.items.borrow();
            let ys = y.items.borrow();
            for (p, q) in xs.iter().zip(ys.iter()) {
                if !equal_at(p, q, depth + 1, step)? {
                    return compare_at(p, q, symbol, depth + 1, step);
                }
            }
            Ok(Some(xs.len().cmp(&ys.len())))
        }
        _ => match (a.as_number(), b.as_number()) {
            (Some(Number::Int(x)), Some(Number::Int(y))) => Ok(Some(x.cmp(&y))),
            (Some(x), Some(y)) => Ok(x.to_f64().partial_cmp(&y.to_f64())),
            _ => Err(FaultDiagnostic::new(
                FaultKind::TypeError,
                format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    symbol,
                    a.type_name(),
                    b.type_name()
                ),
                None,
            )
            .into()),
        },
    }
}

/// `a is b`
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y),
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Operation(x), Value::Operation(y)) => x == y,
        _ => false,
    }
}
