//! Operations a policy can install into a run.
//!
//! The set is closed: a name that is not a variant here can never be
//! resolved, whatever the policy says, and a variant the policy does not
//! list is left out of the run's operation table.

use crate::config::types::FaultKind;
use crate::runtime::heap::SLOT_SIZE;
use crate::runtime::interpreter::{fault, Exec, Interpreter};
use crate::runtime::value::{compare, Number, RangeValue, Value};
use crate::script::ast::BinaryOp;
use std::cmp::Ordering;

/// Longest UTF-8 encoding of one character
const MAX_CHAR_BYTES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Print,
    Range,
    Len,
    Min,
    Max,
    Sum,
    Abs,
    Round,
    Str,
    Int,
    Float,
    Bool,
    List,
    Sorted,
    Reversed,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::Print,
        Operation::Range,
        Operation::Len,
        Operation::Min,
        Operation::Max,
        Operation::Sum,
        Operation::Abs,
        Operation::Round,
        Operation::Str,
        Operation::Int,
        Operation::Float,
        Operation::Bool,
        Operation::List,
        Operation::Sorted,
        Operation::Reversed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Print => "print",
            Operation::Range => "range",
            Operation::Len => "len",
            Operation::Min => "min",
            Operation::Max => "max",
            Operation::Sum => "sum",
            Operation::Abs => "abs",
            Operation::Round => "round",
            Operation::Str => "str",
            Operation::Int => "int",
            Operation::Float => "float",
            Operation::Bool => "bool",
            Operation::List => "list",
            Operation::Sorted => "sorted",
            Operation::Reversed => "reversed",
        }
    }

    pub fn from_name(name: &str) -> Option<Operation> {
        Operation::ALL.iter().copied().find(|op| op.name() == name)
    }
}

type Kwargs = Vec<(String, Value)>;

/// Invoke `op`. Faults carry no line; the caller attaches it.
pub fn call(interp: &mut Interpreter, op: Operation, args: Vec<Value>, mut kwargs: Kwargs) -> Exec<Value> {
    let result = match op {
        Operation::Print => print(interp, args, &mut kwargs)?,
        Operation::Sum => sum(interp, args, &mut kwargs)?,
        Operation::Sorted => sorted(interp, args, &mut kwargs)?,
        Operation::Min => extreme(interp, op, args, &mut kwargs, Ordering::Less)?,
        Operation::Max => extreme(interp, op, args, &mut kwargs, Ordering::Greater)?,
        Operation::Range => {
            no_kwargs(op, &kwargs)?;
            range(args)?
        }
        Operation::Len => {
            no_kwargs(op, &kwargs)?;
            len(exactly_one(op, args)?)?
        }
        Operation::Abs => {
            no_kwargs(op, &kwargs)?;
            abs(exactly_one(op, args)?)?
        }
        Operation::Round => {
            let mut args = args;
            if let Some(ndigits) = take_kwarg(&mut kwargs, "ndigits") {
                args.push(ndigits);
            }
            round(args)?
        }
        Operation::Str => {
            no_kwargs(op, &kwargs)?;
            to_str(interp, at_most_one(op, args)?)?
        }
        Operation::Int => {
            no_kwargs(op, &kwargs)?;
            to_int(at_most_one(op, args)?)?
        }
        Operation::Float => {
            no_kwargs(op, &kwargs)?;
            to_float(at_most_one(op, args)?)?
        }
        Operation::Bool => {
            no_kwargs(op, &kwargs)?;
            Value::Bool(at_most_one(op, args)?.map_or(false, |v| v.truthy()))
        }
        Operation::List => {
            no_kwargs(op, &kwargs)?;
            let items = match at_most_one(op, args)? {
                Some(iterable) => interp.collect_items(&iterable)?,
                None => Vec::new(),
            };
            interp.new_list(items)?
        }
        Operation::Reversed => {
            no_kwargs(op, &kwargs)?;
            reversed(interp, exactly_one(op, args)?)?
        }
    };
    if let Some((name, _)) = kwargs.first() {
        return Err(fault(
            FaultKind::TypeError,
            format!("'{}' is an invalid keyword argument for {}()", name, op.name()),
        ));
    }
    Ok(result)
}

fn take_kwarg(kwargs: &mut Kwargs, name: &str) -> Option<Value> {
    let idx = kwargs.iter().position(|(k, _)| k == name)?;
    Some(kwargs.remove(idx).1)
}

fn no_kwargs(op: Operation, kwargs: &Kwargs) -> Exec<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(fault(
            FaultKind::TypeError,
            format!("{}() takes no keyword arguments", op.name()),
        ))
    }
}

fn exactly_one(op: Operation, mut args: Vec<Value>) -> Exec<Value> {
    if args.len() != 1 {
        return Err(fault(
            FaultKind::TypeError,
            format!("{}() takes exactly one argument ({} given)", op.name(), args.len()),
        ));
    }
    Ok(args.remove(0))
}

fn at_most_one(op: Operation, mut args: Vec<Value>) -> Exec<Option<Value>> {
    match args.len() {
        0 => Ok(None),
        1 => Ok(Some(args.remove(0))),
        n => Err(fault(
            FaultKind::TypeError,
            format!("{}() takes at most 1 argument ({} given)", op.name(), n),
        )),
    }
}

fn integer_arg(value: &Value) -> Exec<i64> {
    value.as_int().ok_or_else(|| {
        fault(
            FaultKind::TypeError,
            format!("'{}' object cannot be interpreted as an integer", value.type_name()),
        )
    })
}

fn text_kwarg(kwargs: &mut Kwargs, name: &str, default: &str) -> Exec<String> {
    match take_kwarg(kwargs, name) {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.as_str().to_string()),
        Some(other) => Err(fault(
            FaultKind::TypeError,
            format!("{} must be None or a string, not {}", name, other.type_name()),
        )),
    }
}

fn print(interp: &mut Interpreter, args: Vec<Value>, kwargs: &mut Kwargs) -> Exec<Value> {
    let sep = text_kwarg(kwargs, "sep", " ")?;
    let end = text_kwarg(kwargs, "end", "\n")?;
    if let Some((name, _)) = kwargs.first() {
        return Err(fault(
            FaultKind::TypeError,
            format!("'{}' is an invalid keyword argument for print()", name),
        ));
    }

    // Rendering may stop up to one character short of its limit, so the
    // margin keeps any cut past what still fits visible to the capture.
    let limit = interp.output().remaining().saturating_add(MAX_CHAR_BYTES);
    let mut text = String::new();
    for (i, arg) in args.iter().enumerate() {
        if text.len() >= limit {
            break;
        }
        if i > 0 {
            text.push_str(&sep);
        }
        arg.write_str(&mut text, limit);
    }
    if text.len() < limit {
        text.push_str(&end);
    }
    interp.output().write(&text);
    Ok(Value::None)
}

fn range(args: Vec<Value>) -> Exec<Value> {
    let ints = args.iter().map(integer_arg).collect::<Exec<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        [] => {
            return Err(fault(
                FaultKind::TypeError,
                "range expected at least 1 argument, got 0",
            ))
        }
        more => {
            return Err(fault(
                FaultKind::TypeError,
                format!("range expected at most 3 arguments, got {}", more.len()),
            ))
        }
    };
    if step == 0 {
        return Err(fault(FaultKind::ValueError, "range() arg 3 must not be zero"));
    }
    Ok(Value::Range(RangeValue { start, stop, step }))
}

fn len(value: Value) -> Exec<Value> {
    let n = match &value {
        Value::Str(s) => s.as_str().chars().count() as u64,
        Value::List(l) => l.len() as u64,
        Value::Range(r) => r.len(),
        other => {
            return Err(fault(
                FaultKind::TypeError,
                format!("object of type '{}' has no len()", other.type_name()),
            ))
        }
    };
    i64::try_from(n)
        .map(Value::Int)
        .map_err(|_| fault(FaultKind::OverflowError, "integer overflow"))
}

fn extreme(
    interp: &mut Interpreter,
    op: Operation,
    args: Vec<Value>,
    kwargs: &mut Kwargs,
    wanted: Ordering,
) -> Exec<Value> {
    let default = take_kwarg(kwargs, "default");
    if let Some((name, _)) = kwargs.first() {
        return Err(fault(
            FaultKind::TypeError,
            format!("'{}' is an invalid keyword argument for {}()", name, op.name()),
        ));
    }

    let candidates = match args.len() {
        0 => {
            return Err(fault(
                FaultKind::TypeError,
                format!("{} expected at least 1 argument, got 0", op.name()),
            ))
        }
        1 => interp.collect_items(&args[0])?,
        _ if default.is_some() => {
            return Err(fault(
                FaultKind::TypeError,
                format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    op.name()
                ),
            ))
        }
        _ => args,
    };

    let symbol = if wanted == Ordering::Less { "<" } else { ">" };
    let mut best: Option<Value> = None;
    for item in candidates {
        interp.tick()?;
        best = match best {
            None => Some(item),
            Some(current) => {
                if compare(&item, &current, symbol, &mut || interp.tick())? == Some(wanted) {
                    Some(item)
                } else {
                    Some(current)
                }
            }
        };
    }

    match (best, default) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(fault(
            FaultKind::ValueError,
            format!("{}() arg is an empty sequence", op.name()),
        )),
    }
}

fn sum(interp: &mut Interpreter, mut args: Vec<Value>, kwargs: &mut Kwargs) -> Exec<Value> {
    let keyword_start = take_kwarg(kwargs, "start");
    if args.is_empty() || args.len() > 2 || (args.len() == 2 && keyword_start.is_some()) {
        return Err(fault(
            FaultKind::TypeError,
            format!("sum() takes at most 2 arguments ({} given)", args.len()),
        ));
    }
    let start = if args.len() == 2 { args.pop() } else { keyword_start };
    let mut total = start.unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(fault(
            FaultKind::TypeError,
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }

    let iterable = args.remove(0);
    interp.for_each_item(&iterable, |interp, item| {
        total = interp.binary_op(BinaryOp::Add, &total, &item)?;
        Ok(true)
    })?;
    Ok(total)
}

fn abs(value: Value) -> Exec<Value> {
    match value.as_number() {
        Some(Number::Int(i)) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| fault(FaultKind::OverflowError, "integer overflow")),
        Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
        None => Err(fault(
            FaultKind::TypeError,
            format!("bad operand type for abs(): '{}'", value.type_name()),
        )),
    }
}

/// Float to int the way `int()` and `round()` do it
fn float_to_int(f: f64) -> Exec<i64> {
    if f.is_nan() {
        return Err(fault(FaultKind::ValueError, "cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(fault(
            FaultKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    // 2^63 is exactly representable; anything at or past it does not fit.
    if f >= 9_223_372_036_854_775_808.0 || f < -9_223_372_036_854_775_808.0 {
        return Err(fault(FaultKind::OverflowError, "integer overflow"));
    }
    Ok(f as i64)
}

fn round(args: Vec<Value>) -> Exec<Value> {
    let (value, ndigits) = match args.len() {
        1 => (&args[0], None),
        2 => (&args[0], if matches!(args[1], Value::None) { None } else { Some(integer_arg(&args[1])?) }),
        n => {
            return Err(fault(
                FaultKind::TypeError,
                format!("round() takes at most 2 arguments ({} given)", n),
            ))
        }
    };

    match (value.as_number(), ndigits) {
        (Some(Number::Float(f)), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
        (Some(Number::Float(f)), Some(n)) => Ok(Value::Float(round_float(f, n))),
        (Some(Number::Int(i)), None) => Ok(Value::Int(i)),
        (Some(Number::Int(i)), Some(n)) => round_int(i, n).map(Value::Int),
        (None, _) => Err(fault(
            FaultKind::TypeError,
            format!("type {} doesn't define __round__ method", value.type_name()),
        )),
    }
}

fn round_float(f: f64, ndigits: i64) -> f64 {
    if !f.is_finite() || ndigits > 308 {
        return f;
    }
    if ndigits < -308 {
        return 0.0f64.copysign(f);
    }
    let scale = 10f64.powi(ndigits as i32);
    let scaled = f * scale;
    if !scaled.is_finite() {
        return f;
    }
    scaled.round_ties_even() / scale
}

fn round_int(value: i64, ndigits: i64) -> Exec<i64> {
    if ndigits >= 0 {
        return Ok(value);
    }
    if ndigits < -18 {
        return Ok(0);
    }
    let p = 10i64.pow((-ndigits) as u32);
    let q = value.div_euclid(p);
    let r = value.rem_euclid(p);
    let q = match (2 * r as i128).cmp(&(p as i128)) {
        Ordering::Greater => q + 1,
        Ordering::Equal if q % 2 != 0 => q + 1,
        _ => q,
    };
    q.checked_mul(p)
        .ok_or_else(|| fault(FaultKind::OverflowError, "integer overflow"))
}

fn to_str(interp: &mut Interpreter, value: Option<Value>) -> Exec<Value> {
    match value {
        None => interp.new_str(String::new()),
        Some(Value::Str(s)) => Ok(Value::Str(s)),
        Some(other) => {
            let text = interp.render(&other, false)?;
            interp.new_str(text)
        }
    }
}

/// Remove `_` digit separators, which are only legal between two digits
fn strip_digit_separators(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'_' {
            let before = i.checked_sub(1).and_then(|j| bytes.get(j));
            let after = bytes.get(i + 1);
            if !matches!((before, after), (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit()) {
                return None;
            }
        }
    }
    Some(text.replace('_', ""))
}

fn to_int(value: Option<Value>) -> Exec<Value> {
    let value = match value {
        None => return Ok(Value::Int(0)),
        Some(v) => v,
    };
    match &value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => Ok(Value::Int(float_to_int(f.trunc())?)),
        Value::Str(s) => {
            let raw = s.as_str();
            let invalid = || {
                let mut shown = String::new();
                value.write_repr(&mut shown, 200);
                fault(
                    FaultKind::ValueError,
                    format!("invalid literal for int() with base 10: {}", shown),
                )
            };
            let trimmed = raw.trim();
            let (negative, digits) = match trimmed.as_bytes().first() {
                Some(b'-') => (true, &trimmed[1..]),
                Some(b'+') => (false, &trimmed[1..]),
                _ => (false, trimmed),
            };
            let digits = strip_digit_separators(digits).ok_or_else(invalid)?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let signed = if negative { format!("-{}", digits) } else { digits };
            signed
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| fault(FaultKind::OverflowError, "integer overflow"))
        }
        other => Err(fault(
            FaultKind::TypeError,
            format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ),
        )),
    }
}

fn to_float(value: Option<Value>) -> Exec<Value> {
    let value = match value {
        None => return Ok(Value::Float(0.0)),
        Some(v) => v,
    };
    match &value {
        Value::Str(s) => {
            let trimmed = s.as_str().trim();
            let lowered = trimmed.to_ascii_lowercase();
            let unsigned = lowered.trim_start_matches(['+', '-']);
            let negative = lowered.starts_with('-');
            let special = match unsigned {
                "inf" | "infinity" => Some(f64::INFINITY),
                "nan" => Some(f64::NAN),
                _ => None,
            };
            if lowered.len() - unsigned.len() <= 1 {
                if let Some(f) = special {
                    return Ok(Value::Float(if negative { -f } else { f }));
                }
            }
            let parsed = strip_digit_separators(trimmed)
                .filter(|t| t.bytes().all(|b| b.is_ascii_digit() || b"+-.eE".contains(&b)))
                .and_then(|t| t.parse::<f64>().ok());
            parsed.map(Value::Float).ok_or_else(|| {
                let mut shown = String::new();
                value.write_repr(&mut shown, 200);
                fault(
                    FaultKind::ValueError,
                    format!("could not convert string to float: {}", shown),
                )
            })
        }
        other => match other.as_number() {
            Some(n) => Ok(Value::Float(n.to_f64())),
            None => Err(fault(
                FaultKind::TypeError,
                format!(
                    "float() argument must be a string or a real number, not '{}'",
                    other.type_name()
                ),
            )),
        },
    }
}

fn sorted(interp: &mut Interpreter, args: Vec<Value>, kwargs: &mut Kwargs) -> Exec<Value> {
    let reverse = take_kwarg(kwargs, "reverse").map_or(false, |v| v.truthy());
    if let Some((name, _)) = kwargs.first() {
        return Err(fault(
            FaultKind::TypeError,
            format!("'{}' is an invalid keyword argument for sort()", name),
        ));
    }
    let iterable = exactly_one(Operation::Sorted, args)?;
    let mut items = interp.collect_items(&iterable)?;

    // Reversing around a stable sort keeps equal items in their original order.
    if reverse {
        items.reverse();
    }
    let mut items = merge_sort(interp, items)?;
    if reverse {
        items.reverse();
    }
    interp.new_list(items)
}

fn less_than(interp: &mut Interpreter, a: &Value, b: &Value) -> Exec<bool> {
    Ok(compare(a, b, "<", &mut || interp.tick())? == Some(Ordering::Less))
}

/// Stable merge sort with a fallible comparison that only ever asks `<`
fn merge_sort(interp: &mut Interpreter, mut items: Vec<Value>) -> Exec<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    interp.heap().ensure(items.len() as u64 * SLOT_SIZE)?;

    let mut width = 1;
    while width < items.len() {
        let mut merged = Vec::with_capacity(items.len());
        let mut source = std::mem::take(&mut items).into_iter().peekable();
        loop {
            let left: Vec<Value> = source.by_ref().take(width).collect();
            if left.is_empty() {
                break;
            }
            let right: Vec<Value> = source.by_ref().take(width).collect();
            let mut left = left.into_iter().peekable();
            let mut right = right.into_iter().peekable();
            loop {
                let take_right = match (left.peek(), right.peek()) {
                    (Some(l), Some(r)) => less_than(interp, r, l)?,
                    (Some(_), None) => false,
                    (None, Some(_)) => true,
                    (None, None) => break,
                };
                let next = if take_right { right.next() } else { left.next() };
                merged.extend(next);
            }
        }
        items = merged;
        width *= 2;
    }
    Ok(items)
}

fn reversed(interp: &mut Interpreter, value: Value) -> Exec<Value> {
    match &value {
        Value::List(_) | Value::Str(_) | Value::Range(_) => {
            let mut items = interp.collect_items(&value)?;
            items.reverse();
            interp.new_list(items)
        }
        other => Err(fault(
            FaultKind::TypeError,
            format!("'{}' object is not reversible", other.type_name()),
        )),
    }
}
