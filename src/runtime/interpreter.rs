//! Tree-walking interpreter for the lesson dialect.
//!
//! A run starts from nothing: empty globals, a heap meter sized from the
//! budget, an output capture sized from the policy and an operation table
//! holding exactly the operations the policy allows. Name lookup goes local
//! frame, then globals, then that table. Nothing else is reachable.
//!
//! The interpreter checks the budget at every statement, loop iteration,
//! call, produced element and compared element pair, and turns an exhausted budget into an
//! [`Interrupt`] that unwinds the whole run.

use crate::config::descriptor::PolicyDescriptor;
use crate::config::types::{FaultDiagnostic, FaultKind, RawOutcome};
use crate::core::governor::Budget;
use crate::exec::validator::ValidatedSubmission;
use crate::runtime::builtins::{self, Operation};
use crate::runtime::heap::{Heap, MemoryExceeded, SLOT_SIZE};
use crate::runtime::value::{
    compare, equal, identical, ListObj, Number, RangeValue, StrObj, Value,
};
use crate::script::ast::{
    BinaryOp, BoolOp, CompareOp, Expr, ExprKind, FunctionDef, Program, Stmt, StmtKind, Target,
    UnaryOp,
};
use crate::script::parser::parse;
use crate::utils::output::OutputCapture;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// Deepest chain of user function calls
pub const MAX_CALL_DEPTH: usize = 100;

/// Steps between wall-clock reads; the cancel flag is checked every step
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// Why evaluation stopped early
#[derive(Debug)]
pub enum Interrupt {
    Fault(FaultDiagnostic),
    TimedOut,
    MemoryExceeded,
}

impl Interrupt {
    fn at(self, line: usize) -> Self {
        match self {
            Interrupt::Fault(d) => Interrupt::Fault(d.at(line)),
            other => other,
        }
    }
}

impl From<FaultDiagnostic> for Interrupt {
    fn from(d: FaultDiagnostic) -> Self {
        Interrupt::Fault(d)
    }
}

impl From<MemoryExceeded> for Interrupt {
    fn from(_: MemoryExceeded) -> Self {
        Interrupt::MemoryExceeded
    }
}

pub type Exec<T> = Result<T, Interrupt>;

pub fn fault(kind: FaultKind, message: impl Into<String>) -> Interrupt {
    Interrupt::Fault(FaultDiagnostic::new(kind, message, None))
}

fn overflow() -> Interrupt {
    fault(FaultKind::OverflowError, "integer overflow")
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Parse and execute one validated submission
pub fn run(submission: &ValidatedSubmission, policy: &PolicyDescriptor, budget: Budget) -> RawOutcome {
    let program = match parse(submission.source()) {
        Ok(program) => program,
        Err(diagnostic) => return RawOutcome::Faulted(diagnostic),
    };
    let mut interpreter = Interpreter::new(policy, budget);
    let result = interpreter.execute(&program);
    interpreter.finish(result)
}

pub struct Interpreter {
    heap: Rc<Heap>,
    budget: Budget,
    operations: HashMap<&'static str, Operation>,
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    output: OutputCapture,
    steps: u64,
}

impl Interpreter {
    pub fn new(policy: &PolicyDescriptor, budget: Budget) -> Self {
        let operations = Operation::ALL
            .iter()
            .filter(|op| policy.allows(op.name()))
            .map(|op| (op.name(), *op))
            .collect();
        Self {
            heap: Heap::new(budget.memory_bytes()),
            budget,
            operations,
            globals: HashMap::new(),
            frames: Vec::new(),
            output: OutputCapture::new(policy.max_output_bytes),
            steps: 0,
        }
    }

    pub fn execute(&mut self, program: &Program) -> Exec<()> {
        self.exec_block(&program.body).map(|_| ())
    }

    /// Turn the end of a run into its raw outcome. Output written before a
    /// fault or a limit is discarded.
    pub fn finish(mut self, result: Exec<()>) -> RawOutcome {
        match result {
            Ok(()) => {
                let output = std::mem::replace(&mut self.output, OutputCapture::new(0));
                RawOutcome::Completed(output.finish())
            }
            Err(Interrupt::Fault(diagnostic)) => RawOutcome::Faulted(diagnostic),
            Err(Interrupt::TimedOut) => RawOutcome::TimedOut,
            Err(Interrupt::MemoryExceeded) => RawOutcome::MemoryExceeded,
        }
    }

    pub fn heap(&self) -> &Rc<Heap> {
        &self.heap
    }

    pub fn output(&mut self) -> &mut OutputCapture {
        &mut self.output
    }

    /// One unit of work against the budget
    pub fn tick(&mut self) -> Exec<()> {
        self.steps += 1;
        if self.budget.is_cancelled() {
            return Err(Interrupt::TimedOut);
        }
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 && self.budget.deadline_passed() {
            return Err(Interrupt::TimedOut);
        }
        Ok(())
    }

    pub fn new_str(&self, text: String) -> Exec<Value> {
        Ok(Value::Str(StrObj::new(&self.heap, text)?))
    }

    pub fn new_list(&self, items: Vec<Value>) -> Exec<Value> {
        Ok(Value::List(ListObj::new(&self.heap, items)?))
    }

    /// `str()` or `repr()` text of a value, bounded by the free heap
    pub fn render(&self, value: &Value, repr: bool) -> Exec<String> {
        let limit = usize::try_from(self.heap.remaining()).unwrap_or(usize::MAX);
        let mut out = String::new();
        if repr {
            value.write_repr(&mut out, limit);
        } else {
            value.write_str(&mut out, limit);
        }
        if out.len() >= limit {
            return Err(Interrupt::MemoryExceeded);
        }
        Ok(out)
    }

    /// Feed every element of `iterable` to `f` until it returns `false`.
    ///
    /// Lists are walked by index so changes made by `f` are observed.
    pub fn for_each_item<F>(&mut self, iterable: &Value, mut f: F) -> Exec<()>
    where
        F: FnMut(&mut Self, Value) -> Exec<bool>,
    {
        match iterable {
            Value::List(list) => {
                let mut index = 0;
                while let Some(item) = list.get(index) {
                    self.tick()?;
                    if !f(self, item)? {
                        break;
                    }
                    index += 1;
                }
            }
            Value::Str(s) => {
                let s = Rc::clone(s);
                for ch in s.as_str().chars() {
                    self.tick()?;
                    let item = self.new_str(ch.to_string())?;
                    if !f(self, item)? {
                        break;
                    }
                }
            }
            Value::Range(range) => {
                for i in 0..range.len() {
                    self.tick()?;
                    if !f(self, Value::Int(range.nth(i)))? {
                        break;
                    }
                }
            }
            other => {
                return Err(fault(
                    FaultKind::TypeError,
                    format!("'{}' object is not iterable", other.type_name()),
                ))
            }
        }
        Ok(())
    }

    /// Materialize `iterable` into a vector, charging its slots up front
    pub fn collect_items(&mut self, iterable: &Value) -> Exec<Vec<Value>> {
        let expected = match iterable {
            Value::List(list) => list.len() as u64,
            Value::Str(s) => s.as_str().len() as u64,
            Value::Range(range) => range.len(),
            _ => 0,
        };
        self.heap.ensure(expected.saturating_mul(SLOT_SIZE))?;
        let mut items = Vec::new();
        self.for_each_item(iterable, |_, item| {
            items.push(item);
            Ok(true)
        })?;
        Ok(items)
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt]) -> Exec<Flow> {
        for stmt in body {
            self.tick()?;
            let flow = self.exec_stmt(stmt).map_err(|e| e.at(stmt.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { test, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(test)?.truthy() {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { var, iter, body } => {
                let iterable = self.eval(iter)?;
                let mut returned = None;
                self.for_each_item(&iterable, |interp, item| {
                    interp.set_name(var, item);
                    match interp.exec_block(body)? {
                        Flow::Break => Ok(false),
                        Flow::Return(value) => {
                            returned = Some(value);
                            Ok(false)
                        }
                        Flow::Normal | Flow::Continue => Ok(true),
                    }
                })?;
                if let Some(value) = returned {
                    return Ok(Flow::Return(value));
                }
            }
            StmtKind::FunctionDef(def) => {
                self.set_name(&def.name, Value::Function(Rc::clone(def)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn set_name(&mut self, name: &str, value: Value) {
        let scope = match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.globals,
        };
        // Replace in place so the old value drops outside the map update.
        let old = scope.insert(name.to_string(), value);
        drop(old);
    }

    fn lookup(&self, name: &str) -> Exec<Value> {
        if let Some(value) = self.frames.last().and_then(|frame| frame.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(op) = self.operations.get(name) {
            return Ok(Value::Operation(*op));
        }
        Err(fault(
            FaultKind::NameError,
            format!("name '{}' is not defined", name),
        ))
    }

    fn assign(&mut self, target: &Target, value: Value) -> Exec<()> {
        match target {
            Target::Name(name) => {
                self.set_name(name, value);
                Ok(())
            }
            Target::Index { target, index } => {
                let container = self.eval(target)?;
                let index = self.eval(index)?;
                self.store_item(&container, &index, value)
            }
        }
    }

    fn store_item(&mut self, container: &Value, index: &Value, value: Value) -> Exec<()> {
        match container {
            Value::List(list) => {
                let i = sequence_index(index, list.len(), "list assignment")?;
                list.set(i, value);
                Ok(())
            }
            other => Err(fault(
                FaultKind::TypeError,
                format!(
                    "'{}' object does not support item assignment",
                    other.type_name()
                ),
            )),
        }
    }

    /// `x op= v` rebinds `x` to `x op v`; lists are not extended in place
    fn aug_assign(&mut self, target: &Target, op: BinaryOp, value: &Expr) -> Exec<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let result = self.binary_op(op, &current, &rhs)?;
                self.set_name(name, result);
            }
            Target::Index { target, index } => {
                let container = self.eval(target)?;
                let index = self.eval(index)?;
                let current = self.index_value(&container, &index)?;
                let rhs = self.eval(value)?;
                let result = self.binary_op(op, &current, &rhs)?;
                self.store_item(&container, &index, result)?;
            }
        }
        Ok(())
    }

    // ---- expressions ----

    fn eval(&mut self, expr: &Expr) -> Exec<Value> {
        self.eval_kind(expr).map_err(|e| e.at(expr.line))
    }

    fn eval_kind(&mut self, expr: &Expr) -> Exec<Value> {
        match &expr.kind {
            ExprKind::None => Ok(Value::None),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => self.new_str(s.clone()),
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                self.new_list(values)
            }
            ExprKind::Name(name) => self.lookup(name),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary_op(*op, &value)
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary_op(*op, &left, &right)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match (op, left.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            ExprKind::Compare { first, rest } => {
                let mut left = self.eval(first)?;
                for (op, next) in rest {
                    let right = self.eval(next)?;
                    if !self.compare_values(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Conditional { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            ExprKind::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, arg) in kwargs {
                    kwarg_values.push((name.clone(), self.eval(arg)?));
                }
                self.call_value(&callee, arg_values, kwarg_values)
            }
            ExprKind::Index { target, index } => {
                let container = self.eval(target)?;
                let index = self.eval(index)?;
                self.index_value(&container, &index)
            }
            ExprKind::Slice {
                target,
                lower,
                upper,
                step,
            } => {
                let container = self.eval(target)?;
                let bound = |interp: &mut Self, expr: &Option<Box<Expr>>| -> Exec<Option<i64>> {
                    match expr {
                        None => Ok(None),
                        Some(expr) => match interp.eval(expr)? {
                            Value::None => Ok(None),
                            other => other.as_int().map(Some).ok_or_else(|| {
                                fault(
                                    FaultKind::TypeError,
                                    "slice indices must be integers or None",
                                )
                            }),
                        },
                    }
                };
                let lower = bound(self, lower)?;
                let upper = bound(self, upper)?;
                let step = bound(self, step)?;
                self.slice_value(&container, lower, upper, step)
            }
        }
    }

    fn call_value(&mut self, callee: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        self.tick()?;
        match callee {
            Value::Operation(op) => builtins::call(self, *op, args, kwargs),
            Value::Function(def) => self.call_function(def, args, kwargs),
            other => Err(fault(
                FaultKind::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    fn call_function(
        &mut self,
        def: &Rc<FunctionDef>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(fault(
                FaultKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let frame = bind_arguments(def, args, kwargs)?;

        self.frames.push(frame);
        let result = self.exec_block(&def.body);
        let frame = self.frames.pop();
        drop(frame);

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn index_value(&mut self, container: &Value, index: &Value) -> Exec<Value> {
        match container {
            Value::List(list) => {
                let i = sequence_index(index, list.len(), "list")?;
                list.get(i)
                    .ok_or_else(|| fault(FaultKind::IndexError, "list index out of range"))
            }
            Value::Str(s) => {
                let count = s.as_str().chars().count();
                let i = sequence_index(index, count, "string")?;
                match s.as_str().chars().nth(i) {
                    Some(ch) => self.new_str(ch.to_string()),
                    None => Err(fault(FaultKind::IndexError, "string index out of range")),
                }
            }
            Value::Range(range) => {
                let len = usize::try_from(range.len()).map_err(|_| overflow())?;
                let i = sequence_index(index, len, "range object")?;
                Ok(Value::Int(range.nth(i as u64)))
            }
            other => Err(fault(
                FaultKind::TypeError,
                format!("'{}' object is not subscriptable", other.type_name()),
            )),
        }
    }

    fn slice_value(
        &mut self,
        container: &Value,
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    ) -> Exec<Value> {
        let len = match container {
            Value::List(list) => list.len() as i128,
            Value::Str(s) => s.as_str().chars().count() as i128,
            Value::Range(range) => range.len() as i128,
            other => {
                return Err(fault(
                    FaultKind::TypeError,
                    format!("'{}' object is not subscriptable", other.type_name()),
                ))
            }
        };
        let slice = SliceIndices::new(len, lower, upper, step)?;

        match container {
            Value::List(list) => {
                self.heap.ensure(slice.count as u64 * SLOT_SIZE)?;
                let items = list.with_items(|items| {
                    slice
                        .positions()
                        .filter_map(|i| items.get(i as usize).cloned())
                        .collect::<Vec<_>>()
                });
                self.new_list(items)
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.as_str().chars().collect();
                let text: String = slice
                    .positions()
                    .filter_map(|i| chars.get(i as usize))
                    .collect();
                self.new_str(text)
            }
            Value::Range(range) => {
                let start = range.start as i128 + slice.start * range.step as i128;
                let step = range.step as i128 * slice.step;
                let stop = start + slice.count * step;
                let fit = |v: i128| i64::try_from(v).map_err(|_| overflow());
                Ok(Value::Range(RangeValue {
                    start: fit(start)?,
                    stop: fit(stop)?,
                    step: fit(step)?,
                }))
            }
            _ => Err(fault(FaultKind::TypeError, "object is not subscriptable")),
        }
    }

    /// Arithmetic with the integer semantics learners expect: floor division,
    /// sign-of-divisor modulo, and a fault instead of wrapping on overflow.
    pub fn binary_op(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Exec<Value> {
        match (op, left, right) {
            (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
                let size = a.as_str().len() as u64 + b.as_str().len() as u64;
                self.heap.ensure(size)?;
                let mut text = String::with_capacity(size as usize);
                text.push_str(a.as_str());
                text.push_str(b.as_str());
                self.new_str(text)
            }
            (BinaryOp::Add, Value::List(a), Value::List(b)) => {
                self.heap.ensure((a.len() as u64 + b.len() as u64) * SLOT_SIZE)?;
                let mut items = a.snapshot();
                items.extend(b.snapshot());
                self.new_list(items)
            }
            (BinaryOp::Add, Value::Str(_), other) => Err(fault(
                FaultKind::TypeError,
                format!(
                    "can only concatenate str (not \"{}\") to str",
                    other.type_name()
                ),
            )),
            (BinaryOp::Add, Value::List(_), other) => Err(fault(
                FaultKind::TypeError,
                format!(
                    "can only concatenate list (not \"{}\") to list",
                    other.type_name()
                ),
            )),
            (BinaryOp::Mul, Value::Str(_) | Value::List(_), Value::Int(_) | Value::Bool(_)) => {
                self.repeat(left, repeat_count(right))
            }
            (BinaryOp::Mul, Value::Int(_) | Value::Bool(_), Value::Str(_) | Value::List(_)) => {
                self.repeat(right, repeat_count(left))
            }
            _ => match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => arithmetic(op, a, b),
                _ => Err(fault(
                    FaultKind::TypeError,
                    format!(
                        "unsupported operand type(s) for {}: '{}' and '{}'",
                        op.symbol(),
                        left.type_name(),
                        right.type_name()
                    ),
                )),
            },
        }
    }

    fn repeat(&mut self, sequence: &Value, times: u64) -> Exec<Value> {
        match sequence {
            Value::Str(s) => {
                let size = (s.as_str().len() as u64)
                    .checked_mul(times)
                    .ok_or(Interrupt::MemoryExceeded)?;
                self.heap.ensure(size)?;
                self.new_str(s.as_str().repeat(times as usize))
            }
            Value::List(list) => {
                let slots = (list.len() as u64)
                    .checked_mul(times)
                    .and_then(|n| n.checked_mul(SLOT_SIZE))
                    .ok_or(Interrupt::MemoryExceeded)?;
                self.heap.ensure(slots)?;
                let items = list.snapshot();
                if items.is_empty() || times == 0 {
                    return self.new_list(Vec::new());
                }
                let mut repeated = Vec::with_capacity(items.len() * times as usize);
                for _ in 0..times {
                    self.tick()?;
                    repeated.extend(items.iter().cloned());
                }
                self.new_list(repeated)
            }
            other => Err(fault(
                FaultKind::TypeError,
                format!("can't multiply sequence of type '{}'", other.type_name()),
            )),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.frames.clear();
        self.globals.clear();
        // Lists that still reference each other are emptied here.
        self.heap.release_all();
    }
}

fn bind_arguments(
    def: &FunctionDef,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<HashMap<String, Value>> {
    if args.len() > def.params.len() {
        return Err(fault(
            FaultKind::TypeError,
            format!(
                "{}() takes {} positional argument{} but {} {} given",
                def.name,
                def.params.len(),
                if def.params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" }
            ),
        ));
    }

    let mut frame = HashMap::with_capacity(def.params.len());
    for (param, value) in def.params.iter().zip(args) {
        frame.insert(param.clone(), value);
    }
    for (name, value) in kwargs {
        if !def.params.contains(&name) {
            return Err(fault(
                FaultKind::TypeError,
                format!("{}() got an unexpected keyword argument '{}'", def.name, name),
            ));
        }
        if frame.contains_key(&name) {
            return Err(fault(
                FaultKind::TypeError,
                format!("{}() got multiple values for argument '{}'", def.name, name),
            ));
        }
        frame.insert(name, value);
    }

    let missing: Vec<&str> = def
        .params
        .iter()
        .filter(|p| !frame.contains_key(*p))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        let names = missing
            .iter()
            .map(|p| format!("'{}'", p))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(fault(
            FaultKind::TypeError,
            format!(
                "{}() missing {} required positional argument{}: {}",
                def.name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                names
            ),
        ));
    }
    Ok(frame)
}

fn repeat_count(count: &Value) -> u64 {
    count.as_int().unwrap_or(0).max(0) as u64
}

/// Resolve a possibly negative index against `len`
fn sequence_index(index: &Value, len: usize, what: &str) -> Exec<usize> {
    let raw = index.as_int().ok_or_else(|| {
        fault(
            FaultKind::TypeError,
            format!(
                "{} indices must be integers or slices, not {}",
                what.trim_end_matches(" assignment"),
                index.type_name()
            ),
        )
    })?;
    let resolved = if raw < 0 { raw as i128 + len as i128 } else { raw as i128 };
    if resolved < 0 || resolved >= len as i128 {
        return Err(fault(
            FaultKind::IndexError,
            format!("{} index out of range", what),
        ));
    }
    Ok(resolved as usize)
}

/// Normalized `start:stop:step` over a sequence of known length
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SliceIndices {
    start: i128,
    step: i128,
    count: i128,
}

impl SliceIndices {
    fn new(len: i128, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Exec<Self> {
        let step = step.unwrap_or(1) as i128;
        if step == 0 {
            return Err(fault(FaultKind::ValueError, "slice step cannot be zero"));
        }
        let (low, high) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |bound: Option<i64>, default: i128| match bound {
            None => default,
            Some(v) => {
                let v = v as i128;
                if v < 0 {
                    (v + len).max(low)
                } else {
                    v.min(high)
                }
            }
        };
        let start = clamp(lower, if step > 0 { low } else { high });
        let stop = clamp(upper, if step > 0 { high } else { low });
        let count = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && stop < start {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        Ok(Self { start, step, count })
    }

    fn positions(self) -> impl Iterator<Item = i128> {
        (0..self.count).map(move |k| self.start + k * self.step)
    }
}

fn unary_op(op: UnaryOp, value: &Value) -> Exec<Value> {
    match (op, value.as_number()) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Some(Number::Int(i))) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Some(Number::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Some(Number::Int(i))) => Ok(Value::Int(i)),
        (UnaryOp::Pos, Some(Number::Float(f))) => Ok(Value::Float(f)),
        (UnaryOp::Neg | UnaryOp::Pos, None) => Err(fault(
            FaultKind::TypeError,
            format!(
                "bad operand type for unary {}: '{}'",
                if op == UnaryOp::Neg { "-" } else { "+" },
                value.type_name()
            ),
        )),
    }
}

fn arithmetic(op: BinaryOp, a: Number, b: Number) -> Exec<Value> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => int_arithmetic(op, x, y),
        _ => float_arithmetic(op, a.to_f64(), b.to_f64()),
    }
}

fn int_arithmetic(op: BinaryOp, x: i64, y: i64) -> Exec<Value> {
    let checked = |v: Option<i64>| v.map(Value::Int).ok_or_else(overflow);
    match op {
        BinaryOp::Add => checked(x.checked_add(y)),
        BinaryOp::Sub => checked(x.checked_sub(y)),
        BinaryOp::Mul => checked(x.checked_mul(y)),
        BinaryOp::Div => float_arithmetic(op, x as f64, y as f64),
        BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(fault(
                    FaultKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                Ok(Value::Int(q - 1))
            } else {
                Ok(Value::Int(q))
            }
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(fault(FaultKind::ZeroDivisionError, "integer modulo by zero"));
            }
            let r = x.checked_rem(y).unwrap_or(0);
            if r != 0 && ((r < 0) != (y < 0)) {
                Ok(Value::Int(r + y))
            } else {
                Ok(Value::Int(r))
            }
        }
        BinaryOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(fault(
                        FaultKind::ZeroDivisionError,
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            match (x, u32::try_from(y)) {
                (0 | 1, _) => Ok(Value::Int(if y == 0 { 1 } else { x })),
                (-1, _) => Ok(Value::Int(if y % 2 == 0 { 1 } else { -1 })),
                (_, Ok(exp)) => checked(x.checked_pow(exp)),
                (_, Err(_)) => Err(overflow()),
            }
        }
    }
}

fn float_arithmetic(op: BinaryOp, x: f64, y: f64) -> Exec<Value> {
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(fault(FaultKind::ZeroDivisionError, "division by zero"));
            }
            x / y
        }
        BinaryOp::FloorDiv => {
            if y == 0.0 {
                return Err(fault(
                    FaultKind::ZeroDivisionError,
                    "float floor division by zero",
                ));
            }
            (x / y).floor()
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(fault(FaultKind::ZeroDivisionError, "float modulo by zero"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinaryOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(fault(
                    FaultKind::ZeroDivisionError,
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if x < 0.0 && y.fract() != 0.0 && y.is_finite() {
                return Err(fault(
                    FaultKind::ValueError,
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(fault(FaultKind::OverflowError, "numerical result out of range"));
            }
            r
        }
    };
    Ok(Value::Float(result))
}

impl Interpreter {
    fn compare_values(&mut self, op: CompareOp, left: &Value, right: &Value) -> Exec<bool> {
        let wanted: &[Ordering] = match op {
            CompareOp::Eq => return equal(left, right, &mut || self.tick()),
            CompareOp::NotEq => return Ok(!equal(left, right, &mut || self.tick())?),
            CompareOp::In => return self.contains(right, left),
            CompareOp::NotIn => return Ok(!self.contains(right, left)?),
            CompareOp::Is => return Ok(identical(left, right)),
            CompareOp::IsNot => return Ok(!identical(left, right)),
            CompareOp::Lt => &[Ordering::Less],
            CompareOp::LtE => &[Ordering::Less, Ordering::Equal],
            CompareOp::Gt => &[Ordering::Greater],
            CompareOp::GtE => &[Ordering::Greater, Ordering::Equal],
        };
        let ordering = compare(left, right, op.symbol(), &mut || self.tick())?;
        Ok(ordering.map_or(false, |o| wanted.contains(&o)))
    }

    fn contains(&mut self, container: &Value, item: &Value) -> Exec<bool> {
        match container {
            Value::List(list) => {
                let items = list.snapshot();
                for candidate in &items {
                    if equal(candidate, item, &mut || self.tick())? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.as_str().contains(needle.as_str())),
                other => Err(fault(
                    FaultKind::TypeError,
                    format!(
                        "'in <string>' requires string as left operand, not {}",
                        other.type_name()
                    ),
                )),
            },
            Value::Range(range) => match item.as_number() {
                Some(Number::Int(i)) => Ok(range.contains(i)),
                Some(Number::Float(f)) if f.fract() == 0.0 && f.abs() < 9.2e18 => {
                    Ok(range.contains(f as i64))
                }
                _ => Ok(false),
            },
            other => Err(fault(
                FaultKind::TypeError,
                format!("argument of type '{}' is not iterable", other.type_name()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{CodeSubmission, ResourceLimits};
    use crate::exec::validator::validate;
    use std::time::Duration;

    fn policy() -> PolicyDescriptor {
        PolicyDescriptor::default().with_operations(Operation::ALL.iter().map(|op| op.name()))
    }

    fn run_with(source: &str, policy: &PolicyDescriptor) -> RawOutcome {
        let validated = validate(CodeSubmission::new(source), policy)
            .unwrap_or_else(|reason| panic!("{source:?} was blocked: {reason}"));
        let budget = Budget::new(&ResourceLimits {
            wall_clock: Duration::from_secs(5),
            memory_bytes: policy.max_memory_bytes,
            output_bytes: policy.max_output_bytes,
        });
        run(&validated, policy, budget)
    }

    fn output(source: &str) -> String {
        match run_with(source, &policy()) {
            RawOutcome::Completed(captured) => captured.text,
            other => panic!("{source:?} did not complete: {other:?}"),
        }
    }

    fn fault_of(source: &str) -> FaultDiagnostic {
        match run_with(source, &policy()) {
            RawOutcome::Faulted(d) => d,
            other => panic!("{source:?} did not fault: {other:?}"),
        }
    }

    #[test]
    fn test_hello_world() {
        assert_eq!(output("print(\"Hello, World!\")"), "Hello, World!\n");
        assert_eq!(output(""), "");
    }

    #[test]
    fn test_arithmetic_semantics() {
        assert_eq!(output("print(7 // 2, -7 // 2, 7 % -3, -7 % 3)"), "3 -4 -2 2\n");
        assert_eq!(output("print(7 / 2, 2 ** 10, 2 ** -1)"), "3.5 1024 0.5\n");
        assert_eq!(output("print(1 + 2 * 3, (1 + 2) * 3, -2 ** 2)"), "7 9 -4\n");
        assert_eq!(output("print(0.1 + 0.2, 1e20, 3.0)"), "0.30000000000000004 1e+20 3.0\n");
        assert_eq!(output("print(True + True, 5 % 2.5)"), "2 0.0\n");
    }

    #[test]
    fn test_division_by_zero_faults() {
        let d = fault_of("x = 1\nprint(x / 0)");
        assert_eq!(d.kind, FaultKind::ZeroDivisionError);
        assert_eq!(d.line, Some(2));
        assert_eq!(fault_of("1 % 0").kind, FaultKind::ZeroDivisionError);
    }

    #[test]
    fn test_integer_overflow_faults() {
        let d = fault_of("x = 9223372036854775807\nx = x + 1");
        assert_eq!(d.kind, FaultKind::OverflowError);
        assert_eq!(d.to_string(), "OverflowError: integer overflow (line 2)");
        assert_eq!(fault_of("print(2 ** 64)").kind, FaultKind::OverflowError);
    }

    #[test]
    fn test_strings_and_lists() {
        assert_eq!(output("s = 'abc'\nprint(s[0], s[-1], s[::-1], len(s))"), "a c cba 3\n");
        assert_eq!(output("a = [1, 2, 3]\na[0] = 9\nprint(a, a[1:], a * 2)"), "[9, 2, 3] [2, 3] [9, 2, 3, 9, 2, 3]\n");
        assert_eq!(output("print('ab' * 3, 'x' + 'y', ['a', None, True])"), "ababab xy ['a', None, True]\n");
        assert_eq!(output("print(2 in [1, 2], 'b' in 'abc', 5 not in range(3))"), "True True True\n");
        assert_eq!(output("print(list(range(10))[2:8:3], range(10)[::2])"), "[2, 5] range(0, 10, 2)\n");
    }

    #[test]
    fn test_index_errors() {
        let d = fault_of("a = [1]\nprint(a[5])");
        assert_eq!(d.kind, FaultKind::IndexError);
        assert_eq!(d.message, "list index out of range");
        assert_eq!(fault_of("'abc'[1] = 'x'").kind, FaultKind::TypeError);
        assert_eq!(fault_of("[1][::0]").kind, FaultKind::ValueError);
    }

    #[test]
    fn test_control_flow() {
        let source = "total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        continue\n    if i > 7:\n        break\n    total += i\nprint(total)";
        assert_eq!(output(source), "16\n");
        assert_eq!(output("n = 0\nwhile n < 5: n += 1\nprint(n)"), "5\n");
        assert_eq!(output("x = 3\nprint('big' if x > 2 else 'small')"), "big\n");
        assert_eq!(output("print(1 < 2 < 3, 1 < 3 < 2, 0 or 'x', 1 and 0)"), "True False x 0\n");
    }

    #[test]
    fn test_functions_and_recursion() {
        let source = "def fib(n):\n    if n < 2:\n        return n\n    return fib(n - 1) + fib(n - 2)\nprint(fib(15))";
        assert_eq!(output(source), "610\n");
        assert_eq!(output("def f(a, b):\n    return a - b\nprint(f(b=1, a=5))"), "4\n");
        assert_eq!(output("def f():\n    pass\nprint(f())"), "None\n");

        let d = fault_of("def f(n):\n    return f(n + 1)\nf(0)");
        assert_eq!(d.kind, FaultKind::RecursionError);
        let d = fault_of("def f(a):\n    return a\nf(1, 2)");
        assert_eq!(d.message, "f() takes 1 positional argument but 2 were given");
        let d = fault_of("def f(a, b):\n    return a\nf(1)");
        assert_eq!(d.message, "f() missing 1 required positional argument: 'b'");
    }

    #[test]
    fn test_locals_do_not_leak() {
        let d = fault_of("def f():\n    inner = 1\nf()\nprint(inner)");
        assert_eq!(d.kind, FaultKind::NameError);
        assert_eq!(d.line, Some(4));
        assert_eq!(output("g = 10\ndef f():\n    return g + 1\nprint(f())"), "11\n");
    }

    #[test]
    fn test_builtins() {
        assert_eq!(output("print(min([3, 1, 2]), max(3, 7, 5), sum(range(101)))"), "1 7 5050\n");
        assert_eq!(output("print(abs(-4), round(2.5), round(3.5), round(3.14159, 2))"), "4 2 4 3.14\n");
        assert_eq!(output("print(str(12) + '!', int('  -42 '), float('1.5'), bool([]))"), "12! -42 1.5 False\n");
        assert_eq!(output("print(sorted([3, 1, 2]), sorted('bca', reverse=True))"), "[1, 2, 3] ['c', 'b', 'a']\n");
        assert_eq!(output("print(reversed([1, 2, 3]), list('ab'))"), "[3, 2, 1] ['a', 'b']\n");
        assert_eq!(output("print(1, 2, sep='-', end='!')"), "1-2!");
        assert_eq!(fault_of("int('abc')").kind, FaultKind::ValueError);
        assert_eq!(fault_of("min([])").kind, FaultKind::ValueError);
        assert_eq!(fault_of("sorted([1, 'a'])").kind, FaultKind::TypeError);
        assert_eq!(fault_of("len(5)").kind, FaultKind::TypeError);
    }

    #[test]
    fn test_operations_outside_policy_are_absent() {
        let narrow = PolicyDescriptor::default();
        match run_with("print(abs(-1))", &narrow) {
            RawOutcome::Faulted(d) => {
                assert_eq!(d.kind, FaultKind::NameError);
                assert_eq!(d.message, "name 'abs' is not defined");
            }
            other => panic!("unexpected {:?}", other),
        }
        let nothing = PolicyDescriptor::default().with_operations(Vec::<String>::new());
        assert!(matches!(run_with("print(1)", &nothing), RawOutcome::Faulted(_)));
    }

    #[test]
    fn test_output_before_fault_is_discarded() {
        let d = fault_of("print('partial')\nundefined_name");
        assert_eq!(d.kind, FaultKind::NameError);
    }

    #[test]
    fn test_character_straddling_the_output_cap_marks_truncation() {
        let policy = PolicyDescriptor {
            max_output_bytes: 10,
            ..policy()
        };
        let source = "print('aaaaaaaaa\u{20ac}', end='')\nprint('b', end='')";
        match run_with(source, &policy) {
            RawOutcome::Completed(captured) => {
                assert_eq!(captured.text, "aaaaaaaaa");
                assert!(captured.is_truncated());
                assert_eq!(captured.dropped_bytes, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_output_is_capped() {
        let policy = PolicyDescriptor {
            max_output_bytes: 100,
            ..policy()
        };
        match run_with("for i in range(1000): print('xxxxxxxxxx')", &policy) {
            RawOutcome::Completed(captured) => {
                assert_eq!(captured.text.len(), 100);
                assert!(captured.is_truncated());
                assert!(captured.dropped_bytes > 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_memory_limit() {
        let policy = PolicyDescriptor {
            max_memory_bytes: 1 << 20,
            ..policy()
        };
        assert_eq!(run_with("x = [0] * 10000000", &policy), RawOutcome::MemoryExceeded);
        assert_eq!(run_with("s = 'a' * 100000000", &policy), RawOutcome::MemoryExceeded);
        let grow = "s = 'a'\nwhile True:\n    s = s + s";
        assert_eq!(run_with(grow, &policy), RawOutcome::MemoryExceeded);
        let many = "a = []\nwhile True:\n    a = [a, a]";
        assert_eq!(run_with(many, &policy), RawOutcome::MemoryExceeded);
    }

    #[test]
    fn test_repeating_an_empty_list_is_instant() {
        let policy = PolicyDescriptor {
            max_wall_clock_millis: 200,
            ..policy()
        };
        let validated = validate(
            CodeSubmission::new("print([] * 10**18)\nprint([1, 2] * 0)"),
            &policy,
        )
        .unwrap();
        let budget = Budget::new(&policy.limits());
        match run(&validated, &policy, budget) {
            RawOutcome::Completed(captured) => assert_eq!(captured.text, "[]\n[]\n"),
            other => panic!("repetition did not complete: {other:?}"),
        }
    }

    const SHARED_TREES: &str = "a = [0]\nb = [0]\nfor i in range(40):\n    a = [a, a]\n    b = [b, b]\n";

    #[test]
    fn test_cancellation_stops_a_structural_comparison() {
        for check in ["print(a == b)", "print(a < b)", "print(a in [b])", "print(sorted([a, b]))"] {
            let policy = policy();
            let source = format!("{SHARED_TREES}{check}");
            let validated = validate(CodeSubmission::new(source), &policy).unwrap();
            let budget = Budget::new(&ResourceLimits {
                wall_clock: Duration::from_secs(60),
                memory_bytes: policy.max_memory_bytes,
                output_bytes: policy.max_output_bytes,
            });
            let cancel = budget.cancel_flag();

            let (tx, rx) = crossbeam_channel::bounded(1);
            std::thread::Builder::new()
                .stack_size(crate::core::governor::RUN_STACK_SIZE)
                .spawn(move || {
                    let _ = tx.send(run(&validated, &policy, budget));
                })
                .unwrap();

            std::thread::sleep(Duration::from_millis(200));
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
            let outcome = rx
                .recv_timeout(Duration::from_secs(5))
                .unwrap_or_else(|_| panic!("{check} kept running after cancellation"));
            assert_eq!(outcome, RawOutcome::TimedOut, "{check}");
        }
    }

    #[test]
    fn test_deadline_stops_a_structural_comparison() {
        let policy = PolicyDescriptor {
            max_wall_clock_millis: 100,
            ..policy()
        };
        let source = format!("{SHARED_TREES}print(a == b)");
        let validated = validate(CodeSubmission::new(source), &policy).unwrap();
        let budget = Budget::new(&policy.limits());
        assert_eq!(run(&validated, &policy, budget), RawOutcome::TimedOut);
    }

    #[test]
    fn test_cancellation_stops_a_spin() {
        let policy = policy();
        let validated = validate(CodeSubmission::new("while True: pass"), &policy).unwrap();
        let budget = Budget::new(&ResourceLimits {
            wall_clock: Duration::from_secs(60),
            memory_bytes: policy.max_memory_bytes,
            output_bytes: policy.max_output_bytes,
        });
        budget.cancel();
        assert_eq!(run(&validated, &policy, budget), RawOutcome::TimedOut);
    }

    #[test]
    fn test_deadline_stops_a_spin() {
        let policy = policy();
        let validated = validate(CodeSubmission::new("while True: pass"), &policy).unwrap();
        let budget = Budget::new(&ResourceLimits {
            wall_clock: Duration::from_millis(20),
            memory_bytes: policy.max_memory_bytes,
            output_bytes: policy.max_output_bytes,
        });
        assert_eq!(run(&validated, &policy, budget), RawOutcome::TimedOut);
    }

    #[test]
    fn test_syntax_error_is_a_fault() {
        let d = fault_of("print(1\nx = (");
        assert_eq!(d.kind, FaultKind::SyntaxError);
    }

    #[test]
    fn test_self_referencing_list() {
        assert_eq!(output("a = [1]\na[0] = a\nprint(a)"), "[[...]]\n");
        let cyclic = "a = [1]\na[0] = a\nb = [1]\nb[0] = b\nprint(a == b)";
        assert_eq!(fault_of(cyclic).kind, FaultKind::RecursionError);
    }

    #[test]
    fn test_runs_are_independent() {
        let first = run_with("x = 1\nprint(x)", &policy());
        let second = run_with("print(x)", &policy());
        assert!(matches!(first, RawOutcome::Completed(_)));
        assert!(matches!(second, RawOutcome::Faulted(d) if d.kind == FaultKind::NameError));
    }

    #[test]
    fn test_slice_indices() {
        let s = SliceIndices::new(5, None, None, Some(-1)).unwrap();
        assert_eq!(s.positions().collect::<Vec<_>>(), vec![4, 3, 2, 1, 0]);
        let s = SliceIndices::new(5, Some(-2), Some(100), None).unwrap();
        assert_eq!(s.positions().collect::<Vec<_>>(), vec![3, 4]);
        let s = SliceIndices::new(5, Some(4), Some(1), None).unwrap();
        assert_eq!(s.count, 0);
    }
}
