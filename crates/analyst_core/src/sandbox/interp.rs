//! The restricted executor: a tree-walking interpreter whose environment
//! holds only the sanctioned bindings (`df`, `num`, `arr`, `plot`). Any name
//! outside those, or locally defined by the code itself, does not resolve.
//!
//! Preconditions: the program has passed the policy check and the schema
//! validator. Column lookups are still re-checked here so computed names
//! that dodged the static pass fail with the same message instead of
//! slipping through.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::chart::{ChartBuilder, ChartKind, ChartSpec};
use crate::frame::{Cell, Frame};
use crate::lang::ast::{BinOp, Expr, Program, Stmt, Target, UnaryOp};

use super::value::{BoundMethod, GroupBy, GroupedSeries, Namespace, Series, Value};

/// Any failure during sanctioned execution, caught once at this boundary.
#[derive(Debug, Error, PartialEq)]
#[error("execution failed: {message}")]
pub struct ExecutionFailure {
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub struct ExecutionOutput {
    /// The full final environment, sanctioned bindings included.
    pub env: BTreeMap<String, Value>,
    /// The designated `result` binding; absent is not an error.
    pub result: Option<Value>,
    /// Chart started and drawn by the code, if any.
    pub chart: Option<ChartSpec>,
}

/// Backstop against accidental runaway loops. Not a containment claim.
const MAX_STEPS: u64 = 1_000_000;

pub fn execute(program: &Program, frame: &Frame) -> Result<ExecutionOutput, ExecutionFailure> {
    // Fresh view per execution: reassignments never outlive the call.
    let mut interp = Interpreter::new(frame.clone());
    match interp.run(program) {
        Ok(()) => {
            let result = interp.env.get("result").cloned();
            Ok(ExecutionOutput {
                env: interp.env,
                result,
                chart: interp.chart.finish(),
            })
        }
        Err(message) => Err(ExecutionFailure { message }),
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
}

struct Interpreter {
    env: BTreeMap<String, Value>,
    chart: ChartBuilder,
    steps: u64,
}

impl Interpreter {
    fn new(frame: Frame) -> Self {
        let mut env = BTreeMap::new();
        env.insert("df".to_string(), Value::Frame(frame));
        env.insert("num".to_string(), Value::Namespace(Namespace::Num));
        env.insert("arr".to_string(), Value::Namespace(Namespace::Arr));
        env.insert("plot".to_string(), Value::Namespace(Namespace::Plot));
        Self {
            env,
            chart: ChartBuilder::default(),
            steps: 0,
        }
    }

    fn run(&mut self, program: &Program) -> Result<(), String> {
        match self.exec_block(&program.body)? {
            Flow::Normal => Ok(()),
            Flow::Break => Err("'break' outside a loop".to_string()),
            Flow::Continue => Err("'continue' outside a loop".to_string()),
        }
    }

    fn tick(&mut self) -> Result<(), String> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            Err("step budget exceeded; execution looks like a runaway loop".to_string())
        } else {
            Ok(())
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, String> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, String> {
        self.tick()?;
        match stmt {
            Stmt::Assign { target, value, .. } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
                Ok(Flow::Normal)
            }
            Stmt::AugAssign { target, op, value, .. } => {
                let current = self.read_target(target)?;
                let rhs = self.eval(value)?;
                let updated = self.binop(current, *op, rhs)?;
                self.assign(target, updated)?;
                Ok(Flow::Normal)
            }
            Stmt::Expr { value, .. } => {
                self.eval(value)?;
                Ok(Flow::Normal)
            }
            Stmt::If { branches, orelse, .. } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy()? {
                        return self.exec_block(body);
                    }
                }
                self.exec_block(orelse)
            }
            Stmt::For { var, iter, body, .. } => {
                let items = self.iterable(iter)?;
                for item in items {
                    self.tick()?;
                    self.env.insert(var.clone(), item);
                    match self.exec_block(body)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        Flow::Continue => continue,
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { cond, body, .. } => {
                loop {
                    self.tick()?;
                    if !self.eval(cond)?.truthy()? {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        Flow::Continue => continue,
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Pass { .. } => Ok(Flow::Normal),
            // The policy gate rejects these kinds before execution.
            other => Err(format!(
                "statement on line {} is not executable",
                other.line()
            )),
        }
    }

    fn iterable(&mut self, expr: &Expr) -> Result<Vec<Value>, String> {
        let value = self.eval(expr)?;
        match value {
            Value::List(items) => Ok(items),
            Value::Series(s) => Ok(s.cells.into_iter().map(Value::from_cell).collect()),
            Value::Mapping(items) => Ok(items.into_iter().map(|(k, _)| Value::Str(k)).collect()),
            other => Err(format!("cannot iterate over a {}", other.type_name())),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), String> {
        match target {
            Target::Name(name) => {
                self.env.insert(name.clone(), value);
                Ok(())
            }
            Target::Index { obj, index } => {
                let Expr::Name(name) = obj else {
                    return Err("only simple name[index] assignment is supported".to_string());
                };
                let index = self.eval(index)?;
                let mut container = self
                    .env
                    .remove(name.as_str())
                    .ok_or_else(|| format!("name '{name}' is not defined"))?;
                let outcome = assign_into(&mut container, index, value);
                self.env.insert(name.clone(), container);
                outcome
            }
            Target::Attr { .. } => Err("attribute assignment is not supported".to_string()),
        }
    }

    fn read_target(&mut self, target: &Target) -> Result<Value, String> {
        match target {
            Target::Name(name) => self
                .env
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| format!("name '{name}' is not defined")),
            Target::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                self.index_value(obj, index)
            }
            Target::Attr { obj, name } => {
                let obj = self.eval(obj)?;
                self.attr_value(obj, name)
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, String> {
        self.tick()?;
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::NoneLit => Ok(Value::None),
            Expr::Name(name) => self
                .env
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| format!("name '{name}' is not defined")),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::List(values))
            }
            Expr::Dict(items) => {
                let mut pairs = Vec::with_capacity(items.len());
                for (key, value) in items {
                    let key = match self.eval(key)? {
                        Value::Str(s) => s,
                        Value::Int(i) => i.to_string(),
                        other => {
                            return Err(format!(
                                "mapping keys must be strings, not {}",
                                other.type_name()
                            ))
                        }
                    };
                    pairs.push((key, self.eval(value)?));
                }
                Ok(Value::Mapping(pairs))
            }
            Expr::Attr { obj, name } => {
                let obj = self.eval(obj)?;
                self.attr_value(obj, name)
            }
            Expr::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                self.index_value(obj, index)
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    kwarg_values.push((name.clone(), self.eval(value)?));
                }
                match callee {
                    Value::Method(method) => {
                        let BoundMethod { recv, name } = *method;
                        self.call_method(recv, &name, arg_values, kwarg_values)
                    }
                    other => Err(format!("a {} is not callable", other.type_name())),
                }
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy()?)),
                    UnaryOp::Neg => negate(value),
                }
            }
            Expr::Binary { op, left, right } => match op {
                BinOp::And => {
                    if !self.eval(left)?.truthy()? {
                        Ok(Value::Bool(false))
                    } else {
                        Ok(Value::Bool(self.eval(right)?.truthy()?))
                    }
                }
                BinOp::Or => {
                    if self.eval(left)?.truthy()? {
                        Ok(Value::Bool(true))
                    } else {
                        Ok(Value::Bool(self.eval(right)?.truthy()?))
                    }
                }
                BinOp::In | BinOp::NotIn => {
                    let needle = self.eval(left)?;
                    let haystack = self.eval(right)?;
                    let found = contains(&haystack, &needle)?;
                    Ok(Value::Bool(if *op == BinOp::In { found } else { !found }))
                }
                _ => {
                    let left = self.eval(left)?;
                    let right = self.eval(right)?;
                    self.binop(left, *op, right)
                }
            },
            Expr::Ternary { cond, then, orelse } => {
                if self.eval(cond)?.truthy()? {
                    self.eval(then)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda => Err("lambda is not executable".to_string()),
        }
    }

    fn attr_value(&mut self, obj: Value, name: &str) -> Result<Value, String> {
        match obj {
            Value::Namespace(Namespace::Num) if name == "pi" => {
                Ok(Value::Float(std::f64::consts::PI))
            }
            Value::Namespace(Namespace::Num) if name == "e" => {
                Ok(Value::Float(std::f64::consts::E))
            }
            Value::Frame(ref f) if name == "shape" => Ok(Value::List(vec![
                Value::Int(f.n_rows() as i64),
                Value::Int(f.n_cols() as i64),
            ])),
            Value::Frame(ref f) if name == "columns" => Ok(Value::List(
                f.column_names().into_iter().map(Value::Str).collect(),
            )),
            Value::Namespace(_)
            | Value::Series(_)
            | Value::Frame(_)
            | Value::GroupBy(_)
            | Value::GroupedSeries(_) => Ok(Value::Method(Box::new(BoundMethod {
                recv: obj,
                name: name.to_string(),
            }))),
            other => Err(format!("a {} has no attribute '{name}'", other.type_name())),
        }
    }

    fn index_value(&mut self, obj: Value, index: Value) -> Result<Value, String> {
        match (obj, index) {
            (Value::Frame(frame), Value::Str(name)) => {
                let col = frame
                    .column(&name)
                    .ok_or_else(|| unknown_column(&name, &frame))?;
                Ok(Value::Series(Series::new(name, col.cells().to_vec())))
            }
            (Value::Frame(frame), Value::Series(mask)) => {
                let mut keep = Vec::with_capacity(mask.cells.len());
                for cell in &mask.cells {
                    match cell {
                        Cell::Bool(b) => keep.push(*b),
                        Cell::Null => keep.push(false),
                        other => {
                            return Err(format!(
                                "frame mask must be boolean, found {}",
                                other.type_name()
                            ))
                        }
                    }
                }
                frame.filter_rows(&keep).map(Value::Frame).map_err(|e| e.to_string())
            }
            (Value::GroupBy(group), Value::Str(name)) => {
                grouped_series(&group, &name).map(Value::GroupedSeries)
            }
            (Value::Series(series), Value::Int(i)) => {
                let cell = pick(&series.cells, i, "series")?;
                Ok(Value::from_cell(cell.clone()))
            }
            (Value::List(items), Value::Int(i)) => Ok(pick(&items, i, "list")?.clone()),
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let c = pick(&chars, i, "string")?;
                Ok(Value::Str(c.to_string()))
            }
            (Value::Mapping(items), Value::Str(key)) => items
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| format!("key '{key}' not found")),
            (obj, index) => Err(format!(
                "cannot index a {} with a {}",
                obj.type_name(),
                index.type_name()
            )),
        }
    }

    fn binop(&mut self, left: Value, op: BinOp, right: Value) -> Result<Value, String> {
        // Element-wise series semantics win whenever a series is involved.
        match (&left, &right) {
            (Value::Series(a), Value::Series(b)) => {
                if a.cells.len() != b.cells.len() {
                    return Err(format!(
                        "columns '{}' and '{}' have different lengths",
                        a.name, b.name
                    ));
                }
                let mut cells = Vec::with_capacity(a.cells.len());
                for (x, y) in a.cells.iter().zip(&b.cells) {
                    cells.push(cell_binop(x, op, y)?);
                }
                return Ok(Value::Series(Series::new(a.name.clone(), cells)));
            }
            (Value::Series(a), _) => {
                let scalar = right.to_cell()?;
                let mut cells = Vec::with_capacity(a.cells.len());
                for x in &a.cells {
                    cells.push(cell_binop(x, op, &scalar)?);
                }
                return Ok(Value::Series(Series::new(a.name.clone(), cells)));
            }
            (_, Value::Series(b)) => {
                let scalar = left.to_cell()?;
                let mut cells = Vec::with_capacity(b.cells.len());
                for y in &b.cells {
                    cells.push(cell_binop(&scalar, op, y)?);
                }
                return Ok(Value::Series(Series::new(b.name.clone(), cells)));
            }
            _ => {}
        }
        scalar_binop(left, op, right)
    }

    fn call_method(
        &mut self,
        recv: Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, String> {
        match recv {
            Value::Namespace(Namespace::Num) => self.num_call(name, args, kwargs),
            Value::Namespace(Namespace::Arr) => arr_call(name, args),
            Value::Namespace(Namespace::Plot) => self.plot_call(name, args, kwargs),
            Value::Series(series) => series_call(&series, name, args, kwargs),
            Value::Frame(frame) => frame_call(&frame, name, args, kwargs),
            Value::GroupedSeries(grouped) => grouped_call(&grouped, name),
            Value::GroupBy(group) => Err(format!(
                "select a column before aggregating, e.g. df.groupby(\"{}\")[\"column\"].{name}()",
                group.key
            )),
            other => Err(format!("a {} has no method '{name}'", other.type_name())),
        }
    }

    fn num_call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, String> {
        if name == "round" {
            let mut args = args.into_iter();
            let value = args
                .next()
                .ok_or_else(|| "num.round expects a value".to_string())?;
            let ndigits = match args.next().or_else(|| {
                kwargs
                    .into_iter()
                    .find(|(k, _)| k == "ndigits")
                    .map(|(_, v)| v)
            }) {
                Some(Value::Int(n)) => n,
                Some(other) => {
                    return Err(format!(
                        "num.round ndigits must be an int, not {}",
                        other.type_name()
                    ))
                }
                None => 0,
            };
            let factor = 10f64.powi(ndigits as i32);
            return map_numeric(value, &format!("num.{name}"), &|v: f64| {
                Ok::<f64, String>((v * factor).round() / factor)
            });
        }

        let f: fn(f64) -> Result<f64, String> = match name {
            "sqrt" => |v| {
                if v < 0.0 {
                    Err("num.sqrt of a negative value".to_string())
                } else {
                    Ok(v.sqrt())
                }
            },
            "log" => |v| {
                if v <= 0.0 {
                    Err("num.log of a non-positive value".to_string())
                } else {
                    Ok(v.ln())
                }
            },
            "log10" => |v| {
                if v <= 0.0 {
                    Err("num.log10 of a non-positive value".to_string())
                } else {
                    Ok(v.log10())
                }
            },
            "exp" => |v| Ok(v.exp()),
            "abs" => |v| Ok(v.abs()),
            "floor" => |v| Ok(v.floor()),
            "ceil" => |v| Ok(v.ceil()),
            _ => return Err(format!("num has no function '{name}'")),
        };
        let value = one_arg(args, &format!("num.{name}"))?;
        map_numeric(value, &format!("num.{name}"), f)
    }

    fn plot_call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, String> {
        match name {
            "figure" => {
                self.chart.figure();
                Ok(Value::None)
            }
            "hist" => {
                let mut args = args.into_iter();
                let data = args
                    .next()
                    .ok_or_else(|| "plot.hist expects the values to bin".to_string())?;
                let (label, x) = trace_cells(data)?;
                let bins = match args.next().or_else(|| {
                    kwargs.into_iter().find(|(k, _)| k == "bins").map(|(_, v)| v)
                }) {
                    Some(Value::Int(n)) if n > 0 => Some(n as usize),
                    Some(other) => {
                        return Err(format!(
                            "plot.hist bins must be a positive int, not {}",
                            other.render()
                        ))
                    }
                    None => None,
                };
                self.chart
                    .add_trace(ChartKind::Hist, label, x, Vec::new())
                    .map_err(|e| e.to_string())?;
                if let Some(bins) = bins {
                    self.chart.set_bins(bins);
                }
                Ok(Value::None)
            }
            "bar" | "line" | "scatter" => {
                let kind = match name {
                    "bar" => ChartKind::Bar,
                    "line" => ChartKind::Line,
                    _ => ChartKind::Scatter,
                };
                let mut args = args.into_iter();
                let first = args
                    .next()
                    .ok_or_else(|| format!("plot.{name} expects data arguments"))?;
                let (label, x, y) = match args.next() {
                    Some(second) => {
                        let (label_x, x) = trace_cells(first)?;
                        let (label_y, y) = trace_cells(second)?;
                        if x.len() != y.len() {
                            return Err(format!(
                                "plot.{name} x and y have different lengths"
                            ));
                        }
                        (label_y.or(label_x), x, y)
                    }
                    None => match first {
                        // A single mapping argument plots keys against values.
                        Value::Mapping(items) => {
                            let mut x = Vec::with_capacity(items.len());
                            let mut y = Vec::with_capacity(items.len());
                            for (k, v) in items {
                                x.push(Cell::Str(k));
                                y.push(v.to_cell()?);
                            }
                            (None, x, y)
                        }
                        other => {
                            return Err(format!(
                                "plot.{name} needs x and y, or a single mapping, not a {}",
                                other.type_name()
                            ))
                        }
                    },
                };
                self.chart
                    .add_trace(kind, label, x, y)
                    .map_err(|e| e.to_string())?;
                Ok(Value::None)
            }
            "title" | "xlabel" | "ylabel" => {
                let value = one_arg(args, &format!("plot.{name}"))?;
                let Value::Str(text) = value else {
                    return Err(format!("plot.{name} expects a string"));
                };
                let outcome = match name {
                    "title" => self.chart.set_title(text),
                    "xlabel" => self.chart.set_x_label(text),
                    _ => self.chart.set_y_label(text),
                };
                outcome.map_err(|e| e.to_string())?;
                Ok(Value::None)
            }
            _ => Err(format!("plot has no function '{name}'")),
        }
    }
}

fn unknown_column(name: &str, frame: &Frame) -> String {
    format!(
        "unknown column(s) referenced: {name}. Available columns are: {}",
        frame.column_names().join(", ")
    )
}

fn pick<'a, T>(items: &'a [T], index: i64, what: &str) -> Result<&'a T, String> {
    let len = items.len() as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 || idx >= len {
        Err(format!("{what} index {index} is out of range (length {len})"))
    } else {
        Ok(&items[idx as usize])
    }
}

fn one_arg(args: Vec<Value>, what: &str) -> Result<Value, String> {
    let mut args = args.into_iter();
    let first = args
        .next()
        .ok_or_else(|| format!("{what} expects one argument"))?;
    if args.next().is_some() {
        return Err(format!("{what} expects exactly one argument"));
    }
    Ok(first)
}

fn negate(value: Value) -> Result<Value, String> {
    match value {
        Value::Int(i) => Ok(Value::Int(-i)),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Series(s) => {
            let mut cells = Vec::with_capacity(s.cells.len());
            for cell in &s.cells {
                cells.push(match cell {
                    Cell::Null => Cell::Null,
                    Cell::Int(i) => Cell::Int(-i),
                    Cell::Float(f) => Cell::Float(-f),
                    other => {
                        return Err(format!("cannot negate a {} value", other.type_name()))
                    }
                });
            }
            Ok(Value::Series(Series::new(s.name, cells)))
        }
        other => Err(format!("cannot negate a {}", other.type_name())),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, String> {
    match haystack {
        Value::List(items) => Ok(items.iter().any(|v| loose_eq(v, needle))),
        Value::Mapping(items) => match needle {
            Value::Str(key) => Ok(items.iter().any(|(k, _)| k == key)),
            other => Err(format!(
                "mapping membership expects a string key, not {}",
                other.type_name()
            )),
        },
        Value::Str(s) => match needle {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            other => Err(format!(
                "string membership expects a string, not {}",
                other.type_name()
            )),
        },
        Value::Series(series) => {
            let cell = needle.to_cell()?;
            Ok(series.cells.contains(&cell))
        }
        other => Err(format!(
            "membership test is not supported on a {}",
            other.type_name()
        )),
    }
}

/// Equality with numeric cross-type comparison (1 == 1.0).
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn scalar_binop(left: Value, op: BinOp, right: Value) -> Result<Value, String> {
    use BinOp::*;
    match op {
        Eq => return Ok(Value::Bool(loose_eq(&left, &right))),
        NotEq => return Ok(Value::Bool(!loose_eq(&left, &right))),
        _ => {}
    }

    // String concatenation coerces the right operand to text, so answers can
    // be assembled without a str() builtin.
    if let (Value::Str(s), Add) = (&left, op) {
        return Ok(Value::Str(format!("{s}{}", right.render())));
    }
    if let (Value::List(a), Value::List(b)) = (&left, &right) {
        if op == Add {
            let mut joined = a.clone();
            joined.extend(b.clone());
            return Ok(Value::List(joined));
        }
    }

    if let (Value::Str(a), Value::Str(b)) = (&left, &right) {
        let cmp = a.cmp(b);
        return ordering_result(op, cmp)
            .ok_or_else(|| "operator is not supported between strings".to_string());
    }

    match (numeric(&left), numeric(&right)) {
        (Some(_), Some(_)) => numeric_binop(left, op, right),
        _ => Err(format!(
            "operator is not supported between {} and {}",
            left.type_name(),
            right.type_name()
        )),
    }
}

fn ordering_result(op: BinOp, cmp: std::cmp::Ordering) -> Option<Value> {
    use std::cmp::Ordering::*;
    let b = match op {
        BinOp::Lt => cmp == Less,
        BinOp::LtEq => cmp != Greater,
        BinOp::Gt => cmp == Greater,
        BinOp::GtEq => cmp != Less,
        _ => return None,
    };
    Some(Value::Bool(b))
}

fn numeric_binop(left: Value, op: BinOp, right: Value) -> Result<Value, String> {
    use BinOp::*;
    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        match op {
            Add => {
                if let Some(v) = a.checked_add(b) {
                    return Ok(Value::Int(v));
                }
            }
            Sub => {
                if let Some(v) = a.checked_sub(b) {
                    return Ok(Value::Int(v));
                }
            }
            Mul => {
                if let Some(v) = a.checked_mul(b) {
                    return Ok(Value::Int(v));
                }
            }
            FloorDiv => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                return Ok(Value::Int(a.div_euclid(b)));
            }
            Mod => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                return Ok(Value::Int(a.rem_euclid(b)));
            }
            Pow => {
                if (0..=62).contains(&b) {
                    if let Some(v) = a.checked_pow(b as u32) {
                        return Ok(Value::Int(v));
                    }
                }
            }
            _ => {}
        }
    }

    let a = numeric(&left).ok_or_else(|| "expected a number".to_string())?;
    let b = numeric(&right).ok_or_else(|| "expected a number".to_string())?;
    match op {
        Add => Ok(Value::Float(a + b)),
        Sub => Ok(Value::Float(a - b)),
        Mul => Ok(Value::Float(a * b)),
        Div => {
            if b == 0.0 {
                Err("division by zero".to_string())
            } else {
                Ok(Value::Float(a / b))
            }
        }
        FloorDiv => {
            if b == 0.0 {
                Err("division by zero".to_string())
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        Mod => {
            if b == 0.0 {
                Err("division by zero".to_string())
            } else {
                Ok(Value::Float(a - b * (a / b).floor()))
            }
        }
        Pow => Ok(Value::Float(a.powf(b))),
        Lt | LtEq | Gt | GtEq => {
            let cmp = a
                .partial_cmp(&b)
                .ok_or_else(|| "comparison with NaN".to_string())?;
            ordering_result(op, cmp).ok_or_else(|| "unsupported comparison".to_string())
        }
        _ => Err("unsupported numeric operator".to_string()),
    }
}

/// One element of an element-wise series operation. Nulls propagate through
/// arithmetic and compare as false.
fn cell_binop(a: &Cell, op: BinOp, b: &Cell) -> Result<Cell, String> {
    use BinOp::*;
    let comparison = matches!(op, Eq | NotEq | Lt | LtEq | Gt | GtEq);
    if a.is_null() || b.is_null() {
        return Ok(if comparison { Cell::Bool(false) } else { Cell::Null });
    }
    if comparison {
        match op {
            Eq => return Ok(Cell::Bool(cell_eq(a, b))),
            NotEq => return Ok(Cell::Bool(!cell_eq(a, b))),
            _ => {}
        }
        let cmp = a.partial_cmp_cell(b).ok_or_else(|| {
            format!("cannot compare {} with {}", a.type_name(), b.type_name())
        })?;
        let Some(Value::Bool(result)) = ordering_result(op, cmp) else {
            return Err("unsupported comparison".to_string());
        };
        return Ok(Cell::Bool(result));
    }

    // Element-wise text concatenation mirrors the scalar rule.
    if let (Cell::Str(s), Add) = (a, op) {
        return Ok(Cell::Str(format!("{s}{}", b.render())));
    }

    let left = a
        .as_f64()
        .map(|_| Value::from_cell(a.clone()))
        .ok_or_else(|| format!("cannot apply arithmetic to a {} value", a.type_name()))?;
    let right = b
        .as_f64()
        .map(|_| Value::from_cell(b.clone()))
        .ok_or_else(|| format!("cannot apply arithmetic to a {} value", b.type_name()))?;
    numeric_binop(left, op, right)?.to_cell()
}

fn cell_eq(a: &Cell, b: &Cell) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Apply a numeric function to a scalar or element-wise to a series.
fn map_numeric(
    value: Value,
    what: &str,
    f: impl Fn(f64) -> Result<f64, String>,
) -> Result<Value, String> {
    match value {
        Value::Int(i) => Ok(Value::Float(f(i as f64)?)),
        Value::Float(v) => Ok(Value::Float(f(v)?)),
        Value::Series(s) => {
            let mut cells = Vec::with_capacity(s.cells.len());
            for cell in &s.cells {
                cells.push(match cell {
                    Cell::Null => Cell::Null,
                    other => match other.as_f64() {
                        Some(v) => Cell::Float(f(v)?),
                        None => {
                            return Err(format!(
                                "{what} cannot be applied to a {} value",
                                other.type_name()
                            ))
                        }
                    },
                });
            }
            Ok(Value::Series(Series::new(s.name, cells)))
        }
        other => Err(format!("{what} expects a number or a column, not a {}", other.type_name())),
    }
}

fn arr_call(name: &str, args: Vec<Value>) -> Result<Value, String> {
    match name {
        "len" => {
            let value = one_arg(args, "arr.len")?;
            let n = match value {
                Value::List(items) => items.len(),
                Value::Mapping(items) => items.len(),
                Value::Str(s) => s.chars().count(),
                Value::Series(s) => s.len(),
                Value::Frame(f) => f.n_rows(),
                other => {
                    return Err(format!("arr.len is not defined for a {}", other.type_name()))
                }
            };
            Ok(Value::Int(n as i64))
        }
        "sum" => {
            let value = one_arg(args, "arr.sum")?;
            match value {
                Value::Series(s) => Ok(Value::Float(s.sum()?)),
                Value::List(items) => {
                    let mut all_int = true;
                    let mut total = 0.0;
                    for item in &items {
                        match item {
                            Value::Int(i) => total += *i as f64,
                            Value::Float(f) => {
                                all_int = false;
                                total += *f;
                            }
                            other => {
                                return Err(format!(
                                    "arr.sum over a list of {} values",
                                    other.type_name()
                                ))
                            }
                        }
                    }
                    if all_int {
                        Ok(Value::Int(total as i64))
                    } else {
                        Ok(Value::Float(total))
                    }
                }
                other => Err(format!("arr.sum is not defined for a {}", other.type_name())),
            }
        }
        "sorted" => {
            let value = one_arg(args, "arr.sorted")?;
            let mut cells = match value {
                Value::Series(s) => s.cells,
                Value::List(items) => {
                    let mut cells = Vec::with_capacity(items.len());
                    for item in items {
                        cells.push(item.to_cell()?);
                    }
                    cells
                }
                other => {
                    return Err(format!(
                        "arr.sorted is not defined for a {}",
                        other.type_name()
                    ))
                }
            };
            cells.sort_by(|a, b| {
                a.partial_cmp_cell(b)
                    .unwrap_or(std::cmp::Ordering::Greater)
            });
            Ok(Value::List(cells.into_iter().map(Value::from_cell).collect()))
        }
        "unique" => {
            let value = one_arg(args, "arr.unique")?;
            match value {
                Value::Series(s) => Ok(Value::List(
                    s.unique().into_iter().map(Value::from_cell).collect(),
                )),
                Value::List(items) => {
                    let mut seen: Vec<Value> = Vec::new();
                    for item in items {
                        if !seen.contains(&item) {
                            seen.push(item);
                        }
                    }
                    Ok(Value::List(seen))
                }
                other => Err(format!(
                    "arr.unique is not defined for a {}",
                    other.type_name()
                )),
            }
        }
        "range" => {
            let mut args = args.into_iter();
            let first = match args.next() {
                Some(Value::Int(i)) => i,
                _ => return Err("arr.range expects integer bounds".to_string()),
            };
            let (start, stop) = match args.next() {
                Some(Value::Int(stop)) => (first, stop),
                Some(_) => return Err("arr.range expects integer bounds".to_string()),
                None => (0, first),
            };
            Ok(Value::List((start..stop).map(Value::Int).collect()))
        }
        _ => Err(format!("arr has no function '{name}'")),
    }
}

fn series_call(
    series: &Series,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, String> {
    match name {
        "mean" => series.mean().map(Value::Float),
        "sum" => series.sum().map(Value::Float),
        "min" => series.min().map(Value::Float),
        "max" => series.max().map(Value::Float),
        "median" => series.median().map(Value::Float),
        "std" => series.std().map(Value::Float),
        "count" => Ok(Value::Int(series.non_null_count() as i64)),
        "nunique" => Ok(Value::Int(series.unique().len() as i64)),
        "unique" => Ok(Value::List(
            series.unique().into_iter().map(Value::from_cell).collect(),
        )),
        "tolist" => Ok(Value::List(
            series.cells.iter().cloned().map(Value::from_cell).collect(),
        )),
        "value_counts" => Ok(Value::Mapping(
            series
                .value_counts()
                .into_iter()
                .map(|(k, n)| (k, Value::Int(n as i64)))
                .collect(),
        )),
        "head" => {
            let n = head_count(args)?;
            Ok(Value::Series(series.head(n)))
        }
        "dropna" => Ok(Value::Series(series.dropna())),
        "sort_values" => {
            let ascending = ascending_flag(kwargs)?;
            Ok(Value::Series(series.sort_values(ascending)))
        }
        "corr" => {
            let other = one_arg(args, "corr")?;
            let Value::Series(other) = other else {
                return Err("corr expects another column".to_string());
            };
            series.corr(&other).map(Value::Float)
        }
        _ => Err(format!("a series has no method '{name}'")),
    }
}

fn frame_call(
    frame: &Frame,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, String> {
    match name {
        "head" => {
            let n = head_count(args)?;
            Ok(Value::Frame(frame.head(n)))
        }
        "sort_values" => {
            let column = one_arg(args, "sort_values")?;
            let Value::Str(column) = column else {
                return Err("sort_values expects a column name".to_string());
            };
            let ascending = ascending_flag(kwargs)?;
            frame
                .sort_by(&column, ascending)
                .map(Value::Frame)
                .ok_or_else(|| unknown_column(&column, frame))
        }
        "groupby" => {
            let key = one_arg(args, "groupby")?;
            let Value::Str(key) = key else {
                return Err("groupby expects a column name".to_string());
            };
            if frame.column(&key).is_none() {
                return Err(unknown_column(&key, frame));
            }
            Ok(Value::GroupBy(GroupBy {
                frame: frame.clone(),
                key,
            }))
        }
        _ => Err(format!("a frame has no method '{name}'")),
    }
}

fn grouped_call(grouped: &GroupedSeries, name: &str) -> Result<Value, String> {
    let mut pairs = Vec::with_capacity(grouped.groups.len());
    for (key, series) in &grouped.groups {
        let value = match name {
            "mean" => Value::Float(series.mean()?),
            "sum" => Value::Float(series.sum()?),
            "min" => Value::Float(series.min()?),
            "max" => Value::Float(series.max()?),
            "median" => Value::Float(series.median()?),
            "std" => Value::Float(series.std()?),
            "count" => Value::Int(series.non_null_count() as i64),
            _ => return Err(format!("a grouped series has no method '{name}'")),
        };
        pairs.push((key.clone(), value));
    }
    Ok(Value::Mapping(pairs))
}

fn grouped_series(group: &GroupBy, column: &str) -> Result<GroupedSeries, String> {
    let frame = &group.frame;
    let value_col = frame
        .column(column)
        .ok_or_else(|| unknown_column(column, frame))?;
    // The key column exists by construction of the GroupBy.
    let key_col = frame
        .column(&group.key)
        .ok_or_else(|| unknown_column(&group.key, frame))?;

    let mut groups: Vec<(String, Vec<Cell>)> = Vec::new();
    for i in 0..frame.n_rows() {
        let key = key_col.cells()[i].render();
        let cell = value_col.cells()[i].clone();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, cells)) => cells.push(cell),
            None => groups.push((key, vec![cell])),
        }
    }
    Ok(GroupedSeries {
        key_name: group.key.clone(),
        value_name: column.to_string(),
        groups: groups
            .into_iter()
            .map(|(k, cells)| (k, Series::new(column, cells)))
            .collect(),
    })
}

fn head_count(args: Vec<Value>) -> Result<usize, String> {
    match args.into_iter().next() {
        None => Ok(5),
        Some(Value::Int(n)) if n >= 0 => Ok(n as usize),
        Some(other) => Err(format!(
            "head expects a non-negative int, not {}",
            other.render()
        )),
    }
}

fn ascending_flag(kwargs: Vec<(String, Value)>) -> Result<bool, String> {
    for (key, value) in kwargs {
        if key == "ascending" {
            return match value {
                Value::Bool(b) => Ok(b),
                other => Err(format!(
                    "ascending must be True or False, not {}",
                    other.render()
                )),
            };
        }
    }
    Ok(true)
}

fn trace_cells(value: Value) -> Result<(Option<String>, Vec<Cell>), String> {
    match value {
        Value::Series(s) => Ok((Some(s.name), s.cells)),
        Value::List(items) => {
            let mut cells = Vec::with_capacity(items.len());
            for item in items {
                cells.push(item.to_cell()?);
            }
            Ok((None, cells))
        }
        other => Err(format!(
            "plot data must be a column or a list, not a {}",
            other.type_name()
        )),
    }
}

fn assign_into(container: &mut Value, index: Value, value: Value) -> Result<(), String> {
    match (&mut *container, index) {
        (Value::Frame(frame), Value::Str(name)) => {
            let cells = match value {
                Value::Series(s) => s.cells,
                Value::List(items) => {
                    let mut cells = Vec::with_capacity(items.len());
                    for item in items {
                        cells.push(item.to_cell()?);
                    }
                    cells
                }
                scalar => vec![scalar.to_cell()?; frame.n_rows()],
            };
            let updated = frame.with_column(&name, cells).map_err(|e| e.to_string())?;
            *container = Value::Frame(updated);
            Ok(())
        }
        (Value::Mapping(items), Value::Str(key)) => {
            match items.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => *slot = value,
                None => items.push((key, value)),
            }
            Ok(())
        }
        (Value::List(items), Value::Int(i)) => {
            let len = items.len() as i64;
            let idx = if i < 0 { len + i } else { i };
            if idx < 0 || idx >= len {
                return Err(format!("list index {i} is out of range (length {len})"));
            }
            items[idx as usize] = value;
            Ok(())
        }
        (container, index) => Err(format!(
            "cannot assign into a {} with a {} index",
            container.type_name(),
            index.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::policy::check;

    fn frame() -> Frame {
        Frame::from_csv_str(
            "age,income,city\n31,50000,Oslo\n45,72000,Bergen\n28,48000,Oslo\n39,,Bergen\n",
        )
        .unwrap()
    }

    fn run(code: &str) -> Result<ExecutionOutput, ExecutionFailure> {
        let program = check(code).expect("code should pass policy");
        execute(&program, &frame())
    }

    #[test]
    fn column_mean_yields_scalar_result() {
        let out = run("result = df[\"age\"].mean()\n").unwrap();
        assert_eq!(out.result, Some(Value::Float(35.75)));
    }

    #[test]
    fn missing_result_binding_reports_absent_not_error() {
        let out = run("x = df[\"age\"].mean()\n").unwrap();
        assert!(out.result.is_none());
        assert!(out.env.contains_key("x"));
    }

    #[test]
    fn unresolved_name_is_a_name_error() {
        let err = run("result = undefined_helper(1)\n").unwrap_err();
        assert!(err.message.contains("name 'undefined_helper' is not defined"));
    }

    #[test]
    fn division_by_zero_is_caught_at_the_boundary() {
        let err = run("result = 1 / 0\n").unwrap_err();
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn computed_column_name_is_checked_at_runtime() {
        let err = run("name = \"salary\"\nresult = df[name].mean()\n").unwrap_err();
        assert!(err.message.contains("salary"));
        assert!(err.message.contains("age, income, city"));
    }

    #[test]
    fn identical_code_is_idempotent_across_runs() {
        let code = "high = df[df[\"income\"] > 49000]\nresult = high[\"age\"].mean()\n";
        let program = check(code).unwrap();
        let frame = frame();
        let first = execute(&program, &frame).unwrap();
        let second = execute(&program, &frame).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn frame_mutation_does_not_outlive_the_call() {
        let frame = frame();
        let program = check("df[\"doubled\"] = df[\"age\"] * 2\nresult = df.shape\n").unwrap();
        let out = execute(&program, &frame).unwrap();
        assert_eq!(
            out.result,
            Some(Value::List(vec![Value::Int(4), Value::Int(4)]))
        );
        // The session frame still has its original three columns.
        assert_eq!(frame.n_cols(), 3);
    }

    #[test]
    fn boolean_mask_filters_rows() {
        let out = run("high = df[df[\"income\"] > 49000]\nresult = arr.len(high)\n").unwrap();
        assert_eq!(out.result, Some(Value::Int(2)));
    }

    #[test]
    fn groupby_mean_returns_ordered_mapping() {
        let out = run("result = df.groupby(\"city\")[\"age\"].mean()\n").unwrap();
        let Some(Value::Mapping(pairs)) = out.result else {
            panic!("expected mapping");
        };
        assert_eq!(pairs[0].0, "Oslo");
        assert_eq!(pairs[0].1, Value::Float(29.5));
        assert_eq!(pairs[1].0, "Bergen");
        assert_eq!(pairs[1].1, Value::Float(42.0));
    }

    #[test]
    fn aggregating_a_groupby_without_selection_is_guided() {
        let err = run("result = df.groupby(\"city\").mean()\n").unwrap_err();
        assert!(err.message.contains("select a column"));
    }

    #[test]
    fn loops_and_conditionals_execute() {
        let code = "\
total = 0
count = 0
for v in df[\"age\"]:
    if v > 35:
        total = total + v
        count = count + 1
result = total / count
";
        let out = run(code).unwrap();
        assert_eq!(out.result, Some(Value::Float(42.0)));
    }

    #[test]
    fn string_concatenation_coerces_the_right_operand() {
        let out = run("result = \"Mean age: \" + num.round(df[\"age\"].mean(), 1)\n").unwrap();
        assert_eq!(out.result, Some(Value::Str("Mean age: 35.8".into())));
    }

    #[test]
    fn plot_requires_an_explicit_figure() {
        let err = run("plot.hist(df[\"age\"], bins=10)\n").unwrap_err();
        assert!(err.message.contains("plot.figure()"));
    }

    #[test]
    fn hist_after_figure_produces_a_chart() {
        let code = "\
plot.figure()
plot.hist(df[\"age\"], bins=4)
plot.title(\"Ages\")
plot.xlabel(\"age\")
result = \"done\"
";
        let out = run(code).unwrap();
        let chart = out.chart.expect("chart should be produced");
        assert_eq!(chart.kind, ChartKind::Hist);
        assert_eq!(chart.bins, Some(4));
        assert_eq!(chart.title.as_deref(), Some("Ages"));
        assert_eq!(chart.traces[0].x.len(), 4);
    }

    #[test]
    fn bar_accepts_a_single_mapping() {
        let code = "\
by_city = df.groupby(\"city\")[\"income\"].mean()
plot.figure()
plot.bar(by_city)
result = by_city
";
        let out = run(code).unwrap();
        let chart = out.chart.unwrap();
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(chart.traces[0].x.len(), 2);
    }

    #[test]
    fn runaway_loop_hits_the_step_budget() {
        let err = run("while True:\n    x = 1\n").unwrap_err();
        assert!(err.message.contains("step budget"));
    }

    #[test]
    fn sanctioned_bindings_are_present_in_the_environment() {
        let out = run("result = 1\n").unwrap();
        for name in ["df", "num", "arr", "plot", "result"] {
            assert!(out.env.contains_key(name), "missing binding {name}");
        }
    }

    #[test]
    fn sort_values_descending() {
        let out =
            run("top = df.sort_values(\"income\", ascending=False)\nresult = top[\"age\"][0]\n")
                .unwrap();
        assert_eq!(out.result, Some(Value::Int(45)));
    }

    #[test]
    fn num_namespace_applies_elementwise() {
        let out = run("result = num.sqrt(df[\"age\"])[0]\n").unwrap();
        let Some(Value::Float(v)) = out.result else {
            panic!("expected float");
        };
        assert!((v - (31.0f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn membership_and_ternary() {
        let out =
            run("city = \"Oslo\"\nresult = \"yes\" if city in df[\"city\"] else \"no\"\n").unwrap();
        assert_eq!(out.result, Some(Value::Str("yes".into())));
    }

    #[test]
    fn null_propagates_through_series_arithmetic() {
        let out = run("result = (df[\"income\"] * 2)[3]\n").unwrap();
        assert_eq!(out.result, Some(Value::None));
    }
}
