//! Builtin members and intrinsics
//!
//! The per-kind property and method tables that route interpreted code
//! onto the runtime's composite data services, plus the handful of
//! intrinsic callables (`Console`, `Json`, `GetMemoryUsage`,
//! `InvokeByAttribute`) that need the raw evaluator state.
//!
//! Higher-order operations evaluate their lambda over the snapshot
//! first, keeping intermediate results pinned, then drive the runtime
//! operation with the precomputed answers.

use crate::ast::{Arg, FuncDecl, Node};
use crate::eval::{Interp, LambdaValue};
use sable_core::arena::HeapPtr;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_runtime::value::Value;
use sable_runtime::{arith, arrays, coerce, dict, display, enums, json, nullable, strings};
use std::rc::Rc;

/// Names the dispatcher treats as built-in callables.
pub fn is_intrinsic(name: &str) -> bool {
    matches!(
        name,
        "Console.Write"
            | "Console.WriteLine"
            | "Json.Serialize"
            | "Json.Deserialize"
            | "Json.SerializeXaml"
            | "GetMemoryUsage"
            | "InvokeByAttribute"
            | "Range"
    )
}

pub fn intrinsic_call(interp: &mut Interp, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "Console.Write" | "Console.WriteLine" => {
            let mut text = String::new();
            for (i, v) in args.iter().enumerate() {
                if i > 0 {
                    text.push(' ');
                }
                text.push_str(&display::to_display(&interp.mem, *v)?);
            }
            if name == "Console.WriteLine" {
                text.push('\n');
            }
            interp.out.push(&text);
            Ok(Value::Null)
        }
        "Json.Serialize" => {
            let [v] = args else {
                return Err(arity(name, 1, args.len()));
            };
            let text = json::serialize(&interp.mem, *v)?;
            Ok(Value::Str(strings::alloc_string(&mut interp.mem, &text)?))
        }
        "Json.Deserialize" => {
            let [v] = args else {
                return Err(arity(name, 1, args.len()));
            };
            let text = strings::expect_string(&interp.mem, *v)?;
            json::deserialize(&mut interp.mem, &text)
        }
        // Shape-compatible with the serializer; intentionally produces
        // nothing.
        "Json.SerializeXaml" => {
            let [_] = args else {
                return Err(arity(name, 1, args.len()));
            };
            Ok(Value::Str(strings::alloc_string(&mut interp.mem, "")?))
        }
        "GetMemoryUsage" => Ok(Value::Long(interp.mem.arena.used_bytes() as i64)),
        "Range" => {
            let [start, end] = args else {
                return Err(arity(name, 2, args.len()));
            };
            let start = to_index(interp, *start)?;
            let end = to_index(interp, *end)?;
            Ok(Value::Array(arrays::range(&mut interp.mem, start, end)?))
        }
        "InvokeByAttribute" => {
            let [attr_name, attr_args, call_args] = args else {
                return Err(arity(name, 3, args.len()));
            };
            let attr_name = strings::expect_string(&interp.mem, *attr_name)?;
            let attr_values = array_values(interp, *attr_args)?;
            let call_values = array_values(interp, *call_args)?;
            interp.invoke_by_attribute(&attr_name, &attr_values, &call_values)
        }
        _ => Err(err(ErrorKind::NameError, format!("no intrinsic '{name}'"))),
    }
}

fn array_values(interp: &Interp, v: Value) -> RunResult<Vec<Value>> {
    match v {
        Value::Array(p) => arrays::to_values(&interp.mem, p),
        Value::Null => Ok(Vec::new()),
        other => Err(err(
            ErrorKind::TypeMismatch,
            format!("expected an array, got {}", other.kind()),
        )),
    }
}

// ---- properties ----

pub fn property(interp: &mut Interp, value: Value, name: &str) -> RunResult<Value> {
    let v = match (value, name) {
        (Value::Str(p), "Length") => {
            Value::Int(strings::read_string(&interp.mem, p)?.encode_utf16().count() as i32)
        }
        (Value::Array(p), "Length" | "Count") => Value::Int(arrays::count(&interp.mem, p)? as i32),
        (Value::Dict(p), "Count") => Value::Int(dict::count(&interp.mem, p)? as i32),
        (Value::Dict(p), "Keys") => {
            let keys = dict::keys(&interp.mem, p)?;
            let kind = arrays::common_kind(&keys);
            Value::Array(arrays::from_values(&mut interp.mem, kind, &keys)?)
        }
        (Value::Dict(p), "Values") => {
            let values = dict::values(&interp.mem, p)?;
            let kind = arrays::common_kind(&values);
            Value::Array(arrays::from_values(&mut interp.mem, kind, &values)?)
        }
        (Value::Nullable(p), "HasValue") => {
            Value::Bool(!nullable::read(&interp.mem, p)?.is_null())
        }
        (Value::Null, "HasValue") => Value::Bool(false),
        (Value::Nullable(p), "Value") => {
            let inner = nullable::read(&interp.mem, p)?;
            if inner.is_null() {
                return Err(err(ErrorKind::InvalidPointer, "nullable has no value"));
            }
            inner
        }
        (Value::Null, "Value") => {
            return Err(err(ErrorKind::InvalidPointer, "nullable has no value"));
        }
        (Value::DateTime(d), "Year") => Value::Int(d.year() as i32),
        (Value::DateTime(d), "Month") => Value::Int(d.month() as i32),
        (Value::DateTime(d), "Day") => Value::Int(d.day() as i32),
        (Value::DateTime(d), "Hour") => Value::Int(d.hour() as i32),
        (Value::DateTime(d), "Minute") => Value::Int(d.minute() as i32),
        (Value::DateTime(d), "Second") => Value::Int(d.second() as i32),
        (Value::DateTime(d), "DayOfWeek") => Value::Int(d.day_of_week() as i32),
        (Value::DateTime(d), "Ticks") => Value::Long(d.ticks),
        (Value::TimeSpan(s), "Days") => Value::Int(s.days() as i32),
        (Value::TimeSpan(s), "Hours") => Value::Int(s.hours() as i32),
        (Value::TimeSpan(s), "Minutes") => Value::Int(s.minutes() as i32),
        (Value::TimeSpan(s), "Seconds") => Value::Int(s.seconds() as i32),
        (Value::TimeSpan(s), "TotalSeconds") => Value::Double(s.total_seconds()),
        (Value::TimeSpan(s), "TotalMilliseconds") => Value::Double(s.total_milliseconds()),
        (Value::TimeSpan(s), "Ticks") => Value::Long(s.ticks),
        (other, _) => {
            return Err(err(
                ErrorKind::NameError,
                format!("{} has no member '{name}'", other.kind()),
            ));
        }
    };
    Ok(v)
}

// ---- methods ----

/// Builtin method dispatch. `receiver` names the lvalue the target came
/// from, so shape-changing operations can re-point it.
pub fn method(
    interp: &mut Interp,
    value: Value,
    receiver: Option<&Node>,
    name: &str,
    args: &[Arg],
) -> RunResult<Value> {
    // Universal members first
    match (name, args.len()) {
        ("ToString", 0) => {
            let text = display::to_display(&interp.mem, value)?;
            return Ok(Value::Str(strings::alloc_string(&mut interp.mem, &text)?));
        }
        ("Equals", 1) => {
            let other = interp.eval_expr(&args[0].value)?;
            return Ok(Value::Bool(arith::equals(&interp.mem, value, other)?));
        }
        _ => {}
    }
    match value {
        Value::Array(p) => array_method(interp, p, receiver, name, args),
        Value::Str(p) => string_method(interp, p, name, args),
        Value::Dict(p) => dict_method(interp, p, receiver, name, args),
        Value::Enum(p) if name == "GetName" && args.is_empty() => {
            let member = enums::read_enum(&interp.mem, p)?.1;
            Ok(Value::Str(strings::alloc_string(&mut interp.mem, &member)?))
        }
        Value::DateTime(d) => {
            let [arg] = args else {
                return Err(no_member(value, name));
            };
            let n = interp.eval_expr(&arg.value)?;
            let n = match coerce::cast(&mut interp.mem, n, Kind::Double)? {
                Value::Double(x) => x,
                _ => unreachable!(),
            };
            let ticks = |per: i64| (n * per as f64) as i64;
            let span = match name {
                "AddDays" => sable_runtime::datetime::Span { ticks: ticks(sable_runtime::datetime::TICKS_PER_DAY) },
                "AddHours" => sable_runtime::datetime::Span { ticks: ticks(sable_runtime::datetime::TICKS_PER_HOUR) },
                "AddMinutes" => sable_runtime::datetime::Span { ticks: ticks(sable_runtime::datetime::TICKS_PER_MINUTE) },
                "AddSeconds" => sable_runtime::datetime::Span { ticks: ticks(sable_runtime::datetime::TICKS_PER_SECOND) },
                _ => return Err(no_member(value, name)),
            };
            Ok(Value::DateTime(d.add_span(span)?))
        }
        other => Err(no_member(other, name)),
    }
}

fn no_member(value: Value, name: &str) -> sable_core::RuntimeError {
    err(
        ErrorKind::NameError,
        format!("{} has no method '{name}'", value.kind()),
    )
}

fn arity(name: &str, want: usize, got: usize) -> sable_core::RuntimeError {
    err(
        ErrorKind::TypeMismatch,
        format!("'{name}' takes {want} arguments, got {got}"),
    )
}

/// Evaluate plain positional arguments (named arguments have no meaning
/// on builtin members).
fn plain_args(interp: &mut Interp, args: &[Arg]) -> RunResult<Vec<Value>> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if arg.name.is_some() {
            return Err(err(
                ErrorKind::TypeMismatch,
                "builtin members take positional arguments only",
            ));
        }
        out.push(interp.eval_expr(&arg.value)?);
    }
    Ok(out)
}

fn lambda_of(interp: &Interp, v: Value) -> RunResult<Rc<FuncDecl>> {
    if let Value::Object(p) = v {
        let handle = Value::object_handle(&interp.mem, p)?;
        if let Some(lambda) = interp.mem.handles.get(handle)?.downcast_ref::<LambdaValue>() {
            return Ok(lambda.decl.clone());
        }
    }
    Err(err(
        ErrorKind::TypeMismatch,
        format!("expected a lambda, got {}", v.kind()),
    ))
}

/// Evaluate `lambda` for each element, pinning results across later
/// calls. Returns the per-element results in element order.
fn map_elements(
    interp: &mut Interp,
    items: &[Value],
    lambda: &Rc<FuncDecl>,
) -> RunResult<Vec<Value>> {
    let mut results = Vec::with_capacity(items.len());
    let mut pins = Vec::new();
    let outcome = (|| {
        for item in items {
            let r = interp.invoke_lambda(lambda.clone(), &[*item])?;
            if let Some(k) = interp.pin_tmp(&r) {
                pins.push(k);
            }
            results.push(r);
        }
        Ok(())
    })();
    for k in pins {
        interp.mem.unpin(k);
    }
    outcome.map(|_| results)
}

fn bools_of(interp: &Interp, results: &[Value]) -> RunResult<Vec<bool>> {
    results
        .iter()
        .map(|r| match coerce::unwrap_nullable(&interp.mem, *r)? {
            Value::Bool(b) => Ok(b),
            other => Err(err(
                ErrorKind::TypeMismatch,
                format!("predicate must return bool, got {}", other.kind()),
            )),
        })
        .collect()
}

fn array_method(
    interp: &mut Interp,
    p: HeapPtr,
    receiver: Option<&Node>,
    name: &str,
    args: &[Arg],
) -> RunResult<Value> {
    // Operations that re-point the receiver and yield nothing
    let mutating = |interp: &mut Interp, fresh: HeapPtr, receiver: Option<&Node>| -> RunResult<Value> {
        match receiver {
            Some(node) => {
                interp.assign_to(node, Value::Array(fresh))?;
                Ok(Value::Null)
            }
            None => Ok(Value::Array(fresh)),
        }
    };

    // Predicate-style operations share the optional-lambda calling shape
    let has_lambda = !args.is_empty();
    match name {
        "Add" | "Insert" | "RemoveAt" | "Resize" | "Sort" | "SortDescending" | "Reverse" => {
            let values = plain_args(interp, args)?;
            let fresh = match (name, values.as_slice()) {
                ("Add", [v]) => arrays::add(&mut interp.mem, p, *v)?,
                ("Insert", [i, v]) => {
                    let i = to_index(interp, *i)?;
                    arrays::add_at(&mut interp.mem, p, i, *v)?
                }
                ("RemoveAt", [i]) => {
                    let i = to_index(interp, *i)?;
                    arrays::remove_at(&mut interp.mem, p, i)?
                }
                ("Resize", [n]) => {
                    let n = to_index(interp, *n)?;
                    if n < 0 {
                        return Err(err(ErrorKind::IndexOutOfRange, "negative array length"));
                    }
                    arrays::resize(&mut interp.mem, p, n as usize)?
                }
                ("Sort", []) => arrays::sort(&mut interp.mem, p, false)?,
                ("SortDescending", []) => arrays::sort(&mut interp.mem, p, true)?,
                ("Reverse", []) => arrays::reverse(&mut interp.mem, p)?,
                _ => return Err(arity(name, 1, values.len())),
            };
            mutating(interp, fresh, receiver)
        }
        "IndexOf" | "Contains" => {
            let values = plain_args(interp, args)?;
            let [v] = values.as_slice() else {
                return Err(arity(name, 1, values.len()));
            };
            let idx = arrays::index_of(&interp.mem, p, *v)?;
            Ok(if name == "IndexOf" {
                Value::Int(idx as i32)
            } else {
                Value::Bool(idx >= 0)
            })
        }
        "Concat" => {
            let values = plain_args(interp, args)?;
            let [Value::Array(q)] = values.as_slice() else {
                return Err(err(ErrorKind::TypeMismatch, "Concat takes an array"));
            };
            Ok(Value::Array(arrays::concat(&mut interp.mem, p, *q)?))
        }
        "Distinct" => Ok(Value::Array(arrays::distinct(&mut interp.mem, p)?)),
        "Slice" => {
            let values = plain_args(interp, args)?;
            let [start, len] = values.as_slice() else {
                return Err(arity(name, 2, values.len()));
            };
            let start = to_index(interp, *start)?;
            let len = to_index(interp, *len)?;
            Ok(Value::Array(arrays::slice(&mut interp.mem, p, start, len)?))
        }
        "Count" => Ok(Value::Int(arrays::count(&interp.mem, p)? as i32)),
        "Sum" => arrays::sum(&mut interp.mem, p),
        "Average" => arrays::average(&mut interp.mem, p),
        "Select" | "OrderBy" | "OrderByDescending" | "Min" | "Max" => {
            let items = arrays::to_values(&interp.mem, p)?;
            if args.is_empty() {
                // Min/Max over the elements themselves
                let mut id = |_: &mut sable_core::Memory, v: Value| Ok(v);
                return match name {
                    "Min" => arrays::extremum(&mut interp.mem, p, &mut id, true),
                    "Max" => arrays::extremum(&mut interp.mem, p, &mut id, false),
                    _ => Err(arity(name, 1, 0)),
                };
            }
            let values = plain_args(interp, args)?;
            let [l] = values.as_slice() else {
                return Err(arity(name, 1, values.len()));
            };
            let lambda = lambda_of(interp, *l)?;
            let mapped = map_elements(interp, &items, &lambda)?;
            let mut feed = mapped.into_iter();
            let mut next = move |_: &mut sable_core::Memory, _: Value| {
                Ok(feed.next().expect("one result per element"))
            };
            match name {
                "Select" => Ok(Value::Array(arrays::select(&mut interp.mem, p, &mut next)?)),
                "OrderBy" => Ok(Value::Array(arrays::sort_by(&mut interp.mem, p, &mut next, false)?)),
                "OrderByDescending" => {
                    Ok(Value::Array(arrays::sort_by(&mut interp.mem, p, &mut next, true)?))
                }
                "Min" => arrays::extremum(&mut interp.mem, p, &mut next, true),
                "Max" => arrays::extremum(&mut interp.mem, p, &mut next, false),
                _ => unreachable!(),
            }
        }
        "Where" | "All" | "Any" | "First" | "FirstOrDefault" | "Last" | "LastOrDefault"
        | "Single" | "SingleOrDefault" => {
            if name == "Any" && !has_lambda {
                return Ok(Value::Bool(arrays::len(&interp.mem, p)? > 0));
            }
            let from_end = name.starts_with("Last");
            let or_default = name.ends_with("OrDefault");
            let single = name.starts_with("Single");
            let items = arrays::to_values(&interp.mem, p)?;
            let flags: Vec<bool> = if has_lambda {
                let values = plain_args(interp, args)?;
                let [l] = values.as_slice() else {
                    return Err(arity(name, 1, values.len()));
                };
                let lambda = lambda_of(interp, *l)?;
                let results = map_elements(interp, &items, &lambda)?;
                bools_of(interp, &results)?
            } else {
                vec![true; items.len()]
            };
            match name {
                "Where" => {
                    let mut feed = flags.into_iter();
                    let mut next =
                        move |_: &mut sable_core::Memory, _: Value| Ok(feed.next().unwrap_or(false));
                    Ok(Value::Array(arrays::where_(&mut interp.mem, p, &mut next)?))
                }
                "All" => {
                    let mut feed = flags.into_iter();
                    let mut next =
                        move |_: &mut sable_core::Memory, _: Value| Ok(feed.next().unwrap_or(true));
                    Ok(Value::Bool(arrays::all(&mut interp.mem, p, &mut next)?))
                }
                "Any" => {
                    let mut feed = flags.into_iter();
                    let mut next =
                        move |_: &mut sable_core::Memory, _: Value| Ok(feed.next().unwrap_or(false));
                    Ok(Value::Bool(arrays::any(&mut interp.mem, p, &mut next)?))
                }
                _ => {
                    // The find family walks last-first when asked; its
                    // predicate answers were computed in element order
                    let ordered: Vec<bool> = if from_end {
                        flags.into_iter().rev().collect()
                    } else {
                        flags
                    };
                    let mut feed = ordered.into_iter();
                    let mut next =
                        move |_: &mut sable_core::Memory, _: Value| Ok(feed.next().unwrap_or(false));
                    arrays::find(&mut interp.mem, p, &mut next, from_end, or_default, single)
                }
            }
        }
        _ => Err(no_member(Value::Array(p), name)),
    }
}

fn to_index(interp: &mut Interp, v: Value) -> RunResult<i64> {
    match coerce::cast(&mut interp.mem, v, Kind::Long)? {
        Value::Long(i) => Ok(i),
        _ => unreachable!(),
    }
}

fn string_method(interp: &mut Interp, p: HeapPtr, name: &str, args: &[Arg]) -> RunResult<Value> {
    let text = strings::read_string(&interp.mem, p)?;
    let values = plain_args(interp, args)?;
    let str_arg = |i: usize| -> RunResult<String> {
        values
            .get(i)
            .ok_or_else(|| arity(name, i + 1, values.len()))
            .and_then(|v| strings::expect_string(&interp.mem, *v))
    };
    let alloc = |interp: &mut Interp, s: &str| -> RunResult<Value> {
        Ok(Value::Str(strings::alloc_string(&mut interp.mem, s)?))
    };
    match name {
        "Substring" => {
            let [start_v, ..] = values.as_slice() else {
                return Err(arity(name, 1, values.len()));
            };
            let start = to_index(interp, *start_v)?;
            let len = match values.get(1) {
                Some(v) => Some(to_index(interp, *v)?),
                None => None,
            };
            let sub = strings::substring(&text, start, len)?;
            alloc(interp, &sub)
        }
        "Contains" => Ok(Value::Bool(text.contains(&str_arg(0)?))),
        "StartsWith" => Ok(Value::Bool(text.starts_with(&str_arg(0)?))),
        "EndsWith" => Ok(Value::Bool(text.ends_with(&str_arg(0)?))),
        "IndexOf" => Ok(Value::Int(strings::index_of(&text, &str_arg(0)?) as i32)),
        "Replace" => {
            let result = text.replace(&str_arg(0)?, &str_arg(1)?);
            alloc(interp, &result)
        }
        "ToUpper" => alloc(interp, &text.to_uppercase()),
        "ToLower" => alloc(interp, &text.to_lowercase()),
        "Trim" => alloc(interp, text.trim()),
        "Split" => {
            let sep = str_arg(0)?;
            let mut parts = Vec::new();
            let mut pins = Vec::new();
            let outcome = (|| {
                for piece in text.split(sep.as_str()) {
                    let s = strings::alloc_string(&mut interp.mem, piece)?;
                    pins.push(interp.mem.pin(s));
                    parts.push(Value::Str(s));
                }
                arrays::from_values(&mut interp.mem, Kind::Str, &parts)
            })();
            for k in pins {
                interp.mem.unpin(k);
            }
            Ok(Value::Array(outcome?))
        }
        _ => Err(no_member(Value::Str(p), name)),
    }
}

fn dict_method(
    interp: &mut Interp,
    p: HeapPtr,
    receiver: Option<&Node>,
    name: &str,
    args: &[Arg],
) -> RunResult<Value> {
    let values = plain_args(interp, args)?;
    match (name, values.as_slice()) {
        ("ContainsKey", [k]) => Ok(Value::Bool(dict::contains_key(&interp.mem, p, *k)?)),
        ("ContainsValue", [v]) => Ok(Value::Bool(dict::contains_value(&interp.mem, p, *v)?)),
        ("Add", [k, v]) => {
            if dict::contains_key(&interp.mem, p, *k)? {
                return Err(err(
                    ErrorKind::DomainError,
                    "an item with the same key has already been added",
                ));
            }
            dict::set(&mut interp.mem, p, *k, *v)?;
            Ok(Value::Null)
        }
        ("Remove", [k]) => {
            let (fresh, removed) = dict::remove(&mut interp.mem, p, *k)?;
            if removed && let Some(node) = receiver {
                interp.assign_to(node, Value::Dict(fresh))?;
            }
            Ok(Value::Bool(removed))
        }
        _ => Err(no_member(Value::Dict(p), name)),
    }
}
