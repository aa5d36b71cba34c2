//! Expression evaluation
//!
//! Expressions produce values; the only signals they originate are
//! failures. Calls intercept their callee's `Return` internally, so a
//! caller of `eval_expr` never sees a signal.

use super::{Flow, Interp, LambdaValue};
use crate::ast::{
    Arg, BinKind, FuncDecl, IndexExpr, InterpPart, Node, SwitchExprArm, TypeRef, UnaryKind,
};
use crate::dispatch::resolve_name;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_runtime::arith::{self, ArithOp, CmpOp};
use sable_runtime::value::Value;
use sable_runtime::{arrays, coerce, dict, display, nullable, strings, structs, tuples};
use std::rc::Rc;

impl Interp {
    pub fn eval_expr(&mut self, node: &Node) -> RunResult<Value> {
        self.check()?;
        match node {
            Node::Literal(c) => self.const_value(c),
            Node::InterpString(parts) => self.eval_interp(parts),
            Node::VariableRef { name, cache } => {
                let version = self.mem.scopes.version();
                let var = match cache.get() {
                    Some((v, var)) if v == version => var,
                    _ => {
                        let var = self.mem.scopes.lookup(name).ok_or_else(|| {
                            err(ErrorKind::NameError, format!("'{name}' is not declared"))
                        })?;
                        cache.set(Some((version, var)));
                        var
                    }
                };
                Value::read_cell(&self.mem, var.addr, var.kind)
            }
            Node::UnaryOp { op, operand, postfix } => self.eval_unary(*op, operand, *postfix),
            Node::BinOp { op, left, right } => self.eval_binop(*op, left, right),
            Node::Conditional { cond, then, other } => {
                if self.eval_bool(cond)? {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(other)
                }
            }
            Node::Assign { target, op, value } => self.eval_assign(target, *op, value),
            Node::Index { target, index } => self.eval_index(target, index),
            Node::CollectionExpr(items) => {
                let values = self.eval_list(items)?;
                let kind = arrays::common_kind(&values);
                Ok(Value::Array(arrays::from_values(&mut self.mem, kind, &values)?))
            }
            Node::TupleLiteral(items) => self.eval_tuple_literal(items),
            Node::NewArray { elem, len, init } => self.eval_new_array(elem, len.as_deref(), init),
            Node::NewStruct { type_name, args } => self.eval_new_struct(type_name, args),
            Node::NewDictionary { key, value, entries } => {
                self.eval_new_dictionary(key, value, entries)
            }
            Node::Cast { target, expr } => {
                let v = self.eval_expr(expr)?;
                self.cast_to_type(v, target)
            }
            Node::As { expr, target } => {
                let v = self.eval_expr(expr)?;
                match self.cast_to_type(v, target) {
                    Ok(cast) => Ok(cast),
                    Err(e) if e.is_fatal() => Err(e),
                    Err(_) => Ok(Value::Null),
                }
            }
            Node::Is { expr, pattern } => {
                let v = self.eval_expr(expr)?;
                Ok(Value::Bool(self.match_pattern(pattern, v)?))
            }
            Node::Call { callee, type_args, args } => self.eval_call(callee, type_args, args),
            Node::Member { .. } => self.eval_member_read(node),
            Node::Lambda { params, body } => self.eval_lambda(params, body),
            Node::SwitchExpr { subject, arms } => self.eval_switch_expr(subject, arms),
            other => Err(err(
                ErrorKind::SandboxViolation,
                format!("statement used as an expression: {other:?}"),
            )),
        }
    }

    /// Evaluate a list of expressions, keeping earlier heap results
    /// pinned while later ones run.
    fn eval_list(&mut self, items: &[Node]) -> RunResult<Vec<Value>> {
        let mut values = Vec::with_capacity(items.len());
        let mut pins = Vec::new();
        let result = (|| {
            for item in items {
                let v = self.eval_expr(item)?;
                if let Some(k) = self.pin_tmp(&v) {
                    pins.push(k);
                }
                values.push(v);
            }
            Ok(())
        })();
        for k in pins {
            self.mem.unpin(k);
        }
        result.map(|_| values)
    }

    fn eval_interp(&mut self, parts: &[InterpPart]) -> RunResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                InterpPart::Text(t) => out.push_str(t),
                InterpPart::Expr(e) => {
                    let v = self.eval_expr(e)?;
                    out.push_str(&display::to_display(&self.mem, v)?);
                }
            }
        }
        Ok(Value::Str(strings::alloc_string(&mut self.mem, &out)?))
    }

    fn eval_unary(&mut self, op: UnaryKind, operand: &Node, postfix: bool) -> RunResult<Value> {
        match op {
            UnaryKind::Not => {
                let v = self.eval_expr(operand)?;
                match coerce::unwrap_nullable(&self.mem, v)? {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(err(
                        ErrorKind::TypeMismatch,
                        format!("'!' needs bool, got {}", other.kind()),
                    )),
                }
            }
            UnaryKind::Neg => arith::negate(self.eval_expr(operand)?),
            UnaryKind::Plus => self.eval_expr(operand),
            UnaryKind::BitNot => arith::bit_not(self.eval_expr(operand)?),
            UnaryKind::Inc | UnaryKind::Dec => {
                let old = self.eval_expr(operand)?;
                let delta = Value::Int(1);
                let op = if op == UnaryKind::Inc { ArithOp::Add } else { ArithOp::Sub };
                let new = arith::binary(&mut self.mem, op, old, delta)?;
                self.assign_to(operand, new)?;
                Ok(if postfix { old } else { new })
            }
            UnaryKind::AddressOf => match operand {
                Node::VariableRef { name, .. } => {
                    let var = self.mem.scopes.lookup(name).ok_or_else(|| {
                        err(ErrorKind::NameError, format!("'{name}' is not declared"))
                    })?;
                    Ok(Value::IntPtr(var.addr as i64))
                }
                _ => Err(err(
                    ErrorKind::TypeMismatch,
                    "'&' needs a variable operand",
                )),
            },
            UnaryKind::Deref => {
                let addr = self.deref_address(operand)?;
                Ok(Value::Int(self.mem.arena.read_i32(addr)?))
            }
        }
    }

    /// The address an `nint` dereference reads or writes (one `int`
    /// cell).
    pub(super) fn deref_address(&mut self, operand: &Node) -> RunResult<usize> {
        let v = self.eval_expr(operand)?;
        match coerce::unwrap_nullable(&self.mem, v)? {
            Value::IntPtr(a) if a >= 0 => Ok(a as usize),
            Value::IntPtr(_) => Err(err(ErrorKind::InvalidPointer, "negative pointer")),
            other => Err(err(
                ErrorKind::TypeMismatch,
                format!("'*' needs nint, got {}", other.kind()),
            )),
        }
    }

    fn eval_binop(&mut self, op: BinKind, left: &Node, right: &Node) -> RunResult<Value> {
        // Short-circuit forms first
        match op {
            BinKind::AndAlso => {
                return Ok(Value::Bool(self.eval_bool(left)? && self.eval_bool(right)?));
            }
            BinKind::OrElse => {
                return Ok(Value::Bool(self.eval_bool(left)? || self.eval_bool(right)?));
            }
            BinKind::NullCoalesce => {
                let l = self.eval_expr(left)?;
                if !l.is_null() {
                    return Ok(l);
                }
                return self.eval_expr(right);
            }
            _ => {}
        }
        let l = self.eval_expr(left)?;
        let pin = self.pin_tmp(&l);
        let r = self.eval_expr(right);
        self.unpin_tmp(pin);
        let r = r?;
        self.apply_binop(op, l, r)
    }

    pub(super) fn apply_binop(&mut self, op: BinKind, l: Value, r: Value) -> RunResult<Value> {
        match op {
            BinKind::Add => arith::binary(&mut self.mem, ArithOp::Add, l, r),
            BinKind::Sub => arith::binary(&mut self.mem, ArithOp::Sub, l, r),
            BinKind::Mul => arith::binary(&mut self.mem, ArithOp::Mul, l, r),
            BinKind::Div => arith::binary(&mut self.mem, ArithOp::Div, l, r),
            BinKind::Rem => arith::binary(&mut self.mem, ArithOp::Rem, l, r),
            BinKind::BitAnd => arith::binary(&mut self.mem, ArithOp::BitAnd, l, r),
            BinKind::BitOr => arith::binary(&mut self.mem, ArithOp::BitOr, l, r),
            BinKind::BitXor => arith::binary(&mut self.mem, ArithOp::BitXor, l, r),
            BinKind::Shl => arith::binary(&mut self.mem, ArithOp::Shl, l, r),
            BinKind::Shr => arith::binary(&mut self.mem, ArithOp::Shr, l, r),
            BinKind::Eq => arith::compare(&self.mem, CmpOp::Eq, l, r),
            BinKind::Ne => arith::compare(&self.mem, CmpOp::Ne, l, r),
            BinKind::Lt => arith::compare(&self.mem, CmpOp::Lt, l, r),
            BinKind::Le => arith::compare(&self.mem, CmpOp::Le, l, r),
            BinKind::Gt => arith::compare(&self.mem, CmpOp::Gt, l, r),
            BinKind::Ge => arith::compare(&self.mem, CmpOp::Ge, l, r),
            BinKind::AndAlso | BinKind::OrElse | BinKind::NullCoalesce => {
                unreachable!("short-circuit forms handled before operand evaluation")
            }
        }
    }

    // ---- assignment ----

    fn eval_assign(&mut self, target: &Node, op: Option<BinKind>, value: &Node) -> RunResult<Value> {
        let new_value = match op {
            None => self.eval_expr(value)?,
            Some(BinKind::NullCoalesce) => {
                let current = self.eval_expr(target)?;
                if !current.is_null() {
                    return Ok(current);
                }
                self.eval_expr(value)?
            }
            Some(op) => {
                let current = self.eval_expr(target)?;
                let pin = self.pin_tmp(&current);
                let rhs = self.eval_expr(value);
                self.unpin_tmp(pin);
                self.apply_binop(op, current, rhs?)?
            }
        };
        let pin = self.pin_tmp(&new_value);
        let result = self.assign_to(target, new_value);
        self.unpin_tmp(pin);
        result?;
        Ok(new_value)
    }

    /// Store into an lvalue: variable, array/dictionary index, struct
    /// field or `nint` dereference.
    pub(crate) fn assign_to(&mut self, target: &Node, value: Value) -> RunResult<()> {
        match target {
            Node::VariableRef { name, .. } => {
                let var = self.mem.scopes.lookup(name).ok_or_else(|| {
                    err(ErrorKind::NameError, format!("'{name}' is not declared"))
                })?;
                // Same-base nullables update their block in place
                if var.kind == Kind::Nullable {
                    let slot = self.mem.arena.read_i32(var.addr)?;
                    if nullable::write_in_place(&mut self.mem, slot, value)? {
                        return Ok(());
                    }
                }
                let cast = if value.is_null() {
                    value
                } else {
                    coerce::cast(&mut self.mem, value, var.kind)?
                };
                cast.write_cell(&mut self.mem, var.addr, var.kind)
            }
            Node::Index { target, index } => {
                let container = self.eval_expr(target)?;
                let pin = self.pin_tmp(&container);
                let result = self.assign_index(container, index, value);
                self.unpin_tmp(pin);
                result
            }
            Node::Member { target: inner, name } => {
                let object = self.eval_expr(inner)?;
                match object {
                    Value::Struct(p) | Value::Class(p) => {
                        structs::write_field(&mut self.mem, p, name, value)?;
                        Ok(())
                    }
                    other => Err(err(
                        ErrorKind::TypeMismatch,
                        format!("cannot assign member '{name}' of {}", other.kind()),
                    )),
                }
            }
            Node::UnaryOp { op: UnaryKind::Deref, operand, .. } => {
                let addr = self.deref_address(operand)?;
                let cast = coerce::cast(&mut self.mem, value, Kind::Int)?;
                let Value::Int(x) = cast else { unreachable!() };
                self.mem.arena.write_i32(addr, x)
            }
            other => Err(err(
                ErrorKind::TypeMismatch,
                format!("not an assignable location: {other:?}"),
            )),
        }
    }

    fn assign_index(&mut self, container: Value, index: &IndexExpr, value: Value) -> RunResult<()> {
        let IndexExpr::At { index, from_end } = index else {
            return Err(err(ErrorKind::TypeMismatch, "cannot assign into a range"));
        };
        match container {
            Value::Array(p) => {
                let i = self.index_value(index)?;
                arrays::set(&mut self.mem, p, i, *from_end, value)
            }
            Value::Dict(p) => {
                let key = self.eval_expr(index)?;
                dict::set(&mut self.mem, p, key, value)?;
                Ok(())
            }
            other => Err(err(
                ErrorKind::TypeMismatch,
                format!("cannot index-assign {}", other.kind()),
            )),
        }
    }

    fn index_value(&mut self, node: &Node) -> RunResult<i64> {
        let v = self.eval_expr(node)?;
        let v = coerce::unwrap_nullable(&self.mem, v)?;
        match coerce::cast(&mut self.mem, v, Kind::Long)? {
            Value::Long(i) => Ok(i),
            _ => unreachable!(),
        }
    }

    fn eval_index(&mut self, target: &Node, index: &IndexExpr) -> RunResult<Value> {
        let container = self.eval_expr(target)?;
        let pin = self.pin_tmp(&container);
        let result = self.eval_index_inner(container, index);
        self.unpin_tmp(pin);
        result
    }

    fn eval_index_inner(&mut self, container: Value, index: &IndexExpr) -> RunResult<Value> {
        match index {
            IndexExpr::At { index, from_end } => match container {
                Value::Array(p) => {
                    let i = self.index_value(index)?;
                    arrays::get(&self.mem, p, i, *from_end)
                }
                Value::Str(p) => {
                    let text = strings::read_string(&self.mem, p)?;
                    let i = self.index_value(index)?;
                    Ok(Value::Char(strings::char_at(&text, i, *from_end)?))
                }
                Value::Dict(p) => {
                    let key = self.eval_expr(index)?;
                    dict::get(&self.mem, p, key)
                }
                Value::Tuple(p) => {
                    let i = self.index_value(index)?;
                    if i < 0 {
                        return Err(err(ErrorKind::IndexOutOfRange, "negative tuple index"));
                    }
                    tuples::get(&self.mem, p, i as usize)
                }
                Value::Null => Err(err(ErrorKind::InvalidPointer, "indexing into null")),
                other => Err(err(
                    ErrorKind::TypeMismatch,
                    format!("cannot index {}", other.kind()),
                )),
            },
            IndexExpr::Range { start, end } => {
                let from = match start {
                    Some(n) => self.index_value(n)?,
                    None => 0,
                };
                match container {
                    Value::Array(p) => {
                        let len = arrays::len(&self.mem, p)? as i64;
                        let to = match end {
                            Some(n) => self.index_value(n)?,
                            None => len,
                        };
                        Ok(Value::Array(arrays::slice(&mut self.mem, p, from, to - from)?))
                    }
                    Value::Str(p) => {
                        let text = strings::read_string(&self.mem, p)?;
                        let to = match end {
                            Some(n) => self.index_value(n)?,
                            None => text.encode_utf16().count() as i64,
                        };
                        let sub = strings::substring(&text, from, Some(to - from))?;
                        Ok(Value::Str(strings::alloc_string(&mut self.mem, &sub)?))
                    }
                    other => Err(err(
                        ErrorKind::TypeMismatch,
                        format!("cannot slice {}", other.kind()),
                    )),
                }
            }
        }
    }

    // ---- literals and constructors ----

    fn eval_tuple_literal(&mut self, items: &[(Option<String>, Node)]) -> RunResult<Value> {
        let mut built = Vec::with_capacity(items.len());
        let mut pins = Vec::new();
        let result = (|| {
            for (name, node) in items {
                let v = self.eval_expr(node)?;
                if let Some(k) = self.pin_tmp(&v) {
                    pins.push(k);
                }
                built.push(tuples::TupleItem {
                    value: v,
                    name: name.clone(),
                });
            }
            tuples::alloc_tuple(&mut self.mem, &built).map(Value::Tuple)
        })();
        for k in pins {
            self.mem.unpin(k);
        }
        result
    }

    fn eval_new_array(
        &mut self,
        elem: &TypeRef,
        len: Option<&Node>,
        init: &[Node],
    ) -> RunResult<Value> {
        let values = self.eval_list(init)?;
        let kind = match elem {
            TypeRef::Var => arrays::common_kind(&values),
            other => self.kind_of_type(other)?,
        };
        if let Some(len_node) = len {
            let n = self.index_value(len_node)?;
            if n < 0 {
                return Err(err(ErrorKind::IndexOutOfRange, "negative array length"));
            }
            if !values.is_empty() && values.len() as i64 != n {
                return Err(err(
                    ErrorKind::TypeMismatch,
                    "array initializer length disagrees with the declared length",
                ));
            }
            if values.is_empty() {
                return Ok(Value::Array(arrays::alloc_array(&mut self.mem, kind, n as usize)?));
            }
        }
        Ok(Value::Array(arrays::from_values(&mut self.mem, kind, &values)?))
    }

    fn eval_new_dictionary(
        &mut self,
        key: &TypeRef,
        value: &TypeRef,
        entries: &[(Node, Node)],
    ) -> RunResult<Value> {
        let kk = self.kind_of_type(key)?;
        let vk = self.kind_of_type(value)?;
        let mut built = Vec::with_capacity(entries.len());
        let mut pins = Vec::new();
        let result = (|| {
            for (k_node, v_node) in entries {
                let k = self.eval_expr(k_node)?;
                if let Some(p) = self.pin_tmp(&k) {
                    pins.push(p);
                }
                let v = self.eval_expr(v_node)?;
                if let Some(p) = self.pin_tmp(&v) {
                    pins.push(p);
                }
                built.push((k, v));
            }
            dict::alloc_dict(&mut self.mem, kk, vk, &built).map(Value::Dict)
        })();
        for p in pins {
            self.mem.unpin(p);
        }
        result
    }

    fn eval_new_struct(&mut self, type_name: &str, args: &[Arg]) -> RunResult<Value> {
        let Some((_, info)) = self.resolve_struct(type_name) else {
            return Err(err(
                ErrorKind::NameError,
                format!("unknown type '{type_name}'"),
            ));
        };
        let is_class = info.decl.is_class;
        let inst = structs::new_instance(&mut self.mem, info.sig, is_class)?;

        if info.decl.ctors.is_empty() && args.is_empty() {
            return Ok(self.instance_value(inst, is_class));
        }
        // Constructor overload resolution over the evaluated arguments;
        // the pin tracks any relocation the constructor causes
        self.mem.pin(inst);
        let outcome = self.run_ctor(&info, inst, args);
        let final_inst = match &outcome {
            Ok(p) => *p,
            Err(_) => inst,
        };
        self.mem.unpin(final_inst);
        outcome?;
        Ok(self.instance_value(final_inst, is_class))
    }

    fn instance_value(&self, inst: sable_core::HeapPtr, is_class: bool) -> Value {
        if is_class {
            Value::Class(inst)
        } else {
            Value::Struct(inst)
        }
    }

    fn run_ctor(
        &mut self,
        info: &super::StructInfo,
        inst: sable_core::HeapPtr,
        args: &[Arg],
    ) -> RunResult<sable_core::HeapPtr> {
        let (values, pins) = self.eval_args(args)?;
        let view: Vec<(Option<&str>, Value)> =
            values.iter().map(|(n, v)| (n.as_deref(), *v)).collect();
        let mut candidates = Vec::new();
        for ctor in &info.decl.ctors {
            let specs = self.param_specs(ctor);
            if let Some(binding) = crate::dispatch::bind_call(&specs, 0, &[], &view) {
                candidates.push(((ctor.clone(), specs), binding));
            }
        }
        let picked = crate::dispatch::pick_best(candidates);
        let result = match picked {
            None if args.is_empty() => Ok(inst),
            None => Err(err(
                ErrorKind::TypeMismatch,
                format!("no constructor of '{}' accepts these arguments", info.full_name),
            )),
            Some(((ctor, specs), binding)) => {
                self.meter.enter_call()?;
                self.frames.push(format!("{}..ctor", info.full_name));
                let run = self.run_ctor_scope(info, inst, &ctor, &specs, binding);
                self.frames.pop();
                self.meter.exit_call();
                run
            }
        };
        for k in pins {
            self.mem.unpin(k);
        }
        result
    }

    fn run_ctor_scope(
        &mut self,
        info: &super::StructInfo,
        inst: sable_core::HeapPtr,
        ctor: &Rc<FuncDecl>,
        specs: &[crate::dispatch::ParamSpec],
        binding: crate::dispatch::Binding,
    ) -> RunResult<sable_core::HeapPtr> {
        self.mem.scopes.enter_barrier()?;
        let kind = if info.decl.is_class { Kind::Class } else { Kind::Struct };
        let body = (|| -> RunResult<()> {
            let this_var = self.mem.scopes.declare("this", kind)?;
            self.mem.arena.write_i32(this_var.addr, inst)?;
            match self.bind_and_run(ctor, specs, &binding)? {
                Flow::Normal | Flow::Return(_) => Ok(()),
                _ => Err(err(
                    ErrorKind::SandboxViolation,
                    "constructor body produced a loop signal",
                )),
            }
        })();
        // Field writes may have relocated the instance: read `this` back
        let final_inst = match self.mem.scopes.lookup("this") {
            Some(var) => self.mem.arena.read_i32(var.addr)?,
            None => inst,
        };
        let exit = self.mem.exit_scope();
        body?;
        exit?;
        Ok(final_inst)
    }

    fn cast_to_type(&mut self, v: Value, target: &TypeRef) -> RunResult<Value> {
        match target {
            TypeRef::Named(name) if self.resolve_enum(name).is_some() => {
                // Integer → declared enum member
                let (full, enum_info) = self.resolve_enum(name).expect("checked above");
                if let Value::Enum(_) = v {
                    return Ok(v);
                }
                let raw = match coerce::cast(&mut self.mem, v, Kind::Long)? {
                    Value::Long(x) => x,
                    _ => unreachable!(),
                };
                let member = enum_info
                    .members
                    .iter()
                    .find(|(_, x)| *x == raw)
                    .map(|(m, _)| m.clone())
                    .unwrap_or_default();
                Ok(Value::Enum(sable_runtime::enums::alloc_enum(
                    &mut self.mem,
                    &full,
                    &member,
                    raw,
                )?))
            }
            TypeRef::Named(name) => {
                let kind = self.kind_of_name(name)?;
                if v.kind() == kind {
                    // Same-kind instances must also be the same declared type
                    if let Some(p) = v.heap_ptr()
                        && let Some(actual) = self.instance_type_name(p)
                        && let Some((full, _)) = self.resolve_struct(name)
                        && actual != full
                    {
                        return Err(err(
                            ErrorKind::TypeMismatch,
                            format!("instance of '{actual}' is not '{full}'"),
                        ));
                    }
                    return Ok(v);
                }
                coerce::cast(&mut self.mem, v, kind)
            }
            TypeRef::Nullable(_) => coerce::cast(&mut self.mem, v, Kind::Nullable),
            other => {
                let kind = self.kind_of_type(other)?;
                // Enum values cast onward through their integral value
                if let Value::Enum(p) = v
                    && kind.is_numeric()
                {
                    let raw = sable_runtime::enums::value_of(&self.mem, p)?;
                    return coerce::cast(&mut self.mem, Value::Long(raw), kind);
                }
                coerce::cast(&mut self.mem, v, kind)
            }
        }
    }

    fn eval_lambda(&mut self, params: &[String], body: &Rc<Node>) -> RunResult<Value> {
        let decl = Rc::new(FuncDecl {
            name: "lambda".into(),
            return_type: TypeRef::Var,
            params: params
                .iter()
                .map(|p| crate::ast::Param {
                    name: p.clone(),
                    ty: TypeRef::Var,
                    default: None,
                    is_params: false,
                })
                .collect(),
            body: body.clone(),
            attributes: Vec::new(),
            is_public: false,
            generics: Vec::new(),
            params_index: -1,
        });
        Value::wrap_host_object(&mut self.mem, Box::new(LambdaValue { decl }))
    }

    fn eval_switch_expr(&mut self, subject: &Node, arms: &[SwitchExprArm]) -> RunResult<Value> {
        let value = self.eval_expr(subject)?;
        let pin = self.pin_tmp(&value);
        let result = (|| {
            for arm in arms {
                if self.match_pattern(&arm.pattern, value)? {
                    let pass = match &arm.guard {
                        Some(g) => self.eval_bool(g)?,
                        None => true,
                    };
                    if pass {
                        return self.eval_expr(&arm.value);
                    }
                }
            }
            Err(err(
                ErrorKind::NoMatch,
                "switch expression matched no arm",
            ))
        })();
        self.unpin_tmp(pin);
        result
    }

    // ---- member access ----

    fn eval_member_read(&mut self, node: &Node) -> RunResult<Value> {
        // Dotted paths may be value chains or namespace-qualified names
        if let Some(path) = node.name_path()
            && self.mem.scopes.lookup(path[0]).is_none()
        {
            if path.len() >= 2 {
                let type_name = path[..path.len() - 1].join(".");
                let member = path[path.len() - 1];
                if self.resolve_enum(&type_name).is_some() {
                    return self.enum_member(&type_name, member);
                }
                if let Some(v) = builtin_constant(&type_name, member) {
                    return Ok(v);
                }
            }
            return Err(err(
                ErrorKind::NameError,
                format!("'{}' is not declared", path.join(".")),
            ));
        }
        let Node::Member { target, name } = node else {
            unreachable!("eval_member_read only sees Member nodes");
        };
        let value = self.eval_expr(target)?;
        self.member_get(value, name)
    }

    pub(super) fn member_get(&mut self, value: Value, name: &str) -> RunResult<Value> {
        // Struct/class fields shadow builtin properties
        if let Value::Struct(p) | Value::Class(p) = value
            && let Ok(v) = structs::read_field(&self.mem, p, name)
        {
            return Ok(v);
        }
        if let Value::Tuple(p) = value
            && let Ok(v) = tuples::get_named(&self.mem, p, name)
        {
            return Ok(v);
        }
        crate::members::property(self, value, name)
    }

    // ---- calls ----

    fn eval_args(&mut self, args: &[Arg]) -> RunResult<(Vec<(Option<String>, Value)>, Vec<sable_core::HeapPtr>)> {
        let mut values = Vec::with_capacity(args.len());
        let mut pins = Vec::new();
        for arg in args {
            match self.eval_expr(&arg.value) {
                Ok(v) => {
                    if let Some(k) = self.pin_tmp(&v) {
                        pins.push(k);
                    }
                    values.push((arg.name.clone(), v));
                }
                Err(e) => {
                    for k in pins {
                        self.mem.unpin(k);
                    }
                    return Err(e);
                }
            }
        }
        Ok((values, pins))
    }

    fn eval_call(
        &mut self,
        callee: &Node,
        type_args: &[TypeRef],
        args: &[Arg],
    ) -> RunResult<Value> {
        let resolved_type_args: Vec<Kind> = type_args
            .iter()
            .map(|t| self.kind_of_type(t))
            .collect::<RunResult<_>>()?;

        if let Some(path) = callee.name_path() {
            // A variable in head position makes this a method chain
            if self.mem.scopes.lookup(path[0]).is_some() {
                if path.len() == 1 {
                    let value = self.eval_expr(callee)?;
                    return self.call_callable_value(value, args);
                }
                let mut value = self.eval_expr(&Node::var_ref(path[0]))?;
                for segment in &path[1..path.len() - 1] {
                    value = self.member_get(value, segment)?;
                }
                let method = path[path.len() - 1];
                let receiver_node = member_chain_node(&path[..path.len() - 1]);
                return self.call_method(value, Some(&receiver_node), method, args);
            }
            let dotted = path.join(".");
            let lookup = |n: &str| -> Option<u8> {
                if self.funcs.contains(n) {
                    Some(0)
                } else if self.natives.contains(n) {
                    Some(1)
                } else if crate::members::is_intrinsic(n) {
                    Some(2)
                } else {
                    None
                }
            };
            let Some((full, registry)) =
                resolve_name(&self.namespace, &self.imports, &dotted, lookup)
            else {
                return Err(err(
                    ErrorKind::NameError,
                    format!("no function or native named '{dotted}'"),
                ));
            };
            let (values, pins) = self.eval_args(args)?;
            let result = match registry {
                0 => self.call_user(&full, &resolved_type_args, &values),
                1 => self.call_native(&full, &values),
                _ => {
                    let plain: Vec<Value> = values.iter().map(|(_, v)| *v).collect();
                    crate::members::intrinsic_call(self, &full, &plain)
                }
            };
            for k in pins {
                self.mem.unpin(k);
            }
            return result;
        }

        // Computed callee: a method on an expression result, or a
        // lambda-valued expression
        if let Node::Member { target, name } = callee {
            let value = self.eval_expr(target)?;
            return self.call_method(value, None, name, args);
        }
        let value = self.eval_expr(callee)?;
        self.call_callable_value(value, args)
    }

    /// Invoke a lambda value.
    pub(super) fn call_callable_value(&mut self, value: Value, args: &[Arg]) -> RunResult<Value> {
        let Value::Object(p) = value else {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("{} is not callable", value.kind()),
            ));
        };
        let handle = Value::object_handle(&self.mem, p)?;
        let decl = {
            let object = self.mem.handles.get(handle)?;
            let Some(lambda) = object.downcast_ref::<LambdaValue>() else {
                return Err(err(ErrorKind::TypeMismatch, "host object is not callable"));
            };
            lambda.decl.clone()
        };
        let lambda_pin = self.mem.pin(p);
        let (values, pins) = self.eval_args(args)?;
        let plain: Vec<Value> = values.iter().map(|(_, v)| *v).collect();
        let result = self.invoke_lambda(decl, &plain);
        for k in pins {
            self.mem.unpin(k);
        }
        self.mem.unpin(lambda_pin);
        result
    }

    /// A method call on a value: struct/class user methods first, then
    /// the builtin member tables.
    fn call_method(
        &mut self,
        value: Value,
        receiver: Option<&Node>,
        name: &str,
        args: &[Arg],
    ) -> RunResult<Value> {
        let value_pin = self.pin_tmp(&value);
        let result = self.call_method_inner(value, receiver, name, args);
        self.unpin_tmp(value_pin);
        result
    }

    fn call_method_inner(
        &mut self,
        value: Value,
        receiver: Option<&Node>,
        name: &str,
        args: &[Arg],
    ) -> RunResult<Value> {
        if let Value::Struct(p) | Value::Class(p) = value
            && let Some(type_name) = self.instance_type_name(p).map(str::to_string)
        {
            let method_name = format!("{type_name}.{name}");
            if self.funcs.contains(&method_name) {
                let (mut values, pins) = self.eval_args(args)?;
                values.insert(0, (None, value));
                let result = self.call_user(&method_name, &[], &values);
                for k in pins {
                    self.mem.unpin(k);
                }
                return result;
            }
        }
        crate::members::method(self, value, receiver, name, args)
    }
}

/// Rebuild a member-access node for the receiver part of a path (used
/// for array-mutation write-back).
fn member_chain_node(path: &[&str]) -> Node {
    let mut node = Node::var_ref(path[0]);
    for segment in &path[1..] {
        node = Node::Member {
            target: Box::new(node),
            name: (*segment).to_string(),
        };
    }
    node
}

/// `int.MaxValue`-style builtin constants.
fn builtin_constant(type_name: &str, member: &str) -> Option<Value> {
    let v = match (type_name, member) {
        ("int", "MaxValue") => Value::Int(i32::MAX),
        ("int", "MinValue") => Value::Int(i32::MIN),
        ("uint", "MaxValue") => Value::Uint(u32::MAX),
        ("uint", "MinValue") => Value::Uint(0),
        ("long", "MaxValue") => Value::Long(i64::MAX),
        ("long", "MinValue") => Value::Long(i64::MIN),
        ("ulong", "MaxValue") => Value::Ulong(u64::MAX),
        ("ulong", "MinValue") => Value::Ulong(0),
        ("short", "MaxValue") => Value::Short(i16::MAX),
        ("short", "MinValue") => Value::Short(i16::MIN),
        ("byte", "MaxValue") => Value::Byte(u8::MAX),
        ("byte", "MinValue") => Value::Byte(0),
        ("double", "MaxValue") => Value::Double(f64::MAX),
        ("double", "MinValue") => Value::Double(f64::MIN),
        ("double", "NaN") => Value::Double(f64::NAN),
        ("double", "PositiveInfinity") => Value::Double(f64::INFINITY),
        ("double", "NegativeInfinity") => Value::Double(f64::NEG_INFINITY),
        ("float", "MaxValue") => Value::Float(f32::MAX),
        ("float", "MinValue") => Value::Float(f32::MIN),
        ("DateTime", "MinValue") => Value::DateTime(sable_runtime::datetime::Date::MIN),
        ("TimeSpan", "Zero") => Value::TimeSpan(sable_runtime::datetime::Span::ZERO),
        _ => return None,
    };
    Some(v)
}
