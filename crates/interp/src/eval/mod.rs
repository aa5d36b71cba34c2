//! The tree-walking evaluator
//!
//! `Interp` owns everything one interpretation needs: the memory façade,
//! the meter, the registries, the ambient namespace and the output
//! buffer. Statements evaluate to a `Flow`; non-local control flow is a
//! distinguished value handed back up the tree, never an unwind. Meanwhile
//! expressions evaluate to a `Value`.
//!
//! Heap-valued temporaries that must survive a scope exit (GC point) are
//! pinned for exactly the dangerous window: call arguments while later
//! arguments evaluate, operator operands across the other side, return
//! values across the callee's scope exit.

mod exprs;
mod patterns;
mod stmts;

use crate::ast::{Const, FuncDecl, Node, Param, TypeDecl, TypeRef};
use crate::dispatch::{
    self, Binding, BoundArg, FunctionRegistry, NativeRegistry, ParamBind, ParamSpec, bind_call,
    pick_best, resolve_name,
};
use crate::meter::{CancelToken, Meter};
use crate::natives::{self, NativeCtx, Output};
use sable_core::arena::HeapPtr;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;
use sable_core::scope::{MAX_SCOPES, MAX_VARIABLES};
use sable_runtime::value::Value;
use sable_runtime::{arrays, coerce, enums, strings, structs};
use std::collections::HashMap;
use std::rc::Rc;

/// Non-local control flow as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
    Goto(String),
    /// `goto case v` / `goto default` (None)
    GotoCase(Option<Value>),
}

/// A declared struct or class.
pub struct StructInfo {
    pub decl: Rc<TypeDecl>,
    /// Pinned signature block
    pub sig: HeapPtr,
    pub full_name: String,
}

/// A declared enum.
pub struct EnumInfo {
    pub members: Vec<(String, i64)>,
}

/// A lambda parked in the handle table.
pub struct LambdaValue {
    pub decl: Rc<FuncDecl>,
}

pub struct Interp {
    pub mem: Memory,
    pub meter: Meter,
    pub funcs: FunctionRegistry,
    pub natives: NativeRegistry,
    pub structs: HashMap<String, Rc<StructInfo>>,
    pub enums: HashMap<String, Rc<EnumInfo>>,
    pub interfaces: HashMap<String, Vec<String>>,
    /// Signature pointer back to the declared type name
    pub sig_names: HashMap<HeapPtr, String>,
    pub namespace: String,
    pub imports: Vec<String>,
    pub out: Output,
    /// Innermost-last call frames for trace excerpts
    pub frames: Vec<String>,
    /// The error a `catch` block is currently handling (`throw;`)
    pub current_catch: Option<sable_core::RuntimeError>,
}

impl Interp {
    pub fn new(
        token: CancelToken,
        heap_bytes: usize,
        stack_bytes: usize,
        max_ops: u64,
        output_cap: usize,
        echo: bool,
    ) -> RunResult<Interp> {
        let mem = Memory::new(heap_bytes, stack_bytes)?;
        Ok(Interp {
            mem,
            meter: Meter::new(token, max_ops),
            funcs: FunctionRegistry::default(),
            natives: NativeRegistry::default(),
            structs: HashMap::new(),
            enums: HashMap::new(),
            interfaces: HashMap::new(),
            sig_names: HashMap::new(),
            namespace: String::new(),
            imports: Vec::new(),
            out: Output::new(output_cap, echo),
            frames: Vec::new(),
            current_catch: None,
        })
    }

    /// Run a whole program: one global scope around the hoisted
    /// top-level statement list.
    pub fn run_program(&mut self, program: &Node) -> RunResult<Value> {
        self.mem.enter_scope()?;
        let flow = self.eval_stmt(program);
        let result = match flow {
            Ok(Flow::Return(v)) => Ok(v),
            Ok(_) => Ok(Value::Null),
            Err(e) => Err(e),
        };
        let key = match &result {
            Ok(v) => self.pin_tmp(v),
            Err(_) => None,
        };
        let exit = self.mem.exit_scope();
        self.unpin_tmp(key);
        let value = result?;
        exit?;
        Ok(value)
    }

    // ---- metering ----

    /// One evaluator step: cancellation, op count, periodic cap
    /// re-verification.
    pub fn check(&mut self) -> RunResult<()> {
        if self.meter.check()? {
            let scopes = self.mem.scopes.scope_count();
            let vars = self.mem.scopes.variable_count();
            if scopes > MAX_SCOPES || vars > MAX_VARIABLES {
                return Err(err(
                    ErrorKind::ResourceExhausted,
                    format!("{scopes} scopes / {vars} variables exceed the sandbox caps"),
                ));
            }
        }
        Ok(())
    }

    // ---- temporaries ----

    /// Pin a heap-valued temporary across a possible GC point.
    pub fn pin_tmp(&mut self, v: &Value) -> Option<HeapPtr> {
        match v.heap_ptr() {
            Some(p) if p >= 0 => Some(self.mem.pin(p)),
            _ => None,
        }
    }

    pub fn unpin_tmp(&mut self, key: Option<HeapPtr>) {
        if let Some(k) = key {
            self.mem.unpin(k);
        }
    }

    // ---- constants and types ----

    pub fn const_value(&mut self, c: &Const) -> RunResult<Value> {
        let v = match c {
            Const::Null => Value::Null,
            Const::Bool(b) => Value::Bool(*b),
            Const::Int(x) => Value::Int(*x),
            Const::Uint(x) => Value::Uint(*x),
            Const::Long(x) => Value::Long(*x),
            Const::Ulong(x) => Value::Ulong(*x),
            Const::Float(x) => Value::Float(*x),
            Const::Double(x) => Value::Double(*x),
            Const::Decimal(d) => Value::Decimal(*d),
            Const::Char(c) => Value::Char(*c),
            Const::Str(s) => Value::Str(strings::alloc_string(&mut self.mem, s)?),
        };
        Ok(v)
    }

    /// The runtime kind a declared type lowers to.
    pub fn kind_of_type(&self, ty: &TypeRef) -> RunResult<Kind> {
        match ty {
            TypeRef::Var => Ok(Kind::Object),
            TypeRef::Kind(k) => Ok(*k),
            TypeRef::Array(_) => Ok(Kind::Array),
            TypeRef::Nullable(_) => Ok(Kind::Nullable),
            TypeRef::Generic(name, _) if name == "Dictionary" => Ok(Kind::Dict),
            TypeRef::Generic(name, _) => Err(err(
                ErrorKind::NameError,
                format!("unknown generic type '{name}'"),
            )),
            TypeRef::Named(name) => self.kind_of_name(name),
        }
    }

    pub fn kind_of_name(&self, name: &str) -> RunResult<Kind> {
        if let Some(k) = Kind::from_name(name) {
            return Ok(k);
        }
        if let Some((_, info)) = self.resolve_struct(name) {
            return Ok(if info.decl.is_class { Kind::Class } else { Kind::Struct });
        }
        if self.resolve_enum(name).is_some() {
            return Ok(Kind::Enum);
        }
        Err(err(ErrorKind::NameError, format!("unknown type '{name}'")))
    }

    pub fn resolve_struct(&self, name: &str) -> Option<(String, Rc<StructInfo>)> {
        resolve_name(&self.namespace, &self.imports, name, |n| {
            self.structs.get(n).cloned()
        })
    }

    pub fn resolve_enum(&self, name: &str) -> Option<(String, Rc<EnumInfo>)> {
        resolve_name(&self.namespace, &self.imports, name, |n| {
            self.enums.get(n).cloned()
        })
    }

    fn qualified(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace, name)
        }
    }

    // ---- declarations (hoisted ahead of other statements) ----

    pub fn hoist_declarations(&mut self, items: &[Node]) -> RunResult<()> {
        // Two passes so structs may reference enums and each other
        for item in items {
            match item {
                Node::EnumDecl { name, members } => self.declare_enum(name, members)?,
                Node::InterfaceDecl { name, members } => {
                    self.interfaces
                        .insert(self.qualified(name), members.clone());
                }
                _ => {}
            }
        }
        for item in items {
            match item {
                Node::FunctionDecl(decl) => {
                    let full = self.qualified(&decl.name);
                    self.funcs.declare(&full, decl.clone());
                }
                Node::StructDecl(decl) | Node::ClassDecl(decl) => self.declare_struct(decl)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn is_declaration(node: &Node) -> bool {
        matches!(
            node,
            Node::FunctionDecl(_)
                | Node::EnumDecl { .. }
                | Node::StructDecl(_)
                | Node::ClassDecl(_)
                | Node::InterfaceDecl { .. }
        )
    }

    fn declare_enum(&mut self, name: &str, members: &[(String, Option<i64>)]) -> RunResult<()> {
        let mut resolved = Vec::with_capacity(members.len());
        let mut next = 0i64;
        for (member, explicit) in members {
            let value = explicit.unwrap_or(next);
            next = value + 1;
            resolved.push((member.clone(), value));
        }
        self.enums
            .insert(self.qualified(name), Rc::new(EnumInfo { members: resolved }));
        Ok(())
    }

    fn declare_struct(&mut self, decl: &Rc<TypeDecl>) -> RunResult<()> {
        let full = self.qualified(&decl.name);
        if let Some(existing) = self.structs.get(&full) {
            // Hoisting runs again when a block re-executes; the same
            // declaration node is fine, a second declaration is not
            if Rc::ptr_eq(&existing.decl, decl) {
                return Ok(());
            }
            return Err(err(
                ErrorKind::NameError,
                format!("type '{full}' is already declared"),
            ));
        }
        // Interface conformance by member presence
        for iface in &decl.implements {
            if let Some((_, members)) = resolve_name(&self.namespace, &self.imports, iface, |n| {
                self.interfaces.get(n).cloned()
            }) {
                for member in &members {
                    if !decl.methods.iter().any(|m| m.name == *member) {
                        return Err(err(
                            ErrorKind::NameError,
                            format!("'{full}' does not implement '{iface}.{member}'"),
                        ));
                    }
                }
            }
        }
        // Field defaults evaluate once, at declaration
        let mut fields = Vec::with_capacity(decl.fields.len());
        for (ty, fname, init) in &decl.fields {
            let kind = self.kind_of_type(ty)?;
            let default = match init {
                Some(node) => Some(self.eval_expr(node)?),
                None => None,
            };
            fields.push((kind, fname.clone(), default));
        }
        let sig = structs::alloc_signature(&mut self.mem, &fields)?;
        self.mem.pin(sig);
        self.sig_names.insert(sig, full.clone());
        // Methods become namespaced functions with an implicit `this`
        for method in &decl.methods {
            let lowered = Rc::new(FuncDecl {
                name: method.name.clone(),
                return_type: method.return_type.clone(),
                params: std::iter::once(Param {
                    name: "this".into(),
                    ty: TypeRef::Named(decl.name.clone()),
                    default: None,
                    is_params: false,
                })
                .chain(method.params.iter().cloned())
                .collect(),
                body: method.body.clone(),
                attributes: method.attributes.clone(),
                is_public: method.is_public,
                generics: method.generics.clone(),
                params_index: if method.params_index < 0 {
                    -1
                } else {
                    method.params_index + 1
                },
            });
            self.funcs.declare(&format!("{full}.{}", method.name), lowered);
        }
        self.structs.insert(
            full.clone(),
            Rc::new(StructInfo {
                decl: decl.clone(),
                sig,
                full_name: full,
            }),
        );
        Ok(())
    }

    /// The declared type name of a struct/class instance, through its
    /// signature pointer.
    pub fn instance_type_name(&self, inst: HeapPtr) -> Option<&str> {
        let sig = structs::signature_of(&self.mem, inst).ok()?;
        self.sig_names.get(&sig).map(|s| s.as_str())
    }

    // ---- calls ----

    fn param_specs(&self, decl: &FuncDecl) -> Vec<ParamSpec> {
        decl.params
            .iter()
            .map(|p| ParamSpec {
                name: p.name.clone(),
                bind: dispatch::bind_of_type(&p.ty, &decl.generics, |n| {
                    self.kind_of_name(n).ok()
                }),
                has_default: p.default.is_some() || p.is_params,
                is_params: p.is_params,
            })
            .collect()
    }

    /// Overload-resolve and invoke the user function `full_name`.
    pub fn call_user(
        &mut self,
        full_name: &str,
        type_args: &[Kind],
        args: &[(Option<String>, Value)],
    ) -> RunResult<Value> {
        let overloads: Vec<Rc<FuncDecl>> = self
            .funcs
            .overloads(full_name)
            .map(|o| o.to_vec())
            .unwrap_or_default();
        let view: Vec<(Option<&str>, Value)> =
            args.iter().map(|(n, v)| (n.as_deref(), *v)).collect();
        let mut candidates = Vec::new();
        for decl in overloads {
            let specs = self.param_specs(&decl);
            if let Some(binding) = bind_call(&specs, decl.generics.len(), type_args, &view) {
                if !decl.generics.is_empty()
                    && !dispatch::constraints_hold(&decl.generics, &binding.type_args)
                {
                    continue;
                }
                candidates.push(((decl, specs), binding));
            }
        }
        let Some(((decl, specs), binding)) = pick_best(candidates) else {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("no overload of '{full_name}' accepts these arguments"),
            ));
        };
        self.invoke_decl(full_name, &decl, &specs, binding)
    }

    /// Invoke a bound user function: fresh barrier scope, parameters
    /// declared, body evaluated, `Return` unwrapped, return value pinned
    /// across the scope exit.
    pub fn invoke_decl(
        &mut self,
        name: &str,
        decl: &Rc<FuncDecl>,
        specs: &[ParamSpec],
        binding: Binding,
    ) -> RunResult<Value> {
        self.meter.enter_call()?;
        self.frames.push(name.to_string());
        let result = self.invoke_in_scope(decl, specs, binding);
        self.frames.pop();
        self.meter.exit_call();
        match result {
            Ok(v) => Ok(v),
            Err(mut e) => {
                e.push_frame(name);
                Err(e)
            }
        }
    }

    fn invoke_in_scope(
        &mut self,
        decl: &Rc<FuncDecl>,
        specs: &[ParamSpec],
        binding: Binding,
    ) -> RunResult<Value> {
        // Arguments stay pinned until they live in parameter slots
        let mut arg_pins = Vec::new();
        for bound in &binding.bound {
            match bound {
                BoundArg::Value(v) | BoundArg::TailForward(v) => {
                    if let Some(k) = self.pin_tmp(v) {
                        arg_pins.push(k);
                    }
                }
                BoundArg::Tail(vs) => {
                    for v in vs {
                        if let Some(k) = self.pin_tmp(v) {
                            arg_pins.push(k);
                        }
                    }
                }
                BoundArg::Default => {}
            }
        }

        if let Err(e) = self.mem.scopes.enter_barrier() {
            for key in arg_pins {
                self.mem.unpin(key);
            }
            return Err(e);
        }
        let body_result = self.bind_and_run(decl, specs, &binding);

        // Unpin arguments (keys may have been relocated; unpin by
        // current value)
        for key in arg_pins {
            self.mem.unpin(key);
        }

        let result = match body_result {
            Ok(Flow::Return(v)) => Ok(v),
            Ok(_) => Ok(Value::Null),
            Err(e) => Err(e),
        };
        // Pin the returned heap value so the callee's scope exit cannot
        // sweep it before the caller takes it
        let key = match &result {
            Ok(v) => self.pin_tmp(v),
            Err(_) => None,
        };
        let exit = self.mem.exit_scope();
        self.unpin_tmp(key);
        let value = result?;
        exit?;

        // Cast to the declared return type when one was written; a
        // generic parameter name stays whatever the body produced
        match &decl.return_type {
            TypeRef::Var => Ok(value),
            TypeRef::Named(n) if decl.generics.iter().any(|g| g.name == *n) => Ok(value),
            ty => {
                let kind = self.kind_of_type(ty)?;
                if value.is_null() {
                    Ok(value)
                } else {
                    coerce::cast(&mut self.mem, value, kind)
                }
            }
        }
    }

    fn bind_and_run(
        &mut self,
        decl: &Rc<FuncDecl>,
        specs: &[ParamSpec],
        binding: &Binding,
    ) -> RunResult<Flow> {
        for (i, bound) in binding.bound.iter().enumerate() {
            let value = match bound {
                BoundArg::Value(v) => *v,
                BoundArg::TailForward(v) => *v,
                BoundArg::Tail(vs) => {
                    let kind = arrays::common_kind(vs);
                    Value::Array(arrays::from_values(&mut self.mem, kind, vs)?)
                }
                BoundArg::Default => match &decl.params[i].default {
                    Some(node) => self.eval_expr(node)?,
                    None if specs[i].is_params => {
                        Value::Array(arrays::alloc_array(&mut self.mem, Kind::Object, 0)?)
                    }
                    None => Value::Null,
                },
            };
            let declared = match specs[i].bind {
                ParamBind::Kind(k) => k,
                ParamBind::Generic(g) => binding.type_args[g].unwrap_or(Kind::Object),
                ParamBind::Any => {
                    if value.is_null() {
                        Kind::Object
                    } else {
                        value.kind()
                    }
                }
            };
            let value = if value.is_null() {
                value
            } else {
                coerce::cast(&mut self.mem, value, declared)?
            };
            let var = self.mem.scopes.declare(&specs[i].name, declared)?;
            value.write_cell(&mut self.mem, var.addr, declared)?;
        }
        self.eval_stmt(&decl.body)
    }

    /// Invoke a lambda value with positional arguments.
    pub fn invoke_lambda(&mut self, lambda: Rc<FuncDecl>, args: &[Value]) -> RunResult<Value> {
        let specs = self.param_specs(&lambda);
        let view: Vec<(Option<&str>, Value)> = args.iter().map(|v| (None, *v)).collect();
        let Some(binding) = bind_call(&specs, 0, &[], &view) else {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("lambda expects {} arguments, got {}", lambda.params.len(), args.len()),
            ));
        };
        // Lambdas deliberately enter a plain scope: they see the
        // enclosing locals, which is what gives captures their meaning
        // in this dynamically scoped runtime.
        self.meter.enter_call()?;
        self.frames.push("lambda".to_string());
        let result = self.invoke_lambda_scope(&lambda, &specs, binding);
        self.frames.pop();
        self.meter.exit_call();
        result
    }

    fn invoke_lambda_scope(
        &mut self,
        decl: &Rc<FuncDecl>,
        specs: &[ParamSpec],
        binding: Binding,
    ) -> RunResult<Value> {
        self.mem.enter_scope()?;
        let body_result = self.bind_and_run(decl, specs, &binding);
        let result = match body_result {
            Ok(Flow::Return(v)) => Ok(v),
            Ok(_) => Ok(Value::Null),
            Err(e) => Err(e),
        };
        let key = match &result {
            Ok(v) => self.pin_tmp(v),
            Err(_) => None,
        };
        let exit = self.mem.exit_scope();
        self.unpin_tmp(key);
        let value = result?;
        exit?;
        Ok(value)
    }

    /// Try the registered native overloads for `full_name`.
    pub fn call_native(
        &mut self,
        full_name: &str,
        args: &[(Option<String>, Value)],
    ) -> RunResult<Value> {
        let view: Vec<(Option<&str>, Value)> =
            args.iter().map(|(n, v)| (n.as_deref(), *v)).collect();
        let overloads = self.natives.overloads(full_name).ok_or_else(|| {
            err(ErrorKind::NameError, format!("no native '{full_name}'"))
        })?;
        let mut candidates = Vec::new();
        for (i, native) in overloads.iter().enumerate() {
            let specs = native.specs();
            if let Some(binding) = bind_call(&specs, 0, &[], &view) {
                candidates.push((i, binding));
            }
        }
        let Some((idx, binding)) = pick_best(candidates) else {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("no overload of native '{full_name}' accepts these arguments"),
            ));
        };
        let native = &self.natives.overloads(full_name).unwrap()[idx];
        let params = native.params.clone();
        let func = native.func.clone();
        let variadic = native.variadic;

        // Marshal through the adapter against the declared signature
        let mut host_args = Vec::with_capacity(binding.bound.len());
        for (i, bound) in binding.bound.iter().enumerate() {
            let declared = params.get(i).map(|p| p.kind).unwrap_or(Kind::Object);
            match bound {
                BoundArg::Value(v) => host_args.push(natives::to_host(&self.mem, *v, declared)?),
                BoundArg::Default => host_args.push(dispatch::HostValue::Null),
                BoundArg::Tail(vs) => {
                    if variadic {
                        for v in vs {
                            host_args.push(natives::to_host(&self.mem, *v, Kind::Object)?);
                        }
                    }
                }
                BoundArg::TailForward(v) => {
                    host_args.push(natives::to_host(&self.mem, *v, Kind::Array)?);
                }
            }
        }

        self.frames.push(full_name.to_string());
        let outcome = {
            let mut ctx = NativeCtx {
                mem: &mut self.mem,
                out: &mut self.out,
            };
            func(&mut ctx, host_args)
        };
        self.frames.pop();
        match outcome {
            Ok(hv) => natives::from_host(&mut self.mem, hv),
            Err(message) => {
                let mut e = err(
                    ErrorKind::NativeFailure,
                    format!("'{full_name}' failed: {message}"),
                );
                for frame in self.frames.iter().rev().take(3) {
                    e.push_frame(frame.clone());
                }
                e.push_frame(full_name);
                Err(e)
            }
        }
    }

    /// Attribute-indexed invocation: the first function whose attribute list
    /// holds `(attr_name, attr_args)` and whose signature accepts
    /// `call_args`.
    pub fn invoke_by_attribute(
        &mut self,
        attr_name: &str,
        attr_args: &[Value],
        call_args: &[Value],
    ) -> RunResult<Value> {
        let carriers = self.funcs.with_attribute(attr_name);
        for (full_name, decl) in carriers {
            let attr = decl
                .attributes
                .iter()
                .find(|a| a.name == attr_name)
                .expect("filtered on attribute");
            if attr.args.len() != attr_args.len() {
                continue;
            }
            let mut equal = true;
            for (c, v) in attr.args.iter().zip(attr_args) {
                let cv = self.const_value(c)?;
                if !sable_runtime::arith::equals(&self.mem, cv, *v)? {
                    equal = false;
                    break;
                }
            }
            if !equal {
                continue;
            }
            let specs = self.param_specs(&decl);
            let view: Vec<(Option<&str>, Value)> =
                call_args.iter().map(|v| (None, *v)).collect();
            if let Some(binding) = bind_call(&specs, decl.generics.len(), &[], &view) {
                return self.invoke_decl(&full_name, &decl, &specs, binding);
            }
        }
        Err(err(
            ErrorKind::NameError,
            format!("no function carries attribute '{attr_name}' with matching arguments"),
        ))
    }

    /// Allocate an enum member value.
    pub fn enum_member(&mut self, type_name: &str, member: &str) -> RunResult<Value> {
        let Some((full, info)) = self.resolve_enum(type_name) else {
            return Err(err(ErrorKind::NameError, format!("unknown enum '{type_name}'")));
        };
        let Some((_, value)) = info.members.iter().find(|(m, _)| m == member) else {
            return Err(err(
                ErrorKind::NameError,
                format!("enum '{full}' has no member '{member}'"),
            ));
        };
        Ok(Value::Enum(enums::alloc_enum(&mut self.mem, &full, member, *value)?))
    }
}
