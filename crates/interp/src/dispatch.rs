//! Call dispatch: name resolution, overload scoring, generics, params
//! tails and the native-callback registry
//!
//! Variables, user functions and native callbacks share one resolution
//! order (fully qualified name, then each ancestor of the ambient
//! namespace, then each imported namespace) but live in separate
//! registries.
//!
//! Overload resolution scores each viable argument binding: exact kind
//! match 3, null to `object` 2, `object` target 1, castable 0, anything
//! else rejects the candidate. The best total wins; ties prefer the
//! candidate with fewer `object` parameters.

use crate::ast::{FuncDecl, GenericParam, TypeRef};
use sable_core::kind::Kind;
use sable_runtime::value::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// How a parameter binds during scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamBind {
    Kind(Kind),
    /// Index into the function's generic parameter list
    Generic(usize),
    /// Untyped (`var` returns, lambdas)
    Any,
}

/// Scoring view of one parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub bind: ParamBind,
    pub has_default: bool,
    pub is_params: bool,
}

/// One argument at the call site.
pub type CallArg<'a> = (Option<&'a str>, Value);

/// How each parameter ended up bound.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundArg {
    Value(Value),
    /// Use the parameter's declared default
    Default,
    /// Pack these into the params-tail array
    Tail(Vec<Value>),
    /// Forward this array pointer verbatim into the tail
    TailForward(Value),
}

/// A successful candidate binding.
#[derive(Debug, Clone)]
pub struct Binding {
    pub bound: Vec<BoundArg>,
    pub score: i32,
    pub object_params: usize,
    /// Inferred or explicit kind per generic parameter
    pub type_args: Vec<Option<Kind>>,
}

/// Resolve `name` through the namespace order, returning the first key
/// the lookup accepts.
pub fn resolve_name<T>(
    ambient: &str,
    imports: &[String],
    name: &str,
    lookup: impl Fn(&str) -> Option<T>,
) -> Option<(String, T)> {
    if let Some(t) = lookup(name) {
        return Some((name.to_string(), t));
    }
    // Ancestors of the ambient namespace, innermost first
    let mut ns = ambient;
    while !ns.is_empty() {
        let candidate = format!("{ns}.{name}");
        if let Some(t) = lookup(&candidate) {
            return Some((candidate, t));
        }
        ns = match ns.rfind('.') {
            Some(i) => &ns[..i],
            None => "",
        };
    }
    for import in imports {
        let candidate = format!("{import}.{name}");
        if let Some(t) = lookup(&candidate) {
            return Some((candidate, t));
        }
    }
    None
}

/// Kind-level castability (the score-0 bucket). The real cast at
/// invocation may still fail checked narrowing.
pub fn kind_castable(from: Kind, to: Kind) -> bool {
    if from == to || to == Kind::Object || to == Kind::Nullable {
        return true;
    }
    let from_numeric = from.is_numeric() || from == Kind::Char;
    let to_numeric = to.is_numeric() || to == Kind::Char;
    if from_numeric && to_numeric {
        return true;
    }
    if to == Kind::Str {
        return !from.is_reference() || from == Kind::Str;
    }
    if from == Kind::Str {
        return to_numeric || matches!(to, Kind::Bool | Kind::DateTime | Kind::TimeSpan);
    }
    if from == Kind::Nullable {
        return true; // unwraps, then converts
    }
    false
}

fn score_one(arg: &Value, bind: ParamBind, type_args: &mut [Option<Kind>]) -> Option<(i32, bool)> {
    let target = match bind {
        ParamBind::Any => return Some((1, true)),
        ParamBind::Generic(i) => match type_args[i] {
            Some(k) => k,
            None => {
                // First use infers the type argument
                if arg.is_null() {
                    return Some((2, true));
                }
                type_args[i] = Some(arg.kind());
                return Some((3, false));
            }
        },
        ParamBind::Kind(k) => k,
    };
    let is_object = target == Kind::Object;
    if arg.is_null() {
        return if is_object {
            Some((2, true))
        } else if target.is_reference() {
            Some((3, false))
        } else {
            None
        };
    }
    if arg.kind() == target {
        return Some((3, is_object));
    }
    if is_object {
        return Some((1, true));
    }
    if kind_castable(arg.kind(), target) {
        return Some((0, false));
    }
    None
}

/// Attempt to bind `args` against `params`, scoring the match. Returns
/// None when the candidate is not viable.
pub fn bind_call(
    params: &[ParamSpec],
    generic_count: usize,
    explicit_type_args: &[Kind],
    args: &[CallArg<'_>],
) -> Option<Binding> {
    let params_index = params.iter().position(|p| p.is_params);
    let mut type_args: Vec<Option<Kind>> = vec![None; generic_count];
    for (i, k) in explicit_type_args.iter().enumerate() {
        if i < generic_count {
            type_args[i] = Some(*k);
        }
    }
    if explicit_type_args.len() > generic_count {
        return None;
    }

    let mut bound: Vec<Option<BoundArg>> = vec![None; params.len()];
    let mut score = 0i32;
    let mut object_params = 0usize;
    let mut tail: Vec<Value> = Vec::new();
    let mut seen_positional = false;
    let mut next_positional = 0usize;

    for (name, value) in args {
        match name {
            Some(name) => {
                // Named arguments cannot follow positional ones, cannot
                // target the params tail and cannot repeat
                if seen_positional {
                    return None;
                }
                let idx = params.iter().position(|p| p.name == *name)?;
                if Some(idx) == params_index || bound[idx].is_some() {
                    return None;
                }
                let (s, obj) = score_one(value, params[idx].bind, &mut type_args)?;
                score += s;
                object_params += obj as usize;
                bound[idx] = Some(BoundArg::Value(*value));
            }
            None => {
                seen_positional = true;
                while next_positional < params.len() && bound[next_positional].is_some() {
                    next_positional += 1;
                }
                if Some(next_positional) == params_index {
                    tail.push(*value);
                    continue;
                }
                if next_positional >= params.len() {
                    return None;
                }
                let (s, obj) = score_one(value, params[next_positional].bind, &mut type_args)?;
                score += s;
                object_params += obj as usize;
                bound[next_positional] = Some(BoundArg::Value(*value));
                next_positional += 1;
            }
        }
    }

    // The params tail: one array argument forwards verbatim
    if let Some(pi) = params_index {
        bound[pi] = Some(if tail.len() == 1 && matches!(tail[0], Value::Array(_)) {
            BoundArg::TailForward(tail[0])
        } else {
            BoundArg::Tail(std::mem::take(&mut tail))
        });
    } else if !tail.is_empty() {
        return None;
    }

    // Unbound parameters fall back to their defaults
    for (i, slot) in bound.iter_mut().enumerate() {
        if slot.is_none() {
            if !params[i].has_default {
                return None;
            }
            *slot = Some(BoundArg::Default);
        }
    }

    Some(Binding {
        bound: bound.into_iter().map(|b| b.unwrap()).collect(),
        score,
        object_params,
        type_args,
    })
}

/// Choose the best-scoring candidate; ties prefer fewer `object`
/// parameters.
pub fn pick_best<T>(candidates: Vec<(T, Binding)>) -> Option<(T, Binding)> {
    candidates.into_iter().max_by(|(_, a), (_, b)| {
        a.score
            .cmp(&b.score)
            .then(b.object_params.cmp(&a.object_params))
    })
}

/// Check a bound type argument against a generic constraint name.
pub fn constraint_holds(constraint: &str, kind: Kind) -> bool {
    match constraint {
        "numeric" => kind.is_numeric(),
        "struct" | "unmanaged" => !kind.is_reference(),
        "class" => kind.is_reference(),
        "notnull" => true, // nullability is a value property, checked at bind
        name => Kind::from_name(name) == Some(kind),
    }
}

pub fn constraints_hold(generics: &[GenericParam], type_args: &[Option<Kind>]) -> bool {
    generics.iter().zip(type_args).all(|(g, bound)| match bound {
        None => false,
        Some(kind) => g.constraints.iter().all(|c| constraint_holds(c, *kind)),
    })
}

// ---- registries ----

/// User-defined functions by fully qualified dotted name.
#[derive(Default)]
pub struct FunctionRegistry {
    funcs: HashMap<String, Vec<Rc<FuncDecl>>>,
}

impl FunctionRegistry {
    /// Idempotent per declaration node: hoisting runs again every time
    /// a block re-executes.
    pub fn declare(&mut self, full_name: &str, decl: Rc<FuncDecl>) {
        let overloads = self.funcs.entry(full_name.to_string()).or_default();
        if !overloads.iter().any(|f| Rc::ptr_eq(f, &decl)) {
            overloads.push(decl);
        }
    }

    pub fn overloads(&self, full_name: &str) -> Option<&[Rc<FuncDecl>]> {
        self.funcs.get(full_name).map(|v| v.as_slice())
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.funcs.contains_key(full_name)
    }

    /// All functions carrying an attribute named `attr`, in declaration
    /// order.
    pub fn with_attribute(&self, attr: &str) -> Vec<(String, Rc<FuncDecl>)> {
        let mut out: Vec<(String, Rc<FuncDecl>)> = Vec::new();
        for (name, overloads) in &self.funcs {
            for f in overloads {
                if f.attributes.iter().any(|a| a.name == attr) {
                    out.push((name.clone(), f.clone()));
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// The parameter list a native callback declares for the adapter.
#[derive(Debug, Clone)]
pub struct NativeParam {
    pub name: String,
    pub kind: Kind,
    pub optional: bool,
}

/// A host value as seen by native callbacks: interpreter values are
/// marshalled into this shape on the way in and back out on the way
/// out.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Int(i64),
    Uint(u64),
    Double(f64),
    Decimal(sable_runtime::decimal::Dec),
    Bool(bool),
    Char(u16),
    Str(String),
    DateTime(sable_runtime::datetime::Date),
    TimeSpan(sable_runtime::datetime::Span),
    List(Vec<HostValue>),
    Map(Vec<(HostValue, HostValue)>),
    /// A handle into the interpreter's host-object table
    Object(i32),
}

/// The signature a native callback registers under a dotted name.
pub struct NativeFn {
    pub params: Vec<NativeParam>,
    pub variadic: bool,
    #[allow(clippy::type_complexity)]
    pub func: Rc<dyn Fn(&mut crate::natives::NativeCtx<'_>, Vec<HostValue>) -> Result<HostValue, String>>,
}

impl NativeFn {
    pub fn specs(&self) -> Vec<ParamSpec> {
        let mut specs: Vec<ParamSpec> = self
            .params
            .iter()
            .map(|p| ParamSpec {
                name: p.name.clone(),
                bind: ParamBind::Kind(p.kind),
                has_default: p.optional,
                is_params: false,
            })
            .collect();
        if self.variadic {
            specs.push(ParamSpec {
                name: "args".into(),
                bind: ParamBind::Kind(Kind::Object),
                has_default: true,
                is_params: true,
            });
        }
        specs
    }
}

/// Native callbacks by dotted name; several entries under one name form
/// an overload set.
#[derive(Default)]
pub struct NativeRegistry {
    natives: HashMap<String, Vec<NativeFn>>,
}

impl NativeRegistry {
    pub fn register(&mut self, name: &str, f: NativeFn) {
        self.natives.entry(name.to_string()).or_default().push(f);
    }

    pub fn overloads(&self, name: &str) -> Option<&[NativeFn]> {
        self.natives.get(name).map(|v| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.natives.contains_key(name)
    }
}

/// Lower a declared parameter type to its scoring bind.
pub fn bind_of_type(ty: &TypeRef, generics: &[GenericParam], type_kind: impl Fn(&str) -> Option<Kind>) -> ParamBind {
    match ty {
        TypeRef::Var => ParamBind::Any,
        TypeRef::Kind(k) => ParamBind::Kind(*k),
        TypeRef::Array(_) => ParamBind::Kind(Kind::Array),
        TypeRef::Nullable(_) => ParamBind::Kind(Kind::Nullable),
        TypeRef::Generic(name, _) => {
            if name == "Dictionary" {
                ParamBind::Kind(Kind::Dict)
            } else {
                ParamBind::Any
            }
        }
        TypeRef::Named(name) => {
            if let Some(i) = generics.iter().position(|g| g.name == *name) {
                ParamBind::Generic(i)
            } else if let Some(k) = type_kind(name) {
                ParamBind::Kind(k)
            } else {
                ParamBind::Any
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, kind: Kind) -> ParamSpec {
        ParamSpec {
            name: name.into(),
            bind: ParamBind::Kind(kind),
            has_default: false,
            is_params: false,
        }
    }

    #[test]
    fn test_resolve_order() {
        let known = ["App.Util.Helper", "App.Helper", "Sys.Helper"];
        let lookup = |n: &str| known.contains(&n).then_some(());
        // innermost ambient namespace wins
        let (name, _) = resolve_name("App.Util", &[], "Helper", lookup).unwrap();
        assert_eq!(name, "App.Util.Helper");
        let (name, _) = resolve_name("App.Other", &[], "Helper", lookup).unwrap();
        assert_eq!(name, "App.Helper");
        // imports come after ambient ancestors
        let (name, _) =
            resolve_name("", &["Sys".to_string()], "Helper", lookup).unwrap();
        assert_eq!(name, "Sys.Helper");
        assert!(resolve_name("", &[], "Missing", lookup).is_none());
    }

    #[test]
    fn test_exact_beats_castable() {
        let int_params = vec![spec("a", Kind::Int), spec("b", Kind::Int)];
        let str_params = vec![spec("a", Kind::Str), spec("b", Kind::Str)];
        let args = vec![(None, Value::Int(1)), (None, Value::Int(2))];
        let b_int = bind_call(&int_params, 0, &[], &args).unwrap();
        let b_str = bind_call(&str_params, 0, &[], &args);
        assert_eq!(b_int.score, 6);
        // int→string is castable (score 0), so both bind but int wins
        let picked = pick_best(vec![("int", b_int), ("str", b_str.unwrap())]).unwrap();
        assert_eq!(picked.0, "int");
    }

    #[test]
    fn test_object_tie_break() {
        let obj_params = vec![spec("a", Kind::Object)];
        let int_params = vec![spec("a", Kind::Int)];
        let args = vec![(None, Value::Int(1))];
        let b_obj = bind_call(&obj_params, 0, &[], &args).unwrap();
        let b_int = bind_call(&int_params, 0, &[], &args).unwrap();
        assert!(b_int.score > b_obj.score);
        assert_eq!(b_obj.object_params, 1);
    }

    #[test]
    fn test_null_scoring() {
        let obj = vec![spec("a", Kind::Object)];
        let s = vec![spec("a", Kind::Str)];
        let i = vec![spec("a", Kind::Int)];
        let args = vec![(None, Value::Null)];
        assert_eq!(bind_call(&obj, 0, &[], &args).unwrap().score, 2);
        assert_eq!(bind_call(&s, 0, &[], &args).unwrap().score, 3);
        assert!(bind_call(&i, 0, &[], &args).is_none());
    }

    #[test]
    fn test_named_arguments() {
        let params = vec![
            ParamSpec { has_default: true, ..spec("a", Kind::Int) },
            spec("b", Kind::Int),
        ];
        let args = vec![(Some("b"), Value::Int(2))];
        let b = bind_call(&params, 0, &[], &args).unwrap();
        assert_eq!(b.bound[0], BoundArg::Default);
        assert_eq!(b.bound[1], BoundArg::Value(Value::Int(2)));
        // repeated named argument rejects
        let args = vec![(Some("b"), Value::Int(2)), (Some("b"), Value::Int(3))];
        assert!(bind_call(&params, 0, &[], &args).is_none());
        // named after positional rejects
        let args = vec![(None, Value::Int(1)), (Some("b"), Value::Int(2))];
        assert!(bind_call(&params, 0, &[], &args).is_none());
    }

    #[test]
    fn test_missing_required_rejects() {
        let params = vec![spec("a", Kind::Int)];
        assert!(bind_call(&params, 0, &[], &[]).is_none());
    }

    #[test]
    fn test_params_tail_packing_and_forwarding() {
        let params = vec![
            spec("first", Kind::Int),
            ParamSpec {
                name: "rest".into(),
                bind: ParamBind::Kind(Kind::Array),
                has_default: true,
                is_params: true,
            },
        ];
        let args = vec![(None, Value::Int(1)), (None, Value::Int(2)), (None, Value::Int(3))];
        let b = bind_call(&params, 0, &[], &args).unwrap();
        assert_eq!(b.bound[1], BoundArg::Tail(vec![Value::Int(2), Value::Int(3)]));

        let args = vec![(None, Value::Int(1)), (None, Value::Array(1024))];
        let b = bind_call(&params, 0, &[], &args).unwrap();
        assert_eq!(b.bound[1], BoundArg::TailForward(Value::Array(1024)));
    }

    #[test]
    fn test_generic_inference() {
        let params = vec![
            ParamSpec { bind: ParamBind::Generic(0), ..spec("a", Kind::Int) },
            ParamSpec { bind: ParamBind::Generic(0), ..spec("b", Kind::Int) },
        ];
        let args = vec![(None, Value::Long(1)), (None, Value::Long(2))];
        let b = bind_call(&params, 1, &[], &args).unwrap();
        assert_eq!(b.type_args, vec![Some(Kind::Long)]);
        // explicit argument pins the substitution
        let b = bind_call(&params, 1, &[Kind::Double], &args).unwrap();
        assert_eq!(b.type_args, vec![Some(Kind::Double)]);
    }

    #[test]
    fn test_constraints() {
        assert!(constraint_holds("numeric", Kind::Int));
        assert!(!constraint_holds("numeric", Kind::Str));
        assert!(constraint_holds("struct", Kind::Long));
        assert!(constraint_holds("class", Kind::Str));
        assert!(constraint_holds("long", Kind::Long));
        assert!(!constraint_holds("long", Kind::Int));
    }
}
