//! Pattern matching
//!
//! Patterns test a subject value and may bind variables into the
//! current scope (`is int i`, `case var x`, declaration patterns in
//! switch arms). Nullable subjects match through their inner value, as
//! in the source language.

use super::Interp;
use crate::ast::{BinKind, Pattern, TypeRef};
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_runtime::arith::{self, CmpOp};
use sable_runtime::value::Value;
use sable_runtime::coerce;

impl Interp {
    pub fn match_pattern(&mut self, pattern: &Pattern, subject: Value) -> RunResult<bool> {
        self.check()?;
        match pattern {
            Pattern::Any => Ok(true),
            Pattern::Constant(node) => {
                let expected = self.eval_expr(node)?;
                arith::equals(&self.mem, subject, expected)
            }
            Pattern::VarBind(name) => {
                self.bind(name, subject)?;
                Ok(true)
            }
            Pattern::Type(ty) => self.type_matches(ty, subject),
            Pattern::Declaration(ty, name) => {
                if !self.type_matches(ty, subject)? {
                    return Ok(false);
                }
                let inner = coerce::unwrap_nullable(&self.mem, subject)?;
                self.bind(name, inner)?;
                Ok(true)
            }
            Pattern::Relational(op, node) => {
                if subject.is_null() {
                    return Ok(false);
                }
                let bound = self.eval_expr(node)?;
                let cmp = match op {
                    BinKind::Lt => CmpOp::Lt,
                    BinKind::Le => CmpOp::Le,
                    BinKind::Gt => CmpOp::Gt,
                    BinKind::Ge => CmpOp::Ge,
                    _ => {
                        return Err(err(
                            ErrorKind::SandboxViolation,
                            "malformed relational pattern",
                        ));
                    }
                };
                match arith::compare(&self.mem, cmp, subject, bound)? {
                    Value::Bool(b) => Ok(b),
                    _ => unreachable!(),
                }
            }
            Pattern::Not(inner) => Ok(!self.match_pattern(inner, subject)?),
            Pattern::And(a, b) => {
                Ok(self.match_pattern(a, subject)? && self.match_pattern(b, subject)?)
            }
            Pattern::Or(a, b) => {
                Ok(self.match_pattern(a, subject)? || self.match_pattern(b, subject)?)
            }
        }
    }

    /// Runtime type test. Nullable subjects test their inner value; a
    /// named type requires the instance's declared type.
    fn type_matches(&mut self, ty: &TypeRef, subject: Value) -> RunResult<bool> {
        let subject = coerce::unwrap_nullable(&self.mem, subject)?;
        if subject.is_null() {
            return Ok(false);
        }
        match ty {
            TypeRef::Var => Ok(true),
            TypeRef::Kind(Kind::Object) => Ok(true),
            TypeRef::Kind(k) => Ok(subject.kind() == *k),
            TypeRef::Array(_) => Ok(subject.kind() == Kind::Array),
            TypeRef::Nullable(inner) => self.type_matches(inner, subject),
            TypeRef::Generic(name, _) if name == "Dictionary" => {
                Ok(subject.kind() == Kind::Dict)
            }
            TypeRef::Generic(_, _) => Ok(false),
            TypeRef::Named(name) => {
                if let Some((full, _)) = self.resolve_struct(name) {
                    if let Value::Struct(p) | Value::Class(p) = subject {
                        return Ok(self.instance_type_name(p) == Some(full.as_str()));
                    }
                    return Ok(false);
                }
                if let Some((full, _)) = self.resolve_enum(name) {
                    if let Value::Enum(p) = subject {
                        let (type_name, _, _) =
                            sable_runtime::enums::read_enum(&self.mem, p)?;
                        return Ok(type_name == full);
                    }
                    return Ok(false);
                }
                Err(err(ErrorKind::NameError, format!("unknown type '{name}'")))
            }
        }
    }

    /// Bind a pattern variable: declare on first sight, assign when the
    /// name already exists.
    fn bind(&mut self, name: &str, value: Value) -> RunResult<()> {
        match self.mem.scopes.lookup(name) {
            Some(var) => {
                let cast = if value.is_null() {
                    value
                } else {
                    coerce::cast(&mut self.mem, value, var.kind)?
                };
                cast.write_cell(&mut self.mem, var.addr, var.kind)
            }
            None => {
                let kind = if value.is_null() { Kind::Object } else { value.kind() };
                let var = self.mem.scopes.declare(name, kind)?;
                value.write_cell(&mut self.mem, var.addr, kind)
            }
        }
    }
}
