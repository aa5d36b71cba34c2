//! Arithmetic and comparison over runtime values
//!
//! Binary numeric operators promote along the ladder:
//!
//! 1. any `decimal` operand → exact decimal arithmetic
//! 2. else any `double`/`float` operand → IEEE-754 double arithmetic
//! 3. else `DateTime`/`TimeSpan` combinations → tick arithmetic
//! 4. else any unsigned operand → checked u64 arithmetic
//! 5. else → checked i64 arithmetic
//!
//! and the result is narrowed back to the **left** operand's concrete
//! kind with checked semantics. Integer division by zero is a
//! `DomainError`; float division follows IEEE-754. String `+`
//! concatenates. Comparisons never narrow.

use crate::coerce::{self, integer_from_i128, scalar_text, unwrap_nullable};
use crate::decimal::Dec;
use crate::strings;
use crate::value::Value;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Evaluate `left op right`, narrowing back to `left`'s kind.
pub fn binary(mem: &mut Memory, op: ArithOp, left: Value, right: Value) -> RunResult<Value> {
    let left = unwrap_nullable(mem, left)?;
    let right = unwrap_nullable(mem, right)?;
    let (lk, rk) = (left.kind(), right.kind());

    // String concatenation
    if op == ArithOp::Add && (lk == Kind::Str || rk == Kind::Str) {
        let a = scalar_text(mem, left)?;
        let b = scalar_text(mem, right)?;
        return Ok(Value::Str(strings::concat(mem, &a, &b)?));
    }

    // Boolean bitwise ops stay boolean
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        return match op {
            ArithOp::BitAnd => Ok(Value::Bool(a & b)),
            ArithOp::BitOr => Ok(Value::Bool(a | b)),
            ArithOp::BitXor => Ok(Value::Bool(a ^ b)),
            _ => Err(bad_operands(op, lk, rk)),
        };
    }

    // Date/time arithmetic
    match (left, right, op) {
        (Value::DateTime(a), Value::DateTime(b), ArithOp::Sub) => {
            return Ok(Value::TimeSpan(a.sub_date(b)));
        }
        (Value::DateTime(a), Value::TimeSpan(b), ArithOp::Add) => {
            return Ok(Value::DateTime(a.add_span(b)?));
        }
        (Value::DateTime(a), Value::TimeSpan(b), ArithOp::Sub) => {
            return Ok(Value::DateTime(a.add_span(crate::datetime::Span { ticks: -b.ticks })?));
        }
        (Value::TimeSpan(a), Value::TimeSpan(b), ArithOp::Add) => {
            return Ok(Value::TimeSpan(a.checked_add(b)?));
        }
        (Value::TimeSpan(a), Value::TimeSpan(b), ArithOp::Sub) => {
            return Ok(Value::TimeSpan(a.checked_add(crate::datetime::Span { ticks: -b.ticks })?));
        }
        _ => {}
    }

    if !is_arith_operand(lk) || !is_arith_operand(rk) {
        return Err(bad_operands(op, lk, rk));
    }

    // Decimal path
    if lk == Kind::Decimal || rk == Kind::Decimal {
        let a = as_dec(mem, left)?;
        let b = as_dec(mem, right)?;
        let result = match op {
            ArithOp::Add => a.add(b)?,
            ArithOp::Sub => a.sub(b)?,
            ArithOp::Mul => a.mul(b)?,
            ArithOp::Div => a.div(b)?,
            ArithOp::Rem => a.rem(b)?,
            _ => return Err(bad_operands(op, lk, rk)),
        };
        return renarrow(mem, Value::Decimal(result), lk);
    }

    // Double path
    if matches!(lk, Kind::Double | Kind::Float) || matches!(rk, Kind::Double | Kind::Float) {
        let a = as_f64(mem, left)?;
        let b = as_f64(mem, right)?;
        let result = match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b, // IEEE: 1.0/0.0 is Infinity, no error
            ArithOp::Rem => a % b,
            _ => return Err(bad_operands(op, lk, rk)),
        };
        return renarrow(mem, Value::Double(result), lk);
    }

    // Unsigned path
    if lk.is_unsigned() || rk.is_unsigned() {
        let a = as_u64(left)?;
        let b = as_u64(right)?;
        let result = match op {
            ArithOp::Add => a.checked_add(b).ok_or_else(|| overflow(op))?,
            ArithOp::Sub => a.checked_sub(b).ok_or_else(|| overflow(op))?,
            ArithOp::Mul => a.checked_mul(b).ok_or_else(|| overflow(op))?,
            ArithOp::Div => a.checked_div(b).ok_or_else(div_by_zero)?,
            ArithOp::Rem => a.checked_rem(b).ok_or_else(div_by_zero)?,
            ArithOp::BitAnd => a & b,
            ArithOp::BitOr => a | b,
            ArithOp::BitXor => a ^ b,
            ArithOp::Shl => a.wrapping_shl(b as u32 & 63),
            ArithOp::Shr => a.wrapping_shr(b as u32 & 63),
        };
        return integer_from_i128(result as i128, narrow_target(lk));
    }

    // Signed path
    let a = as_i64(left)?;
    let b = as_i64(right)?;
    let result = match op {
        ArithOp::Add => a.checked_add(b).ok_or_else(|| overflow(op))?,
        ArithOp::Sub => a.checked_sub(b).ok_or_else(|| overflow(op))?,
        ArithOp::Mul => a.checked_mul(b).ok_or_else(|| overflow(op))?,
        ArithOp::Div => {
            if b == 0 {
                return Err(div_by_zero());
            }
            a.checked_div(b).ok_or_else(|| overflow(op))?
        }
        ArithOp::Rem => {
            if b == 0 {
                return Err(div_by_zero());
            }
            a.checked_rem(b).ok_or_else(|| overflow(op))?
        }
        ArithOp::BitAnd => a & b,
        ArithOp::BitOr => a | b,
        ArithOp::BitXor => a ^ b,
        ArithOp::Shl => a.wrapping_shl(b as u32 & 63),
        ArithOp::Shr => a.wrapping_shr(b as u32 & 63),
    };
    integer_from_i128(result as i128, narrow_target(lk))
}

/// `-v`, checked.
pub fn negate(v: Value) -> RunResult<Value> {
    match v {
        Value::Int(x) => x
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| overflow(ArithOp::Sub)),
        Value::Long(x) => x
            .checked_neg()
            .map(Value::Long)
            .ok_or_else(|| overflow(ArithOp::Sub)),
        Value::Short(x) => x
            .checked_neg()
            .map(Value::Short)
            .ok_or_else(|| overflow(ArithOp::Sub)),
        Value::Sbyte(x) => x
            .checked_neg()
            .map(Value::Sbyte)
            .ok_or_else(|| overflow(ArithOp::Sub)),
        Value::Float(x) => Ok(Value::Float(-x)),
        Value::Double(x) => Ok(Value::Double(-x)),
        Value::Decimal(x) => Ok(Value::Decimal(x.neg())),
        Value::TimeSpan(s) => Ok(Value::TimeSpan(crate::datetime::Span { ticks: -s.ticks })),
        other => Err(err(
            ErrorKind::TypeMismatch,
            format!("cannot negate {}", other.kind()),
        )),
    }
}

/// `~v` for integer kinds, `!v` for bool lives in the evaluator.
pub fn bit_not(v: Value) -> RunResult<Value> {
    match v {
        Value::Int(x) => Ok(Value::Int(!x)),
        Value::Uint(x) => Ok(Value::Uint(!x)),
        Value::Long(x) => Ok(Value::Long(!x)),
        Value::Ulong(x) => Ok(Value::Ulong(!x)),
        Value::Short(x) => Ok(Value::Short(!x)),
        Value::UShort(x) => Ok(Value::UShort(!x)),
        Value::Byte(x) => Ok(Value::Byte(!x)),
        Value::Sbyte(x) => Ok(Value::Sbyte(!x)),
        other => Err(err(
            ErrorKind::TypeMismatch,
            format!("cannot complement {}", other.kind()),
        )),
    }
}

/// Structural equality: strings by bytes, other references by pointer
/// identity, numerics across kinds by value.
pub fn equals(mem: &Memory, a: Value, b: Value) -> RunResult<bool> {
    let a = unwrap_nullable(mem, a)?;
    let b = unwrap_nullable(mem, b)?;
    if a.is_null() || b.is_null() {
        return Ok(a.is_null() == b.is_null());
    }
    if let (Value::Str(pa), Value::Str(pb)) = (a, b) {
        if pa == pb {
            return Ok(true);
        }
        return Ok(strings::read_string(mem, pa)? == strings::read_string(mem, pb)?);
    }
    if let (Value::Enum(pa), Value::Enum(pb)) = (a, b) {
        if pa == pb {
            return Ok(true);
        }
        let (ta, _, va) = crate::enums::read_enum(mem, pa)?;
        let (tb, _, vb) = crate::enums::read_enum(mem, pb)?;
        return Ok(ta == tb && va == vb);
    }
    if let (Some(pa), Some(pb)) = (a.heap_ptr(), b.heap_ptr()) {
        return Ok(pa == pb);
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::DateTime(x), Value::DateTime(y)) => Ok(x == y),
        (Value::TimeSpan(x), Value::TimeSpan(y)) => Ok(x == y),
        // Values of incomparable kinds are simply unequal
        _ => Ok(matches!(order(mem, a, b), Ok(Some(Ordering::Equal)))),
    }
}

/// Ordering for comparable values; `None` for unordered float pairs
/// (NaN involvement).
pub fn order(mem: &Memory, a: Value, b: Value) -> RunResult<Option<Ordering>> {
    let a = unwrap_nullable(mem, a)?;
    let b = unwrap_nullable(mem, b)?;
    match (a, b) {
        (Value::DateTime(x), Value::DateTime(y)) => Ok(Some(x.ticks.cmp(&y.ticks))),
        (Value::TimeSpan(x), Value::TimeSpan(y)) => Ok(Some(x.ticks.cmp(&y.ticks))),
        (Value::Str(x), Value::Str(y)) => Ok(Some(
            strings::read_string(mem, x)?.cmp(&strings::read_string(mem, y)?),
        )),
        _ => {
            let (lk, rk) = (a.kind(), b.kind());
            if !is_arith_operand(lk) || !is_arith_operand(rk) {
                return Err(err(
                    ErrorKind::TypeMismatch,
                    format!("cannot compare {lk} with {rk}"),
                ));
            }
            if lk == Kind::Decimal || rk == Kind::Decimal {
                return Ok(Some(as_dec(mem, a)?.cmp_dec(as_dec(mem, b)?)));
            }
            if matches!(lk, Kind::Double | Kind::Float) || matches!(rk, Kind::Double | Kind::Float)
            {
                return Ok(as_f64(mem, a)?.partial_cmp(&as_f64(mem, b)?));
            }
            Ok(Some(as_i128(a)?.cmp(&as_i128(b)?)))
        }
    }
}

/// Evaluate a comparison operator to a boolean.
pub fn compare(mem: &Memory, op: CmpOp, a: Value, b: Value) -> RunResult<Value> {
    let result = match op {
        CmpOp::Eq => equals(mem, a, b)?,
        CmpOp::Ne => !equals(mem, a, b)?,
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ua = unwrap_nullable(mem, a)?;
            let ub = unwrap_nullable(mem, b)?;
            if ua.is_null() || ub.is_null() {
                // Relational against null is simply false (lifted semantics)
                false
            } else {
                match order(mem, ua, ub)? {
                    Some(ord) => match op {
                        CmpOp::Lt => ord == Ordering::Less,
                        CmpOp::Le => ord != Ordering::Greater,
                        CmpOp::Gt => ord == Ordering::Greater,
                        CmpOp::Ge => ord != Ordering::Less,
                        _ => unreachable!(),
                    },
                    None => false, // NaN
                }
            }
        }
    };
    Ok(Value::Bool(result))
}

fn is_arith_operand(k: Kind) -> bool {
    k.is_numeric() || k == Kind::Char || k == Kind::IntPtr
}

/// The kind arithmetic results narrow back to: the left operand's own
/// kind, with `char` promoting to `int` as in the source language.
fn narrow_target(lk: Kind) -> Kind {
    if lk == Kind::Char { Kind::Int } else { lk }
}

fn renarrow(mem: &mut Memory, result: Value, lk: Kind) -> RunResult<Value> {
    if result.kind() == narrow_target(lk) {
        return Ok(result);
    }
    coerce::cast(mem, result, narrow_target(lk))
}

fn as_i64(v: Value) -> RunResult<i64> {
    Ok(as_i128(v)? as i64)
}

fn as_u64(v: Value) -> RunResult<u64> {
    let x = as_i128(v)?;
    u64::try_from(x).map_err(|_| overflow(ArithOp::Sub))
}

fn as_i128(v: Value) -> RunResult<i128> {
    let x = match v {
        Value::Int(x) => x as i128,
        Value::Uint(x) => x as i128,
        Value::Long(x) => x as i128,
        Value::Ulong(x) => x as i128,
        Value::Short(x) => x as i128,
        Value::UShort(x) => x as i128,
        Value::Byte(x) => x as i128,
        Value::Sbyte(x) => x as i128,
        Value::Char(x) => x as i128,
        Value::IntPtr(x) => x as i128,
        other => {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("{} is not an integer", other.kind()),
            ));
        }
    };
    Ok(x)
}

fn as_f64(mem: &Memory, v: Value) -> RunResult<f64> {
    match v {
        Value::Float(x) => Ok(x as f64),
        Value::Double(x) => Ok(x),
        Value::Decimal(x) => Ok(x.to_f64()),
        other => {
            let _ = mem;
            Ok(as_i128(other)? as f64)
        }
    }
}

fn as_dec(mem: &Memory, v: Value) -> RunResult<Dec> {
    match v {
        Value::Decimal(x) => Ok(x),
        Value::Float(x) => Dec::from_f64(x as f64),
        Value::Double(x) => Dec::from_f64(x),
        other => {
            let _ = mem;
            let x = as_i128(other)?;
            Dec::new(x.unsigned_abs(), 0, x < 0)
        }
    }
}

fn bad_operands(op: ArithOp, lk: Kind, rk: Kind) -> sable_core::RuntimeError {
    err(
        ErrorKind::TypeMismatch,
        format!("operator {op:?} is not defined for {lk} and {rk}"),
    )
}

fn overflow(op: ArithOp) -> sable_core::RuntimeError {
    err(ErrorKind::Overflow, format!("arithmetic overflow in {op:?}"))
}

fn div_by_zero() -> sable_core::RuntimeError {
    err(ErrorKind::DomainError, "division by zero")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::Date;

    fn memory() -> Memory {
        Memory::new(4096, 1024).unwrap()
    }

    #[test]
    fn test_signed_arithmetic_narrows_to_left() {
        let mut m = memory();
        assert_eq!(
            binary(&mut m, ArithOp::Add, Value::Int(1), Value::Long(2)).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            binary(&mut m, ArithOp::Add, Value::Long(1), Value::Int(2)).unwrap(),
            Value::Long(3)
        );
    }

    #[test]
    fn test_overflow_checked() {
        let mut m = memory();
        let e = binary(&mut m, ArithOp::Add, Value::Int(i32::MAX), Value::Int(1)).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Overflow);
        let e = binary(&mut m, ArithOp::Mul, Value::Long(i64::MAX), Value::Long(2)).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Overflow);
    }

    #[test]
    fn test_integer_division_by_zero() {
        let mut m = memory();
        let e = binary(&mut m, ArithOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert_eq!(e.kind, ErrorKind::DomainError);
        let e = binary(&mut m, ArithOp::Rem, Value::Uint(1), Value::Uint(0)).unwrap_err();
        assert_eq!(e.kind, ErrorKind::DomainError);
    }

    #[test]
    fn test_float_division_follows_ieee() {
        let mut m = memory();
        let v = binary(&mut m, ArithOp::Div, Value::Double(1.0), Value::Double(0.0)).unwrap();
        assert_eq!(v, Value::Double(f64::INFINITY));
    }

    #[test]
    fn test_double_promotion() {
        let mut m = memory();
        assert_eq!(
            binary(&mut m, ArithOp::Add, Value::Double(0.5), Value::Int(1)).unwrap(),
            Value::Double(1.5)
        );
        // float left operand narrows the double result to float
        assert_eq!(
            binary(&mut m, ArithOp::Mul, Value::Float(1.5), Value::Double(2.0)).unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_decimal_wins_ladder() {
        let mut m = memory();
        let d = Dec::parse("0.1").unwrap();
        let v = binary(&mut m, ArithOp::Add, Value::Decimal(d), Value::Int(1)).unwrap();
        assert_eq!(v, Value::Decimal(Dec::parse("1.1").unwrap()));
    }

    #[test]
    fn test_unsigned_path() {
        let mut m = memory();
        assert_eq!(
            binary(&mut m, ArithOp::Sub, Value::Uint(1), Value::Uint(2)).unwrap_err().kind,
            ErrorKind::Overflow
        );
        assert_eq!(
            binary(&mut m, ArithOp::Add, Value::Ulong(u64::MAX - 1), Value::Uint(1)).unwrap(),
            Value::Ulong(u64::MAX)
        );
    }

    #[test]
    fn test_string_concat() {
        let mut m = memory();
        let s = crate::strings::alloc_string(&mut m, "n=").unwrap();
        let v = binary(&mut m, ArithOp::Add, Value::Str(s), Value::Int(7)).unwrap();
        let Value::Str(p) = v else { panic!() };
        assert_eq!(crate::strings::read_string(&m, p).unwrap(), "n=7");
    }

    #[test]
    fn test_datetime_arithmetic() {
        let mut m = memory();
        let a = Date::from_ymd(2024, 1, 1).unwrap();
        let b = Date::from_ymd(2024, 1, 3).unwrap();
        let v = binary(&mut m, ArithOp::Sub, Value::DateTime(b), Value::DateTime(a)).unwrap();
        let Value::TimeSpan(span) = v else { panic!() };
        assert_eq!(span.days(), 2);
        let v = binary(&mut m, ArithOp::Add, Value::DateTime(a), Value::TimeSpan(span)).unwrap();
        assert_eq!(v, Value::DateTime(b));
    }

    #[test]
    fn test_char_promotes_to_int() {
        let mut m = memory();
        assert_eq!(
            binary(&mut m, ArithOp::Add, Value::Char(b'a' as u16), Value::Int(1)).unwrap(),
            Value::Int(b'a' as i32 + 1)
        );
    }

    #[test]
    fn test_comparisons() {
        let m = memory();
        assert_eq!(compare(&m, CmpOp::Lt, Value::Int(1), Value::Long(2)).unwrap(), Value::Bool(true));
        assert_eq!(compare(&m, CmpOp::Eq, Value::Int(2), Value::Double(2.0)).unwrap(), Value::Bool(true));
        assert_eq!(compare(&m, CmpOp::Ge, Value::Double(f64::NAN), Value::Double(0.0)).unwrap(), Value::Bool(false));
        assert_eq!(compare(&m, CmpOp::Eq, Value::Null, Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(compare(&m, CmpOp::Ne, Value::Null, Value::Int(1)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_string_equality_by_content() {
        let mut m = memory();
        let a = crate::strings::alloc_string(&mut m, "same").unwrap();
        let b = crate::strings::alloc_string(&mut m, "same").unwrap();
        assert_ne!(a, b);
        assert!(equals(&m, Value::Str(a), Value::Str(b)).unwrap());
    }

    #[test]
    fn test_bool_bitwise() {
        let mut m = memory();
        assert_eq!(
            binary(&mut m, ArithOp::BitXor, Value::Bool(true), Value::Bool(true)).unwrap(),
            Value::Bool(false)
        );
    }
}
