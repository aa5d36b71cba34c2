//! Value coercion and the type service
//!
//! `infer_kind`, `matches` and `cast` implement the widening/narrowing
//! rules: checked numeric narrowing (`Overflow` on failure),
//! culture-invariant text conversions, char/numeric interchange and
//! nullable packing. Anything else is a `TypeMismatch`.

use crate::datetime::{Date, Span};
use crate::decimal::Dec;
use crate::nullable;
use crate::strings;
use crate::value::Value;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;

/// The runtime kind of a value (`Null` infers as `object`).
pub fn infer_kind(v: &Value) -> Kind {
    v.kind()
}

/// Can `v` be stored under `kind` without a representation change?
pub fn matches(v: &Value, kind: Kind) -> bool {
    if kind == Kind::Object || kind == Kind::Nullable {
        return true;
    }
    if v.is_null() {
        return kind.is_reference();
    }
    v.kind() == kind
}

/// Convert `v` to `target`. Checked: narrowing that loses the value
/// raises `Overflow`, senseless conversions raise `TypeMismatch`.
pub fn cast(mem: &mut Memory, v: Value, target: Kind) -> RunResult<Value> {
    if v.kind() == target && !matches!(v, Value::Null) {
        return Ok(v);
    }
    match target {
        Kind::Object => return Ok(v),
        Kind::Nullable => {
            return Ok(match nullable::pack(mem, unwrap_nullable(mem, v)?)? {
                p if p < 0 => Value::Null,
                p => Value::Nullable(p),
            });
        }
        _ => {}
    }
    // A nullable source casts through its inner value
    let v = unwrap_nullable(mem, v)?;
    if v.is_null() {
        if target.is_reference() {
            return Ok(Value::Null);
        }
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("cannot cast null to {target}"),
        ));
    }

    // Textual source: culture-invariant parse
    if let Value::Str(p) = v {
        let text = strings::read_string(mem, p)?;
        return parse_text(mem, &text, target);
    }

    match target {
        Kind::Str => {
            let text = scalar_text(mem, v)?;
            Ok(Value::Str(strings::alloc_string(mem, &text)?))
        }
        Kind::Bool => match v {
            Value::Bool(b) => Ok(Value::Bool(b)),
            other => Err(mismatch(other, target)),
        },
        Kind::Char
        | Kind::Int
        | Kind::Uint
        | Kind::Long
        | Kind::Ulong
        | Kind::Short
        | Kind::UShort
        | Kind::Byte
        | Kind::Sbyte
        | Kind::IntPtr => integer_from_i128(to_i128(v, target)?, target),
        Kind::Float => Ok(Value::Float(to_f64(v, target)? as f32)),
        Kind::Double => Ok(Value::Double(to_f64(v, target)?)),
        Kind::Decimal => Ok(Value::Decimal(to_dec(v, target)?)),
        Kind::DateTime => match v {
            Value::DateTime(d) => Ok(Value::DateTime(d)),
            other => Err(mismatch(other, target)),
        },
        Kind::TimeSpan => match v {
            Value::TimeSpan(s) => Ok(Value::TimeSpan(s)),
            other => Err(mismatch(other, target)),
        },
        _ => Err(mismatch(v, target)),
    }
}

/// Unwrap a `Nullable` value to its inner value; anything else passes
/// through.
pub fn unwrap_nullable(mem: &Memory, v: Value) -> RunResult<Value> {
    match v {
        Value::Nullable(p) => nullable::read(mem, p),
        other => Ok(other),
    }
}

/// Invariant text for scalar values (the `(string)` cast surface).
pub fn scalar_text(mem: &Memory, v: Value) -> RunResult<String> {
    let s = match v {
        Value::Null => String::new(),
        Value::Int(x) => x.to_string(),
        Value::Uint(x) => x.to_string(),
        Value::Long(x) => x.to_string(),
        Value::Ulong(x) => x.to_string(),
        Value::Short(x) => x.to_string(),
        Value::UShort(x) => x.to_string(),
        Value::Byte(x) => x.to_string(),
        Value::Sbyte(x) => x.to_string(),
        Value::Float(x) => format_float(x as f64),
        Value::Double(x) => format_float(x),
        Value::Decimal(x) => x.to_string(),
        Value::Bool(b) => if b { "True".into() } else { "False".into() },
        Value::Char(c) => String::from_utf16_lossy(&[c]),
        Value::IntPtr(x) => x.to_string(),
        Value::Reference(x) => format!("&{x}"),
        Value::DateTime(d) => d.to_string(),
        Value::TimeSpan(s) => s.to_string(),
        Value::Str(p) => strings::read_string(mem, p)?,
        other => {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("{} has no scalar text form", other.kind()),
            ));
        }
    };
    Ok(s)
}

/// Invariant float rendering (whole doubles still read as integers,
/// matching the source language's default `ToString`).
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "NaN".into()
    } else if x.is_infinite() {
        if x > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if x == x.trunc() && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

fn parse_text(mem: &mut Memory, text: &str, target: Kind) -> RunResult<Value> {
    let bad = || {
        err(
            ErrorKind::TypeMismatch,
            format!("'{text}' cannot be read as {target}"),
        )
    };
    let t = text.trim();
    match target {
        Kind::Int | Kind::Uint | Kind::Long | Kind::Ulong | Kind::Short | Kind::UShort
        | Kind::Byte | Kind::Sbyte | Kind::IntPtr => {
            integer_from_i128(t.parse().map_err(|_| bad())?, target)
        }
        Kind::Float => Ok(Value::Float(t.parse().map_err(|_| bad())?)),
        Kind::Double => Ok(Value::Double(t.parse().map_err(|_| bad())?)),
        Kind::Decimal => Ok(Value::Decimal(Dec::parse(t).map_err(|_| bad())?)),
        Kind::Bool => match t.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(bad()),
        },
        Kind::Char => {
            let mut units = t.encode_utf16();
            match (units.next(), units.next()) {
                (Some(c), None) => Ok(Value::Char(c)),
                _ => Err(bad()),
            }
        }
        Kind::DateTime => Ok(Value::DateTime(Date::parse(t).map_err(|_| bad())?)),
        Kind::TimeSpan => Ok(Value::TimeSpan(Span::parse(t).map_err(|_| bad())?)),
        Kind::Str => Ok(Value::Str(strings::alloc_string(mem, text)?)),
        _ => Err(bad()),
    }
}

/// Integer view of a numeric/char value, truncating floats toward zero.
fn to_i128(v: Value, target: Kind) -> RunResult<i128> {
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
        Value::Float(x) => float_to_i128(x as f64, target)?,
        Value::Double(x) => float_to_i128(x, target)?,
        Value::Decimal(x) => x.trunc_i128(),
        Value::Enum(_) => {
            return Err(err(
                ErrorKind::TypeMismatch,
                "enum values convert through their declared type",
            ));
        }
        other => return Err(mismatch(other, target)),
    };
    Ok(x)
}

fn float_to_i128(x: f64, target: Kind) -> RunResult<i128> {
    if !x.is_finite() || x.abs() >= 2f64.powi(127) {
        return Err(overflow(target));
    }
    Ok(x.trunc() as i128)
}

fn to_f64(v: Value, target: Kind) -> RunResult<f64> {
    let x = match v {
        Value::Float(x) => x as f64,
        Value::Double(x) => x,
        Value::Decimal(x) => x.to_f64(),
        other => to_i128(other, target)? as f64,
    };
    Ok(x)
}

fn to_dec(v: Value, target: Kind) -> RunResult<Dec> {
    match v {
        Value::Decimal(x) => Ok(x),
        Value::Float(x) => Dec::from_f64(x as f64),
        Value::Double(x) => Dec::from_f64(x),
        other => {
            let i = to_i128(other, target)?;
            Dec::new(i.unsigned_abs(), 0, i < 0)
        }
    }
}

/// Build an integer-family value from a full-width integer, range
/// checked.
pub fn integer_from_i128(x: i128, target: Kind) -> RunResult<Value> {
    let v = match target {
        Kind::Int => Value::Int(narrow(x, i32::MIN as i128, i32::MAX as i128)? as i32),
        Kind::Uint => Value::Uint(narrow(x, 0, u32::MAX as i128)? as u32),
        Kind::Long => Value::Long(narrow(x, i64::MIN as i128, i64::MAX as i128)? as i64),
        Kind::Ulong => Value::Ulong(narrow(x, 0, u64::MAX as i128)? as u64),
        Kind::Short => Value::Short(narrow(x, i16::MIN as i128, i16::MAX as i128)? as i16),
        Kind::UShort => Value::UShort(narrow_u16(x)?),
        Kind::Byte => Value::Byte(narrow(x, 0, u8::MAX as i128)? as u8),
        Kind::Sbyte => Value::Sbyte(narrow(x, i8::MIN as i128, i8::MAX as i128)? as i8),
        Kind::Char => Value::Char(narrow_u16(x)?),
        Kind::IntPtr => Value::IntPtr(narrow(x, i64::MIN as i128, i64::MAX as i128)? as i64),
        other => {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("{other} is not an integer kind"),
            ));
        }
    };
    Ok(v)
}

fn narrow(x: i128, min: i128, max: i128) -> RunResult<i128> {
    if x < min || x > max {
        return Err(err(
            ErrorKind::Overflow,
            format!("value {x} outside [{min}, {max}]"),
        ));
    }
    Ok(x)
}

fn narrow_u16(x: i128) -> RunResult<u16> {
    Ok(narrow(x, 0, u16::MAX as i128)? as u16)
}

fn overflow(target: Kind) -> sable_core::RuntimeError {
    err(ErrorKind::Overflow, format!("value does not fit in {target}"))
}

fn mismatch(v: Value, target: Kind) -> sable_core::RuntimeError {
    err(
        ErrorKind::TypeMismatch,
        format!("cannot convert {} to {target}", v.kind()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        Memory::new(4096, 1024).unwrap()
    }

    #[test]
    fn test_widening() {
        let mut m = memory();
        assert_eq!(cast(&mut m, Value::Int(7), Kind::Long).unwrap(), Value::Long(7));
        assert_eq!(cast(&mut m, Value::Byte(7), Kind::Double).unwrap(), Value::Double(7.0));
        assert_eq!(
            cast(&mut m, Value::Int(-3), Kind::Decimal).unwrap(),
            Value::Decimal(Dec::from_i64(-3))
        );
    }

    #[test]
    fn test_checked_narrowing() {
        let mut m = memory();
        let over = Value::Long(i32::MAX as i64 + 1);
        assert_eq!(cast(&mut m, over, Kind::Int).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(cast(&mut m, Value::Int(-1), Kind::Uint).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(cast(&mut m, Value::Long(300), Kind::Byte).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(cast(&mut m, Value::Long(255), Kind::Byte).unwrap(), Value::Byte(255));
    }

    #[test]
    fn test_float_truncation() {
        let mut m = memory();
        assert_eq!(cast(&mut m, Value::Double(9.9), Kind::Int).unwrap(), Value::Int(9));
        assert_eq!(cast(&mut m, Value::Double(-9.9), Kind::Int).unwrap(), Value::Int(-9));
        assert_eq!(
            cast(&mut m, Value::Double(f64::NAN), Kind::Int).unwrap_err().kind,
            ErrorKind::Overflow
        );
    }

    #[test]
    fn test_text_conversions() {
        let mut m = memory();
        let s = strings::alloc_string(&mut m, "123").unwrap();
        assert_eq!(cast(&mut m, Value::Str(s), Kind::Int).unwrap(), Value::Int(123));
        let s = strings::alloc_string(&mut m, "2.5").unwrap();
        assert_eq!(cast(&mut m, Value::Str(s), Kind::Double).unwrap(), Value::Double(2.5));
        let s = strings::alloc_string(&mut m, "True").unwrap();
        assert_eq!(cast(&mut m, Value::Str(s), Kind::Bool).unwrap(), Value::Bool(true));
        let s = strings::alloc_string(&mut m, "2024-01-02").unwrap();
        assert_eq!(
            cast(&mut m, Value::Str(s), Kind::DateTime).unwrap(),
            Value::DateTime(Date::from_ymd(2024, 1, 2).unwrap())
        );

        let back = cast(&mut m, Value::Int(-42), Kind::Str).unwrap();
        let Value::Str(p) = back else { panic!() };
        assert_eq!(strings::read_string(&m, p).unwrap(), "-42");
    }

    #[test]
    fn test_char_numeric_interchange() {
        let mut m = memory();
        assert_eq!(cast(&mut m, Value::Char(65), Kind::Int).unwrap(), Value::Int(65));
        assert_eq!(cast(&mut m, Value::Int(66), Kind::Char).unwrap(), Value::Char(66));
        assert_eq!(cast(&mut m, Value::Int(-1), Kind::Char).unwrap_err().kind, ErrorKind::Overflow);
    }

    #[test]
    fn test_nullable_round_trip() {
        let mut m = memory();
        let packed = cast(&mut m, Value::Int(5), Kind::Nullable).unwrap();
        let Value::Nullable(p) = packed else { panic!() };
        assert_eq!(nullable::read(&m, p).unwrap(), Value::Int(5));
        assert_eq!(cast(&mut m, Value::Null, Kind::Nullable).unwrap(), Value::Null);
        // casting the nullable onward goes through the inner value
        assert_eq!(cast(&mut m, packed, Kind::Long).unwrap(), Value::Long(5));
    }

    #[test]
    fn test_null_rules() {
        let mut m = memory();
        assert_eq!(cast(&mut m, Value::Null, Kind::Str).unwrap(), Value::Null);
        assert_eq!(
            cast(&mut m, Value::Null, Kind::Int).unwrap_err().kind,
            ErrorKind::TypeMismatch
        );
    }

    #[test]
    fn test_matches() {
        assert!(matches(&Value::Int(1), Kind::Int));
        assert!(!matches(&Value::Int(1), Kind::Long));
        assert!(matches(&Value::Int(1), Kind::Object));
        assert!(matches(&Value::Null, Kind::Str));
        assert!(!matches(&Value::Null, Kind::Int));
    }

    #[test]
    fn test_bool_strictness() {
        let mut m = memory();
        assert_eq!(
            cast(&mut m, Value::Int(1), Kind::Bool).unwrap_err().kind,
            ErrorKind::TypeMismatch
        );
    }
}
