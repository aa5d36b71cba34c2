//! The native-callback adapter
//!
//! Host callbacks declare a parameter list of kinds; per call the
//! dispatcher converts interpreter values into `HostValue`s against that
//! signature (unwrapping host objects, routing nulls, widening and
//! narrowing numerics) and converts the returned `HostValue` back into
//! arena values. A callback failure surfaces as `NativeFailure` carrying
//! a short frame excerpt.

use crate::dispatch::HostValue;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;
use sable_runtime::coerce;
use sable_runtime::value::Value;
use sable_runtime::{arrays, dict, nullable, strings, tuples};

/// Captured program output, capped the way the embedding contract caps
/// it.
pub struct Output {
    buf: String,
    cap: usize,
    /// Echo writes to the process stdout as they happen
    pub echo: bool,
}

impl Output {
    pub fn new(cap: usize, echo: bool) -> Output {
        Output {
            buf: String::new(),
            cap,
            echo,
        }
    }

    /// Append, truncating at the cap.
    pub fn push(&mut self, text: &str) {
        if self.echo {
            print!("{text}");
        }
        let room = self.cap.saturating_sub(self.buf.len());
        if room >= text.len() {
            self.buf.push_str(text);
        } else {
            let mut cut = room;
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            self.buf.push_str(&text[..cut]);
        }
    }

    pub fn text(&self) -> &str {
        &self.buf
    }

    pub fn into_text(self) -> String {
        self.buf
    }
}

/// What a native callback sees of the interpreter.
pub struct NativeCtx<'a> {
    pub mem: &'a mut Memory,
    pub out: &'a mut Output,
}

impl NativeCtx<'_> {
    /// Park a host object and hand back the handle for `HostValue::Object`.
    pub fn park_object(&mut self, value: Box<dyn std::any::Any>) -> Result<HostValue, String> {
        self.mem
            .handles
            .acquire(value)
            .map(HostValue::Object)
            .map_err(|e| e.to_string())
    }

    /// Borrow a parked host object back.
    pub fn object(&self, handle: i32) -> Result<&dyn std::any::Any, String> {
        self.mem.handles.get(handle).map_err(|e| e.to_string())
    }
}

/// Convert an interpreter value into the host shape a parameter of
/// `declared` kind expects.
pub fn to_host(mem: &Memory, v: Value, declared: Kind) -> RunResult<HostValue> {
    let v = coerce::unwrap_nullable(mem, v)?;
    if v.is_null() {
        return Ok(HostValue::Null);
    }
    // `object` parameters receive the value's own shape
    let target = if declared == Kind::Object { v.kind() } else { declared };
    let hv = match target {
        Kind::Int | Kind::Long | Kind::Short | Kind::Sbyte | Kind::IntPtr => {
            HostValue::Int(i64::try_from(integer_of(v)?).map_err(|_| host_overflow())?)
        }
        Kind::Uint | Kind::Ulong | Kind::UShort | Kind::Byte => {
            HostValue::Uint(u64::try_from(integer_of(v)?).map_err(|_| host_overflow())?)
        }
        Kind::Float | Kind::Double => match v {
            Value::Float(x) => HostValue::Double(x as f64),
            Value::Double(x) => HostValue::Double(x),
            Value::Decimal(d) => HostValue::Double(d.to_f64()),
            other => HostValue::Double(integer_of(other)? as f64),
        },
        Kind::Decimal => match v {
            Value::Decimal(d) => HostValue::Decimal(d),
            other => {
                let i = integer_of(other)?;
                HostValue::Decimal(sable_runtime::decimal::Dec::new(i.unsigned_abs(), 0, i < 0)?)
            }
        },
        Kind::Bool => match v {
            Value::Bool(b) => HostValue::Bool(b),
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::Char => match v {
            Value::Char(c) => HostValue::Char(c),
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::Str => HostValue::Str(strings::expect_string(mem, v)?),
        Kind::DateTime => match v {
            Value::DateTime(d) => HostValue::DateTime(d),
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::TimeSpan => match v {
            Value::TimeSpan(s) => HostValue::TimeSpan(s),
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::Array => match v {
            Value::Array(p) => {
                let mut items = Vec::new();
                for item in arrays::to_values(mem, p)? {
                    items.push(to_host(mem, item, Kind::Object)?);
                }
                HostValue::List(items)
            }
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::Tuple => match v {
            Value::Tuple(p) => {
                let mut items = Vec::new();
                for item in tuples::read_tuple(mem, p)? {
                    items.push(to_host(mem, item.value, Kind::Object)?);
                }
                HostValue::List(items)
            }
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::Dict => match v {
            Value::Dict(p) => {
                let mut pairs = Vec::new();
                for (k, val) in dict::entries(mem, p)? {
                    pairs.push((to_host(mem, k, Kind::Object)?, to_host(mem, val, Kind::Object)?));
                }
                HostValue::Map(pairs)
            }
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::Struct | Kind::Class => match v.heap_ptr() {
            Some(p) => {
                let mut pairs = Vec::new();
                for (name, val) in sable_runtime::structs::read_fields(mem, p)? {
                    pairs.push((HostValue::Str(name), to_host(mem, val, Kind::Object)?));
                }
                HostValue::Map(pairs)
            }
            None => HostValue::Null,
        },
        Kind::Object => match v {
            // A genuine host object: unwrap back to its handle
            Value::Object(p) => HostValue::Object(Value::object_handle(mem, p)?),
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::Enum => match v {
            Value::Enum(p) => HostValue::Int(sable_runtime::enums::value_of(mem, p)?),
            _ => return Err(adapter_mismatch(v, declared)),
        },
        Kind::Nullable | Kind::Reference => return Err(adapter_mismatch(v, declared)),
    };
    Ok(hv)
}

fn integer_of(v: Value) -> RunResult<i128> {
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
        Value::Float(x) => x.trunc() as i128,
        Value::Double(x) => x.trunc() as i128,
        Value::Decimal(d) => d.trunc_i128(),
        other => {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("native adapter cannot read {} as an integer", other.kind()),
            ));
        }
    };
    Ok(x)
}

/// Convert a native result back into an arena value.
pub fn from_host(mem: &mut Memory, hv: HostValue) -> RunResult<Value> {
    let v = match hv {
        HostValue::Null => Value::Null,
        HostValue::Int(i) => match i32::try_from(i) {
            Ok(small) => Value::Int(small),
            Err(_) => Value::Long(i),
        },
        HostValue::Uint(u) => match u32::try_from(u) {
            Ok(small) => Value::Uint(small),
            Err(_) => Value::Ulong(u),
        },
        HostValue::Double(x) => Value::Double(x),
        HostValue::Decimal(d) => Value::Decimal(d),
        HostValue::Bool(b) => Value::Bool(b),
        HostValue::Char(c) => Value::Char(c),
        HostValue::Str(s) => Value::Str(strings::alloc_string(mem, &s)?),
        HostValue::DateTime(d) => Value::DateTime(d),
        HostValue::TimeSpan(s) => Value::TimeSpan(s),
        HostValue::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(from_host(mem, item)?);
            }
            let kind = arrays::common_kind(&values);
            Value::Array(arrays::from_values(mem, kind, &values)?)
        }
        HostValue::Map(pairs) => {
            let mut entries = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                entries.push((from_host(mem, k)?, from_host(mem, v)?));
            }
            let kk = arrays::common_kind(
                &entries.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            );
            let vk = arrays::common_kind(
                &entries.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            );
            let kk = if kk == Kind::Object { Kind::Str } else { kk };
            Value::Dict(dict::alloc_dict(mem, kk, vk, &entries)?)
        }
        HostValue::Object(handle) => {
            if !mem.handles.is_live(handle) {
                return Err(err(ErrorKind::InvalidPointer, format!("dead handle {handle}")));
            }
            let ptr = mem.alloc(4, Kind::Object, false)?;
            mem.arena.write_i32(ptr as usize, handle)?;
            Value::Object(ptr)
        }
    };
    Ok(v)
}

/// A nullable packed from a host value when a callback hands one back
/// for a nullable slot.
pub fn from_host_nullable(mem: &mut Memory, hv: HostValue) -> RunResult<Value> {
    let inner = from_host(mem, hv)?;
    if inner.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Nullable(nullable::pack(mem, inner)?))
}

fn adapter_mismatch(v: Value, declared: Kind) -> sable_core::RuntimeError {
    err(
        ErrorKind::TypeMismatch,
        format!("native adapter cannot pass {} for {declared}", v.kind()),
    )
}

fn host_overflow() -> sable_core::RuntimeError {
    err(ErrorKind::Overflow, "value out of range for native parameter")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        Memory::new(8192, 1024).unwrap()
    }

    #[test]
    fn test_output_cap() {
        let mut out = Output::new(8, false);
        out.push("12345");
        out.push("6789");
        assert_eq!(out.text(), "12345678");
    }

    #[test]
    fn test_scalar_marshalling() {
        let mut m = memory();
        assert_eq!(to_host(&m, Value::Int(5), Kind::Long).unwrap(), HostValue::Int(5));
        assert_eq!(
            to_host(&m, Value::Byte(7), Kind::Double).unwrap(),
            HostValue::Double(7.0)
        );
        let s = strings::alloc_string(&mut m, "hi").unwrap();
        assert_eq!(
            to_host(&m, Value::Str(s), Kind::Str).unwrap(),
            HostValue::Str("hi".into())
        );
        assert_eq!(to_host(&m, Value::Null, Kind::Str).unwrap(), HostValue::Null);
    }

    #[test]
    fn test_array_marshalling_round_trip() {
        let mut m = memory();
        let a = arrays::from_values(&mut m, Kind::Int, &[Value::Int(1), Value::Int(2)]).unwrap();
        let hv = to_host(&m, Value::Array(a), Kind::Array).unwrap();
        assert_eq!(hv, HostValue::List(vec![HostValue::Int(1), HostValue::Int(2)]));
        let back = from_host(&mut m, hv).unwrap();
        let Value::Array(p) = back else { panic!() };
        assert_eq!(arrays::to_values(&m, p).unwrap(), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_host_object_unwraps_to_handle() {
        let mut m = memory();
        let v = Value::wrap_host_object(&mut m, Box::new(42_u8)).unwrap();
        let hv = to_host(&m, v, Kind::Object).unwrap();
        let HostValue::Object(handle) = hv else { panic!() };
        assert_eq!(*m.handles.get(handle).unwrap().downcast_ref::<u8>().unwrap(), 42);
        // and back: a fresh Object block around the same handle
        let again = from_host(&mut m, HostValue::Object(handle)).unwrap();
        assert!(matches!(again, Value::Object(_)));
    }

    #[test]
    fn test_mismatch_is_type_error() {
        let m = memory();
        assert_eq!(
            to_host(&m, Value::Int(1), Kind::Bool).unwrap_err().kind,
            ErrorKind::TypeMismatch
        );
    }
}
