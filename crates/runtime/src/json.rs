//! JSON serialization of heap values
//!
//! The wire format is the JSON subset of the embedding contract: objects,
//! arrays, quoted UTF-8 strings with the standard escapes, numbers,
//! `true`/`false`/`null`. Two reserved keys, `"$tuple"` and `"$names"`,
//! mark a named tuple.
//!
//! Serialization is capped: depth ≤ 32, output ≤ 256 KiB, any one string
//! ≤ 64 KiB, arrays ≤ 16 384 elements, structs ≤ 1 024 fields. Every cap
//! violation is a `ResourceExhausted`.

use crate::arrays;
use crate::coerce::{format_float, scalar_text};
use crate::dict;
use crate::nullable;
use crate::strings;
use crate::structs;
use crate::tuples::{self, TupleItem};
use crate::value::Value;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;

/// Output/input caps for the wire format.
#[derive(Debug, Clone, Copy)]
pub struct JsonLimits {
    pub max_depth: usize,
    pub max_output: usize,
    pub max_string: usize,
    pub max_array: usize,
    pub max_fields: usize,
}

impl Default for JsonLimits {
    fn default() -> Self {
        JsonLimits {
            max_depth: 32,
            max_output: 256 * 1024,
            max_string: 64 * 1024,
            max_array: 16_384,
            max_fields: 1024,
        }
    }
}

/// Serialize `v` to JSON text (callers park it in a string block).
pub fn serialize(mem: &Memory, v: Value) -> RunResult<String> {
    serialize_with(mem, v, &JsonLimits::default())
}

pub fn serialize_with(mem: &Memory, v: Value, limits: &JsonLimits) -> RunResult<String> {
    let mut out = String::new();
    write_value(mem, v, limits, 0, &mut out)?;
    Ok(out)
}

fn write_value(
    mem: &Memory,
    v: Value,
    limits: &JsonLimits,
    depth: usize,
    out: &mut String,
) -> RunResult<()> {
    if depth > limits.max_depth {
        return Err(cap("serialization depth"));
    }
    if out.len() > limits.max_output {
        return Err(cap("serialized output size"));
    }
    match v {
        Value::Null | Value::Object(_) => out.push_str("null"),
        Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
        Value::Int(_)
        | Value::Uint(_)
        | Value::Long(_)
        | Value::Ulong(_)
        | Value::Short(_)
        | Value::UShort(_)
        | Value::Byte(_)
        | Value::Sbyte(_)
        | Value::IntPtr(_)
        | Value::Decimal(_) => out.push_str(&scalar_text(mem, v)?),
        Value::Float(x) => write_number(x as f64, out)?,
        Value::Double(x) => write_number(x, out)?,
        Value::Char(c) => write_string(&String::from_utf16_lossy(&[c]), limits, out)?,
        Value::DateTime(d) => write_string(&d.to_string(), limits, out)?,
        Value::TimeSpan(s) => write_string(&s.to_string(), limits, out)?,
        Value::Str(p) => write_string(&strings::read_string(mem, p)?, limits, out)?,
        Value::Enum(p) => {
            let (_, _, value) = crate::enums::read_enum(mem, p)?;
            out.push_str(&value.to_string());
        }
        Value::Nullable(p) => {
            let inner = nullable::read(mem, p)?;
            write_value(mem, inner, limits, depth + 1, out)?;
        }
        Value::Array(p) => {
            let items = arrays::to_values(mem, p)?;
            if items.len() > limits.max_array {
                return Err(cap("array length"));
            }
            out.push('[');
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(mem, item, limits, depth + 1, out)?;
            }
            out.push(']');
        }
        Value::Tuple(p) => {
            let items = tuples::read_tuple(mem, p)?;
            if items.iter().any(|i| i.name.is_some()) {
                out.push_str("{\"$tuple\":[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_value(mem, item.value, limits, depth + 1, out)?;
                }
                out.push_str("],\"$names\":[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    match &item.name {
                        Some(n) => write_string(n, limits, out)?,
                        None => out.push_str("null"),
                    }
                }
                out.push_str("]}");
            } else {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_value(mem, item.value, limits, depth + 1, out)?;
                }
                out.push(']');
            }
        }
        Value::Struct(p) | Value::Class(p) => {
            let fields = structs::read_fields(mem, p)?;
            if fields.len() > limits.max_fields {
                return Err(cap("struct field count"));
            }
            out.push('{');
            for (i, (name, value)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(&name, limits, out)?;
                out.push(':');
                write_value(mem, value, limits, depth + 1, out)?;
            }
            out.push('}');
        }
        Value::Dict(p) => {
            out.push('{');
            for (i, (k, v)) in dict::entries(mem, p)?.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(&scalar_text(mem, k)?, limits, out)?;
                out.push(':');
                write_value(mem, v, limits, depth + 1, out)?;
            }
            out.push('}');
        }
        Value::Reference(_) => {
            return Err(err(
                ErrorKind::TypeMismatch,
                "references do not serialize",
            ));
        }
    }
    if out.len() > limits.max_output {
        return Err(cap("serialized output size"));
    }
    Ok(())
}

fn write_number(x: f64, out: &mut String) -> RunResult<()> {
    if !x.is_finite() {
        return Err(err(
            ErrorKind::DomainError,
            "non-finite numbers do not serialize",
        ));
    }
    out.push_str(&format_float(x));
    Ok(())
}

fn write_string(s: &str, limits: &JsonLimits, out: &mut String) -> RunResult<()> {
    if s.len() > limits.max_string {
        return Err(cap("string length"));
    }
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x08' => out.push_str("\\b"),
            '\x0C' => out.push_str("\\f"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    Ok(())
}

fn cap(what: &str) -> sable_core::RuntimeError {
    err(ErrorKind::ResourceExhausted, format!("{what} cap exceeded"))
}

// ---- deserialization ----

/// Parse JSON text into heap values: objects become dictionaries (or
/// named tuples via `$tuple`/`$names`), arrays infer a homogeneous
/// element kind and widen to `object` only when genuinely mixed.
pub fn deserialize(mem: &mut Memory, text: &str) -> RunResult<Value> {
    let mut p = Parser {
        bytes: text.as_bytes(),
        pos: 0,
        limits: JsonLimits::default(),
    };
    p.skip_ws();
    let v = p.parse_value(mem, 0)?;
    p.skip_ws();
    if p.pos != p.bytes.len() {
        return Err(p.fail("trailing characters"));
    }
    Ok(v)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    limits: JsonLimits,
}

impl Parser<'_> {
    fn fail(&self, what: &str) -> sable_core::RuntimeError {
        err(
            ErrorKind::TypeMismatch,
            format!("invalid JSON at byte {}: {what}", self.pos),
        )
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, b: u8) -> RunResult<()> {
        if self.bump() != Some(b) {
            return Err(self.fail(&format!("expected '{}'", b as char)));
        }
        Ok(())
    }

    fn eat_literal(&mut self, lit: &str) -> bool {
        if self.bytes[self.pos..].starts_with(lit.as_bytes()) {
            self.pos += lit.len();
            true
        } else {
            false
        }
    }

    fn parse_value(&mut self, mem: &mut Memory, depth: usize) -> RunResult<Value> {
        if depth > self.limits.max_depth {
            return Err(cap("parse depth"));
        }
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.parse_object(mem, depth),
            Some(b'[') => self.parse_array(mem, depth),
            Some(b'"') => {
                let s = self.parse_string()?;
                Ok(Value::Str(strings::alloc_string(mem, &s)?))
            }
            Some(b't') if self.eat_literal("true") => Ok(Value::Bool(true)),
            Some(b'f') if self.eat_literal("false") => Ok(Value::Bool(false)),
            Some(b'n') if self.eat_literal("null") => Ok(Value::Null),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.parse_number(),
            _ => Err(self.fail("unexpected character")),
        }
    }

    fn parse_array(&mut self, mem: &mut Memory, depth: usize) -> RunResult<Value> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
        } else {
            loop {
                items.push(self.parse_value(mem, depth + 1)?);
                if items.len() > self.limits.max_array {
                    return Err(cap("array length"));
                }
                self.skip_ws();
                match self.bump() {
                    Some(b',') => continue,
                    Some(b']') => break,
                    _ => return Err(self.fail("expected ',' or ']'")),
                }
            }
        }
        let kind = arrays::common_kind(&items);
        Ok(Value::Array(arrays::from_values(mem, kind, &items)?))
    }

    fn parse_object(&mut self, mem: &mut Memory, depth: usize) -> RunResult<Value> {
        self.expect(b'{')?;
        let mut pairs: Vec<(String, Value)> = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
        } else {
            loop {
                self.skip_ws();
                let key = self.parse_string()?;
                self.skip_ws();
                self.expect(b':')?;
                let value = self.parse_value(mem, depth + 1)?;
                pairs.push((key, value));
                if pairs.len() > self.limits.max_fields {
                    return Err(cap("object field count"));
                }
                self.skip_ws();
                match self.bump() {
                    Some(b',') => continue,
                    Some(b'}') => break,
                    _ => return Err(self.fail("expected ',' or '}'")),
                }
            }
        }

        // The reserved named-tuple shape
        if pairs.len() == 2 && pairs[0].0 == "$tuple" && pairs[1].0 == "$names" {
            return self.rebuild_tuple(mem, &pairs);
        }

        let values: Vec<Value> = pairs.iter().map(|(_, v)| *v).collect();
        let vk = arrays::common_kind(&values);
        let mut entries = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            entries.push((Value::Str(strings::alloc_string(mem, &k)?), v));
        }
        Ok(Value::Dict(dict::alloc_dict(mem, Kind::Str, vk, &entries)?))
    }

    fn rebuild_tuple(&self, mem: &mut Memory, pairs: &[(String, Value)]) -> RunResult<Value> {
        let (Value::Array(values_ptr), Value::Array(names_ptr)) = (pairs[0].1, pairs[1].1) else {
            return Err(self.fail("malformed $tuple object"));
        };
        let values = arrays::to_values(mem, values_ptr)?;
        let names = arrays::to_values(mem, names_ptr)?;
        if values.len() != names.len() {
            return Err(self.fail("$tuple and $names disagree"));
        }
        let mut items = Vec::with_capacity(values.len());
        for (v, n) in values.into_iter().zip(names) {
            let name = match n {
                Value::Str(p) => Some(strings::read_string(mem, p)?),
                Value::Null => None,
                _ => return Err(self.fail("$names entries must be strings")),
            };
            items.push(TupleItem { value: v, name });
        }
        Ok(Value::Tuple(tuples::alloc_tuple(mem, &items)?))
    }

    fn parse_string(&mut self) -> RunResult<String> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.fail("unterminated string")),
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'/') => out.push('/'),
                    Some(b'b') => out.push('\x08'),
                    Some(b'f') => out.push('\x0C'),
                    Some(b'n') => out.push('\n'),
                    Some(b'r') => out.push('\r'),
                    Some(b't') => out.push('\t'),
                    Some(b'u') => {
                        let hi = self.parse_hex4()?;
                        if (0xD800..0xDC00).contains(&hi) {
                            // surrogate pair
                            if self.eat_literal("\\u") {
                                let lo = self.parse_hex4()?;
                                let c = 0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00);
                                out.push(char::from_u32(c).unwrap_or('\u{FFFD}'));
                            } else {
                                out.push('\u{FFFD}');
                            }
                        } else {
                            out.push(char::from_u32(hi).unwrap_or('\u{FFFD}'));
                        }
                    }
                    _ => return Err(self.fail("bad escape")),
                },
                Some(c) if c < 0x20 => return Err(self.fail("control character in string")),
                Some(c) => {
                    // Re-assemble UTF-8 multibyte sequences byte-wise
                    let start = self.pos - 1;
                    let width = utf8_width(c);
                    self.pos = start + width;
                    if self.pos > self.bytes.len() {
                        return Err(self.fail("truncated UTF-8"));
                    }
                    out.push_str(&String::from_utf8_lossy(&self.bytes[start..self.pos]));
                }
            }
            if out.len() > self.limits.max_string {
                return Err(cap("string length"));
            }
        }
        Ok(out)
    }

    fn parse_hex4(&mut self) -> RunResult<u32> {
        let mut v = 0u32;
        for _ in 0..4 {
            let c = self.bump().ok_or_else(|| self.fail("truncated \\u escape"))?;
            let d = (c as char).to_digit(16).ok_or_else(|| self.fail("bad hex digit"))?;
            v = v * 16 + d;
        }
        Ok(v)
    }

    fn parse_number(&mut self) -> RunResult<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut fractional = false;
        if self.peek() == Some(b'.') {
            fractional = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            fractional = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.fail("bad number"))?;
        if !fractional {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(if let Ok(small) = i32::try_from(i) {
                    Value::Int(small)
                } else {
                    Value::Long(i)
                });
            }
        }
        text.parse::<f64>()
            .map(Value::Double)
            .map_err(|_| self.fail("bad number"))
    }
}

fn utf8_width(first: u8) -> usize {
    match first {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::alloc_string;

    fn memory() -> Memory {
        Memory::new(64 * 1024, 1024).unwrap()
    }

    #[test]
    fn test_scalars() {
        let mut m = memory();
        assert_eq!(serialize(&m, Value::Int(7)).unwrap(), "7");
        assert_eq!(serialize(&m, Value::Bool(true)).unwrap(), "true");
        assert_eq!(serialize(&m, Value::Null).unwrap(), "null");
        assert_eq!(serialize(&m, Value::Double(1.5)).unwrap(), "1.5");
        let s = alloc_string(&mut m, "a\"b\n").unwrap();
        assert_eq!(serialize(&m, Value::Str(s)).unwrap(), "\"a\\\"b\\n\"");
    }

    #[test]
    fn test_array_round_trip() {
        let mut m = memory();
        let a = arrays::from_values(
            &mut m,
            Kind::Int,
            &[Value::Int(1), Value::Int(2), Value::Int(3)],
        )
        .unwrap();
        let text = serialize(&m, Value::Array(a)).unwrap();
        assert_eq!(text, "[1,2,3]");
        let back = deserialize(&mut m, &text).unwrap();
        let Value::Array(p) = back else { panic!() };
        assert_eq!(arrays::elem_kind(&m, p).unwrap(), Kind::Int);
        assert_eq!(arrays::to_values(&m, p).unwrap(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_heterogeneous_array_widens_to_object() {
        let mut m = memory();
        let v = deserialize(&mut m, r#"[1, "two", true]"#).unwrap();
        let Value::Array(p) = v else { panic!() };
        assert_eq!(arrays::elem_kind(&m, p).unwrap(), Kind::Object);
        let items = arrays::to_values(&m, p).unwrap();
        assert_eq!(items[0], Value::Int(1));
        assert_eq!(items[2], Value::Bool(true));
    }

    #[test]
    fn test_mixed_numerics_widen_to_double() {
        let mut m = memory();
        let v = deserialize(&mut m, "[1, 2.5]").unwrap();
        let Value::Array(p) = v else { panic!() };
        assert_eq!(arrays::elem_kind(&m, p).unwrap(), Kind::Double);
        assert_eq!(
            arrays::to_values(&m, p).unwrap(),
            vec![Value::Double(1.0), Value::Double(2.5)]
        );
    }

    #[test]
    fn test_struct_serializes_in_declaration_order() {
        let mut m = memory();
        let sig = structs::alloc_signature(
            &mut m,
            &[(Kind::Int, "x".into(), None), (Kind::Str, "s".into(), None)],
        )
        .unwrap();
        let inst = structs::new_instance(&mut m, sig, false).unwrap();
        structs::write_field(&mut m, inst, "x", Value::Int(7)).unwrap();
        let s = alloc_string(&mut m, "k").unwrap();
        let inst = structs::write_field(&mut m, inst, "s", Value::Str(s)).unwrap();
        assert_eq!(
            serialize(&m, Value::Struct(inst)).unwrap(),
            r#"{"x":7,"s":"k"}"#
        );
    }

    #[test]
    fn test_object_becomes_dict() {
        let mut m = memory();
        let v = deserialize(&mut m, r#"{"a": 1, "b": 2}"#).unwrap();
        let Value::Dict(p) = v else { panic!() };
        let k = alloc_string(&mut m, "b").unwrap();
        assert_eq!(dict::get(&m, p, Value::Str(k)).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_named_tuple_round_trip() {
        let mut m = memory();
        let t = tuples::alloc_tuple(
            &mut m,
            &[
                TupleItem::named(Value::Int(1), "x"),
                TupleItem::positional(Value::Int(2)),
            ],
        )
        .unwrap();
        let text = serialize(&m, Value::Tuple(t)).unwrap();
        assert_eq!(text, r#"{"$tuple":[1,2],"$names":["x",null]}"#);
        let back = deserialize(&mut m, &text).unwrap();
        let Value::Tuple(p) = back else { panic!() };
        let items = tuples::read_tuple(&m, p).unwrap();
        assert_eq!(items[0].name.as_deref(), Some("x"));
        assert_eq!(items[1].value, Value::Int(2));
    }

    #[test]
    fn test_positional_tuple_serializes_as_array() {
        let mut m = memory();
        let t = tuples::alloc_tuple(
            &mut m,
            &[TupleItem::positional(Value::Int(1)), TupleItem::positional(Value::Bool(true))],
        )
        .unwrap();
        assert_eq!(serialize(&m, Value::Tuple(t)).unwrap(), "[1,true]");
    }

    #[test]
    fn test_nullable_flattens() {
        let mut m = memory();
        let p = nullable::pack(&mut m, Value::Int(9)).unwrap();
        assert_eq!(serialize(&m, Value::Nullable(p)).unwrap(), "9");
    }

    #[test]
    fn test_escapes_round_trip() {
        let mut m = memory();
        let v = deserialize(&mut m, r#""tab\t quote\" uA""#).unwrap();
        let Value::Str(p) = v else { panic!() };
        assert_eq!(strings::read_string(&m, p).unwrap(), "tab\t quote\" uA");
    }

    #[test]
    fn test_parse_errors() {
        let mut m = memory();
        assert!(deserialize(&mut m, "{").is_err());
        assert!(deserialize(&mut m, "[1,]").is_err());
        assert!(deserialize(&mut m, "tru").is_err());
        assert!(deserialize(&mut m, "1 2").is_err());
    }

    #[test]
    fn test_depth_cap() {
        let mut m = memory();
        let deep = format!("{}1{}", "[".repeat(40), "]".repeat(40));
        assert_eq!(
            deserialize(&mut m, &deep).unwrap_err().kind,
            ErrorKind::ResourceExhausted
        );
    }

    #[test]
    fn test_number_kinds() {
        let mut m = memory();
        assert_eq!(deserialize(&mut m, "5").unwrap(), Value::Int(5));
        assert_eq!(
            deserialize(&mut m, "5000000000").unwrap(),
            Value::Long(5_000_000_000)
        );
        assert_eq!(deserialize(&mut m, "1e2").unwrap(), Value::Double(100.0));
    }
}
