//! Human-readable rendering (`ToString`/`Console.WriteLine` surface)
//!
//! Scalars print invariantly, tuples print `(a, b)`, enums print their
//! member name; aggregates print a short type label the way the source
//! language's default `ToString` does.

use crate::arrays;
use crate::coerce::scalar_text;
use crate::enums;
use crate::nullable;
use crate::tuples;
use crate::value::Value;
use sable_core::error::RunResult;
use sable_core::memory::Memory;

pub fn to_display(mem: &Memory, v: Value) -> RunResult<String> {
    let s = match v {
        Value::Null => String::new(),
        Value::Str(_) => scalar_text(mem, v)?,
        Value::Enum(p) => enums::read_enum(mem, p)?.1,
        Value::Nullable(p) => match nullable::read(mem, p)? {
            Value::Null => String::new(),
            inner => to_display(mem, inner)?,
        },
        Value::Tuple(p) => {
            let items = tuples::read_tuple(mem, p)?;
            let mut out = String::from("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&to_display(mem, item.value)?);
            }
            out.push(')');
            out
        }
        Value::Array(p) => {
            format!("{}[{}]", arrays::elem_kind(mem, p)?, arrays::len(mem, p)?)
        }
        Value::Dict(_) => "dict".into(),
        Value::Struct(_) => "struct".into(),
        Value::Class(_) => "class".into(),
        Value::Object(_) => "object".into(),
        other => scalar_text(mem, other)?,
    };
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::alloc_string;
    use crate::tuples::TupleItem;
    use sable_core::kind::Kind;

    #[test]
    fn test_scalars() {
        let m = Memory::new(4096, 1024).unwrap();
        assert_eq!(to_display(&m, Value::Int(5)).unwrap(), "5");
        assert_eq!(to_display(&m, Value::Bool(true)).unwrap(), "True");
        assert_eq!(to_display(&m, Value::Double(2.5)).unwrap(), "2.5");
        assert_eq!(to_display(&m, Value::Double(3.0)).unwrap(), "3");
        assert_eq!(to_display(&m, Value::Null).unwrap(), "");
    }

    #[test]
    fn test_tuple_and_array() {
        let mut m = Memory::new(4096, 1024).unwrap();
        let s = alloc_string(&mut m, "k").unwrap();
        let t = tuples::alloc_tuple(
            &mut m,
            &[
                TupleItem::positional(Value::Int(1)),
                TupleItem::positional(Value::Str(s)),
            ],
        )
        .unwrap();
        assert_eq!(to_display(&m, Value::Tuple(t)).unwrap(), "(1, k)");
        let a = arrays::from_values(&mut m, Kind::Int, &[Value::Int(1)]).unwrap();
        assert_eq!(to_display(&m, Value::Array(a)).unwrap(), "int[1]");
    }

    #[test]
    fn test_enum_prints_member() {
        let mut m = Memory::new(4096, 1024).unwrap();
        let e = enums::alloc_enum(&mut m, "Color", "Blue", 2).unwrap();
        assert_eq!(to_display(&m, Value::Enum(e)).unwrap(), "Blue");
    }
}
