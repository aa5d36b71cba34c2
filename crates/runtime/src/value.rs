//! The tagged runtime value
//!
//! A `Value` is `{kind, payload}`: value kinds carry their payload inline,
//! reference kinds carry the arena offset of their block, and `Null` is
//! the absent reference. This is the currency of the evaluator; the arena
//! only ever sees the encoded cell bytes.
//!
//! # Cells
//!
//! A *cell* is any fixed-width slot a value lives in: a variable's stack
//! slot, an array element, a tuple payload, a dictionary key/value or a
//! struct field. Cell width is `Kind::stack_size()` for value kinds and
//! 4 bytes (the pointer) for reference kinds.
//!
//! # `Object` storage and boxing
//!
//! A cell *declared* `object` stores a pointer whose block header names
//! the concrete kind:
//!
//! - writing a value kind boxes it into a fresh block tagged with its
//!   own kind
//! - writing a reference kind stores the pointer unchanged
//! - a block tagged `Object` itself holds a 4-byte host handle
//!
//! Readers unbox by header kind, so `object x = 5` round-trips as `Int`.

use crate::datetime::{Date, Span};
use crate::decimal::Dec;
use sable_core::arena::{HeapPtr, NULL_PTR};
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Uint(u32),
    Long(i64),
    Ulong(u64),
    Short(i16),
    UShort(u16),
    Byte(u8),
    Sbyte(i8),
    Float(f32),
    Double(f64),
    Decimal(Dec),
    Bool(bool),
    /// One UTF-16 code unit
    Char(u16),
    IntPtr(i64),
    /// Address of a variable slot in the stack region
    Reference(i32),
    DateTime(Date),
    TimeSpan(Span),
    Str(HeapPtr),
    Array(HeapPtr),
    Tuple(HeapPtr),
    Object(HeapPtr),
    Enum(HeapPtr),
    Nullable(HeapPtr),
    Dict(HeapPtr),
    Struct(HeapPtr),
    Class(HeapPtr),
}

impl Value {
    /// The value's runtime kind. `Null` reports as `Object` (a null
    /// reference has no concrete kind of its own).
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Object,
            Value::Int(_) => Kind::Int,
            Value::Uint(_) => Kind::Uint,
            Value::Long(_) => Kind::Long,
            Value::Ulong(_) => Kind::Ulong,
            Value::Short(_) => Kind::Short,
            Value::UShort(_) => Kind::UShort,
            Value::Byte(_) => Kind::Byte,
            Value::Sbyte(_) => Kind::Sbyte,
            Value::Float(_) => Kind::Float,
            Value::Double(_) => Kind::Double,
            Value::Decimal(_) => Kind::Decimal,
            Value::Bool(_) => Kind::Bool,
            Value::Char(_) => Kind::Char,
            Value::IntPtr(_) => Kind::IntPtr,
            Value::Reference(_) => Kind::Reference,
            Value::DateTime(_) => Kind::DateTime,
            Value::TimeSpan(_) => Kind::TimeSpan,
            Value::Str(_) => Kind::Str,
            Value::Array(_) => Kind::Array,
            Value::Tuple(_) => Kind::Tuple,
            Value::Object(_) => Kind::Object,
            Value::Enum(_) => Kind::Enum,
            Value::Nullable(_) => Kind::Nullable,
            Value::Dict(_) => Kind::Dict,
            Value::Struct(_) => Kind::Struct,
            Value::Class(_) => Kind::Class,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null) || self.heap_ptr().is_some_and(|p| p < 0)
    }

    /// The arena offset for reference-kind values.
    pub fn heap_ptr(&self) -> Option<HeapPtr> {
        match self {
            Value::Str(p)
            | Value::Array(p)
            | Value::Tuple(p)
            | Value::Object(p)
            | Value::Enum(p)
            | Value::Nullable(p)
            | Value::Dict(p)
            | Value::Struct(p)
            | Value::Class(p) => Some(*p),
            _ => None,
        }
    }

    /// Rebuild a reference value of `kind` around `ptr`.
    pub fn from_ptr(kind: Kind, ptr: HeapPtr) -> RunResult<Value> {
        if ptr < 0 {
            return Ok(Value::Null);
        }
        let v = match kind {
            Kind::Str => Value::Str(ptr),
            Kind::Array => Value::Array(ptr),
            Kind::Tuple => Value::Tuple(ptr),
            Kind::Object => Value::Object(ptr),
            Kind::Enum => Value::Enum(ptr),
            Kind::Nullable => Value::Nullable(ptr),
            Kind::Dict => Value::Dict(ptr),
            Kind::Struct => Value::Struct(ptr),
            Kind::Class => Value::Class(ptr),
            other => {
                return Err(err(
                    ErrorKind::TypeMismatch,
                    format!("{other} is not a reference kind"),
                ));
            }
        };
        Ok(v)
    }

    // ---- cell encoding ----

    /// Encode this value into the cell at `addr`, which is declared as
    /// `declared` and is `cell width of declared` bytes wide. The value
    /// must already match the declared kind (callers cast first);
    /// `object` cells box as described in the module docs.
    pub fn write_cell(&self, mem: &mut Memory, addr: usize, declared: Kind) -> RunResult<()> {
        if declared.is_reference() {
            let ptr = self.encode_ref_cell(mem, declared)?;
            return mem.arena.write_i32(addr, ptr);
        }
        match (declared, self) {
            (Kind::Int, Value::Int(v)) => mem.arena.write_i32(addr, *v),
            (Kind::Uint, Value::Uint(v)) => mem.arena.write_u32(addr, *v),
            (Kind::Long, Value::Long(v)) => mem.arena.write_i64(addr, *v),
            (Kind::Ulong, Value::Ulong(v)) => mem.arena.write_u64(addr, *v),
            (Kind::Short, Value::Short(v)) => mem.arena.write_u16(addr, *v as u16),
            (Kind::UShort, Value::UShort(v)) => mem.arena.write_u16(addr, *v),
            (Kind::Byte, Value::Byte(v)) => mem.arena.write_u8(addr, *v),
            (Kind::Sbyte, Value::Sbyte(v)) => mem.arena.write_u8(addr, *v as u8),
            (Kind::Float, Value::Float(v)) => mem.arena.write_u32(addr, v.to_bits()),
            (Kind::Double, Value::Double(v)) => mem.arena.write_u64(addr, v.to_bits()),
            (Kind::Decimal, Value::Decimal(v)) => mem.arena.write_bytes(addr, &v.to_bits()),
            (Kind::Bool, Value::Bool(v)) => mem.arena.write_u8(addr, *v as u8),
            (Kind::Char, Value::Char(v)) => mem.arena.write_u16(addr, *v),
            (Kind::IntPtr, Value::IntPtr(v)) => mem.arena.write_i64(addr, *v),
            (Kind::Reference, Value::Reference(v)) => mem.arena.write_i32(addr, *v),
            (Kind::DateTime, Value::DateTime(v)) => mem.arena.write_i64(addr, v.ticks),
            (Kind::TimeSpan, Value::TimeSpan(v)) => mem.arena.write_i64(addr, v.ticks),
            (declared, value) => Err(err(
                ErrorKind::TypeMismatch,
                format!("cannot store {} into a {declared} cell", value.kind()),
            )),
        }
    }

    /// The pointer this value contributes to a reference-declared cell.
    /// Boxing happens here for `object` cells holding value kinds.
    pub fn encode_ref_cell(&self, mem: &mut Memory, declared: Kind) -> RunResult<HeapPtr> {
        if self.is_null() {
            return Ok(NULL_PTR);
        }
        if let Some(ptr) = self.heap_ptr() {
            if declared != Kind::Object && declared != self.kind() {
                return Err(err(
                    ErrorKind::TypeMismatch,
                    format!("cannot store {} into a {declared} cell", self.kind()),
                ));
            }
            return Ok(ptr);
        }
        if declared == Kind::Object {
            return self.box_value(mem);
        }
        Err(err(
            ErrorKind::TypeMismatch,
            format!("cannot store {} into a {declared} cell", self.kind()),
        ))
    }

    /// Decode the cell at `addr` declared as `declared`.
    pub fn read_cell(mem: &Memory, addr: usize, declared: Kind) -> RunResult<Value> {
        if declared.is_reference() {
            let ptr = mem.arena.read_i32(addr)?;
            if ptr < 0 {
                return Ok(Value::Null);
            }
            if declared == Kind::Object {
                return Value::unbox(mem, ptr);
            }
            return Value::from_ptr(declared, ptr);
        }
        let v = match declared {
            Kind::Int => Value::Int(mem.arena.read_i32(addr)?),
            Kind::Uint => Value::Uint(mem.arena.read_u32(addr)?),
            Kind::Long => Value::Long(mem.arena.read_i64(addr)?),
            Kind::Ulong => Value::Ulong(mem.arena.read_u64(addr)?),
            Kind::Short => Value::Short(mem.arena.read_u16(addr)? as i16),
            Kind::UShort => Value::UShort(mem.arena.read_u16(addr)?),
            Kind::Byte => Value::Byte(mem.arena.read_u8(addr)?),
            Kind::Sbyte => Value::Sbyte(mem.arena.read_u8(addr)? as i8),
            Kind::Float => Value::Float(f32::from_bits(mem.arena.read_u32(addr)?)),
            Kind::Double => Value::Double(f64::from_bits(mem.arena.read_u64(addr)?)),
            Kind::Decimal => {
                let bytes: [u8; 16] = mem.arena.read_bytes(addr, 16)?.try_into().unwrap();
                Value::Decimal(Dec::from_bits(bytes)?)
            }
            Kind::Bool => Value::Bool(mem.arena.read_u8(addr)? != 0),
            Kind::Char => Value::Char(mem.arena.read_u16(addr)?),
            Kind::IntPtr => Value::IntPtr(mem.arena.read_i64(addr)?),
            Kind::Reference => Value::Reference(mem.arena.read_i32(addr)?),
            Kind::DateTime => Value::DateTime(Date {
                ticks: mem.arena.read_i64(addr)?,
            }),
            Kind::TimeSpan => Value::TimeSpan(Span {
                ticks: mem.arena.read_i64(addr)?,
            }),
            other => {
                return Err(err(
                    ErrorKind::TypeMismatch,
                    format!("cannot read a {other} cell inline"),
                ));
            }
        };
        Ok(v)
    }

    // ---- boxing ----

    /// Box a value kind into a fresh block tagged with its own kind.
    /// Reference kinds pass their pointer through.
    pub fn box_value(&self, mem: &mut Memory) -> RunResult<HeapPtr> {
        if self.is_null() {
            return Ok(NULL_PTR);
        }
        if let Some(ptr) = self.heap_ptr() {
            return Ok(ptr);
        }
        let kind = self.kind();
        let ptr = mem.alloc(kind.stack_size(), kind, false)?;
        self.write_cell(mem, ptr as usize, kind)?;
        Ok(ptr)
    }

    /// Read the block at `ptr` by its header kind: boxed value kinds
    /// decode inline, reference-tagged blocks rebuild their reference
    /// value, and `Object`-tagged blocks stay opaque handles.
    pub fn unbox(mem: &Memory, ptr: HeapPtr) -> RunResult<Value> {
        if ptr < 0 {
            return Ok(Value::Null);
        }
        let kind = mem.arena.read_kind(ptr)?;
        if kind.is_reference() || mem.arena.is_array(ptr)? {
            let kind = if mem.arena.is_array(ptr)? { Kind::Array } else { kind };
            Value::from_ptr(kind, ptr)
        } else {
            Value::read_cell(mem, ptr as usize, kind)
        }
    }

    /// The handle stored by an `Object` block.
    pub fn object_handle(mem: &Memory, ptr: HeapPtr) -> RunResult<i32> {
        if mem.arena.read_kind(ptr)? != Kind::Object {
            return Err(err(ErrorKind::TypeMismatch, "block is not a host object"));
        }
        mem.arena.read_i32(ptr as usize)
    }

    /// Wrap a host object in the handle table and an `Object` block.
    pub fn wrap_host_object(mem: &mut Memory, value: Box<dyn std::any::Any>) -> RunResult<Value> {
        let handle = mem.handles.acquire(value)?;
        let ptr = match mem.alloc(4, Kind::Object, false) {
            Ok(ptr) => ptr,
            Err(e) => {
                mem.handles.release(handle);
                return Err(e);
            }
        };
        mem.arena.write_i32(ptr as usize, handle)?;
        Ok(Value::Object(ptr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        Memory::new(4096, 1024).unwrap()
    }

    #[test]
    fn test_inline_cell_round_trip() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let cases = [
            (Kind::Int, Value::Int(-5)),
            (Kind::Uint, Value::Uint(u32::MAX)),
            (Kind::Long, Value::Long(i64::MIN)),
            (Kind::Short, Value::Short(-300)),
            (Kind::Byte, Value::Byte(200)),
            (Kind::Float, Value::Float(1.5)),
            (Kind::Double, Value::Double(-0.25)),
            (Kind::Bool, Value::Bool(true)),
            (Kind::Char, Value::Char(b'x' as u16)),
            (Kind::IntPtr, Value::IntPtr(99)),
            (Kind::Decimal, Value::Decimal(Dec::parse("12.34").unwrap())),
        ];
        for (kind, value) in cases {
            let var = m.scopes.declare(kind.name(), kind).unwrap();
            value.write_cell(&mut m, var.addr, kind).unwrap();
            assert_eq!(Value::read_cell(&m, var.addr, kind).unwrap(), value);
        }
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("x", Kind::Int).unwrap();
        let e = Value::Bool(true).write_cell(&mut m, var.addr, Kind::Int);
        assert_eq!(e.unwrap_err().kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_object_cell_boxes_and_unboxes() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("o", Kind::Object).unwrap();
        Value::Int(42).write_cell(&mut m, var.addr, Kind::Object).unwrap();
        let back = Value::read_cell(&m, var.addr, Kind::Object).unwrap();
        assert_eq!(back, Value::Int(42));
        // the box is a real block tagged Int
        let ptr = m.arena.read_i32(var.addr).unwrap();
        assert_eq!(m.arena.read_kind(ptr).unwrap(), Kind::Int);
    }

    #[test]
    fn test_null_in_reference_cell() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("s", Kind::Str).unwrap();
        Value::Null.write_cell(&mut m, var.addr, Kind::Str).unwrap();
        assert_eq!(Value::read_cell(&m, var.addr, Kind::Str).unwrap(), Value::Null);
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_host_object_wrap() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let v = Value::wrap_host_object(&mut m, Box::new("payload".to_string())).unwrap();
        let Value::Object(ptr) = v else { panic!() };
        let handle = Value::object_handle(&m, ptr).unwrap();
        assert_eq!(
            m.handles.get(handle).unwrap().downcast_ref::<String>().unwrap(),
            "payload"
        );
        // unboxing an Object block keeps it opaque
        assert_eq!(Value::unbox(&m, ptr).unwrap(), Value::Object(ptr));
    }
}
