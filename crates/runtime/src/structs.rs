//! Struct signatures and instances
//!
//! A struct declaration allocates one **signature block** (kind `byte`)
//! holding a flat field list:
//!
//! ```text
//! per field: kind(1) | name-len(1) | name-bytes | has-init(1) | default?
//! ```
//!
//! Value-kind defaults are the raw cell bytes; string defaults are
//! stored inline as `len(2) | utf-8` so the signature never references
//! the collected heap. Other reference kinds cannot carry defaults.
//!
//! An **instance block** (kind `struct` or `class`) is
//! `[sig-ptr(4) | per field: actual-kind(1) | payload]`. The actual kind
//! may override the declared kind: an `object` field holding `5` stores
//! `int` inline. Instances are self-describing, which is what lets the
//! collector walk them without the signature.

use crate::coerce;
use crate::strings;
use crate::value::Value;
use sable_core::arena::{HeapPtr, NULL_PTR};
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;
use sable_core::trace::cell_size;

/// Most fields a single struct may declare
pub const MAX_FIELDS: usize = 1024;

/// A field parsed back out of a signature block.
#[derive(Debug, Clone, PartialEq)]
pub struct SigField {
    pub kind: Kind,
    pub name: String,
    pub default: Option<SigDefault>,
}

/// A declared field initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum SigDefault {
    /// Raw cell bytes of a value kind
    Inline(Vec<u8>),
    /// Inline text for a string field
    Text(String),
}

/// Allocate a signature block for `fields` (kind, name, default value).
pub fn alloc_signature(
    mem: &mut Memory,
    fields: &[(Kind, String, Option<Value>)],
) -> RunResult<HeapPtr> {
    if fields.len() > MAX_FIELDS {
        return Err(err(
            ErrorKind::ResourceExhausted,
            format!("struct exceeds {MAX_FIELDS} fields"),
        ));
    }
    // Encode to a scratch buffer first; defaults may need string reads
    let mut buf: Vec<u8> = Vec::new();
    for (kind, name, default) in fields {
        if name.len() > u8::MAX as usize {
            return Err(err(ErrorKind::ResourceExhausted, "field name too long"));
        }
        buf.push(kind.tag());
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        match default {
            None => buf.push(0),
            Some(v) => {
                buf.push(1);
                if *kind == Kind::Str {
                    let as_str = coerce::cast(mem, *v, Kind::Str)?;
                    let text = strings::expect_string(mem, as_str)?;
                    if text.len() > u16::MAX as usize {
                        return Err(err(ErrorKind::ResourceExhausted, "default string too long"));
                    }
                    buf.extend_from_slice(&(text.len() as u16).to_le_bytes());
                    buf.extend_from_slice(text.as_bytes());
                } else if kind.is_reference() {
                    return Err(err(
                        ErrorKind::TypeMismatch,
                        format!("{kind} fields cannot carry defaults"),
                    ));
                } else {
                    let v = coerce::cast(mem, *v, *kind)?;
                    let start = buf.len();
                    buf.resize(start + cell_size(*kind), 0);
                    encode_cell_to(&v, *kind, &mut buf[start..])?;
                }
            }
        }
    }
    let ptr = mem.alloc(buf.len(), Kind::Byte, false)?;
    mem.arena.write_bytes(ptr as usize, &buf)?;
    Ok(ptr)
}

/// Encode a value-kind cell into a plain byte slice (signatures are
/// built outside the arena, then copied in).
fn encode_cell_to(v: &Value, kind: Kind, out: &mut [u8]) -> RunResult<()> {
    let bytes: Vec<u8> = match (kind, v) {
        (Kind::Int, Value::Int(x)) => x.to_le_bytes().into(),
        (Kind::Uint, Value::Uint(x)) => x.to_le_bytes().into(),
        (Kind::Long, Value::Long(x)) => x.to_le_bytes().into(),
        (Kind::Ulong, Value::Ulong(x)) => x.to_le_bytes().into(),
        (Kind::Short, Value::Short(x)) => x.to_le_bytes().into(),
        (Kind::UShort, Value::UShort(x)) => x.to_le_bytes().into(),
        (Kind::Byte, Value::Byte(x)) => vec![*x],
        (Kind::Sbyte, Value::Sbyte(x)) => vec![*x as u8],
        (Kind::Float, Value::Float(x)) => x.to_bits().to_le_bytes().into(),
        (Kind::Double, Value::Double(x)) => x.to_bits().to_le_bytes().into(),
        (Kind::Decimal, Value::Decimal(x)) => x.to_bits().into(),
        (Kind::Bool, Value::Bool(x)) => vec![*x as u8],
        (Kind::Char, Value::Char(x)) => x.to_le_bytes().into(),
        (Kind::IntPtr, Value::IntPtr(x)) => x.to_le_bytes().into(),
        (Kind::DateTime, Value::DateTime(d)) => d.ticks.to_le_bytes().into(),
        (Kind::TimeSpan, Value::TimeSpan(s)) => s.ticks.to_le_bytes().into(),
        _ => {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("cannot encode {} as a {kind} default", v.kind()),
            ));
        }
    };
    out.copy_from_slice(&bytes);
    Ok(())
}

/// Parse a signature block back into field definitions.
pub fn parse_signature(mem: &Memory, sig: HeapPtr) -> RunResult<Vec<SigField>> {
    let info = mem.arena.block_info(sig)?;
    if info.kind != Kind::Byte || info.is_array {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("block at {sig} is not a struct signature"),
        ));
    }
    let bytes = mem.arena.read_bytes(sig as usize, info.payload_len())?.to_vec();
    let mut fields = Vec::new();
    let mut off = 0;
    while off < bytes.len() {
        let kind = Kind::from_tag(bytes[off]).ok_or_else(corrupt)?;
        off += 1;
        let name_len = *bytes.get(off).ok_or_else(corrupt)? as usize;
        off += 1;
        let name = String::from_utf8_lossy(bytes.get(off..off + name_len).ok_or_else(corrupt)?)
            .into_owned();
        off += name_len;
        let has_init = *bytes.get(off).ok_or_else(corrupt)? != 0;
        off += 1;
        let default = if !has_init {
            None
        } else if kind == Kind::Str {
            let len =
                u16::from_le_bytes(bytes.get(off..off + 2).ok_or_else(corrupt)?.try_into().unwrap())
                    as usize;
            off += 2;
            let text =
                String::from_utf8_lossy(bytes.get(off..off + len).ok_or_else(corrupt)?).into_owned();
            off += len;
            Some(SigDefault::Text(text))
        } else {
            let size = cell_size(kind);
            let cell = bytes.get(off..off + size).ok_or_else(corrupt)?.to_vec();
            off += size;
            Some(SigDefault::Inline(cell))
        };
        fields.push(SigField { kind, name, default });
    }
    Ok(fields)
}

/// Allocate an instance with every field set to its default, `0` bytes
/// for value kinds or null for reference kinds.
pub fn new_instance(mem: &mut Memory, sig: HeapPtr, as_class: bool) -> RunResult<HeapPtr> {
    let fields = parse_signature(mem, sig)?;
    let mut size = 4;
    for f in &fields {
        size += 1 + cell_size(f.kind);
    }
    let block_kind = if as_class { Kind::Class } else { Kind::Struct };
    let inst = mem.alloc(size, block_kind, false)?;
    mem.arena.write_i32(inst as usize, sig)?;
    let mut off = inst as usize + 4;
    for f in &fields {
        mem.arena.write_u8(off, f.kind.tag())?;
        off += 1;
        match &f.default {
            Some(SigDefault::Inline(cell)) => mem.arena.write_bytes(off, cell)?,
            Some(SigDefault::Text(text)) => {
                let s = strings::alloc_string(mem, text)?;
                mem.arena.write_i32(off, s)?;
            }
            None if f.kind.is_reference() => mem.arena.write_i32(off, NULL_PTR)?,
            None => {} // payload already zeroed by the allocator
        }
        off += cell_size(f.kind);
    }
    Ok(inst)
}

pub fn signature_of(mem: &Memory, inst: HeapPtr) -> RunResult<HeapPtr> {
    expect_instance(mem, inst)?;
    mem.arena.read_i32(inst as usize)
}

fn expect_instance(mem: &Memory, inst: HeapPtr) -> RunResult<()> {
    let info = mem.arena.block_info(inst)?;
    if !matches!(info.kind, Kind::Struct | Kind::Class) || info.is_array {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("block at {inst} is not a struct instance"),
        ));
    }
    Ok(())
}

/// Locate `name` in the instance: payload offset of the actual-kind tag,
/// the actual kind, and the declared kind from the signature.
pub fn field_offset(mem: &Memory, inst: HeapPtr, name: &str) -> RunResult<(usize, Kind, Kind)> {
    expect_instance(mem, inst)?;
    let sig = mem.arena.read_i32(inst as usize)?;
    let fields = parse_signature(mem, sig)?;
    let mut off = inst as usize + 4;
    for f in &fields {
        let actual = Kind::from_tag(mem.arena.read_u8(off)?).ok_or_else(corrupt)?;
        if f.name == name {
            return Ok((off, actual, f.kind));
        }
        off += 1 + cell_size(actual);
    }
    Err(err(
        ErrorKind::NameError,
        format!("no field named '{name}'"),
    ))
}

pub fn read_field(mem: &Memory, inst: HeapPtr, name: &str) -> RunResult<Value> {
    let (off, actual, _) = field_offset(mem, inst, name)?;
    Value::read_cell(mem, off + 1, actual)
}

/// Every field as (name, value), in declaration order.
pub fn read_fields(mem: &Memory, inst: HeapPtr) -> RunResult<Vec<(String, Value)>> {
    expect_instance(mem, inst)?;
    let sig = mem.arena.read_i32(inst as usize)?;
    let fields = parse_signature(mem, sig)?;
    let mut out = Vec::with_capacity(fields.len());
    let mut off = inst as usize + 4;
    for f in &fields {
        let actual = Kind::from_tag(mem.arena.read_u8(off)?).ok_or_else(corrupt)?;
        out.push((f.name.clone(), Value::read_cell(mem, off + 1, actual)?));
        off += 1 + cell_size(actual);
    }
    Ok(out)
}

/// Write `name`. An `object`-declared field takes the value's concrete
/// kind (the actual-kind override); anything else casts to the declared
/// kind. A size-changing override rebuilds the instance, so the
/// (possibly relocated) instance pointer is returned.
pub fn write_field(mem: &mut Memory, inst: HeapPtr, name: &str, v: Value) -> RunResult<HeapPtr> {
    let (_, _, declared) = field_offset(mem, inst, name)?;
    let (new_actual, v) = if declared == Kind::Object {
        let v = coerce::unwrap_nullable(mem, v)?;
        (v.kind(), v)
    } else {
        (declared, coerce::cast(mem, v, declared)?)
    };

    // Re-walk, collecting raw field images so a size change can rebuild
    expect_instance(mem, inst)?;
    let sig = mem.arena.read_i32(inst as usize)?;
    let fields = parse_signature(mem, sig)?;
    let mut images: Vec<(Kind, Option<Vec<u8>>)> = Vec::with_capacity(fields.len());
    let mut off = inst as usize + 4;
    let mut target = None;
    for (i, f) in fields.iter().enumerate() {
        let actual = Kind::from_tag(mem.arena.read_u8(off)?).ok_or_else(corrupt)?;
        if f.name == name {
            target = Some(i);
            images.push((new_actual, None));
        } else {
            let raw = mem.arena.read_bytes(off + 1, cell_size(actual))?.to_vec();
            images.push((actual, Some(raw)));
        }
        off += 1 + cell_size(actual);
    }
    let target = target.expect("field located above");

    let new_size = 4 + images
        .iter()
        .map(|(k, _)| 1 + cell_size(*k))
        .sum::<usize>();
    let inst = mem.realloc(inst, new_size)?;
    mem.arena.write_i32(inst as usize, sig)?;
    let mut off = inst as usize + 4;
    for (i, (kind, raw)) in images.iter().enumerate() {
        mem.arena.write_u8(off, kind.tag())?;
        match raw {
            Some(bytes) => mem.arena.write_bytes(off + 1, bytes)?,
            None => {
                debug_assert_eq!(i, target);
                v.write_cell(mem, off + 1, *kind)?;
            }
        }
        off += 1 + cell_size(*kind);
    }
    Ok(inst)
}

fn corrupt() -> sable_core::RuntimeError {
    err(ErrorKind::SandboxViolation, "corrupt struct signature")
}
