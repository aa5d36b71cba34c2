//! Tuple packing and deconstruction
//!
//! A tuple block is a sequence of entries `kind(1) | payload | name-ptr(4)`
//! where reference payloads are 4-byte pointers and the name pointer is a
//! string block or -1 for positional entries.

use crate::strings;
use crate::value::Value;
use sable_core::arena::{HeapPtr, NULL_PTR};
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;
use sable_core::trace::cell_size;

/// One tuple element: value plus optional name.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleItem {
    pub value: Value,
    pub name: Option<String>,
}

impl TupleItem {
    pub fn positional(value: Value) -> TupleItem {
        TupleItem { value, name: None }
    }

    pub fn named(value: Value, name: impl Into<String>) -> TupleItem {
        TupleItem {
            value,
            name: Some(name.into()),
        }
    }
}

/// Pack `items` into a fresh tuple block. Null items are stored as
/// `object` entries with a null pointer.
pub fn alloc_tuple(mem: &mut Memory, items: &[TupleItem]) -> RunResult<HeapPtr> {
    let mut size = 0;
    for item in items {
        size += 1 + cell_size(item.value.kind()) + 4;
    }
    // Name blocks first; nothing here can trigger a sweep mid-build
    let mut name_ptrs = Vec::with_capacity(items.len());
    for item in items {
        name_ptrs.push(match &item.name {
            Some(n) => strings::alloc_string(mem, n)?,
            None => NULL_PTR,
        });
    }
    let ptr = mem.alloc(size, Kind::Tuple, false)?;
    let mut off = ptr as usize;
    for (item, name_ptr) in items.iter().zip(name_ptrs) {
        let kind = item.value.kind();
        mem.arena.write_u8(off, kind.tag())?;
        off += 1;
        item.value.write_cell(mem, off, kind)?;
        off += cell_size(kind);
        mem.arena.write_i32(off, name_ptr)?;
        off += 4;
    }
    Ok(ptr)
}

/// Unpack the tuple at `ptr`.
pub fn read_tuple(mem: &Memory, ptr: HeapPtr) -> RunResult<Vec<TupleItem>> {
    let info = mem.arena.block_info(ptr)?;
    if info.kind != Kind::Tuple || info.is_array {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("block at {ptr} is not a tuple"),
        ));
    }
    let end = ptr as usize + info.payload_len();
    let mut off = ptr as usize;
    let mut items = Vec::new();
    while off < end {
        let tag = mem.arena.read_u8(off)?;
        let kind = Kind::from_tag(tag)
            .ok_or_else(|| err(ErrorKind::SandboxViolation, "corrupt tuple entry"))?;
        off += 1;
        let value = Value::read_cell(mem, off, kind)?;
        off += cell_size(kind);
        let name_ptr = mem.arena.read_i32(off)?;
        off += 4;
        let name = if name_ptr >= 0 {
            Some(strings::read_string(mem, name_ptr)?)
        } else {
            None
        };
        items.push(TupleItem { value, name });
    }
    Ok(items)
}

pub fn arity(mem: &Memory, ptr: HeapPtr) -> RunResult<usize> {
    Ok(read_tuple(mem, ptr)?.len())
}

/// Element by position.
pub fn get(mem: &Memory, ptr: HeapPtr, index: usize) -> RunResult<Value> {
    let items = read_tuple(mem, ptr)?;
    items
        .get(index)
        .map(|i| i.value)
        .ok_or_else(|| {
            err(
                ErrorKind::IndexOutOfRange,
                format!("tuple has {} elements, no element {index}", items.len()),
            )
        })
}

/// Element by name, also accepting the positional spellings `Item1`,
/// `Item2`, ….
pub fn get_named(mem: &Memory, ptr: HeapPtr, name: &str) -> RunResult<Value> {
    let items = read_tuple(mem, ptr)?;
    if let Some(item) = items.iter().find(|i| i.name.as_deref() == Some(name)) {
        return Ok(item.value);
    }
    if let Some(n) = name.strip_prefix("Item")
        && let Ok(i) = n.parse::<usize>()
        && i >= 1
        && i <= items.len()
    {
        return Ok(items[i - 1].value);
    }
    Err(err(
        ErrorKind::NameError,
        format!("tuple has no element named '{name}'"),
    ))
}
