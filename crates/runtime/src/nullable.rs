//! Nullable values
//!
//! A `Nullable` block packs `[base-kind (1) | inline value]`. The null
//! nullable is not a block at all: it is the pointer -1 (any pointer
//! ≤ 0 reads as null). Only value kinds pack; a reference kind is
//! already nullable through its pointer.

use crate::value::Value;
use sable_core::arena::{HeapPtr, NULL_PTR};
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;

/// Pack `v` into a fresh nullable block. `Value::Null` packs to the
/// null handle.
pub fn pack(mem: &mut Memory, v: Value) -> RunResult<HeapPtr> {
    if v.is_null() {
        return Ok(NULL_PTR);
    }
    let base = v.kind();
    if base.is_reference() {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("{base} is already nullable"),
        ));
    }
    let ptr = mem.alloc(1 + base.stack_size(), Kind::Nullable, false)?;
    mem.arena.write_u8(ptr as usize, base.tag())?;
    v.write_cell(mem, ptr as usize + 1, base)?;
    Ok(ptr)
}

/// The base kind a nullable block wraps.
pub fn base_kind(mem: &Memory, ptr: HeapPtr) -> RunResult<Kind> {
    let tag = mem.arena.read_u8(ptr as usize)?;
    Kind::from_tag(tag).ok_or_else(|| {
        err(ErrorKind::SandboxViolation, "corrupt nullable base kind")
    })
}

/// Unwrap: null for a handle ≤ 0, otherwise the decoded inner value.
pub fn read(mem: &Memory, ptr: HeapPtr) -> RunResult<Value> {
    if ptr <= 0 {
        return Ok(Value::Null);
    }
    let base = base_kind(mem, ptr)?;
    Value::read_cell(mem, ptr as usize + 1, base)
}

/// Assign into an existing nullable block of the same base kind,
/// in place. Returns false when the block cannot take the value (null
/// handle or differing base kind) and a fresh pack is needed.
pub fn write_in_place(mem: &mut Memory, ptr: HeapPtr, v: Value) -> RunResult<bool> {
    if ptr <= 0 || v.is_null() {
        return Ok(false);
    }
    let base = base_kind(mem, ptr)?;
    if v.kind() != base {
        return Ok(false);
    }
    v.write_cell(mem, ptr as usize + 1, base)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        Memory::new(4096, 1024).unwrap()
    }

    #[test]
    fn test_pack_and_read() {
        let mut m = memory();
        let p = pack(&mut m, Value::Int(42)).unwrap();
        assert_eq!(base_kind(&m, p).unwrap(), Kind::Int);
        assert_eq!(read(&m, p).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_null_packs_to_null_handle() {
        let mut m = memory();
        assert_eq!(pack(&mut m, Value::Null).unwrap(), NULL_PTR);
        assert_eq!(read(&m, NULL_PTR).unwrap(), Value::Null);
        assert_eq!(read(&m, 0).unwrap(), Value::Null);
    }

    #[test]
    fn test_write_in_place_same_base() {
        let mut m = memory();
        let p = pack(&mut m, Value::Int(1)).unwrap();
        assert!(write_in_place(&mut m, p, Value::Int(2)).unwrap());
        assert_eq!(read(&m, p).unwrap(), Value::Int(2));
        // differing base kind refuses
        assert!(!write_in_place(&mut m, p, Value::Bool(true)).unwrap());
    }

    #[test]
    fn test_reference_kind_rejected() {
        let mut m = memory();
        let s = crate::strings::alloc_string(&mut m, "x").unwrap();
        assert_eq!(
            pack(&mut m, Value::Str(s)).unwrap_err().kind,
            ErrorKind::TypeMismatch
        );
    }
}
