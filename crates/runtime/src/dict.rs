//! Dictionaries
//!
//! A dictionary block is `[key-kind (1) | value-kind (1) | entries…]`
//! with each entry `key-cell | value-cell`. Lookup is a linear scan over
//! the payload; key equality is byte-equal for value kinds, UTF-8
//! content for string keys and pointer identity for other reference
//! kinds. Growth reallocates the block (the relocating realloc keeps
//! every stored pointer honest).

use crate::arith;
use crate::coerce;
use crate::value::Value;
use sable_core::arena::HeapPtr;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;
use sable_core::trace::cell_size;

pub fn key_kind(mem: &Memory, ptr: HeapPtr) -> RunResult<Kind> {
    kinds(mem, ptr).map(|(k, _)| k)
}

pub fn value_kind(mem: &Memory, ptr: HeapPtr) -> RunResult<Kind> {
    kinds(mem, ptr).map(|(_, v)| v)
}

fn kinds(mem: &Memory, ptr: HeapPtr) -> RunResult<(Kind, Kind)> {
    let info = mem.arena.block_info(ptr)?;
    if info.kind != Kind::Dict || info.is_array {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("block at {ptr} is not a dictionary"),
        ));
    }
    let kk = Kind::from_tag(mem.arena.read_u8(ptr as usize)?)
        .ok_or_else(corrupt)?;
    let vk = Kind::from_tag(mem.arena.read_u8(ptr as usize + 1)?)
        .ok_or_else(corrupt)?;
    Ok((kk, vk))
}

fn entry_size(kk: Kind, vk: Kind) -> usize {
    cell_size(kk) + cell_size(vk)
}

pub fn count(mem: &Memory, ptr: HeapPtr) -> RunResult<usize> {
    let (kk, vk) = kinds(mem, ptr)?;
    Ok((mem.arena.payload_len(ptr)? - 2) / entry_size(kk, vk))
}

/// Allocate a dictionary with the given kinds and initial entries.
pub fn alloc_dict(
    mem: &mut Memory,
    kk: Kind,
    vk: Kind,
    entries: &[(Value, Value)],
) -> RunResult<HeapPtr> {
    let ptr = mem.alloc(2 + entries.len() * entry_size(kk, vk), Kind::Dict, false)?;
    mem.arena.write_u8(ptr as usize, kk.tag())?;
    mem.arena.write_u8(ptr as usize + 1, vk.tag())?;
    let mut off = ptr as usize + 2;
    for (k, v) in entries {
        let k = coerce::cast(mem, *k, kk)?;
        let v = coerce::cast(mem, *v, vk)?;
        k.write_cell(mem, off, kk)?;
        off += cell_size(kk);
        v.write_cell(mem, off, vk)?;
        off += cell_size(vk);
    }
    Ok(ptr)
}

/// Address of the entry whose key equals `key`, or None.
fn find_entry(mem: &Memory, ptr: HeapPtr, key: Value) -> RunResult<Option<usize>> {
    let (kk, vk) = kinds(mem, ptr)?;
    let n = count(mem, ptr)?;
    let entry = entry_size(kk, vk);
    for i in 0..n {
        let off = ptr as usize + 2 + i * entry;
        let stored = Value::read_cell(mem, off, kk)?;
        if keys_equal(mem, kk, stored, key)? {
            return Ok(Some(off));
        }
    }
    Ok(None)
}

/// Key equality per the wire contract: value kinds by value, strings by
/// content, other reference kinds by pointer identity.
fn keys_equal(mem: &Memory, kk: Kind, stored: Value, key: Value) -> RunResult<bool> {
    if kk.is_reference() && kk != Kind::Str {
        return Ok(stored.heap_ptr() == key.heap_ptr());
    }
    arith::equals(mem, stored, key)
}

pub fn contains_key(mem: &Memory, ptr: HeapPtr, key: Value) -> RunResult<bool> {
    Ok(find_entry(mem, ptr, key)?.is_some())
}

pub fn contains_value(mem: &Memory, ptr: HeapPtr, value: Value) -> RunResult<bool> {
    for v in values(mem, ptr)? {
        if arith::equals(mem, v, value)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn get(mem: &Memory, ptr: HeapPtr, key: Value) -> RunResult<Value> {
    let (kk, vk) = kinds(mem, ptr)?;
    match find_entry(mem, ptr, key)? {
        Some(off) => Value::read_cell(mem, off + cell_size(kk), vk),
        None => Err(err(
            ErrorKind::NameError,
            "the given key was not present in the dictionary",
        )),
    }
}

/// Update in place when the key exists, otherwise grow the block by one
/// entry. Returns the (possibly relocated) dictionary pointer.
pub fn set(mem: &mut Memory, ptr: HeapPtr, key: Value, value: Value) -> RunResult<HeapPtr> {
    let (kk, vk) = kinds(mem, ptr)?;
    let key = coerce::cast(mem, key, kk)?;
    let value = coerce::cast(mem, value, vk)?;
    if let Some(off) = find_entry(mem, ptr, key)? {
        value.write_cell(mem, off + cell_size(kk), vk)?;
        return Ok(ptr);
    }
    let old_len = mem.arena.payload_len(ptr)?;
    let grown = mem.realloc(ptr, old_len + entry_size(kk, vk))?;
    let mut off = grown as usize + old_len;
    key.write_cell(mem, off, kk)?;
    off += cell_size(kk);
    value.write_cell(mem, off, vk)?;
    Ok(grown)
}

/// Drop the entry for `key`; fresh block. False when absent.
pub fn remove(mem: &mut Memory, ptr: HeapPtr, key: Value) -> RunResult<(HeapPtr, bool)> {
    let (kk, vk) = kinds(mem, ptr)?;
    if find_entry(mem, ptr, key)?.is_none() {
        return Ok((ptr, false));
    }
    let kept: Vec<(Value, Value)> = entries(mem, ptr)?
        .into_iter()
        .map(|(k, v)| Ok((k, v, keys_equal(mem, kk, k, key)?)))
        .collect::<RunResult<Vec<_>>>()?
        .into_iter()
        .filter(|(_, _, hit)| !hit)
        .map(|(k, v, _)| (k, v))
        .collect();
    let fresh = alloc_dict(mem, kk, vk, &kept)?;
    mem.free(ptr)?;
    Ok((fresh, true))
}

pub fn entries(mem: &Memory, ptr: HeapPtr) -> RunResult<Vec<(Value, Value)>> {
    let (kk, vk) = kinds(mem, ptr)?;
    let n = count(mem, ptr)?;
    let entry = entry_size(kk, vk);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let off = ptr as usize + 2 + i * entry;
        let k = Value::read_cell(mem, off, kk)?;
        let v = Value::read_cell(mem, off + cell_size(kk), vk)?;
        out.push((k, v));
    }
    Ok(out)
}

pub fn keys(mem: &Memory, ptr: HeapPtr) -> RunResult<Vec<Value>> {
    Ok(entries(mem, ptr)?.into_iter().map(|(k, _)| k).collect())
}

pub fn values(mem: &Memory, ptr: HeapPtr) -> RunResult<Vec<Value>> {
    Ok(entries(mem, ptr)?.into_iter().map(|(_, v)| v).collect())
}

fn corrupt() -> sable_core::RuntimeError {
    err(ErrorKind::SandboxViolation, "corrupt dictionary header")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::alloc_string;

    fn memory() -> Memory {
        Memory::new(8192, 1024).unwrap()
    }

    #[test]
    fn test_int_to_int() {
        let mut m = memory();
        let d = alloc_dict(&mut m, Kind::Int, Kind::Int, &[(Value::Int(1), Value::Int(10))])
            .unwrap();
        assert_eq!(count(&m, d).unwrap(), 1);
        assert_eq!(get(&m, d, Value::Int(1)).unwrap(), Value::Int(10));
        assert!(contains_key(&m, d, Value::Int(1)).unwrap());
        assert!(!contains_key(&m, d, Value::Int(2)).unwrap());
        assert_eq!(
            get(&m, d, Value::Int(2)).unwrap_err().kind,
            ErrorKind::NameError
        );
    }

    #[test]
    fn test_set_updates_in_place() {
        let mut m = memory();
        let d = alloc_dict(&mut m, Kind::Int, Kind::Int, &[(Value::Int(1), Value::Int(10))])
            .unwrap();
        let d2 = set(&mut m, d, Value::Int(1), Value::Int(20)).unwrap();
        assert_eq!(d2, d);
        assert_eq!(get(&m, d, Value::Int(1)).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_set_grows() {
        let mut m = memory();
        let d = alloc_dict(&mut m, Kind::Int, Kind::Int, &[]).unwrap();
        let d = set(&mut m, d, Value::Int(1), Value::Int(10)).unwrap();
        let d = set(&mut m, d, Value::Int(2), Value::Int(20)).unwrap();
        assert_eq!(count(&m, d).unwrap(), 2);
        assert_eq!(get(&m, d, Value::Int(2)).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_growth_relocates_variable() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("d", Kind::Dict).unwrap();
        let d = alloc_dict(&mut m, Kind::Int, Kind::Int, &[]).unwrap();
        m.arena.write_i32(var.addr, d).unwrap();
        // Wedge another block after the dict so growth must move it
        let _guard = alloc_string(&mut m, "wedge").unwrap();
        let d2 = set(&mut m, d, Value::Int(1), Value::Int(10)).unwrap();
        assert_ne!(d2, d);
        assert_eq!(m.arena.read_i32(var.addr).unwrap(), d2);
    }

    #[test]
    fn test_string_keys_compare_by_content() {
        let mut m = memory();
        let k1 = alloc_string(&mut m, "name").unwrap();
        let d = alloc_dict(
            &mut m,
            Kind::Str,
            Kind::Int,
            &[(Value::Str(k1), Value::Int(5))],
        )
        .unwrap();
        let k2 = alloc_string(&mut m, "name").unwrap();
        assert_eq!(get(&m, d, Value::Str(k2)).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_reference_values_by_identity() {
        let mut m = memory();
        let v1 = alloc_string(&mut m, "payload").unwrap();
        let arr1 = crate::arrays::from_values(&mut m, Kind::Str, &[Value::Str(v1)]).unwrap();
        let d = alloc_dict(
            &mut m,
            Kind::Array,
            Kind::Int,
            &[(Value::Array(arr1), Value::Int(1))],
        )
        .unwrap();
        assert!(contains_key(&m, d, Value::Array(arr1)).unwrap());
        let arr2 = crate::arrays::from_values(&mut m, Kind::Str, &[Value::Str(v1)]).unwrap();
        assert!(!contains_key(&m, d, Value::Array(arr2)).unwrap());
    }

    #[test]
    fn test_remove() {
        let mut m = memory();
        let d = alloc_dict(
            &mut m,
            Kind::Int,
            Kind::Int,
            &[(Value::Int(1), Value::Int(10)), (Value::Int(2), Value::Int(20))],
        )
        .unwrap();
        let (d2, hit) = remove(&mut m, d, Value::Int(1)).unwrap();
        assert!(hit);
        assert_eq!(count(&m, d2).unwrap(), 1);
        assert!(!contains_key(&m, d2, Value::Int(1)).unwrap());
        let (d3, hit) = remove(&mut m, d2, Value::Int(9)).unwrap();
        assert!(!hit);
        assert_eq!(d3, d2);
    }

    #[test]
    fn test_object_values_box() {
        let mut m = memory();
        let d = alloc_dict(&mut m, Kind::Str, Kind::Object, &[]).unwrap();
        let k = alloc_string(&mut m, "n").unwrap();
        let d = set(&mut m, d, Value::Str(k), Value::Int(7)).unwrap();
        let k2 = alloc_string(&mut m, "n").unwrap();
        assert_eq!(get(&m, d, Value::Str(k2)).unwrap(), Value::Int(7));
    }
}
