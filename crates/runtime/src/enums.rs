//! Enum member values
//!
//! An `Enum` block is `[type-name-ptr(4) | member-name-ptr(4) | value(8)]`.
//! Both name pointers are string blocks traced by the collector, so a
//! live enum value keeps its names alive.

use crate::strings;
use sable_core::arena::HeapPtr;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;

/// Allocate an enum member value.
pub fn alloc_enum(
    mem: &mut Memory,
    type_name: &str,
    member: &str,
    value: i64,
) -> RunResult<HeapPtr> {
    let type_ptr = strings::alloc_string(mem, type_name)?;
    let member_ptr = strings::alloc_string(mem, member)?;
    let ptr = mem.alloc(16, Kind::Enum, false)?;
    mem.arena.write_i32(ptr as usize, type_ptr)?;
    mem.arena.write_i32(ptr as usize + 4, member_ptr)?;
    mem.arena.write_i64(ptr as usize + 8, value)?;
    Ok(ptr)
}

/// Read `(type-name, member-name, value)`.
pub fn read_enum(mem: &Memory, ptr: HeapPtr) -> RunResult<(String, String, i64)> {
    let info = mem.arena.block_info(ptr)?;
    if info.kind != Kind::Enum || info.is_array {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("block at {ptr} is not an enum value"),
        ));
    }
    let type_ptr = mem.arena.read_i32(ptr as usize)?;
    let member_ptr = mem.arena.read_i32(ptr as usize + 4)?;
    let value = mem.arena.read_i64(ptr as usize + 8)?;
    let type_name = if type_ptr >= 0 {
        strings::read_string(mem, type_ptr)?
    } else {
        String::new()
    };
    let member = if member_ptr >= 0 {
        strings::read_string(mem, member_ptr)?
    } else {
        String::new()
    };
    Ok((type_name, member, value))
}

pub fn value_of(mem: &Memory, ptr: HeapPtr) -> RunResult<i64> {
    Ok(read_enum(mem, ptr)?.2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut m = Memory::new(4096, 1024).unwrap();
        let e = alloc_enum(&mut m, "Color", "Green", 1).unwrap();
        assert_eq!(
            read_enum(&m, e).unwrap(),
            ("Color".to_string(), "Green".to_string(), 1)
        );
        assert_eq!(value_of(&m, e).unwrap(), 1);
    }

    #[test]
    fn test_gc_keeps_names() {
        let mut m = Memory::new(4096, 1024).unwrap();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("c", Kind::Enum).unwrap();
        let e = alloc_enum(&mut m, "Color", "Red", 0).unwrap();
        m.arena.write_i32(var.addr, e).unwrap();
        m.collect().unwrap();
        assert_eq!(read_enum(&m, e).unwrap().1, "Red");
    }
}
