//! Heap strings
//!
//! Strings are UTF-8 bytes in a `Str` block. Shrinking a variable's
//! string in place leaves the block length alone and zero-pads the tail;
//! readers trim trailing `0x00`/`0xFF` when decoding. Growth allocates a
//! new block and frees the old one.

use crate::value::Value;
use sable_core::arena::HeapPtr;
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;
use sable_core::scope::Variable;

/// Allocate a fresh string block.
pub fn alloc_string(mem: &mut Memory, s: &str) -> RunResult<HeapPtr> {
    let ptr = mem.alloc(s.len(), Kind::Str, false)?;
    mem.arena.write_bytes(ptr as usize, s.as_bytes())?;
    Ok(ptr)
}

/// Decode the string block at `ptr`, trimming trailing padding bytes.
pub fn read_string(mem: &Memory, ptr: HeapPtr) -> RunResult<String> {
    let info = mem.arena.block_info(ptr)?;
    if info.kind != Kind::Str || info.is_array {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("block at {ptr} is not a string"),
        ));
    }
    let bytes = mem.arena.read_bytes(ptr as usize, info.payload_len())?;
    let end = bytes
        .iter()
        .rposition(|b| *b != 0x00 && *b != 0xFF)
        .map_or(0, |i| i + 1);
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Store `s` into the string variable `var`: reuse the current block in
/// place when it is large enough (zero-padding the tail), otherwise
/// allocate a new block, retarget the slot and free the old block.
/// Returns the block pointer the variable ends up with.
pub fn store_string(mem: &mut Memory, var: Variable, s: &str) -> RunResult<HeapPtr> {
    if var.kind != Kind::Str {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("variable is {}, not string", var.kind),
        ));
    }
    let old = mem.arena.read_i32(var.addr)?;
    if old >= 0 {
        let capacity = mem.arena.payload_len(old)?;
        if capacity >= s.len() {
            mem.arena.write_bytes(old as usize, s.as_bytes())?;
            mem.arena.fill(old as usize + s.len(), capacity - s.len(), 0)?;
            return Ok(old);
        }
    }
    let fresh = alloc_string(mem, s)?;
    mem.arena.write_i32(var.addr, fresh)?;
    if old >= 0 {
        mem.free(old)?;
    }
    Ok(fresh)
}

/// String value or error; the common guard for member operations.
pub fn expect_string(mem: &Memory, v: Value) -> RunResult<String> {
    match v {
        Value::Str(p) => read_string(mem, p),
        Value::Char(c) => Ok(String::from_utf16_lossy(&[c])),
        other => Err(err(
            ErrorKind::TypeMismatch,
            format!("expected string, got {}", other.kind()),
        )),
    }
}

/// Concatenate two already-decoded strings into a new block.
pub fn concat(mem: &mut Memory, a: &str, b: &str) -> RunResult<HeapPtr> {
    let mut s = String::with_capacity(a.len() + b.len());
    s.push_str(a);
    s.push_str(b);
    alloc_string(mem, &s)
}

/// `text[index]` as a UTF-16 code unit, supporting from-end indexing.
pub fn char_at(text: &str, index: i64, from_end: bool) -> RunResult<u16> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let idx = resolve_index(index, from_end, units.len())?;
    Ok(units[idx])
}

/// Substring by UTF-16 offsets (the language's index space).
pub fn substring(text: &str, start: i64, length: Option<i64>) -> RunResult<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    if start < 0 || start as usize > units.len() {
        return Err(range_err(start, units.len()));
    }
    let start = start as usize;
    let end = match length {
        Some(len) if len < 0 => return Err(range_err(len, units.len())),
        Some(len) => start
            .checked_add(len as usize)
            .filter(|e| *e <= units.len())
            .ok_or_else(|| range_err(len, units.len()))?,
        None => units.len(),
    };
    Ok(String::from_utf16_lossy(&units[start..end]))
}

/// Index of `needle` in `haystack`, in UTF-16 units; -1 when absent.
pub fn index_of(haystack: &str, needle: &str) -> i64 {
    match haystack.find(needle) {
        Some(byte_pos) => haystack[..byte_pos].encode_utf16().count() as i64,
        None => -1,
    }
}

pub fn resolve_index(index: i64, from_end: bool, len: usize) -> RunResult<usize> {
    let effective = if from_end { len as i64 - index } else { index };
    if effective < 0 || effective >= len as i64 {
        return Err(range_err(index, len));
    }
    Ok(effective as usize)
}

fn range_err(index: i64, len: usize) -> sable_core::RuntimeError {
    err(
        ErrorKind::IndexOutOfRange,
        format!("index {index} out of range for length {len}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        Memory::new(4096, 1024).unwrap()
    }

    #[test]
    fn test_alloc_and_read() {
        let mut m = memory();
        let p = alloc_string(&mut m, "héllo").unwrap();
        assert_eq!(read_string(&m, p).unwrap(), "héllo");
        assert_eq!(m.arena.read_kind(p).unwrap(), Kind::Str);
    }

    #[test]
    fn test_store_shrinks_in_place() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("s", Kind::Str).unwrap();
        let p1 = alloc_string(&mut m, "a longer string").unwrap();
        m.arena.write_i32(var.addr, p1).unwrap();

        let p2 = store_string(&mut m, var, "tiny").unwrap();
        assert_eq!(p2, p1); // reused in place
        assert_eq!(read_string(&m, p1).unwrap(), "tiny");
    }

    #[test]
    fn test_store_grows_to_new_block_and_frees_old() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("s", Kind::Str).unwrap();
        let p1 = alloc_string(&mut m, "ab").unwrap();
        m.arena.write_i32(var.addr, p1).unwrap();
        let _guard = alloc_string(&mut m, "x").unwrap();

        let p2 = store_string(&mut m, var, "a much longer replacement").unwrap();
        assert_ne!(p2, p1);
        assert_eq!(m.arena.read_i32(var.addr).unwrap(), p2);
        assert!(!m.arena.is_used(p1).unwrap());
        assert_eq!(read_string(&m, p2).unwrap(), "a much longer replacement");
    }

    #[test]
    fn test_trailing_padding_trimmed() {
        let mut m = memory();
        let p = mem_with_padding(&mut m);
        assert_eq!(read_string(&m, p).unwrap(), "ok");
    }

    fn mem_with_padding(m: &mut Memory) -> HeapPtr {
        let p = m.alloc(6, Kind::Str, false).unwrap();
        m.arena.write_bytes(p as usize, b"ok\0\0").unwrap();
        m.arena.write_u8(p as usize + 4, 0xFF).unwrap();
        p
    }

    #[test]
    fn test_substring_and_index_of() {
        assert_eq!(substring("hello", 1, Some(3)).unwrap(), "ell");
        assert_eq!(substring("hello", 2, None).unwrap(), "llo");
        assert!(substring("hello", 4, Some(3)).is_err());
        assert_eq!(index_of("hello", "ll"), 2);
        assert_eq!(index_of("hello", "z"), -1);
    }

    #[test]
    fn test_char_at_from_end() {
        assert_eq!(char_at("abc", 1, true).unwrap(), b'c' as u16);
        assert_eq!(char_at("abc", 0, false).unwrap(), b'a' as u16);
        assert_eq!(
            char_at("abc", -1, false).unwrap_err().kind,
            ErrorKind::IndexOutOfRange
        );
    }
}
