//! Layout-keyed reference traversal
//!
//! The GC's marker and the relocating realloc both need to know, for any
//! heap block, where inside its payload 4-byte heap pointers live. That
//! knowledge is a pure function of the block header plus the payload's
//! self-describing structure:
//!
//! - `Array` of a reference kind: every 4-byte element slot
//! - `Tuple`: each entry is `kind(1) | payload | name-ptr(4)`; reference
//!   payloads and every name-ptr are pointer slots
//! - `Nullable`: `base-kind(1) | value`; the value is a pointer slot when
//!   the base kind is a reference kind
//! - `Struct`/`Class`: `sig-ptr(4)` then `actual-kind(1) | payload` per
//!   field; the signature pointer and reference fields are pointer slots
//! - `Dict`: `key-kind(1) | value-kind(1)` then packed entries; reference
//!   keys and values are pointer slots
//! - `Enum`: `type-name-ptr(4) | member-name-ptr(4) | value(8)`
//! - `Object` payloads hold a host handle, not a heap pointer
//!
//! Pointer slots may hold -1 (null); consumers skip those.

use crate::arena::{Arena, HeapPtr};
use crate::error::{ErrorKind, RunResult, err};
use crate::kind::Kind;

/// Width of a payload cell for the given element kind: reference kinds
/// occupy a 4-byte pointer, value kinds their inline size.
#[inline]
pub fn cell_size(kind: Kind) -> usize {
    if kind.is_reference() { 4 } else { kind.stack_size() }
}

/// Collect the arena addresses of every pointer slot inside the block at
/// `ptr`. Addresses, not values: callers read (GC) or rewrite (realloc)
/// the slots themselves.
pub fn ref_slots(arena: &Arena, ptr: HeapPtr) -> RunResult<Vec<usize>> {
    let info = arena.block_info(ptr)?;
    let base = ptr as usize;
    let len = info.payload_len();
    let mut slots = Vec::new();

    if info.is_array {
        if info.kind.is_reference() {
            for i in 0..len / 4 {
                slots.push(base + i * 4);
            }
        }
        return Ok(slots);
    }

    match info.kind {
        Kind::Tuple => {
            let mut off = 0;
            while off < len {
                let kind = read_cell_kind(arena, base + off)?;
                off += 1;
                if kind.is_reference() {
                    slots.push(base + off);
                }
                off += cell_size(kind);
                if off + 4 > len {
                    return Err(malformed(ptr, "tuple"));
                }
                slots.push(base + off); // name-ptr
                off += 4;
            }
        }
        Kind::Nullable => {
            if len == 0 {
                return Err(malformed(ptr, "nullable"));
            }
            let kind = read_cell_kind(arena, base)?;
            if kind.is_reference() {
                slots.push(base + 1);
            }
        }
        Kind::Struct | Kind::Class => {
            if len < 4 {
                return Err(malformed(ptr, "struct"));
            }
            slots.push(base); // signature pointer
            let mut off = 4;
            while off < len {
                let kind = read_cell_kind(arena, base + off)?;
                off += 1;
                if kind.is_reference() {
                    slots.push(base + off);
                }
                off += cell_size(kind);
            }
            if off != len {
                return Err(malformed(ptr, "struct"));
            }
        }
        Kind::Dict => {
            if len < 2 {
                return Err(malformed(ptr, "dict"));
            }
            let kk = read_cell_kind(arena, base)?;
            let vk = read_cell_kind(arena, base + 1)?;
            let entry = cell_size(kk) + cell_size(vk);
            let mut off = 2;
            while off + entry <= len {
                if kk.is_reference() {
                    slots.push(base + off);
                }
                if vk.is_reference() {
                    slots.push(base + off + cell_size(kk));
                }
                off += entry;
            }
        }
        Kind::Enum => {
            if len < 16 {
                return Err(malformed(ptr, "enum"));
            }
            slots.push(base);
            slots.push(base + 4);
        }
        // Strings, Object handles and boxed value kinds carry no heap
        // pointers.
        _ => {}
    }
    Ok(slots)
}

/// Read the heap-pointer values of every child of the block at `ptr`,
/// skipping nulls.
pub fn children(arena: &Arena, ptr: HeapPtr) -> RunResult<Vec<HeapPtr>> {
    let mut out = Vec::new();
    for slot in ref_slots(arena, ptr)? {
        let child = arena.read_i32(slot)?;
        if child >= 0 {
            out.push(child);
        }
    }
    Ok(out)
}

/// Rewrite every occurrence of `old` with `new` in the pointer slots of
/// every live heap block. Returns the number of slots rewritten.
pub fn rewrite_heap_pointers(arena: &mut Arena, old: HeapPtr, new: HeapPtr) -> RunResult<usize> {
    let used: Vec<HeapPtr> = arena
        .blocks()
        .filter(|(_, info)| info.used)
        .map(|(ptr, _)| ptr)
        .collect();
    let mut hits = 0;
    for ptr in used {
        for slot in ref_slots(arena, ptr)? {
            if arena.read_i32(slot)? == old {
                arena.write_i32(slot, new)?;
                hits += 1;
            }
        }
    }
    Ok(hits)
}

fn read_cell_kind(arena: &Arena, addr: usize) -> RunResult<Kind> {
    let tag = arena.read_u8(addr)?;
    Kind::from_tag(tag).ok_or_else(|| {
        err(
            ErrorKind::SandboxViolation,
            format!("corrupt kind tag {tag} at {addr}"),
        )
    })
}

fn malformed(ptr: HeapPtr, what: &str) -> crate::error::RuntimeError {
    err(
        ErrorKind::SandboxViolation,
        format!("malformed {what} block at {ptr}"),
    )
}
