//! Precise mark-and-sweep collector
//!
//! Roots are supplied by the caller: the pin set plus every reference-kind
//! (or heap-pointing `IntPtr`) variable in every live scope. Marking
//! follows each block's layout exactly (see `trace`); sweeping walks the
//! heap linearly and frees any used, unmarked block. Blocks are never
//! relocated.
//!
//! Sweeping an `Object` block surrenders its host handle: the freed
//! handle indices are returned so the owner can release the slots.

use crate::arena::{Arena, HeapPtr};
use crate::error::RunResult;
use crate::kind::Kind;
use crate::trace::children;
use std::collections::HashSet;

/// Result of one collection cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Sweep {
    pub marked_blocks: usize,
    pub freed_blocks: usize,
    pub freed_bytes: usize,
    /// Handle indices held by swept `Object` blocks
    pub released_handles: Vec<i32>,
}

/// Mark from `roots` and sweep the heap. Roots that do not point at a
/// live block (e.g. speculative `IntPtr` values) are ignored rather than
/// faulted: a root is a *possible* reference.
pub fn collect(arena: &mut Arena, roots: impl IntoIterator<Item = HeapPtr>) -> RunResult<Sweep> {
    let mut marked: HashSet<HeapPtr> = HashSet::new();
    let mut work: Vec<HeapPtr> = Vec::new();

    for root in roots {
        if is_live_block(arena, root) {
            work.push(root);
        }
    }

    while let Some(ptr) = work.pop() {
        if !marked.insert(ptr) {
            continue;
        }
        for child in children(arena, ptr)? {
            if !marked.contains(&child) && is_live_block(arena, child) {
                work.push(child);
            }
        }
    }

    let mut sweep = Sweep {
        marked_blocks: marked.len(),
        ..Sweep::default()
    };
    let victims: Vec<(HeapPtr, Kind, usize)> = arena
        .blocks()
        .filter(|(ptr, info)| info.used && !marked.contains(ptr))
        .map(|(ptr, info)| (ptr, info.kind, info.payload_len()))
        .collect();

    for (ptr, kind, payload) in victims {
        if kind == Kind::Object && payload >= 4 {
            sweep.released_handles.push(arena.read_i32(ptr as usize)?);
        }
        arena.free(ptr)?;
        sweep.freed_blocks += 1;
        sweep.freed_bytes += payload;
    }

    if sweep.freed_blocks > 0 {
        arena.defragment()?;
    }
    tracing::trace!(
        marked = sweep.marked_blocks,
        freed = sweep.freed_blocks,
        freed_bytes = sweep.freed_bytes,
        "gc sweep"
    );
    Ok(sweep)
}

fn is_live_block(arena: &Arena, ptr: HeapPtr) -> bool {
    ptr >= 0 && matches!(arena.block_info(ptr), Ok(info) if info.used)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arena {
        Arena::new(4096, 1024).unwrap()
    }

    #[test]
    fn test_unrooted_block_is_swept() {
        let mut a = arena();
        let p = a.malloc(16, Kind::Str, false).unwrap();
        let sweep = collect(&mut a, []).unwrap();
        assert_eq!(sweep.freed_blocks, 1);
        assert_eq!(sweep.freed_bytes, 16);
        assert!(a.block_info(p).is_err() || !a.block_info(p).unwrap().used);
    }

    #[test]
    fn test_rooted_block_survives() {
        let mut a = arena();
        let p = a.malloc(16, Kind::Str, false).unwrap();
        let sweep = collect(&mut a, [p]).unwrap();
        assert_eq!(sweep.freed_blocks, 0);
        assert!(a.is_used(p).unwrap());
    }

    #[test]
    fn test_marking_traverses_arrays() {
        let mut a = arena();
        let s = a.malloc(3, Kind::Str, false).unwrap();
        let arr = a.malloc(8, Kind::Str, true).unwrap();
        a.write_i32(arr as usize, s).unwrap();
        a.write_i32(arr as usize + 4, -1).unwrap();
        let garbage = a.malloc(8, Kind::Int, false).unwrap();

        let sweep = collect(&mut a, [arr]).unwrap();
        assert_eq!(sweep.freed_blocks, 1);
        assert!(a.is_used(s).unwrap());
        assert!(a.is_used(arr).unwrap());
        assert!(!a.is_used(garbage).unwrap_or(false) || a.block_info(garbage).is_err());
    }

    #[test]
    fn test_cycles_do_not_loop() {
        let mut a = arena();
        // Two ref arrays pointing at each other
        let a1 = a.malloc(4, Kind::Array, true).unwrap();
        let a2 = a.malloc(4, Kind::Array, true).unwrap();
        a.write_i32(a1 as usize, a2).unwrap();
        a.write_i32(a2 as usize, a1).unwrap();
        let sweep = collect(&mut a, [a1]).unwrap();
        assert_eq!(sweep.freed_blocks, 0);
        assert_eq!(sweep.marked_blocks, 2);
        // Unrooted, the cycle is collected whole
        let sweep = collect(&mut a, []).unwrap();
        assert_eq!(sweep.freed_blocks, 2);
    }

    #[test]
    fn test_object_sweep_reports_handle() {
        let mut a = arena();
        let obj = a.malloc(4, Kind::Object, false).unwrap();
        a.write_i32(obj as usize, 5).unwrap();
        let sweep = collect(&mut a, []).unwrap();
        assert_eq!(sweep.released_handles, vec![5]);
    }

    #[test]
    fn test_intptr_style_root_outside_heap_is_ignored() {
        let mut a = arena();
        let _p = a.malloc(8, Kind::Str, false).unwrap();
        // 64 points into the stack region, 999999 outside the arena
        let sweep = collect(&mut a, [64, 999_999]).unwrap();
        assert_eq!(sweep.freed_blocks, 1);
    }
}
