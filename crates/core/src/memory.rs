//! The `Memory` façade
//!
//! One value owning everything the sandbox's memory model consists of:
//! the arena (stack region + heap blocks), the scope stack, the pin set,
//! the host handle table and the statistics counters. The interpreter
//! layer talks to this type; the pieces stay individually testable.
//!
//! Responsibilities that genuinely span the pieces live here:
//!
//! - **scope exit** pops the scope *and* runs a GC cycle with the
//!   remaining roots
//! - **relocating realloc** moves a block and then rewrites the old
//!   pointer wherever it may be stored: scope variable slots, the pin
//!   set, and every reference-carrying field of every live heap block
//! - **root harvesting** for the collector: the pin set plus every
//!   reference-kind variable slot and every heap-plausible `IntPtr`

use crate::arena::{Arena, HeapPtr};
use crate::error::RunResult;
use crate::gc;
use crate::handles::{DEFAULT_HANDLE_CAPACITY, HandleTable};
use crate::kind::Kind;
use crate::scope::ScopeStack;
use crate::stats::{MemoryReport, MemoryStats};
use crate::trace;

/// A pin key: the pinned pointer itself.
pub type PinKey = HeapPtr;

pub struct Memory {
    pub arena: Arena,
    pub scopes: ScopeStack,
    pub handles: HandleTable,
    pub stats: MemoryStats,
    pins: Vec<HeapPtr>,
}

impl Memory {
    pub fn new(heap_bytes: usize, stack_bytes: usize) -> RunResult<Memory> {
        let arena = Arena::new(heap_bytes, stack_bytes)?;
        let scopes = ScopeStack::new(arena.stack_size());
        Ok(Memory {
            arena,
            scopes,
            handles: HandleTable::new(DEFAULT_HANDLE_CAPACITY),
            stats: MemoryStats::default(),
            pins: Vec::new(),
        })
    }

    // ---- allocation ----

    pub fn alloc(&mut self, payload_len: usize, kind: Kind, is_array: bool) -> RunResult<HeapPtr> {
        let ptr = self.arena.malloc(payload_len, kind, is_array)?;
        self.stats.note_alloc(self.arena.heap_end());
        Ok(ptr)
    }

    pub fn free(&mut self, ptr: HeapPtr) -> RunResult<()> {
        self.arena.free(ptr)
    }

    /// Resize a block. When growth moves the block, every occurrence of
    /// the old pointer (scope variables, pins, reachable heap fields)
    /// is relocated to the new one.
    pub fn realloc(&mut self, ptr: HeapPtr, new_payload_len: usize) -> RunResult<HeapPtr> {
        let new_ptr = self.arena.realloc_raw(ptr, new_payload_len)?;
        self.stats.reallocations += 1;
        if new_ptr != ptr {
            self.relocate(ptr, new_ptr)?;
        }
        Ok(new_ptr)
    }

    fn relocate(&mut self, old: HeapPtr, new: HeapPtr) -> RunResult<()> {
        let mut hits = trace::rewrite_heap_pointers(&mut self.arena, old, new)?;

        let vars: Vec<_> = self.scopes.all_variables().collect();
        for var in vars {
            if var.kind.is_reference() {
                if self.arena.read_i32(var.addr)? == old {
                    self.arena.write_i32(var.addr, new)?;
                    hits += 1;
                }
            } else if var.kind == Kind::IntPtr && self.arena.read_i64(var.addr)? == old as i64 {
                self.arena.write_i64(var.addr, new as i64)?;
                hits += 1;
            }
        }

        for pin in &mut self.pins {
            if *pin == old {
                *pin = new;
                hits += 1;
            }
        }
        self.stats.relocations += hits as u64;
        tracing::trace!(old, new, hits, "relocated moved block");
        Ok(())
    }

    // ---- pins ----

    /// Register `ptr` as an always-live GC root. The returned key (the
    /// pointer itself) may have been updated by a relocating realloc by
    /// the time it is unpinned; unpin therefore takes the *current*
    /// pointer value.
    pub fn pin(&mut self, ptr: HeapPtr) -> PinKey {
        self.pins.push(ptr);
        ptr
    }

    /// Remove one pin registration for `key`.
    pub fn unpin(&mut self, key: PinKey) {
        if let Some(i) = self.pins.iter().rposition(|p| *p == key) {
            self.pins.swap_remove(i);
        }
    }

    pub fn pinned(&self) -> &[HeapPtr] {
        &self.pins
    }

    // ---- scopes ----

    pub fn enter_scope(&mut self) -> RunResult<()> {
        self.scopes.enter()
    }

    /// Exit the innermost scope and collect garbage with the surviving
    /// roots.
    pub fn exit_scope(&mut self) -> RunResult<()> {
        self.scopes.exit()?;
        self.collect()?;
        Ok(())
    }

    // ---- GC ----

    /// Harvest roots: the pin set, reference-kind variable slots and any
    /// `IntPtr` variable whose value lands in the heap.
    fn roots(&self) -> RunResult<Vec<HeapPtr>> {
        let mut roots = self.pins.clone();
        for var in self.scopes.all_variables() {
            if var.kind.is_reference() {
                let ptr = self.arena.read_i32(var.addr)?;
                if ptr >= 0 {
                    roots.push(ptr);
                }
            } else if var.kind == Kind::IntPtr {
                let v = self.arena.read_i64(var.addr)?;
                if v >= 0 && v <= i32::MAX as i64 {
                    roots.push(v as i32);
                }
            }
        }
        Ok(roots)
    }

    /// Run one mark-and-sweep cycle.
    pub fn collect(&mut self) -> RunResult<gc::Sweep> {
        let roots = self.roots()?;
        let sweep = gc::collect(&mut self.arena, roots)?;
        for handle in &sweep.released_handles {
            self.handles.release(*handle);
        }
        self.stats.gc_cycles += 1;
        self.stats.gc_freed_blocks += sweep.freed_blocks as u64;
        self.stats.gc_freed_bytes += sweep.freed_bytes as u64;
        self.scopes.bump_version();
        Ok(sweep)
    }

    // ---- reporting ----

    pub fn report(&self) -> MemoryReport {
        MemoryReport {
            heap_capacity: self.arena.heap_capacity(),
            heap_end: self.arena.heap_end(),
            used_bytes: self.arena.used_bytes(),
            stack_capacity: self.arena.stack_size(),
            stack_in_use: self.scopes.stack_in_use(),
            scope_count: self.scopes.scope_count(),
            variable_count: self.scopes.variable_count(),
            live_handles: self.handles.live(),
            pinned: self.pins.len(),
            allocations: self.stats.allocations,
            reallocations: self.stats.reallocations,
            gc_cycles: self.stats.gc_cycles,
            gc_freed_blocks: self.stats.gc_freed_blocks,
            gc_freed_bytes: self.stats.gc_freed_bytes,
            peak_heap_bytes: self.stats.peak_heap_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn memory() -> Memory {
        Memory::new(4096, 1024).unwrap()
    }

    #[test]
    fn test_scope_exit_collects_unreferenced_blocks() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("s", Kind::Str).unwrap();
        let p = m.alloc(16, Kind::Str, false).unwrap();
        m.arena.write_i32(var.addr, p).unwrap();
        let orphan = m.alloc(16, Kind::Str, false).unwrap();

        m.enter_scope().unwrap();
        m.exit_scope().unwrap();

        // rooted through the variable: survives; orphan: swept
        assert!(m.arena.is_used(p).unwrap());
        assert!(matches!(m.arena.is_used(orphan), Ok(false) | Err(_)));

        m.exit_scope().unwrap();
        assert_eq!(m.arena.used_bytes(), 0);
    }

    #[test]
    fn test_pin_keeps_block_alive() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let p = m.alloc(8, Kind::Str, false).unwrap();
        let key = m.pin(p);
        m.collect().unwrap();
        assert!(m.arena.is_used(p).unwrap());
        m.unpin(key);
        m.collect().unwrap();
        assert!(matches!(m.arena.is_used(p), Ok(false) | Err(_)));
    }

    #[test]
    fn test_realloc_relocates_variable_and_heap_slots() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let var = m.scopes.declare("s", Kind::Str).unwrap();
        let p = m.alloc(8, Kind::Str, false).unwrap();
        m.arena.write_i32(var.addr, p).unwrap();

        // An array also holds the pointer
        let arr_var = m.scopes.declare("a", Kind::Array).unwrap();
        let arr = m.alloc(4, Kind::Str, true).unwrap();
        m.arena.write_i32(arr as usize, p).unwrap();
        m.arena.write_i32(arr_var.addr, arr).unwrap();

        // Block a move by occupying the space after p, then grow
        let _guard = m.alloc(8, Kind::Int, false).unwrap();
        let q = m.realloc(p, 64).unwrap();
        assert_ne!(q, p);
        assert_eq!(m.arena.read_i32(var.addr).unwrap(), q);
        assert_eq!(m.arena.read_i32(arr as usize).unwrap(), q);

        // Nothing dangling: a GC keeps everything reachable
        m.collect().unwrap();
        assert!(m.arena.is_used(q).unwrap());
    }

    #[test]
    fn test_realloc_relocates_pins() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let p = m.alloc(8, Kind::Str, false).unwrap();
        m.pin(p);
        let _guard = m.alloc(8, Kind::Int, false).unwrap();
        let q = m.realloc(p, 128).unwrap();
        assert_ne!(q, p);
        assert_eq!(m.pinned(), &[q]);
    }

    #[test]
    fn test_object_sweep_releases_handle() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let h = m.handles.acquire(Box::new(123_i64)).unwrap();
        let obj = m.alloc(4, Kind::Object, false).unwrap();
        m.arena.write_i32(obj as usize, h).unwrap();
        assert_eq!(m.handles.live(), 1);
        m.collect().unwrap();
        assert_eq!(m.handles.live(), 0);
    }

    #[test]
    fn test_collect_bumps_scope_version() {
        let mut m = memory();
        m.enter_scope().unwrap();
        let v = m.scopes.version();
        m.collect().unwrap();
        assert_ne!(m.scopes.version(), v);
    }

    #[test]
    fn test_oom_is_reported_after_defragment() {
        let mut m = Memory::new(64, 64).unwrap();
        m.enter_scope().unwrap();
        let e = m.alloc(1024, Kind::Str, false).unwrap_err();
        assert_eq!(e.kind, ErrorKind::OutOfMemory);
    }
}
