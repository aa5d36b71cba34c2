//! Memory statistics and the serializable report
//!
//! Counters are updated by the `Memory` façade as allocations and GC
//! cycles happen; `MemoryReport` is the snapshot the CLI serializes for
//! `--report json`.

use serde::Serialize;

/// Running counters for one interpreter instance.
#[derive(Debug, Default, Clone)]
pub struct MemoryStats {
    pub allocations: u64,
    pub reallocations: u64,
    pub relocations: u64,
    pub gc_cycles: u64,
    pub gc_freed_blocks: u64,
    pub gc_freed_bytes: u64,
    /// High-water mark of `heap_end`
    pub peak_heap_bytes: usize,
}

impl MemoryStats {
    pub fn note_alloc(&mut self, heap_end: usize) {
        self.allocations += 1;
        if heap_end > self.peak_heap_bytes {
            self.peak_heap_bytes = heap_end;
        }
    }
}

/// Point-in-time snapshot of the sandbox memory.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub heap_capacity: usize,
    pub heap_end: usize,
    pub used_bytes: usize,
    pub stack_capacity: usize,
    pub stack_in_use: usize,
    pub scope_count: usize,
    pub variable_count: usize,
    pub live_handles: usize,
    pub pinned: usize,
    pub allocations: u64,
    pub reallocations: u64,
    pub gc_cycles: u64,
    pub gc_freed_blocks: u64,
    pub gc_freed_bytes: u64,
    pub peak_heap_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracking() {
        let mut s = MemoryStats::default();
        s.note_alloc(100);
        s.note_alloc(50);
        assert_eq!(s.allocations, 2);
        assert_eq!(s.peak_heap_bytes, 100);
    }
}
