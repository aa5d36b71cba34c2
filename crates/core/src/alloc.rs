//! Heap allocator
//!
//! malloc/free/realloc over the arena's heap region:
//!
//! 1. **First-fit**: scan blocks in address order for the first free block
//!    of sufficient total length, splitting off a free tail when the
//!    remainder can hold a header.
//! 2. On no fit, **defragment** (coalesce adjacent free runs left to right
//!    and truncate a trailing free tail by lowering `heap_end`) and retry.
//! 3. On still no fit, grow from the top while capacity remains.
//! 4. Otherwise `OutOfMemory`.
//!
//! The allocator never moves a live block; relocation on growth is the
//! realloc caller's job (see `Memory::realloc`).

use crate::arena::{Arena, HEADER_SIZE, HeapPtr, MAX_BLOCK_LEN};
use crate::error::{ErrorKind, RunResult, err};
use crate::kind::Kind;

impl Arena {
    /// Allocate a block with exactly `payload_len` payload bytes.
    /// The payload is zeroed. Returns the payload pointer.
    pub fn malloc(&mut self, payload_len: usize, kind: Kind, is_array: bool) -> RunResult<HeapPtr> {
        let need = payload_len + HEADER_SIZE;
        if need > MAX_BLOCK_LEN {
            return Err(err(
                ErrorKind::OutOfMemory,
                format!("allocation of {payload_len} bytes exceeds block limit"),
            ));
        }

        if let Some(ptr) = self.find_first_fit(need, kind, is_array)? {
            return Ok(ptr);
        }

        self.defragment()?;
        if let Some(ptr) = self.find_first_fit(need, kind, is_array)? {
            tracing::trace!(payload_len, "malloc satisfied after defragment");
            return Ok(ptr);
        }

        // Grow from the top
        if self.heap_end() + need <= self.heap_capacity() {
            let pos = self.stack_size() + self.heap_end();
            self.set_heap_end(self.heap_end() + need);
            self.write_header(pos, need, kind, true, is_array)?;
            let ptr = (pos + HEADER_SIZE) as HeapPtr;
            self.fill(ptr as usize, payload_len, 0)?;
            return Ok(ptr);
        }

        tracing::debug!(
            payload_len,
            heap_end = self.heap_end(),
            capacity = self.heap_capacity(),
            "heap exhausted"
        );
        Err(err(
            ErrorKind::OutOfMemory,
            format!(
                "out of heap memory allocating {payload_len} bytes ({} of {} in use)",
                self.heap_end(),
                self.heap_capacity()
            ),
        ))
    }

    fn find_first_fit(
        &mut self,
        need: usize,
        kind: Kind,
        is_array: bool,
    ) -> RunResult<Option<HeapPtr>> {
        let mut found = None;
        for (ptr, info) in self.blocks() {
            if !info.used && info.total_len >= need {
                found = Some((ptr, info.total_len));
                break;
            }
        }
        let Some((ptr, have)) = found else {
            return Ok(None);
        };
        let pos = ptr as usize - HEADER_SIZE;
        let taken = if have - need >= HEADER_SIZE {
            // Split off a free tail block
            self.write_header(pos, need, kind, true, is_array)?;
            self.write_header(pos + need, have - need, Kind::Byte, false, false)?;
            need
        } else {
            // Take the whole block, slack and all
            self.write_header(pos, have, kind, true, is_array)?;
            have
        };
        self.fill(ptr as usize, taken - HEADER_SIZE, 0)?;
        Ok(Some(ptr))
    }

    /// Release a block. Freeing a block that is already free is a
    /// double free and raises `InvalidPointer`.
    pub fn free(&mut self, ptr: HeapPtr) -> RunResult<()> {
        let info = self.block_info(ptr)?;
        if !info.used {
            return Err(err(
                ErrorKind::InvalidPointer,
                format!("double free of pointer {ptr}"),
            ));
        }
        let pos = ptr as usize - HEADER_SIZE;
        self.write_header(pos, info.total_len, info.kind, false, info.is_array)
    }

    /// Coalesce adjacent free blocks left to right, then truncate a
    /// trailing free tail by lowering `heap_end`.
    pub fn defragment(&mut self) -> RunResult<()> {
        let mut pos = self.stack_size();
        while pos + HEADER_SIZE <= self.heap_limit() {
            let info = self.block_info((pos + HEADER_SIZE) as HeapPtr)?;
            if info.used {
                pos += info.total_len;
                continue;
            }
            // Merge the free run that starts here, up to the encodable cap
            let mut total = info.total_len;
            loop {
                let next = pos + total;
                if next + HEADER_SIZE > self.heap_limit() {
                    break;
                }
                let next_info = self.block_info((next + HEADER_SIZE) as HeapPtr)?;
                if next_info.used || total + next_info.total_len > MAX_BLOCK_LEN {
                    break;
                }
                total += next_info.total_len;
            }
            if total != info.total_len {
                self.write_header(pos, total, Kind::Byte, false, false)?;
            }
            if pos + total == self.heap_limit() {
                // Trailing free tail: give it back to the unallocated top
                self.set_heap_end(pos - self.stack_size());
                tracing::trace!(heap_end = self.heap_end(), "defragment truncated tail");
                return Ok(());
            }
            pos += total;
        }
        Ok(())
    }

    /// Resize a block at the raw level. Shrinking reuses the block in
    /// place (splitting off a free tail when possible and zeroing the
    /// abandoned bytes); growing allocates a new block, copies the
    /// payload and frees the old one. Returns the (possibly new) payload
    /// pointer; reference relocation after a move is the caller's job.
    pub fn realloc_raw(&mut self, ptr: HeapPtr, new_payload_len: usize) -> RunResult<HeapPtr> {
        let info = self.block_info(ptr)?;
        if !info.used {
            return Err(err(
                ErrorKind::InvalidPointer,
                format!("realloc of freed pointer {ptr}"),
            ));
        }
        let old_payload = info.payload_len();
        if new_payload_len == old_payload {
            return Ok(ptr);
        }
        let pos = ptr as usize - HEADER_SIZE;
        if new_payload_len < old_payload {
            let need = new_payload_len + HEADER_SIZE;
            let remainder = info.total_len - need;
            if remainder >= HEADER_SIZE {
                self.write_header(pos, need, info.kind, true, info.is_array)?;
                self.write_header(pos + need, remainder, Kind::Byte, false, false)?;
            }
            // Zero the abandoned tail so shrunk strings read back trimmed
            self.fill(ptr as usize + new_payload_len, old_payload - new_payload_len, 0)?;
            return Ok(ptr);
        }
        let new_ptr = self.malloc(new_payload_len, info.kind, info.is_array)?;
        self.copy_within(ptr as usize, new_ptr as usize, old_payload)?;
        self.free(ptr)?;
        Ok(new_ptr)
    }

    /// Sum of payload bytes of used blocks (the figure `GetMemoryUsage`
    /// reports).
    pub fn used_bytes(&self) -> usize {
        self.blocks()
            .filter(|(_, info)| info.used)
            .map(|(_, info)| info.payload_len())
            .sum()
    }
}
