//! Arena and block header encoding
//!
//! A single byte buffer backs the whole sandbox:
//!
//! ```text
//! ┌────────────────────────┬──────────────────────────────────────────┐
//! │  stack region          │  heap region                             │
//! │  [0, stack_size)       │  [stack_size, stack_size + heap_cap)     │
//! │  variable slots        │  length-prefixed blocks, grows upward    │
//! └────────────────────────┴──────────────────────────────────────────┘
//!                                           ↑ heap_end (relative)
//! ```
//!
//! Every heap allocation is prefixed with a 4-byte little-endian header:
//!
//! ```text
//! bits  0..23   total length (header + payload), <= 0xFFFFFF
//! bits 24..29   kind tag (6 bits)
//! bit  30       is-array
//! bit  31       used
//! ```
//!
//! A "pointer" everywhere in the system is the byte address of the first
//! payload byte; the header sits at `ptr - 4`. Pointers are `i32` with -1
//! as null. All reads and writes are bounds-checked against the stack
//! region or the used heap region; anything else is a `SandboxViolation`.

use crate::error::{ErrorKind, RunResult, err};
use crate::kind::Kind;

/// Bytes of the block header
pub const HEADER_SIZE: usize = 4;

/// Maximum total block length (header + payload) encodable in 24 bits
pub const MAX_BLOCK_LEN: usize = 0xFF_FFFF;

/// Null heap pointer
pub const NULL_PTR: i32 = -1;

/// A heap pointer: byte address of a block's first payload byte
pub type HeapPtr = i32;

/// Default heap region size in bytes
pub const DEFAULT_HEAP_BYTES: usize = 4096;

/// Default stack region size in bytes
pub const DEFAULT_STACK_BYTES: usize = 1024;

/// Hard ceiling on the heap region (keeps every address in `i32` range)
pub const MAX_HEAP_BYTES: usize = 256 * 1024 * 1024;

/// Hard ceiling on the stack region
pub const MAX_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub kind: Kind,
    /// Total length: header + payload
    pub total_len: usize,
    pub used: bool,
    pub is_array: bool,
}

impl BlockInfo {
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.total_len - HEADER_SIZE
    }
}

/// The sandbox byte buffer. Owns every variable slot and heap block; the
/// buffer never grows after construction.
pub struct Arena {
    bytes: Vec<u8>,
    stack_size: usize,
    /// One past the last heap byte in use, relative to the heap base
    heap_end: usize,
}

impl Arena {
    /// Allocate an arena with the given heap and stack region sizes.
    pub fn new(heap_bytes: usize, stack_bytes: usize) -> RunResult<Arena> {
        if heap_bytes < HEADER_SIZE * 2 || heap_bytes > MAX_HEAP_BYTES {
            return Err(err(
                ErrorKind::SandboxViolation,
                format!("heap size {heap_bytes} out of range"),
            ));
        }
        if stack_bytes == 0 || stack_bytes > MAX_STACK_BYTES {
            return Err(err(
                ErrorKind::SandboxViolation,
                format!("stack size {stack_bytes} out of range"),
            ));
        }
        Ok(Arena {
            bytes: vec![0u8; stack_bytes + heap_bytes],
            stack_size: stack_bytes,
            heap_end: 0,
        })
    }

    /// Size of the stack region; also the address of the heap base
    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Capacity of the heap region in bytes
    #[inline]
    pub fn heap_capacity(&self) -> usize {
        self.bytes.len() - self.stack_size
    }

    /// One past the last heap byte in use (relative to the heap base)
    #[inline]
    pub fn heap_end(&self) -> usize {
        self.heap_end
    }

    pub(crate) fn set_heap_end(&mut self, end: usize) {
        debug_assert!(end <= self.heap_capacity());
        self.heap_end = end;
    }

    /// Absolute address one past the used heap
    #[inline]
    pub fn heap_limit(&self) -> usize {
        self.stack_size + self.heap_end
    }

    /// Check that `[addr, addr + size)` lies entirely inside the stack
    /// region or the used heap region.
    pub fn validate(&self, addr: usize, size: usize) -> RunResult<()> {
        let end = addr.checked_add(size).ok_or_else(|| {
            err(ErrorKind::SandboxViolation, "address arithmetic overflow")
        })?;
        let in_stack = end <= self.stack_size;
        let in_heap = addr >= self.stack_size && end <= self.heap_limit();
        if in_stack || in_heap {
            Ok(())
        } else {
            Err(err(
                ErrorKind::SandboxViolation,
                format!("access [{addr}, {end}) outside sandbox memory"),
            ))
        }
    }

    fn validate_ptr(&self, ptr: HeapPtr) -> RunResult<usize> {
        if ptr < 0 {
            return Err(err(ErrorKind::InvalidPointer, "null pointer dereference"));
        }
        let addr = ptr as usize;
        if addr < self.stack_size + HEADER_SIZE || addr > self.heap_limit() {
            return Err(err(
                ErrorKind::InvalidPointer,
                format!("pointer {ptr} outside heap"),
            ));
        }
        Ok(addr)
    }

    // ---- header codec ----

    /// Encode a header at `pos` (the header address, i.e. `ptr - 4`).
    pub fn write_header(
        &mut self,
        pos: usize,
        total_len: usize,
        kind: Kind,
        used: bool,
        is_array: bool,
    ) -> RunResult<()> {
        if total_len < HEADER_SIZE || total_len > MAX_BLOCK_LEN {
            return Err(err(
                ErrorKind::OutOfMemory,
                format!("block length {total_len} not encodable"),
            ));
        }
        if pos < self.stack_size || pos + total_len > self.stack_size + self.heap_capacity() {
            return Err(err(
                ErrorKind::SandboxViolation,
                format!("header at {pos} outside heap region"),
            ));
        }
        let word = (total_len as u32)
            | ((kind.tag() as u32) << 24)
            | ((is_array as u32) << 30)
            | ((used as u32) << 31);
        self.bytes[pos..pos + 4].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    /// Decode the header of the block whose payload starts at `ptr`.
    pub fn block_info(&self, ptr: HeapPtr) -> RunResult<BlockInfo> {
        let addr = self.validate_ptr(ptr)?;
        let pos = addr - HEADER_SIZE;
        let word = u32::from_le_bytes(self.bytes[pos..pos + 4].try_into().unwrap());
        let total_len = (word & 0x00FF_FFFF) as usize;
        let tag = ((word >> 24) & 0x3F) as u8;
        let kind = Kind::from_tag(tag).ok_or_else(|| {
            err(
                ErrorKind::SandboxViolation,
                format!("corrupt header at {pos}: bad kind tag {tag}"),
            )
        })?;
        if total_len < HEADER_SIZE || pos + total_len > self.heap_limit() {
            return Err(err(
                ErrorKind::SandboxViolation,
                format!("corrupt header at {pos}: length {total_len}"),
            ));
        }
        Ok(BlockInfo {
            kind,
            total_len,
            used: word & 0x8000_0000 != 0,
            is_array: word & 0x4000_0000 != 0,
        })
    }

    /// Kind tag of the block at `ptr`
    pub fn read_kind(&self, ptr: HeapPtr) -> RunResult<Kind> {
        Ok(self.block_info(ptr)?.kind)
    }

    /// Payload length of the block at `ptr`
    pub fn payload_len(&self, ptr: HeapPtr) -> RunResult<usize> {
        Ok(self.block_info(ptr)?.payload_len())
    }

    pub fn is_used(&self, ptr: HeapPtr) -> RunResult<bool> {
        Ok(self.block_info(ptr)?.used)
    }

    pub fn is_array(&self, ptr: HeapPtr) -> RunResult<bool> {
        Ok(self.block_info(ptr)?.is_array)
    }

    // ---- bounds-checked raw access ----

    pub fn read_bytes(&self, addr: usize, len: usize) -> RunResult<&[u8]> {
        self.validate(addr, len)?;
        Ok(&self.bytes[addr..addr + len])
    }

    pub fn write_bytes(&mut self, addr: usize, data: &[u8]) -> RunResult<()> {
        self.validate(addr, data.len())?;
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, addr: usize, len: usize, byte: u8) -> RunResult<()> {
        self.validate(addr, len)?;
        self.bytes[addr..addr + len].fill(byte);
        Ok(())
    }

    pub fn read_u8(&self, addr: usize) -> RunResult<u8> {
        self.validate(addr, 1)?;
        Ok(self.bytes[addr])
    }

    pub fn write_u8(&mut self, addr: usize, v: u8) -> RunResult<()> {
        self.validate(addr, 1)?;
        self.bytes[addr] = v;
        Ok(())
    }

    pub fn read_u16(&self, addr: usize) -> RunResult<u16> {
        Ok(u16::from_le_bytes(self.read_bytes(addr, 2)?.try_into().unwrap()))
    }

    pub fn write_u16(&mut self, addr: usize, v: u16) -> RunResult<()> {
        self.write_bytes(addr, &v.to_le_bytes())
    }

    pub fn read_i32(&self, addr: usize) -> RunResult<i32> {
        Ok(i32::from_le_bytes(self.read_bytes(addr, 4)?.try_into().unwrap()))
    }

    pub fn write_i32(&mut self, addr: usize, v: i32) -> RunResult<()> {
        self.write_bytes(addr, &v.to_le_bytes())
    }

    pub fn read_u32(&self, addr: usize) -> RunResult<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(addr, 4)?.try_into().unwrap()))
    }

    pub fn write_u32(&mut self, addr: usize, v: u32) -> RunResult<()> {
        self.write_bytes(addr, &v.to_le_bytes())
    }

    pub fn read_i64(&self, addr: usize) -> RunResult<i64> {
        Ok(i64::from_le_bytes(self.read_bytes(addr, 8)?.try_into().unwrap()))
    }

    pub fn write_i64(&mut self, addr: usize, v: i64) -> RunResult<()> {
        self.write_bytes(addr, &v.to_le_bytes())
    }

    pub fn read_u64(&self, addr: usize) -> RunResult<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(addr, 8)?.try_into().unwrap()))
    }

    pub fn write_u64(&mut self, addr: usize, v: u64) -> RunResult<()> {
        self.write_bytes(addr, &v.to_le_bytes())
    }

    /// Copy `len` bytes from `src` to `dst` inside the arena.
    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) -> RunResult<()> {
        self.validate(src, len)?;
        self.validate(dst, len)?;
        self.bytes.copy_within(src..src + len, dst);
        Ok(())
    }

    /// Walk every block in the heap, used or free, in address order.
    /// Yields payload pointers.
    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter {
            arena: self,
            pos: self.stack_size,
        }
    }
}

/// Iterator over heap blocks in address order
pub struct BlockIter<'a> {
    arena: &'a Arena,
    pos: usize,
}

impl Iterator for BlockIter<'_> {
    type Item = (HeapPtr, BlockInfo);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + HEADER_SIZE > self.arena.heap_limit() {
            return None;
        }
        let ptr = (self.pos + HEADER_SIZE) as HeapPtr;
        match self.arena.block_info(ptr) {
            Ok(info) => {
                self.pos += info.total_len;
                Some((ptr, info))
            }
            // A corrupt header terminates the walk; callers that care
            // re-validate with block_info and surface the violation.
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut a = Arena::new(4096, 1024).unwrap();
        a.set_heap_end(64);
        a.write_header(1024, 20, Kind::Str, true, false).unwrap();
        let info = a.block_info(1028).unwrap();
        assert_eq!(info.kind, Kind::Str);
        assert_eq!(info.total_len, 20);
        assert_eq!(info.payload_len(), 16);
        assert!(info.used);
        assert!(!info.is_array);
    }

    #[test]
    fn test_array_bit() {
        let mut a = Arena::new(4096, 1024).unwrap();
        a.set_heap_end(64);
        a.write_header(1024, 44, Kind::Int, true, true).unwrap();
        assert!(a.is_array(1028).unwrap());
        assert_eq!(a.read_kind(1028).unwrap(), Kind::Int);
    }

    #[test]
    fn test_max_block_len_encodes() {
        let mut a = Arena::new(MAX_BLOCK_LEN + 64, 1024).unwrap();
        a.set_heap_end(MAX_BLOCK_LEN);
        a.write_header(1024, MAX_BLOCK_LEN, Kind::Byte, true, true).unwrap();
        assert_eq!(a.block_info(1028).unwrap().total_len, MAX_BLOCK_LEN);

        let e = a.write_header(1024, MAX_BLOCK_LEN + 1, Kind::Byte, true, true);
        assert_eq!(e.unwrap_err().kind, ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_validate_regions() {
        let mut a = Arena::new(4096, 1024).unwrap();
        // whole stack region is addressable
        assert!(a.validate(0, 1024).is_ok());
        // heap not grown yet: first heap byte is out of bounds
        assert!(a.validate(1024, 1).is_err());
        a.set_heap_end(128);
        assert!(a.validate(1024, 128).is_ok());
        assert!(a.validate(1024, 129).is_err());
        // spans may not straddle the stack/heap boundary
        assert!(a.validate(1000, 48).is_err());
    }

    #[test]
    fn test_null_and_dangling_pointers() {
        let a = Arena::new(4096, 1024).unwrap();
        assert_eq!(
            a.block_info(NULL_PTR).unwrap_err().kind,
            ErrorKind::InvalidPointer
        );
        assert_eq!(a.block_info(2048).unwrap_err().kind, ErrorKind::InvalidPointer);
    }

    #[test]
    fn test_corrupt_header_detected() {
        let mut a = Arena::new(4096, 1024).unwrap();
        a.set_heap_end(64);
        // kind tag 63 is not assigned
        let word: u32 = 16 | (63 << 24) | (1 << 31);
        a.bytes[1024..1028].copy_from_slice(&word.to_le_bytes());
        assert_eq!(
            a.block_info(1028).unwrap_err().kind,
            ErrorKind::SandboxViolation
        );
    }

    #[test]
    fn test_raw_access_round_trip() {
        let mut a = Arena::new(4096, 1024).unwrap();
        a.write_i32(100, -7).unwrap();
        assert_eq!(a.read_i32(100).unwrap(), -7);
        a.write_u16(200, 0xBEEF).unwrap();
        assert_eq!(a.read_u16(200).unwrap(), 0xBEEF);
        a.write_i64(300, i64::MIN).unwrap();
        assert_eq!(a.read_i64(300).unwrap(), i64::MIN);
    }
}
