//! Sable Core: the memory substrate of the sable sandbox
//!
//! Everything an interpreter instance's memory model needs, with no
//! knowledge of syntax or evaluation:
//!
//! - `Arena`: the fixed byte buffer split into a stack region and a heap
//!   of length-prefixed, kind-tagged blocks
//! - allocator: first-fit malloc/free/realloc with a coalescing
//!   defragmenter
//! - `gc`: precise mark-and-sweep driven by scopes and pins
//! - `ScopeStack`: name→variable maps with LIFO slot reclamation
//! - `HandleTable`: opaque host objects parked outside the arena
//! - `Memory`: the façade owning all of the above
//!
//! # Modules
//!
//! - `kind`: the closed runtime kind enumeration and its 6-bit tags
//! - `error`: the failure taxonomy (`ErrorKind`, `RuntimeError`)
//! - `arena`: buffer, header codec, bounds-checked access
//! - `alloc`: the heap allocator (impl on `Arena`)
//! - `trace`: layout-keyed pointer-slot enumeration
//! - `gc`: the collector
//! - `scope`: scope stack and variable table
//! - `handles`: host-object handle table
//! - `memory`: the owning façade
//! - `stats`: counters and the serializable report

pub mod alloc;
pub mod arena;
pub mod error;
pub mod gc;
pub mod handles;
pub mod kind;
pub mod memory;
pub mod scope;
pub mod stats;
pub mod trace;

pub use arena::{
    Arena, BlockInfo, DEFAULT_HEAP_BYTES, DEFAULT_STACK_BYTES, HEADER_SIZE, HeapPtr,
    MAX_BLOCK_LEN, NULL_PTR,
};
pub use error::{ErrorKind, RunResult, RuntimeError, err};
pub use gc::Sweep;
pub use handles::HandleTable;
pub use kind::Kind;
pub use memory::{Memory, PinKey};
pub use scope::{MAX_NAME_BYTES, MAX_SCOPES, MAX_VARIABLES, ScopeStack, Variable};
pub use stats::{MemoryReport, MemoryStats};
