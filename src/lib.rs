//! # tagalloc - An Explicit Free-List Memory Allocator
//!
//! This crate provides a user-space allocator that manages one contiguous heap
//! obtained incrementally from the operating system (`sbrk(2)` by default).
//! Freed blocks are threaded onto an explicit free list and merged with their
//! free neighbours through boundary tags.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌──────┬──────┬──────┬──────┬────────────────────────────────────┐ │
//!   │   │ used │ free │ used │ used │        untouched tail              │ │
//!   │   └──────┴──────┴──────┴──────┴────────────────────────────────────┘ │
//!   │   ▲                    ▲                                           ▲ │
//!   │   │                    │                                           │ │
//!   │  first               last                                     heap end│
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Blocks tile the heap from `first` to `last` with no gaps.
//!   The tail after `last` has no header until it is carved.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Header/footer encoding and address arithmetic (internal)
//!   ├── source     - Heap-growth primitives (Sbrk, Arena)
//!   ├── heap       - Bootstrap, growth and word access (internal)
//!   ├── free_list  - Intrusive doubly linked free list (internal)
//!   ├── allocator  - FreeListAllocator: allocate and release
//!   ├── walk       - Heap walking and invariant checks
//!   └── error      - HeapError, Violation
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Arena, FreeListAllocator};
//!
//! let mut allocator = FreeListAllocator::with_source(Arena::new(64 * 1024));
//!
//! let ptr = allocator.allocate(24) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!   ptr.write(42);
//!   assert_eq!(ptr.read(), 42);
//!
//!   allocator.release(ptr as *mut u8);
//! }
//!
//! assert_eq!(allocator.verify(), Ok(()));
//! ```
//!
//! ## How It Works
//!
//! Every block carries its size twice, in an 8-byte header and an 8-byte
//! footer. Sizes are multiples of 8, so the low bit of each copy is the free
//! flag:
//!
//! ```text
//!   Single Block:
//!   ┌──────────┬──────────────────────────────────────┬──────────┐
//!   │  header  │              payload                 │  footer  │
//!   │ size | f │   (next, prev links while free)      │ size | f │
//!   └──────────┴──────────────────────────────────────┴──────────┘
//!              ▲
//!              └── Pointer returned to user (8-byte aligned)
//! ```
//!
//! - **Allocation** rounds the request up to 8 (at least 16 bytes) and takes
//!   the first free block that fits. If what is left over could form a block
//!   of its own it is split off and put back on the free list. With no fit,
//!   a new block is carved right after the last one, growing the heap in
//!   fixed increments as needed.
//! - **Release** looks at the footer just before the block and the header
//!   just after it. Free neighbours are unlinked and merged into one block,
//!   which is pushed onto the free list. No two adjacent blocks are ever both
//!   free.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **No shrinking**: memory is never returned to the OS
//! - **No misuse detection**: double release or foreign pointers corrupt the
//!   heap (debug builds assert on the common cases)
//! - **Unix-only**: `Sbrk` requires `libc`
//!
//! ## Safety
//!
//! Allocation is safe. Releasing a pointer is `unsafe`: the pointer must come
//! from the same allocator and must not have been released already.

pub mod align;
mod allocator;
mod block;
mod error;
mod free_list;
mod heap;
mod source;
mod walk;

pub use allocator::FreeListAllocator;
pub use block::{MIN_BLOCK, MIN_PAYLOAD, OVERHEAD};
pub use error::{HeapError, Violation};
pub use heap::HEAP_INCREMENT;
pub use source::{Arena, HeapSource, Sbrk, program_break};
pub use walk::{BlockInfo, Blocks, FreeBlocks};
