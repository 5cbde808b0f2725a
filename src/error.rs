use std::{error, fmt};

/// Why an allocation could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
  /// The initial request for heap memory was refused; the heap stays unusable.
  Unusable,
  /// The heap could not be extended far enough for a block of `requested`
  /// usable bytes.
  Refused { requested: usize },
  /// The source handed out memory that does not continue the heap.
  Discontiguous,
}

impl fmt::Display for HeapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      HeapError::Unusable => write!(f, "heap could not be bootstrapped"),
      HeapError::Refused { requested } => {
        write!(f, "heap could not grow to fit {requested} bytes")
      },
      HeapError::Discontiguous => write!(f, "heap extension is not contiguous with the heap end"),
    }
  }
}

impl error::Error for HeapError {}

/// A broken heap invariant, reported by
/// [`FreeListAllocator::verify`](crate::FreeListAllocator::verify).
///
/// Offsets are relative to the start of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
  /// Header and footer words of a block disagree.
  TagMismatch { block: usize, header: u64, footer: u64 },
  /// Two heap-adjacent blocks are both free.
  AdjacentFree { left: usize, right: usize },
  /// A block's usable size is below the minimum payload.
  Undersized { block: usize, size: usize },
  /// The free list and the free flags disagree about a block.
  FreeListMismatch { block: usize },
  /// The walk from the first block did not end exactly at the last one.
  TilingGap { expected: usize, found: usize },
}

impl fmt::Display for Violation {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Violation::TagMismatch { block, header, footer } => {
        write!(f, "block {block:#x}: header {header:#x} != footer {footer:#x}")
      },
      Violation::AdjacentFree { left, right } => {
        write!(f, "blocks {left:#x} and {right:#x} are adjacent and both free")
      },
      Violation::Undersized { block, size } => {
        write!(f, "block {block:#x} has only {size} usable bytes")
      },
      Violation::FreeListMismatch { block } => {
        write!(f, "block {block:#x} disagrees with the free list")
      },
      Violation::TilingGap { expected, found } => {
        write!(f, "heap walk reached {found:#x}, expected {expected:#x}")
      },
    }
  }
}

impl error::Error for Violation {}
